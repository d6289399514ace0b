/*
[INPUT]:  Public API exports for tradefeed-monitor crate
[OUTPUT]: Module declarations and public re-exports
[POS]:    Crate root - library entry point
[UPDATE]: When adding new modules or public exports
*/

pub mod config;
pub mod runner;

// Re-export main types for convenience
pub use config::{MonitorConfig, ProtocolKind, SessionSpec, SubscriptionSpec};
pub use runner::{FeedSession, Monitor};
