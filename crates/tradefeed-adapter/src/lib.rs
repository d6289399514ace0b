/*
[INPUT]:  Crate modules and public type definitions
[OUTPUT]: Public trade feed adapter crate surface
[POS]:    Crate root - module wiring
[UPDATE]: When public modules or exports change
*/

pub mod auth;
pub mod config;
pub mod error;
pub mod notify;
pub mod protocol;
pub mod ws;

// Re-export commonly used types from auth
pub use auth::{AuthTokens, Authenticator, StaticAuthenticator, TokenData, TokenStore};

pub use config::{CookieNames, ReconnectPolicy, SessionConfig};

pub use error::{BoxError, FeedError, Result};

pub use notify::{ChannelNotifier, Notifier, TracingNotifier, WebhookNotifier};

// Re-export protocol adapters and their sessions
pub use protocol::{
    Dispatch,
    Protocol,
    PulseProtocol,
    PulseSession,
    RpcProtocol,
    RpcSession,
    RpcUnsubscribe,
    Rule,
    TopicDialect,
    TopicParams,
    TopicProtocol,
    TopicSession,
    TopicUnsubscribe,
};

// Re-export commonly used types from ws
pub use ws::{
    Callback,
    Connector,
    Frame,
    Session,
    SessionState,
    TungsteniteConnector,
    callback,
};
