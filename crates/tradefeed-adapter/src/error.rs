/*
[INPUT]:  Error sources (transport, handshake, auth, frames, callbacks, registry)
[OUTPUT]: Structured error types with retry and auth classification
[POS]:    Error handling layer - unified error types for entire crate
[UPDATE]: When adding new error sources or improving error messages
*/

use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// Boxed error returned by subscription callbacks
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Main error type for the feed adapter
#[derive(Error, Debug)]
pub enum FeedError {
    /// Connect, send or receive failed at the transport level
    #[error("Transport error: {0}")]
    Transport(String),

    /// Underlying WebSocket library error
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    /// Credentials were rejected or unavailable
    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    /// Frame could not be decoded or has an unexpected shape
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Serialization/deserialization failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A subscription callback returned an error or panicked
    #[error("Callback for {key} failed: {message}")]
    Callback { key: String, message: String },

    /// Incremental change against a subscription that does not exist
    #[error("No active subscription for {key}")]
    SubscriptionState { key: String },

    /// No live connection to send on
    #[error("WebSocket not connected")]
    NotConnected,

    /// Session was closed by the caller
    #[error("Session closed")]
    SessionClosed,

    /// URL parsing failed
    #[error("Invalid URL: {0}")]
    UrlParse(#[from] url::ParseError),

    /// HTTP request failed (webhook notifier)
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Connection timeout
    #[error("Connection timeout after {duration}s")]
    Timeout { duration: u64 },
}

impl FeedError {
    /// Check if the error is worth another connection attempt
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FeedError::Transport(_)
                | FeedError::WebSocket(_)
                | FeedError::NotConnected
                | FeedError::Http(_)
                | FeedError::Timeout { .. }
        )
    }

    /// Check if error indicates authentication failure
    pub fn is_auth_error(&self) -> bool {
        matches!(self, FeedError::Authentication { .. })
    }

    /// Map a handshake failure, surfacing auth rejections distinctly
    pub fn from_handshake(err: tungstenite::Error) -> Self {
        if let tungstenite::Error::Http(response) = &err {
            let status = response.status();
            if status.as_u16() == 401 || status.as_u16() == 403 {
                return FeedError::Authentication {
                    message: format!("handshake rejected with status {status}"),
                };
            }
        }
        FeedError::WebSocket(err)
    }

    pub(crate) fn transport(message: impl Into<String>) -> Self {
        FeedError::Transport(message.into())
    }
}

/// Result type alias for feed operations
pub type Result<T> = std::result::Result<T, FeedError>;
