//! Client error types.

use thiserror::Error;

/// Client error type.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("subscription error: {0}")]
    Subscription(String),

    #[error("timeout error: {0}")]
    Timeout(String),

    #[error("not connected")]
    NotConnected,

    #[error("already connected")]
    AlreadyConnected,

    #[error("protocol error: {0}")]
    Protocol(String),

    /// The relay answered a publish with a non-success HTTP status.
    #[error("relay rejected event (HTTP {status}): {body}")]
    Rejected { status: u16, body: String },

    /// A consumer handler failed while processing an event.
    #[error("event handler error: {0}")]
    Callback(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ClientError {
    /// HTTP status carried by a rejected publish.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Rejected { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// True for failures to reach or keep the relay connection.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Connection(_) | Self::WebSocket(_) | Self::Timeout(_) | Self::NotConnected
        )
    }
}

/// Client result type.
pub type Result<T> = std::result::Result<T, ClientError>;
