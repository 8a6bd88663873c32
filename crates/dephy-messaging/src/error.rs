use nostr::Nip01Error;
use nostr_client::ClientError;
use thiserror::Error;

use crate::config::ConfigError;

#[derive(Debug, Error)]
pub enum MessagingError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Client(#[from] ClientError),

    #[error("event signing failed: {0}")]
    Signing(#[from] Nip01Error),

    #[error("identity error: {0}")]
    Identity(String),

    #[error("payload serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl MessagingError {
    /// HTTP status of a relay rejection, if that is what this is.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Client(error) => error.status(),
            _ => None,
        }
    }

    pub fn is_connection_error(&self) -> bool {
        matches!(self, Self::Client(error) if error.is_connection_error())
    }
}
