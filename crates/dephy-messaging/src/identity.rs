//! Sender signing identity.

use std::fmt;

use nostr::Keypair;
use tracing::warn;

use crate::config::MessagingConfig;
use crate::error::MessagingError;

/// Keypair used to sign outgoing messages.
pub struct SenderIdentity {
    keypair: Keypair,
    ephemeral: bool,
}

impl SenderIdentity {
    /// Use the configured secret key, or generate a throwaway one.
    pub fn from_config(config: &MessagingConfig) -> Result<Self, MessagingError> {
        match config.sender_secret_key {
            Some(secret_key) => Self::from_secret_key(secret_key),
            None => {
                let identity = Self::generate()?;
                warn!(
                    pubkey = %identity.public_key_hex(),
                    "no SENDER_SECRET_KEY configured; using a generated key that is not persisted"
                );
                Ok(identity)
            }
        }
    }

    pub fn from_secret_key(secret_key: [u8; 32]) -> Result<Self, MessagingError> {
        let keypair = Keypair::from_secret_key(secret_key)
            .map_err(|error| MessagingError::Identity(error.to_string()))?;
        Ok(Self {
            keypair,
            ephemeral: false,
        })
    }

    pub fn generate() -> Result<Self, MessagingError> {
        let keypair =
            Keypair::generate().map_err(|error| MessagingError::Identity(error.to_string()))?;
        Ok(Self {
            keypair,
            ephemeral: true,
        })
    }

    /// True when the key was generated for this process only.
    pub fn is_ephemeral(&self) -> bool {
        self.ephemeral
    }

    pub fn secret_key(&self) -> &[u8; 32] {
        &self.keypair.private_key
    }

    pub fn public_key_hex(&self) -> String {
        self.keypair.public_key_hex()
    }

    pub fn npub(&self) -> Result<String, MessagingError> {
        self.keypair
            .npub()
            .map_err(|error| MessagingError::Identity(error.to_string()))
    }
}

impl fmt::Debug for SenderIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SenderIdentity")
            .field("public_key", &self.public_key_hex())
            .field("ephemeral", &self.ephemeral)
            .finish_non_exhaustive()
    }
}
