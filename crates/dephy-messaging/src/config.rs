use std::{env, fmt, time::Duration};

use nostr::{parse_public_key, parse_secret_key};
use nostr_client::publisher::DEFAULT_PUBLISH_TIMEOUT_MS;
use nostr_client::relay::websocket_url;
use nostr_client::{PublisherConfig, RelayConfig, SubscriptionConfig};
use thiserror::Error;

pub const ENV_SENDER_SECRET_KEY: &str = "SENDER_SECRET_KEY";
pub const ENV_RECIPIENT_PUBLIC_KEY: &str = "RECIPIENT_PUBLIC_KEY";
pub const ENV_RELAY_URL: &str = "RELAY_URL";
pub const ENV_CONNECT_TIMEOUT_MS: &str = "DEPHY_CONNECT_TIMEOUT_MS";
pub const ENV_PUBLISH_TIMEOUT_MS: &str = "DEPHY_PUBLISH_TIMEOUT_MS";

pub const DEFAULT_RELAY_URL: &str = "https://dev-relay.dephy.dev";
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;
const MAX_TIMEOUT_MS: u64 = 300_000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid SENDER_SECRET_KEY: {0}")]
    InvalidSenderSecretKey(String),
    #[error("invalid RECIPIENT_PUBLIC_KEY: {0}")]
    InvalidRecipientPublicKey(String),
    #[error("no recipient configured; set RECIPIENT_PUBLIC_KEY")]
    MissingRecipient,
    #[error("invalid RELAY_URL: {0}")]
    InvalidRelayUrl(String),
    #[error("invalid timeout setting: {0}")]
    InvalidTimeout(String),
}

/// Messaging client settings, normally read from the process environment.
#[derive(Clone)]
pub struct MessagingConfig {
    pub relay_url: String,
    pub sender_secret_key: Option<[u8; 32]>,
    /// Recipient public key, normalized to lowercase hex.
    pub recipient_public_key: Option<String>,
    pub connect_timeout: Duration,
    pub publish_timeout: Duration,
}

impl fmt::Debug for MessagingConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessagingConfig")
            .field("relay_url", &self.relay_url)
            .field(
                "sender_secret_key",
                &self.sender_secret_key.map(|_| "<redacted>"),
            )
            .field("recipient_public_key", &self.recipient_public_key)
            .field("connect_timeout", &self.connect_timeout)
            .field("publish_timeout", &self.publish_timeout)
            .finish()
    }
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self::new(DEFAULT_RELAY_URL)
    }
}

impl MessagingConfig {
    pub fn new(relay_url: impl Into<String>) -> Self {
        Self {
            relay_url: relay_url.into(),
            sender_secret_key: None,
            recipient_public_key: None,
            connect_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
            publish_timeout: Duration::from_millis(DEFAULT_PUBLISH_TIMEOUT_MS),
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the config from `lookup`. Unset and blank values fall back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let lookup = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let relay_url = parse_with_lookup(
            &lookup,
            ENV_RELAY_URL,
            DEFAULT_RELAY_URL.to_string(),
            parse_relay_url,
        )?;
        let sender_secret_key = lookup(ENV_SENDER_SECRET_KEY)
            .map(|raw| {
                parse_secret_key(&raw)
                    .map_err(|error| ConfigError::InvalidSenderSecretKey(error.to_string()))
            })
            .transpose()?;
        let recipient_public_key = lookup(ENV_RECIPIENT_PUBLIC_KEY)
            .map(|raw| parse_recipient(&raw))
            .transpose()?;
        let connect_timeout =
            parse_timeout_lookup(&lookup, ENV_CONNECT_TIMEOUT_MS, DEFAULT_CONNECT_TIMEOUT_MS)?;
        let publish_timeout =
            parse_timeout_lookup(&lookup, ENV_PUBLISH_TIMEOUT_MS, DEFAULT_PUBLISH_TIMEOUT_MS)?;

        Ok(Self {
            relay_url,
            sender_secret_key,
            recipient_public_key,
            connect_timeout,
            publish_timeout,
        })
    }

    pub fn with_recipient(mut self, recipient: &str) -> Result<Self, ConfigError> {
        self.recipient_public_key = Some(parse_recipient(recipient)?);
        Ok(self)
    }

    pub fn with_sender_secret_key(mut self, secret_key: [u8; 32]) -> Self {
        self.sender_secret_key = Some(secret_key);
        self
    }

    pub fn recipient(&self) -> Result<&str, ConfigError> {
        self.recipient_public_key
            .as_deref()
            .ok_or(ConfigError::MissingRecipient)
    }

    pub fn subscription_config(&self) -> SubscriptionConfig {
        SubscriptionConfig {
            relay: RelayConfig {
                connect_timeout: self.connect_timeout,
                ..RelayConfig::default()
            },
            ..SubscriptionConfig::default()
        }
    }

    pub fn publisher_config(&self) -> PublisherConfig {
        PublisherConfig {
            timeout: self.publish_timeout,
        }
    }
}

/// Parse a hex or `npub1` recipient into lowercase hex.
pub fn parse_recipient(value: &str) -> Result<String, ConfigError> {
    parse_public_key(value)
        .map_err(|error| ConfigError::InvalidRecipientPublicKey(error.to_string()))
}

fn parse_relay_url(raw: String) -> Result<String, ConfigError> {
    websocket_url(&raw).map_err(|error| ConfigError::InvalidRelayUrl(error.to_string()))?;
    Ok(raw)
}

fn parse_timeout_lookup(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default_ms: u64,
) -> Result<Duration, ConfigError> {
    parse_with_lookup(lookup, key, Duration::from_millis(default_ms), |raw| {
        let millis = raw
            .parse::<u64>()
            .map_err(|error| ConfigError::InvalidTimeout(format!("{key}: {error}")))?;
        if millis == 0 {
            return Err(ConfigError::InvalidTimeout(format!(
                "{key}: must be greater than zero"
            )));
        }
        Ok(Duration::from_millis(millis.min(MAX_TIMEOUT_MS)))
    })
}

fn parse_with_lookup<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
    parser: impl FnOnce(String) -> Result<T, ConfigError>,
) -> Result<T, ConfigError> {
    match lookup(key) {
        Some(raw) => parser(raw),
        None => Ok(default),
    }
}
