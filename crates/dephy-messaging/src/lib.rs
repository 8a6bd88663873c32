//! DePHY messaging client.
//!
//! Publishes signed kind-1573 messages to a relay's HTTP ingestion endpoint
//! and subscribes to messages addressed to a recipient over WebSocket.

pub mod cli;
pub mod config;
pub mod error;
pub mod identity;
pub mod message;
pub mod publish;
pub mod subscribe;

pub use config::{ConfigError, DEFAULT_RELAY_URL, MessagingConfig};
pub use error::MessagingError;
pub use identity::SenderIdentity;
pub use message::{
    DEFAULT_SUBJECT, KIND_DEPHY_MESSAGE, Payload, build_message_template, message_filter,
    truncate_for_log,
};
pub use nostr_client::{EventHandler, HandlerResult, MessageContent, SessionState, Subscription};
pub use publish::{MessagePublisher, PublishedMessage};
pub use subscribe::{SubscribeOptions, subscribe_messages};
