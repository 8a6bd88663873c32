//! Minimal Nostr relay client transport.
//!
//! This crate intentionally exposes a small surface:
//! - a single-relay WebSocket connection and relay message codec
//! - filtered subscription sessions with EOSE signaling and idempotent teardown
//! - HTTP event submission

pub mod error;
pub mod filter;
pub mod publisher;
pub mod relay;
pub mod subscription;

pub use error::{ClientError, Result};
pub use filter::Filter;
pub use publisher::{HttpPublisher, PublishReceipt, PublisherConfig};
pub use relay::{ConnectionState, RelayConfig, RelayConnection, RelayMessage};
pub use subscription::{
    EventHandler, HandlerResult, MessageContent, SessionState, Subscription, SubscriptionConfig,
};
