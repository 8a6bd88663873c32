use std::sync::Arc;

use nostr_client::{EventHandler, Subscription};
use tracing::info;

use crate::config::{MessagingConfig, parse_recipient};
use crate::error::MessagingError;
use crate::message::{message_filter, unix_now};

/// Which messages to receive. Unset fields fall back to the configured
/// recipient, the current time and every subject.
#[derive(Debug, Clone, Default)]
pub struct SubscribeOptions {
    /// Hex or `npub1` public key.
    pub recipient: Option<String>,
    pub since: Option<u64>,
    pub subject: Option<String>,
}

/// Open a session receiving messages addressed to the selected recipient.
pub async fn subscribe_messages(
    config: &MessagingConfig,
    handler: Arc<dyn EventHandler>,
    options: SubscribeOptions,
) -> Result<Subscription, MessagingError> {
    let recipient = match options.recipient.as_deref() {
        Some(recipient) => parse_recipient(recipient)?,
        None => config.recipient()?.to_string(),
    };
    let since = options.since.unwrap_or_else(unix_now);
    let filter = message_filter(&recipient, since, options.subject.as_deref());

    info!(
        relay = %config.relay_url,
        recipient = %recipient,
        since,
        subject = options.subject.as_deref().unwrap_or("*"),
        "subscribing to messages"
    );

    let subscription = Subscription::open(
        &config.relay_url,
        filter,
        handler,
        config.subscription_config(),
    )
    .await?;
    info!(subscription = subscription.id(), "subscription active");
    Ok(subscription)
}
