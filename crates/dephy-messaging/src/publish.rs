use std::sync::Arc;

use nostr::{Event, finalize_event};
use nostr_client::HttpPublisher;
use tracing::{error, info};

use crate::config::MessagingConfig;
use crate::error::MessagingError;
use crate::identity::SenderIdentity;
use crate::message::{
    LOG_PREVIEW_CHARS, Payload, build_message_template, truncate_for_log, unix_now,
};

/// A message the relay accepted.
#[derive(Debug, Clone)]
pub struct PublishedMessage {
    pub event: Event,
    /// Relay acknowledgement text.
    pub message: String,
}

/// Signs messages for one recipient and posts them to the relay.
#[derive(Debug, Clone)]
pub struct MessagePublisher {
    identity: Arc<SenderIdentity>,
    recipient: String,
    http: HttpPublisher,
}

impl MessagePublisher {
    pub fn new(
        config: &MessagingConfig,
        identity: Arc<SenderIdentity>,
    ) -> Result<Self, MessagingError> {
        let recipient = config.recipient()?.to_string();
        let http = HttpPublisher::with_config(&config.relay_url, config.publisher_config())?;
        Ok(Self {
            identity,
            recipient,
            http,
        })
    }

    pub fn recipient(&self) -> &str {
        &self.recipient
    }

    pub fn endpoint(&self) -> &str {
        self.http.endpoint()
    }

    /// Sign `payload` as a message under `subject` and submit it once.
    pub async fn publish(
        &self,
        payload: impl Into<Payload>,
        subject: &str,
    ) -> Result<PublishedMessage, MessagingError> {
        let content = payload.into().to_content()?;
        let template = build_message_template(content, subject, &self.recipient, unix_now());
        let event = finalize_event(&template, self.identity.secret_key())?;

        info!(
            id = %event.id,
            pubkey = %event.pubkey,
            recipient = %self.recipient,
            subject,
            content = %truncate_for_log(&event.content, LOG_PREVIEW_CHARS),
            "sending message to {}",
            self.http.endpoint()
        );

        match self.http.submit(&event).await {
            Ok(receipt) => {
                info!(id = %event.id, "message accepted: {}", receipt.message);
                Ok(PublishedMessage {
                    event,
                    message: receipt.message,
                })
            }
            Err(err) => {
                error!(id = %event.id, "message publish failed: {err}");
                Err(err.into())
            }
        }
    }
}
