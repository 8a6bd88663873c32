//! HTTP event submission.

use crate::error::{ClientError, Result};
use nostr::Event;
use reqwest::StatusCode;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

pub const DEFAULT_PUBLISH_TIMEOUT_MS: u64 = 10_000;
pub const EVENTS_PATH: &str = "events";

/// HTTP publisher configuration.
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    pub timeout: Duration,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(DEFAULT_PUBLISH_TIMEOUT_MS),
        }
    }
}

/// Relay acknowledgement of an accepted event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishReceipt {
    pub event_id: String,
    /// Raw response body returned by the relay.
    pub message: String,
}

/// Submits signed events to a relay's HTTP ingestion endpoint.
///
/// One request per call, no retries.
#[derive(Debug, Clone)]
pub struct HttpPublisher {
    endpoint: Url,
    timeout: Duration,
    http: reqwest::Client,
}

impl HttpPublisher {
    pub fn new(relay_url: &str) -> Result<Self> {
        Self::with_config(relay_url, PublisherConfig::default())
    }

    pub fn with_config(relay_url: &str, config: PublisherConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|error| ClientError::Internal(format!("http client: {error}")))?;
        Ok(Self {
            endpoint: events_endpoint(relay_url)?,
            timeout: config.timeout,
            http,
        })
    }

    /// The `/events` URL events are posted to.
    pub fn endpoint(&self) -> &str {
        self.endpoint.as_str()
    }

    /// POST the event as JSON. Only HTTP 200 counts as accepted.
    pub async fn submit(&self, event: &Event) -> Result<PublishReceipt> {
        debug!("posting event {} to {}", event.id, self.endpoint);
        let response = self
            .http
            .post(self.endpoint.clone())
            .timeout(self.timeout)
            .json(event)
            .send()
            .await
            .map_err(|error| {
                ClientError::Connection(format!("failed to reach {}: {}", self.endpoint, error))
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|error| {
            ClientError::Connection(format!("failed to read relay response: {error}"))
        })?;

        if status != StatusCode::OK {
            warn!("relay rejected event {}: {} {}", event.id, status.as_u16(), body);
            return Err(ClientError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        Ok(PublishReceipt {
            event_id: event.id.clone(),
            message: body,
        })
    }
}

/// Map a relay URL to its HTTP ingestion endpoint: `wss://host` → `https://host/events`.
pub fn events_endpoint(relay_url: &str) -> Result<Url> {
    let mut url = Url::parse(relay_url.trim())?;
    let scheme = match url.scheme() {
        "wss" | "https" => "https",
        "ws" | "http" => "http",
        other => {
            return Err(ClientError::InvalidUrl(format!(
                "relay URL must use ws://, wss://, http:// or https:// scheme, got: {other}"
            )));
        }
    };
    url.set_scheme(scheme)
        .map_err(|()| ClientError::InvalidUrl(format!("cannot use {scheme} for {relay_url}")))?;

    let base_path = url.path().trim_end_matches('/').to_string();
    url.set_path(&format!("{base_path}/{EVENTS_PATH}"));
    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}
