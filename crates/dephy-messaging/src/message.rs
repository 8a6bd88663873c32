//! DePHY message shape: event kind, routing tags, payload encoding.

use std::borrow::Cow;

use nostr::{Event, EventTemplate};
use nostr_client::Filter;
use serde::Serialize;
use serde_json::Value;

/// Event kind reserved for DePHY application messages.
pub const KIND_DEPHY_MESSAGE: u16 = 1573;
/// Tag carrying the message subject.
pub const SUBJECT_TAG: &str = "s";
/// Tag carrying the recipient public key.
pub const RECIPIENT_TAG: &str = "p";
pub const DEFAULT_SUBJECT: &str = "0";
/// Content length shown in log lines.
pub const LOG_PREVIEW_CHARS: usize = 100;

/// Message body prior to signing.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Sent verbatim.
    RawText(String),
    /// Sent as compact JSON.
    Structured(Value),
}

impl Payload {
    pub fn structured<T: Serialize>(value: &T) -> Result<Self, serde_json::Error> {
        Ok(Self::Structured(serde_json::to_value(value)?))
    }

    /// Treat `text` as structured when it is valid JSON, raw text otherwise.
    pub fn detect(text: &str) -> Self {
        match serde_json::from_str(text) {
            Ok(value) => Self::Structured(value),
            Err(_) => Self::RawText(text.to_string()),
        }
    }

    /// The event content string.
    pub fn to_content(&self) -> Result<String, serde_json::Error> {
        match self {
            Self::RawText(text) => Ok(text.clone()),
            Self::Structured(value) => serde_json::to_string(value),
        }
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Self::RawText(text.to_string())
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Self::RawText(text)
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        Self::Structured(value)
    }
}

/// Unsigned message addressed to `recipient` under `subject`.
pub fn build_message_template(
    content: String,
    subject: &str,
    recipient: &str,
    created_at: u64,
) -> EventTemplate {
    EventTemplate {
        created_at,
        kind: KIND_DEPHY_MESSAGE,
        tags: vec![
            nostr::tag(SUBJECT_TAG, subject),
            nostr::tag(RECIPIENT_TAG, recipient),
        ],
        content,
    }
}

/// Filter for messages to `recipient` created at or after `since`.
pub fn message_filter(recipient: &str, since: u64, subject: Option<&str>) -> Filter {
    let filter = Filter::new()
        .kind(KIND_DEPHY_MESSAGE)
        .since(since)
        .tag('p', [recipient]);
    match subject {
        Some(subject) => filter.tag('s', [subject]),
        None => filter,
    }
}

/// First `max_chars` characters of `content`, with `...` appended when cut.
pub fn truncate_for_log(content: &str, max_chars: usize) -> Cow<'_, str> {
    match content.char_indices().nth(max_chars) {
        Some((end, _)) => Cow::Owned(format!("{}...", &content[..end])),
        None => Cow::Borrowed(content),
    }
}

pub fn subject_of(event: &Event) -> Option<&str> {
    event.tag_value(SUBJECT_TAG)
}

pub fn recipient_of(event: &Event) -> Option<&str> {
    event.tag_value(RECIPIENT_TAG)
}

pub fn unix_now() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp()).unwrap_or_default()
}
