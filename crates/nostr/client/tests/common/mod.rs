#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, anyhow};
use futures_util::{SinkExt, StreamExt};
use nostr::{Event, EventTemplate, finalize_event};
use nostr_client::{ClientError, EventHandler, HandlerResult, MessageContent};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

pub const KIND: u16 = 1573;
pub const RECIPIENT: &str = "17162c921dc4d2518f9a101db33695df1afb56ab82f5ff3e5da6eec3ca5cd917";
pub const WAIT: Duration = Duration::from_secs(5);

/// One scripted relay action, replayed after every `REQ`.
#[derive(Debug, Clone)]
pub enum Step {
    Event(Event),
    Eose,
    Raw(String),
    ClosedSubscription(String),
    Disconnect,
}

/// Loopback relay that records client frames and replays a script.
pub struct FakeRelay {
    pub url: String,
    pub received: mpsc::UnboundedReceiver<Value>,
}

impl FakeRelay {
    pub async fn start(script: Vec<Step>) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let script = Arc::new(script);
        let (received_tx, received) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let script = Arc::clone(&script);
                let received_tx = received_tx.clone();
                tokio::spawn(async move {
                    if let Err(error) = serve(stream, script, received_tx).await {
                        tracing::debug!("fake relay connection ended: {error}");
                    }
                });
            }
        });

        Ok(Self {
            url: format!("ws://{addr}"),
            received,
        })
    }

    /// Next frame the client sent, or an error after `WAIT`.
    pub async fn next_frame(&mut self) -> Result<Value> {
        tokio::time::timeout(WAIT, self.received.recv())
            .await
            .map_err(|_| anyhow!("timed out waiting for a client frame"))?
            .ok_or_else(|| anyhow!("fake relay stopped"))
    }

    /// Frames received until the client has been quiet for `quiet`.
    pub async fn drain_frames(&mut self, quiet: Duration) -> Vec<Value> {
        let mut frames = Vec::new();
        while let Ok(Some(frame)) = tokio::time::timeout(quiet, self.received.recv()).await {
            frames.push(frame);
        }
        frames
    }
}

async fn serve(
    stream: TcpStream,
    script: Arc<Vec<Step>>,
    received: mpsc::UnboundedSender<Value>,
) -> Result<()> {
    let mut ws = accept_async(stream).await?;
    while let Some(frame) = ws.next().await {
        let text = match frame? {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };
        let value: Value = serde_json::from_str(text.as_str())?;
        let _ = received.send(value.clone());
        if value[0] != "REQ" {
            continue;
        }

        let subscription_id = value[1].as_str().unwrap_or_default().to_string();
        for step in script.iter() {
            let outbound = match step {
                Step::Event(event) => json!(["EVENT", subscription_id, event]).to_string(),
                Step::Eose => json!(["EOSE", subscription_id]).to_string(),
                Step::Raw(text) => text.clone(),
                Step::ClosedSubscription(reason) => {
                    json!(["CLOSED", subscription_id, reason]).to_string()
                }
                Step::Disconnect => {
                    ws.close(None).await?;
                    return Ok(());
                }
            };
            ws.send(Message::Text(outbound.into())).await?;
        }
    }
    Ok(())
}

pub fn secret_key() -> [u8; 32] {
    [7_u8; 32]
}

pub fn now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default()
}

/// A signed application message addressed to `RECIPIENT`.
pub fn message(subject: &str, content: &str) -> Result<Event> {
    message_at(subject, content, now())
}

pub fn message_at(subject: &str, content: &str, created_at: u64) -> Result<Event> {
    let template = EventTemplate {
        created_at,
        kind: KIND,
        tags: vec![nostr::tag("s", subject), nostr::tag("p", RECIPIENT)],
        content: content.to_string(),
    };
    Ok(finalize_event(&template, &secret_key())?)
}

/// What a [`Recorder`] observed, in dispatch order.
#[derive(Debug, Clone, PartialEq)]
pub enum Observed {
    Event { id: String, content: MessageContent },
    Eose,
    Error(String),
}

/// Handler that forwards every callback to a channel. Events whose content is
/// `"panic"` make it panic and `"fail"` make it return an error, after recording.
pub struct Recorder {
    tx: mpsc::UnboundedSender<Observed>,
}

impl Recorder {
    pub fn new() -> (Arc<Self>, Observations) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), Observations { rx })
    }
}

impl EventHandler for Recorder {
    fn on_event(&self, event: &Event, content: &MessageContent) -> HandlerResult {
        let _ = self.tx.send(Observed::Event {
            id: event.id.clone(),
            content: content.clone(),
        });
        match event.content.as_str() {
            "panic" => panic!("handler exploded"),
            "fail" => Err("handler refused event".into()),
            _ => Ok(()),
        }
    }

    fn on_eose(&self) {
        let _ = self.tx.send(Observed::Eose);
    }

    fn on_error(&self, error: &ClientError) {
        let _ = self.tx.send(Observed::Error(error.to_string()));
    }
}

pub struct Observations {
    rx: mpsc::UnboundedReceiver<Observed>,
}

impl Observations {
    pub async fn next(&mut self) -> Result<Observed> {
        tokio::time::timeout(WAIT, self.rx.recv())
            .await
            .map_err(|_| anyhow!("timed out waiting for dispatch"))?
            .ok_or_else(|| anyhow!("handler dropped"))
    }

    pub async fn take(&mut self, count: usize) -> Result<Vec<Observed>> {
        let mut observed = Vec::with_capacity(count);
        for _ in 0..count {
            observed.push(self.next().await?);
        }
        Ok(observed)
    }

    /// Assert nothing else arrives within `quiet`.
    pub async fn assert_quiet(&mut self, quiet: Duration) -> Result<()> {
        match tokio::time::timeout(quiet, self.rx.recv()).await {
            Ok(Some(observed)) => Err(anyhow!("unexpected dispatch: {observed:?}")),
            _ => Ok(()),
        }
    }
}

pub fn event_observed(event: &Event) -> Observed {
    Observed::Event {
        id: event.id.clone(),
        content: MessageContent::parse(&event.content),
    }
}
