//! Single relay connection management.

use crate::error::{ClientError, Result};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use nostr::Event;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, RwLock, mpsc};
use tokio::time::timeout;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use tracing::{debug, warn};
use url::Url;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWriter = SplitSink<WsStream, Message>;
type WsReader = SplitStream<WsStream>;
type Inbound = Result<RelayMessage>;

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Relay message received from a relay.
#[derive(Debug, Clone)]
pub enum RelayMessage {
    Event(String, Event),
    Ok(String, bool, String),
    Eose(String),
    /// Relay ended a subscription: subscription id and reason.
    Closed(String, String),
    Notice(String),
    Auth(String),
}

/// Relay connection configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub connect_timeout: Duration,
    /// Upper bound for each teardown send (`CLOSE` request, close frame).
    pub close_timeout: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            close_timeout: Duration::from_secs(2),
        }
    }
}

/// Relay connection.
///
/// A background reader task decodes frames into an inbound queue drained by
/// [`RelayConnection::recv`]. When the socket ends, the queue receives one
/// final [`ClientError::Connection`].
pub struct RelayConnection {
    url: Url,
    config: RelayConfig,
    state: Arc<RwLock<ConnectionState>>,
    writer: Arc<Mutex<Option<WsWriter>>>,
    incoming_tx: mpsc::UnboundedSender<Inbound>,
    incoming_rx: Mutex<mpsc::UnboundedReceiver<Inbound>>,
    recv_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl RelayConnection {
    /// Create a new relay connection with default config.
    pub fn new(url: &str) -> Result<Self> {
        Self::with_config(url, RelayConfig::default())
    }

    /// Create a new relay connection with custom config.
    ///
    /// `http(s)://` relay URLs are mapped to `ws(s)://`.
    pub fn with_config(url: &str, config: RelayConfig) -> Result<Self> {
        let parsed_url = websocket_url(url)?;
        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();

        Ok(Self {
            url: parsed_url,
            config,
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            writer: Arc::new(Mutex::new(None)),
            incoming_tx,
            incoming_rx: Mutex::new(incoming_rx),
            recv_task: Mutex::new(None),
        })
    }

    /// Relay URL as string.
    pub fn url(&self) -> &str {
        self.url.as_str()
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Current connection state.
    pub async fn state(&self) -> ConnectionState {
        *self.state.read().await
    }

    /// Open the socket and spawn the frame reader.
    pub async fn connect(&self) -> Result<()> {
        {
            let mut state = self.state.write().await;
            if *state == ConnectionState::Connected {
                return Err(ClientError::AlreadyConnected);
            }
            *state = ConnectionState::Connecting;
        }

        let handshake = timeout(self.config.connect_timeout, connect_async(self.url.as_str())).await;
        let stream = match handshake {
            Ok(Ok((stream, _response))) => stream,
            Ok(Err(error)) => {
                return Err(self
                    .fail_connect(format!("failed to connect to {}: {error}", self.url))
                    .await);
            }
            Err(_) => {
                return Err(self
                    .fail_connect(format!(
                        "connection to {} timed out after {:?}",
                        self.url, self.config.connect_timeout
                    ))
                    .await);
            }
        };

        let (writer, reader) = stream.split();
        *self.writer.lock().await = Some(writer);
        *self.state.write().await = ConnectionState::Connected;

        let task = tokio::spawn(read_frames(
            reader,
            self.incoming_tx.clone(),
            Arc::clone(&self.state),
            self.url.to_string(),
        ));
        *self.recv_task.lock().await = Some(task);
        Ok(())
    }

    async fn fail_connect(&self, reason: String) -> ClientError {
        *self.state.write().await = ConnectionState::Disconnected;
        ClientError::Connection(reason)
    }

    /// Disconnect from relay and stop background tasks.
    ///
    /// Calling this on a connection that is already down is a no-op.
    pub async fn disconnect(&self) -> Result<()> {
        if let Some(task) = self.recv_task.lock().await.take() {
            task.abort();
        }
        *self.state.write().await = ConnectionState::Disconnected;

        let Some(mut writer) = self.writer.lock().await.take() else {
            return Ok(());
        };
        match timeout(self.config.close_timeout, writer.send(Message::Close(None))).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(error)) => Err(ClientError::WebSocket(error.to_string())),
            Err(_) => Err(ClientError::Timeout(format!(
                "close frame not sent within {:?}",
                self.config.close_timeout
            ))),
        }
    }

    /// Send a `REQ` registering `filters` under `subscription_id`.
    pub async fn subscribe(&self, subscription_id: &str, filters: &[Value]) -> Result<()> {
        let mut request = vec![json!("REQ"), json!(subscription_id)];
        request.extend(filters.iter().cloned());
        self.send_json(&Value::Array(request)).await
    }

    /// Close subscription on relay.
    pub async fn unsubscribe(&self, subscription_id: &str) -> Result<()> {
        self.send_json(&json!(["CLOSE", subscription_id])).await
    }

    /// Receive next message from relay.
    ///
    /// Decode failures surface as `Err(ClientError::Protocol)` and the queue
    /// keeps going; `Err(ClientError::Connection)` means the socket is gone.
    pub async fn recv(&self) -> Result<Option<RelayMessage>> {
        match self.incoming_rx.lock().await.recv().await {
            Some(Ok(message)) => Ok(Some(message)),
            Some(Err(error)) => Err(error),
            None => Ok(None),
        }
    }

    async fn send_json(&self, value: &Value) -> Result<()> {
        if self.state().await != ConnectionState::Connected {
            return Err(ClientError::NotConnected);
        }
        let text = serde_json::to_string(value)?;
        self.send_text(text).await
    }

    async fn send_text(&self, text: String) -> Result<()> {
        let mut writer_guard = self.writer.lock().await;
        let writer = writer_guard.as_mut().ok_or(ClientError::NotConnected)?;
        writer
            .send(Message::Text(text.into()))
            .await
            .map_err(|error| ClientError::WebSocket(error.to_string()))
    }
}

/// Decode frames until the socket ends, then queue one final connection error.
async fn read_frames(
    mut reader: WsReader,
    inbound: mpsc::UnboundedSender<Inbound>,
    state: Arc<RwLock<ConnectionState>>,
    relay_url: String,
) {
    let reason = loop {
        let frame = match reader.next().await {
            Some(Ok(frame)) => frame,
            Some(Err(error)) => {
                warn!("read from {} failed: {}", relay_url, error);
                break format!("websocket read error: {error}");
            }
            None => break "relay stream ended".to_string(),
        };

        let decoded = match frame {
            Message::Text(text) => parse_relay_message(text.as_str()).transpose(),
            Message::Close(Some(close)) => {
                break format!("relay closed the connection: {}", close.reason);
            }
            Message::Close(None) => break "relay closed the connection".to_string(),
            Message::Binary(bytes) => {
                debug!("{} sent a {} byte binary frame; skipped", relay_url, bytes.len());
                None
            }
            Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => None,
        };
        let Some(decoded) = decoded else {
            continue;
        };
        if let Err(error) = &decoded {
            warn!("undecodable frame from {}: {}", relay_url, error);
        }
        if inbound.send(decoded).is_err() {
            break "inbound queue closed".to_string();
        }
    };

    *state.write().await = ConnectionState::Disconnected;
    let _ = inbound.send(Err(ClientError::Connection(reason)));
}

/// Normalize a relay URL to its WebSocket form.
pub fn websocket_url(url: &str) -> Result<Url> {
    let mut parsed_url = Url::parse(url.trim())?;
    let scheme = match parsed_url.scheme() {
        "ws" | "http" => "ws",
        "wss" | "https" => "wss",
        other => {
            return Err(ClientError::InvalidUrl(format!(
                "URL must use ws://, wss://, http:// or https:// scheme, got: {other}"
            )));
        }
    };
    parsed_url
        .set_scheme(scheme)
        .map_err(|()| ClientError::InvalidUrl(format!("cannot use {scheme} for {url}")))?;
    Ok(parsed_url)
}

/// Decode one relay frame. Empty arrays and unknown message kinds yield `None`.
pub fn parse_relay_message(text: &str) -> Result<Option<RelayMessage>> {
    let value: Value = serde_json::from_str(text)
        .map_err(|error| protocol_error(format!("invalid JSON frame: {error}")))?;
    let Some(frame) = value.as_array() else {
        return Err(protocol_error("expected JSON array relay message"));
    };
    let Some(head) = frame.first() else {
        return Ok(None);
    };
    let kind = head
        .as_str()
        .ok_or_else(|| protocol_error("missing relay message kind"))?;

    let min_len = match kind {
        "EVENT" => 3,
        "OK" => 4,
        "EOSE" | "CLOSED" | "NOTICE" | "AUTH" => 2,
        _ => return Ok(None),
    };
    if frame.len() < min_len {
        return Err(protocol_error(format!("invalid {kind} message")));
    }
    let text_at = |index: usize, field: &str| {
        frame[index]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| protocol_error(format!("invalid {kind} {field}")))
    };

    let message = match kind {
        "EVENT" => {
            let subscription_id = text_at(1, "subscription id")?;
            let event = serde_json::from_value(frame[2].clone())
                .map_err(|error| protocol_error(format!("invalid EVENT payload: {error}")))?;
            RelayMessage::Event(subscription_id, event)
        }
        "OK" => {
            let event_id = text_at(1, "event id")?;
            let accepted = frame[2]
                .as_bool()
                .ok_or_else(|| protocol_error("invalid OK accepted flag"))?;
            RelayMessage::Ok(event_id, accepted, text_at(3, "message text")?)
        }
        "EOSE" => RelayMessage::Eose(text_at(1, "subscription id")?),
        "CLOSED" => {
            let subscription_id = text_at(1, "subscription id")?;
            let reason = if frame.len() > 2 {
                text_at(2, "reason")?
            } else {
                String::new()
            };
            RelayMessage::Closed(subscription_id, reason)
        }
        "NOTICE" => RelayMessage::Notice(text_at(1, "message text")?),
        _ => RelayMessage::Auth(text_at(1, "challenge")?),
    };
    Ok(Some(message))
}

fn protocol_error(message: impl Into<String>) -> ClientError {
    ClientError::Protocol(message.into())
}
