//! Subscription sessions: one relay connection, one filter, one dispatch loop.

use crate::error::{ClientError, Result};
use crate::filter::Filter;
use crate::relay::{ConnectionState, RelayConfig, RelayConnection, RelayMessage};
use nostr::Event;
use serde_json::Value;
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, Notify, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Result returned by event handlers.
pub type HandlerResult = std::result::Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Event content as seen by handlers.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageContent {
    /// Content that parsed as JSON.
    Structured(Value),
    /// Content delivered verbatim because it is not JSON.
    Text(String),
}

impl MessageContent {
    /// Parse event content, falling back to the raw string.
    pub fn parse(content: &str) -> Self {
        match serde_json::from_str(content) {
            Ok(value) => Self::Structured(value),
            Err(_) => Self::Text(content.to_string()),
        }
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Self::Structured(value) => Some(value),
            Self::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Structured(_) => None,
            Self::Text(text) => Some(text),
        }
    }
}

impl fmt::Display for MessageContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Structured(value) => match serde_json::to_string_pretty(value) {
                Ok(pretty) => f.write_str(&pretty),
                Err(_) => write!(f, "{value}"),
            },
            Self::Text(text) => f.write_str(text),
        }
    }
}

/// Consumer of a subscription's events.
///
/// Handlers run on the session's dispatch task, one event at a time. An error
/// or panic from `on_event` is reported through `on_error` and the stream
/// keeps going.
pub trait EventHandler: Send + Sync {
    fn on_event(&self, event: &Event, content: &MessageContent) -> HandlerResult;

    /// Called once, when the relay has delivered its stored backlog.
    fn on_eose(&self) {}

    /// Called for errors that do not end `open`: handler failures, malformed
    /// frames, relay-side subscription closure and connection loss.
    fn on_error(&self, error: &ClientError) {
        let _ = error;
    }
}

impl<F> EventHandler for F
where
    F: Fn(&Event, &MessageContent) -> HandlerResult + Send + Sync,
{
    fn on_event(&self, event: &Event, content: &MessageContent) -> HandlerResult {
        self(event, content)
    }
}

/// Session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    /// Filter registered; backlog may still be arriving.
    Active,
    /// Backlog delivered; events are live.
    Live,
    Closed,
}

/// Subscription session configuration.
#[derive(Debug, Clone)]
pub struct SubscriptionConfig {
    pub relay: RelayConfig,
    /// Drop events whose id or signature does not check out.
    pub verify_events: bool,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            relay: RelayConfig::default(),
            verify_events: true,
        }
    }
}

/// Handle to a running subscription session.
///
/// Cloning shares the session. The session runs until [`Subscription::close`]
/// is called or the relay ends it; dropping handles does not stop it.
#[derive(Clone)]
pub struct Subscription {
    inner: Arc<Inner>,
}

struct Inner {
    id: String,
    filter: Filter,
    relay: Arc<RelayConnection>,
    state: Arc<watch::Sender<SessionState>>,
    closed: AtomicBool,
    shutdown: Arc<Notify>,
    dispatch_task: Mutex<Option<JoinHandle<()>>>,
}

impl Subscription {
    /// Connect to `relay_url`, register `filter` and start dispatching to `handler`.
    ///
    /// Fails without leaving anything running when the relay cannot be reached
    /// or the subscription request cannot be sent.
    pub async fn open(
        relay_url: &str,
        filter: Filter,
        handler: Arc<dyn EventHandler>,
        config: SubscriptionConfig,
    ) -> Result<Self> {
        let relay = Arc::new(RelayConnection::with_config(relay_url, config.relay)?);
        let state = Arc::new(watch::Sender::new(SessionState::Connecting));

        relay.connect().await?;
        info!("connected to {}", relay.url());

        let id = format!("sub-{}", Uuid::new_v4().simple());
        state.send_replace(SessionState::Active);
        if let Err(error) = relay.subscribe(&id, &[filter.to_value()]).await {
            if let Err(disconnect_error) = relay.disconnect().await {
                debug!("disconnect after failed subscribe: {}", disconnect_error);
            }
            state.send_replace(SessionState::Closed);
            return Err(error);
        }
        debug!("registered subscription {} on {}", id, relay.url());

        let shutdown = Arc::new(Notify::new());
        let dispatcher = Dispatcher {
            subscription_id: id.clone(),
            filter: filter.clone(),
            handler,
            verify_events: config.verify_events,
            relay: Arc::clone(&relay),
            state: Arc::clone(&state),
        };
        let task = tokio::spawn(dispatcher.run(Arc::clone(&shutdown)));

        Ok(Self {
            inner: Arc::new(Inner {
                id,
                filter,
                relay,
                state,
                closed: AtomicBool::new(false),
                shutdown,
                dispatch_task: Mutex::new(Some(task)),
            }),
        })
    }

    /// Subscription id sent to the relay.
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn filter(&self) -> &Filter {
        &self.inner.filter
    }

    pub fn relay_url(&self) -> &str {
        self.inner.relay.url()
    }

    pub fn state(&self) -> SessionState {
        *self.inner.state.borrow()
    }

    /// Wait until the session reaches [`SessionState::Closed`], by `close` or by the relay.
    pub async fn closed(&self) {
        let mut receiver = self.inner.state.subscribe();
        let _ = receiver
            .wait_for(|state| *state == SessionState::Closed)
            .await;
    }

    /// Unregister the filter, close the connection and stop dispatching.
    ///
    /// Safe to call from any task and any number of times; only the first
    /// call releases anything.
    pub async fn close(&self) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        self.inner.shutdown.notify_one();
        self.inner.state.send_replace(SessionState::Closed);

        let relay = &self.inner.relay;
        let close_timeout = relay.config().close_timeout;
        if relay.state().await == ConnectionState::Connected {
            match timeout(close_timeout, relay.unsubscribe(&self.inner.id)).await {
                Ok(Ok(())) => {}
                Ok(Err(error)) => debug!("CLOSE for {} not sent: {}", self.inner.id, error),
                Err(_) => debug!("CLOSE for {} timed out", self.inner.id),
            }
        }
        if let Err(error) = relay.disconnect().await {
            debug!("disconnect from {}: {}", relay.url(), error);
        }

        if let Some(mut task) = self.inner.dispatch_task.lock().await.take()
            && timeout(close_timeout, &mut task).await.is_err()
        {
            warn!("dispatch for {} did not stop in time; aborting", self.inner.id);
            task.abort();
        }

        info!("subscription {} closed", self.inner.id);
        Ok(())
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.inner.id)
            .field("relay_url", &self.relay_url())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

struct Dispatcher {
    subscription_id: String,
    filter: Filter,
    handler: Arc<dyn EventHandler>,
    verify_events: bool,
    relay: Arc<RelayConnection>,
    state: Arc<watch::Sender<SessionState>>,
}

enum Flow {
    Continue,
    Stop,
}

impl Dispatcher {
    async fn run(self, shutdown: Arc<Notify>) {
        loop {
            let next = tokio::select! {
                biased;
                () = shutdown.notified() => break,
                next = self.relay.recv() => next,
            };

            let flow = match next {
                Ok(Some(message)) => self.handle_message(message).await,
                Ok(None) => Flow::Stop,
                Err(error @ ClientError::Connection(_)) => {
                    warn!("relay connection lost for {}: {}", self.subscription_id, error);
                    self.state.send_replace(SessionState::Closed);
                    self.report(&error);
                    Flow::Stop
                }
                Err(error) => {
                    self.report(&error);
                    Flow::Continue
                }
            };

            if matches!(flow, Flow::Stop) {
                break;
            }
        }
        debug!("dispatch loop for {} finished", self.subscription_id);
    }

    async fn handle_message(&self, message: RelayMessage) -> Flow {
        match message {
            RelayMessage::Event(subscription_id, event) => {
                if subscription_id == self.subscription_id {
                    self.dispatch(&event);
                } else {
                    debug!("ignoring event for unknown subscription {}", subscription_id);
                }
            }
            RelayMessage::Eose(subscription_id) if subscription_id == self.subscription_id => {
                let became_live = self.state.send_if_modified(|state| {
                    if *state == SessionState::Active {
                        *state = SessionState::Live;
                        true
                    } else {
                        false
                    }
                });
                if became_live {
                    info!("EOSE: stored events delivered, streaming live events");
                    let handler = Arc::clone(&self.handler);
                    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| handler.on_eose()))
                    {
                        warn!("EOSE handler panicked: {}", panic_message(payload.as_ref()));
                    }
                }
            }
            RelayMessage::Closed(subscription_id, reason)
                if subscription_id == self.subscription_id =>
            {
                warn!("relay closed subscription {}: {}", subscription_id, reason);
                self.state.send_replace(SessionState::Closed);
                if let Err(error) = self.relay.disconnect().await {
                    debug!("disconnect after CLOSED: {}", error);
                }
                self.report(&ClientError::Subscription(format!(
                    "relay closed subscription: {reason}"
                )));
                return Flow::Stop;
            }
            RelayMessage::Notice(message) => info!("relay notice: {}", message),
            RelayMessage::Auth(_) => debug!("ignoring AUTH challenge from {}", self.relay.url()),
            other => debug!("ignoring relay message {:?}", other),
        }
        Flow::Continue
    }

    fn dispatch(&self, event: &Event) {
        if self.verify_events
            && let Err(error) = nostr::verify_event(event)
        {
            warn!("dropping event {} that failed verification: {}", event.id, error);
            return;
        }
        if !self.filter.matches(event) {
            debug!("dropping event {} outside the subscription filter", event.id);
            return;
        }

        info!(
            event_id = %event.id,
            pubkey = %event.pubkey,
            created_at = event.created_at,
            tags = ?event.tags,
            "received event"
        );

        let content = MessageContent::parse(&event.content);
        let handler = Arc::clone(&self.handler);
        let error = match panic::catch_unwind(AssertUnwindSafe(|| handler.on_event(event, &content)))
        {
            Ok(Ok(())) => return,
            Ok(Err(error)) => ClientError::Callback(error.to_string()),
            Err(payload) => ClientError::Callback(format!(
                "handler panicked: {}",
                panic_message(payload.as_ref())
            )),
        };
        warn!("handler failed on event {}: {}", event.id, error);
        self.report(&error);
    }

    fn report(&self, error: &ClientError) {
        let handler = Arc::clone(&self.handler);
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| handler.on_error(error))) {
            warn!("error handler panicked: {}", panic_message(payload.as_ref()));
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
