//! Reconnecting WebSocket client with topic-based fan-out
//!
//! Default endpoint: ws://localhost:8080/ws
//!
//! # Features
//! - One background worker owns the socket; `disconnect()` cancels it,
//!   including a reconnect that is waiting out its backoff
//! - Reconnect after `base * 2^(attempt-1)`, giving up after `max_attempts`
//! - Subscribe/unsubscribe frames sent only when a topic gains its first or
//!   loses its last listener
//! - Every registered topic is re-subscribed after a reconnect
//! - Local `connected` / `disconnected` / `error` pseudo-topics
//!
//! # Wire
//! - Outbound: `{"action": "subscribe" | "unsubscribe", "event": topic}`
//! - Inbound: `{"type": topic, "data": any}`

use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::registry::{dispatch, lock, ListenerId, ListenerRegistry, Removal};
use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::retry::ReconnectBackoff;
use crate::types::{
    is_local_topic, ControlFrame, InboundFrame, RealtimeEvent, StreamStats, Topic, CONNECTED_TOPIC,
    DISCONNECTED_TOPIC, ERROR_TOPIC,
};

/// Idle time before the client pings the server
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// State shared between the client handle, its subscriptions and the worker
struct Shared {
    ws_url: String,
    reconnect_base_delay: Duration,
    max_reconnect_attempts: u32,
    /// Lock order: `registry` before `outbound`
    registry: Mutex<ListenerRegistry>,
    /// Present only while the transport is open
    outbound: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    state: watch::Sender<ConnectionState>,
    reconnect_attempts: AtomicU32,
    stats: Mutex<StreamStats>,
}

impl Shared {
    fn set_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }

    /// Queue a control frame if the transport is open
    fn send_control(&self, frame: ControlFrame) -> bool {
        let outbound = lock(&self.outbound);
        let Some(tx) = outbound.as_ref() else {
            return false;
        };

        match serde_json::to_string(&frame) {
            Ok(json) => {
                debug!("Control frame: {}", json);
                tx.send(Message::Text(json.into())).is_ok()
            }
            Err(e) => {
                error!("Failed to encode control frame: {}", e);
                false
            }
        }
    }

    /// Install the outbound channel and replay every registered topic
    fn mark_connected(&self, tx: mpsc::UnboundedSender<Message>) {
        let registry = lock(&self.registry);
        *lock(&self.outbound) = Some(tx);

        let mut replayed = 0;
        for topic in registry.topics().into_iter().filter(|t| !is_local_topic(t)) {
            if self.send_control(ControlFrame::subscribe(topic)) {
                replayed += 1;
            }
        }
        self.set_state(ConnectionState::Connected);
        drop(registry);

        if replayed > 0 {
            info!("Resubscribed to {} topic(s)", replayed);
        }
    }

    fn mark_disconnected(&self) {
        *lock(&self.outbound) = None;
        self.set_state(ConnectionState::Disconnected);
    }

    fn emit_local(&self, topic: &str, data: Value) {
        dispatch(&self.registry, topic, &data);
    }

    fn handle_text(&self, text: &str) {
        let frame = match InboundFrame::parse(text) {
            Ok(frame) => frame,
            Err(e) => {
                error!("Failed to parse WebSocket message: {}", e);
                lock(&self.stats).record_parse_error();
                return;
            }
        };

        let delivered = match frame.topic.as_deref() {
            Some(topic) => dispatch(&self.registry, topic, &frame.data),
            None => 0,
        };
        if delivered == 0 {
            debug!("Dropping frame with no listener: {:?}", frame.topic);
        }

        lock(&self.stats).record(&frame, delivered > 0);
    }
}

struct Worker {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Realtime client for the Q-Verse push API
///
/// Construct one per application and pass it to whatever needs streaming
/// updates. Subscriptions may be registered before `connect()`; they are sent
/// once the transport opens.
pub struct RealtimeClient {
    shared: Arc<Shared>,
    worker: Mutex<Option<Worker>>,
}

impl RealtimeClient {
    /// Create a client for the default endpoint
    pub fn new() -> Self {
        Self::with_config(&ClientConfig::default())
    }

    /// Create with custom endpoint (for testing)
    pub fn with_endpoint(endpoint: &str) -> Self {
        Self::with_config(&ClientConfig::default().with_ws_url(endpoint))
    }

    pub fn with_config(config: &ClientConfig) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            shared: Arc::new(Shared {
                ws_url: config.ws_url.clone(),
                reconnect_base_delay: config.reconnect_base_delay,
                max_reconnect_attempts: config.max_reconnect_attempts,
                registry: Mutex::new(ListenerRegistry::new()),
                outbound: Mutex::new(None),
                state,
                reconnect_attempts: AtomicU32::new(0),
                stats: Mutex::new(StreamStats::new()),
            }),
            worker: Mutex::new(None),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.shared.ws_url
    }

    /// Start the connection worker
    ///
    /// No-op while a worker is running. After reconnection has given up, this
    /// starts over with a fresh attempt budget. Must be called within a tokio
    /// runtime.
    pub fn connect(&self) {
        let mut worker = lock(&self.worker);
        if worker.as_ref().is_some_and(|w| !w.handle.is_finished()) {
            debug!("Realtime worker already running");
            return;
        }

        // Fresh attempt budget, including after a worker that gave up
        self.shared.reconnect_attempts.store(0, Ordering::SeqCst);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_worker(Arc::clone(&self.shared), cancel.clone()));
        *worker = Some(Worker { cancel, handle });
    }

    /// Close the connection, cancel any pending reconnect and drop all listeners
    pub async fn disconnect(&self) {
        let worker = lock(&self.worker).take();
        if let Some(worker) = worker {
            worker.cancel.cancel();
            if let Err(e) = worker.handle.await {
                error!("Realtime worker ended abnormally: {}", e);
            }
        }

        self.shared.mark_disconnected();
        self.shared.reconnect_attempts.store(0, Ordering::SeqCst);
        lock(&self.shared.registry).clear();
        info!("Realtime client disconnected");
    }

    /// Register `callback` for `topic`
    ///
    /// Sends a subscribe frame when this is the topic's first listener and the
    /// transport is open.
    pub fn subscribe<F>(&self, topic: impl Into<String>, callback: F) -> Subscription
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let topic = topic.into();

        let mut registry = lock(&self.shared.registry);
        let (id, first) = registry.add(&topic, Arc::new(callback));
        if first && !is_local_topic(&topic) {
            self.shared.send_control(ControlFrame::subscribe(topic.as_str()));
        }
        drop(registry);

        debug!("Subscribed listener {:?} to {}", id, topic);
        Subscription { shared: Arc::downgrade(&self.shared), topic, id }
    }

    /// Like [`subscribe`](Self::subscribe), decoding payloads by topic
    pub fn subscribe_event<F>(&self, topic: Topic, callback: F) -> Subscription
    where
        F: Fn(RealtimeEvent) + Send + Sync + 'static,
    {
        let name = topic.to_string();
        self.subscribe(name, move |data| callback(RealtimeEvent::decode(&topic, data)))
    }

    /// Send a JSON message; dropped with a warning when not connected
    ///
    /// Returns whether the message was queued on an open transport.
    pub fn send<M: Serialize + ?Sized>(&self, message: &M) -> Result<bool> {
        let json = serde_json::to_string(message)
            .map_err(|e| ClientError::InvalidRequest(format!("message serialization failed: {}", e)))?;

        let outbound = lock(&self.shared.outbound);
        match outbound.as_ref() {
            Some(tx) if tx.send(Message::Text(json.into())).is_ok() => Ok(true),
            _ => {
                warn!("WebSocket is not connected, dropping message");
                Ok(false)
            }
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    /// Watch connection state transitions
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Reconnect attempts since the last successful open
    pub fn reconnect_attempts(&self) -> u32 {
        self.shared.reconnect_attempts.load(Ordering::SeqCst)
    }

    /// Worker alive but the transport is down after at least one failure
    pub fn is_reconnecting(&self) -> bool {
        let running = lock(&self.worker).as_ref().is_some_and(|w| !w.handle.is_finished());
        running && !self.is_connected() && self.reconnect_attempts() > 0
    }

    pub fn has_topic(&self, topic: &str) -> bool {
        lock(&self.shared.registry).contains(topic)
    }

    pub fn listener_count(&self, topic: &str) -> usize {
        lock(&self.shared.registry).listener_count(topic)
    }

    pub fn topics(&self) -> Vec<String> {
        lock(&self.shared.registry).topics()
    }

    pub fn stats(&self) -> StreamStats {
        lock(&self.shared.stats).clone()
    }
}

impl Default for RealtimeClient {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for RealtimeClient {
    fn drop(&mut self) {
        if let Some(worker) = lock(&self.worker).as_ref() {
            worker.cancel.cancel();
        }
    }
}

/// Handle to one registered listener
#[must_use = "keep the Subscription to unsubscribe later"]
pub struct Subscription {
    shared: Weak<Shared>,
    topic: String,
    id: ListenerId,
}

impl Subscription {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Remove this listener; safe to call more than once
    ///
    /// Sends an unsubscribe frame when it was the topic's last listener and
    /// the transport is open.
    pub fn unsubscribe(&self) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };

        let mut registry = lock(&shared.registry);
        match registry.remove(&self.topic, self.id) {
            Removal::TopicEmptied => {
                if !is_local_topic(&self.topic) {
                    shared.send_control(ControlFrame::unsubscribe(self.topic.as_str()));
                }
                debug!("Last listener removed from {}", self.topic);
            }
            Removal::Removed => debug!("Listener {:?} removed from {}", self.id, self.topic),
            Removal::NotFound => {}
        }
    }
}

/// Connect, pump frames, and reconnect with backoff until cancelled or out of attempts
async fn run_worker(shared: Arc<Shared>, cancel: CancellationToken) {
    let mut backoff = ReconnectBackoff::new(shared.reconnect_base_delay, shared.max_reconnect_attempts);

    loop {
        shared.set_state(ConnectionState::Connecting);
        info!("Connecting to {}", shared.ws_url);

        let connected = tokio::select! {
            _ = cancel.cancelled() => break,
            result = connect_async(shared.ws_url.as_str()) => result,
        };

        match connected {
            Ok((ws_stream, response)) => {
                debug!("WebSocket connected, status: {}", response.status());
                backoff.reset();
                shared.reconnect_attempts.store(0, Ordering::SeqCst);
                run_connection(&shared, ws_stream, &cancel).await;
            }
            Err(e) => {
                error!("Connection failed: {}", e);
                shared.emit_local(ERROR_TOPIC, json!({ "error": e.to_string() }));
            }
        }

        shared.mark_disconnected();
        if cancel.is_cancelled() {
            break;
        }
        shared.emit_local(DISCONNECTED_TOPIC, json!({}));

        let Some(delay) = backoff.next_delay() else {
            error!("Max reconnection attempts reached ({})", shared.max_reconnect_attempts);
            break;
        };
        shared.reconnect_attempts.store(backoff.attempts(), Ordering::SeqCst);

        warn!("Reconnecting in {}ms (attempt {})", delay.as_millis(), backoff.attempts());
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    shared.mark_disconnected();
    debug!("Realtime worker stopped");
}

/// Pump one open connection until it closes or the worker is cancelled
async fn run_connection(shared: &Shared, ws_stream: WsStream, cancel: &CancellationToken) {
    let (mut write, mut read) = ws_stream.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

    shared.mark_connected(tx);
    info!("Connected to {}", shared.ws_url);
    shared.emit_local(CONNECTED_TOPIC, json!({}));

    let mut keepalive = interval_at(Instant::now() + KEEPALIVE_INTERVAL, KEEPALIVE_INTERVAL);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                if let Err(e) = write.send(Message::Close(None)).await {
                    debug!("Failed to send close frame: {}", e);
                }
                break;
            }
            outbound = rx.recv() => {
                let Some(msg) = outbound else {
                    break;
                };
                if let Err(e) = write.send(msg).await {
                    warn!("Failed to send frame: {}", e);
                    shared.emit_local(ERROR_TOPIC, json!({ "error": e.to_string() }));
                    break;
                }
            }
            inbound = read.next() => match inbound {
                Some(Ok(Message::Text(text))) => shared.handle_text(&text),
                Some(Ok(Message::Ping(data))) => {
                    if let Err(e) = write.send(Message::Pong(data)).await {
                        warn!("Failed to send pong: {}", e);
                    }
                }
                Some(Ok(Message::Close(_))) => {
                    info!("Server closed connection");
                    break;
                }
                Some(Ok(_)) => {
                    // Binary and pong frames carry nothing for listeners
                }
                Some(Err(e)) => {
                    warn!("WebSocket error: {}", e);
                    shared.emit_local(ERROR_TOPIC, json!({ "error": e.to_string() }));
                    break;
                }
                None => {
                    info!("WebSocket stream ended");
                    break;
                }
            },
            _ = keepalive.tick() => {
                debug!("Sending keepalive ping");
                if let Err(e) = write.send(Message::Ping(Vec::new().into())).await {
                    warn!("Failed to send ping: {}", e);
                    break;
                }
            }
        }
    }
}
