use super::backoff::ReconnectScheduler;
use super::heartbeat::{Heartbeat, HeartbeatEvent, Liveness};
use super::queue::OutboundQueue;
use super::router::{HandlerId, MessageRouter, Route};
use super::subscriptions::SubscriptionRegistry;
use super::transport::{
    LinkHandle, Transport, TransportEvent, TransportLink, CLOSE_HEARTBEAT_TIMEOUT,
    CLOSE_HEARTBEAT_TIMEOUT_REASON, CLOSE_NORMAL, CLOSE_NORMAL_REASON,
};
use super::tungstenite::TungsteniteTransport;
use crate::config::{redact_token, ClientConfig};
use crate::error::{RealtimeError, Result};
use crate::types::{ConnectionState, ControlFrame, DisconnectReason, Envelope};
use log::*;
use serde::Serialize;
use serde_json::Value;
use std::collections::VecDeque;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use url::Url;

type StateListener = Arc<dyn Fn(ConnectionState) + Send + Sync + 'static>;
type OpenSignal = oneshot::Sender<Result<()>>;

/// Handle returned by every registration method.
///
/// Calling [`Unregister::unregister`] removes the registration; further calls
/// do nothing. Dropping the handle keeps the registration in place.
#[derive(Clone)]
pub struct Unregister {
    action: Arc<dyn Fn() + Send + Sync + 'static>,
}

impl Unregister {
    fn new(action: impl Fn() + Send + Sync + 'static) -> Self {
        Self {
            action: Arc::new(action),
        }
    }

    pub fn unregister(&self) {
        (self.action)()
    }
}

impl fmt::Debug for Unregister {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Unregister").finish_non_exhaustive()
    }
}

struct Inner {
    state: ConnectionState,
    reason: DisconnectReason,
    /// Bumped by `connect()` and `disconnect()`; a session task whose
    /// generation no longer matches must not touch anything.
    generation: u64,
    session: Option<JoinHandle<()>>,
    link: Option<LinkHandle>,
    scheduler: ReconnectScheduler,
    subscriptions: SubscriptionRegistry,
    queue: OutboundQueue,
    router: MessageRouter,
    next_listener_id: u64,
    state_listeners: Vec<(u64, StateListener)>,
    /// State notifications not delivered yet, each with the listeners that
    /// were registered when it was raised.
    pending_notifications: VecDeque<(ConnectionState, Vec<StateListener>)>,
    notifying: bool,
}

impl Inner {
    fn set_state(&mut self, state: ConnectionState) {
        if self.state == state {
            return;
        }
        debug!("Connection state: {} -> {}", self.state, state);
        self.state = state;
        let listeners = self.state_listeners.iter().map(|(_, l)| Arc::clone(l)).collect();
        self.pending_notifications.push_back((state, listeners));
    }

    fn connected_link(&self) -> Option<&LinkHandle> {
        match (&self.state, &self.link) {
            (ConnectionState::Connected, Some(link)) => Some(link),
            _ => None,
        }
    }
}

struct Shared {
    config: ClientConfig,
    transport: Arc<dyn Transport>,
    inner: Mutex<Inner>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn log_frame(&self, direction: &str, text: &str) {
        if self.config.debug {
            debug!("WS {} {}", direction, text);
        } else {
            trace!("WS {} {}", direction, text);
        }
    }

    fn send_on(&self, link: &LinkHandle, text: String) -> Result<()> {
        self.log_frame("->", &text);
        link.send_text(text)
    }

    /// Delivers queued state notifications in the order they were raised.
    ///
    /// Must be called without holding the lock. Only one caller drains at a
    /// time; a listener that triggers another transition gets that
    /// notification delivered by the outer drain once it returns.
    fn flush_notifications(&self) {
        {
            let mut inner = self.lock();
            if inner.notifying {
                return;
            }
            inner.notifying = true;
        }
        loop {
            let next = {
                let mut inner = self.lock();
                match inner.pending_notifications.pop_front() {
                    Some(next) => next,
                    None => {
                        inner.notifying = false;
                        return;
                    }
                }
            };
            let (state, listeners) = next;
            for listener in listeners {
                if catch_unwind(AssertUnwindSafe(|| listener(state))).is_err() {
                    error!("State listener panicked while handling '{}'", state);
                }
            }
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.lock().generation == generation
    }

    /// Socket opened: reset backoff, re-announce subscriptions, flush the queue.
    /// Returns `false` if this session has been superseded.
    fn on_open(&self, generation: u64, link: &TransportLink) -> bool {
        {
            let mut inner = self.lock();
            if inner.generation != generation {
                return false;
            }
            let handle = link.handle();
            inner.scheduler.reset();
            inner.link = Some(handle.clone());
            inner.set_state(ConnectionState::Connected);

            let channels = inner.subscriptions.snapshot();
            if !channels.is_empty() {
                info!("Resubscribing to {} channels...", channels.len());
            }
            for channel in &channels {
                match ControlFrame::subscribe(channel).to_text() {
                    Ok(text) => {
                        if let Err(e) = self.send_on(&handle, text) {
                            error!("Failed to resubscribe to '{}': {}", channel, e);
                        }
                    }
                    Err(e) => error!("Failed to encode subscribe for '{}': {}", channel, e),
                }
            }

            let queued = inner.queue.drain();
            if !queued.is_empty() {
                info!("Flushing {} queued messages...", queued.len());
            }
            for text in queued {
                if let Err(e) = self.send_on(&handle, text) {
                    error!("Failed to flush queued message: {}", e);
                }
            }
        }
        self.flush_notifications();
        true
    }

    /// Socket dropped or failed to open. Returns the delay before the next
    /// attempt, or `None` if this session should stop.
    fn on_drop(&self, generation: u64) -> Option<std::time::Duration> {
        let delay = {
            let mut inner = self.lock();
            if inner.generation != generation {
                return None;
            }
            inner.link = None;
            match inner.scheduler.next_delay() {
                Some(delay) => {
                    warn!(
                        "Disconnected. Retrying in {:?} (attempt {}/{})...",
                        delay,
                        inner.scheduler.attempts(),
                        inner.scheduler.max_attempts()
                    );
                    inner.set_state(ConnectionState::Reconnecting);
                    Some(delay)
                }
                None => {
                    let attempts = inner.scheduler.attempts();
                    error!(
                        "Max retries ({}) reached. Stopping connection attempts.",
                        attempts
                    );
                    inner.reason = DisconnectReason::RetriesExhausted { attempts };
                    inner.session = None;
                    inner.set_state(ConnectionState::Disconnected);
                    None
                }
            }
        };
        self.flush_notifications();
        delay
    }

    /// Reconnect timer fired. Returns `false` if this session was superseded.
    fn begin_retry(&self, generation: u64) -> bool {
        {
            let mut inner = self.lock();
            if inner.generation != generation {
                return false;
            }
            inner.set_state(ConnectionState::Connecting);
        }
        self.flush_notifications();
        true
    }

    fn handle_text(&self, generation: u64, text: &str, heartbeat: &mut Heartbeat) {
        self.log_frame("<-", text);
        let route = {
            let inner = self.lock();
            if inner.generation != generation {
                return;
            }
            inner.router.route(text)
        };
        match route {
            Route::Malformed => {}
            Route::Pong(_) => heartbeat.record_pong(Instant::now()),
            Route::Deliver(delivery) => {
                delivery.dispatch(|| self.is_current(generation));
            }
        }
    }

    /// Drives one open socket until it closes, errors or is declared dead.
    async fn pump(&self, generation: u64, link: &mut TransportLink) {
        let mut heartbeat = Heartbeat::start(self.config.heartbeat.clone());
        loop {
            tokio::select! {
                event = link.next_event() => match event {
                    Some(TransportEvent::Text(text)) => self.handle_text(generation, &text, &mut heartbeat),
                    Some(TransportEvent::Closed { code, reason }) => {
                        info!("WebSocket closed (code {:?}): {}", code, reason);
                        return;
                    }
                    Some(TransportEvent::Error(e)) => {
                        error!("WebSocket error: {}", e);
                        return;
                    }
                    None => {
                        info!("WebSocket stream ended.");
                        return;
                    }
                },
                event = heartbeat.next() => match event {
                    HeartbeatEvent::Tick => match heartbeat.check(Instant::now()) {
                        Liveness::Dead { silent_for } => {
                            warn!(
                                "No heartbeat reply for {:?}; closing connection.",
                                silent_for
                            );
                            link.close(CLOSE_HEARTBEAT_TIMEOUT, CLOSE_HEARTBEAT_TIMEOUT_REASON);
                            return;
                        }
                        Liveness::Alive => {
                            if !self.is_current(generation) {
                                return;
                            }
                            match ControlFrame::ping().to_text() {
                                Ok(text) => {
                                    if let Err(e) = self.send_on(&link.handle(), text) {
                                        warn!("Failed to send heartbeat ping: {}", e);
                                    }
                                }
                                Err(e) => error!("Failed to encode heartbeat ping: {}", e),
                            }
                            heartbeat.ping_sent(Instant::now());
                        }
                    },
                    HeartbeatEvent::ReplyDeadline => {
                        if heartbeat.reply_overdue() {
                            warn!(
                                "Heartbeat reply not received within {:?}",
                                heartbeat.timeout()
                            );
                        }
                    }
                },
            }
        }
    }
}

/// Connection manager task for one `connect()` call and its reconnects.
async fn run_session(shared: Arc<Shared>, generation: u64, url: Url, mut opened: Option<OpenSignal>) {
    loop {
        info!("Attempting connection to {}...", redact_token(&url));
        match shared.transport.open(&url).await {
            Ok(mut link) => {
                if !shared.on_open(generation, &link) {
                    link.close(CLOSE_NORMAL, CLOSE_NORMAL_REASON);
                    return;
                }
                info!("Connection established.");
                if let Some(tx) = opened.take() {
                    let _ = tx.send(Ok(()));
                }
                shared.pump(generation, &mut link).await;
            }
            Err(e) => {
                error!("Failed to establish connection: {}", e);
                if let Some(tx) = opened.take() {
                    let _ = tx.send(Err(e));
                }
            }
        }

        let Some(delay) = shared.on_drop(generation) else {
            return;
        };
        sleep(delay).await;
        if !shared.begin_retry(generation) {
            return;
        }
    }
}

/// Real-time client keeping one WebSocket connection to the orchestrator.
///
/// # Example
///
/// ```no_run
/// use orchestrator_realtime::config::ClientConfig;
/// use orchestrator_realtime::types::message_types;
/// use orchestrator_realtime::websocket::RealtimeClient;
///
/// #[tokio::main]
/// async fn main() {
///     let config = ClientConfig::default().with_api_base_url("https://api.example.com/api");
///     let client = RealtimeClient::new(config);
///
///     client.on_state_change(|state| println!("connection: {}", state));
///     client.on(message_types::AGENT_STATUS, |payload, _envelope| {
///         println!("agent status: {}", payload);
///     });
///     client.subscribe("agents");
///
///     client.connect(Some("bearer-token")).await.expect("Failed to connect");
///     tokio::signal::ctrl_c().await.expect("Failed to listen for ctrl+c");
///     client.disconnect();
/// }
/// ```
pub struct RealtimeClient {
    shared: Arc<Shared>,
}

impl RealtimeClient {
    /// Creates a client using the `tokio-tungstenite` transport.
    pub fn new(config: ClientConfig) -> Self {
        Self::with_transport(config, Arc::new(TungsteniteTransport::new()))
    }

    pub fn with_transport(config: ClientConfig, transport: Arc<dyn Transport>) -> Self {
        let inner = Inner {
            state: ConnectionState::Disconnected,
            reason: DisconnectReason::Idle,
            generation: 0,
            session: None,
            link: None,
            scheduler: ReconnectScheduler::new(config.reconnect.clone()),
            subscriptions: SubscriptionRegistry::new(),
            queue: OutboundQueue::new(config.max_queued_messages),
            router: MessageRouter::new(),
            next_listener_id: 0,
            state_listeners: Vec::new(),
            pending_notifications: VecDeque::new(),
            notifying: false,
        };
        Self {
            shared: Arc::new(Shared {
                config,
                transport,
                inner: Mutex::new(inner),
            }),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.shared.config
    }

    /// Opens the connection.
    ///
    /// Resolves once the socket is open. A failure of this first attempt is
    /// returned, and the client keeps retrying in the background as
    /// `Reconnecting`. Calling this while `Connecting` or `Connected` is a
    /// no-op; while `Reconnecting` the pending retry is replaced by an
    /// immediate attempt.
    pub async fn connect(&self, token: Option<&str>) -> Result<()> {
        let url = self.shared.config.resolve_url(token)?;
        let (tx, rx) = oneshot::channel();
        {
            let mut inner = self.shared.lock();
            if matches!(
                inner.state,
                ConnectionState::Connected | ConnectionState::Connecting
            ) {
                debug!("connect() ignored: already {}", inner.state);
                return Ok(());
            }
            if let Some(session) = inner.session.take() {
                session.abort();
            }
            inner.link = None;
            inner.generation += 1;
            inner.scheduler.reset();
            inner.set_state(ConnectionState::Connecting);
            let generation = inner.generation;
            inner.session = Some(tokio::spawn(run_session(
                Arc::clone(&self.shared),
                generation,
                url,
                Some(tx),
            )));
        }
        self.shared.flush_notifications();

        match rx.await {
            Ok(result) => result,
            Err(_) => Err(RealtimeError::Cancelled),
        }
    }

    /// Tears the client down: cancels retries and the heartbeat, closes the
    /// socket with code 1000 and clears handlers, subscriptions and the
    /// outbound queue. State listeners stay registered.
    pub fn disconnect(&self) {
        {
            let mut inner = self.shared.lock();
            inner.generation += 1;
            if let Some(session) = inner.session.take() {
                session.abort();
            }
            if let Some(link) = inner.link.take() {
                link.close(CLOSE_NORMAL, CLOSE_NORMAL_REASON);
            }
            inner.subscriptions.clear();
            inner.queue.clear();
            inner.router.clear();
            inner.scheduler.reset();
            inner.reason = DisconnectReason::ClientRequested;
            inner.set_state(ConnectionState::Disconnected);
        }
        info!("Client disconnected.");
        self.shared.flush_notifications();
    }

    /// Serializes `payload` and sends it now if connected, otherwise queues it
    /// for the next successful connection.
    pub fn send<T: Serialize + ?Sized>(&self, payload: &T) -> Result<()> {
        let text = serde_json::to_string(payload)?;
        let mut inner = self.shared.lock();
        let text = match inner.connected_link() {
            Some(link) => match self.shared.send_on(link, text.clone()) {
                Ok(()) => return Ok(()),
                Err(e) => {
                    debug!("Send failed ({}); queueing message.", e);
                    text
                }
            },
            None => text,
        };
        inner.queue.push(text);
        Ok(())
    }

    /// Tracks `channel` and announces it if connected. The returned handle
    /// unsubscribes.
    pub fn subscribe(&self, channel: &str) -> Unregister {
        {
            let mut inner = self.shared.lock();
            if inner.subscriptions.insert(channel) {
                if let Some(link) = inner.connected_link() {
                    self.announce(link, ControlFrame::subscribe(channel));
                }
            }
        }
        let weak = Arc::downgrade(&self.shared);
        let channel = channel.to_string();
        Unregister::new(move || {
            if let Some(shared) = weak.upgrade() {
                unsubscribe_shared(&shared, &channel);
            }
        })
    }

    pub fn unsubscribe(&self, channel: &str) {
        unsubscribe_shared(&self.shared, channel);
    }

    fn announce(&self, link: &LinkHandle, frame: ControlFrame) {
        match frame.to_text() {
            Ok(text) => {
                if let Err(e) = self.shared.send_on(link, text) {
                    warn!("Failed to send {:?}: {}", frame, e);
                }
            }
            Err(e) => error!("Failed to encode {:?}: {}", frame, e),
        }
    }

    /// Snapshot of the tracked channels.
    pub fn subscriptions(&self) -> Vec<String> {
        self.shared.lock().subscriptions.snapshot()
    }

    /// Registers a handler for one message type. It receives
    /// `(payload, envelope)`.
    pub fn on<F>(&self, kind: &str, handler: F) -> Unregister
    where
        F: Fn(&Value, &Envelope) + Send + Sync + 'static,
    {
        let id = self.shared.lock().router.on(kind, Arc::new(handler));
        self.handler_unregister(id)
    }

    /// Registers a handler that sees every delivered envelope, after the
    /// type-specific handlers.
    pub fn on_any<F>(&self, handler: F) -> Unregister
    where
        F: Fn(&Envelope) + Send + Sync + 'static,
    {
        let id = self.shared.lock().router.on_any(Arc::new(handler));
        self.handler_unregister(id)
    }

    fn handler_unregister(&self, id: HandlerId) -> Unregister {
        let weak = Arc::downgrade(&self.shared);
        Unregister::new(move || {
            if let Some(shared) = weak.upgrade() {
                shared.lock().router.remove(id);
            }
        })
    }

    /// Registers a state observer. It is called right away with the current
    /// state, then on every transition.
    pub fn on_state_change<F>(&self, listener: F) -> Unregister
    where
        F: Fn(ConnectionState) + Send + Sync + 'static,
    {
        let listener: StateListener = Arc::new(listener);
        let (id, current) = {
            let mut inner = self.shared.lock();
            inner.next_listener_id += 1;
            let id = inner.next_listener_id;
            inner.state_listeners.push((id, Arc::clone(&listener)));
            (id, inner.state)
        };
        // Called here even when another drain is in progress, so the caller
        // sees the current state before this returns.
        if catch_unwind(AssertUnwindSafe(|| listener(current))).is_err() {
            error!("State listener panicked while handling '{}'", current);
        }

        let weak: Weak<Shared> = Arc::downgrade(&self.shared);
        Unregister::new(move || {
            if let Some(shared) = weak.upgrade() {
                shared.lock().state_listeners.retain(|(lid, _)| *lid != id);
            }
        })
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.lock().state
    }

    /// `Connected` and the transport still reports an open socket.
    pub fn is_connected(&self) -> bool {
        self.shared
            .lock()
            .connected_link()
            .map(LinkHandle::is_open)
            .unwrap_or(false)
    }

    /// Why the client is, or last was, disconnected.
    pub fn disconnect_reason(&self) -> DisconnectReason {
        self.shared.lock().reason
    }

    /// Consecutive failed or dropped connections since the last open.
    pub fn reconnect_attempts(&self) -> u32 {
        self.shared.lock().scheduler.attempts()
    }

    pub fn queued_messages(&self) -> usize {
        self.shared.lock().queue.len()
    }

    pub fn handler_count(&self) -> usize {
        self.shared.lock().router.len()
    }
}

impl Drop for RealtimeClient {
    fn drop(&mut self) {
        let mut inner = self.shared.lock();
        inner.generation += 1;
        if let Some(session) = inner.session.take() {
            session.abort();
        }
        if let Some(link) = inner.link.take() {
            link.close(CLOSE_NORMAL, CLOSE_NORMAL_REASON);
        }
    }
}

fn unsubscribe_shared(shared: &Shared, channel: &str) {
    let mut inner = shared.lock();
    if !inner.subscriptions.remove(channel) {
        return;
    }
    if let Some(link) = inner.connected_link() {
        match ControlFrame::unsubscribe(channel).to_text() {
            Ok(text) => {
                if let Err(e) = shared.send_on(link, text) {
                    warn!("Failed to send unsubscribe for '{}': {}", channel, e);
                }
            }
            Err(e) => error!("Failed to encode unsubscribe for '{}': {}", channel, e),
        }
    }
}
