//! Reconnecting client for one realtime stream.
//!
//! A [`Channel`] owns a best-effort bidirectional connection to one named
//! stream endpoint (`/chat`, `/game`, ...). It dials through a
//! [`Connector`], dispatches every decoded inbound [`ChannelMessage`] to
//! registered listeners in registration order, and survives transient
//! drops with a bounded exponential-backoff reconnect loop.
//!
//! Channels are plain values wired up by the application's composition
//! root; create one per stream and share it as needed.
//!
//! # Example
//!
//! ```rust,ignore
//! let chat = Channel::websocket(ChannelConfig::for_stream("ws://localhost:8000/ws", "chat"));
//!
//! let sub = chat.on_message(|msg| println!("[{}] {:?}", msg.kind, msg.data));
//! chat.connect(access_token);
//!
//! chat.send(&ChannelMessage::with_data(kind::MESSAGE, json!({"content": "hi"})));
//!
//! sub.unsubscribe();
//! chat.disconnect();
//! ```

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::auth::TokenStore;
use crate::message::ChannelMessage;
use crate::transport::{Connector, Transport};

/// Default maximum number of automatic reconnect attempts.
const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Default base delay for the exponential reconnect backoff.
const DEFAULT_RECONNECT_BACKOFF: Duration = Duration::from_millis(1000);

/// Lock a mutex, ignoring poisoning.
///
/// Listener callbacks run outside the lock, so a poisoned mutex can only
/// mean a panic in this module's own short critical sections; the guarded
/// data is still structurally valid.
fn lock<T>(mutex: &StdMutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── Configuration ───────────────────────────────────────────────────

/// Configuration for a [`Channel`].
///
/// # Example
///
/// ```
/// use bingo_channel_client::channel::ChannelConfig;
/// use std::time::Duration;
///
/// let config = ChannelConfig::for_stream("ws://localhost:8000/ws", "chat")
///     .with_reconnect_backoff(Duration::from_millis(500));
/// assert_eq!(config.endpoint, "ws://localhost:8000/ws/chat");
/// assert_eq!(config.max_reconnect_attempts, 5);
/// ```
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Full stream endpoint URL, without the token query.
    pub endpoint: String,
    /// Maximum number of automatic reconnect attempts before the channel
    /// gives up and waits for an explicit `connect`. Defaults to **5**.
    pub max_reconnect_attempts: u32,
    /// Base delay for the reconnect backoff; attempt `k` waits
    /// `reconnect_backoff * 2^k`. Defaults to **1000 ms**.
    pub reconnect_backoff: Duration,
}

impl ChannelConfig {
    /// Create a configuration for the given endpoint URL with defaults.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            reconnect_backoff: DEFAULT_RECONNECT_BACKOFF,
        }
    }

    /// Create a configuration for a named stream under a base URL,
    /// e.g. `("ws://host/ws", "game")` → `ws://host/ws/game`.
    pub fn for_stream(base_url: &str, stream: &str) -> Self {
        Self::new(format!(
            "{}/{}",
            base_url.trim_end_matches('/'),
            stream.trim_start_matches('/')
        ))
    }

    /// Set the maximum number of automatic reconnect attempts.
    #[must_use]
    pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    /// Set the base delay for the reconnect backoff.
    #[must_use]
    pub fn with_reconnect_backoff(mut self, backoff: Duration) -> Self {
        self.reconnect_backoff = backoff;
        self
    }
}

// ── State ───────────────────────────────────────────────────────────

/// Connection state of a [`Channel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ChannelState {
    /// No connection and no pending retry.
    Disconnected = 0,
    /// A dial is in flight.
    Connecting = 1,
    /// The connection is live; `send` will transmit.
    Open = 2,
    /// The connection dropped; a reconnect is scheduled.
    PendingRetry = 3,
    /// All automatic reconnect attempts are spent. The channel stays down
    /// until `connect` is called again.
    Exhausted = 4,
}

impl ChannelState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Connecting,
            2 => Self::Open,
            3 => Self::PendingRetry,
            4 => Self::Exhausted,
            _ => Self::Disconnected,
        }
    }
}

// ── Shared state ────────────────────────────────────────────────────

type Listener = Arc<dyn Fn(&ChannelMessage) + Send + Sync + 'static>;

struct ListenerEntry {
    id: u64,
    callback: Listener,
}

/// State shared between the [`Channel`] handle and its connection task.
///
/// Every mutation that belongs to one connection generation re-checks the
/// live generation under the `outbound` lock, so a superseded task (stale
/// retry, raced teardown) can never clobber the state of its successor.
struct ChannelShared {
    /// Bumped on every explicit `connect`/`disconnect`.
    generation: AtomicU64,
    state: AtomicU8,
    /// Sender half of the live connection's outgoing queue.
    outbound: StdMutex<Option<mpsc::UnboundedSender<String>>>,
    /// Registered listeners, in registration order.
    listeners: StdMutex<Vec<ListenerEntry>>,
    next_listener_id: AtomicU64,
}

impl ChannelShared {
    fn new() -> Self {
        Self {
            generation: AtomicU64::new(0),
            state: AtomicU8::new(ChannelState::Disconnected as u8),
            outbound: StdMutex::new(None),
            listeners: StdMutex::new(Vec::new()),
            next_listener_id: AtomicU64::new(0),
        }
    }

    fn load_state(&self) -> ChannelState {
        ChannelState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::Acquire) == generation
    }

    /// Invalidate the current connection generation: drop the outbound
    /// queue, set `state`, and return the new generation. Called by the
    /// handle on every explicit `connect`/`disconnect`.
    fn supersede(&self, state: ChannelState) -> u64 {
        let mut outbound = lock(&self.outbound);
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        *outbound = None;
        self.state.store(state as u8, Ordering::Release);
        generation
    }

    /// Set `state` if `generation` is still live.
    fn set_state(&self, generation: u64, state: ChannelState) -> bool {
        let _outbound = lock(&self.outbound);
        if !self.is_current(generation) {
            return false;
        }
        self.state.store(state as u8, Ordering::Release);
        true
    }

    /// Publish a fresh connection's outgoing queue and flip to `Open`,
    /// if `generation` is still live.
    fn install_outbound(&self, generation: u64, tx: mpsc::UnboundedSender<String>) -> bool {
        let mut outbound = lock(&self.outbound);
        if !self.is_current(generation) {
            return false;
        }
        *outbound = Some(tx);
        self.state.store(ChannelState::Open as u8, Ordering::Release);
        true
    }

    /// Drop the outgoing queue after a connection loss and set the next
    /// state (`PendingRetry` or `Exhausted`), if `generation` is still live.
    fn connection_lost(&self, generation: u64, state: ChannelState) -> bool {
        let mut outbound = lock(&self.outbound);
        if !self.is_current(generation) {
            return false;
        }
        *outbound = None;
        self.state.store(state as u8, Ordering::Release);
        true
    }

    /// Decode one inbound text frame and fan it out to the listeners.
    ///
    /// Undecodable frames are logged and dropped; they trigger neither
    /// listeners nor a state transition.
    fn dispatch(&self, text: &str) {
        match serde_json::from_str::<ChannelMessage>(text) {
            Ok(message) => {
                // Snapshot under the lock, invoke outside it: listeners may
                // subscribe or unsubscribe from inside a callback.
                let snapshot: Vec<Listener> = lock(&self.listeners)
                    .iter()
                    .map(|entry| Arc::clone(&entry.callback))
                    .collect();
                for listener in snapshot {
                    listener(&message);
                }
            }
            Err(e) => {
                warn!("dropping undecodable channel message: {e} (raw: {text})");
            }
        }
    }
}

// ── Subscription ────────────────────────────────────────────────────

/// Handle returned by [`Channel::on_message`].
///
/// Dropping the handle does *not* remove the listener; call
/// [`unsubscribe`](Subscription::unsubscribe). Unsubscribing more than once
/// is a no-op, and a subscription outliving its channel is harmless.
#[derive(Debug, Clone)]
pub struct Subscription {
    id: u64,
    shared: Weak<ChannelShared>,
}

impl Subscription {
    /// Remove this listener registration from the channel.
    pub fn unsubscribe(&self) {
        if let Some(shared) = self.shared.upgrade() {
            lock(&shared.listeners).retain(|entry| entry.id != self.id);
        }
    }
}

// ── Channel ─────────────────────────────────────────────────────────

/// A reconnecting realtime client for one stream endpoint.
///
/// See the [module docs](self) for an overview and example. All methods
/// take `&self`; the channel can be shared behind an `Arc` and driven from
/// UI handlers. [`connect`](Channel::connect) must be called from within a
/// tokio runtime, since it spawns the background connection task.
pub struct Channel<C: Connector> {
    connector: Arc<C>,
    config: ChannelConfig,
    shared: Arc<ChannelShared>,
    task: StdMutex<Option<tokio::task::JoinHandle<()>>>,
}

impl<C: Connector> Channel<C> {
    /// Create a channel that dials through `connector`. No connection is
    /// made until [`connect`](Channel::connect).
    pub fn new(config: ChannelConfig, connector: C) -> Self {
        Self {
            connector: Arc::new(connector),
            config,
            shared: Arc::new(ChannelShared::new()),
            task: StdMutex::new(None),
        }
    }

    /// The stream endpoint URL this channel dials (without the token).
    pub fn endpoint(&self) -> &str {
        &self.config.endpoint
    }

    /// Current connection state.
    pub fn state(&self) -> ChannelState {
        self.shared.load_state()
    }

    /// Returns `true` if the connection is live and `send` will transmit.
    pub fn is_open(&self) -> bool {
        self.state() == ChannelState::Open
    }

    /// Open (or replace) the connection using `token` for authentication.
    ///
    /// Any live connection and any pending reconnect are discarded first.
    /// The token is captured now and reused verbatim by every automatic
    /// reconnect attempt; it is never refreshed internally. Readiness is
    /// observed via [`state`](Channel::state) / [`is_open`](Channel::is_open);
    /// there is no success callback.
    ///
    /// An empty token is rejected with a warning and leaves the channel
    /// untouched.
    pub fn connect(&self, token: impl Into<String>) {
        let token = token.into();
        if token.is_empty() {
            warn!(
                endpoint = %self.config.endpoint,
                "connect called with an empty token; ignoring"
            );
            return;
        }

        let generation = self.shared.supersede(ChannelState::Connecting);
        self.abort_task();

        let task = tokio::spawn(run_channel(
            Arc::clone(&self.connector),
            self.config.clone(),
            Arc::clone(&self.shared),
            token,
            generation,
        ));
        *lock(&self.task) = Some(task);
    }

    /// Open the connection using the current access token from `tokens`.
    ///
    /// The store is read exactly once, now; reconnect attempts keep using
    /// the token that was read. With no token available the channel is left
    /// untouched.
    pub fn connect_from(&self, tokens: &dyn TokenStore) {
        match tokens.access_token() {
            Some(token) => self.connect(token),
            None => warn!(
                endpoint = %self.config.endpoint,
                "no access token in store; channel left untouched"
            ),
        }
    }

    /// Close the connection and forget all listeners.
    ///
    /// Cancels any pending reconnect and resets the attempt counter.
    /// Calling this on an already-disconnected channel is a no-op.
    pub fn disconnect(&self) {
        self.shared.supersede(ChannelState::Disconnected);
        self.abort_task();
        lock(&self.shared.listeners).clear();
        debug!(endpoint = %self.config.endpoint, "channel disconnected");
    }

    /// Send a message if the connection is open; otherwise log and drop it.
    ///
    /// Best-effort by design: there is no queueing, no retry, and no error
    /// returned to the caller. A message sent while the channel is
    /// connecting, backing off, or disconnected is discarded with a
    /// warning.
    pub fn send(&self, message: &ChannelMessage) {
        let outbound = lock(&self.shared.outbound);
        if self.shared.load_state() != ChannelState::Open {
            warn!(
                endpoint = %self.config.endpoint,
                kind = %message.kind,
                "channel is not open; dropping outbound message"
            );
            return;
        }
        let Some(tx) = outbound.as_ref() else {
            warn!(
                endpoint = %self.config.endpoint,
                kind = %message.kind,
                "channel has no live connection; dropping outbound message"
            );
            return;
        };
        match serde_json::to_string(message) {
            Ok(text) => {
                if tx.send(text).is_err() {
                    warn!(
                        endpoint = %self.config.endpoint,
                        kind = %message.kind,
                        "connection task is gone; dropping outbound message"
                    );
                }
            }
            Err(e) => {
                // A ChannelMessage that fails to serialize is a programming
                // bug in the payload; don't take the channel down for it.
                error!("failed to serialize outbound message: {e}");
            }
        }
    }

    /// Register a listener for every decoded inbound message.
    ///
    /// Listeners run on the channel's connection task, in registration
    /// order, one inbound message at a time; a listener is never invoked
    /// concurrently with itself. The returned [`Subscription`] removes
    /// exactly this registration.
    pub fn on_message<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&ChannelMessage) + Send + Sync + 'static,
    {
        let id = self.shared.next_listener_id.fetch_add(1, Ordering::Relaxed);
        lock(&self.shared.listeners).push(ListenerEntry {
            id,
            callback: Arc::new(listener),
        });
        Subscription {
            id,
            shared: Arc::downgrade(&self.shared),
        }
    }

    fn abort_task(&self) {
        if let Some(task) = lock(&self.task).take() {
            // The transport closes when the task future is dropped. The
            // generation bump has already fenced the task off from shared
            // state, so an in-flight poll cannot outlive its lease.
            task.abort();
        }
    }
}

#[cfg(feature = "transport-websocket")]
impl Channel<crate::transports::WebSocketConnector> {
    /// Create a channel backed by the default WebSocket connector.
    pub fn websocket(config: ChannelConfig) -> Self {
        Self::new(config, crate::transports::WebSocketConnector::new())
    }
}

impl<C: Connector> std::fmt::Debug for Channel<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("endpoint", &self.config.endpoint)
            .field("state", &self.state())
            .finish()
    }
}

impl<C: Connector> Drop for Channel<C> {
    fn drop(&mut self) {
        // `Drop` is synchronous, so the only safe action is to abort the
        // connection task; dropping its future closes the transport.
        if let Some(task) = lock(&self.task).take() {
            task.abort();
        }
    }
}

// ── Connection task ─────────────────────────────────────────────────

/// Dial, pump, and re-dial one channel connection until the generation is
/// superseded or the reconnect attempts are spent.
///
/// The attempt counter is cumulative for the lifetime of this task: a
/// successful automatic reconnect does not reset it. Only an explicit
/// `connect` (a fresh task) or `disconnect` starts the count over.
async fn run_channel<C: Connector>(
    connector: Arc<C>,
    config: ChannelConfig,
    shared: Arc<ChannelShared>,
    token: String,
    generation: u64,
) {
    let url = format!("{}?token={}", config.endpoint, token);
    let mut attempt: u32 = 0;

    loop {
        if !shared.set_state(generation, ChannelState::Connecting) {
            return;
        }

        match connector.connect(&url).await {
            Ok(transport) => {
                let (out_tx, out_rx) = mpsc::unbounded_channel::<String>();
                if !shared.install_outbound(generation, out_tx) {
                    return;
                }
                info!(endpoint = %config.endpoint, "channel open");
                pump(transport, out_rx, &shared).await;
            }
            Err(e) => {
                // A failed dial behaves like an immediately-dropped
                // connection and consumes a reconnect attempt.
                error!(endpoint = %config.endpoint, "channel connect failed: {e}");
            }
        }

        if attempt >= config.max_reconnect_attempts {
            if shared.connection_lost(generation, ChannelState::Exhausted) {
                warn!(
                    endpoint = %config.endpoint,
                    attempts = attempt,
                    "reconnect attempts exhausted; channel stays down until connect is called again"
                );
            }
            return;
        }

        if !shared.connection_lost(generation, ChannelState::PendingRetry) {
            return;
        }
        let delay = config
            .reconnect_backoff
            .saturating_mul(2u32.saturating_pow(attempt));
        debug!(
            endpoint = %config.endpoint,
            attempt,
            delay_ms = delay.as_millis() as u64,
            "connection lost; reconnect scheduled"
        );
        tokio::time::sleep(delay).await;

        // An explicit disconnect or a newer connect may have superseded
        // this connection while the retry timer was pending; a stale retry
        // must not revive the channel.
        if !shared.is_current(generation) {
            return;
        }
        attempt += 1;
    }
}

/// Drive one live connection: forward queued outgoing messages and
/// dispatch inbound ones. Returns when the connection is lost.
async fn pump<T: Transport>(
    mut transport: T,
    mut out_rx: mpsc::UnboundedReceiver<String>,
    shared: &ChannelShared,
) {
    loop {
        tokio::select! {
            outgoing = out_rx.recv() => {
                let Some(text) = outgoing else {
                    // Outbound queue dropped by a supersede; nothing left
                    // to pump.
                    return;
                };
                if let Err(e) = transport.send(text).await {
                    error!("transport send error: {e}");
                    return;
                }
            }

            incoming = transport.recv() => {
                match incoming {
                    Some(Ok(text)) => shared.dispatch(&text),
                    Some(Err(e)) => {
                        // Transport errors are reported only; the close
                        // that follows them drives the reconnect logic.
                        error!("transport error: {e}");
                    }
                    None => {
                        debug!("connection closed");
                        return;
                    }
                }
            }
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use crate::auth::{AuthTokens, MemoryTokenStore};
    use crate::error::ChannelError;
    use crate::message::kind;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;

    // ── Mock connector ──────────────────────────────────────────────

    /// One scripted outcome for a dial attempt.
    enum DialOutcome {
        /// Accept and hand the test a live frame feed.
        Accept,
        /// Accept, then close immediately on the first `recv`.
        AcceptClosed,
        /// Fail the dial with an I/O error.
        Refuse,
    }

    /// Record of one dial the channel performed.
    #[derive(Clone)]
    struct DialRecord {
        url: String,
        at: tokio::time::Instant,
        /// Feed inbound frames to this dial's transport. `Some(frame)`
        /// delivers, `None` closes the connection.
        frames: mpsc::UnboundedSender<Option<Result<String, ChannelError>>>,
        /// Messages the channel sent over this dial's transport.
        sent: Arc<StdMutex<Vec<String>>>,
    }

    struct MockConnectorState {
        scripted: VecDeque<DialOutcome>,
        default: DialOutcome,
        dials: Vec<DialRecord>,
    }

    /// A [`Connector`] that records every dial and follows a script.
    struct MockConnector {
        state: StdMutex<MockConnectorState>,
    }

    impl MockConnector {
        fn new() -> Arc<Self> {
            Self::with_default(DialOutcome::Accept)
        }

        fn with_default(default: DialOutcome) -> Arc<Self> {
            Arc::new(Self {
                state: StdMutex::new(MockConnectorState {
                    scripted: VecDeque::new(),
                    default,
                    dials: Vec::new(),
                }),
            })
        }

        fn script(&self, outcomes: Vec<DialOutcome>) {
            lock(&self.state).scripted.extend(outcomes);
        }

        fn dial_count(&self) -> usize {
            lock(&self.state).dials.len()
        }

        fn dial(&self, index: usize) -> DialRecord {
            lock(&self.state).dials[index].clone()
        }

        /// Millisecond offsets of every dial relative to the first.
        fn dial_offsets_ms(&self) -> Vec<u64> {
            let state = lock(&self.state);
            let Some(first) = state.dials.first() else {
                return Vec::new();
            };
            state
                .dials
                .iter()
                .map(|d| (d.at - first.at).as_millis() as u64)
                .collect()
        }

        /// Spin (on the paused clock) until `n` dials have been recorded.
        async fn wait_for_dials(&self, n: usize) {
            for _ in 0..100_000 {
                if self.dial_count() >= n {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
            panic!(
                "expected {n} dials, saw only {} in time",
                self.dial_count()
            );
        }
    }

    struct MockTransport {
        frames: mpsc::UnboundedReceiver<Option<Result<String, ChannelError>>>,
        sent: Arc<StdMutex<Vec<String>>>,
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn send(&mut self, message: String) -> Result<(), ChannelError> {
            lock(&self.sent).push(message);
            Ok(())
        }

        async fn recv(&mut self) -> Option<Result<String, ChannelError>> {
            match self.frames.recv().await {
                Some(Some(frame)) => Some(frame),
                // Explicit close marker from the test.
                Some(None) => None,
                // Feed dropped: keep the connection open so a finished
                // test does not trigger spurious reconnects.
                None => std::future::pending().await,
            }
        }

        async fn close(&mut self) -> Result<(), ChannelError> {
            Ok(())
        }
    }

    #[async_trait]
    impl Connector for Arc<MockConnector> {
        type Transport = MockTransport;

        async fn connect(&self, url: &str) -> Result<MockTransport, ChannelError> {
            let (frames_tx, frames_rx) = mpsc::unbounded_channel();
            let sent = Arc::new(StdMutex::new(Vec::new()));
            let outcome = {
                let mut state = lock(&self.state);
                state.dials.push(DialRecord {
                    url: url.to_string(),
                    at: tokio::time::Instant::now(),
                    frames: frames_tx.clone(),
                    sent: Arc::clone(&sent),
                });
                state.scripted.pop_front()
            };
            let outcome = match outcome {
                Some(o) => o,
                None => match lock(&self.state).default {
                    DialOutcome::Accept => DialOutcome::Accept,
                    DialOutcome::AcceptClosed => DialOutcome::AcceptClosed,
                    DialOutcome::Refuse => DialOutcome::Refuse,
                },
            };
            match outcome {
                DialOutcome::Accept => Ok(MockTransport {
                    frames: frames_rx,
                    sent,
                }),
                DialOutcome::AcceptClosed => {
                    let _ = frames_tx.send(None);
                    Ok(MockTransport {
                        frames: frames_rx,
                        sent,
                    })
                }
                DialOutcome::Refuse => Err(ChannelError::Io(std::io::Error::new(
                    std::io::ErrorKind::ConnectionRefused,
                    "dial refused by script",
                ))),
            }
        }
    }

    // ── Helpers ─────────────────────────────────────────────────────

    fn channel(connector: &Arc<MockConnector>) -> Channel<Arc<MockConnector>> {
        Channel::new(
            ChannelConfig::new("ws://localhost:8000/ws/chat"),
            Arc::clone(connector),
        )
    }

    /// Let the connection task drain whatever is ready.
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    /// A listener that appends every received message to `log`.
    fn recording_listener(
        log: &Arc<StdMutex<Vec<ChannelMessage>>>,
    ) -> impl Fn(&ChannelMessage) + Send + Sync + 'static {
        let log = Arc::clone(log);
        move |msg| lock(&log).push(msg.clone())
    }

    fn system_frame(text: &str) -> Option<Result<String, ChannelError>> {
        Some(Ok(format!(
            r#"{{"type":"system","data":{{"text":"{text}"}}}}"#
        )))
    }

    // ── Config ──────────────────────────────────────────────────────

    #[test]
    fn config_defaults() {
        let config = ChannelConfig::new("ws://host/ws/game");
        assert_eq!(config.endpoint, "ws://host/ws/game");
        assert_eq!(config.max_reconnect_attempts, 5);
        assert_eq!(config.reconnect_backoff, Duration::from_millis(1000));
    }

    #[test]
    fn config_builder_methods() {
        let config = ChannelConfig::new("ws://host/ws/game")
            .with_max_reconnect_attempts(2)
            .with_reconnect_backoff(Duration::from_millis(250));
        assert_eq!(config.max_reconnect_attempts, 2);
        assert_eq!(config.reconnect_backoff, Duration::from_millis(250));
    }

    #[test]
    fn for_stream_joins_base_and_stream() {
        assert_eq!(
            ChannelConfig::for_stream("ws://host/ws", "chat").endpoint,
            "ws://host/ws/chat"
        );
        assert_eq!(
            ChannelConfig::for_stream("ws://host/ws/", "/game").endpoint,
            "ws://host/ws/game"
        );
    }

    // ── Connect / disconnect ────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn connect_dials_endpoint_with_token() {
        let connector = MockConnector::new();
        let chan = channel(&connector);

        chan.connect("tok1");
        connector.wait_for_dials(1).await;

        assert_eq!(connector.dial(0).url, "ws://localhost:8000/ws/chat?token=tok1");
        assert!(chan.is_open());
    }

    #[tokio::test(start_paused = true)]
    async fn empty_token_is_rejected() {
        let connector = MockConnector::new();
        let chan = channel(&connector);

        chan.connect("");
        settle().await;

        assert_eq!(connector.dial_count(), 0);
        assert_eq!(chan.state(), ChannelState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn state_starts_disconnected() {
        let connector = MockConnector::new();
        let chan = channel(&connector);
        assert_eq!(chan.state(), ChannelState::Disconnected);
        assert!(!chan.is_open());
    }

    #[tokio::test(start_paused = true)]
    async fn connect_replaces_live_connection() {
        let connector = MockConnector::new();
        let chan = channel(&connector);
        let received = Arc::new(StdMutex::new(Vec::new()));
        let _sub = chan.on_message(recording_listener(&received));

        chan.connect("tok1");
        connector.wait_for_dials(1).await;
        chan.connect("tok2");
        connector.wait_for_dials(2).await;

        assert_eq!(connector.dial(1).url, "ws://localhost:8000/ws/chat?token=tok2");

        // Frames on the superseded connection go nowhere.
        let _ = connector.dial(0).frames.send(system_frame("stale"));
        settle().await;
        assert!(lock(&received).is_empty());

        // The replacement connection is the live one.
        let _ = connector.dial(1).frames.send(system_frame("fresh"));
        settle().await;
        assert_eq!(lock(&received).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_is_idempotent() {
        let connector = MockConnector::new();
        let chan = channel(&connector);
        chan.disconnect();
        chan.disconnect();
        assert_eq!(chan.state(), ChannelState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_clears_listeners() {
        let connector = MockConnector::new();
        let chan = channel(&connector);
        let received = Arc::new(StdMutex::new(Vec::new()));
        let _sub = chan.on_message(recording_listener(&received));

        chan.connect("tok1");
        connector.wait_for_dials(1).await;
        chan.disconnect();

        // Listeners registered before disconnect are gone for good.
        chan.connect("tok1");
        connector.wait_for_dials(2).await;
        let _ = connector.dial(1).frames.send(system_frame("hello"));
        settle().await;

        assert!(lock(&received).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn connect_from_reads_token_store() {
        let connector = MockConnector::new();
        let chan = channel(&connector);
        let store = MemoryTokenStore::new();
        store.login(AuthTokens::new("stored-token", "refresh"));

        chan.connect_from(&store);
        connector.wait_for_dials(1).await;
        assert_eq!(
            connector.dial(0).url,
            "ws://localhost:8000/ws/chat?token=stored-token"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn connect_from_empty_store_is_a_noop() {
        let connector = MockConnector::new();
        let chan = channel(&connector);

        chan.connect_from(&MemoryTokenStore::new());
        settle().await;

        assert_eq!(connector.dial_count(), 0);
        assert_eq!(chan.state(), ChannelState::Disconnected);
    }

    // ── Send ────────────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn send_serializes_and_transmits_when_open() {
        let connector = MockConnector::new();
        let chan = channel(&connector);
        chan.connect("tok1");
        connector.wait_for_dials(1).await;

        chan.send(&ChannelMessage::with_data(
            kind::MESSAGE,
            json!({"content": "bingo!"}),
        ));
        settle().await;

        let sent = connector.dial(0).sent;
        let sent = lock(&sent);
        assert_eq!(sent.len(), 1);
        let wire: serde_json::Value = serde_json::from_str(&sent[0]).unwrap();
        assert_eq!(wire, json!({"type": "message", "data": {"content": "bingo!"}}));
    }

    #[tokio::test(start_paused = true)]
    async fn send_while_disconnected_is_dropped() {
        let connector = MockConnector::new();
        let chan = channel(&connector);

        // Never connected: nothing to transmit, nothing panics.
        chan.send(&ChannelMessage::new(kind::READY));

        chan.connect("tok1");
        connector.wait_for_dials(1).await;
        chan.disconnect();
        chan.send(&ChannelMessage::new(kind::READY));
        settle().await;

        let sent = connector.dial(0).sent;
        assert!(lock(&sent).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn send_during_backoff_is_dropped() {
        let connector = MockConnector::new();
        connector.script(vec![DialOutcome::AcceptClosed]);
        let chan = channel(&connector);

        chan.connect("tok1");
        connector.wait_for_dials(1).await;
        settle().await;
        assert_eq!(chan.state(), ChannelState::PendingRetry);

        chan.send(&ChannelMessage::new(kind::READY));
        // No transmission happened on either dial.
        let sent = connector.dial(0).sent;
        assert!(lock(&sent).is_empty());
    }

    // ── Listeners ───────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn listeners_run_in_registration_order() {
        let connector = MockConnector::new();
        let chan = channel(&connector);

        let order = Arc::new(StdMutex::new(Vec::new()));
        for tag in ["first", "second", "third"] {
            let order = Arc::clone(&order);
            chan.on_message(move |msg| lock(&order).push((tag, msg.kind.clone())));
        }

        chan.connect("tok1");
        connector.wait_for_dials(1).await;
        let frames = connector.dial(0).frames;
        let _ = frames.send(Some(Ok(r#"{"type":"a"}"#.into())));
        let _ = frames.send(Some(Ok(r#"{"type":"b"}"#.into())));
        settle().await;

        let order = lock(&order);
        assert_eq!(
            *order,
            vec![
                ("first", "a".to_string()),
                ("second", "a".to_string()),
                ("third", "a".to_string()),
                ("first", "b".to_string()),
                ("second", "b".to_string()),
                ("third", "b".to_string()),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn unsubscribe_stops_exactly_that_listener() {
        let connector = MockConnector::new();
        let chan = channel(&connector);

        let kept = Arc::new(StdMutex::new(Vec::new()));
        let dropped = Arc::new(StdMutex::new(Vec::new()));
        let _keep = chan.on_message(recording_listener(&kept));
        let sub = chan.on_message(recording_listener(&dropped));

        chan.connect("tok1");
        connector.wait_for_dials(1).await;
        let frames = connector.dial(0).frames;

        let _ = frames.send(system_frame("one"));
        settle().await;
        sub.unsubscribe();
        sub.unsubscribe(); // twice is a no-op
        let _ = frames.send(system_frame("two"));
        settle().await;

        assert_eq!(lock(&kept).len(), 2);
        assert_eq!(lock(&dropped).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_inbound_is_dropped_without_state_change() {
        let connector = MockConnector::new();
        let chan = channel(&connector);
        let received = Arc::new(StdMutex::new(Vec::new()));
        let _sub = chan.on_message(recording_listener(&received));

        chan.connect("tok1");
        connector.wait_for_dials(1).await;
        let frames = connector.dial(0).frames;

        let _ = frames.send(Some(Ok("not json at all".into())));
        let _ = frames.send(Some(Ok(r#"{"data":{"no":"type"}}"#.into())));
        let _ = frames.send(system_frame("still here"));
        settle().await;

        // Only the valid record was delivered; the connection stayed up.
        assert_eq!(lock(&received).len(), 1);
        assert!(chan.is_open());
        assert_eq!(connector.dial_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn transport_errors_are_reported_not_fatal() {
        let connector = MockConnector::new();
        let chan = channel(&connector);
        let received = Arc::new(StdMutex::new(Vec::new()));
        let _sub = chan.on_message(recording_listener(&received));

        chan.connect("tok1");
        connector.wait_for_dials(1).await;
        let frames = connector.dial(0).frames;

        let _ = frames.send(Some(Err(ChannelError::TransportReceive("hiccup".into()))));
        let _ = frames.send(system_frame("after error"));
        settle().await;

        assert_eq!(lock(&received).len(), 1);
        assert!(chan.is_open());
    }

    // ── Reconnect machine ───────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn backoff_doubles_until_exhausted() {
        let connector = MockConnector::with_default(DialOutcome::AcceptClosed);
        let chan = channel(&connector);

        chan.connect("tok1");
        // 1 initial dial + 5 retries, then exhaustion.
        connector.wait_for_dials(6).await;
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert_eq!(connector.dial_count(), 6);
        assert_eq!(
            connector.dial_offsets_ms(),
            vec![0, 1000, 3000, 7000, 15000, 31000]
        );
        assert_eq!(chan.state(), ChannelState::Exhausted);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_reuses_the_connect_token() {
        let connector = MockConnector::new();
        connector.script(vec![DialOutcome::AcceptClosed]);
        let chan = channel(&connector);

        chan.connect("tok1");
        connector.wait_for_dials(2).await;

        assert_eq!(connector.dial(1).url, connector.dial(0).url);
        assert_eq!(connector.dial_offsets_ms(), vec![0, 1000]);
    }

    #[tokio::test(start_paused = true)]
    async fn attempts_accumulate_across_successful_reconnects() {
        let connector = MockConnector::new();
        // Two drops with a successful reconnect in between: the second
        // retry still waits 2x the base delay.
        connector.script(vec![DialOutcome::AcceptClosed, DialOutcome::AcceptClosed]);
        let chan = channel(&connector);

        chan.connect("tok1");
        connector.wait_for_dials(3).await;

        assert_eq!(connector.dial_offsets_ms(), vec![0, 1000, 3000]);
    }

    #[tokio::test(start_paused = true)]
    async fn explicit_connect_resets_the_attempt_counter() {
        let connector = MockConnector::new();
        connector.script(vec![DialOutcome::AcceptClosed, DialOutcome::AcceptClosed]);
        let chan = channel(&connector);

        chan.connect("tok1");
        connector.wait_for_dials(3).await;
        let offsets = connector.dial_offsets_ms();
        assert_eq!(offsets, vec![0, 1000, 3000]);

        // A fresh connect dials immediately and its first retry waits the
        // base delay again.
        connector.script(vec![DialOutcome::AcceptClosed]);
        chan.connect("tok2");
        connector.wait_for_dials(5).await;

        let offsets = connector.dial_offsets_ms();
        assert_eq!(offsets[4] - offsets[3], 1000);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_cancels_a_pending_retry() {
        let connector = MockConnector::new();
        connector.script(vec![DialOutcome::AcceptClosed]);
        let chan = channel(&connector);

        chan.connect("tok1");
        connector.wait_for_dials(1).await;
        settle().await;
        assert_eq!(chan.state(), ChannelState::PendingRetry);

        chan.disconnect();
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert_eq!(connector.dial_count(), 1);
        assert_eq!(chan.state(), ChannelState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_channel_reconnects_on_explicit_connect() {
        let connector = MockConnector::with_default(DialOutcome::Refuse);
        let chan = Channel::new(
            ChannelConfig::new("ws://localhost:8000/ws/game").with_max_reconnect_attempts(1),
            Arc::clone(&connector),
        );

        chan.connect("tok1");
        connector.wait_for_dials(2).await;
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(chan.state(), ChannelState::Exhausted);
        assert_eq!(connector.dial_count(), 2);

        connector.script(vec![DialOutcome::Accept]);
        chan.connect("tok1");
        connector.wait_for_dials(3).await;
        assert!(chan.is_open());
    }

    #[tokio::test(start_paused = true)]
    async fn refused_dials_follow_the_same_backoff() {
        let connector = MockConnector::new();
        connector.script(vec![DialOutcome::Refuse, DialOutcome::Refuse]);
        let chan = channel(&connector);

        chan.connect("tok1");
        connector.wait_for_dials(3).await;

        assert_eq!(connector.dial_offsets_ms(), vec![0, 1000, 3000]);
        assert!(chan.is_open());
    }

    #[tokio::test(start_paused = true)]
    async fn debug_impl_shows_endpoint_and_state() {
        let connector = MockConnector::new();
        let chan = channel(&connector);
        let debug = format!("{chan:?}");
        assert!(debug.contains("ws://localhost:8000/ws/chat"));
        assert!(debug.contains("Disconnected"));
    }
}
