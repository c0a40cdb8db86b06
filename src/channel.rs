//! The connection manager for the live event channel.
//!
//! [`EventChannel`] owns one logical duplex channel to a server endpoint:
//! it dials through a [`Connector`], performs the single-frame
//! authentication handshake, filters keep-alives, decodes frames into
//! [`MineraceEvent`]s, and fans them out to subscribers. When the
//! transport drops for any reason other than [`EventChannel::close`], a
//! reconnect is scheduled after a fixed delay — no exponential backoff,
//! since at most one channel is ever live per scope.
//!
//! # Subscriber policy
//!
//! Subscriptions survive reconnects. The subscriber list is owned by the
//! channel and cleared exactly once, at [`close`](EventChannel::close);
//! a transient reconnect never clears it. Subscribers observe the
//! synthetic [`ChannelEvent::Connected`] after every successful dial and
//! use it as the signal to re-fetch their snapshot.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};

use crate::credentials::CredentialSource;
use crate::event::{decode_frame, Decoded, MineraceEvent};
use crate::protocol::AuthFrame;
use crate::transport::Connector;

/// Default delay between a transport drop and the next dial attempt.
const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(3);

/// Default capacity of each subscriber's event queue.
const DEFAULT_SUBSCRIBER_CAPACITY: usize = 256;

/// Default timeout for the graceful shutdown.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

// ── Configuration ───────────────────────────────────────────────────

/// Configuration for an [`EventChannel`].
///
/// # Example
///
/// ```
/// use minerace_client::channel::ChannelConfig;
/// use std::time::Duration;
///
/// let config = ChannelConfig::default()
///     .with_reconnect_delay(Duration::from_secs(5))
///     .with_subscriber_capacity(512);
/// assert_eq!(config.reconnect_delay, Duration::from_secs(5));
/// ```
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Delay between a transport drop and the next dial attempt. The
    /// same delay paces retries while no credential is available.
    ///
    /// Defaults to **3 seconds**. Fixed, not exponential: only one scope
    /// is ever live, so reconnect storms are already bounded.
    pub reconnect_delay: Duration,
    /// Capacity of each subscriber's event queue.
    ///
    /// When a subscriber cannot keep up, events are dropped (with a
    /// warning logged) to avoid blocking the transport loop. The final
    /// `Disconnected` event is always delivered regardless of capacity.
    ///
    /// Defaults to **256**. Values below 1 are clamped to 1.
    pub subscriber_capacity: usize,
    /// Timeout for the graceful shutdown in [`EventChannel::close`].
    /// If the loop does not exit in time the task is aborted.
    ///
    /// Defaults to **1 second**.
    pub shutdown_timeout: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            subscriber_capacity: DEFAULT_SUBSCRIBER_CAPACITY,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }
}

impl ChannelConfig {
    /// Set the reconnect delay.
    #[must_use]
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Set the subscriber queue capacity. Values below 1 are clamped to 1.
    #[must_use]
    pub fn with_subscriber_capacity(mut self, capacity: usize) -> Self {
        self.subscriber_capacity = capacity.max(1);
        self
    }

    /// Set the graceful shutdown timeout.
    #[must_use]
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

// ── Events and subscriptions ────────────────────────────────────────

/// What a subscriber observes on the channel.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// The transport dialed successfully and the authentication frame
    /// was sent. Emitted after every successful (re)connection; sessions
    /// re-fetch their snapshot when they see this after an outage.
    Connected,
    /// A decoded server event.
    Event(MineraceEvent),
    /// The transport dropped. A reconnect is already scheduled unless
    /// the channel is being closed.
    Disconnected {
        /// Human-readable cause, when one is known.
        reason: Option<String>,
    },
}

/// A handle to one subscriber's event queue.
///
/// Dropping the subscription unsubscribes implicitly (the channel prunes
/// closed queues on the next fan-out); [`EventChannel::unsubscribe`]
/// removes it immediately.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    rx: mpsc::Receiver<ChannelEvent>,
}

impl Subscription {
    /// Receive the next event, or `None` once the channel is closed.
    pub async fn recv(&mut self) -> Option<ChannelEvent> {
        self.rx.recv().await
    }
}

// ── Shared state ────────────────────────────────────────────────────

struct ChannelShared {
    subscribers: StdMutex<Vec<(u64, mpsc::Sender<ChannelEvent>)>>,
    next_subscriber_id: AtomicU64,
    connected: AtomicBool,
    subscriber_capacity: usize,
}

impl ChannelShared {
    fn lock_subscribers(
        &self,
    ) -> std::sync::MutexGuard<'_, Vec<(u64, mpsc::Sender<ChannelEvent>)>> {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

// ── Channel handle ──────────────────────────────────────────────────

/// The connection manager: one logical event channel with automatic
/// reconnect and subscriber fan-out.
///
/// Created via [`EventChannel::open`], which spawns a background loop
/// and returns the handle together with the primary [`Subscription`].
pub struct EventChannel {
    shared: Arc<ChannelShared>,
    task: Option<tokio::task::JoinHandle<()>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    shutdown_timeout: Duration,
}

impl EventChannel {
    /// Open the channel: spawn the background loop and return the handle
    /// plus the primary subscription (created before the loop starts, so
    /// it cannot miss the first `Connected`).
    ///
    /// If no credential is available, dialing is postponed — silently,
    /// not as an error — and retried on the reconnect schedule until a
    /// credential appears or the channel is closed.
    #[must_use = "the subscription must be consumed to observe events"]
    pub fn open(
        connector: impl Connector,
        credentials: Arc<dyn CredentialSource>,
        config: ChannelConfig,
    ) -> (Self, Subscription) {
        let shared = Arc::new(ChannelShared {
            subscribers: StdMutex::new(Vec::new()),
            next_subscriber_id: AtomicU64::new(0),
            connected: AtomicBool::new(false),
            subscriber_capacity: config.subscriber_capacity.max(1),
        });
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let channel = Self {
            shared: Arc::clone(&shared),
            task: None,
            shutdown_tx: Some(shutdown_tx),
            shutdown_timeout: config.shutdown_timeout,
        };
        let subscription = channel.subscribe();

        let mut channel = channel;
        channel.task = Some(tokio::spawn(channel_loop(
            connector,
            credentials,
            shared,
            shutdown_rx,
            config,
        )));

        (channel, subscription)
    }

    /// Register an additional subscriber.
    ///
    /// Subscribers added after the channel connects join mid-stream:
    /// they observe events from this point on, not a replay.
    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::channel(self.shared.subscriber_capacity);
        let id = self.shared.next_subscriber_id.fetch_add(1, Ordering::Relaxed);
        self.shared.lock_subscribers().push((id, tx));
        Subscription { id, rx }
    }

    /// Remove a subscriber immediately. Equivalent to dropping the
    /// subscription, minus the wait for the next fan-out to prune it.
    pub fn unsubscribe(&self, subscription: Subscription) {
        self.shared
            .lock_subscribers()
            .retain(|(id, _)| *id != subscription.id);
    }

    /// Returns `true` while a transport is live and authenticated.
    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Acquire)
    }

    /// Shut the channel down cleanly: no further reconnect attempts, the
    /// pending backoff timer is cancelled, and the subscriber list is
    /// cleared (receivers observe end-of-stream).
    pub async fn close(&mut self) {
        debug!("EventChannel: close requested");

        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        // Await the loop with a timeout. If it doesn't exit in time,
        // abort it so the task cannot detach and run indefinitely.
        if let Some(mut task) = self.task.take() {
            match tokio::time::timeout(self.shutdown_timeout, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(join_err)) => {
                    warn!("channel loop terminated with join error: {join_err}");
                }
                Err(_) => {
                    warn!("channel loop did not exit within timeout; aborting task");
                    task.abort();
                    if let Err(join_err) = task.await {
                        debug!("channel loop aborted: {join_err}");
                    }
                }
            }
        }

        self.shared.connected.store(false, Ordering::Release);
        // The one place the subscriber list is cleared.
        self.shared.lock_subscribers().clear();
    }
}

impl std::fmt::Debug for EventChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventChannel")
            .field("connected", &self.is_connected())
            .field("subscribers", &self.shared.lock_subscribers().len())
            .field("has_task", &self.task.is_some())
            .finish()
    }
}

impl Drop for EventChannel {
    fn drop(&mut self) {
        // `Drop` is synchronous so we cannot await a graceful shutdown.
        // Aborting the spawned task drops the loop future immediately;
        // the shutdown oneshot is intentionally not sent here because
        // there is no executor context to drive the graceful path.
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

// ── Channel loop ────────────────────────────────────────────────────

enum Wait {
    Elapsed,
    Shutdown,
}

/// Sleep for `delay`, waking early if shutdown is requested.
async fn sleep_or_shutdown(delay: Duration, shutdown_rx: &mut oneshot::Receiver<()>) -> Wait {
    tokio::select! {
        _ = tokio::time::sleep(delay) => Wait::Elapsed,
        _ = &mut *shutdown_rx => Wait::Shutdown,
    }
}

/// Background loop: dial, authenticate, pump frames, reconnect.
///
/// Exits when shutdown is signalled (or the handle is dropped, which
/// closes the oneshot). Every observation of the shutdown signal leads
/// straight to an exit, so the oneshot is never polled after completion.
async fn channel_loop(
    connector: impl Connector,
    credentials: Arc<dyn CredentialSource>,
    shared: Arc<ChannelShared>,
    mut shutdown_rx: oneshot::Receiver<()>,
    config: ChannelConfig,
) {
    debug!("channel loop started");

    loop {
        // Credential gate: without a token the dial would be rejected
        // anyway, so skip it silently and retry on the same schedule.
        let Some(token) = credentials.token() else {
            debug!("no credential available, postponing dial");
            match sleep_or_shutdown(config.reconnect_delay, &mut shutdown_rx).await {
                Wait::Elapsed => continue,
                Wait::Shutdown => break,
            }
        };

        let mut transport = match connector.connect().await {
            Ok(t) => t,
            Err(e) => {
                warn!("dial failed: {e}");
                match sleep_or_shutdown(config.reconnect_delay, &mut shutdown_rx).await {
                    Wait::Elapsed => continue,
                    Wait::Shutdown => break,
                }
            }
        };

        // The authentication frame is the first and only outbound frame
        // on this channel. There is no explicit ack: the server either
        // starts forwarding events or closes the transport.
        let auth_frame = match serde_json::to_string(&AuthFrame { token }) {
            Ok(json) => json,
            Err(e) => {
                error!("failed to serialize auth frame: {e}");
                break;
            }
        };
        if let Err(e) = transport.send(auth_frame).await {
            warn!("failed to send auth frame: {e}");
            let _ = transport.close().await;
            match sleep_or_shutdown(config.reconnect_delay, &mut shutdown_rx).await {
                Wait::Elapsed => continue,
                Wait::Shutdown => break,
            }
        }

        shared.connected.store(true, Ordering::Release);
        broadcast(&shared, ChannelEvent::Connected);
        debug!("channel connected, auth frame sent");

        // Pump frames until the transport drops or shutdown is requested.
        let mut deliberate = false;
        let reason = loop {
            tokio::select! {
                _ = &mut shutdown_rx => {
                    deliberate = true;
                    break Some("channel closed".to_string());
                }

                incoming = transport.recv() => match incoming {
                    Some(Ok(text)) => match decode_frame(&text) {
                        Decoded::Event(event) => {
                            broadcast(&shared, ChannelEvent::Event(event));
                        }
                        // Keep-alives and undecodable frames carry nothing
                        // for subscribers.
                        Decoded::KeepAlive | Decoded::Skipped => {}
                    },
                    Some(Err(e)) => {
                        warn!("transport receive error: {e}");
                        break Some(e.to_string());
                    }
                    None => {
                        debug!("transport closed by server");
                        break None;
                    }
                },
            }
        };

        shared.connected.store(false, Ordering::Release);
        if deliberate {
            let _ = transport.close().await;
        }
        broadcast_final(&shared, ChannelEvent::Disconnected { reason }).await;

        if deliberate {
            break;
        }

        debug!(delay_ms = config.reconnect_delay.as_millis() as u64, "scheduling reconnect");
        match sleep_or_shutdown(config.reconnect_delay, &mut shutdown_rx).await {
            Wait::Elapsed => continue,
            Wait::Shutdown => break,
        }
    }

    debug!("channel loop exited");
}

/// Fan an event out to every live subscriber, in registration order.
/// A full queue drops the event for that subscriber; a closed queue is
/// pruned.
fn broadcast(shared: &ChannelShared, event: ChannelEvent) {
    let mut subscribers = shared.lock_subscribers();
    subscribers.retain(|(id, tx)| match tx.try_send(event.clone()) {
        Ok(()) => true,
        Err(mpsc::error::TrySendError::Full(_)) => {
            warn!(subscriber = *id, "subscriber queue full, dropping event");
            true
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            debug!(subscriber = *id, "subscriber dropped, pruning");
            false
        }
    });
}

/// Deliver a final event with backpressure instead of `try_send`: the
/// `Disconnected` marker must never be silently dropped.
async fn broadcast_final(shared: &ChannelShared, event: ChannelEvent) {
    let senders: Vec<mpsc::Sender<ChannelEvent>> = shared
        .lock_subscribers()
        .iter()
        .map(|(_, tx)| tx.clone())
        .collect();

    for tx in senders {
        if tx.send(event.clone()).await.is_err() {
            debug!("subscriber dropped before final event");
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
    use crate::credentials::MemoryCredentials;
    use crate::error::MineraceError;
    use crate::event::{MineraceEvent, NEW_MESSAGE, START_GAME};
    use crate::transport::Transport;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;

    // ── Mock transport and connector ────────────────────────────────

    struct MockTransport {
        incoming: VecDeque<Option<Result<String, MineraceError>>>,
        sent: Arc<StdMutex<Vec<String>>>,
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn send(&mut self, message: String) -> Result<(), MineraceError> {
            self.sent.lock().unwrap().push(message);
            Ok(())
        }

        async fn recv(&mut self) -> Option<Result<String, MineraceError>> {
            if let Some(item) = self.incoming.pop_front() {
                item
            } else {
                // Scripted frames exhausted — stay open until shutdown.
                std::future::pending().await
            }
        }

        async fn close(&mut self) -> Result<(), MineraceError> {
            Ok(())
        }
    }

    /// Hands out scripted transports in order and counts dials.
    struct MockConnector {
        scripts: StdMutex<VecDeque<Vec<Option<Result<String, MineraceError>>>>>,
        dials: Arc<AtomicUsize>,
        sent: Arc<StdMutex<Vec<String>>>,
    }

    impl MockConnector {
        fn new(
            scripts: Vec<Vec<Option<Result<String, MineraceError>>>>,
        ) -> (Self, Arc<AtomicUsize>, Arc<StdMutex<Vec<String>>>) {
            let dials = Arc::new(AtomicUsize::new(0));
            let sent = Arc::new(StdMutex::new(Vec::new()));
            (
                Self {
                    scripts: StdMutex::new(VecDeque::from(scripts)),
                    dials: Arc::clone(&dials),
                    sent: Arc::clone(&sent),
                },
                dials,
                sent,
            )
        }
    }

    #[async_trait]
    impl Connector for MockConnector {
        async fn connect(&self) -> Result<Box<dyn Transport>, MineraceError> {
            self.dials.fetch_add(1, Ordering::SeqCst);
            let script = self.scripts.lock().unwrap().pop_front();
            match script {
                Some(incoming) => Ok(Box::new(MockTransport {
                    incoming: VecDeque::from(incoming),
                    sent: Arc::clone(&self.sent),
                })),
                None => Err(MineraceError::TransportClosed),
            }
        }
    }

    // ── Fixtures ────────────────────────────────────────────────────

    fn started_frame(id: &str) -> String {
        serde_json::json!({
            "status": "OK",
            "event_type": START_GAME,
            "payload": {"id": id},
        })
        .to_string()
    }

    fn message_frame(id: &str, text: &str) -> String {
        serde_json::json!({
            "status": "OK",
            "event_type": NEW_MESSAGE,
            "payload": {
                "id": id, "creator_id": 1, "creator_username": "a",
                "text": text, "created_at": "2025-05-17T10:00:00Z"
            },
        })
        .to_string()
    }

    fn creds() -> Arc<dyn CredentialSource> {
        Arc::new(MemoryCredentials::with_token("tok123"))
    }

    // ── Tests ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn auth_frame_is_first_and_only_outbound_frame() {
        let (connector, _dials, sent) =
            MockConnector::new(vec![vec![Some(Ok(started_frame("r1")))]]);

        let (mut channel, mut sub) =
            EventChannel::open(connector, creds(), ChannelConfig::default());

        assert_eq!(sub.recv().await, Some(ChannelEvent::Connected));
        let _ = sub.recv().await; // MatchStarted

        {
            let sent = sent.lock().unwrap();
            assert_eq!(sent.len(), 1);
            let frame: AuthFrame = serde_json::from_str(&sent[0]).unwrap();
            assert_eq!(frame.token, "tok123");
        }

        channel.close().await;
    }

    #[tokio::test]
    async fn events_are_decoded_and_fanned_out_in_order() {
        let (connector, _dials, _sent) = MockConnector::new(vec![vec![
            Some(Ok(started_frame("r1"))),
            Some(Ok(message_frame("m1", "hello"))),
        ]]);

        let (mut channel, mut sub) =
            EventChannel::open(connector, creds(), ChannelConfig::default());
        let mut second = channel.subscribe();

        for sub in [&mut sub, &mut second] {
            assert_eq!(sub.recv().await, Some(ChannelEvent::Connected));
            assert!(matches!(
                sub.recv().await,
                Some(ChannelEvent::Event(MineraceEvent::MatchStarted { .. }))
            ));
            assert!(matches!(
                sub.recv().await,
                Some(ChannelEvent::Event(MineraceEvent::ChatMessage(_)))
            ));
        }

        channel.close().await;
    }

    #[tokio::test]
    async fn keep_alives_and_undecodable_frames_are_filtered() {
        let (connector, _dials, _sent) = MockConnector::new(vec![vec![
            Some(Ok("ping".to_string())),
            Some(Ok(String::new())),
            Some(Ok("{broken".to_string())),
            Some(Ok(
                serde_json::json!({"status": "OK", "event_type": "TELEPORT", "payload": {}})
                    .to_string(),
            )),
            Some(Ok(started_frame("r1"))),
        ]]);

        let (mut channel, mut sub) =
            EventChannel::open(connector, creds(), ChannelConfig::default());

        assert_eq!(sub.recv().await, Some(ChannelEvent::Connected));
        // The first real event must be MatchStarted — everything before
        // it was dropped without reaching subscribers.
        assert_eq!(
            sub.recv().await,
            Some(ChannelEvent::Event(MineraceEvent::MatchStarted {
                id: "r1".into()
            }))
        );

        channel.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn reconnects_after_transport_drop_and_subscription_survives() {
        let (connector, dials, _sent) = MockConnector::new(vec![
            // First dial: one event, then a clean server-side close.
            vec![Some(Ok(started_frame("r1"))), None],
            // Second dial: another event, then stay open.
            vec![Some(Ok(message_frame("m1", "back")))],
        ]);

        let (mut channel, mut sub) =
            EventChannel::open(connector, creds(), ChannelConfig::default());

        assert_eq!(sub.recv().await, Some(ChannelEvent::Connected));
        assert!(matches!(
            sub.recv().await,
            Some(ChannelEvent::Event(MineraceEvent::MatchStarted { .. }))
        ));
        assert!(matches!(
            sub.recv().await,
            Some(ChannelEvent::Disconnected { .. })
        ));

        // The same subscription keeps working across the reconnect.
        assert_eq!(sub.recv().await, Some(ChannelEvent::Connected));
        assert!(matches!(
            sub.recv().await,
            Some(ChannelEvent::Event(MineraceEvent::ChatMessage(_)))
        ));
        assert_eq!(dials.load(Ordering::SeqCst), 2);

        channel.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn close_before_reconnect_timer_cancels_it() {
        let (connector, dials, _sent) = MockConnector::new(vec![
            // Server closes immediately after the first event.
            vec![Some(Ok(started_frame("r1"))), None],
            vec![],
        ]);

        let (mut channel, mut sub) =
            EventChannel::open(connector, creds(), ChannelConfig::default());

        assert_eq!(sub.recv().await, Some(ChannelEvent::Connected));
        let _ = sub.recv().await; // MatchStarted
        assert!(matches!(
            sub.recv().await,
            Some(ChannelEvent::Disconnected { .. })
        ));

        // The loop is now sleeping before its second dial; closing the
        // channel must cancel that timer.
        channel.close().await;
        assert_eq!(dials.load(Ordering::SeqCst), 1);

        // Subscriber list was cleared at close: the stream has ended.
        assert_eq!(sub.recv().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_credential_postpones_dial_until_available() {
        let (connector, dials, _sent) =
            MockConnector::new(vec![vec![Some(Ok(started_frame("r1")))]]);
        let credentials = Arc::new(MemoryCredentials::new());

        let (mut channel, mut sub) = EventChannel::open(
            connector,
            Arc::clone(&credentials) as Arc<dyn CredentialSource>,
            ChannelConfig::default(),
        );

        // Give the loop a few retry cycles with no token present.
        tokio::time::sleep(Duration::from_secs(7)).await;
        assert_eq!(dials.load(Ordering::SeqCst), 0);

        // Once a token appears the next cycle dials.
        credentials.store("late-token".into());
        assert_eq!(sub.recv().await, Some(ChannelEvent::Connected));
        assert_eq!(dials.load(Ordering::SeqCst), 1);

        channel.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn failed_dial_is_retried_on_schedule() {
        // No scripts at all: every dial fails.
        let (connector, dials, _sent) = MockConnector::new(vec![]);
        let (mut channel, _sub) =
            EventChannel::open(connector, creds(), ChannelConfig::default());

        tokio::time::sleep(Duration::from_secs(10)).await;
        // Initial dial plus at least two retries in ten seconds.
        assert!(dials.load(Ordering::SeqCst) >= 3);

        channel.close().await;
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let (connector, _dials, _sent) =
            MockConnector::new(vec![vec![Some(Ok(started_frame("r1")))]]);

        let (mut channel, mut sub) =
            EventChannel::open(connector, creds(), ChannelConfig::default());
        let extra = channel.subscribe();
        channel.unsubscribe(extra);

        assert_eq!(sub.recv().await, Some(ChannelEvent::Connected));
        assert!(matches!(
            sub.recv().await,
            Some(ChannelEvent::Event(MineraceEvent::MatchStarted { .. }))
        ));

        channel.close().await;
    }

    #[tokio::test]
    async fn disconnected_is_delivered_despite_full_queue() {
        let frames: Vec<Option<Result<String, MineraceError>>> = (0..8)
            .map(|i| Some(Ok(message_frame(&format!("m{i}"), "spam"))))
            .chain([None])
            .collect();
        let (connector, _dials, _sent) = MockConnector::new(vec![frames, vec![]]);

        let (mut channel, mut sub) = EventChannel::open(
            connector,
            creds(),
            ChannelConfig::default().with_subscriber_capacity(1),
        );

        // Drain everything that arrives; the final Disconnected must be
        // among the delivered events even though the queue overflowed.
        let mut saw_disconnected = false;
        for _ in 0..16 {
            match sub.recv().await {
                Some(ChannelEvent::Disconnected { .. }) => {
                    saw_disconnected = true;
                    break;
                }
                Some(_) => {}
                None => break,
            }
        }
        assert!(saw_disconnected);

        channel.close().await;
    }

    #[tokio::test]
    async fn double_close_does_not_panic() {
        let (connector, _dials, _sent) =
            MockConnector::new(vec![vec![Some(Ok(started_frame("r1")))]]);

        let (mut channel, mut sub) =
            EventChannel::open(connector, creds(), ChannelConfig::default());
        let _ = sub.recv().await;

        channel.close().await;
        channel.close().await;
    }

    #[tokio::test]
    async fn is_connected_tracks_transport_state() {
        let (connector, _dials, _sent) =
            MockConnector::new(vec![vec![Some(Ok(started_frame("r1")))]]);

        let (mut channel, mut sub) =
            EventChannel::open(connector, creds(), ChannelConfig::default());

        assert_eq!(sub.recv().await, Some(ChannelEvent::Connected));
        assert!(channel.is_connected());

        channel.close().await;
        assert!(!channel.is_connected());
    }

    #[tokio::test]
    async fn drop_without_close_aborts_the_loop() {
        let (connector, _dials, _sent) =
            MockConnector::new(vec![vec![Some(Ok(started_frame("r1")))]]);

        let (channel, mut sub) = EventChannel::open(connector, creds(), ChannelConfig::default());

        assert_eq!(sub.recv().await, Some(ChannelEvent::Connected));
        drop(channel);

        // The loop is aborted; the subscription ends without hanging.
        while sub.recv().await.is_some() {}
    }
}
