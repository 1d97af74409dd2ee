//! The process-wide realtime channel.
//!
//! [`TransportAdapter`] owns at most one live [`Connection`] and a
//! supervisor task that dials, waits for the server handshake, pumps
//! inbound events to subscribers and redials on loss.
//!
//! # Reconnection
//!
//! After a lost or failed connection the supervisor retries up to
//! [`ReconnectPolicy::attempts`] times, sleeping [`ReconnectPolicy::delay_for`]
//! between tries. A successful connect resets the counter. When the budget
//! is spent the adapter reports [`TransportEvent::ReconnectFailed`] and
//! stays down until [`TransportAdapter::connect`] is called again.
//!
//! Session state is never resumed here; subscribers re-derive it from the
//! next server push.
//!
//! # Outbox
//!
//! Commands emitted while down go to a bounded [`Outbox`]. The outbox is
//! drained under the same lock that publishes a new link, so each queued
//! command is written once and in order.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::connect_async;
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::error::{Error, Result};
use crate::identifiers::{SenderId, SubscriptionId};
use crate::protocol::{Command, Event, ParsedEvent};

use super::connection::{Connection, LoopExit};
use super::emitter::Emitter;
use super::outbox::Outbox;

// ============================================================================
// Constants
// ============================================================================

/// Subscription name matching every event.
pub const ANY_EVENT: &str = "*";

/// Default realtime server URL.
pub const DEFAULT_SERVER_URL: &str = "ws://localhost:5002";

/// Default number of reconnection attempts.
pub const DEFAULT_RECONNECT_ATTEMPTS: u32 = 5;

/// Default delay between reconnection attempts.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Default timeout for opening the socket.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default timeout for the `connected` handshake.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Default outbox capacity.
pub const DEFAULT_OUTBOX_CAPACITY: usize = 1024;

// ============================================================================
// Options
// ============================================================================

/// Delay growth between reconnection attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backoff {
    /// Same delay before every attempt.
    #[default]
    Fixed,
    /// Delay doubles per attempt, capped at `max`.
    Exponential {
        /// Upper bound for a single delay.
        max: Duration,
    },
}

/// Bounded reconnection policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Attempts after a failure before giving up.
    pub attempts: u32,
    /// Base delay.
    pub delay: Duration,
    /// Growth of the delay.
    pub backoff: Backoff,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_RECONNECT_ATTEMPTS,
            delay: DEFAULT_RECONNECT_DELAY,
            backoff: Backoff::Fixed,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before the given attempt (1-based).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed => self.delay,
            Backoff::Exponential { max } => {
                let shift = attempt.saturating_sub(1).min(16);
                self.delay.saturating_mul(1 << shift).min(max)
            }
        }
    }
}

/// Transport configuration.
#[derive(Debug, Clone)]
pub struct TransportOptions {
    /// WebSocket endpoint of the realtime server.
    pub server_url: Url,
    /// Reconnection policy.
    pub reconnect: ReconnectPolicy,
    /// Timeout for opening the socket.
    pub connect_timeout: Duration,
    /// Timeout for the `connected` handshake.
    pub handshake_timeout: Duration,
    /// Commands held while disconnected.
    pub outbox_capacity: usize,
}

impl TransportOptions {
    /// Creates options for a server URL with default policy.
    #[must_use]
    pub fn new(server_url: Url) -> Self {
        Self {
            server_url,
            reconnect: ReconnectPolicy::default(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            outbox_capacity: DEFAULT_OUTBOX_CAPACITY,
        }
    }
}

// ============================================================================
// State and Events
// ============================================================================

/// Observable channel status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No socket and no dialing.
    Disconnected,
    /// Dialing, handshaking or waiting to retry.
    Connecting,
    /// Handshake complete.
    Connected,
}

/// Events delivered to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Handshake completed.
    Connected {
        /// Server-issued channel ID.
        sid: SenderId,
        /// Whether an earlier connection preceded this one.
        reconnected: bool,
    },
    /// A live connection was lost or closed.
    Disconnected {
        /// Why the connection ended.
        reason: String,
    },
    /// The supervisor is about to redial.
    ReconnectAttempt {
        /// Attempt number (1-based).
        attempt: u32,
        /// Attempts allowed.
        max: u32,
    },
    /// Every reconnection attempt failed.
    ReconnectFailed {
        /// Attempts made.
        attempts: u32,
    },
    /// A server push.
    Message(Event),
}

impl TransportEvent {
    /// Name used for subscriptions.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Connected { .. } => "connect",
            Self::Disconnected { .. } => "disconnect",
            Self::ReconnectAttempt { .. } => "reconnect_attempt",
            Self::ReconnectFailed { .. } => "reconnect_failed",
            Self::Message(event) => &event.event,
        }
    }
}

/// Subscriber callback.
pub type EventHandler = Arc<dyn Fn(&TransportEvent) + Send + Sync>;

/// Supervisor-side link status.
#[derive(Debug, Clone, PartialEq, Eq)]
enum LinkState {
    Idle,
    Connecting,
    Connected(SenderId),
    Exhausted(u32),
}

// ============================================================================
// TransportAdapter
// ============================================================================

/// Shared handle to the single realtime channel.
///
/// Cloning is cheap; clones share the channel, outbox and subscribers.
///
/// # Example
///
/// ```ignore
/// let adapter = TransportAdapter::new(TransportOptions::new(url));
/// adapter.on("knot_started", |event| println!("{event:?}"));
/// let sid = adapter.connect().await?;
/// adapter.emit(Command::ClaimStar { star_id: "s1".into() })?;
/// ```
#[derive(Clone)]
pub struct TransportAdapter {
    inner: Arc<AdapterInner>,
}

struct AdapterInner {
    options: TransportOptions,
    link_tx: watch::Sender<LinkState>,
    link: Mutex<Option<Connection>>,
    outbox: Mutex<Outbox>,
    handlers: RwLock<FxHashMap<String, Vec<(SubscriptionId, EventHandler)>>>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

// ============================================================================
// TransportAdapter - Public API
// ============================================================================

impl TransportAdapter {
    /// Creates a disconnected adapter.
    #[must_use]
    pub fn new(options: TransportOptions) -> Self {
        let (link_tx, _) = watch::channel(LinkState::Idle);
        let outbox = Outbox::new(options.outbox_capacity);

        Self {
            inner: Arc::new(AdapterInner {
                options,
                link_tx,
                link: Mutex::new(None),
                outbox: Mutex::new(outbox),
                handlers: RwLock::new(FxHashMap::default()),
                supervisor: Mutex::new(None),
            }),
        }
    }

    /// Connects, or waits for the connection already in progress.
    ///
    /// Idempotent: when already connected this returns the current ID
    /// immediately.
    ///
    /// # Errors
    ///
    /// - [`Error::ReconnectExhausted`] if every attempt failed
    /// - [`Error::ConnectionClosed`] if [`disconnect`](Self::disconnect)
    ///   was called while waiting
    pub async fn connect(&self) -> Result<SenderId> {
        let mut link_rx = self.inner.link_tx.subscribe();
        self.ensure_supervisor();

        loop {
            let state = link_rx.borrow_and_update().clone();
            match state {
                LinkState::Connected(sid) => return Ok(sid),
                LinkState::Exhausted(attempts) => return Err(Error::reconnect_exhausted(attempts)),
                LinkState::Idle => return Err(Error::ConnectionClosed),
                LinkState::Connecting => {}
            }

            if link_rx.changed().await.is_err() {
                return Err(Error::ConnectionClosed);
            }
        }
    }

    /// Closes the channel and stops reconnecting.
    ///
    /// Queued commands stay in the outbox for the next connect. Frames the
    /// stopped connection had not written yet are discarded.
    pub fn disconnect(&self) {
        if let Some(handle) = self.inner.supervisor.lock().take() {
            handle.abort();
        }
        if let Some(connection) = self.inner.link.lock().take() {
            connection.shutdown();
        }

        let previous = self.inner.link_tx.send_replace(LinkState::Idle);
        if matches!(previous, LinkState::Connected(_)) {
            info!("Channel closed by client");
            self.inner.dispatch(&TransportEvent::Disconnected {
                reason: "client disconnect".to_string(),
            });
        }
    }

    /// Sends a command, or queues it until the next connect.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutboxFull`] if the command had to be queued and
    /// the outbox is at capacity.
    pub fn emit(&self, command: Command) -> Result<()> {
        let name = command.name();
        let link = self.inner.link.lock();

        let command = match link.as_ref() {
            Some(connection) => match connection.try_send(command) {
                Ok(()) => {
                    trace!(event = name, "Command handed to connection");
                    return Ok(());
                }
                Err(command) => command,
            },
            None => command,
        };

        let mut outbox = self.inner.outbox.lock();
        outbox.push(command)?;
        debug!(event = name, queued = outbox.len(), "Command queued until next connect");
        Ok(())
    }

    /// Subscribes to events named `name`, or every event with `"*"`.
    ///
    /// Handlers run on the adapter's task, one event at a time, and must
    /// not block.
    pub fn on<F>(&self, name: &str, handler: F) -> SubscriptionId
    where
        F: Fn(&TransportEvent) + Send + Sync + 'static,
    {
        let id = SubscriptionId::next();
        self.inner
            .handlers
            .write()
            .entry(name.to_string())
            .or_default()
            .push((id, Arc::new(handler)));
        trace!(%id, name, "Subscribed");
        id
    }

    /// Removes a subscription. Returns `false` if it was not registered.
    pub fn off(&self, id: SubscriptionId) -> bool {
        let mut handlers = self.inner.handlers.write();
        let mut removed = false;
        handlers.retain(|_, list| {
            let before = list.len();
            list.retain(|(sub, _)| *sub != id);
            removed |= list.len() != before;
            !list.is_empty()
        });
        removed
    }

    /// Current channel status.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        match &*self.inner.link_tx.borrow() {
            LinkState::Idle | LinkState::Exhausted(_) => ConnectionState::Disconnected,
            LinkState::Connecting => ConnectionState::Connecting,
            LinkState::Connected(_) => ConnectionState::Connected,
        }
    }

    /// Server-issued ID of the live connection.
    #[must_use]
    pub fn channel_id(&self) -> Option<SenderId> {
        match &*self.inner.link_tx.borrow() {
            LinkState::Connected(sid) => Some(sid.clone()),
            _ => None,
        }
    }

    /// Returns `true` once the handshake has completed.
    #[inline]
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Number of commands waiting for the next connect.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.inner.outbox.lock().len()
    }

    /// Returns the transport options.
    #[inline]
    #[must_use]
    pub fn options(&self) -> &TransportOptions {
        &self.inner.options
    }

    /// Starts the supervisor unless one is already running.
    fn ensure_supervisor(&self) {
        let mut supervisor = self.inner.supervisor.lock();

        let running = supervisor.as_ref().is_some_and(|handle| !handle.is_finished());
        let exhausted = matches!(*self.inner.link_tx.borrow(), LinkState::Exhausted(_));
        if running && !exhausted {
            return;
        }

        self.inner.link_tx.send_replace(LinkState::Connecting);
        let inner = Arc::clone(&self.inner);
        *supervisor = Some(tokio::spawn(AdapterInner::supervise(inner)));
    }
}

impl Emitter for TransportAdapter {
    fn emit(&self, command: Command) -> Result<()> {
        TransportAdapter::emit(self, command)
    }

    fn local_id(&self) -> Option<SenderId> {
        self.channel_id()
    }
}

// ============================================================================
// AdapterInner - Supervisor
// ============================================================================

impl AdapterInner {
    /// Dial, pump and redial until connected for good or out of attempts.
    async fn supervise(self: Arc<Self>) {
        let policy = self.options.reconnect;
        let mut failures: u32 = 0;
        let mut connected_before = false;

        loop {
            self.link_tx.send_replace(LinkState::Connecting);

            match self.dial().await {
                Ok((connection, events, handle, sid)) => {
                    failures = 0;
                    self.install(connection);
                    info!(%sid, reconnected = connected_before, "Channel connected");
                    self.link_tx.send_replace(LinkState::Connected(sid.clone()));
                    self.dispatch(&TransportEvent::Connected {
                        sid,
                        reconnected: connected_before,
                    });
                    connected_before = true;

                    let exit = self.pump(events, handle).await;
                    self.uninstall(exit.unsent);
                    warn!(reason = %exit.reason, "Channel disconnected");
                    self.dispatch(&TransportEvent::Disconnected {
                        reason: exit.reason,
                    });
                }
                Err(e) => {
                    warn!(error = %e, url = %self.options.server_url, "Connect attempt failed");
                }
            }

            failures += 1;
            if failures > policy.attempts {
                warn!(attempts = policy.attempts, "Reconnection attempts exhausted");
                self.dispatch(&TransportEvent::ReconnectFailed {
                    attempts: policy.attempts,
                });
                self.link_tx
                    .send_replace(LinkState::Exhausted(policy.attempts));
                break;
            }

            let delay = policy.delay_for(failures);
            debug!(attempt = failures, max = policy.attempts, ?delay, "Scheduling reconnect");
            self.dispatch(&TransportEvent::ReconnectAttempt {
                attempt: failures,
                max: policy.attempts,
            });
            sleep(delay).await;
        }
    }

    /// Opens the socket and waits for the `connected` handshake.
    async fn dial(
        &self,
    ) -> Result<(
        Connection,
        mpsc::UnboundedReceiver<Event>,
        JoinHandle<LoopExit>,
        SenderId,
    )> {
        let url = self.options.server_url.as_str();
        debug!(url, "Dialing realtime server");

        let connect_timeout = self.options.connect_timeout;
        let (ws_stream, _) = timeout(connect_timeout, connect_async(url))
            .await
            .map_err(|_| Error::connection_timeout(connect_timeout.as_millis() as u64))??;

        let (connection, mut events, handle) = Connection::spawn(ws_stream);

        let handshake_timeout = self.options.handshake_timeout;
        let handshake = timeout(handshake_timeout, async {
            while let Some(event) = events.recv().await {
                match event.parse() {
                    ParsedEvent::Connected { sid } => return Ok(sid),
                    ParsedEvent::Error { message } => return Err(Error::server(message)),
                    ParsedEvent::Malformed { event, reason } if event == "connected" => {
                        return Err(Error::protocol(format!("bad handshake: {reason}")));
                    }
                    _ => trace!(event = %event.event, "Ignoring push before handshake"),
                }
            }
            Err(Error::ConnectionClosed)
        })
        .await
        .map_err(|_| Error::connection_timeout(handshake_timeout.as_millis() as u64))
        .and_then(|result| result);

        match handshake {
            Ok(sid) => Ok((connection, events, handle, sid)),
            Err(e) => {
                connection.shutdown();
                Err(e)
            }
        }
    }

    /// Forwards server pushes until the connection ends.
    async fn pump(
        &self,
        mut events: mpsc::UnboundedReceiver<Event>,
        handle: JoinHandle<LoopExit>,
    ) -> LoopExit {
        while let Some(event) = events.recv().await {
            if event.event == "connected" {
                debug!("Ignoring repeated handshake");
                continue;
            }
            self.dispatch(&TransportEvent::Message(event));
        }

        handle.await.unwrap_or_else(|e| LoopExit {
            reason: e.to_string(),
            unsent: Vec::new(),
        })
    }

    /// Installs a live connection and flushes the outbox into it.
    fn install(&self, connection: Connection) {
        let mut link = self.link.lock();
        let mut outbox = self.outbox.lock();

        let pending = outbox.drain();
        let flushed = pending.len();
        let mut returned = Vec::new();
        for command in pending {
            if !returned.is_empty() {
                returned.push(command);
                continue;
            }
            if let Err(command) = connection.try_send(command) {
                returned.push(command);
            }
        }

        if flushed > 0 {
            debug!(flushed, returned = returned.len(), "Outbox flushed");
        }
        outbox.requeue_front(returned);
        *link = Some(connection);
    }

    /// Drops the dead connection and re-queues what it never wrote.
    fn uninstall(&self, unsent: Vec<Command>) {
        let mut link = self.link.lock();
        *link = None;
        if !unsent.is_empty() {
            debug!(count = unsent.len(), "Re-queueing unsent commands");
        }
        self.outbox.lock().requeue_front(unsent);
        self.link_tx.send_replace(LinkState::Connecting);
    }

    /// Calls every handler subscribed to this event.
    fn dispatch(&self, event: &TransportEvent) {
        let handlers: Vec<EventHandler> = {
            let map = self.handlers.read();
            map.get(event.name())
                .into_iter()
                .chain(map.get(ANY_EVENT))
                .flatten()
                .map(|(_, handler)| Arc::clone(handler))
                .collect()
        };

        for handler in handlers {
            handler(event);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
