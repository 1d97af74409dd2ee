//! Knot client coordinator.
//!
//! [`KnotClient`] wires the shared channel to pairing and the session. A
//! single dispatcher task processes transport events one at a time, so
//! every push runs to completion against a consistent state. Local intents
//! take the same lock and never wait on the network.
//!
//! # Example
//!
//! ```no_run
//! use knot_client::KnotClient;
//!
//! # async fn example() -> knot_client::Result<()> {
//! let client = KnotClient::builder()
//!     .server_url("ws://localhost:5002")
//!     .build()?;
//! let mut events = client.take_events().expect("first call");
//!
//! client.connect().await?;
//! client.request_connection("star-42")?;
//!
//! while let Some(event) = events.recv().await {
//!     println!("{event:?}");
//! }
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::canvas::{Stroke, Tool};
use crate::chat::ChatMessage;
use crate::error::Result;
use crate::identifiers::{RequestId, RoomId, SenderId, StarId, SubscriptionId};
use crate::pairing::{ConnectionGateway, GatewayNotice, OwnedStars, PendingRequest};
use crate::protocol::ParsedEvent;
use crate::session::{SessionController, SessionNotice, SessionState, SessionStatus, Workspace};
use crate::transport::{ANY_EVENT, ConnectionState, Emitter, TransportAdapter, TransportEvent};

use super::builder::KnotClientBuilder;
use super::event::{ConnectionNotice, KnotEvent};
use super::options::ClientOptions;

// ============================================================================
// Constants
// ============================================================================

/// How often the dispatcher drops timed-out requests.
const EXPIRY_INTERVAL: Duration = Duration::from_secs(1);

// ============================================================================
// Types
// ============================================================================

/// Shared state behind every clone of a [`KnotClient`].
struct ClientInner {
    options: ClientOptions,
    adapter: TransportAdapter,
    state: Mutex<ClientState>,
    events_tx: mpsc::UnboundedSender<KnotEvent>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<KnotEvent>>>,
    dispatcher: Mutex<Option<Dispatcher>>,
}

/// Pairing and session, mutated only under the client lock.
struct ClientState {
    gateway: ConnectionGateway,
    session: SessionController,
    /// Star of the last incoming request the local owner accepted.
    accepted: Option<StarId>,
}

struct Dispatcher {
    subscription: SubscriptionId,
    task: JoinHandle<()>,
}

// ============================================================================
// KnotClient
// ============================================================================

/// Entry point of the pairing and session subsystem.
///
/// Cloning is cheap; clones share the channel and state.
#[derive(Clone)]
pub struct KnotClient {
    inner: Arc<ClientInner>,
}

impl fmt::Debug for KnotClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KnotClient")
            .field("server_url", &self.inner.options.server_url.as_str())
            .field("connection", &self.connection_state())
            .field("session", &self.session_status())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// KnotClient - Lifecycle
// ============================================================================

impl KnotClient {
    /// Creates a configuration builder.
    #[inline]
    #[must_use]
    pub fn builder() -> KnotClientBuilder {
        KnotClientBuilder::new()
    }

    /// Creates a disconnected client.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidStyle`](crate::Error::InvalidStyle) if the
    /// default brush is invalid.
    pub fn new(options: ClientOptions, owned: OwnedStars) -> Result<Self> {
        let brush = options.brush()?;
        let adapter = TransportAdapter::new(options.transport());
        let emitter: Arc<dyn Emitter> = Arc::new(adapter.clone());

        let state = ClientState {
            gateway: ConnectionGateway::new(
                Arc::clone(&emitter),
                owned,
                options.request_timeout,
            ),
            session: SessionController::new(emitter, brush, options.session()),
            accepted: None,
        };
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        Ok(Self {
            inner: Arc::new(ClientInner {
                options,
                adapter,
                state: Mutex::new(state),
                events_tx,
                events_rx: Mutex::new(Some(events_rx)),
                dispatcher: Mutex::new(None),
            }),
        })
    }

    /// Connects, or waits for the connection already in progress.
    ///
    /// Owned stars are re-claimed after this and every later reconnect.
    ///
    /// # Errors
    ///
    /// - [`Error::ReconnectExhausted`](crate::Error::ReconnectExhausted) if
    ///   every attempt failed
    /// - [`Error::ConnectionClosed`](crate::Error::ConnectionClosed) if
    ///   [`disconnect`](Self::disconnect) was called while waiting
    pub async fn connect(&self) -> Result<SenderId> {
        self.ensure_dispatcher();
        self.inner.adapter.connect().await
    }

    /// Closes the channel permanently.
    ///
    /// Only for leaving the realtime context; ending a session does not
    /// need it.
    pub fn disconnect(&self) {
        info!("Disconnecting client");
        self.inner.adapter.disconnect();
    }

    /// Takes the event stream. Returns `None` after the first call.
    ///
    /// Events buffer from construction until taken.
    #[must_use]
    pub fn take_events(&self) -> Option<mpsc::UnboundedReceiver<KnotEvent>> {
        self.inner.events_rx.lock().take()
    }

    /// Starts the dispatcher unless one is running.
    ///
    /// Besides transport events it expires timed-out requests once per
    /// [`EXPIRY_INTERVAL`].
    fn ensure_dispatcher(&self) {
        let mut slot = self.inner.dispatcher.lock();
        if slot.as_ref().is_some_and(|d| !d.task.is_finished()) {
            return;
        }
        if let Some(stale) = slot.take() {
            self.inner.adapter.off(stale.subscription);
        }

        let (tx, mut rx) = mpsc::unbounded_channel::<TransportEvent>();
        let subscription = self.inner.adapter.on(ANY_EVENT, move |event| {
            let _ = tx.send(event.clone());
        });

        let inner: Weak<ClientInner> = Arc::downgrade(&self.inner);
        let task = tokio::spawn(async move {
            let start = time::Instant::now() + EXPIRY_INTERVAL;
            let mut expiry = time::interval_at(start, EXPIRY_INTERVAL);
            expiry.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    event = rx.recv() => {
                        let Some(event) = event else { break };
                        let Some(inner) = inner.upgrade() else { break };
                        inner.dispatch(&event);
                    }
                    _ = expiry.tick() => {
                        let Some(inner) = inner.upgrade() else { break };
                        inner.expire_requests(time::Instant::now());
                    }
                }
            }
            debug!("Dispatcher stopped");
        });

        *slot = Some(Dispatcher { subscription, task });
    }
}

// ============================================================================
// KnotClient - Pairing
// ============================================================================

impl KnotClient {
    /// Declares the local user as the reachable owner of a star.
    ///
    /// Returns `true` if the star was newly added to the owned set.
    ///
    /// # Errors
    ///
    /// See [`ConnectionGateway::claim_star`].
    pub fn claim_star(&self, star_id: impl Into<StarId>) -> Result<bool> {
        self.inner.state.lock().gateway.claim_star(star_id.into())
    }

    /// Asks a star's owner for a Knot.
    ///
    /// # Errors
    ///
    /// See [`ConnectionGateway::request_connection`].
    pub fn request_connection(&self, star_id: impl Into<StarId>) -> Result<()> {
        let notices = self
            .inner
            .state
            .lock()
            .gateway
            .request_connection(star_id.into())?;
        self.inner.publish(notices);
        Ok(())
    }

    /// Accepts an incoming request. The session starts when the server
    /// pushes `knot_started`.
    ///
    /// # Errors
    ///
    /// See [`ConnectionGateway::accept_request`].
    pub fn accept_request(&self, request_id: &RequestId) -> Result<()> {
        let notice = {
            let mut state = self.inner.state.lock();
            let notice = state.gateway.accept_request(request_id)?;
            if let GatewayNotice::Accepted { star_id, .. } = &notice {
                state.accepted = Some(star_id.clone());
            }
            notice
        };
        self.inner.publish([notice]);
        Ok(())
    }

    /// Rejects an incoming request.
    ///
    /// # Errors
    ///
    /// See [`ConnectionGateway::reject_request`].
    pub fn reject_request(&self, request_id: &RequestId) -> Result<()> {
        let notice = self.inner.state.lock().gateway.reject_request(request_id)?;
        self.inner.publish([notice]);
        Ok(())
    }

    /// Stops claiming a star on future connects.
    ///
    /// # Errors
    ///
    /// See [`ConnectionGateway::release_star`].
    pub fn release_star(&self, star_id: &StarId) -> Result<bool> {
        self.inner.state.lock().gateway.release_star(star_id)
    }

    /// Drops requests older than the request timeout now. Returns how many.
    ///
    /// The dispatcher does this on its own once connected.
    pub fn expire_requests(&self) -> usize {
        self.inner.expire_requests(time::Instant::now())
    }

    /// Stars the local user owns, in claim order.
    #[must_use]
    pub fn owned_stars(&self) -> Vec<StarId> {
        self.inner
            .state
            .lock()
            .gateway
            .owned_stars()
            .iter()
            .cloned()
            .collect()
    }

    /// Outstanding requests sent by the local user.
    #[must_use]
    pub fn outgoing_requests(&self) -> Vec<PendingRequest> {
        self.inner.state.lock().gateway.outgoing().to_vec()
    }

    /// Outstanding requests for owned stars.
    #[must_use]
    pub fn incoming_requests(&self) -> Vec<PendingRequest> {
        self.inner
            .state
            .lock()
            .gateway
            .incoming()
            .into_iter()
            .cloned()
            .collect()
    }
}

// ============================================================================
// KnotClient - Session
// ============================================================================

impl KnotClient {
    /// Enters a Knot for a star, optionally in a known room.
    ///
    /// # Errors
    ///
    /// See [`SessionController::enter`].
    pub fn enter_knot(&self, star_id: impl Into<StarId>, room_id: Option<RoomId>) -> Result<()> {
        self.with_session(|session| session.enter(star_id.into(), room_id))
    }

    /// Leaves the current Knot.
    ///
    /// # Errors
    ///
    /// See [`SessionController::leave`].
    pub fn leave_knot(&self) -> Result<()> {
        self.with_session(SessionController::leave)
    }

    /// Dismisses the session and returns to idle.
    pub fn exit_knot(&self) {
        let notices = self.inner.state.lock().session.exit();
        self.inner.publish(notices);
    }

    /// Sends a chat message in the active session.
    ///
    /// # Errors
    ///
    /// See [`SessionController::send_chat`].
    pub fn send_chat(&self, text: &str) -> Result<ChatMessage> {
        self.inner.state.lock().session.send_chat(text)
    }

    /// Pointer pressed on the canvas.
    ///
    /// # Errors
    ///
    /// See [`SessionController::pointer_down`].
    pub fn pointer_down(&self, x: f64, y: f64) -> Result<()> {
        self.inner.state.lock().session.pointer_down(x, y)
    }

    /// Pointer moved on the canvas.
    ///
    /// # Errors
    ///
    /// See [`SessionController::pointer_move`].
    pub fn pointer_move(&self, x: f64, y: f64) -> Result<()> {
        self.inner.state.lock().session.pointer_move(x, y)
    }

    /// Pointer released.
    ///
    /// # Errors
    ///
    /// See [`SessionController::pointer_up`].
    pub fn pointer_up(&self) -> Result<()> {
        self.inner.state.lock().session.pointer_up()
    }

    /// Removes the most recent stroke. Returns `false` on an empty canvas.
    pub fn undo(&self) -> bool {
        self.inner.state.lock().session.undo().is_some()
    }

    /// Clears the canvas.
    ///
    /// # Errors
    ///
    /// See [`SessionController::clear_canvas`].
    pub fn clear_canvas(&self) -> Result<()> {
        self.inner.state.lock().session.clear_canvas()
    }

    /// Selects the pen color.
    ///
    /// # Errors
    ///
    /// See [`SessionController::set_color`].
    pub fn set_color(&self, color: &str) -> Result<()> {
        self.inner.state.lock().session.set_color(color)
    }

    /// Selects the pen width.
    ///
    /// # Errors
    ///
    /// See [`SessionController::set_width`].
    pub fn set_width(&self, width: f32) -> Result<()> {
        self.inner.state.lock().session.set_width(width)
    }

    /// Selects pen or eraser.
    pub fn set_tool(&self, tool: Tool) {
        self.inner.state.lock().session.set_tool(tool);
    }

    /// Runs a session intent and publishes its notices.
    fn with_session<F>(&self, intent: F) -> Result<()>
    where
        F: FnOnce(&mut SessionController) -> Result<Vec<SessionNotice>>,
    {
        let notices = intent(&mut self.inner.state.lock().session)?;
        self.inner.publish(notices);
        Ok(())
    }
}

// ============================================================================
// KnotClient - Snapshots
// ============================================================================

impl KnotClient {
    /// Current session state.
    #[must_use]
    pub fn session_state(&self) -> SessionState {
        self.inner.state.lock().session.state().clone()
    }

    /// Current session state tag.
    #[must_use]
    pub fn session_status(&self) -> SessionStatus {
        self.inner.state.lock().session.status()
    }

    /// Returns `true` while the session shows the reconnect indicator.
    #[must_use]
    pub fn is_reconnecting(&self) -> bool {
        self.inner.state.lock().session.is_reconnecting()
    }

    /// Smoothed remaining seconds for display. `None` unless active.
    #[must_use]
    pub fn display_remaining(&self) -> Option<u32> {
        self.inner
            .state
            .lock()
            .session
            .display_remaining(Instant::now())
    }

    /// Chat timeline of the current session.
    #[must_use]
    pub fn timeline(&self) -> Vec<ChatMessage> {
        self.with_workspace(|w| w.chat.timeline().to_vec())
            .unwrap_or_default()
    }

    /// Completed strokes of the current session.
    #[must_use]
    pub fn strokes(&self) -> Vec<Stroke> {
        self.with_workspace(|w| w.canvas.strokes().to_vec())
            .unwrap_or_default()
    }

    /// Reads the current workspace under the client lock.
    ///
    /// The closure must not call back into the client.
    pub fn with_workspace<R>(&self, read: impl FnOnce(&Workspace) -> R) -> Option<R> {
        self.inner.state.lock().session.workspace().map(read)
    }

    /// Channel status.
    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.inner.adapter.state()
    }

    /// Server-issued ID of the live channel.
    #[must_use]
    pub fn channel_id(&self) -> Option<SenderId> {
        self.inner.adapter.channel_id()
    }

    /// Commands waiting for the next connect.
    #[must_use]
    pub fn queued_commands(&self) -> usize {
        self.inner.adapter.queued()
    }

    /// Returns the client options.
    #[inline]
    #[must_use]
    pub fn options(&self) -> &ClientOptions {
        &self.inner.options
    }
}

// ============================================================================
// Dispatch
// ============================================================================

impl ClientInner {
    /// Applies one transport event and publishes the results.
    fn dispatch(&self, event: &TransportEvent) {
        let mut out: Vec<KnotEvent> = Vec::new();
        {
            let mut state = self.state.lock();
            match event {
                TransportEvent::Connected { sid, reconnected } => {
                    match state.gateway.reclaim_all() {
                        Ok(claimed) => debug!(%sid, claimed, "Owned stars reclaimed"),
                        Err(e) => warn!(%sid, error = %e, "Reclaiming owned stars failed"),
                    }
                    out.push(
                        ConnectionNotice::Connected {
                            sid: sid.clone(),
                            reconnected: *reconnected,
                        }
                        .into(),
                    );
                    if *reconnected {
                        extend(&mut out, state.session.on_transport_restored());
                    }
                }

                TransportEvent::Disconnected { reason } => {
                    out.push(
                        ConnectionNotice::Disconnected {
                            reason: reason.clone(),
                        }
                        .into(),
                    );
                    extend(&mut out, state.session.on_transport_lost());
                }

                TransportEvent::ReconnectAttempt { attempt, max } => {
                    out.push(
                        ConnectionNotice::Reconnecting {
                            attempt: *attempt,
                            max: *max,
                        }
                        .into(),
                    );
                }

                TransportEvent::ReconnectFailed { attempts } => {
                    out.push(ConnectionNotice::Failed { attempts: *attempts }.into());
                    extend(&mut out, state.session.on_transport_failed());
                }

                TransportEvent::Message(message) => state.route(&message.parse(), &mut out),
            }
        }
        self.publish(out);
    }

    /// Drops timed-out requests and publishes their notices.
    fn expire_requests(&self, now: time::Instant) -> usize {
        let notices = self.state.lock().gateway.expire(now);
        let count = notices.len();
        if count > 0 {
            debug!(count, "Requests expired");
        }
        self.publish(notices);
        count
    }

    fn publish<N: Into<KnotEvent>>(&self, notices: impl IntoIterator<Item = N>) {
        for notice in notices {
            if self.events_tx.send(notice.into()).is_err() {
                break;
            }
        }
    }
}

impl ClientState {
    /// Routes a server push to pairing, then to the session.
    fn route(&mut self, event: &ParsedEvent, out: &mut Vec<KnotEvent>) {
        match event {
            ParsedEvent::Malformed { event, reason } => {
                warn!(%event, %reason, "Ignoring malformed push");
                return;
            }
            ParsedEvent::Unknown { event, .. } => {
                debug!(%event, "Ignoring unknown push");
                return;
            }
            ParsedEvent::Connected { .. } => return,
            _ => {}
        }

        let pairing = self.gateway.handle(event);

        if let ParsedEvent::KnotStarted {
            room_id, star_id, ..
        } = event
        {
            let resolved = pairing
                .iter()
                .find_map(|notice| match notice {
                    GatewayNotice::Accepted { star_id, .. } => Some(star_id.clone()),
                    _ => None,
                })
                .or_else(|| self.accepted.take());
            extend(out, pairing);
            self.begin_session(room_id, star_id.clone(), resolved, out);
        } else if let ParsedEvent::Error { message } = event
            && claims_error(&pairing)
            && self.session.status() != SessionStatus::Connecting
        {
            debug!(%message, "Error resolved a pending request");
            extend(out, pairing);
            return;
        } else {
            extend(out, pairing);
        }

        extend(out, self.session.handle(event));
    }

    /// Enters the session a `knot_started` push opens when no attempt is
    /// in progress.
    ///
    /// An ended session is dismissed first only when the push answers a
    /// handshake this client took part in.
    fn begin_session(
        &mut self,
        room_id: &RoomId,
        star_id: Option<StarId>,
        resolved: Option<StarId>,
        out: &mut Vec<KnotEvent>,
    ) {
        match self.session.status() {
            SessionStatus::Idle => {}
            SessionStatus::Ended
                if resolved.is_some() && self.session.room_id() != Some(room_id) =>
            {
                extend(out, self.session.exit());
            }
            _ => return,
        }

        let Some(star_id) = star_id.or(resolved) else {
            warn!(%room_id, "Ignoring session start for an unknown star");
            return;
        };

        self.accepted = None;
        match self.session.enter(star_id, Some(room_id.clone())) {
            Ok(notices) => extend(out, notices),
            Err(e) => warn!(%room_id, error = %e, "Session start not entered"),
        }
    }
}

/// Returns `true` if pairing took an `error` push as a request failure.
fn claims_error(pairing: &[GatewayNotice]) -> bool {
    pairing
        .iter()
        .any(|notice| matches!(notice, GatewayNotice::Failed { .. }))
}

/// Appends component notices as client events.
fn extend<N: Into<KnotEvent>>(out: &mut Vec<KnotEvent>, notices: Vec<N>) {
    out.extend(notices.into_iter().map(Into::into));
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use futures_util::{SinkExt, StreamExt};
    use serde_json::{Value, json};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::time::timeout;
    use tokio_tungstenite::tungstenite::Message;
    use tokio_tungstenite::{WebSocketStream, accept_async};

    use crate::protocol::Event;
    use crate::session::EndReason;

    fn client() -> KnotClient {
        KnotClient::builder().build().expect("build")
    }

    fn push(client: &KnotClient, name: &str, data: Value) {
        client
            .inner
            .dispatch(&TransportEvent::Message(Event::new(name, data)));
    }

    fn drain(events: &mut mpsc::UnboundedReceiver<KnotEvent>) -> Vec<KnotEvent> {
        let mut out = Vec::new();
        while let Ok(event) = events.try_recv() {
            out.push(event);
        }
        out
    }

    fn transitions(events: &[KnotEvent]) -> Vec<(SessionStatus, SessionStatus)> {
        events
            .iter()
            .filter_map(|event| match event {
                KnotEvent::Session(SessionNotice::StateChanged { from, to }) => Some((*from, *to)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_take_events_once() {
        let client = client();
        assert!(client.take_events().is_some());
        assert!(client.take_events().is_none());
    }

    #[test]
    fn test_offline_intents_are_queued() {
        let client = client();
        assert!(client.claim_star("star-1").expect("claim"));
        client.request_connection("star-2").expect("request");

        // The claim goes out with the reclaim on connect
        assert_eq!(client.queued_commands(), 1);
        assert_eq!(client.owned_stars(), vec![StarId::from("star-1")]);
        assert_eq!(client.outgoing_requests().len(), 1);

        assert!(client.release_star(&StarId::from("star-1")).expect("release"));
        assert!(client.owned_stars().is_empty());
    }

    #[test]
    fn test_request_failure_keeps_active_session() {
        let client = client();
        let mut events = client.take_events().expect("events");
        client.enter_knot("star-1", None).expect("enter");
        push(&client, "knot_started", json!({ "room_id": "R1", "duration": 60 }));
        assert_eq!(client.session_status(), SessionStatus::Active);
        drain(&mut events);

        client.request_connection("star-offline").expect("request");
        push(
            &client,
            "error",
            json!({ "message": "The author of this star is not currently online." }),
        );

        assert_eq!(client.session_status(), SessionStatus::Active);
        assert!(client.outgoing_requests().is_empty());
        let events = drain(&mut events);
        assert!(events.iter().any(|e| matches!(
            e,
            KnotEvent::Pairing(GatewayNotice::Failed { star_id, .. }) if star_id.as_str() == "star-offline"
        )));
        assert!(
            !events
                .iter()
                .any(|e| matches!(e, KnotEvent::Session(SessionNotice::Error { .. })))
        );
    }

    #[test]
    fn test_unclaimed_error_reaches_session() {
        let client = client();
        let mut events = client.take_events().expect("events");
        client.enter_knot("star-1", None).expect("enter");
        push(&client, "knot_started", json!({ "room_id": "R1", "duration": 60 }));
        drain(&mut events);

        push(&client, "error", json!({ "message": "Invalid room." }));

        assert_eq!(client.session_status(), SessionStatus::Active);
        assert_eq!(
            drain(&mut events),
            vec![KnotEvent::Session(SessionNotice::Error {
                message: "Invalid room.".into()
            })]
        );
    }

    #[test]
    fn test_error_while_connecting_with_pending_request() {
        let client = client();
        client.request_connection("star-2").expect("request");
        client.enter_knot("star-1", None).expect("enter");

        push(&client, "error", json!({ "message": "Room not found." }));

        assert_eq!(client.session_status(), SessionStatus::Idle);
        assert!(client.outgoing_requests().is_empty());
    }

    #[test]
    fn test_reconnect_clears_indicator() {
        let client = client();
        let mut events = client.take_events().expect("events");
        client.enter_knot("star-1", None).expect("enter");
        push(&client, "knot_started", json!({ "room_id": "R1", "duration": 60 }));
        client.inner.dispatch(&TransportEvent::Disconnected {
            reason: "reset".into(),
        });
        assert!(client.is_reconnecting());
        drain(&mut events);

        client.inner.dispatch(&TransportEvent::Connected {
            sid: SenderId::from("sid-2"),
            reconnected: true,
        });

        assert!(!client.is_reconnecting());
        assert_eq!(client.session_status(), SessionStatus::Active);
        assert_eq!(
            drain(&mut events),
            vec![
                KnotEvent::Connection(ConnectionNotice::Connected {
                    sid: SenderId::from("sid-2"),
                    reconnected: true
                }),
                KnotEvent::Session(SessionNotice::Reconnecting(false)),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_requests_expire_without_polling() {
        let client = KnotClient::builder()
            .request_timeout(Duration::from_secs(30))
            .build()
            .expect("build");
        let mut events = client.take_events().expect("events");
        client.ensure_dispatcher();

        client.request_connection("star-1").expect("request");
        drain(&mut events);

        tokio::time::sleep(Duration::from_secs(29)).await;
        assert_eq!(client.outgoing_requests().len(), 1);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(client.outgoing_requests().is_empty());
        assert!(drain(&mut events).iter().any(|e| matches!(
            e,
            KnotEvent::Pairing(GatewayNotice::Expired { star_id, .. }) if star_id.as_str() == "star-1"
        )));
    }

    #[test]
    fn test_requester_flow_enters_session() {
        let client = client();
        let mut events = client.take_events().expect("events");
        client.request_connection("star-42").expect("request");

        push(
            &client,
            "knot_started",
            json!({ "room_id": "R1", "star_id": "star-42", "duration": 1800, "message": "Connection established!" }),
        );

        let events = drain(&mut events);
        assert!(events.iter().any(|e| matches!(
            e,
            KnotEvent::Pairing(GatewayNotice::Accepted { .. })
        )));
        assert_eq!(
            transitions(&events),
            vec![
                (SessionStatus::Idle, SessionStatus::Connecting),
                (SessionStatus::Connecting, SessionStatus::Active)
            ]
        );
        assert!(client.outgoing_requests().is_empty());
        assert_eq!(client.display_remaining(), Some(1800));
    }

    #[test]
    fn test_owner_flow_uses_accepted_star() {
        let client = client();
        client.claim_star("star-7").expect("claim");
        push(
            &client,
            "incoming_request",
            json!({ "request_id": "req-1", "star_id": "star-7", "message": "Someone wants to connect" }),
        );
        assert_eq!(client.incoming_requests().len(), 1);

        client.accept_request(&RequestId::from("req-1")).expect("accept");
        push(
            &client,
            "knot_started",
            json!({ "room_id": "R9", "duration": 600, "message": "" }),
        );

        let state = client.session_state();
        assert_eq!(state.status(), SessionStatus::Active);
        assert_eq!(state.star_id(), Some(&StarId::from("star-7")));
        assert!(client.incoming_requests().is_empty());
    }

    #[test]
    fn test_start_without_star_is_ignored() {
        let client = client();
        push(
            &client,
            "knot_started",
            json!({ "room_id": "R1", "duration": 60, "message": "" }),
        );
        assert_eq!(client.session_status(), SessionStatus::Idle);
    }

    #[test]
    fn test_unknown_request_rejected() {
        let client = client();
        let err = client
            .reject_request(&RequestId::from("nope"))
            .expect_err("unknown");
        assert!(matches!(err, crate::Error::UnknownRequest { .. }));
    }

    #[test]
    fn test_new_request_after_ended_session() {
        let client = client();
        let mut events = client.take_events().expect("events");
        client.enter_knot("star-1", Some(RoomId::from("R1"))).expect("enter");
        push(
            &client,
            "knot_started",
            json!({ "room_id": "R1", "duration": 60, "message": "" }),
        );
        push(
            &client,
            "partner_left",
            json!({ "message": "Your partner has left.", "can_continue": false }),
        );
        assert_eq!(
            client.session_state().end_reason(),
            Some(EndReason::PartnerLeft)
        );
        drain(&mut events);

        client.request_connection("star-2").expect("request");
        push(
            &client,
            "knot_started",
            json!({ "room_id": "R2", "star_id": "star-2", "duration": 60, "message": "" }),
        );

        assert_eq!(
            transitions(&drain(&mut events)),
            vec![
                (SessionStatus::Ended, SessionStatus::Idle),
                (SessionStatus::Idle, SessionStatus::Connecting),
                (SessionStatus::Connecting, SessionStatus::Active)
            ]
        );
        assert_eq!(client.session_state().room_id(), Some(&RoomId::from("R2")));
    }

    #[test]
    fn test_stray_start_keeps_ended_session() {
        let client = client();
        client.enter_knot("star-1", None).expect("enter");
        push(&client, "knot_started", json!({ "room_id": "R1", "duration": 60 }));
        client.leave_knot().expect("leave");

        push(
            &client,
            "knot_started",
            json!({ "room_id": "R5", "star_id": "star-9", "duration": 60 }),
        );
        assert_eq!(client.session_state().end_reason(), Some(EndReason::UserLeft));
    }

    #[test]
    fn test_transport_loss_and_failure() {
        let client = client();
        let mut events = client.take_events().expect("events");
        client.enter_knot("star-1", None).expect("enter");
        push(&client, "knot_started", json!({ "room_id": "R1", "duration": 60 }));
        drain(&mut events);

        client.inner.dispatch(&TransportEvent::Disconnected {
            reason: "reset".into(),
        });
        assert!(client.is_reconnecting());
        assert_eq!(client.session_status(), SessionStatus::Active);

        client
            .inner
            .dispatch(&TransportEvent::ReconnectFailed { attempts: 5 });
        assert_eq!(client.session_state().end_reason(), Some(EndReason::Error));

        let events = drain(&mut events);
        assert!(events.contains(&KnotEvent::Session(SessionNotice::Reconnecting(true))));
        assert!(events.contains(&KnotEvent::Connection(ConnectionNotice::Failed {
            attempts: 5
        })));
    }

    #[test]
    fn test_malformed_push_is_ignored() {
        let client = client();
        let mut events = client.take_events().expect("events");
        push(&client, "timer_update", json!({ "room_id": "R1" }));
        push(&client, "something_new", json!({}));
        assert!(drain(&mut events).is_empty());
    }

    #[test]
    fn test_workspace_snapshots() {
        let client = client();
        assert!(client.timeline().is_empty());
        assert!(!client.undo());

        client.enter_knot("star-1", None).expect("enter");
        push(&client, "knot_started", json!({ "room_id": "R1", "duration": 60 }));
        push(
            &client,
            "chat_message",
            json!({ "room_id": "R1", "message": "hey", "sender_id": "other", "timestamp": 1_700_000_000_000u64 }),
        );
        client.pointer_down(1.0, 1.0).expect("down");
        client.pointer_move(2.0, 2.0).expect("move");
        client.pointer_up().expect("up");

        assert_eq!(client.timeline().len(), 1);
        assert_eq!(client.strokes().len(), 1);
        assert!(client.undo());
        assert!(client.strokes().is_empty());
    }

    #[tokio::test]
    async fn test_session_over_loopback() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let (frames_tx, mut frames_rx) = mpsc::unbounded_channel::<Value>();
        let (push_tx, mut push_rx) = mpsc::unbounded_channel::<Value>();

        tokio::spawn(async move {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            let Ok(mut ws) = accept_async(stream).await else {
                return;
            };
            let hello = json!({ "event": "connected", "data": { "sid": "sid-1" } });
            if ws.send(Message::Text(hello.to_string().into())).await.is_err() {
                return;
            }
            loop {
                tokio::select! {
                    Some(push) = push_rx.recv() => {
                        if ws.send(Message::Text(push.to_string().into())).await.is_err() {
                            return;
                        }
                    }
                    frame = ws.next() => {
                        let Some(Ok(frame)) = frame else { return };
                        if let Ok(text) = frame.to_text()
                            && let Ok(value) = serde_json::from_str::<Value>(text)
                        {
                            let _ = frames_tx.send(value);
                        }
                    }
                }
            }
        });

        let client = KnotClient::builder()
            .server_url(format!("ws://{addr}"))
            .reconnect_attempts(0)
            .build()
            .expect("build");
        client.claim_star("star-1").expect("claim");

        let sid = client.connect().await.expect("connect");
        assert_eq!(sid.as_str(), "sid-1");

        let first = timeout(Duration::from_secs(2), frames_rx.recv())
            .await
            .expect("frame in time")
            .expect("frame");
        assert_eq!(first["event"], "claim_star");
        assert_eq!(first["data"]["star_id"], "star-1");

        push_tx
            .send(json!({ "event": "knot_started", "data": { "room_id": "R1", "star_id": "star-1", "duration": 1800, "message": "" } }))
            .expect("push");
        timeout(Duration::from_secs(2), async {
            while client.session_status() != SessionStatus::Active {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("active in time");

        client.send_chat("hello").expect("chat");
        let chat = timeout(Duration::from_secs(2), async {
            loop {
                let frame = frames_rx.recv().await.expect("frame");
                if frame["event"] == "chat_message" {
                    return frame;
                }
            }
        })
        .await
        .expect("chat in time");
        assert_eq!(chat["data"]["room_id"], "R1");
        assert_eq!(chat["data"]["message"], "hello");

        client.disconnect();
        assert_eq!(client.connection_state(), ConnectionState::Disconnected);
    }

    async fn next_frame(ws: &mut WebSocketStream<TcpStream>) -> Value {
        let frame = timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("frame in time")
            .expect("frame")
            .expect("ok");
        serde_json::from_str(frame.to_text().expect("text")).expect("json")
    }

    #[tokio::test]
    async fn test_session_survives_reconnect_over_loopback() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let (sockets_tx, mut sockets) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            let mut accepted = 0;
            while let Ok((stream, _)) = listener.accept().await {
                accepted += 1;
                let Ok(mut ws) = accept_async(stream).await else {
                    continue;
                };
                let hello = json!({ "event": "connected", "data": { "sid": format!("sid-{accepted}") } });
                if ws.send(Message::Text(hello.to_string().into())).await.is_err() {
                    continue;
                }
                if sockets_tx.send(ws).is_err() {
                    break;
                }
            }
        });

        let client = KnotClient::builder()
            .server_url(format!("ws://{addr}"))
            .reconnect_delay(Duration::from_millis(20))
            .build()
            .expect("build");
        let mut events = client.take_events().expect("events");
        client.claim_star("star-1").expect("claim");
        client.connect().await.expect("connect");

        let mut first = sockets.recv().await.expect("socket");
        let claim = next_frame(&mut first).await;
        assert_eq!(claim["event"], "claim_star");

        let start = json!({ "event": "knot_started", "data": { "room_id": "R1", "star_id": "star-1", "duration": 60 } });
        first
            .send(Message::Text(start.to_string().into()))
            .await
            .expect("push");
        timeout(Duration::from_secs(2), async {
            while client.session_status() != SessionStatus::Active {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("active in time");

        // Claimed once: the next frame is the chat, not a second claim
        client.send_chat("hi").expect("chat");
        assert_eq!(next_frame(&mut first).await["event"], "chat_message");

        first.close(None).await.expect("close");
        let mut second = sockets.recv().await.expect("reconnected socket");
        let reclaim = next_frame(&mut second).await;
        assert_eq!(reclaim["event"], "claim_star");
        assert_eq!(reclaim["data"]["star_id"], "star-1");

        let session: Vec<SessionNotice> = timeout(Duration::from_secs(2), async {
            let mut seen = Vec::new();
            while let Some(event) = events.recv().await {
                if let KnotEvent::Session(notice @ SessionNotice::Reconnecting(_)) = event {
                    let done = notice == SessionNotice::Reconnecting(false);
                    seen.push(notice);
                    if done {
                        break;
                    }
                }
            }
            seen
        })
        .await
        .expect("restored in time");

        assert_eq!(
            session,
            vec![
                SessionNotice::Reconnecting(true),
                SessionNotice::Reconnecting(false)
            ]
        );
        assert!(!client.is_reconnecting());
        assert_eq!(client.session_status(), SessionStatus::Active);
        client.disconnect();
    }
}
