//! The Knot state machine.
//!
//! [`SessionController`] is driven by server pushes ([`handle`]) and local
//! intents ([`enter`], [`leave`], [`exit`]). It owns the session's
//! [`Workspace`] from activation until exit.
//!
//! Pushes that do not fit the current state or room are ignored, never
//! fatal. Remaining time is mirrored from the server and never decremented
//! locally; [`display_remaining`] only smooths it for display.
//!
//! [`handle`]: SessionController::handle
//! [`enter`]: SessionController::enter
//! [`leave`]: SessionController::leave
//! [`exit`]: SessionController::exit
//! [`display_remaining`]: SessionController::display_remaining

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::{Instant, SystemTime};

use tracing::{debug, info, warn};

use crate::canvas::{
    Brush, CanvasOptions, RecordingSurface, Stroke, StrokeSyncEngine, SurfaceFactory, Tool,
};
use crate::chat::{ChatMessage, ChatOptions, ChatRelay};
use crate::error::{Error, Result};
use crate::identifiers::{RoomId, SenderId, StarId};
use crate::protocol::{Command, ParsedEvent};
use crate::transport::Emitter;

use super::state::{EndReason, SessionState, SessionStatus};

// ============================================================================
// Constants
// ============================================================================

/// Sender used for remote points that carry no sender.
const UNKNOWN_PARTNER: &str = "partner";

// ============================================================================
// Options
// ============================================================================

/// Per-session workspace settings.
#[derive(Clone)]
pub struct SessionOptions {
    /// Chat limits.
    pub chat: ChatOptions,
    /// Canvas behaviour.
    pub canvas: CanvasOptions,
    /// Render target for each new canvas.
    pub surface_factory: SurfaceFactory,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            chat: ChatOptions::default(),
            canvas: CanvasOptions::default(),
            surface_factory: Arc::new(|| Box::new(RecordingSurface::new())),
        }
    }
}

impl std::fmt::Debug for SessionOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionOptions")
            .field("chat", &self.chat)
            .field("canvas", &self.canvas)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Workspace
// ============================================================================

/// Canvas and chat of one active session.
#[derive(Debug)]
pub struct Workspace {
    /// Shared canvas.
    pub canvas: StrokeSyncEngine,
    /// Chat timeline.
    pub chat: ChatRelay,
}

impl Workspace {
    fn new(
        emitter: &Arc<dyn Emitter>,
        room_id: &RoomId,
        brush: Brush,
        options: &SessionOptions,
    ) -> Self {
        Self {
            canvas: StrokeSyncEngine::new(
                Arc::clone(emitter),
                room_id.clone(),
                brush,
                options.canvas.clone(),
                (options.surface_factory)(),
            ),
            chat: ChatRelay::new(Arc::clone(emitter), room_id.clone(), options.chat),
        }
    }
}

// ============================================================================
// SessionNotice
// ============================================================================

/// Observable outcome of a session step.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionNotice {
    /// The state machine moved.
    StateChanged {
        /// Previous state.
        from: SessionStatus,
        /// New state.
        to: SessionStatus,
    },
    /// Authoritative remaining time.
    Timer {
        /// Seconds left.
        remaining_seconds: u32,
    },
    /// Remaining time crossed a warning threshold.
    TimerWarning {
        /// Seconds left.
        remaining_seconds: u32,
        /// Server warning text.
        message: String,
    },
    /// The channel dropped (`true`), or it came back or the session heard
    /// from the server again (`false`).
    Reconnecting(bool),
    /// A chat message from the partner.
    ChatMessage(ChatMessage),
    /// The partner finished a stroke.
    StrokeCompleted {
        /// Who drew it.
        author: SenderId,
        /// Points in the stroke.
        points: usize,
    },
    /// A server error reached the session.
    Error {
        /// Server message.
        message: String,
    },
}

// ============================================================================
// SessionController
// ============================================================================

/// Owner of the current Knot attempt.
pub struct SessionController {
    emitter: Arc<dyn Emitter>,
    options: SessionOptions,
    brush: Brush,
    state: SessionState,
    workspace: Option<Workspace>,
    reconnecting: bool,
}

impl SessionController {
    /// Creates an idle controller.
    #[must_use]
    pub fn new(emitter: Arc<dyn Emitter>, brush: Brush, options: SessionOptions) -> Self {
        Self {
            emitter,
            options,
            brush,
            state: SessionState::Idle,
            workspace: None,
            reconnecting: false,
        }
    }

    // ========================================================================
    // Intents
    // ========================================================================

    /// Starts an attempt for a star.
    ///
    /// `room_id` is known when the handshake already completed upstream.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] unless idle.
    pub fn enter(&mut self, star_id: StarId, room_id: Option<RoomId>) -> Result<Vec<SessionNotice>> {
        if self.state != SessionState::Idle {
            return Err(Error::invalid_state("enter a knot", self.status().as_str()));
        }

        let mut notices = Vec::new();
        self.transition(SessionState::Connecting { star_id, room_id }, &mut notices);
        Ok(notices)
    }

    /// Leaves the attempt and tells the server.
    ///
    /// Local state ends immediately; the server's acknowledgement is not
    /// awaited.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] when no attempt is in progress.
    pub fn leave(&mut self) -> Result<Vec<SessionNotice>> {
        if !self.state.is_in_progress() {
            return Err(Error::invalid_state("leave", self.status().as_str()));
        }

        if let Some(room_id) = self.state.room_id().cloned()
            && let Err(e) = self.emitter.emit(Command::LeaveKnot {
                room_id: room_id.clone(),
            })
        {
            warn!(%room_id, error = %e, "Leave notification not sent");
        }

        let mut notices = Vec::new();
        self.end(EndReason::UserLeft, None, &mut notices);
        Ok(notices)
    }

    /// Returns to idle and drops the workspace.
    ///
    /// An attempt still in progress is left first, so `Ended` is never
    /// skipped. No-op when idle.
    pub fn exit(&mut self) -> Vec<SessionNotice> {
        let mut notices = if self.state.is_in_progress() {
            self.leave().unwrap_or_default()
        } else {
            Vec::new()
        };

        if self.state != SessionState::Idle {
            self.workspace = None;
            self.reconnecting = false;
            self.transition(SessionState::Idle, &mut notices);
        }
        notices
    }

    // ========================================================================
    // Transport Signals
    // ========================================================================

    /// The channel dropped. A waiting or active session shows a reconnect
    /// indicator and keeps its state.
    pub fn on_transport_lost(&mut self) -> Vec<SessionNotice> {
        let waiting_or_active = matches!(
            self.status(),
            SessionStatus::Waiting | SessionStatus::Active
        );
        if waiting_or_active && !self.reconnecting {
            self.reconnecting = true;
            info!(room_id = ?self.state.room_id(), "Session reconnecting");
            return vec![SessionNotice::Reconnecting(true)];
        }
        Vec::new()
    }

    /// The channel is back. Clears the reconnect indicator; the room's
    /// state is re-derived from the next push.
    pub fn on_transport_restored(&mut self) -> Vec<SessionNotice> {
        let mut notices = Vec::new();
        self.heard_from_server(&mut notices);
        notices
    }

    /// Every reconnection attempt failed. Ends any attempt in progress.
    pub fn on_transport_failed(&mut self) -> Vec<SessionNotice> {
        let mut notices = Vec::new();
        if self.state.is_in_progress() {
            self.reconnecting = false;
            let message = "Connection to the server was lost.".to_string();
            notices.push(SessionNotice::Error {
                message: message.clone(),
            });
            self.end(EndReason::Error, Some(message), &mut notices);
        }
        notices
    }

    // ========================================================================
    // Server Pushes
    // ========================================================================

    /// Applies a server push.
    pub fn handle(&mut self, event: &ParsedEvent) -> Vec<SessionNotice> {
        let mut notices = Vec::new();

        match event {
            ParsedEvent::WaitingForPartner { room_id, .. } => {
                if let SessionState::Connecting {
                    star_id,
                    room_id: expected,
                } = &self.state
                {
                    if expected.as_ref().is_some_and(|expected| expected != room_id) {
                        return self.ignore(event);
                    }
                    let next = SessionState::Waiting {
                        star_id: star_id.clone(),
                        room_id: room_id.clone(),
                    };
                    self.heard_from_server(&mut notices);
                    self.transition(next, &mut notices);
                } else {
                    return self.ignore(event);
                }
            }

            ParsedEvent::KnotStarted {
                room_id,
                partner_count,
                duration,
                ..
            } => {
                let star_id = match &self.state {
                    SessionState::Connecting {
                        star_id,
                        room_id: expected,
                    } if expected.as_ref().is_none_or(|expected| expected == room_id) => {
                        star_id.clone()
                    }
                    SessionState::Waiting {
                        star_id,
                        room_id: current,
                    } if current == room_id => star_id.clone(),
                    _ => return self.ignore(event),
                };

                self.heard_from_server(&mut notices);
                if *partner_count < 2 {
                    if self.status() == SessionStatus::Connecting {
                        self.transition(
                            SessionState::Waiting {
                                star_id,
                                room_id: room_id.clone(),
                            },
                            &mut notices,
                        );
                    }
                    return notices;
                }

                self.workspace = Some(Workspace::new(
                    &self.emitter,
                    room_id,
                    self.brush.clone(),
                    &self.options,
                ));
                self.transition(
                    SessionState::Active {
                        star_id,
                        room_id: room_id.clone(),
                        partner_count: *partner_count,
                        duration: *duration,
                        remaining_seconds: *duration,
                        started_at: SystemTime::now(),
                        synced_at: Instant::now(),
                    },
                    &mut notices,
                );
                notices.push(SessionNotice::Timer {
                    remaining_seconds: *duration,
                });
            }

            ParsedEvent::TimerUpdate {
                room_id,
                remaining_seconds,
            } => {
                if !self.sync_timer(room_id.as_ref(), *remaining_seconds) {
                    return self.ignore(event);
                }
                self.heard_from_server(&mut notices);
                notices.push(SessionNotice::Timer {
                    remaining_seconds: *remaining_seconds,
                });
            }

            ParsedEvent::TimerWarning {
                room_id,
                message,
                remaining_seconds,
            } => {
                if !self.sync_timer(room_id.as_ref(), *remaining_seconds) {
                    return self.ignore(event);
                }
                self.heard_from_server(&mut notices);
                notices.push(SessionNotice::TimerWarning {
                    remaining_seconds: *remaining_seconds,
                    message: message.clone(),
                });
            }

            ParsedEvent::SessionEnded {
                room_id,
                reason,
                message,
            } => {
                if !self.is_waiting_or_active_in(room_id.as_ref()) {
                    return self.ignore(event);
                }
                self.heard_from_server(&mut notices);
                self.end(
                    EndReason::from_server(reason),
                    non_empty(message),
                    &mut notices,
                );
            }

            ParsedEvent::PartnerLeft { message, .. } => {
                if !self.is_waiting_or_active_in(None) {
                    return self.ignore(event);
                }
                self.heard_from_server(&mut notices);
                self.end(EndReason::PartnerLeft, non_empty(message), &mut notices);
            }

            ParsedEvent::Error { message } => match self.status() {
                SessionStatus::Connecting => {
                    warn!(%message, "Knot attempt failed");
                    notices.push(SessionNotice::Error {
                        message: message.clone(),
                    });
                    self.transition(SessionState::Idle, &mut notices);
                }
                // A live room only ends on an error while its link is in doubt
                SessionStatus::Active if !self.reconnecting => {
                    warn!(%message, "Server error during active session");
                    notices.push(SessionNotice::Error {
                        message: message.clone(),
                    });
                }
                SessionStatus::Waiting | SessionStatus::Active => {
                    warn!(%message, "Session error");
                    self.heard_from_server(&mut notices);
                    notices.push(SessionNotice::Error {
                        message: message.clone(),
                    });
                    self.end(EndReason::Error, non_empty(message), &mut notices);
                }
                SessionStatus::Idle | SessionStatus::Ended => {}
            },

            ParsedEvent::ChatMessage {
                room_id,
                message,
                sender_id,
                timestamp,
            } => {
                let Some(workspace) = self.active_workspace_for(room_id.as_ref()) else {
                    return self.ignore(event);
                };
                if let Some(received) = workspace.chat.receive(
                    room_id.as_ref(),
                    sender_id.clone(),
                    message.clone(),
                    *timestamp,
                ) {
                    notices.push(SessionNotice::ChatMessage(received));
                }
                self.heard_from_server(&mut notices);
            }

            ParsedEvent::DrawEvent {
                room_id,
                drawing_data,
                sender_id,
            } => {
                let Some(workspace) = self.active_workspace_for(room_id.as_ref()) else {
                    return self.ignore(event);
                };
                let author = sender_id
                    .clone()
                    .unwrap_or_else(|| SenderId::from(UNKNOWN_PARTNER));
                if let Some(points) = workspace.canvas.apply_remote(&author, drawing_data) {
                    notices.push(SessionNotice::StrokeCompleted { author, points });
                }
                self.heard_from_server(&mut notices);
            }

            _ => {}
        }

        notices
    }

    // ========================================================================
    // Workspace Intents
    // ========================================================================

    /// Sends a chat message in the active session.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidState`] unless active
    /// - Any [`ChatRelay::send`] error
    pub fn send_chat(&mut self, text: &str) -> Result<ChatMessage> {
        let status = self.status();
        match self.active_workspace_for(None) {
            Some(workspace) => workspace.chat.send(text),
            None => Err(Error::invalid_state("send chat", status.as_str())),
        }
    }

    /// Pointer pressed. Ignored unless active.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutboxFull`] if the point cannot be queued.
    pub fn pointer_down(&mut self, x: f64, y: f64) -> Result<()> {
        match self.active_workspace_for(None) {
            Some(workspace) => workspace.canvas.pointer_down(x, y),
            None => Ok(()),
        }
    }

    /// Pointer moved. Ignored unless active.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutboxFull`] if the point cannot be queued.
    pub fn pointer_move(&mut self, x: f64, y: f64) -> Result<()> {
        match self.active_workspace_for(None) {
            Some(workspace) => workspace.canvas.pointer_move(x, y),
            None => Ok(()),
        }
    }

    /// Pointer released. Ignored unless active.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutboxFull`] if the end marker cannot be queued.
    pub fn pointer_up(&mut self) -> Result<()> {
        match self.active_workspace_for(None) {
            Some(workspace) => workspace.canvas.pointer_up(),
            None => Ok(()),
        }
    }

    /// Removes the most recent stroke from the canvas.
    pub fn undo(&mut self) -> Option<Stroke> {
        self.workspace.as_mut()?.canvas.undo()
    }

    /// Clears the canvas.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotInRoom`] when there is no canvas.
    pub fn clear_canvas(&mut self) -> Result<()> {
        let workspace = self.workspace.as_mut().ok_or(Error::NotInRoom)?;
        workspace.canvas.clear();
        Ok(())
    }

    /// Selects a pen color, kept across sessions.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidStyle`] for a malformed color.
    pub fn set_color(&mut self, color: &str) -> Result<()> {
        self.brush.set_color(color)?;
        self.sync_brush();
        Ok(())
    }

    /// Selects a pen width, kept across sessions.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidStyle`] for a width outside `(0, 64]`.
    pub fn set_width(&mut self, width: f32) -> Result<()> {
        self.brush.set_width(width)?;
        self.sync_brush();
        Ok(())
    }

    /// Selects the tool, kept across sessions.
    pub fn set_tool(&mut self, tool: Tool) {
        self.brush.tool = tool;
        self.sync_brush();
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Current state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Current state tag.
    #[inline]
    #[must_use]
    pub fn status(&self) -> SessionStatus {
        self.state.status()
    }

    /// Assigned room, if any.
    #[must_use]
    pub fn room_id(&self) -> Option<&RoomId> {
        self.state.room_id()
    }

    /// Returns `true` while the reconnect indicator is shown.
    #[inline]
    #[must_use]
    pub fn is_reconnecting(&self) -> bool {
        self.reconnecting
    }

    /// Canvas and chat, from activation until exit.
    #[must_use]
    pub fn workspace(&self) -> Option<&Workspace> {
        self.workspace.as_ref()
    }

    /// Current brush.
    #[inline]
    #[must_use]
    pub fn brush(&self) -> &Brush {
        &self.brush
    }

    /// Mirrored remaining seconds minus time since the last server update,
    /// floored at zero. `None` unless active.
    #[must_use]
    pub fn display_remaining(&self, now: Instant) -> Option<u32> {
        match &self.state {
            SessionState::Active {
                remaining_seconds,
                synced_at,
                ..
            } => {
                let elapsed = now.saturating_duration_since(*synced_at).as_secs();
                let elapsed = u32::try_from(elapsed).unwrap_or(u32::MAX);
                Some(remaining_seconds.saturating_sub(elapsed))
            }
            _ => None,
        }
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn transition(&mut self, next: SessionState, notices: &mut Vec<SessionNotice>) {
        let from = self.status();
        let to = next.status();
        self.state = next;
        if from != to {
            info!(%from, %to, room_id = ?self.state.room_id(), "Session state changed");
            notices.push(SessionNotice::StateChanged { from, to });
        }
    }

    fn end(&mut self, reason: EndReason, message: Option<String>, notices: &mut Vec<SessionNotice>) {
        let (star_id, room_id) = match &self.state {
            SessionState::Connecting { star_id, room_id } => (star_id.clone(), room_id.clone()),
            SessionState::Waiting { star_id, room_id } | SessionState::Active { star_id, room_id, .. } => {
                (star_id.clone(), Some(room_id.clone()))
            }
            SessionState::Idle | SessionState::Ended { .. } => return,
        };

        self.reconnecting = false;
        info!(%reason, "Session ended");
        self.transition(
            SessionState::Ended {
                star_id,
                room_id,
                reason,
                message,
            },
            notices,
        );
    }

    fn sync_timer(&mut self, room_id: Option<&RoomId>, remaining: u32) -> bool {
        match &mut self.state {
            SessionState::Active {
                room_id: current,
                remaining_seconds,
                synced_at,
                ..
            } if room_id.is_none_or(|room_id| room_id == current) => {
                *remaining_seconds = remaining;
                *synced_at = Instant::now();
                true
            }
            _ => false,
        }
    }

    fn is_waiting_or_active_in(&self, room_id: Option<&RoomId>) -> bool {
        match &self.state {
            SessionState::Waiting { room_id: current, .. }
            | SessionState::Active { room_id: current, .. } => {
                room_id.is_none_or(|room_id| room_id == current)
            }
            _ => false,
        }
    }

    fn active_workspace_for(&mut self, room_id: Option<&RoomId>) -> Option<&mut Workspace> {
        match &self.state {
            SessionState::Active { room_id: current, .. }
                if room_id.is_none_or(|room_id| room_id == current) =>
            {
                self.workspace.as_mut()
            }
            _ => None,
        }
    }

    fn heard_from_server(&mut self, notices: &mut Vec<SessionNotice>) {
        if self.reconnecting {
            self.reconnecting = false;
            info!("Session heard from server again");
            notices.push(SessionNotice::Reconnecting(false));
        }
    }

    fn sync_brush(&mut self) {
        if let Some(workspace) = self.workspace.as_mut() {
            workspace.canvas.set_brush(self.brush.clone());
        }
    }

    fn ignore(&self, event: &ParsedEvent) -> Vec<SessionNotice> {
        debug!(state = %self.status(), ?event, "Ignoring push");
        Vec::new()
    }
}

impl std::fmt::Debug for SessionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionController")
            .field("state", &self.state)
            .field("reconnecting", &self.reconnecting)
            .field("workspace", &self.workspace.is_some())
            .finish_non_exhaustive()
    }
}

/// Keeps a message only if it says something.
fn non_empty(message: &str) -> Option<String> {
    (!message.is_empty()).then(|| message.to_string())
}

// ============================================================================
// Tests
// ============================================================================
