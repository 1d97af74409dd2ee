//! Knot session states.
//!
//! Fields exist only in the states where they mean something: a room is
//! guaranteed from `Waiting` on, a timer only in `Active`, a reason only in
//! `Ended`.
//!
//! ```text
//! Idle ──enter──► Connecting ──waiting_for_partner──► Waiting
//!                     │  ▲                              │
//!                     │  └── error push → Idle          │
//!                     └──────── knot_started ───────────┴──► Active
//!                                                             │
//!   Idle ◄──exit── Ended ◄── session_ended / partner_left / leave
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::time::{Instant, SystemTime};

use crate::identifiers::{RoomId, StarId};

// ============================================================================
// EndReason
// ============================================================================

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndReason {
    /// The server's session timer ran out.
    TimeExpired,
    /// The other participant left or disconnected.
    PartnerLeft,
    /// The local user left.
    UserLeft,
    /// Protocol or transport failure.
    Error,
}

impl EndReason {
    /// Maps a server `session_ended.reason`.
    ///
    /// The server only sends `session_ended` to the participant who stayed,
    /// so its `user_left` means the partner left.
    #[must_use]
    pub fn from_server(reason: &str) -> Self {
        match reason {
            "time_expired" => Self::TimeExpired,
            "partner_left" | "user_left" => Self::PartnerLeft,
            _ => Self::Error,
        }
    }

    /// Wire name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TimeExpired => "time_expired",
            Self::PartnerLeft => "partner_left",
            Self::UserLeft => "user_left",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// SessionStatus
// ============================================================================

/// State tag without payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SessionStatus {
    /// No attempt.
    Idle,
    /// Entering; room not yet confirmed.
    Connecting,
    /// In the room alone.
    Waiting,
    /// Both present, timer running.
    Active,
    /// Over; waiting for the user to exit.
    Ended,
}

impl SessionStatus {
    /// Lowercase name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Waiting => "waiting",
            Self::Active => "active",
            Self::Ended => "ended",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// SessionState
// ============================================================================

/// The Knot state machine's state.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum SessionState {
    /// No attempt.
    #[default]
    Idle,

    /// Entering a Knot.
    Connecting {
        /// Star the Knot is paired through.
        star_id: StarId,
        /// Room, when the handshake already assigned one.
        room_id: Option<RoomId>,
    },

    /// In the room, partner not yet joined.
    Waiting {
        /// Star the Knot is paired through.
        star_id: StarId,
        /// Assigned room.
        room_id: RoomId,
    },

    /// Both participants present.
    Active {
        /// Star the Knot is paired through.
        star_id: StarId,
        /// Assigned room.
        room_id: RoomId,
        /// Participants present.
        partner_count: u8,
        /// Authoritative session length in seconds.
        duration: u32,
        /// Last server-reported remaining seconds.
        remaining_seconds: u32,
        /// Wall-clock activation time.
        started_at: SystemTime,
        /// When `remaining_seconds` was last set.
        synced_at: Instant,
    },

    /// Terminal until the user exits.
    Ended {
        /// Star the Knot was paired through.
        star_id: StarId,
        /// Room, if one was assigned.
        room_id: Option<RoomId>,
        /// Why it ended.
        reason: EndReason,
        /// Server or local explanation.
        message: Option<String>,
    },
}

impl SessionState {
    /// State tag.
    #[must_use]
    pub fn status(&self) -> SessionStatus {
        match self {
            Self::Idle => SessionStatus::Idle,
            Self::Connecting { .. } => SessionStatus::Connecting,
            Self::Waiting { .. } => SessionStatus::Waiting,
            Self::Active { .. } => SessionStatus::Active,
            Self::Ended { .. } => SessionStatus::Ended,
        }
    }

    /// Assigned room, if any.
    #[must_use]
    pub fn room_id(&self) -> Option<&RoomId> {
        match self {
            Self::Idle => None,
            Self::Connecting { room_id, .. } | Self::Ended { room_id, .. } => room_id.as_ref(),
            Self::Waiting { room_id, .. } | Self::Active { room_id, .. } => Some(room_id),
        }
    }

    /// Associated star, if any.
    #[must_use]
    pub fn star_id(&self) -> Option<&StarId> {
        match self {
            Self::Idle => None,
            Self::Connecting { star_id, .. }
            | Self::Waiting { star_id, .. }
            | Self::Active { star_id, .. }
            | Self::Ended { star_id, .. } => Some(star_id),
        }
    }

    /// End reason, only in `Ended`.
    #[must_use]
    pub fn end_reason(&self) -> Option<EndReason> {
        match self {
            Self::Ended { reason, .. } => Some(*reason),
            _ => None,
        }
    }

    /// Returns `true` in `Connecting`, `Waiting` or `Active`.
    #[inline]
    #[must_use]
    pub fn is_in_progress(&self) -> bool {
        matches!(
            self.status(),
            SessionStatus::Connecting | SessionStatus::Waiting | SessionStatus::Active
        )
    }
}

// ============================================================================
// Tests
// ============================================================================
