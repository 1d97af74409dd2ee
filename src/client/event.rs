//! Application-facing event stream.

// ============================================================================
// Imports
// ============================================================================

use crate::identifiers::SenderId;
use crate::pairing::GatewayNotice;
use crate::session::SessionNotice;

// ============================================================================
// Types
// ============================================================================

/// Channel status change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionNotice {
    /// Handshake completed.
    Connected {
        /// Server-issued channel ID.
        sid: SenderId,
        /// Whether an earlier connection preceded this one.
        reconnected: bool,
    },
    /// The live connection was lost or closed.
    Disconnected {
        /// Why it ended.
        reason: String,
    },
    /// Redialing.
    Reconnecting {
        /// Attempt number (1-based).
        attempt: u32,
        /// Attempts allowed.
        max: u32,
    },
    /// Every reconnection attempt failed.
    Failed {
        /// Attempts made.
        attempts: u32,
    },
}

/// Everything the client reports, in processing order.
#[derive(Debug, Clone, PartialEq)]
pub enum KnotEvent {
    /// Channel status.
    Connection(ConnectionNotice),
    /// Pairing handshake.
    Pairing(GatewayNotice),
    /// Session lifecycle, chat and canvas.
    Session(SessionNotice),
}

impl From<ConnectionNotice> for KnotEvent {
    fn from(notice: ConnectionNotice) -> Self {
        Self::Connection(notice)
    }
}

impl From<GatewayNotice> for KnotEvent {
    fn from(notice: GatewayNotice) -> Self {
        Self::Pairing(notice)
    }
}

impl From<SessionNotice> for KnotEvent {
    fn from(notice: SessionNotice) -> Self {
        Self::Session(notice)
    }
}
