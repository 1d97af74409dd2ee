//! Outbound seam shared by every Knot component.
//!
//! ConnectionGateway, SessionController, StrokeSyncEngine and ChatRelay
//! never hold the socket; they emit through this trait. The production
//! implementation is [`TransportAdapter`](super::TransportAdapter).

// ============================================================================
// Imports
// ============================================================================

use crate::error::Result;
use crate::identifiers::SenderId;
use crate::protocol::Command;

// ============================================================================
// Emitter
// ============================================================================

/// Sends commands over the shared channel.
pub trait Emitter: Send + Sync {
    /// Sends a command now, or queues it for the next connect.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutboxFull`](crate::Error::OutboxFull) if the
    /// command could neither be sent nor queued.
    fn emit(&self, command: Command) -> Result<()>;

    /// Returns the channel's server-issued ID, if connected.
    fn local_id(&self) -> Option<SenderId>;
}

// ============================================================================
// Test Support
// ============================================================================

#[cfg(test)]
pub(crate) mod testing {
    use parking_lot::Mutex;

    use super::*;

    /// Emitter that records commands instead of sending them.
    #[derive(Default)]
    pub(crate) struct RecordingEmitter {
        sent: Mutex<Vec<Command>>,
        local_id: Mutex<Option<SenderId>>,
    }

    impl RecordingEmitter {
        pub(crate) fn with_id(id: &str) -> Self {
            let emitter = Self::default();
            *emitter.local_id.lock() = Some(SenderId::from(id));
            emitter
        }

        pub(crate) fn sent(&self) -> Vec<Command> {
            self.sent.lock().clone()
        }

        pub(crate) fn take(&self) -> Vec<Command> {
            std::mem::take(&mut *self.sent.lock())
        }
    }

    impl Emitter for RecordingEmitter {
        fn emit(&self, command: Command) -> Result<()> {
            self.sent.lock().push(command);
            Ok(())
        }

        fn local_id(&self) -> Option<SenderId> {
            self.local_id.lock().clone()
        }
    }
}
