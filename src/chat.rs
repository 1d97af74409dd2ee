//! Session chat.
//!
//! [`ChatRelay`] keeps one append-only timeline per session. Outgoing
//! messages are shown before the server sees them; incoming messages are
//! appended in arrival order with no resequencing.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::identifiers::{MessageId, RoomId, SenderId};
use crate::protocol::Command;
use crate::transport::Emitter;

// ============================================================================
// Constants
// ============================================================================

/// Longest accepted message, in characters after trimming.
pub const DEFAULT_MAX_LENGTH: usize = 500;

/// Minimum spacing between two sends.
pub const DEFAULT_COOLDOWN: Duration = Duration::from_millis(300);

// ============================================================================
// Types
// ============================================================================

/// Chat limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChatOptions {
    /// Longest accepted message.
    pub max_length: usize,
    /// Minimum spacing between sends.
    pub cooldown: Duration,
}

impl Default for ChatOptions {
    fn default() -> Self {
        Self {
            max_length: DEFAULT_MAX_LENGTH,
            cooldown: DEFAULT_COOLDOWN,
        }
    }
}

/// One timeline entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    /// `sender-timestamp`.
    pub id: MessageId,
    /// Message text.
    pub text: String,
    /// Author channel.
    pub sender_id: SenderId,
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
    /// Whether the local user wrote it.
    pub own: bool,
}

// ============================================================================
// ChatRelay
// ============================================================================

/// Chat timeline for one room.
pub struct ChatRelay {
    emitter: Arc<dyn Emitter>,
    room_id: RoomId,
    options: ChatOptions,
    timeline: Vec<ChatMessage>,
    last_sent: Option<Instant>,
    last_timestamp: u64,
}

impl ChatRelay {
    /// Creates an empty timeline for a room.
    #[must_use]
    pub fn new(emitter: Arc<dyn Emitter>, room_id: RoomId, options: ChatOptions) -> Self {
        Self {
            emitter,
            room_id,
            options,
            timeline: Vec::new(),
            last_sent: None,
            last_timestamp: 0,
        }
    }

    /// Sends a message and shows it immediately.
    ///
    /// # Errors
    ///
    /// - [`Error::EmptyMessage`] if the text is blank
    /// - [`Error::MessageTooLong`] if it exceeds the maximum length
    /// - [`Error::SendThrottled`] if the previous send was too recent
    /// - [`Error::OutboxFull`] if it cannot be queued
    pub fn send(&mut self, text: &str) -> Result<ChatMessage> {
        self.send_at(text, Instant::now(), unix_millis())
    }

    /// [`send`](Self::send) with explicit clocks.
    ///
    /// # Errors
    ///
    /// Same as [`send`](Self::send).
    pub fn send_at(&mut self, text: &str, now: Instant, wall_ms: u64) -> Result<ChatMessage> {
        let text = text.trim();
        if text.is_empty() {
            return Err(Error::EmptyMessage);
        }
        let length = text.chars().count();
        if length > self.options.max_length {
            return Err(Error::message_too_long(length, self.options.max_length));
        }
        if let Some(last) = self.last_sent {
            let elapsed = now.saturating_duration_since(last);
            if elapsed < self.options.cooldown {
                let retry_in = self.options.cooldown - elapsed;
                return Err(Error::send_throttled(retry_in.as_millis() as u64));
            }
        }

        self.emitter.emit(Command::ChatMessage {
            room_id: self.room_id.clone(),
            message: text.to_string(),
        })?;
        self.last_sent = Some(now);

        // Keep own IDs unique when two sends share a millisecond
        let timestamp = wall_ms.max(self.last_timestamp + 1);
        self.last_timestamp = timestamp;

        let sender_id = self
            .emitter
            .local_id()
            .unwrap_or_else(SenderId::local_placeholder);
        let message = ChatMessage {
            id: MessageId::derive(&sender_id, timestamp),
            text: text.to_string(),
            sender_id,
            timestamp,
            own: true,
        };
        trace!(id = %message.id, room_id = %self.room_id, "Chat message sent");
        self.timeline.push(message.clone());
        Ok(message)
    }

    /// Appends a server push. Returns `None` if it belongs to another room.
    pub fn receive(
        &mut self,
        room_id: Option<&RoomId>,
        sender_id: SenderId,
        text: String,
        timestamp: u64,
    ) -> Option<ChatMessage> {
        if let Some(room_id) = room_id
            && room_id != &self.room_id
        {
            debug!(%room_id, current = %self.room_id, "Ignoring chat for another room");
            return None;
        }

        let own = self.emitter.local_id().as_ref() == Some(&sender_id);
        let message = ChatMessage {
            id: MessageId::derive(&sender_id, timestamp),
            text,
            sender_id,
            timestamp,
            own,
        };
        trace!(id = %message.id, own, "Chat message received");
        self.timeline.push(message.clone());
        Some(message)
    }

    /// Messages in send/arrival order.
    #[inline]
    #[must_use]
    pub fn timeline(&self) -> &[ChatMessage] {
        &self.timeline
    }

    /// Room this timeline belongs to.
    #[inline]
    #[must_use]
    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }
}

impl std::fmt::Debug for ChatRelay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatRelay")
            .field("room_id", &self.room_id)
            .field("messages", &self.timeline.len())
            .finish()
    }
}

/// Wall clock in Unix milliseconds.
fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use crate::transport::emitter::testing::RecordingEmitter;

    fn relay(emitter: RecordingEmitter) -> (Arc<RecordingEmitter>, ChatRelay) {
        let emitter = Arc::new(emitter);
        let relay = ChatRelay::new(emitter.clone(), RoomId::from("R1"), ChatOptions::default());
        (emitter, relay)
    }

    #[test]
    fn test_send_then_receive_keeps_order() {
        let (emitter, mut relay) = relay(RecordingEmitter::with_id("me-sid"));

        let own = relay.send("hello").expect("send");
        assert!(own.own);
        assert_eq!(relay.timeline().len(), 1);

        relay.receive(None, SenderId::from("other"), "hi".into(), 42);

        let timeline = relay.timeline();
        assert_eq!(timeline.len(), 2);
        assert_eq!(timeline[0].text, "hello");
        assert!(timeline[0].own);
        assert_eq!(timeline[1].text, "hi");
        assert!(!timeline[1].own);

        assert_eq!(
            emitter.sent(),
            vec![Command::ChatMessage {
                room_id: RoomId::from("R1"),
                message: "hello".into()
            }]
        );
    }

    #[test]
    fn test_validation_rejects_before_emit() {
        let (emitter, mut relay) = relay(RecordingEmitter::with_id("me-sid"));

        assert!(matches!(relay.send("   "), Err(Error::EmptyMessage)));
        let long = "x".repeat(DEFAULT_MAX_LENGTH + 1);
        assert!(matches!(
            relay.send(&long),
            Err(Error::MessageTooLong { length: 501, max: 500 })
        ));

        assert!(emitter.sent().is_empty());
        assert!(relay.timeline().is_empty());
    }

    #[test]
    fn test_length_counts_characters_after_trim() {
        let (_, mut relay) = relay(RecordingEmitter::with_id("me-sid"));
        let text = format!("  {}  ", "é".repeat(DEFAULT_MAX_LENGTH));

        let message = relay.send(&text).expect("send");
        assert_eq!(message.text.chars().count(), DEFAULT_MAX_LENGTH);
    }

    #[test]
    fn test_cooldown_throttles_double_send() {
        let (emitter, mut relay) = relay(RecordingEmitter::with_id("me-sid"));
        let start = Instant::now();

        relay.send_at("one", start, 1_000).expect("send");
        let err = relay
            .send_at("two", start + Duration::from_millis(100), 1_100)
            .expect_err("throttled");
        assert!(matches!(err, Error::SendThrottled { retry_in_ms: 200 }));

        relay
            .send_at("two", start + Duration::from_millis(300), 1_300)
            .expect("send");
        assert_eq!(emitter.sent().len(), 2);
    }

    #[test]
    fn test_same_millisecond_ids_stay_unique() {
        let emitter = Arc::new(RecordingEmitter::with_id("me-sid"));
        let mut relay = ChatRelay::new(
            emitter,
            RoomId::from("R1"),
            ChatOptions {
                cooldown: Duration::ZERO,
                ..ChatOptions::default()
            },
        );
        let now = Instant::now();

        let a = relay.send_at("a", now, 5_000).expect("send");
        let b = relay.send_at("b", now, 5_000).expect("send");

        assert_ne!(a.id, b.id);
        assert_eq!(b.timestamp, 5_001);
        assert_eq!(a.id.as_str(), "me-sid-5000");
    }

    #[test]
    fn test_placeholder_sender_without_channel() {
        let (_, mut relay) = relay(RecordingEmitter::default());
        let message = relay.send("hi").expect("send");
        assert_eq!(message.sender_id.as_str(), "me");
    }

    #[test]
    fn test_other_room_is_ignored() {
        let (_, mut relay) = relay(RecordingEmitter::with_id("me-sid"));
        let room = RoomId::from("R2");

        assert!(relay
            .receive(Some(&room), SenderId::from("other"), "hi".into(), 1)
            .is_none());
        assert!(relay.timeline().is_empty());
    }
}
