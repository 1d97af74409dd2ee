//! Inbound event types.
//!
//! Events are pushes from the realtime server. Each frame is an
//! `{"event": "<name>", "data": {...}}` envelope; [`Event::parse`] turns
//! it into a typed [`ParsedEvent`].
//!
//! # Event Types
//!
//! | Group | Events |
//! |-------|--------|
//! | Transport | `connected` |
//! | Pairing | `incoming_request`, `request_rejected`, `knot_started` |
//! | Session | `waiting_for_partner`, `timer_update`, `timer_warning`, `session_ended`, `partner_left` |
//! | Workspace | `chat_message`, `draw_event` |
//! | Errors | `error` |
//!
//! Payloads missing a field the receiver cannot do without parse to
//! [`ParsedEvent::Malformed`]; consumers ignore those.

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::identifiers::{RequestId, RoomId, SenderId, StarId};

use super::command::DrawingData;

// ============================================================================
// Event
// ============================================================================

/// A raw server push.
///
/// # Format
///
/// ```json
/// {
///   "event": "timer_update",
///   "data": { "room_id": "R1", "remaining_seconds": 300 }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Event name.
    pub event: String,

    /// Event payload.
    #[serde(default)]
    pub data: Value,
}

impl Event {
    /// Creates an event from a name and payload.
    #[inline]
    #[must_use]
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }

    /// Parses the event into a typed variant.
    #[must_use]
    pub fn parse(&self) -> ParsedEvent {
        self.parse_internal()
    }
}

// ============================================================================
// ParsedEvent
// ============================================================================

/// Parsed server pushes for type-safe handling.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedEvent {
    /// Connection handshake carrying the channel's stable ID.
    Connected {
        /// Channel identifier.
        sid: SenderId,
    },

    /// Someone wants to connect to a star the local user owns.
    IncomingRequest {
        /// Server-issued request ID.
        request_id: RequestId,
        /// Star the request targets.
        star_id: StarId,
        /// Human-readable prompt.
        message: String,
    },

    /// The owner declined the local user's request.
    RequestRejected {
        /// Human-readable reason.
        message: String,
    },

    /// Both parties are in the room and the timer is running.
    KnotStarted {
        /// Room the session lives in.
        room_id: RoomId,
        /// Star the session was paired through.
        star_id: Option<StarId>,
        /// Participants present (2 unless the server says otherwise).
        partner_count: u8,
        /// Authoritative session length in seconds.
        duration: u32,
        /// Human-readable notice.
        message: String,
    },

    /// The room exists and holds only the local user.
    WaitingForPartner {
        /// Room the user is waiting in.
        room_id: RoomId,
        /// Star the room belongs to.
        star_id: Option<StarId>,
        /// Human-readable notice.
        message: String,
    },

    /// Authoritative remaining time.
    TimerUpdate {
        /// Room the timer belongs to.
        room_id: Option<RoomId>,
        /// Seconds left.
        remaining_seconds: u32,
    },

    /// Remaining time crossed a warning threshold.
    TimerWarning {
        /// Room the timer belongs to.
        room_id: Option<RoomId>,
        /// Human-readable warning.
        message: String,
        /// Seconds left.
        remaining_seconds: u32,
    },

    /// The server ended the session.
    SessionEnded {
        /// Room that ended, when supplied.
        room_id: Option<RoomId>,
        /// Server reason (`time_expired`, `partner_left`, `user_left`, ...).
        reason: String,
        /// Human-readable notice.
        message: String,
    },

    /// The partner disconnected or left.
    PartnerLeft {
        /// Human-readable notice.
        message: String,
        /// Whether the server allows continuing alone.
        can_continue: bool,
    },

    /// Chat text from the partner.
    ChatMessage {
        /// Room the message belongs to, when supplied.
        room_id: Option<RoomId>,
        /// Message text.
        message: String,
        /// Author channel.
        sender_id: SenderId,
        /// Milliseconds since the Unix epoch.
        timestamp: u64,
    },

    /// One drawing point from the partner.
    DrawEvent {
        /// Room the point belongs to, when supplied.
        room_id: Option<RoomId>,
        /// Point payload.
        drawing_data: DrawingData,
        /// Author channel, when supplied.
        sender_id: Option<SenderId>,
    },

    /// Protocol-level error (self-connection, owner offline, ...).
    Error {
        /// Human-readable error.
        message: String,
    },

    /// Known event with a payload missing a required field.
    Malformed {
        /// Event name.
        event: String,
        /// What was wrong.
        reason: String,
    },

    /// Unknown event type.
    Unknown {
        /// Event name.
        event: String,
        /// Event payload.
        data: Value,
    },
}

impl ParsedEvent {
    /// Returns the room this push is scoped to, if any.
    #[must_use]
    pub fn room_id(&self) -> Option<&RoomId> {
        match self {
            Self::KnotStarted { room_id, .. } | Self::WaitingForPartner { room_id, .. } => {
                Some(room_id)
            }
            Self::TimerUpdate { room_id, .. }
            | Self::TimerWarning { room_id, .. }
            | Self::SessionEnded { room_id, .. }
            | Self::ChatMessage { room_id, .. }
            | Self::DrawEvent { room_id, .. } => room_id.as_ref(),
            _ => None,
        }
    }
}

// ============================================================================
// Event Parsing Implementation
// ============================================================================

impl Event {
    /// Internal parsing implementation.
    fn parse_internal(&self) -> ParsedEvent {
        match self.event.as_str() {
            "connected" => match self.get_optional_string("sid") {
                Some(sid) => ParsedEvent::Connected {
                    sid: SenderId::new(sid),
                },
                None => self.malformed("missing sid"),
            },

            "incoming_request" => match self.get_optional_string("request_id") {
                Some(request_id) => ParsedEvent::IncomingRequest {
                    request_id: RequestId::new(request_id),
                    star_id: StarId::new(self.get_string("star_id")),
                    message: self.get_string("message"),
                },
                None => self.malformed("missing request_id"),
            },

            "request_rejected" => ParsedEvent::RequestRejected {
                message: self.get_string("message"),
            },

            "knot_started" => {
                let Some(room_id) = self.get_optional_string("room_id") else {
                    return self.malformed("missing room_id");
                };
                let Some(duration) = self.get_optional_u32("duration") else {
                    return self.malformed("missing duration");
                };
                ParsedEvent::KnotStarted {
                    room_id: RoomId::new(room_id),
                    star_id: self.get_optional_string("star_id").map(StarId::new),
                    partner_count: self.get_optional_u32("partner_count").unwrap_or(2).min(255)
                        as u8,
                    duration,
                    message: self.get_string("message"),
                }
            }

            "waiting_for_partner" => match self.get_optional_string("room_id") {
                Some(room_id) => ParsedEvent::WaitingForPartner {
                    room_id: RoomId::new(room_id),
                    star_id: self.get_optional_string("star_id").map(StarId::new),
                    message: self.get_string("message"),
                },
                None => self.malformed("missing room_id"),
            },

            "timer_update" => match self.get_optional_u32("remaining_seconds") {
                Some(remaining_seconds) => ParsedEvent::TimerUpdate {
                    room_id: self.get_optional_room(),
                    remaining_seconds,
                },
                None => self.malformed("missing remaining_seconds"),
            },

            "timer_warning" => match self.get_optional_u32("remaining_seconds") {
                Some(remaining_seconds) => ParsedEvent::TimerWarning {
                    room_id: self.get_optional_room(),
                    message: self.get_string("message"),
                    remaining_seconds,
                },
                None => self.malformed("missing remaining_seconds"),
            },

            "session_ended" => ParsedEvent::SessionEnded {
                room_id: self.get_optional_room(),
                reason: self.get_string("reason"),
                message: self.get_string("message"),
            },

            "partner_left" => ParsedEvent::PartnerLeft {
                message: self.get_string("message"),
                can_continue: self.get_bool("can_continue"),
            },

            "chat_message" => {
                let Some(message) = self.get_optional_string("message") else {
                    return self.malformed("missing message");
                };
                let Some(sender_id) = self.get_optional_string("sender_id") else {
                    return self.malformed("missing sender_id");
                };
                ParsedEvent::ChatMessage {
                    room_id: self.get_optional_room(),
                    message,
                    sender_id: SenderId::new(sender_id),
                    timestamp: self.get_timestamp("timestamp"),
                }
            }

            "draw_event" => {
                let drawing_data = self
                    .data
                    .get("drawing_data")
                    .cloned()
                    .and_then(|v| serde_json::from_value::<DrawingData>(v).ok());
                match drawing_data {
                    Some(drawing_data) => ParsedEvent::DrawEvent {
                        room_id: self.get_optional_room(),
                        drawing_data,
                        sender_id: self.get_optional_string("sender_id").map(SenderId::new),
                    },
                    None => self.malformed("missing or invalid drawing_data"),
                }
            }

            "error" => ParsedEvent::Error {
                message: self.get_string("message"),
            },

            _ => ParsedEvent::Unknown {
                event: self.event.clone(),
                data: self.data.clone(),
            },
        }
    }

    /// Builds a malformed marker for this event.
    #[inline]
    fn malformed(&self, reason: &str) -> ParsedEvent {
        ParsedEvent::Malformed {
            event: self.event.clone(),
            reason: reason.to_string(),
        }
    }

    /// Gets a string from data.
    #[inline]
    fn get_string(&self, key: &str) -> String {
        self.get_optional_string(key).unwrap_or_default()
    }

    /// Gets an optional non-empty string from data.
    #[inline]
    fn get_optional_string(&self, key: &str) -> Option<String> {
        self.data
            .get(key)
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string())
    }

    /// Gets the optional `room_id` field.
    #[inline]
    fn get_optional_room(&self) -> Option<RoomId> {
        self.get_optional_string("room_id").map(RoomId::new)
    }

    /// Gets a non-negative integer from data, accepting floats.
    #[inline]
    fn get_optional_u32(&self, key: &str) -> Option<u32> {
        let value = self.data.get(key)?;
        value
            .as_u64()
            .or_else(|| value.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
            .map(|v| v.min(u64::from(u32::MAX)) as u32)
    }

    /// Gets a millisecond timestamp, truncating fractions.
    #[inline]
    fn get_timestamp(&self, key: &str) -> u64 {
        self.data
            .get(key)
            .and_then(|v| v.as_u64().or_else(|| v.as_f64().map(|f| f.max(0.0) as u64)))
            .unwrap_or_default()
    }

    /// Gets a bool from data.
    #[inline]
    fn get_bool(&self, key: &str) -> bool {
        self.data
            .get(key)
            .and_then(|v| v.as_bool())
            .unwrap_or_default()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::PointKind;
    use serde_json::json;

    fn event(json_str: &str) -> Event {
        serde_json::from_str(json_str).expect("parse event")
    }

    #[test]
    fn test_knot_started_parsing() {
        let parsed = event(
            r#"{
                "event": "knot_started",
                "data": {
                    "room_id": "R1",
                    "star_id": "star-42",
                    "partner_count": 2,
                    "duration": 1800,
                    "message": "Connection established."
                }
            }"#,
        )
        .parse();

        match parsed {
            ParsedEvent::KnotStarted {
                room_id,
                star_id,
                partner_count,
                duration,
                ..
            } => {
                assert_eq!(room_id.as_str(), "R1");
                assert_eq!(star_id, Some(StarId::from("star-42")));
                assert_eq!(partner_count, 2);
                assert_eq!(duration, 1800);
            }
            other => panic!("unexpected parsed event: {other:?}"),
        }
    }

    #[test]
    fn test_knot_started_defaults_partner_count() {
        let parsed = Event::new("knot_started", json!({ "room_id": "R1", "duration": 60 })).parse();
        assert!(matches!(
            parsed,
            ParsedEvent::KnotStarted {
                partner_count: 2,
                ..
            }
        ));
    }

    #[test]
    fn test_knot_started_without_duration_is_malformed() {
        let parsed = Event::new("knot_started", json!({ "room_id": "R1" })).parse();
        match parsed {
            ParsedEvent::Malformed { event, reason } => {
                assert_eq!(event, "knot_started");
                assert!(reason.contains("duration"));
            }
            other => panic!("expected Malformed, got {other:?}"),
        }
    }

    #[test]
    fn test_chat_message_fractional_timestamp() {
        let parsed = Event::new(
            "chat_message",
            json!({ "sender_id": "other", "message": "hi", "timestamp": 1700000000123.75 }),
        )
        .parse();

        match parsed {
            ParsedEvent::ChatMessage {
                sender_id,
                timestamp,
                room_id,
                ..
            } => {
                assert_eq!(sender_id.as_str(), "other");
                assert_eq!(timestamp, 1_700_000_000_123);
                assert_eq!(room_id, None);
            }
            other => panic!("unexpected parsed event: {other:?}"),
        }
    }

    #[test]
    fn test_draw_event_parsing() {
        let parsed = Event::new(
            "draw_event",
            json!({
                "sender_id": "other",
                "drawing_data": { "type": "draw", "x": 4, "y": 5.5, "color": "#EC4899", "width": 4 }
            }),
        )
        .parse();

        match parsed {
            ParsedEvent::DrawEvent {
                drawing_data,
                sender_id,
                ..
            } => {
                assert_eq!(drawing_data.kind, PointKind::Draw);
                assert_eq!(drawing_data.position(), Some((4.0, 5.5)));
                assert_eq!(drawing_data.width, Some(4.0));
                assert_eq!(sender_id, Some(SenderId::from("other")));
            }
            other => panic!("unexpected parsed event: {other:?}"),
        }
    }

    #[test]
    fn test_draw_event_with_bad_kind_is_malformed() {
        let parsed = Event::new(
            "draw_event",
            json!({ "drawing_data": { "type": "teleport", "x": 1, "y": 1 } }),
        )
        .parse();
        assert!(matches!(parsed, ParsedEvent::Malformed { .. }));
    }

    #[test]
    fn test_session_ended_without_room() {
        let parsed = Event::new(
            "session_ended",
            json!({ "reason": "user_left", "message": "Partner left the session." }),
        )
        .parse();
        assert_eq!(parsed.room_id(), None);
        assert!(matches!(parsed, ParsedEvent::SessionEnded { ref reason, .. } if reason == "user_left"));
    }

    #[test]
    fn test_partner_left_parsing() {
        let parsed = Event::new(
            "partner_left",
            json!({ "message": "gone", "can_continue": true }),
        )
        .parse();
        assert_eq!(
            parsed,
            ParsedEvent::PartnerLeft {
                message: "gone".into(),
                can_continue: true
            }
        );
    }

    #[test]
    fn test_event_without_data() {
        let parsed = event(r#"{ "event": "request_rejected" }"#).parse();
        assert_eq!(
            parsed,
            ParsedEvent::RequestRejected {
                message: String::new()
            }
        );
    }

    #[test]
    fn test_unknown_event() {
        let parsed = Event::new("new_star", json!({ "id": "s1" })).parse();
        match parsed {
            ParsedEvent::Unknown { event, .. } => assert_eq!(event, "new_star"),
            other => panic!("expected Unknown variant, got {other:?}"),
        }
    }
}
