//! Outbound command definitions.
//!
//! Commands are serialized as `{"event": "<name>", "data": {...}}`
//! envelopes, one per WebSocket text frame.
//!
//! | Event | Payload | Sent by |
//! |-------|---------|---------|
//! | `claim_star` | `star_id` | ConnectionGateway |
//! | `request_connection` | `star_id` | ConnectionGateway |
//! | `accept_request` | `request_id` | ConnectionGateway |
//! | `reject_request` | `request_id` | ConnectionGateway |
//! | `leave_knot` | `room_id` | SessionController |
//! | `chat_message` | `room_id`, `message` | ChatRelay |
//! | `draw_event` | `room_id`, `drawing_data` | StrokeSyncEngine |

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};

use crate::identifiers::{RequestId, RoomId, StarId};

// ============================================================================
// Command
// ============================================================================

/// A client → server message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum Command {
    /// Declare the local user as the reachable owner of a star.
    ClaimStar {
        /// Star being claimed.
        star_id: StarId,
    },

    /// Ask the owner of a star for a Knot.
    RequestConnection {
        /// Target star.
        star_id: StarId,
    },

    /// Accept an incoming pairing request.
    AcceptRequest {
        /// Server-issued request ID.
        request_id: RequestId,
    },

    /// Decline an incoming pairing request.
    RejectRequest {
        /// Server-issued request ID.
        request_id: RequestId,
    },

    /// Leave the current Knot.
    LeaveKnot {
        /// Room being left.
        room_id: RoomId,
    },

    /// Chat text for the room.
    ChatMessage {
        /// Target room.
        room_id: RoomId,
        /// Trimmed message text.
        message: String,
    },

    /// One drawing point for the room.
    DrawEvent {
        /// Target room.
        room_id: RoomId,
        /// Point payload.
        drawing_data: DrawingData,
    },
}

impl Command {
    /// Returns the wire event name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::ClaimStar { .. } => "claim_star",
            Self::RequestConnection { .. } => "request_connection",
            Self::AcceptRequest { .. } => "accept_request",
            Self::RejectRequest { .. } => "reject_request",
            Self::LeaveKnot { .. } => "leave_knot",
            Self::ChatMessage { .. } => "chat_message",
            Self::DrawEvent { .. } => "draw_event",
        }
    }
}

// ============================================================================
// DrawingData
// ============================================================================

/// Kind tag of a drawing point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PointKind {
    /// First point of a stroke.
    Start,
    /// Continuation point.
    Draw,
    /// Stroke terminator (no coordinates).
    End,
}

/// Point payload of a `draw_event`, in either direction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrawingData {
    /// Point kind.
    #[serde(rename = "type")]
    pub kind: PointKind,

    /// Horizontal position (absent on `end`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<f64>,

    /// Vertical position (absent on `end`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<f64>,

    /// Stroke color as `#RRGGBB`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,

    /// Stroke width in pixels.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<f32>,
}

impl DrawingData {
    /// Creates a positioned point with its style.
    #[must_use]
    pub fn point(kind: PointKind, x: f64, y: f64, color: impl Into<String>, width: f32) -> Self {
        Self {
            kind,
            x: Some(x),
            y: Some(y),
            color: Some(color.into()),
            width: Some(width),
        }
    }

    /// Creates an `end` marker carrying no coordinates.
    #[must_use]
    pub fn end() -> Self {
        Self {
            kind: PointKind::End,
            x: None,
            y: None,
            color: None,
            width: None,
        }
    }

    /// Returns the position if both coordinates are present.
    #[inline]
    #[must_use]
    pub fn position(&self) -> Option<(f64, f64)> {
        Some((self.x?, self.y?))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    #[test]
    fn test_claim_star_envelope() {
        let command = Command::ClaimStar {
            star_id: StarId::from("star-42"),
        };
        let value: Value = serde_json::to_value(&command).expect("serialize");
        assert_eq!(
            value,
            json!({ "event": "claim_star", "data": { "star_id": "star-42" } })
        );
        assert_eq!(command.name(), "claim_star");
    }

    #[test]
    fn test_draw_event_envelope() {
        let command = Command::DrawEvent {
            room_id: RoomId::from("R1"),
            drawing_data: DrawingData::point(PointKind::Start, 10.0, 20.5, "#8B5CF6", 3.0),
        };
        let value: Value = serde_json::to_value(&command).expect("serialize");
        assert_eq!(value["event"], "draw_event");
        assert_eq!(value["data"]["room_id"], "R1");
        assert_eq!(value["data"]["drawing_data"]["type"], "start");
        assert_eq!(value["data"]["drawing_data"]["x"], 10.0);
        assert_eq!(value["data"]["drawing_data"]["color"], "#8B5CF6");
    }

    #[test]
    fn test_end_point_has_no_coordinates() {
        let value = serde_json::to_value(DrawingData::end()).expect("serialize");
        assert_eq!(value, json!({ "type": "end" }));
    }

    #[test]
    fn test_command_names_match_wire() {
        let command = Command::ChatMessage {
            room_id: RoomId::from("R1"),
            message: "hi".into(),
        };
        let value = serde_json::to_value(&command).expect("serialize");
        assert_eq!(value["event"], command.name());
    }

    #[test]
    fn test_drawing_data_position() {
        assert_eq!(
            DrawingData::point(PointKind::Draw, 1.0, 2.0, "#000000", 2.0).position(),
            Some((1.0, 2.0))
        );
        assert_eq!(DrawingData::end().position(), None);
    }
}
