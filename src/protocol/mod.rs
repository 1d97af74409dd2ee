//! WebSocket protocol message types.
//!
//! This module defines the message format exchanged with the realtime
//! server. Every WebSocket text frame carries one JSON envelope:
//!
//! ```json
//! { "event": "<name>", "data": { ... } }
//! ```
//!
//! # Protocol Overview
//!
//! | Message Type | Direction | Purpose |
//! |--------------|-----------|---------|
//! | [`Command`] | Client → Server | Pairing, session and workspace intents |
//! | [`Event`] | Server → Client | Handshake, pairing, timer and workspace pushes |
//!
//! The first frame the server sends on a fresh socket is the
//! `connected{sid}` handshake.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `command` | Outbound commands and drawing payloads |
//! | `event` | Inbound events and typed parsing |

// ============================================================================
// Submodules
// ============================================================================

/// Outbound command definitions.
pub mod command;

/// Inbound event types.
pub mod event;

// ============================================================================
// Re-exports
// ============================================================================

pub use command::{Command, DrawingData, PointKind};
pub use event::{Event, ParsedEvent};
