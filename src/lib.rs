//! Knot client - real-time pairing and collaborative sessions.
//!
//! This library implements the client side of Knot: two anonymous users
//! pair through a posted star and share a time-boxed room with a freehand
//! canvas and a chat.
//!
//! # Architecture
//!
//! Everything runs over one auto-reconnecting WebSocket channel:
//!
//! - **Transport**: one channel per process, bounded reconnection, an
//!   outbox that flushes each queued command exactly once
//! - **Pairing**: claim a star, request its owner, accept or reject
//! - **Session**: `idle → connecting → waiting → active → ended`, with the
//!   server as the only clock
//! - **Workspace**: per-sender stroke buffers and an append-only chat
//!
//! Key design principles:
//!
//! - Server pushes are processed one at a time, each to completion
//! - Malformed or unexpected pushes are ignored, never fatal
//! - Components never hold the socket; they emit through [`Emitter`]
//!
//! # Quick Start
//!
//! ```no_run
//! use knot_client::{KnotClient, KnotEvent, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let client = KnotClient::builder()
//!         .server_url("ws://localhost:5002")
//!         .owned_stars_path("owned_stars.json")
//!         .build()?;
//!     let mut events = client.take_events().expect("first call");
//!
//!     client.connect().await?;
//!     client.request_connection("star-42")?;
//!
//!     while let Some(event) = events.recv().await {
//!         if let KnotEvent::Session(notice) = event {
//!             println!("{notice:?}");
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`client`] | [`KnotClient`], builder, options and event stream |
//! | [`pairing`] | [`ConnectionGateway`] and [`OwnedStars`] |
//! | [`session`] | [`SessionController`] state machine |
//! | [`canvas`] | [`StrokeSyncEngine`] and the render seam |
//! | [`chat`] | [`ChatRelay`] timeline |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`protocol`] | Wire message types |
//! | [`transport`] | WebSocket channel and reconnection |

// ============================================================================
// Modules
// ============================================================================

/// Shared canvas: strokes, brushes and rendering.
pub mod canvas;

/// Session chat.
pub mod chat;

/// Application entry point.
///
/// Use [`KnotClient::builder()`] to create a configured client.
pub mod client;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Type-safe identifiers for Knot entities.
///
/// Newtype wrappers prevent mixing incompatible IDs at compile time.
pub mod identifiers;

/// Star ownership and the pairing handshake.
pub mod pairing;

/// Wire message types.
///
/// Commands sent to and events received from the realtime server.
pub mod protocol;

/// Knot session lifecycle.
pub mod session;

/// WebSocket transport layer.
///
/// The single shared channel, its reconnection policy and the outbox.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Client types
pub use client::{ClientOptions, ConnectionNotice, KnotClient, KnotClientBuilder, KnotEvent};

// Component types
pub use canvas::{Brush, Stroke, StrokeStyle, StrokeSyncEngine, Surface, Tool};
pub use chat::{ChatMessage, ChatRelay};
pub use pairing::{ConnectionGateway, GatewayNotice, OwnedStars, PendingRequest, Role};
pub use session::{EndReason, SessionController, SessionNotice, SessionState, SessionStatus};
pub use transport::{Backoff, ConnectionState, Emitter, TransportAdapter, TransportEvent};

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::{MessageId, RequestId, RoomId, SenderId, StarId, SubscriptionId};
