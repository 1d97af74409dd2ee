//! WebSocket transport layer.
//!
//! This module owns the single realtime channel shared by pairing,
//! session, canvas and chat.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────┐                    ┌─────────────────┐
//! │  TransportAdapter        │                    │  Realtime       │
//! │   supervisor ─ dial      │     WebSocket      │  server         │
//! │   Outbox (while down)    │◄──────────────────►│                 │
//! │   → Connection           │  ws://host:5002    │  rooms, timers, │
//! │      event loop          │                    │  relay          │
//! └──────────────────────────┘                    └─────────────────┘
//! ```
//!
//! # Connection Lifecycle
//!
//! 1. `TransportAdapter::connect` - Spawn the supervisor and dial
//! 2. Wait for the server's `connected{sid}` handshake
//! 3. Flush the outbox, then `Connection` carries commands and pushes
//! 4. On loss, redial with the reconnect policy
//! 5. `TransportAdapter::disconnect` - Stop for good
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `adapter` | Singleton channel, reconnection and subscriptions |
//! | `connection` | WebSocket connection and event loop |
//! | `emitter` | Outbound seam used by every component |
//! | `outbox` | Bounded queue for sends made while down |

// ============================================================================
// Submodules
// ============================================================================

/// Singleton channel with reconnection.
pub mod adapter;

/// WebSocket connection and event loop.
pub mod connection;

/// Outbound seam trait.
pub mod emitter;

/// Offline send queue.
pub mod outbox;

// ============================================================================
// Re-exports
// ============================================================================

pub use adapter::{
    ANY_EVENT, Backoff, ConnectionState, EventHandler, ReconnectPolicy, TransportAdapter,
    TransportEvent, TransportOptions,
};
pub use connection::Connection;
pub use emitter::Emitter;
pub use outbox::Outbox;
