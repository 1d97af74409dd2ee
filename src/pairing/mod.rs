//! Pairing: owned stars and the request/accept handshake.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `gateway` | [`ConnectionGateway`] and [`PendingRequest`] tracking |
//! | `store` | Durable [`OwnedStars`] set |

// ============================================================================
// Submodules
// ============================================================================

/// Pairing handshake.
pub mod gateway;

/// Owned-star persistence.
pub mod store;

// ============================================================================
// Re-exports
// ============================================================================

pub use gateway::{
    ConnectionGateway, DEFAULT_REQUEST_TIMEOUT, GatewayNotice, PendingRequest, Role,
};
pub use store::OwnedStars;
