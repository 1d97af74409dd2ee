//! Knot session lifecycle.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `controller` | [`SessionController`]: transitions, timer mirror, workspace |
//! | `state` | [`SessionState`], [`SessionStatus`], [`EndReason`] |

// ============================================================================
// Submodules
// ============================================================================

/// Session state machine.
pub mod controller;

/// Session states.
pub mod state;

// ============================================================================
// Re-exports
// ============================================================================

pub use controller::{SessionController, SessionNotice, SessionOptions, Workspace};
pub use state::{EndReason, SessionState, SessionStatus};
