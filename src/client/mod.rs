//! Application entry point.
//!
//! # Components
//!
//! | Type | Description |
//! |------|-------------|
//! | [`KnotClient`] | Channel, pairing and session behind one handle |
//! | [`KnotClientBuilder`] | Fluent configuration builder |
//! | [`ClientOptions`] | Validated configuration |
//! | [`KnotEvent`] | Application-facing event stream |
//!
//! # Example
//!
//! ```no_run
//! use knot_client::{KnotClient, Result};
//!
//! # async fn example() -> Result<()> {
//! let client = KnotClient::builder()
//!     .owned_stars_path("owned_stars.json")
//!     .build()?;
//!
//! client.connect().await?;
//! client.claim_star("star-42")?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Submodules
// ============================================================================

/// Fluent builder for client configuration.
pub mod builder;

/// Client coordinator.
pub mod core;

/// Event stream types.
pub mod event;

/// Client options.
pub mod options;

// ============================================================================
// Re-exports
// ============================================================================

pub use builder::KnotClientBuilder;
pub use core::KnotClient;
pub use event::{ConnectionNotice, KnotEvent};
pub use options::ClientOptions;
