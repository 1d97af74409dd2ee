//! Type-safe identifiers for Knot entities.
//!
//! Newtype wrappers prevent mixing a room ID with a star ID at compile
//! time. All string identifiers serialize transparently, so they can be
//! used directly in wire payloads.
//!
//! | Type | Issued by | Scope |
//! |------|-----------|-------|
//! | [`StarId`] | data API | a posted star |
//! | [`RoomId`] | server | one Knot session |
//! | [`RequestId`] | server (owner) / client (requester) | one pairing handshake |
//! | [`SenderId`] | server | one transport connection |
//! | [`MessageId`] | client | one chat message |
//! | [`SubscriptionId`] | client | one transport subscription |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// String Identifier Macro
// ============================================================================

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Creates an identifier from any string.
            #[inline]
            #[must_use]
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Returns the identifier as a string slice.
            #[inline]
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Returns `true` if the identifier is empty.
            #[inline]
            #[must_use]
            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            #[inline]
            fn from(value: &str) -> Self {
                Self(value.to_owned())
            }
        }

        impl From<String> for $name {
            #[inline]
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl AsRef<str> for $name {
            #[inline]
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

// ============================================================================
// String Identifiers
// ============================================================================

string_id! {
    /// Identifier of a posted star (the pairing target of a Knot).
    StarId
}

string_id! {
    /// Server-assigned identifier scoping one Knot session's events.
    RoomId
}

string_id! {
    /// Identifier of a pairing handshake.
    ///
    /// Owners receive it from the server in `incoming_request`; requesters
    /// never see the server's ID and track their request under a local one.
    RequestId
}

string_id! {
    /// Stable identifier of one transport connection, issued on connect.
    ///
    /// Also identifies the author of remote strokes and chat messages.
    SenderId
}

string_id! {
    /// Identifier of a chat message, derived from sender and timestamp.
    MessageId
}

impl RequestId {
    /// Generates a new random request ID (UUID v4).
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl SenderId {
    /// Placeholder sender used for local messages before a channel ID exists.
    #[must_use]
    pub fn local_placeholder() -> Self {
        Self::from("me")
    }
}

impl MessageId {
    /// Derives a message ID from its sender and millisecond timestamp.
    #[must_use]
    pub fn derive(sender: &SenderId, timestamp_ms: u64) -> Self {
        Self(format!("{sender}-{timestamp_ms}"))
    }
}

// ============================================================================
// SubscriptionId
// ============================================================================

/// Counter backing [`SubscriptionId::next`].
static NEXT_SUBSCRIPTION: AtomicU64 = AtomicU64::new(1);

/// Handle returned when subscribing to transport events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    /// Allocates a process-unique subscription ID.
    #[inline]
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_SUBSCRIPTION.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw value.
    #[inline]
    #[must_use]
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

// ============================================================================
// Tests
// ============================================================================
