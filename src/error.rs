//! Error types for the Knot client.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use knot_client::{KnotClient, Result};
//!
//! async fn example(client: &KnotClient) -> Result<()> {
//!     client.request_connection("star-42".into())?;
//!     client.send_chat("hello")?;
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`] |
//! | Connection | [`Error::Connection`], [`Error::ConnectionTimeout`], [`Error::ConnectionClosed`], [`Error::ReconnectExhausted`], [`Error::OutboxFull`] |
//! | Protocol | [`Error::Protocol`], [`Error::Server`] |
//! | Pairing | [`Error::UnknownRequest`] |
//! | Session | [`Error::InvalidState`], [`Error::NotInRoom`] |
//! | Validation | [`Error::EmptyMessage`], [`Error::MessageTooLong`], [`Error::SendThrottled`], [`Error::InvalidStyle`] |
//! | Storage | [`Error::Storage`] |
//! | External | [`Error::Io`], [`Error::Json`], [`Error::WebSocket`], [`Error::Url`] |

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::path::PathBuf;
use std::result::Result as StdResult;

use thiserror::Error;
use tokio_tungstenite::tungstenite::Error as WsError;

use crate::identifiers::RequestId;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Each variant includes relevant context for debugging.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when client options are invalid.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// WebSocket connection failed.
    #[error("Connection failed: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
    },

    /// Timed out dialing the server or waiting for its handshake.
    #[error("Connection timeout after {timeout_ms}ms")]
    ConnectionTimeout {
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// WebSocket connection closed unexpectedly.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Every reconnection attempt failed.
    #[error("Gave up reconnecting after {attempts} attempts")]
    ReconnectExhausted {
        /// Number of attempts made.
        attempts: u32,
    },

    /// Too many sends queued while disconnected.
    #[error("Outbox full: {capacity} commands already queued")]
    OutboxFull {
        /// Configured outbox capacity.
        capacity: usize,
    },

    // ========================================================================
    // Protocol Errors
    // ========================================================================
    /// Protocol violation or unexpected frame.
    #[error("Protocol error: {message}")]
    Protocol {
        /// Description of the protocol violation.
        message: String,
    },

    /// The server answered with an `error` push.
    #[error("Server error: {message}")]
    Server {
        /// Message supplied by the server.
        message: String,
    },

    // ========================================================================
    // Pairing Errors
    // ========================================================================
    /// No outstanding incoming request with this ID.
    #[error("Unknown request: {request_id}")]
    UnknownRequest {
        /// The request ID that was not found.
        request_id: RequestId,
    },

    // ========================================================================
    // Session Errors
    // ========================================================================
    /// Operation not allowed in the current session state.
    #[error("Invalid session state: cannot {operation} while {state}")]
    InvalidState {
        /// The attempted operation.
        operation: String,
        /// The state the session was in.
        state: String,
    },

    /// Operation requires a room but none is assigned.
    #[error("Not in a room")]
    NotInRoom,

    // ========================================================================
    // Validation Errors
    // ========================================================================
    /// Chat message is empty after trimming.
    #[error("Message is empty")]
    EmptyMessage,

    /// Chat message exceeds the configured maximum.
    #[error("Message too long: {length} > {max} characters")]
    MessageTooLong {
        /// Length of the rejected message.
        length: usize,
        /// Maximum allowed length.
        max: usize,
    },

    /// A chat message was sent again before the cooldown elapsed.
    #[error("Sending too fast, retry in {retry_in_ms}ms")]
    SendThrottled {
        /// Milliseconds left on the cooldown.
        retry_in_ms: u64,
    },

    /// Stroke color or width is invalid.
    #[error("Invalid stroke style: {message}")]
    InvalidStyle {
        /// Description of the invalid style.
        message: String,
    },

    // ========================================================================
    // Storage Errors
    // ========================================================================
    /// Owned-star store could not be read or written.
    #[error("Storage error at {path}: {message}")]
    Storage {
        /// Path of the store file.
        path: PathBuf,
        /// Description of the failure.
        message: String,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),

    /// Server URL could not be parsed.
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a connection error.
    #[inline]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Creates a connection timeout error.
    #[inline]
    pub fn connection_timeout(timeout_ms: u64) -> Self {
        Self::ConnectionTimeout { timeout_ms }
    }

    /// Creates a reconnect exhausted error.
    #[inline]
    pub fn reconnect_exhausted(attempts: u32) -> Self {
        Self::ReconnectExhausted { attempts }
    }

    /// Creates an outbox full error.
    #[inline]
    pub fn outbox_full(capacity: usize) -> Self {
        Self::OutboxFull { capacity }
    }

    /// Creates a protocol error.
    #[inline]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Creates a server error from an `error` push.
    #[inline]
    pub fn server(message: impl Into<String>) -> Self {
        Self::Server {
            message: message.into(),
        }
    }

    /// Creates an unknown request error.
    #[inline]
    pub fn unknown_request(request_id: RequestId) -> Self {
        Self::UnknownRequest { request_id }
    }

    /// Creates an invalid state error.
    #[inline]
    pub fn invalid_state(operation: impl Into<String>, state: impl Into<String>) -> Self {
        Self::InvalidState {
            operation: operation.into(),
            state: state.into(),
        }
    }

    /// Creates a message too long error.
    #[inline]
    pub fn message_too_long(length: usize, max: usize) -> Self {
        Self::MessageTooLong { length, max }
    }

    /// Creates a send throttled error.
    #[inline]
    pub fn send_throttled(retry_in_ms: u64) -> Self {
        Self::SendThrottled { retry_in_ms }
    }

    /// Creates an invalid style error.
    #[inline]
    pub fn invalid_style(message: impl Into<String>) -> Self {
        Self::InvalidStyle {
            message: message.into(),
        }
    }

    /// Creates a storage error.
    #[inline]
    pub fn storage(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Storage {
            path: path.into(),
            message: message.into(),
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a timeout error.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::ConnectionTimeout { .. })
    }

    /// Returns `true` if this is a connection error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. }
                | Self::ConnectionTimeout { .. }
                | Self::ConnectionClosed
                | Self::ReconnectExhausted { .. }
                | Self::OutboxFull { .. }
                | Self::WebSocket(_)
        )
    }

    /// Returns `true` if the input was rejected before anything was sent.
    #[inline]
    #[must_use]
    pub fn is_validation_error(&self) -> bool {
        matches!(
            self,
            Self::EmptyMessage
                | Self::MessageTooLong { .. }
                | Self::SendThrottled { .. }
                | Self::InvalidStyle { .. }
        )
    }

    /// Returns `true` if this error is recoverable.
    ///
    /// Recoverable errors may succeed when the user repeats the action.
    #[inline]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::ConnectionTimeout { .. }
                | Self::ConnectionClosed
                | Self::Connection { .. }
                | Self::SendThrottled { .. }
                | Self::Server { .. }
        )
    }
}

// ============================================================================
// Tests
// ============================================================================
