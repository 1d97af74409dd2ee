//! Client configuration.
//!
//! [`ClientOptions`] gathers every tunable of the subsystem and splits
//! into the per-component option structs.
//!
//! | Option | Default |
//! |--------|---------|
//! | `server_url` | `ws://localhost:5002` |
//! | `reconnect` | 5 attempts, 1 s, fixed |
//! | `connect_timeout` | 10 s |
//! | `handshake_timeout` | 10 s |
//! | `outbox_capacity` | 1024 |
//! | `owned_stars_path` | in memory |
//! | `request_timeout` | 120 s |
//! | `chat` | 500 chars, 300 ms cooldown |
//! | `draw_emit_every` | 3 |
//! | `default_color` | `#8B5CF6` |
//! | `default_width` | 3 |
//! | `background_color` | `#FFFFFF` |

// ============================================================================
// Imports
// ============================================================================

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use url::Url;

use crate::canvas::{
    Brush, CanvasOptions, DEFAULT_BACKGROUND, DEFAULT_COLOR, DEFAULT_EMIT_EVERY, DEFAULT_WIDTH,
    RecordingSurface, StrokeStyle, SurfaceFactory, Tool,
};
use crate::chat::ChatOptions;
use crate::error::Result;
use crate::pairing::DEFAULT_REQUEST_TIMEOUT;
use crate::session::SessionOptions;
use crate::transport::{ReconnectPolicy, TransportOptions};
use crate::transport::adapter::{
    DEFAULT_CONNECT_TIMEOUT, DEFAULT_HANDSHAKE_TIMEOUT, DEFAULT_OUTBOX_CAPACITY,
};

// ============================================================================
// ClientOptions
// ============================================================================

/// Validated client configuration.
///
/// Built by [`KnotClientBuilder`](super::KnotClientBuilder).
#[derive(Clone)]
pub struct ClientOptions {
    /// WebSocket endpoint of the realtime server.
    pub server_url: Url,
    /// Reconnection policy.
    pub reconnect: ReconnectPolicy,
    /// Timeout for opening the socket.
    pub connect_timeout: Duration,
    /// Timeout for the `connected` handshake.
    pub handshake_timeout: Duration,
    /// Commands held while disconnected.
    pub outbox_capacity: usize,
    /// Durable owned-star file, `None` for in-memory.
    pub owned_stars_path: Option<PathBuf>,
    /// Age at which pending requests expire.
    pub request_timeout: Duration,
    /// Chat limits.
    pub chat: ChatOptions,
    /// Locally generated points per emitted draw event.
    pub draw_emit_every: usize,
    /// Initial pen color.
    pub default_color: String,
    /// Initial pen width.
    pub default_width: f32,
    /// Canvas background, also the eraser color.
    pub background_color: String,
    /// Render target for each session canvas.
    pub surface_factory: SurfaceFactory,
}

impl ClientOptions {
    /// Creates options for a server URL with every other value defaulted.
    #[must_use]
    pub fn new(server_url: Url) -> Self {
        Self {
            server_url,
            reconnect: ReconnectPolicy::default(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            outbox_capacity: DEFAULT_OUTBOX_CAPACITY,
            owned_stars_path: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            chat: ChatOptions::default(),
            draw_emit_every: DEFAULT_EMIT_EVERY,
            default_color: DEFAULT_COLOR.to_string(),
            default_width: DEFAULT_WIDTH,
            background_color: DEFAULT_BACKGROUND.to_string(),
            surface_factory: Arc::new(|| Box::new(RecordingSurface::new())),
        }
    }

    /// Transport slice.
    #[must_use]
    pub fn transport(&self) -> TransportOptions {
        TransportOptions {
            server_url: self.server_url.clone(),
            reconnect: self.reconnect,
            connect_timeout: self.connect_timeout,
            handshake_timeout: self.handshake_timeout,
            outbox_capacity: self.outbox_capacity,
        }
    }

    /// Session slice.
    #[must_use]
    pub fn session(&self) -> SessionOptions {
        SessionOptions {
            chat: self.chat,
            canvas: CanvasOptions {
                emit_every: self.draw_emit_every,
                background: self.background_color.clone(),
            },
            surface_factory: Arc::clone(&self.surface_factory),
        }
    }

    /// Initial toolbar selection.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidStyle`](crate::Error::InvalidStyle) for a
    /// malformed default color or width.
    pub fn brush(&self) -> Result<Brush> {
        Ok(Brush {
            tool: Tool::Pen,
            style: StrokeStyle::new(self.default_color.clone(), self.default_width)?,
        })
    }
}

impl std::fmt::Debug for ClientOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientOptions")
            .field("server_url", &self.server_url.as_str())
            .field("reconnect", &self.reconnect)
            .field("outbox_capacity", &self.outbox_capacity)
            .field("owned_stars_path", &self.owned_stars_path)
            .field("request_timeout", &self.request_timeout)
            .field("chat", &self.chat)
            .field("draw_emit_every", &self.draw_emit_every)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Tests
// ============================================================================
