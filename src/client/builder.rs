//! Builder pattern for client configuration.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use knot_client::KnotClient;
//!
//! # fn example() -> knot_client::Result<()> {
//! let client = KnotClient::builder()
//!     .server_url("wss://knot.example.com/socket")
//!     .reconnect_attempts(10)
//!     .reconnect_delay(Duration::from_millis(500))
//!     .owned_stars_path("/tmp/knot/owned_stars.json")
//!     .build()?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::path::PathBuf;
use std::time::Duration;

use url::Url;

use crate::canvas::{SurfaceFactory, validate_color, validate_width};
use crate::error::{Error, Result};
use crate::pairing::OwnedStars;
use crate::transport::Backoff;
use crate::transport::adapter::DEFAULT_SERVER_URL;

use super::core::KnotClient;
use super::options::ClientOptions;

// ============================================================================
// KnotClientBuilder
// ============================================================================

/// Builder for configuring a [`KnotClient`].
///
/// Use [`KnotClient::builder()`] to create a new builder.
#[derive(Default, Clone)]
pub struct KnotClientBuilder {
    server_url: Option<String>,
    reconnect_attempts: Option<u32>,
    reconnect_delay: Option<Duration>,
    reconnect_backoff: Option<Backoff>,
    connect_timeout: Option<Duration>,
    handshake_timeout: Option<Duration>,
    outbox_capacity: Option<usize>,
    owned_stars_path: Option<PathBuf>,
    request_timeout: Option<Duration>,
    chat_max_length: Option<usize>,
    chat_cooldown: Option<Duration>,
    draw_emit_every: Option<usize>,
    default_color: Option<String>,
    default_width: Option<f32>,
    background_color: Option<String>,
    surface_factory: Option<SurfaceFactory>,
}

// ============================================================================
// KnotClientBuilder Implementation
// ============================================================================

impl KnotClientBuilder {
    /// Creates a builder with every option defaulted.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the realtime server URL (`ws://` or `wss://`).
    #[inline]
    #[must_use]
    pub fn server_url(mut self, url: impl Into<String>) -> Self {
        self.server_url = Some(url.into());
        self
    }

    /// Sets how many reconnection attempts follow a lost connection.
    #[inline]
    #[must_use]
    pub fn reconnect_attempts(mut self, attempts: u32) -> Self {
        self.reconnect_attempts = Some(attempts);
        self
    }

    /// Sets the base delay between reconnection attempts.
    #[inline]
    #[must_use]
    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = Some(delay);
        self
    }

    /// Sets how the reconnection delay grows.
    #[inline]
    #[must_use]
    pub fn reconnect_backoff(mut self, backoff: Backoff) -> Self {
        self.reconnect_backoff = Some(backoff);
        self
    }

    /// Sets the socket open timeout.
    #[inline]
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Sets how long to wait for the server's `connected` handshake.
    #[inline]
    #[must_use]
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = Some(timeout);
        self
    }

    /// Sets how many commands are held while disconnected.
    #[inline]
    #[must_use]
    pub fn outbox_capacity(mut self, capacity: usize) -> Self {
        self.outbox_capacity = Some(capacity);
        self
    }

    /// Persists owned stars to a JSON file.
    ///
    /// Without a path, ownership lasts only as long as the client.
    #[inline]
    #[must_use]
    pub fn owned_stars_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.owned_stars_path = Some(path.into());
        self
    }

    /// Sets the age at which unanswered requests expire.
    #[inline]
    #[must_use]
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Sets the longest chat message, in characters.
    #[inline]
    #[must_use]
    pub fn chat_max_length(mut self, length: usize) -> Self {
        self.chat_max_length = Some(length);
        self
    }

    /// Sets the minimum spacing between chat sends.
    #[inline]
    #[must_use]
    pub fn chat_cooldown(mut self, cooldown: Duration) -> Self {
        self.chat_cooldown = Some(cooldown);
        self
    }

    /// Emits one draw event per `every` locally generated points.
    #[inline]
    #[must_use]
    pub fn draw_emit_every(mut self, every: usize) -> Self {
        self.draw_emit_every = Some(every);
        self
    }

    /// Sets the initial pen color (`#RRGGBB`).
    #[inline]
    #[must_use]
    pub fn default_color(mut self, color: impl Into<String>) -> Self {
        self.default_color = Some(color.into());
        self
    }

    /// Sets the initial pen width.
    #[inline]
    #[must_use]
    pub fn default_width(mut self, width: f32) -> Self {
        self.default_width = Some(width);
        self
    }

    /// Sets the canvas background, which is also the eraser color.
    #[inline]
    #[must_use]
    pub fn background_color(mut self, color: impl Into<String>) -> Self {
        self.background_color = Some(color.into());
        self
    }

    /// Sets the render target created for each session canvas.
    #[inline]
    #[must_use]
    pub fn surface_factory(mut self, factory: SurfaceFactory) -> Self {
        self.surface_factory = Some(factory);
        self
    }

    /// Validates the configuration into [`ClientOptions`].
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] for a bad URL or a zero limit
    /// - [`Error::InvalidStyle`] for a bad color or width
    pub fn options(&self) -> Result<ClientOptions> {
        let mut options = ClientOptions::new(self.validate_url()?);

        if let Some(attempts) = self.reconnect_attempts {
            options.reconnect.attempts = attempts;
        }
        if let Some(delay) = self.reconnect_delay {
            options.reconnect.delay = delay;
        }
        if let Some(backoff) = self.reconnect_backoff {
            options.reconnect.backoff = backoff;
        }
        if let Some(timeout) = self.connect_timeout {
            options.connect_timeout = timeout;
        }
        if let Some(timeout) = self.handshake_timeout {
            options.handshake_timeout = timeout;
        }
        if let Some(capacity) = self.outbox_capacity {
            options.outbox_capacity = positive(capacity, "outbox_capacity")?;
        }
        options.owned_stars_path = self.owned_stars_path.clone();
        if let Some(timeout) = self.request_timeout {
            options.request_timeout = timeout;
        }
        if let Some(length) = self.chat_max_length {
            options.chat.max_length = positive(length, "chat_max_length")?;
        }
        if let Some(cooldown) = self.chat_cooldown {
            options.chat.cooldown = cooldown;
        }
        if let Some(every) = self.draw_emit_every {
            options.draw_emit_every = positive(every, "draw_emit_every")?;
        }
        if let Some(color) = &self.default_color {
            validate_color(color)?;
            options.default_color = color.clone();
        }
        if let Some(width) = self.default_width {
            validate_width(width)?;
            options.default_width = width;
        }
        if let Some(color) = &self.background_color {
            validate_color(color)?;
            options.background_color = color.clone();
        }
        if let Some(factory) = &self.surface_factory {
            options.surface_factory = factory.clone();
        }

        Ok(options)
    }

    /// Builds the client and loads the owned-star set.
    ///
    /// # Errors
    ///
    /// - Any [`options`](Self::options) error
    /// - [`Error::Storage`] if the owned-star file exists but is unreadable
    pub fn build(self) -> Result<KnotClient> {
        let options = self.options()?;
        let owned = match &options.owned_stars_path {
            Some(path) => OwnedStars::load(path)?,
            None => OwnedStars::in_memory(),
        };

        KnotClient::new(options, owned)
    }
}

// ============================================================================
// Validation
// ============================================================================

impl KnotClientBuilder {
    /// Parses the server URL and checks its scheme.
    fn validate_url(&self) -> Result<Url> {
        let raw = self.server_url.as_deref().unwrap_or(DEFAULT_SERVER_URL);
        let url = Url::parse(raw)
            .map_err(|e| Error::config(format!("Invalid server URL '{raw}': {e}")))?;

        match url.scheme() {
            "ws" | "wss" => Ok(url),
            other => Err(Error::config(format!(
                "Server URL must use ws:// or wss://, got '{other}://'.\n\
                 Example: KnotClient::builder().server_url(\"ws://localhost:5002\")"
            ))),
        }
    }
}

/// Rejects a zero limit.
fn positive(value: usize, name: &str) -> Result<usize> {
    if value == 0 {
        return Err(Error::config(format!("{name} must be greater than zero")));
    }
    Ok(value)
}

impl std::fmt::Debug for KnotClientBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KnotClientBuilder")
            .field("server_url", &self.server_url)
            .field("owned_stars_path", &self.owned_stars_path)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use crate::identifiers::StarId;

    #[test]
    fn test_new_creates_empty_builder() {
        let builder = KnotClientBuilder::new();
        assert!(builder.server_url.is_none());
        assert!(builder.owned_stars_path.is_none());
    }

    #[test]
    fn test_default_url() {
        let options = KnotClientBuilder::new().options().expect("options");
        assert_eq!(options.server_url.as_str(), "ws://localhost:5002/");
    }

    #[test]
    fn test_setters_apply() {
        let options = KnotClientBuilder::new()
            .server_url("wss://knot.example.com/socket")
            .reconnect_attempts(2)
            .reconnect_backoff(Backoff::Exponential {
                max: Duration::from_secs(8),
            })
            .chat_max_length(100)
            .draw_emit_every(1)
            .default_color("#10B981")
            .options()
            .expect("options");

        assert_eq!(options.server_url.scheme(), "wss");
        assert_eq!(options.reconnect.attempts, 2);
        assert_eq!(options.reconnect.delay_for(5), Duration::from_secs(8));
        assert_eq!(options.chat.max_length, 100);
        assert_eq!(options.draw_emit_every, 1);
        assert_eq!(options.default_color, "#10B981");
    }

    #[test]
    fn test_build_fails_with_http_url() {
        let err = KnotClientBuilder::new()
            .server_url("http://localhost:5002")
            .build()
            .expect_err("scheme");
        assert!(matches!(err, Error::Config { .. }));
        assert!(err.to_string().contains("ws://"));
    }

    #[test]
    fn test_build_fails_with_garbage_url() {
        let result = KnotClientBuilder::new().server_url("not a url").build();
        assert!(matches!(result, Err(Error::Config { .. })));
    }

    #[test]
    fn test_zero_limits_rejected() {
        assert!(KnotClientBuilder::new().draw_emit_every(0).options().is_err());
        assert!(KnotClientBuilder::new().chat_max_length(0).options().is_err());
        assert!(KnotClientBuilder::new().outbox_capacity(0).options().is_err());
    }

    #[test]
    fn test_bad_style_rejected() {
        let err = KnotClientBuilder::new()
            .default_width(0.0)
            .options()
            .expect_err("width");
        assert!(err.is_validation_error());
        assert!(KnotClientBuilder::new().background_color("white").options().is_err());
    }

    #[test]
    fn test_build_loads_owned_stars() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("owned_stars.json");
        std::fs::write(&path, r#"["star-1","star-2"]"#).expect("write");

        let client = KnotClientBuilder::new()
            .owned_stars_path(&path)
            .build()
            .expect("build");
        assert_eq!(
            client.owned_stars(),
            vec![StarId::from("star-1"), StarId::from("star-2")]
        );
    }

    #[test]
    fn test_build_fails_on_corrupt_store() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("owned_stars.json");
        std::fs::write(&path, "{oops").expect("write");

        let result = KnotClientBuilder::new().owned_stars_path(&path).build();
        assert!(matches!(result, Err(Error::Storage { .. })));
    }

    #[test]
    fn test_builder_is_clone() {
        let builder = KnotClientBuilder::new().server_url("ws://a");
        let cloned = builder.clone();
        assert_eq!(builder.server_url, cloned.server_url);
    }
}
