//! Render seam for the shared canvas.
//!
//! The engine never draws pixels itself. It drives a [`Surface`] with
//! polyline primitives; a UI backs it with a real canvas, headless callers
//! and tests use [`RecordingSurface`].

// ============================================================================
// Imports
// ============================================================================

use super::stroke::{Point, StrokeStyle};

// ============================================================================
// Surface
// ============================================================================

/// Polyline drawing target.
pub trait Surface: Send {
    /// Wipes the surface to the background color.
    fn clear(&mut self, background: &str);

    /// Starts a new path at `at` in `style`.
    fn begin_path(&mut self, style: &StrokeStyle, at: Point);

    /// Extends the current path to `to`.
    fn line_to(&mut self, to: Point);
}

/// Builds a fresh surface for each session.
pub type SurfaceFactory = std::sync::Arc<dyn Fn() -> Box<dyn Surface> + Send + Sync>;

impl<S: Surface + ?Sized> Surface for Box<S> {
    fn clear(&mut self, background: &str) {
        (**self).clear(background);
    }

    fn begin_path(&mut self, style: &StrokeStyle, at: Point) {
        (**self).begin_path(style, at);
    }

    fn line_to(&mut self, to: Point) {
        (**self).line_to(to);
    }
}

// ============================================================================
// RecordingSurface
// ============================================================================

/// One recorded drawing call.
#[derive(Debug, Clone, PartialEq)]
pub enum SurfaceOp {
    /// `clear(background)`.
    Clear(String),
    /// `begin_path(style, at)`.
    BeginPath(StrokeStyle, Point),
    /// `line_to(to)`.
    LineTo(Point),
}

/// Surface that records calls instead of drawing.
#[derive(Debug, Clone, Default)]
pub struct RecordingSurface {
    ops: Vec<SurfaceOp>,
}

impl RecordingSurface {
    /// Creates an empty recording.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Recorded calls in order.
    #[must_use]
    pub fn ops(&self) -> &[SurfaceOp] {
        &self.ops
    }

    /// Number of paths begun.
    #[must_use]
    pub fn path_count(&self) -> usize {
        self.ops
            .iter()
            .filter(|op| matches!(op, SurfaceOp::BeginPath(..)))
            .count()
    }

    /// Forgets every recorded call.
    pub fn reset(&mut self) {
        self.ops.clear();
    }
}

impl Surface for RecordingSurface {
    fn clear(&mut self, background: &str) {
        self.ops.push(SurfaceOp::Clear(background.to_string()));
    }

    fn begin_path(&mut self, style: &StrokeStyle, at: Point) {
        self.ops.push(SurfaceOp::BeginPath(style.clone(), at));
    }

    fn line_to(&mut self, to: Point) {
        self.ops.push(SurfaceOp::LineTo(to));
    }
}

/// Surface that discards every call.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSurface;

impl Surface for NullSurface {
    fn clear(&mut self, _background: &str) {}

    fn begin_path(&mut self, _style: &StrokeStyle, _at: Point) {}

    fn line_to(&mut self, _to: Point) {}
}
