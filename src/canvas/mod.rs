//! Shared freehand canvas.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `engine` | [`StrokeSyncEngine`]: local drawing, remote buffers, undo |
//! | `stroke` | Points, styles, tools and strokes |
//! | `surface` | [`Surface`] render seam and [`RecordingSurface`] |

// ============================================================================
// Submodules
// ============================================================================

/// Stroke synchronization.
pub mod engine;

/// Stroke model.
pub mod stroke;

/// Render seam.
pub mod surface;

// ============================================================================
// Re-exports
// ============================================================================

pub use engine::{CanvasOptions, DEFAULT_EMIT_EVERY, StrokeSyncEngine};
pub use stroke::{
    Author, BRUSH_SIZES, Brush, DEFAULT_BACKGROUND, DEFAULT_COLOR, DEFAULT_WIDTH, PALETTE, Point,
    Stroke, StrokeStyle, Tool, validate_color, validate_width,
};
pub use surface::{NullSurface, RecordingSurface, Surface, SurfaceFactory, SurfaceOp};
