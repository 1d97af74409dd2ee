//! Stroke model: points, styles, tools and authorship.

// ============================================================================
// Imports
// ============================================================================

use std::sync::LazyLock;

use regex::Regex;

use crate::error::{Error, Result};
use crate::identifiers::SenderId;

// ============================================================================
// Constants
// ============================================================================

/// Default local pen color.
pub const DEFAULT_COLOR: &str = "#8B5CF6";

/// Default pen width.
pub const DEFAULT_WIDTH: f32 = 3.0;

/// Default canvas background, also used by the eraser.
pub const DEFAULT_BACKGROUND: &str = "#FFFFFF";

/// Color for remote points that declare none.
pub const REMOTE_DEFAULT_COLOR: &str = "#000000";

/// Widest accepted pen.
pub const MAX_WIDTH: f32 = 64.0;

/// Toolbar palette.
pub const PALETTE: [&str; 7] = [
    "#8B5CF6", "#EC4899", "#3B82F6", "#10B981", "#F59E0B", "#EF4444", "#000000",
];

/// Toolbar brush sizes.
pub const BRUSH_SIZES: [f32; 3] = [2.0, 4.0, 8.0];

static COLOR_PATTERN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^#[0-9A-Fa-f]{6}$").ok());

// ============================================================================
// Point
// ============================================================================

/// A position on the canvas.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    /// Horizontal coordinate.
    pub x: f64,
    /// Vertical coordinate.
    pub y: f64,
}

impl Point {
    /// Creates a point.
    #[inline]
    #[must_use]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

// ============================================================================
// StrokeStyle
// ============================================================================

/// Color and width fixed for a whole stroke.
#[derive(Debug, Clone, PartialEq)]
pub struct StrokeStyle {
    color: String,
    width: f32,
}

impl StrokeStyle {
    /// Creates a validated style.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidStyle`] unless `color` is `#RRGGBB` and
    /// `width` is in `(0, 64]`.
    pub fn new(color: impl Into<String>, width: f32) -> Result<Self> {
        let color = color.into();
        validate_color(&color)?;
        validate_width(width)?;
        Ok(Self { color, width })
    }

    /// Style declared by a remote point, with defaults for missing fields.
    ///
    /// Remote styles are trusted as sent.
    #[must_use]
    pub fn remote(color: Option<&str>, width: Option<f32>) -> Self {
        Self {
            color: color.unwrap_or(REMOTE_DEFAULT_COLOR).to_string(),
            width: width.unwrap_or(DEFAULT_WIDTH),
        }
    }

    /// Stroke color.
    #[inline]
    #[must_use]
    pub fn color(&self) -> &str {
        &self.color
    }

    /// Stroke width.
    #[inline]
    #[must_use]
    pub fn width(&self) -> f32 {
        self.width
    }
}

impl Default for StrokeStyle {
    fn default() -> Self {
        Self {
            color: DEFAULT_COLOR.to_string(),
            width: DEFAULT_WIDTH,
        }
    }
}

/// Checks a `#RRGGBB` color.
///
/// # Errors
///
/// Returns [`Error::InvalidStyle`] for anything else.
pub fn validate_color(color: &str) -> Result<()> {
    if COLOR_PATTERN
        .as_ref()
        .is_some_and(|pattern| pattern.is_match(color))
    {
        Ok(())
    } else {
        Err(Error::invalid_style(format!("color {color:?} is not #RRGGBB")))
    }
}

/// Checks a pen width.
///
/// # Errors
///
/// Returns [`Error::InvalidStyle`] unless `0 < width <= 64`.
pub fn validate_width(width: f32) -> Result<()> {
    if width.is_finite() && width > 0.0 && width <= MAX_WIDTH {
        Ok(())
    } else {
        Err(Error::invalid_style(format!(
            "width {width} is outside (0, {MAX_WIDTH}]"
        )))
    }
}

// ============================================================================
// Tool and Brush
// ============================================================================

/// Drawing tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Tool {
    /// Draws in the selected color.
    #[default]
    Pen,
    /// Draws in the background color.
    Eraser,
}

/// The local toolbar selection.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Brush {
    /// Selected tool.
    pub tool: Tool,
    /// Selected pen style.
    pub style: StrokeStyle,
}

impl Brush {
    /// Style a new stroke is drawn with.
    #[must_use]
    pub fn effective_style(&self, background: &str) -> StrokeStyle {
        match self.tool {
            Tool::Pen => self.style.clone(),
            Tool::Eraser => StrokeStyle {
                color: background.to_string(),
                width: self.style.width,
            },
        }
    }

    /// Selects a color.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidStyle`] for a malformed color.
    pub fn set_color(&mut self, color: &str) -> Result<()> {
        validate_color(color)?;
        self.style.color = color.to_string();
        Ok(())
    }

    /// Selects a width.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidStyle`] for a width outside `(0, 64]`.
    pub fn set_width(&mut self, width: f32) -> Result<()> {
        validate_width(width)?;
        self.style.width = width;
        Ok(())
    }
}

// ============================================================================
// Stroke
// ============================================================================

/// Who drew a stroke.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Author {
    /// The local user.
    Local,
    /// A remote participant.
    Remote(SenderId),
}

/// One continuous gesture from start to end.
#[derive(Debug, Clone, PartialEq)]
pub struct Stroke {
    /// Who drew it.
    pub author: Author,
    /// Style taken from the first point.
    pub style: StrokeStyle,
    /// Points in drawing order.
    pub points: Vec<Point>,
}

impl Stroke {
    /// Opens a stroke at its first point.
    #[must_use]
    pub fn begin(author: Author, style: StrokeStyle, at: Point) -> Self {
        Self {
            author,
            style,
            points: vec![at],
        }
    }

    /// Last point, if any.
    #[inline]
    #[must_use]
    pub fn last(&self) -> Option<Point> {
        self.points.last().copied()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_palette_colors_are_valid() {
        for color in PALETTE {
            assert!(validate_color(color).is_ok(), "{color}");
        }
        for width in BRUSH_SIZES {
            assert!(validate_width(width).is_ok());
        }
    }

    #[test]
    fn test_style_validation() {
        assert!(StrokeStyle::new("#abcdef", 3.0).is_ok());
        assert!(StrokeStyle::new("purple", 3.0).is_err());
        assert!(StrokeStyle::new("#12345", 3.0).is_err());
        assert!(StrokeStyle::new("#123456", 0.0).is_err());
        assert!(StrokeStyle::new("#123456", 65.0).is_err());
        assert!(StrokeStyle::new("#123456", f32::NAN).is_err());
    }

    #[test]
    fn test_remote_style_defaults() {
        let style = StrokeStyle::remote(None, None);
        assert_eq!(style.color(), "#000000");
        assert_eq!(style.width(), 3.0);
    }

    #[test]
    fn test_eraser_uses_background() {
        let mut brush = Brush::default();
        brush.set_width(8.0).expect("width");
        brush.tool = Tool::Eraser;

        let style = brush.effective_style(DEFAULT_BACKGROUND);
        assert_eq!(style.color(), "#FFFFFF");
        assert_eq!(style.width(), 8.0);
    }

    #[test]
    fn test_brush_rejects_bad_color_without_change() {
        let mut brush = Brush::default();
        assert!(brush.set_color("#zzzzzz").is_err());
        assert_eq!(brush.style.color(), DEFAULT_COLOR);
    }
}
