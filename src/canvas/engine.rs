//! Stroke synchronization between the two participants.
//!
//! [`StrokeSyncEngine`] keeps one ordered list of completed strokes for the
//! session's canvas, one open local stroke and one open buffer per remote
//! sender.
//!
//! # Local Drawing
//!
//! | Pointer | Render | Emit |
//! |---------|--------|------|
//! | down | path start | `start` point with style |
//! | move | segment, always | `draw` point on every Nth point of the stroke |
//! | up | - | `end` marker, stroke appended to the list |
//!
//! # Remote Drawing
//!
//! `start`/`draw` points go to the sender's buffer and render at once in the
//! stroke's declared style. `end` flushes the buffer into the list as one
//! stroke. A `start` arriving over a non-empty buffer flushes the dangling
//! stroke first; a `draw` on an empty buffer starts a path.
//!
//! Undo and clear act on the local canvas only and are not sent.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use rustc_hash::FxHashMap;
use tracing::{debug, trace};

use crate::error::Result;
use crate::identifiers::{RoomId, SenderId};
use crate::protocol::{Command, DrawingData, PointKind};
use crate::transport::Emitter;

use super::stroke::{Author, Brush, DEFAULT_BACKGROUND, Point, Stroke, StrokeStyle, Tool};
use super::surface::Surface;

// ============================================================================
// Constants
// ============================================================================

/// Default throttle: one `draw` emission per this many local points.
pub const DEFAULT_EMIT_EVERY: usize = 3;

// ============================================================================
// CanvasOptions
// ============================================================================

/// Canvas behaviour shared by every session.
#[derive(Debug, Clone, PartialEq)]
pub struct CanvasOptions {
    /// Emit one `draw` point per this many locally generated points.
    pub emit_every: usize,
    /// Background color, painted by the eraser.
    pub background: String,
}

impl Default for CanvasOptions {
    fn default() -> Self {
        Self {
            emit_every: DEFAULT_EMIT_EVERY,
            background: DEFAULT_BACKGROUND.to_string(),
        }
    }
}

// ============================================================================
// StrokeSyncEngine
// ============================================================================

/// Shared drawing surface for one session.
pub struct StrokeSyncEngine<S: Surface = Box<dyn Surface>> {
    emitter: Arc<dyn Emitter>,
    room_id: RoomId,
    options: CanvasOptions,
    brush: Brush,
    local: Option<Stroke>,
    remote: FxHashMap<SenderId, Stroke>,
    strokes: Vec<Stroke>,
    surface: S,
}

impl<S: Surface> StrokeSyncEngine<S> {
    /// Creates an empty canvas for a room.
    pub fn new(
        emitter: Arc<dyn Emitter>,
        room_id: RoomId,
        brush: Brush,
        options: CanvasOptions,
        mut surface: S,
    ) -> Self {
        surface.clear(&options.background);
        Self {
            emitter,
            room_id,
            options,
            brush,
            local: None,
            remote: FxHashMap::default(),
            strokes: Vec::new(),
            surface,
        }
    }

    // ========================================================================
    // Local Drawing
    // ========================================================================

    /// Opens a local stroke with the current brush.
    ///
    /// A stroke still open from a missed pointer-up is closed first.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutboxFull`](crate::Error::OutboxFull) if the point cannot be queued. The
    /// stroke is still drawn locally.
    pub fn pointer_down(&mut self, x: f64, y: f64) -> Result<()> {
        if self.local.is_some() {
            self.pointer_up()?;
        }

        let at = Point::new(x, y);
        let style = self.brush.effective_style(&self.options.background);
        self.surface.begin_path(&style, at);

        let data = DrawingData::point(PointKind::Start, x, y, style.color(), style.width());
        self.local = Some(Stroke::begin(Author::Local, style, at));
        self.send(data)
    }

    /// Extends the open local stroke. Ignored when no stroke is open.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutboxFull`](crate::Error::OutboxFull) if an emitted point cannot be queued.
    pub fn pointer_move(&mut self, x: f64, y: f64) -> Result<()> {
        let emit_every = self.options.emit_every.max(1);
        let Some(stroke) = self.local.as_mut() else {
            return Ok(());
        };

        let at = Point::new(x, y);
        if let Some(previous) = stroke.last() {
            self.surface.begin_path(&stroke.style, previous);
            self.surface.line_to(at);
        }
        stroke.points.push(at);

        if stroke.points.len() % emit_every == 0 {
            let data = DrawingData::point(
                PointKind::Draw,
                x,
                y,
                stroke.style.color(),
                stroke.style.width(),
            );
            return self.send(data);
        }
        Ok(())
    }

    /// Closes the open local stroke. Ignored when no stroke is open.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutboxFull`](crate::Error::OutboxFull) if the `end` marker cannot be queued.
    pub fn pointer_up(&mut self) -> Result<()> {
        let Some(stroke) = self.local.take() else {
            return Ok(());
        };

        trace!(points = stroke.points.len(), "Local stroke completed");
        self.strokes.push(stroke);
        self.send(DrawingData::end())
    }

    // ========================================================================
    // Remote Drawing
    // ========================================================================

    /// Applies one point from a remote sender.
    ///
    /// Returns the point count of a stroke completed by an `end`.
    pub fn apply_remote(&mut self, sender: &SenderId, data: &DrawingData) -> Option<usize> {
        match data.kind {
            PointKind::End => {
                let stroke = self.remote.remove(sender)?;
                let points = stroke.points.len();
                trace!(%sender, points, "Remote stroke completed");
                self.strokes.push(stroke);
                Some(points)
            }

            PointKind::Start | PointKind::Draw => {
                let Some((x, y)) = data.position() else {
                    debug!(%sender, kind = ?data.kind, "Ignoring point without coordinates");
                    return None;
                };
                let at = Point::new(x, y);

                if data.kind == PointKind::Start
                    && let Some(dangling) = self.remote.remove(sender)
                {
                    debug!(%sender, points = dangling.points.len(), "Flushing stroke with lost end");
                    self.strokes.push(dangling);
                }

                match self.remote.get_mut(sender) {
                    Some(stroke) => {
                        if let Some(previous) = stroke.last() {
                            self.surface.begin_path(&stroke.style, previous);
                            self.surface.line_to(at);
                        }
                        stroke.points.push(at);
                    }
                    None => {
                        let style = StrokeStyle::remote(data.color.as_deref(), data.width);
                        self.surface.begin_path(&style, at);
                        self.remote.insert(
                            sender.clone(),
                            Stroke::begin(Author::Remote(sender.clone()), style, at),
                        );
                    }
                }
                None
            }
        }
    }

    // ========================================================================
    // Canvas Operations
    // ========================================================================

    /// Removes the most recent completed stroke, whoever drew it, and
    /// redraws. No-op on an empty canvas.
    pub fn undo(&mut self) -> Option<Stroke> {
        let removed = self.strokes.pop()?;
        self.redraw();
        Some(removed)
    }

    /// Removes every completed stroke and the open local stroke.
    pub fn clear(&mut self) {
        self.strokes.clear();
        self.local = None;
        self.redraw();
    }

    /// Replays every completed stroke as one polyline each.
    pub fn redraw(&mut self) {
        self.surface.clear(&self.options.background);
        for stroke in &self.strokes {
            let mut points = stroke.points.iter();
            let Some(first) = points.next() else {
                continue;
            };
            self.surface.begin_path(&stroke.style, *first);
            for point in points {
                self.surface.line_to(*point);
            }
        }
    }

    // ========================================================================
    // Brush
    // ========================================================================

    /// Selects a pen color for later strokes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidStyle`](crate::Error::InvalidStyle) for a malformed color.
    pub fn set_color(&mut self, color: &str) -> Result<()> {
        self.brush.set_color(color)
    }

    /// Selects a pen width for later strokes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidStyle`](crate::Error::InvalidStyle) for a width outside `(0, 64]`.
    pub fn set_width(&mut self, width: f32) -> Result<()> {
        self.brush.set_width(width)
    }

    /// Selects the tool for later strokes.
    pub fn set_tool(&mut self, tool: Tool) {
        self.brush.tool = tool;
    }

    /// Replaces the whole brush.
    pub fn set_brush(&mut self, brush: Brush) {
        self.brush = brush;
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Completed strokes, oldest first.
    #[inline]
    #[must_use]
    pub fn strokes(&self) -> &[Stroke] {
        &self.strokes
    }

    /// Returns `true` while a local stroke is open.
    #[inline]
    #[must_use]
    pub fn is_drawing(&self) -> bool {
        self.local.is_some()
    }

    /// Open buffer of a remote sender.
    #[must_use]
    pub fn open_remote(&self, sender: &SenderId) -> Option<&Stroke> {
        self.remote.get(sender)
    }

    /// Current brush.
    #[inline]
    #[must_use]
    pub fn brush(&self) -> &Brush {
        &self.brush
    }

    /// Room this canvas belongs to.
    #[inline]
    #[must_use]
    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    /// The render target.
    #[inline]
    #[must_use]
    pub fn surface(&self) -> &S {
        &self.surface
    }

    fn send(&self, drawing_data: DrawingData) -> Result<()> {
        self.emitter
            .emit(Command::DrawEvent {
                room_id: self.room_id.clone(),
                drawing_data,
            })
            .inspect_err(|e| debug!(error = %e, room_id = %self.room_id, "Draw point not sent"))
    }
}

impl<S: Surface> std::fmt::Debug for StrokeSyncEngine<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrokeSyncEngine")
            .field("room_id", &self.room_id)
            .field("strokes", &self.strokes.len())
            .field("drawing", &self.local.is_some())
            .field("open_remote", &self.remote.len())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;

    use crate::canvas::surface::{RecordingSurface, SurfaceOp};
    use crate::transport::emitter::testing::RecordingEmitter;

    fn engine() -> (Arc<RecordingEmitter>, StrokeSyncEngine<RecordingSurface>) {
        let emitter = Arc::new(RecordingEmitter::with_id("me-sid"));
        let engine = StrokeSyncEngine::new(
            emitter.clone(),
            RoomId::from("R1"),
            Brush::default(),
            CanvasOptions::default(),
            RecordingSurface::new(),
        );
        (emitter, engine)
    }

    fn drawn(emitter: &RecordingEmitter) -> Vec<DrawingData> {
        emitter
            .sent()
            .into_iter()
            .filter_map(|command| match command {
                Command::DrawEvent { drawing_data, .. } => Some(drawing_data),
                _ => None,
            })
            .collect()
    }

    fn point(kind: PointKind, x: f64, y: f64) -> DrawingData {
        DrawingData::point(kind, x, y, "#EC4899", 4.0)
    }

    #[test]
    fn test_local_stroke_throttles_network_not_render() {
        let (emitter, mut engine) = engine();

        engine.pointer_down(0.0, 0.0).expect("down");
        for i in 1..=7 {
            engine.pointer_move(f64::from(i), 0.0).expect("move");
        }
        engine.pointer_up().expect("up");

        // Stroke has 8 points; draw emitted at lengths 3 and 6
        let sent = drawn(&emitter);
        let kinds: Vec<PointKind> = sent.iter().map(|d| d.kind).collect();
        assert_eq!(
            kinds,
            vec![PointKind::Start, PointKind::Draw, PointKind::Draw, PointKind::End]
        );
        assert_eq!(sent[1].position(), Some((2.0, 0.0)));
        assert_eq!(sent[3].position(), None);

        assert_eq!(engine.strokes().len(), 1);
        assert_eq!(engine.strokes()[0].points.len(), 8);
        // One path start plus one segment per move
        assert_eq!(engine.surface().path_count(), 8);
    }

    #[test]
    fn test_start_point_carries_style() {
        let (emitter, mut engine) = engine();
        engine.set_color("#10B981").expect("color");
        engine.set_width(8.0).expect("width");

        engine.pointer_down(1.0, 2.0).expect("down");

        let sent = drawn(&emitter);
        assert_eq!(sent[0].color.as_deref(), Some("#10B981"));
        assert_eq!(sent[0].width, Some(8.0));
    }

    #[test]
    fn test_eraser_draws_background() {
        let (emitter, mut engine) = engine();
        engine.set_tool(Tool::Eraser);

        engine.pointer_down(1.0, 2.0).expect("down");
        engine.pointer_up().expect("up");

        assert_eq!(drawn(&emitter)[0].color.as_deref(), Some("#FFFFFF"));
        assert_eq!(engine.strokes()[0].style.color(), "#FFFFFF");
    }

    #[test]
    fn test_moves_without_down_are_ignored() {
        let (emitter, mut engine) = engine();

        engine.pointer_move(1.0, 1.0).expect("move");
        engine.pointer_up().expect("up");

        assert!(emitter.sent().is_empty());
        assert!(engine.strokes().is_empty());
    }

    #[test]
    fn test_remote_stroke_assembled_on_end() {
        let (_, mut engine) = engine();
        let other = SenderId::from("other");

        engine.apply_remote(&other, &point(PointKind::Start, 0.0, 0.0));
        engine.apply_remote(&other, &point(PointKind::Draw, 1.0, 1.0));
        assert!(engine.strokes().is_empty());
        assert_eq!(engine.open_remote(&other).map(|s| s.points.len()), Some(2));

        let completed = engine.apply_remote(&other, &DrawingData::end());
        assert_eq!(completed, Some(2));
        assert!(engine.open_remote(&other).is_none());

        let stroke = &engine.strokes()[0];
        assert_eq!(stroke.author, Author::Remote(other));
        assert_eq!(stroke.style.color(), "#EC4899");
        assert_eq!(stroke.style.width(), 4.0);
    }

    #[test]
    fn test_remote_defaults_and_edge_cases() {
        let (_, mut engine) = engine();
        let other = SenderId::from("other");

        // End on an empty buffer
        assert_eq!(engine.apply_remote(&other, &DrawingData::end()), None);

        // Draw without start begins a path; missing style uses defaults
        let bare = DrawingData {
            kind: PointKind::Draw,
            x: Some(5.0),
            y: Some(5.0),
            color: None,
            width: None,
        };
        engine.apply_remote(&other, &bare);
        let open = engine.open_remote(&other).expect("buffer");
        assert_eq!(open.style.color(), "#000000");
        assert_eq!(open.style.width(), 3.0);

        // Point without coordinates is ignored
        let blind = DrawingData {
            kind: PointKind::Draw,
            x: None,
            y: None,
            color: None,
            width: None,
        };
        engine.apply_remote(&other, &blind);
        assert_eq!(engine.open_remote(&other).map(|s| s.points.len()), Some(1));

        // Start over a dangling buffer flushes it
        engine.apply_remote(&other, &point(PointKind::Start, 9.0, 9.0));
        assert_eq!(engine.strokes().len(), 1);
        assert_eq!(engine.open_remote(&other).map(|s| s.points.len()), Some(1));
    }

    #[test]
    fn test_undo_is_global_and_noop_when_empty() {
        let (_, mut engine) = engine();
        assert!(engine.undo().is_none());

        engine.pointer_down(0.0, 0.0).expect("down");
        engine.pointer_up().expect("up");
        let other = SenderId::from("other");
        engine.apply_remote(&other, &point(PointKind::Start, 3.0, 3.0));
        engine.apply_remote(&other, &DrawingData::end());

        let undone = engine.undo().expect("stroke");
        assert_eq!(undone.author, Author::Remote(other));
        let undone = engine.undo().expect("stroke");
        assert_eq!(undone.author, Author::Local);
        assert!(engine.undo().is_none());
        assert!(engine.strokes().is_empty());
    }

    #[test]
    fn test_redraw_replays_one_polyline_per_stroke() {
        let (_, mut engine) = engine();
        engine.pointer_down(0.0, 0.0).expect("down");
        engine.pointer_move(1.0, 0.0).expect("move");
        engine.pointer_move(2.0, 0.0).expect("move");
        engine.pointer_up().expect("up");
        engine.pointer_down(5.0, 5.0).expect("down");
        engine.pointer_up().expect("up");

        engine.redraw();

        let ops = engine.surface().ops();
        let start = ops
            .iter()
            .rposition(|op| matches!(op, SurfaceOp::Clear(_)))
            .expect("clear");
        let replay: Vec<&SurfaceOp> = ops[start + 1..].iter().collect();
        assert_eq!(replay.len(), 4);
        assert!(matches!(replay[0], SurfaceOp::BeginPath(_, p) if *p == Point::new(0.0, 0.0)));
        assert!(matches!(replay[1], SurfaceOp::LineTo(p) if *p == Point::new(1.0, 0.0)));
        assert!(matches!(replay[2], SurfaceOp::LineTo(p) if *p == Point::new(2.0, 0.0)));
        assert!(matches!(replay[3], SurfaceOp::BeginPath(_, p) if *p == Point::new(5.0, 5.0)));
    }

    #[test]
    fn test_clear_is_local_only() {
        let (emitter, mut engine) = engine();
        engine.pointer_down(0.0, 0.0).expect("down");
        engine.pointer_up().expect("up");
        let before = emitter.sent().len();

        engine.clear();

        assert!(engine.strokes().is_empty());
        assert_eq!(emitter.sent().len(), before);
        assert!(matches!(engine.surface().ops().last(), Some(SurfaceOp::Clear(_))));
    }

    fn coords() -> impl Strategy<Value = Vec<(f64, f64)>> {
        prop::collection::vec((-500.0..500.0f64, -500.0..500.0f64), 1..20)
    }

    proptest! {
        #[test]
        fn prop_remote_strokes_keep_every_point_in_order(
            strokes in prop::collection::vec(coords(), 1..8)
        ) {
            let (_, mut engine) = engine();
            let sender = SenderId::from("other");

            for stroke in &strokes {
                for (i, (x, y)) in stroke.iter().enumerate() {
                    let kind = if i == 0 { PointKind::Start } else { PointKind::Draw };
                    engine.apply_remote(&sender, &point(kind, *x, *y));
                }
                engine.apply_remote(&sender, &DrawingData::end());
            }

            prop_assert_eq!(engine.strokes().len(), strokes.len());
            for (assembled, expected) in engine.strokes().iter().zip(&strokes) {
                let points: Vec<(f64, f64)> = assembled.points.iter().map(|p| (p.x, p.y)).collect();
                prop_assert_eq!(&points, expected);
            }
        }

        #[test]
        fn prop_interleaved_senders_do_not_mix(
            a in coords(),
            b in coords(),
            order in prop::collection::vec(any::<bool>(), 0..40)
        ) {
            let (_, mut engine) = engine();
            let alice = SenderId::from("alice");
            let bob = SenderId::from("bob");

            let mut next = [0usize, 0usize];
            let feeds = [(&alice, &a), (&bob, &b)];
            let mut picks = order.into_iter();
            while next[0] < a.len() || next[1] < b.len() {
                let mut side = usize::from(picks.next().unwrap_or(false));
                if next[side] >= feeds[side].1.len() {
                    side = 1 - side;
                }
                let (sender, points) = feeds[side];
                let (x, y) = points[next[side]];
                let kind = if next[side] == 0 { PointKind::Start } else { PointKind::Draw };
                engine.apply_remote(sender, &point(kind, x, y));
                next[side] += 1;
            }
            engine.apply_remote(&alice, &DrawingData::end());
            engine.apply_remote(&bob, &DrawingData::end());

            for stroke in engine.strokes() {
                let expected = if stroke.author == Author::Remote(alice.clone()) { &a } else { &b };
                let points: Vec<(f64, f64)> = stroke.points.iter().map(|p| (p.x, p.y)).collect();
                prop_assert_eq!(&points, expected);
            }
            prop_assert_eq!(engine.strokes().len(), 2);
        }
    }
}
