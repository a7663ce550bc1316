//! Retained layer cache for repaint boundaries.
//!
//! A [`Layer`] caches the recorded draw commands of one repaint boundary's
//! subtree. Layers have stable identity: once a boundary has a layer, the
//! layer object is never replaced, only its content is swapped. Parent layers
//! reference child layers through [`DrawOp::Layer`] ops instead of embedding
//! their content, so a child can re-record without forcing its parent to.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::geometry::{Paint, Rect, Size};

/// A recorded draw operation.
#[derive(Debug, Clone)]
pub enum DrawOp {
    Save,
    Restore,
    Translate { dx: f32, dy: f32 },
    ClipRect(Rect),
    Rect { rect: Rect, paint: Paint },
    /// Composite a referenced layer at the current transform. The reference
    /// resolves the layer's content at replay time, which is what keeps a
    /// parent's recording valid while the child re-records.
    Layer(Layer),
}

/// An immutable list of recorded draw operations.
#[derive(Clone, Default)]
pub struct DisplayList {
    ops: Vec<DrawOp>,
}

impl DisplayList {
    pub fn ops(&self) -> &[DrawOp] {
        &self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Replay the recorded operations onto a canvas. Layer references are
    /// forwarded to the canvas when it supports them, otherwise the
    /// referenced layer's content is composited inline.
    pub fn replay(&self, canvas: &mut dyn Canvas) {
        for op in &self.ops {
            match op {
                DrawOp::Save => canvas.save(),
                DrawOp::Restore => canvas.restore(),
                DrawOp::Translate { dx, dy } => canvas.translate(*dx, *dy),
                DrawOp::ClipRect(rect) => canvas.clip_rect(*rect),
                DrawOp::Rect { rect, paint } => canvas.draw_rect(*rect, *paint),
                DrawOp::Layer(layer) => {
                    if canvas.supports_layers() {
                        canvas.draw_layer(layer);
                    } else {
                        layer.composite(canvas);
                    }
                }
            }
        }
    }
}

impl fmt::Debug for DisplayList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DisplayList({} ops)", self.ops.len())
    }
}

/// Recording target for draw operations.
///
/// This is the seam to the rendering backend: the core only needs
/// save/restore, translate, clip, a fill primitive, and replay. Backends that
/// can retain composited layers implement `supports_layers`/`draw_layer` to
/// unlock the O(1) cache-hit path; backends that can't simply fall back to
/// direct painting.
pub trait Canvas {
    fn save(&mut self);
    fn restore(&mut self);
    fn translate(&mut self, dx: f32, dy: f32);
    fn clip_rect(&mut self, rect: Rect);
    fn draw_rect(&mut self, rect: Rect, paint: Paint);

    /// Whether this canvas can record a reference to a retained layer.
    fn supports_layers(&self) -> bool {
        false
    }

    /// Record a reference to a retained layer. Only called when
    /// `supports_layers` returns true.
    fn draw_layer(&mut self, _layer: &Layer) {}
}

/// Records draw operations into a [`DisplayList`].
#[derive(Default)]
pub struct PictureRecorder {
    ops: Vec<DrawOp>,
}

impl PictureRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn finish(self) -> DisplayList {
        DisplayList { ops: self.ops }
    }
}

impl Canvas for PictureRecorder {
    fn save(&mut self) {
        self.ops.push(DrawOp::Save);
    }

    fn restore(&mut self) {
        self.ops.push(DrawOp::Restore);
    }

    fn translate(&mut self, dx: f32, dy: f32) {
        self.ops.push(DrawOp::Translate { dx, dy });
    }

    fn clip_rect(&mut self, rect: Rect) {
        self.ops.push(DrawOp::ClipRect(rect));
    }

    fn draw_rect(&mut self, rect: Rect, paint: Paint) {
        self.ops.push(DrawOp::Rect { rect, paint });
    }

    fn supports_layers(&self) -> bool {
        true
    }

    fn draw_layer(&mut self, layer: &Layer) {
        self.ops.push(DrawOp::Layer(layer.clone()));
    }
}

struct LayerInner {
    content: Option<DisplayList>,
    dirty: bool,
    size: Size,
}

/// Stable-identity cache of recorded paint commands for one repaint
/// boundary's subtree.
///
/// Cloning a `Layer` clones the handle, not the cache; all clones observe the
/// same content and dirty flag. Layers are confined to the frame thread.
#[derive(Clone)]
pub struct Layer {
    inner: Rc<RefCell<LayerInner>>,
}

impl Layer {
    /// Create a new layer with no content; it starts dirty so the first paint
    /// pass records it.
    pub fn new(size: Size) -> Self {
        Self {
            inner: Rc::new(RefCell::new(LayerInner {
                content: None,
                dirty: true,
                size,
            })),
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.inner.borrow().dirty
    }

    /// Mark this layer for re-recording.
    pub fn mark_dirty(&self) {
        self.inner.borrow_mut().dirty = true;
    }

    pub fn size(&self) -> Size {
        self.inner.borrow().size
    }

    pub fn set_size(&self, size: Size) {
        self.inner.borrow_mut().size = size;
    }

    pub fn has_content(&self) -> bool {
        self.inner.borrow().content.is_some()
    }

    /// Swap in freshly recorded content. The previous content is released
    /// first, and the dirty flag is cleared.
    pub fn set_content(&self, content: DisplayList) {
        let mut inner = self.inner.borrow_mut();
        let old = inner.content.replace(content);
        drop(old);
        inner.dirty = false;
    }

    /// Replay this layer's content onto a canvas. Referenced child layers are
    /// resolved at replay time.
    pub fn composite(&self, canvas: &mut dyn Canvas) {
        let inner = self.inner.borrow();
        if let Some(content) = &inner.content {
            content.replay(canvas);
        }
    }

    /// Release retained content. Idempotent; the handle stays valid but
    /// composites nothing until new content is set.
    pub fn dispose(&self) {
        self.inner.borrow_mut().content = None;
    }

    /// Identity comparison: do two handles refer to the same layer?
    pub fn ptr_eq(&self, other: &Layer) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        write!(
            f,
            "Layer(dirty: {}, content: {}, size: {}x{})",
            inner.dirty,
            inner.content.is_some(),
            inner.size.width,
            inner.size.height
        )
    }
}
