//! Render tree: layout measurement, paint recording, and the dirty-tracking
//! pipeline that decides when either needs to run.
//!
//! Render objects live in an arena owned by the [`PipelineOwner`]; handles
//! are generational ids, so a stale handle held past disposal degrades to a
//! safe no-op instead of touching a recycled slot.

pub mod layer;
pub mod paint;
pub mod pipeline;

pub use layer::{Canvas, DisplayList, DrawOp, Layer, PictureRecorder};
pub use paint::PaintContext;
pub use pipeline::{LayoutContext, PipelineOwner};

use std::any::Any;

use crate::constraints::Constraints;
use crate::geometry::{Offset, Size};

/// Unique identifier for a render object in the pipeline's arena.
///
/// Generational: the index is reused after disposal, the generation is not,
/// so stale ids never alias a newer object.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct RenderId {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

/// Parent-assigned slot data for a render object, written during the parent's
/// layout pass. The child's position is painted by the parent, which is why
/// changing it invalidates the parent, not the child.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ParentData {
    pub offset: Offset,
}

/// Layout and paint behavior for one render object.
///
/// Implementations are supplied by the widget catalog; the core stores them
/// behind this trait and drives them through the pipeline. `id` is the
/// object's own handle, used to reach its size, children, and slot data via
/// the context. An implementation must not lay out or paint itself through
/// the context (the object is borrowed for the duration of the call).
pub trait RenderBox: Any {
    /// Measure this object under `constraints`, laying out children through
    /// `ctx` as needed, and return the chosen size.
    fn perform_layout(&mut self, ctx: &LayoutContext<'_>, id: RenderId, constraints: Constraints)
        -> Size;

    /// Record this object's visual output. Children are painted through
    /// `ctx.paint_child` / `ctx.paint_child_with_layer`.
    fn paint(&mut self, ctx: &mut PaintContext<'_>, id: RenderId);

    /// Whether this object caches its subtree in an independent [`Layer`].
    /// Fixed for the object's lifetime; sampled once at registration.
    fn is_repaint_boundary(&self) -> bool {
        false
    }
}
