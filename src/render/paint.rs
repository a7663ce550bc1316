//! Paint traversal context.
//!
//! A [`PaintContext`] wraps the destination canvas with the accumulated
//! translation and clip of the traversal so children can be culled before
//! their paint method runs, and routes repaint boundaries through the layer
//! cache when the canvas supports it.

use crate::geometry::{Offset, Rect, Size};
use crate::render::layer::Canvas;
use crate::render::pipeline::PipelineOwner;
use crate::render::RenderId;

pub struct PaintContext<'a> {
    owner: &'a PipelineOwner,
    canvas: &'a mut dyn Canvas,
    translation: Offset,
    // Current clip in global coordinates, already reduced by intersection.
    clip: Option<Rect>,
    saved: Vec<(Offset, Option<Rect>)>,
}

impl<'a> PaintContext<'a> {
    pub fn new(owner: &'a PipelineOwner, canvas: &'a mut dyn Canvas) -> Self {
        Self {
            owner,
            canvas,
            translation: Offset::ZERO,
            clip: None,
            saved: Vec::new(),
        }
    }

    pub fn canvas(&mut self) -> &mut dyn Canvas {
        &mut *self.canvas
    }

    pub fn owner(&self) -> &PipelineOwner {
        self.owner
    }

    pub fn children(&self, id: RenderId) -> Vec<RenderId> {
        self.owner.children(id)
    }

    /// The offset the parent assigned to `child` during layout.
    pub fn child_offset(&self, child: RenderId) -> Offset {
        self.owner
            .parent_data(child)
            .map(|d| d.offset)
            .unwrap_or(Offset::ZERO)
    }

    pub fn size(&self, id: RenderId) -> Size {
        self.owner.size(id).unwrap_or(Size::ZERO)
    }

    // --- canvas state, mirrored locally for culling -------------------------

    pub fn save(&mut self) {
        self.saved.push((self.translation, self.clip));
        self.canvas.save();
    }

    pub fn restore(&mut self) {
        if let Some((translation, clip)) = self.saved.pop() {
            self.translation = translation;
            self.clip = clip;
        }
        self.canvas.restore();
    }

    pub fn translate(&mut self, dx: f32, dy: f32) {
        self.translation = self.translation + Offset::new(dx, dy);
        self.canvas.translate(dx, dy);
    }

    /// Clip to a rect in local coordinates. The tracked global clip only
    /// shrinks (intersection), so culling stays conservative.
    pub fn clip_rect(&mut self, rect: Rect) {
        let global = rect.translate(self.translation.x, self.translation.y);
        self.clip = Some(match self.clip {
            Some(current) => current.intersect(&global),
            None => global,
        });
        self.canvas.clip_rect(rect);
    }

    /// Whether a child of the given size at `offset` (local coordinates)
    /// falls entirely outside the current clip.
    fn culled(&self, offset: Offset, size: Size) -> bool {
        let Some(clip) = self.clip else {
            return false;
        };
        let bounds = Rect::from_size(size)
            .translate(self.translation.x + offset.x, self.translation.y + offset.y);
        !bounds.intersects(&clip)
    }

    /// Paint a child inline at `offset`, ignoring any layer it might have.
    /// Culled children are skipped outright.
    pub fn paint_child(&mut self, child: RenderId, offset: Offset) {
        let Some(node) = self.owner.node(child) else {
            return;
        };
        if self.culled(offset, node.size.get()) {
            return;
        }
        self.save();
        self.translate(offset.x, offset.y);
        node.object.borrow_mut().paint(self, child);
        self.restore();
        node.needs_paint.set(false);
    }

    /// Paint a child at `offset`, going through its retained layer when
    /// possible.
    ///
    /// In order: a culled child is skipped; a non-boundary child (or any
    /// child when the canvas cannot reference layers) paints inline; a
    /// boundary with a clean, populated layer is recorded as an O(1) layer
    /// reference; otherwise the layer is re-recorded first and then
    /// referenced.
    pub fn paint_child_with_layer(&mut self, child: RenderId, offset: Offset) {
        let Some(node) = self.owner.node(child) else {
            return;
        };
        if self.culled(offset, node.size.get()) {
            return;
        }
        if !node.is_boundary || !self.canvas.supports_layers() {
            self.paint_child(child, offset);
            return;
        }

        let layer = match self.owner.ensure_layer(child) {
            Some(layer) => layer,
            None => {
                self.paint_child(child, offset);
                return;
            }
        };
        if layer.is_dirty() || !layer.has_content() {
            self.owner.record_layer(child);
        }

        self.save();
        self.translate(offset.x, offset.y);
        self.canvas.draw_layer(&layer);
        self.restore();
        node.needs_paint.set(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraints::Constraints;
    use crate::geometry::{Color, Paint};
    use crate::render::layer::PictureRecorder;
    use crate::render::pipeline::LayoutContext;
    use crate::render::{DrawOp, RenderBox};
    use std::cell::Cell;
    use std::rc::Rc;

    struct LeafBox {
        paint_calls: Rc<Cell<usize>>,
        boundary: bool,
    }

    impl RenderBox for LeafBox {
        fn perform_layout(
            &mut self,
            _ctx: &LayoutContext<'_>,
            _id: RenderId,
            constraints: Constraints,
        ) -> Size {
            constraints.constrain(Size::new(10.0, 10.0))
        }

        fn paint(&mut self, ctx: &mut PaintContext<'_>, _id: RenderId) {
            self.paint_calls.set(self.paint_calls.get() + 1);
            ctx.canvas().draw_rect(
                Rect::new(0.0, 0.0, 10.0, 10.0),
                Paint::from_color(Color::BLACK),
            );
        }

        fn is_repaint_boundary(&self) -> bool {
            self.boundary
        }
    }

    fn leaf(owner: &PipelineOwner, boundary: bool) -> (RenderId, Rc<Cell<usize>>) {
        let calls = Rc::new(Cell::new(0));
        let id = owner.insert(Box::new(LeafBox {
            paint_calls: calls.clone(),
            boundary,
        }));
        owner.set_size(id, Size::new(10.0, 10.0));
        owner.clear_needs_paint(id);
        (id, calls)
    }

    #[test]
    fn test_paint_child_translates_and_restores() {
        let owner = PipelineOwner::new();
        let (child, calls) = leaf(&owner, false);

        let mut rec = PictureRecorder::new();
        {
            let mut ctx = PaintContext::new(&owner, &mut rec);
            ctx.paint_child(child, Offset::new(5.0, 7.0));
        }
        assert_eq!(calls.get(), 1);

        let list = rec.finish();
        assert!(matches!(list.ops()[0], DrawOp::Save));
        assert!(matches!(
            list.ops()[1],
            DrawOp::Translate { dx, dy } if dx == 5.0 && dy == 7.0
        ));
        assert!(matches!(list.ops()[2], DrawOp::Rect { .. }));
        assert!(matches!(list.ops()[3], DrawOp::Restore));
    }

    #[test]
    fn test_paint_child_clears_needs_paint() {
        let owner = PipelineOwner::new();
        let (child, _) = leaf(&owner, false);
        owner.mark_needs_paint(child);

        let mut rec = PictureRecorder::new();
        let mut ctx = PaintContext::new(&owner, &mut rec);
        ctx.paint_child(child, Offset::ZERO);

        assert!(!owner.object_needs_paint(child));
    }

    #[test]
    fn test_culled_child_is_skipped() {
        let owner = PipelineOwner::new();
        let (child, calls) = leaf(&owner, false);

        let mut rec = PictureRecorder::new();
        let mut ctx = PaintContext::new(&owner, &mut rec);
        ctx.clip_rect(Rect::new(0.0, 0.0, 50.0, 50.0));
        ctx.paint_child(child, Offset::new(100.0, 100.0));

        assert_eq!(calls.get(), 0);
    }

    #[test]
    fn test_culling_accounts_for_translation() {
        let owner = PipelineOwner::new();
        let (child, calls) = leaf(&owner, false);

        let mut rec = PictureRecorder::new();
        let mut ctx = PaintContext::new(&owner, &mut rec);
        ctx.clip_rect(Rect::new(0.0, 0.0, 50.0, 50.0));
        ctx.save();
        ctx.translate(45.0, 45.0);
        // 45 + 0 within the 50x50 clip: visible.
        ctx.paint_child(child, Offset::ZERO);
        ctx.restore();

        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_layer_canvas_cull_skips_boundary() {
        let owner = PipelineOwner::new();
        let (child, calls) = leaf(&owner, true);

        let mut rec = PictureRecorder::new();
        let mut ctx = PaintContext::new(&owner, &mut rec);
        ctx.clip_rect(Rect::new(0.0, 0.0, 50.0, 50.0));
        ctx.paint_child_with_layer(child, Offset::new(200.0, 200.0));

        assert_eq!(calls.get(), 0);
    }

    #[test]
    fn test_non_boundary_falls_back_to_inline() {
        let owner = PipelineOwner::new();
        let (child, calls) = leaf(&owner, false);

        let mut rec = PictureRecorder::new();
        let mut ctx = PaintContext::new(&owner, &mut rec);
        ctx.paint_child_with_layer(child, Offset::ZERO);

        assert_eq!(calls.get(), 1);
        assert!(owner.layer(child).is_none());
    }

    #[test]
    fn test_clean_layer_referenced_without_repaint() {
        let owner = PipelineOwner::new();
        let (child, calls) = leaf(&owner, true);
        owner.record_layer(child);
        assert_eq!(calls.get(), 1);

        let mut rec = PictureRecorder::new();
        {
            let mut ctx = PaintContext::new(&owner, &mut rec);
            ctx.paint_child_with_layer(child, Offset::new(3.0, 4.0));
        }

        // Not re-painted; the recording holds a layer reference.
        assert_eq!(calls.get(), 1);
        let list = rec.finish();
        assert!(list
            .ops()
            .iter()
            .any(|op| matches!(op, DrawOp::Layer(_))));
    }

    #[test]
    fn test_dirty_layer_rerecorded_then_referenced() {
        let owner = PipelineOwner::new();
        let (child, calls) = leaf(&owner, true);
        owner.record_layer(child);
        owner.layer(child).unwrap().mark_dirty();

        let mut rec = PictureRecorder::new();
        {
            let mut ctx = PaintContext::new(&owner, &mut rec);
            ctx.paint_child_with_layer(child, Offset::ZERO);
        }

        assert_eq!(calls.get(), 2);
        let layer = owner.layer(child).unwrap();
        assert!(!layer.is_dirty());
        assert!(layer.has_content());
        assert!(rec
            .finish()
            .ops()
            .iter()
            .any(|op| matches!(op, DrawOp::Layer(_))));
    }

    #[test]
    fn test_plain_canvas_paints_boundary_inline() {
        struct PlainCanvas;
        impl Canvas for PlainCanvas {
            fn save(&mut self) {}
            fn restore(&mut self) {}
            fn translate(&mut self, _: f32, _: f32) {}
            fn clip_rect(&mut self, _: Rect) {}
            fn draw_rect(&mut self, _: Rect, _: Paint) {}
        }

        let owner = PipelineOwner::new();
        let (child, calls) = leaf(&owner, true);

        let mut canvas = PlainCanvas;
        let mut ctx = PaintContext::new(&owner, &mut canvas);
        ctx.paint_child_with_layer(child, Offset::ZERO);

        assert_eq!(calls.get(), 1);
    }
}
