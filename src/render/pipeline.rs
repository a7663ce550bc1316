//! The [`PipelineOwner`]: owner of the render-object arena and the two
//! dirty-tracking schedulers (layout and paint).
//!
//! Scheduling is idempotent per object per batch. Layout always re-runs from
//! the root when anything is pending; paint re-records only the dirty repaint
//! boundaries, children before parents, so every layer reference a parent
//! records points at already-fresh content.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::constraints::Constraints;
use crate::geometry::{Offset, Size};
use crate::render::layer::{Canvas, Layer, PictureRecorder};
use crate::render::paint::PaintContext;
use crate::render::{ParentData, RenderBox, RenderId};

pub(crate) struct RenderNode {
    pub(crate) object: RefCell<Box<dyn RenderBox>>,
    pub(crate) parent: Cell<Option<RenderId>>,
    pub(crate) children: RefCell<Vec<RenderId>>,
    pub(crate) size: Cell<Size>,
    pub(crate) parent_data: Cell<ParentData>,
    pub(crate) needs_layout: Cell<bool>,
    pub(crate) needs_paint: Cell<bool>,
    pub(crate) is_boundary: bool,
    pub(crate) layer: RefCell<Option<Layer>>,
}

struct Slot {
    node: Option<Rc<RenderNode>>,
    generation: u32,
}

/// Tracks which render objects need layout or paint, and owns the render
/// objects themselves.
///
/// All methods take `&self`; the owner is designed to be shared behind an
/// `Rc` within the single frame thread. Operations against a stale or
/// disposed [`RenderId`] are safe no-ops.
#[derive(Default)]
pub struct PipelineOwner {
    slots: RefCell<Vec<Slot>>,
    free: RefCell<Vec<u32>>,
    dirty_layout: RefCell<Vec<RenderId>>,
    dirty_paint: RefCell<Vec<RenderId>>,
    needs_layout: Cell<bool>,
    needs_paint: Cell<bool>,
}

impl PipelineOwner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a render object and return its handle. The object starts
    /// needing layout so a fresh tree gets measured on the first frame.
    pub fn insert(&self, object: Box<dyn RenderBox>) -> RenderId {
        let is_boundary = object.is_repaint_boundary();
        let node = Rc::new(RenderNode {
            object: RefCell::new(object),
            parent: Cell::new(None),
            children: RefCell::new(Vec::new()),
            size: Cell::new(Size::ZERO),
            parent_data: Cell::new(ParentData::default()),
            needs_layout: Cell::new(true),
            needs_paint: Cell::new(false),
            is_boundary,
            layer: RefCell::new(None),
        });

        let mut slots = self.slots.borrow_mut();
        let id = if let Some(index) = self.free.borrow_mut().pop() {
            let slot = &mut slots[index as usize];
            slot.generation = slot.generation.wrapping_add(1);
            slot.node = Some(node);
            RenderId {
                index,
                generation: slot.generation,
            }
        } else {
            let index = slots.len() as u32;
            slots.push(Slot {
                node: Some(node),
                generation: 0,
            });
            RenderId {
                index,
                generation: 0,
            }
        };
        drop(slots);

        self.mark_needs_layout(id);
        id
    }

    pub(crate) fn node(&self, id: RenderId) -> Option<Rc<RenderNode>> {
        let slots = self.slots.borrow();
        let slot = slots.get(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.node.clone()
    }

    pub fn contains(&self, id: RenderId) -> bool {
        self.node(id).is_some()
    }

    /// Run a closure against the boxed render object. Returns `None` for a
    /// stale id.
    pub fn with_object_mut<R>(
        &self,
        id: RenderId,
        f: impl FnOnce(&mut dyn RenderBox) -> R,
    ) -> Option<R> {
        let node = self.node(id)?;
        let mut object = node.object.borrow_mut();
        Some(f(&mut **object))
    }

    // --- geometry -----------------------------------------------------------

    pub fn size(&self, id: RenderId) -> Option<Size> {
        self.node(id).map(|n| n.size.get())
    }

    /// Store a freshly measured size. Writing an unchanged size is a no-op;
    /// a change marks the object as needing paint.
    pub fn set_size(&self, id: RenderId, size: Size) {
        let Some(node) = self.node(id) else {
            return;
        };
        if node.size.get() == size {
            return;
        }
        node.size.set(size);
        self.mark_needs_paint(id);
    }

    pub fn parent_data(&self, id: RenderId) -> Option<ParentData> {
        self.node(id).map(|n| n.parent_data.get())
    }

    /// Assign parent-controlled slot data (the child's offset). The child's
    /// position is drawn by its parent, so an actual change marks the
    /// *parent* as needing paint; a same-value write touches nothing.
    pub fn set_parent_data(&self, id: RenderId, data: ParentData) {
        let Some(node) = self.node(id) else {
            return;
        };
        if node.parent_data.get() == data {
            return;
        }
        node.parent_data.set(data);
        if let Some(parent) = node.parent.get() {
            self.mark_needs_paint(parent);
        }
    }

    // --- tree structure -----------------------------------------------------

    pub fn parent(&self, id: RenderId) -> Option<RenderId> {
        self.node(id).and_then(|n| n.parent.get())
    }

    pub fn children(&self, id: RenderId) -> Vec<RenderId> {
        self.node(id)
            .map(|n| n.children.borrow().clone())
            .unwrap_or_default()
    }

    /// Attach `child` under `parent` (or detach with `None`). Reattaching to
    /// the same parent is a no-op. Both the parent that loses the child and
    /// the one that gains it must repaint; the child's layer identity is
    /// preserved, its content just needs re-recording under the new parent.
    pub fn set_parent(&self, child: RenderId, parent: Option<RenderId>) {
        let Some(node) = self.node(child) else {
            return;
        };
        let old = node.parent.get();
        if old == parent {
            return;
        }
        if let Some(old_parent) = old {
            if let Some(old_node) = self.node(old_parent) {
                old_node.children.borrow_mut().retain(|c| *c != child);
            }
            self.mark_needs_paint(old_parent);
        }
        node.parent.set(parent);
        if let Some(new_parent) = parent {
            if let Some(new_node) = self.node(new_parent) {
                let mut children = new_node.children.borrow_mut();
                if !children.contains(&child) {
                    children.push(child);
                }
            }
            self.mark_needs_paint(new_parent);
        }
        let layer = node.layer.borrow().clone();
        if let Some(layer) = layer {
            layer.mark_dirty();
        }
    }

    /// Replace `parent`'s ordered child list. Children dropped from the list
    /// are detached; an order or membership change marks the parent for
    /// paint. An identical list is a no-op.
    pub fn set_children(&self, parent: RenderId, children: Vec<RenderId>) {
        let Some(node) = self.node(parent) else {
            return;
        };
        let old = node.children.borrow().clone();
        if old == children {
            return;
        }
        for child in &old {
            if !children.contains(child) {
                if let Some(child_node) = self.node(*child) {
                    if child_node.parent.get() == Some(parent) {
                        child_node.parent.set(None);
                    }
                }
            }
        }
        for child in &children {
            if let Some(child_node) = self.node(*child) {
                if child_node.parent.get() != Some(parent) {
                    self.set_parent(*child, Some(parent));
                }
            }
        }
        *node.children.borrow_mut() = children;
        self.mark_needs_paint(parent);
    }

    /// Single-child convenience over [`PipelineOwner::set_children`].
    pub fn set_child(&self, parent: RenderId, child: Option<RenderId>) {
        self.set_children(parent, child.into_iter().collect());
    }

    // --- invalidation -------------------------------------------------------

    /// Schedule an object for layout. Idempotent per batch; also raises the
    /// paint flag since new geometry must be repainted.
    pub fn mark_needs_layout(&self, id: RenderId) {
        let Some(node) = self.node(id) else {
            return;
        };
        node.needs_layout.set(true);
        let mut dirty = self.dirty_layout.borrow_mut();
        if !dirty.contains(&id) {
            dirty.push(id);
        }
        self.needs_layout.set(true);
        self.needs_paint.set(true);
    }

    /// Mark an object as needing paint.
    ///
    /// A repaint boundary gets its layer ensured and marked dirty, then is
    /// scheduled itself. A non-boundary has no independent cache, so the
    /// dirty state walks up and the nearest ancestor boundary is what gets
    /// scheduled. Marking an already-dirty object is a no-op.
    pub fn mark_needs_paint(&self, id: RenderId) {
        let mut current = id;
        loop {
            let Some(node) = self.node(current) else {
                return;
            };
            if node.needs_paint.get() {
                return;
            }
            node.needs_paint.set(true);
            if node.is_boundary {
                if let Some(layer) = self.ensure_layer(current) {
                    layer.mark_dirty();
                }
                self.schedule_paint(current);
                return;
            }
            match node.parent.get() {
                Some(parent) => current = parent,
                None => {
                    // Detached (or non-boundary root): schedule directly.
                    self.schedule_paint(current);
                    return;
                }
            }
        }
    }

    fn schedule_paint(&self, id: RenderId) {
        let mut dirty = self.dirty_paint.borrow_mut();
        if !dirty.contains(&id) {
            dirty.push(id);
        }
        self.needs_paint.set(true);
    }

    pub fn needs_layout(&self) -> bool {
        self.needs_layout.get()
    }

    pub fn needs_paint(&self) -> bool {
        self.needs_paint.get()
    }

    pub fn object_needs_layout(&self, id: RenderId) -> bool {
        self.node(id).map(|n| n.needs_layout.get()).unwrap_or(false)
    }

    pub fn object_needs_paint(&self, id: RenderId) -> bool {
        self.node(id).map(|n| n.needs_paint.get()).unwrap_or(false)
    }

    pub fn clear_needs_paint(&self, id: RenderId) {
        if let Some(node) = self.node(id) {
            node.needs_paint.set(false);
        }
    }

    // --- layers -------------------------------------------------------------

    /// Get or create the retained layer for a repaint boundary. Returns
    /// `None` for non-boundaries, which have no independent cache.
    pub fn ensure_layer(&self, id: RenderId) -> Option<Layer> {
        let node = self.node(id)?;
        if !node.is_boundary {
            return None;
        }
        let mut slot = node.layer.borrow_mut();
        if slot.is_none() {
            *slot = Some(Layer::new(node.size.get()));
        }
        let layer = slot.clone();
        if let Some(layer) = &layer {
            layer.set_size(node.size.get());
        }
        layer
    }

    pub fn layer(&self, id: RenderId) -> Option<Layer> {
        self.node(id).and_then(|n| n.layer.borrow().clone())
    }

    pub fn is_repaint_boundary(&self, id: RenderId) -> bool {
        self.node(id).map(|n| n.is_boundary).unwrap_or(false)
    }

    /// Install freshly recorded content into a boundary's layer, creating the
    /// layer if needed. The layer size is synced from the render object, and
    /// the dirty flag is cleared.
    pub fn set_layer_content(&self, id: RenderId, content: crate::render::DisplayList) {
        let Some(node) = self.node(id) else {
            return;
        };
        let Some(layer) = self.ensure_layer(id) else {
            return;
        };
        layer.set_content(content);
        layer.set_size(node.size.get());
    }

    /// Permanently remove a render object. Its layer (if any) is disposed
    /// first, releasing retained content, then the object is dropped and the
    /// id becomes stale. Idempotent.
    pub fn dispose(&self, id: RenderId) {
        self.dirty_layout.borrow_mut().retain(|x| *x != id);
        self.dirty_paint.borrow_mut().retain(|x| *x != id);

        let node = {
            let mut slots = self.slots.borrow_mut();
            let Some(slot) = slots.get_mut(id.index as usize) else {
                return;
            };
            if slot.generation != id.generation {
                return;
            }
            let node = slot.node.take();
            if node.is_some() {
                self.free.borrow_mut().push(id.index);
            }
            node
        };

        let Some(node) = node else {
            return;
        };
        if let Some(layer) = node.layer.borrow_mut().take() {
            layer.dispose();
        }
        if let Some(parent) = node.parent.get() {
            if let Some(parent_node) = self.node(parent) {
                parent_node.children.borrow_mut().retain(|c| *c != id);
            }
        }
        for child in node.children.borrow().iter() {
            if let Some(child_node) = self.node(*child) {
                if child_node.parent.get() == Some(id) {
                    child_node.parent.set(None);
                }
            }
        }
    }

    // --- flushes ------------------------------------------------------------

    /// Run layout from the root when anything is pending. The pass always
    /// starts at the root rather than at the minimal dirty ancestors; correct
    /// for any dirty set, at the cost of re-walking clean subtrees.
    pub fn flush_layout_for_root(&self, root: RenderId, constraints: Constraints) {
        if !self.needs_layout.get() {
            return;
        }
        log::trace!(
            "flushing layout from root ({} scheduled)",
            self.dirty_layout.borrow().len()
        );
        let ctx = LayoutContext { owner: self };
        ctx.layout_child(root, constraints);
        self.dirty_layout.borrow_mut().clear();
        self.needs_layout.set(false);
    }

    /// Re-record dirty layers (children before parents), composite the root
    /// boundary's layer onto `canvas`, and clear the paint schedule.
    ///
    /// The tree root is expected to be a repaint boundary; a non-boundary
    /// root falls back to direct painting of the whole tree.
    pub fn flush_paint(&self, root: RenderId, canvas: &mut dyn Canvas) {
        let Some(node) = self.node(root) else {
            return;
        };
        if node.is_boundary {
            self.record_dirty_layers(root);
            if let Some(layer) = self.ensure_layer(root) {
                if canvas.supports_layers() {
                    canvas.draw_layer(&layer);
                } else {
                    layer.composite(canvas);
                }
            }
        } else {
            log::warn!("root render object is not a repaint boundary; painting directly");
            let mut ctx = PaintContext::new(self, canvas);
            ctx.paint_child(root, Offset::ZERO);
        }
        self.dirty_paint.borrow_mut().clear();
        self.needs_paint.set(false);
    }

    /// Depth-first, children-first walk re-recording every boundary whose
    /// layer is dirty or empty. By the time a parent records, every layer it
    /// references is already fresh.
    fn record_dirty_layers(&self, id: RenderId) {
        for child in self.children(id) {
            self.record_dirty_layers(child);
        }
        let Some(node) = self.node(id) else {
            return;
        };
        if !node.is_boundary {
            return;
        }
        let needs_recording = match node.layer.borrow().as_ref() {
            Some(layer) => layer.is_dirty() || !layer.has_content(),
            None => true,
        };
        if needs_recording {
            self.record_layer(id);
        }
    }

    /// Record a boundary's subtree into its own layer. Nested clean
    /// boundaries are embedded as layer references, not re-painted.
    pub(crate) fn record_layer(&self, id: RenderId) {
        let Some(node) = self.node(id) else {
            return;
        };
        let mut recorder = PictureRecorder::new();
        {
            let mut ctx = PaintContext::new(self, &mut recorder);
            node.object.borrow_mut().paint(&mut ctx, id);
        }
        self.set_layer_content(id, recorder.finish());
        node.needs_paint.set(false);
    }
}

/// Borrowed view of the pipeline handed to [`RenderBox::perform_layout`],
/// used to lay out children and assign their offsets.
pub struct LayoutContext<'a> {
    owner: &'a PipelineOwner,
}

impl LayoutContext<'_> {
    /// Lay out a child under the given constraints and store its size.
    /// Returns [`Size::ZERO`] for a stale id.
    pub fn layout_child(&self, child: RenderId, constraints: Constraints) -> Size {
        let Some(node) = self.owner.node(child) else {
            return Size::ZERO;
        };
        let size = node
            .object
            .borrow_mut()
            .perform_layout(self, child, constraints);
        self.owner.set_size(child, size);
        node.needs_layout.set(false);
        size
    }

    pub fn children(&self, id: RenderId) -> Vec<RenderId> {
        self.owner.children(id)
    }

    pub fn size(&self, id: RenderId) -> Size {
        self.owner.size(id).unwrap_or(Size::ZERO)
    }

    /// Position a child within its parent. Delegates to
    /// [`PipelineOwner::set_parent_data`], so a same-value write is a no-op.
    pub fn set_child_offset(&self, child: RenderId, offset: Offset) {
        self.owner.set_parent_data(child, ParentData { offset });
    }

    pub fn owner(&self) -> &PipelineOwner {
        self.owner
    }
}
