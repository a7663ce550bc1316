//! The element tree: mutable instantiations of widgets.
//!
//! Elements live in a generational arena ([`ElementTree`]); an [`ElementId`]
//! held past unmount degrades to a safe no-op. Reconciliation is positional
//! with [`Widget::can_update`] deciding whether an element absorbs a new
//! widget in place or the subtree is torn down and re-inflated.

mod inherited;

use std::any::{Any, TypeId};
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use bitflags::bitflags;

use crate::build_owner::BuildOwner;
use crate::render::RenderId;
use crate::widget::{Aspect, State, Widget};

/// Unique identifier for an element. Generational, like [`RenderId`]: slot
/// indices are reused, generations are not.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct ElementId {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ElementFlags: u8 {
        /// Part of the tree; cleared permanently on unmount.
        const MOUNTED = 1 << 0;
        /// Scheduled for rebuild in the next build flush.
        const DIRTY = 1 << 1;
    }
}

pub(crate) enum ElementKind {
    Stateless {
        child: Option<ElementId>,
    },
    Stateful {
        /// Taken out while the state's `build` runs, so a reentrant access
        /// through the tree observes it missing and no-ops.
        state: Option<Box<dyn State>>,
        child: Option<ElementId>,
    },
    Render {
        render: Option<RenderId>,
        children: Vec<ElementId>,
    },
    Inherited {
        child: Option<ElementId>,
        /// Dependent element -> aspects it registered for (`None` = all).
        dependents: HashMap<ElementId, Option<HashSet<Aspect>>>,
        /// Concrete widget type, fixed at inflation; lookups match on this.
        discriminant: TypeId,
    },
}

pub(crate) struct Element {
    pub(crate) widget: Widget,
    pub(crate) parent: Option<ElementId>,
    pub(crate) depth: u32,
    pub(crate) flags: ElementFlags,
    pub(crate) kind: ElementKind,
    /// Inherited elements this element registered a dependency on, kept so
    /// unmount can unregister.
    pub(crate) dependencies: HashSet<ElementId>,
}

struct Slot {
    element: Option<Element>,
    generation: u32,
}

/// Arena of mounted elements plus the root handle.
#[derive(Default)]
pub struct ElementTree {
    slots: Vec<Slot>,
    free: Vec<u32>,
    root: Option<ElementId>,
}

impl ElementTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn root(&self) -> Option<ElementId> {
        self.root
    }

    pub(crate) fn element(&self, id: ElementId) -> Option<&Element> {
        let slot = self.slots.get(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.element.as_ref()
    }

    pub(crate) fn element_mut(&mut self, id: ElementId) -> Option<&mut Element> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.element.as_mut()
    }

    pub fn contains(&self, id: ElementId) -> bool {
        self.element(id).is_some()
    }

    pub fn is_mounted(&self, id: ElementId) -> bool {
        self.element(id)
            .map(|e| e.flags.contains(ElementFlags::MOUNTED))
            .unwrap_or(false)
    }

    pub fn is_dirty(&self, id: ElementId) -> bool {
        self.element(id)
            .map(|e| e.flags.contains(ElementFlags::DIRTY))
            .unwrap_or(false)
    }

    pub fn depth(&self, id: ElementId) -> Option<u32> {
        self.element(id).map(|e| e.depth)
    }

    pub fn parent(&self, id: ElementId) -> Option<ElementId> {
        self.element(id).and_then(|e| e.parent)
    }

    pub fn widget(&self, id: ElementId) -> Option<Widget> {
        self.element(id).map(|e| e.widget.clone())
    }

    /// Direct element children, in paint order.
    pub fn children_of(&self, id: ElementId) -> Vec<ElementId> {
        match self.element(id).map(|e| &e.kind) {
            Some(ElementKind::Stateless { child })
            | Some(ElementKind::Stateful { child, .. })
            | Some(ElementKind::Inherited { child, .. }) => child.into_iter().copied().collect(),
            Some(ElementKind::Render { children, .. }) => children.clone(),
            None => Vec::new(),
        }
    }

    /// The render object produced by this element's subtree: its own for a
    /// render element, otherwise the first one found walking down.
    pub fn render_object_of(&self, id: ElementId) -> Option<RenderId> {
        match self.element(id).map(|e| &e.kind) {
            Some(ElementKind::Render { render, .. }) => *render,
            Some(_) => self
                .children_of(id)
                .into_iter()
                .find_map(|c| self.render_object_of(c)),
            None => None,
        }
    }

    // --- lifecycle ----------------------------------------------------------

    /// Replace the tree's root with a freshly inflated `widget`, unmounting
    /// any previous root first.
    pub fn mount_root(&mut self, owner: &BuildOwner, widget: Widget) -> ElementId {
        if let Some(old) = self.root.take() {
            self.unmount(owner, old);
        }
        let id = self.inflate(owner, widget, None);
        self.root = Some(id);
        id
    }

    /// Create and mount an element for `widget` under `parent`, building its
    /// subtree eagerly.
    pub(crate) fn inflate(
        &mut self,
        owner: &BuildOwner,
        widget: Widget,
        parent: Option<ElementId>,
    ) -> ElementId {
        let depth = parent
            .and_then(|p| self.element(p))
            .map(|e| e.depth + 1)
            .unwrap_or(0);

        let kind = match &widget {
            Widget::Stateless(_) => ElementKind::Stateless { child: None },
            Widget::Stateful(w) => ElementKind::Stateful {
                state: Some(w.create_state()),
                child: None,
            },
            Widget::Render(_) => ElementKind::Render {
                render: None,
                children: Vec::new(),
            },
            Widget::Inherited(w) => ElementKind::Inherited {
                child: None,
                dependents: HashMap::new(),
                discriminant: (**w).type_id(),
            },
        };

        let element = Element {
            widget: widget.clone(),
            parent,
            depth,
            flags: ElementFlags::MOUNTED,
            kind,
            dependencies: HashSet::new(),
        };

        let id = if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.generation = slot.generation.wrapping_add(1);
            slot.element = Some(element);
            ElementId {
                index,
                generation: slot.generation,
            }
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Slot {
                element: Some(element),
                generation: 0,
            });
            ElementId {
                index,
                generation: 0,
            }
        };

        if let Widget::Render(w) = &widget {
            let render = owner.pipeline().insert(w.create_render_object());
            if let Some(el) = self.element_mut(id) {
                if let ElementKind::Render { render: slot, .. } = &mut el.kind {
                    *slot = Some(render);
                }
            }
        }
        if let Some(mut state) = self.take_state(id) {
            state.init_state();
            self.put_state(id, state);
        }

        log::debug!("mounted {} element at depth {}", widget.kind_name(), depth);
        self.rebuild(owner, id);
        id
    }

    /// Tear down an element and its subtree: children first, then state
    /// disposal, render object disposal (which releases its layer), and
    /// dependency unregistration. Idempotent for stale ids.
    pub(crate) fn unmount(&mut self, owner: &BuildOwner, id: ElementId) {
        let element = {
            let Some(slot) = self.slots.get_mut(id.index as usize) else {
                return;
            };
            if slot.generation != id.generation {
                return;
            }
            match slot.element.take() {
                Some(element) => element,
                None => return,
            }
        };
        self.free.push(id.index);
        if self.root == Some(id) {
            self.root = None;
        }

        match element.kind {
            ElementKind::Stateless { child } | ElementKind::Inherited { child, .. } => {
                if let Some(child) = child {
                    self.unmount(owner, child);
                }
            }
            ElementKind::Stateful { mut state, child } => {
                if let Some(child) = child {
                    self.unmount(owner, child);
                }
                if let Some(state) = state.as_mut() {
                    state.dispose();
                }
            }
            ElementKind::Render { render, children } => {
                for child in children {
                    self.unmount(owner, child);
                }
                if let Some(render) = render {
                    owner.pipeline().dispose(render);
                }
            }
        }

        for dep in element.dependencies {
            if let Some(ElementKind::Inherited { dependents, .. }) =
                self.element_mut(dep).map(|e| &mut e.kind)
            {
                dependents.remove(&id);
            }
        }

        log::debug!("unmounted {} element", element.widget.kind_name());
    }

    /// Run the element's build and reconcile its children against the output.
    pub(crate) fn rebuild(&mut self, owner: &BuildOwner, id: ElementId) {
        let Some(el) = self.element(id) else {
            return;
        };
        let widget = el.widget.clone();

        match &widget {
            Widget::Stateless(w) => {
                let built = {
                    let mut ctx = BuildContext {
                        tree: self,
                        owner,
                        element: id,
                    };
                    w.build(&mut ctx)
                };
                self.reconcile_single_child(owner, id, Some(built));
            }
            Widget::Stateful(_) => {
                let Some(mut state) = self.take_state(id) else {
                    log::error!("stateful element rebuilt while its state was checked out");
                    return;
                };
                let built = {
                    let mut ctx = BuildContext {
                        tree: self,
                        owner,
                        element: id,
                    };
                    state.build(&mut ctx)
                };
                self.put_state(id, state);
                self.reconcile_single_child(owner, id, Some(built));
            }
            Widget::Render(w) => {
                let new_widgets = w.children().into_vec();
                let old_children = match self.element(id).map(|e| &e.kind) {
                    Some(ElementKind::Render { children, .. }) => children.clone(),
                    _ => return,
                };
                let new_children =
                    self.reconcile_children(owner, id, old_children, new_widgets);
                if let Some(ElementKind::Render { children, .. }) =
                    self.element_mut(id).map(|e| &mut e.kind)
                {
                    *children = new_children;
                }
                self.sync_render_children(owner, id);
            }
            Widget::Inherited(w) => {
                let built = w.child();
                self.reconcile_single_child(owner, id, Some(built));
            }
        }

        if !matches!(widget, Widget::Render(_)) {
            if let Some(render_ancestor) = self.nearest_render_ancestor(id) {
                self.sync_render_children(owner, render_ancestor);
            }
        }
    }

    /// Rebuild a dirty element; clean or stale elements are skipped.
    pub(crate) fn rebuild_if_needed(&mut self, owner: &BuildOwner, id: ElementId) {
        let Some(el) = self.element_mut(id) else {
            return;
        };
        if !el.flags.contains(ElementFlags::DIRTY) {
            return;
        }
        el.flags.remove(ElementFlags::DIRTY);
        self.rebuild(owner, id);
    }

    /// Schedule an element for rebuild. No-op for unmounted or already-dirty
    /// elements.
    pub fn mark_needs_build(&mut self, owner: &BuildOwner, id: ElementId) {
        let Some(el) = self.element_mut(id) else {
            return;
        };
        if !el.flags.contains(ElementFlags::MOUNTED) {
            return;
        }
        if el.flags.contains(ElementFlags::DIRTY) {
            return;
        }
        el.flags.insert(ElementFlags::DIRTY);
        owner.schedule_build(id, el.depth);
    }

    /// Mutate a stateful element's state and schedule it for rebuild.
    /// Safe no-op when the element is gone, holds no state (reentrant call),
    /// or the state is of a different type.
    pub fn update_state<S: State>(
        &mut self,
        owner: &BuildOwner,
        id: ElementId,
        f: impl FnOnce(&mut S),
    ) {
        let Some(el) = self.element_mut(id) else {
            return;
        };
        let ElementKind::Stateful { state, .. } = &mut el.kind else {
            return;
        };
        let Some(boxed) = state.as_mut() else {
            return;
        };
        let any: &mut dyn Any = &mut **boxed;
        match any.downcast_mut::<S>() {
            Some(state) => f(state),
            None => {
                log::error!("update_state called with mismatched state type");
                return;
            }
        }
        self.mark_needs_build(owner, id);
    }

    // --- reconciliation -----------------------------------------------------

    /// Core reconciliation step: decide whether `child` survives `new_widget`.
    pub(crate) fn update_child(
        &mut self,
        owner: &BuildOwner,
        parent: ElementId,
        child: Option<ElementId>,
        new_widget: Option<Widget>,
    ) -> Option<ElementId> {
        match (child, new_widget) {
            (None, None) => None,
            (Some(child), None) => {
                self.unmount(owner, child);
                None
            }
            (None, Some(widget)) => Some(self.inflate(owner, widget, Some(parent))),
            (Some(child), Some(widget)) => {
                let current = self.element(child).map(|e| e.widget.clone());
                if let Some(current) = &current {
                    if current.ptr_eq(&widget) {
                        return Some(child);
                    }
                }
                let compatible = current
                    .map(|w| w.can_update(&widget))
                    .unwrap_or(false);
                if compatible {
                    self.update(owner, child, widget);
                    Some(child)
                } else {
                    self.unmount(owner, child);
                    Some(self.inflate(owner, widget, Some(parent)))
                }
            }
        }
    }

    /// Positional list reconciliation: pair old children and new widgets by
    /// index, inflating extras and unmounting leftovers.
    pub(crate) fn reconcile_children(
        &mut self,
        owner: &BuildOwner,
        parent: ElementId,
        old: Vec<ElementId>,
        new: Vec<Widget>,
    ) -> Vec<ElementId> {
        let mut result = Vec::with_capacity(new.len());
        let count = old.len().max(new.len());
        let mut new = new.into_iter();
        for i in 0..count {
            let child = old.get(i).copied();
            let widget = new.next();
            if let Some(id) = self.update_child(owner, parent, child, widget) {
                result.push(id);
            }
        }
        result
    }

    /// Give a new widget to a mounted element that accepted it via
    /// [`Widget::can_update`]: swap the widget, run the per-kind update
    /// notification, and schedule the rebuild. The depth-ordered flush is
    /// what rebuilds the element, exactly once even when it was already
    /// scheduled.
    pub(crate) fn update(&mut self, owner: &BuildOwner, id: ElementId, new_widget: Widget) {
        let Some(el) = self.element_mut(id) else {
            return;
        };
        let old_widget = std::mem::replace(&mut el.widget, new_widget.clone());

        match &new_widget {
            Widget::Stateful(_) => {
                if let Widget::Stateful(old) = &old_widget {
                    if let Some(mut state) = self.take_state(id) {
                        state.did_update_widget(&**old);
                        self.put_state(id, state);
                    }
                }
            }
            Widget::Render(w) => {
                if let Some(ElementKind::Render {
                    render: Some(render),
                    ..
                }) = self.element(id).map(|e| &e.kind)
                {
                    w.update_render_object(owner.pipeline(), *render);
                }
            }
            Widget::Inherited(w) => {
                if let Widget::Inherited(old) = &old_widget {
                    if w.update_should_notify(&**old) {
                        let changed = w.changed_aspects(&**old);
                        self.notify_dependents(owner, id, changed);
                    }
                }
            }
            Widget::Stateless(_) => {}
        }

        self.mark_needs_build(owner, id);
    }

    // --- helpers ------------------------------------------------------------

    fn reconcile_single_child(
        &mut self,
        owner: &BuildOwner,
        id: ElementId,
        built: Option<Widget>,
    ) {
        let old = match self.element(id).map(|e| &e.kind) {
            Some(ElementKind::Stateless { child })
            | Some(ElementKind::Stateful { child, .. })
            | Some(ElementKind::Inherited { child, .. }) => *child,
            _ => return,
        };
        let new = self.update_child(owner, id, old, built);
        if let Some(el) = self.element_mut(id) {
            match &mut el.kind {
                ElementKind::Stateless { child }
                | ElementKind::Stateful { child, .. }
                | ElementKind::Inherited { child, .. } => *child = new,
                ElementKind::Render { .. } => {}
            }
        }
    }

    fn take_state(&mut self, id: ElementId) -> Option<Box<dyn State>> {
        match self.element_mut(id).map(|e| &mut e.kind) {
            Some(ElementKind::Stateful { state, .. }) => state.take(),
            _ => None,
        }
    }

    fn put_state(&mut self, id: ElementId, boxed: Box<dyn State>) {
        // The element may have unmounted during its own build; the state is
        // simply dropped then.
        if let Some(ElementKind::Stateful { state, .. }) =
            self.element_mut(id).map(|e| &mut e.kind)
        {
            *state = Some(boxed);
        }
    }

    fn nearest_render_ancestor(&self, id: ElementId) -> Option<ElementId> {
        let mut current = self.element(id)?.parent;
        while let Some(p) = current {
            if matches!(
                self.element(p).map(|e| &e.kind),
                Some(ElementKind::Render { .. })
            ) {
                return Some(p);
            }
            current = self.element(p)?.parent;
        }
        None
    }

    /// Push the render objects produced by a render element's child elements
    /// into the pipeline. An unchanged list is a no-op down there, so this is
    /// safe to call after every rebuild.
    fn sync_render_children(&self, owner: &BuildOwner, id: ElementId) {
        let Some(ElementKind::Render {
            render: Some(render),
            children,
        }) = self.element(id).map(|e| &e.kind)
        else {
            return;
        };
        let child_renders: Vec<RenderId> = children
            .iter()
            .filter_map(|c| self.render_object_of(*c))
            .collect();
        owner.pipeline().set_children(*render, child_renders);
    }
}

/// Handed to build methods; the element's window into the tree.
pub struct BuildContext<'a> {
    pub(crate) tree: &'a mut ElementTree,
    pub(crate) owner: &'a BuildOwner,
    pub(crate) element: ElementId,
}

impl BuildContext<'_> {
    pub fn element(&self) -> ElementId {
        self.element
    }

    /// The widget currently configuring this element.
    pub fn widget(&self) -> Widget {
        self.tree
            .widget(self.element)
            .expect("build context for unmounted element")
    }

    /// Typed view of the current widget.
    pub fn widget_as<W: Any>(&self) -> Option<Rc<W>> {
        let rc: Rc<dyn Any> = match self.widget() {
            Widget::Stateless(w) => w,
            Widget::Stateful(w) => w,
            Widget::Render(w) => w,
            Widget::Inherited(w) => w,
        };
        rc.downcast::<W>().ok()
    }

    /// Schedule this element for another rebuild after the current one.
    pub fn mark_needs_build(&mut self) {
        let id = self.element;
        self.tree.mark_needs_build(self.owner, id);
    }

    /// Walk strictly upward and return the first ancestor whose widget
    /// satisfies `predicate`.
    pub fn find_ancestor(&self, predicate: impl Fn(&Widget) -> bool) -> Option<ElementId> {
        let mut current = self.tree.parent(self.element);
        while let Some(id) = current {
            if let Some(widget) = self.tree.widget(id) {
                if predicate(&widget) {
                    return Some(id);
                }
            }
            current = self.tree.parent(id);
        }
        None
    }

    pub fn owner(&self) -> &BuildOwner {
        self.owner
    }
}
