//! Inherited-widget dependency tracking.
//!
//! An element that reads an ancestor [`InheritedWidget`] through its build
//! context registers itself as a dependent, optionally narrowed to a set of
//! [`Aspect`]s. When the inherited element's widget is replaced and
//! `update_should_notify` says so, the matching dependents are scheduled for
//! rebuild and stateful ones get `did_change_dependencies`.

use std::any::{Any, TypeId};
use std::collections::HashSet;
use std::rc::Rc;

use crate::build_owner::BuildOwner;
use crate::element::{BuildContext, ElementId, ElementKind, ElementTree};
use crate::widget::{Aspect, InheritedWidget, Widget};

impl ElementTree {
    /// Nearest ancestor inherited element whose concrete widget type matches.
    pub(crate) fn find_inherited_ancestor(
        &self,
        from: ElementId,
        discriminant: TypeId,
    ) -> Option<ElementId> {
        let mut current = self.element(from)?.parent;
        while let Some(id) = current {
            let el = self.element(id)?;
            if let ElementKind::Inherited {
                discriminant: d, ..
            } = &el.kind
            {
                if *d == discriminant {
                    return Some(id);
                }
            }
            current = el.parent;
        }
        None
    }

    /// Register `dependent` on the inherited element `target`.
    ///
    /// `aspects: None` means "any change"; repeated registrations union their
    /// aspect sets, and a `None` registration swallows earlier narrow ones.
    pub(crate) fn register_dependency(
        &mut self,
        dependent: ElementId,
        target: ElementId,
        aspects: Option<&[Aspect]>,
    ) {
        if let Some(el) = self.element_mut(target) {
            if let ElementKind::Inherited { dependents, .. } = &mut el.kind {
                match aspects {
                    None => {
                        dependents.insert(dependent, None);
                    }
                    Some(new) => {
                        let slot = dependents
                            .entry(dependent)
                            .or_insert_with(|| Some(HashSet::new()));
                        if let Some(set) = slot {
                            set.extend(new.iter().copied());
                        }
                    }
                }
            }
        }
        if let Some(el) = self.element_mut(dependent) {
            el.dependencies.insert(target);
        }
    }

    /// Notify the dependents of an inherited element after its widget
    /// changed. `changed: None` treats every aspect as changed.
    pub(crate) fn notify_dependents(
        &mut self,
        owner: &BuildOwner,
        id: ElementId,
        changed: Option<HashSet<Aspect>>,
    ) {
        let dependents: Vec<(ElementId, Option<HashSet<Aspect>>)> =
            match self.element(id).map(|e| &e.kind) {
                Some(ElementKind::Inherited { dependents, .. }) => dependents
                    .iter()
                    .map(|(k, v)| (*k, v.clone()))
                    .collect(),
                _ => return,
            };

        log::debug!("inherited element changed, {} dependent(s)", dependents.len());
        for (dependent, registered) in dependents {
            let affected = match (&registered, &changed) {
                (None, _) | (_, None) => true,
                (Some(registered), Some(changed)) => !registered.is_disjoint(changed),
            };
            if !affected {
                continue;
            }
            if let Some(mut state) = self.take_dependent_state(dependent) {
                state.did_change_dependencies();
                self.put_dependent_state(dependent, state);
            }
            self.mark_needs_build(owner, dependent);
        }
    }

    fn take_dependent_state(&mut self, id: ElementId) -> Option<Box<dyn crate::widget::State>> {
        match self.element_mut(id).map(|e| &mut e.kind) {
            Some(ElementKind::Stateful { state, .. }) => state.take(),
            _ => None,
        }
    }

    fn put_dependent_state(&mut self, id: ElementId, state: Box<dyn crate::widget::State>) {
        if let Some(ElementKind::Stateful { state: slot, .. }) =
            self.element_mut(id).map(|e| &mut e.kind)
        {
            *slot = Some(state);
        }
    }
}

impl BuildContext<'_> {
    /// Read the nearest inherited widget of type `W` and register this
    /// element as a dependent. `aspects` narrows which changes trigger a
    /// rebuild; `None` subscribes to any change. Returns `None` when no such
    /// ancestor exists.
    pub fn depend_on_inherited<W: InheritedWidget>(
        &mut self,
        aspects: Option<&[Aspect]>,
    ) -> Option<Rc<W>> {
        let target = self
            .tree
            .find_inherited_ancestor(self.element, TypeId::of::<W>())?;
        let element = self.element;
        self.tree.register_dependency(element, target, aspects);
        let Widget::Inherited(w) = self.tree.widget(target)? else {
            return None;
        };
        let any: Rc<dyn Any> = w;
        any.downcast::<W>().ok()
    }

    /// Like [`BuildContext::depend_on_inherited`], but a missing ancestor is
    /// a programming error and panics with the widget type's name.
    pub fn require_inherited<W: InheritedWidget>(&mut self, aspects: Option<&[Aspect]>) -> Rc<W> {
        match self.depend_on_inherited::<W>(aspects) {
            Some(w) => w,
            None => panic!(
                "no inherited widget of type {} above this element",
                std::any::type_name::<W>()
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build_owner::BuildOwner;
    use crate::constraints::Constraints;
    use crate::geometry::Size;
    use crate::render::{
        LayoutContext, PaintContext, PipelineOwner, RenderBox, RenderId,
    };
    use crate::widget::{RenderWidget, State, StatefulWidget, StatelessWidget};
    use std::cell::Cell;
    use std::rc::Rc;

    const COLOR: Aspect = Aspect("color");
    const SPACING: Aspect = Aspect("spacing");

    struct NullBox;

    impl RenderBox for NullBox {
        fn perform_layout(
            &mut self,
            _ctx: &LayoutContext<'_>,
            _id: RenderId,
            constraints: Constraints,
        ) -> Size {
            constraints.constrain(Size::ZERO)
        }

        fn paint(&mut self, _ctx: &mut PaintContext<'_>, _id: RenderId) {}
    }

    struct Leaf;

    impl RenderWidget for Leaf {
        fn create_render_object(&self) -> Box<dyn RenderBox> {
            Box::new(NullBox)
        }

        fn update_render_object(&self, _owner: &PipelineOwner, _id: RenderId) {}
    }

    struct Theme {
        color: u32,
        spacing: u32,
        child: Widget,
    }

    impl InheritedWidget for Theme {
        fn child(&self) -> Widget {
            self.child.clone()
        }

        fn update_should_notify(&self, old: &dyn InheritedWidget) -> bool {
            let old: &dyn Any = old;
            let Some(old) = old.downcast_ref::<Theme>() else {
                return true;
            };
            self.color != old.color || self.spacing != old.spacing
        }

        fn changed_aspects(&self, old: &dyn InheritedWidget) -> Option<HashSet<Aspect>> {
            let old: &dyn Any = old;
            let old = old.downcast_ref::<Theme>()?;
            let mut changed = HashSet::new();
            if self.color != old.color {
                changed.insert(COLOR);
            }
            if self.spacing != old.spacing {
                changed.insert(SPACING);
            }
            Some(changed)
        }
    }

    struct Consumer {
        aspects: Option<Vec<Aspect>>,
        builds: Rc<Cell<usize>>,
        seen_color: Rc<Cell<u32>>,
    }

    impl StatelessWidget for Consumer {
        fn build(&self, ctx: &mut BuildContext<'_>) -> Widget {
            self.builds.set(self.builds.get() + 1);
            let theme = ctx.require_inherited::<Theme>(self.aspects.as_deref());
            self.seen_color.set(theme.color);
            Widget::render(Leaf)
        }
    }

    struct StatefulConsumer {
        deps_changed: Rc<Cell<usize>>,
    }

    struct StatefulConsumerState {
        deps_changed: Rc<Cell<usize>>,
    }

    impl StatefulWidget for StatefulConsumer {
        fn create_state(&self) -> Box<dyn State> {
            Box::new(StatefulConsumerState {
                deps_changed: self.deps_changed.clone(),
            })
        }
    }

    impl State for StatefulConsumerState {
        fn build(&mut self, ctx: &mut BuildContext<'_>) -> Widget {
            ctx.require_inherited::<Theme>(None);
            Widget::render(Leaf)
        }

        fn did_change_dependencies(&mut self) {
            self.deps_changed.set(self.deps_changed.get() + 1);
        }
    }

    struct Orphan;

    impl StatelessWidget for Orphan {
        fn build(&self, ctx: &mut BuildContext<'_>) -> Widget {
            ctx.require_inherited::<Theme>(None);
            Widget::render(Leaf)
        }
    }

    fn setup() -> (ElementTree, BuildOwner) {
        (
            ElementTree::new(),
            BuildOwner::new(Rc::new(PipelineOwner::new())),
        )
    }

    fn theme(color: u32, spacing: u32, child: Widget) -> Widget {
        Widget::inherited(Theme {
            color,
            spacing,
            child,
        })
    }

    fn consumer(aspects: Option<Vec<Aspect>>) -> (Widget, Rc<Cell<usize>>, Rc<Cell<u32>>) {
        let builds = Rc::new(Cell::new(0));
        let seen = Rc::new(Cell::new(0));
        (
            Widget::stateless(Consumer {
                aspects,
                builds: builds.clone(),
                seen_color: seen.clone(),
            }),
            builds,
            seen,
        )
    }

    #[test]
    fn test_dependent_sees_inherited_value() {
        let (mut tree, owner) = setup();
        let (w, builds, seen) = consumer(None);
        tree.mount_root(&owner, theme(7, 1, w));
        assert_eq!(builds.get(), 1);
        assert_eq!(seen.get(), 7);
    }

    #[test]
    fn test_change_notifies_dependent() {
        let (mut tree, owner) = setup();
        let (w, builds, seen) = consumer(None);
        let root = tree.mount_root(&owner, theme(7, 1, w.clone()));

        // The same consumer instance: only the notification can rebuild it.
        tree.update(&owner, root, theme(8, 1, w));
        owner.flush_build(&mut tree);

        assert_eq!(builds.get(), 2);
        assert_eq!(seen.get(), 8);
    }

    #[test]
    fn test_no_notification_when_should_notify_false() {
        let (mut tree, owner) = setup();
        let (w, builds, _) = consumer(None);
        let root = tree.mount_root(&owner, theme(7, 1, w.clone()));

        tree.update(&owner, root, theme(7, 1, w));
        owner.flush_build(&mut tree);

        assert_eq!(builds.get(), 1);
    }

    #[test]
    fn test_aspect_filter_skips_unrelated_change() {
        let (mut tree, owner) = setup();
        let (w, builds, _) = consumer(Some(vec![COLOR]));
        let root = tree.mount_root(&owner, theme(7, 1, w.clone()));

        // Only spacing changes: the color-only dependent stays clean.
        tree.update(&owner, root, theme(7, 2, w.clone()));
        owner.flush_build(&mut tree);
        assert_eq!(builds.get(), 1);

        // Color changes: now it rebuilds.
        tree.update(&owner, root, theme(9, 2, w));
        owner.flush_build(&mut tree);
        assert_eq!(builds.get(), 2);
    }

    #[test]
    fn test_stateful_dependent_gets_did_change_dependencies() {
        let (mut tree, owner) = setup();
        let deps = Rc::new(Cell::new(0));
        let root = tree.mount_root(
            &owner,
            theme(
                7,
                1,
                Widget::stateful(StatefulConsumer {
                    deps_changed: deps.clone(),
                }),
            ),
        );
        assert_eq!(deps.get(), 0);

        tree.update(
            &owner,
            root,
            theme(
                8,
                1,
                Widget::stateful(StatefulConsumer {
                    deps_changed: deps.clone(),
                }),
            ),
        );
        owner.flush_build(&mut tree);

        assert_eq!(deps.get(), 1);
    }

    #[test]
    fn test_unmounted_dependent_is_unregistered() {
        let (mut tree, owner) = setup();
        let (w, builds, _) = consumer(None);
        let root = tree.mount_root(&owner, theme(7, 1, w));

        // Replace the consumer with a plain leaf; the old dependent unmounts.
        tree.update(&owner, root, theme(7, 1, Widget::render(Leaf)));
        let before = builds.get();

        // A later change must not touch the stale dependent.
        tree.update(&owner, root, theme(9, 1, Widget::render(Leaf)));
        owner.flush_build(&mut tree);
        assert_eq!(builds.get(), before);
    }

    #[test]
    #[should_panic(expected = "no inherited widget")]
    fn test_require_inherited_without_ancestor_panics() {
        let (mut tree, owner) = setup();
        tree.mount_root(&owner, Widget::stateless(Orphan));
    }
}
