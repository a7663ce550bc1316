//! Widget descriptions: immutable configuration consumed by the element tree.
//!
//! A [`Widget`] is a cheap, clonable description of a piece of UI. The
//! element tree decides whether an existing element can absorb a new widget
//! ([`Widget::can_update`]) or whether the subtree has to be rebuilt from
//! scratch. Widgets never hold mutable state; state lives in [`State`]
//! objects owned by elements.

use std::any::{Any, TypeId};
use std::collections::HashSet;
use std::fmt;
use std::rc::Rc;

use crate::element::BuildContext;
use crate::render::{PipelineOwner, RenderBox, RenderId};

/// Identity hint for reconciliation. Two widgets of the same concrete type
/// with equal keys are treated as the same logical entity across rebuilds.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum Key {
    Int(i64),
    Str(String),
}

impl Key {
    pub fn str(s: impl Into<String>) -> Self {
        Key::Str(s.into())
    }
}

/// Named facet of an inherited widget's data, used to narrow which
/// dependents get notified when the widget changes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct Aspect(pub &'static str);

/// A widget that composes other widgets and holds no mutable state.
pub trait StatelessWidget: Any {
    fn key(&self) -> Option<Key> {
        None
    }

    fn build(&self, ctx: &mut BuildContext<'_>) -> Widget;
}

/// A widget whose element owns a [`State`] object surviving rebuilds.
pub trait StatefulWidget: Any {
    fn key(&self) -> Option<Key> {
        None
    }

    fn create_state(&self) -> Box<dyn State>;
}

/// Mutable state owned by a stateful widget's element.
///
/// Created once when the element mounts and kept across widget updates; the
/// current widget is always reachable through the build context.
pub trait State: Any {
    /// Called once when the owning element mounts, before the first build.
    fn init_state(&mut self) {}

    fn build(&mut self, ctx: &mut BuildContext<'_>) -> Widget;

    /// Called after the element's widget is swapped for a new one of the
    /// same type, with the widget that was replaced; the new one is already
    /// reachable through the build context. The element rebuilds afterwards
    /// regardless.
    fn did_update_widget(&mut self, _old_widget: &dyn StatefulWidget) {}

    /// Called when an inherited widget this state depends on has changed.
    fn did_change_dependencies(&mut self) {}

    /// Called once when the element unmounts. The state is dropped after.
    fn dispose(&mut self) {}
}

/// Children declared by a render widget.
#[derive(Clone, Default)]
pub enum ChildSpec {
    #[default]
    None,
    Single(Widget),
    Multi(Vec<Widget>),
}

impl ChildSpec {
    pub fn into_vec(self) -> Vec<Widget> {
        match self {
            ChildSpec::None => Vec::new(),
            ChildSpec::Single(w) => vec![w],
            ChildSpec::Multi(ws) => ws,
        }
    }
}

/// A widget backed by a render object that does layout and paint.
pub trait RenderWidget: Any {
    fn key(&self) -> Option<Key> {
        None
    }

    /// Create the render object when the element mounts.
    fn create_render_object(&self) -> Box<dyn RenderBox>;

    /// Push this widget's configuration into an existing render object after
    /// an update. Implementations mark layout/paint dirty as appropriate.
    fn update_render_object(&self, owner: &PipelineOwner, id: RenderId);

    fn children(&self) -> ChildSpec {
        ChildSpec::None
    }
}

/// A widget that exposes data to every descendant that registers a
/// dependency on it.
pub trait InheritedWidget: Any {
    fn key(&self) -> Option<Key> {
        None
    }

    fn child(&self) -> Widget;

    /// Whether dependents must be notified after this widget replaced `old`.
    fn update_should_notify(&self, old: &dyn InheritedWidget) -> bool;

    /// Which aspects changed relative to `old`. `None` means "treat every
    /// aspect as changed"; dependents registered for specific aspects are
    /// only notified when their set intersects this one.
    fn changed_aspects(&self, _old: &dyn InheritedWidget) -> Option<HashSet<Aspect>> {
        None
    }
}

/// Immutable UI description. One of four kinds, each backed by a shared
/// trait object; cloning shares the description.
#[derive(Clone)]
pub enum Widget {
    Stateless(Rc<dyn StatelessWidget>),
    Stateful(Rc<dyn StatefulWidget>),
    Render(Rc<dyn RenderWidget>),
    Inherited(Rc<dyn InheritedWidget>),
}

impl Widget {
    pub fn stateless(w: impl StatelessWidget) -> Self {
        Widget::Stateless(Rc::new(w))
    }

    pub fn stateful(w: impl StatefulWidget) -> Self {
        Widget::Stateful(Rc::new(w))
    }

    pub fn render(w: impl RenderWidget) -> Self {
        Widget::Render(Rc::new(w))
    }

    pub fn inherited(w: impl InheritedWidget) -> Self {
        Widget::Inherited(Rc::new(w))
    }

    pub fn key(&self) -> Option<Key> {
        match self {
            Widget::Stateless(w) => w.key(),
            Widget::Stateful(w) => w.key(),
            Widget::Render(w) => w.key(),
            Widget::Inherited(w) => w.key(),
        }
    }

    /// The concrete type behind the trait object.
    pub fn concrete_type_id(&self) -> TypeId {
        match self {
            Widget::Stateless(w) => (**w).type_id(),
            Widget::Stateful(w) => (**w).type_id(),
            Widget::Render(w) => (**w).type_id(),
            Widget::Inherited(w) => (**w).type_id(),
        }
    }

    /// Whether an element configured by `self` can absorb `new` in place:
    /// same concrete widget type and equal keys. Anything else forces the
    /// element (and its subtree) to be replaced.
    pub fn can_update(&self, new: &Widget) -> bool {
        self.concrete_type_id() == new.concrete_type_id() && self.key() == new.key()
    }

    /// Whether two handles refer to the same widget instance. Reconciliation
    /// short-circuits on identical instances: nothing can have changed.
    pub(crate) fn ptr_eq(&self, other: &Widget) -> bool {
        match (self, other) {
            (Widget::Stateless(a), Widget::Stateless(b)) => Rc::ptr_eq(a, b),
            (Widget::Stateful(a), Widget::Stateful(b)) => Rc::ptr_eq(a, b),
            (Widget::Render(a), Widget::Render(b)) => Rc::ptr_eq(a, b),
            (Widget::Inherited(a), Widget::Inherited(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    pub(crate) fn kind_name(&self) -> &'static str {
        match self {
            Widget::Stateless(_) => "stateless",
            Widget::Stateful(_) => "stateful",
            Widget::Render(_) => "render",
            Widget::Inherited(_) => "inherited",
        }
    }
}

impl fmt::Debug for Widget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Widget({}", self.kind_name())?;
        if let Some(key) = self.key() {
            write!(f, ", key: {key:?}")?;
        }
        write!(f, ")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Label {
        key: Option<Key>,
    }

    impl StatelessWidget for Label {
        fn key(&self) -> Option<Key> {
            self.key.clone()
        }

        fn build(&self, _ctx: &mut BuildContext<'_>) -> Widget {
            Widget::stateless(Label { key: None })
        }
    }

    struct Button;

    impl StatelessWidget for Button {
        fn build(&self, _ctx: &mut BuildContext<'_>) -> Widget {
            Widget::stateless(Button)
        }
    }

    struct Counter;

    impl StatefulWidget for Counter {
        fn create_state(&self) -> Box<dyn State> {
            struct CounterState;
            impl State for CounterState {
                fn build(&mut self, _ctx: &mut BuildContext<'_>) -> Widget {
                    Widget::stateless(Button)
                }
            }
            Box::new(CounterState)
        }
    }

    #[test]
    fn test_can_update_same_type_no_keys() {
        let a = Widget::stateless(Label { key: None });
        let b = Widget::stateless(Label { key: None });
        assert!(a.can_update(&b));
    }

    #[test]
    fn test_can_update_rejects_different_type() {
        let a = Widget::stateless(Label { key: None });
        let b = Widget::stateless(Button);
        assert!(!a.can_update(&b));
    }

    #[test]
    fn test_can_update_rejects_different_variant() {
        let a = Widget::stateless(Button);
        let b = Widget::stateful(Counter);
        assert!(!a.can_update(&b));
    }

    #[test]
    fn test_key_equality_is_by_value() {
        let a = Widget::stateless(Label {
            key: Some(Key::str("row-1")),
        });
        let b = Widget::stateless(Label {
            key: Some(Key::str("row-1")),
        });
        let c = Widget::stateless(Label {
            key: Some(Key::str("row-2")),
        });
        assert!(a.can_update(&b));
        assert!(!a.can_update(&c));
    }

    #[test]
    fn test_key_mismatch_present_vs_absent() {
        let a = Widget::stateless(Label { key: None });
        let b = Widget::stateless(Label {
            key: Some(Key::Int(1)),
        });
        assert!(!a.can_update(&b));
    }

    #[test]
    fn test_child_spec_into_vec() {
        assert!(ChildSpec::None.into_vec().is_empty());
        assert_eq!(ChildSpec::Single(Widget::stateless(Button)).into_vec().len(), 1);
        assert_eq!(
            ChildSpec::Multi(vec![
                Widget::stateless(Button),
                Widget::stateless(Button)
            ])
            .into_vec()
            .len(),
            2
        );
    }
}
