//! End-to-end frame behavior: a stateful screen over a positioned, keyed
//! panel, checking what gets rebuilt, re-laid-out, and re-recorded as state
//! changes flow through.

use std::any::Any;
use std::cell::Cell;
use std::rc::Rc;

use trellis::element::BuildContext;
use trellis::prelude::*;

#[derive(Clone, Default)]
struct PaintCounters {
    stage: Rc<Cell<usize>>,
    block: Rc<Cell<usize>>,
}

struct StageBox {
    offset: Offset,
    paints: Rc<Cell<usize>>,
}

impl RenderBox for StageBox {
    fn perform_layout(
        &mut self,
        ctx: &LayoutContext<'_>,
        id: RenderId,
        constraints: Constraints,
    ) -> Size {
        for child in ctx.children(id) {
            ctx.layout_child(child, Constraints::loose(Size::new(50.0, 50.0)));
            ctx.set_child_offset(child, self.offset);
        }
        constraints.constrain(Size::new(100.0, 100.0))
    }

    fn paint(&mut self, ctx: &mut PaintContext<'_>, id: RenderId) {
        self.paints.set(self.paints.get() + 1);
        for child in ctx.children(id) {
            let offset = ctx.child_offset(child);
            ctx.paint_child_with_layer(child, offset);
        }
    }

    fn is_repaint_boundary(&self) -> bool {
        true
    }
}

struct Stage {
    offset: Offset,
    child: Widget,
    counters: PaintCounters,
}

impl RenderWidget for Stage {
    fn create_render_object(&self) -> Box<dyn RenderBox> {
        Box::new(StageBox {
            offset: self.offset,
            paints: self.counters.stage.clone(),
        })
    }

    fn update_render_object(&self, owner: &PipelineOwner, id: RenderId) {
        let offset = self.offset;
        let changed = owner.with_object_mut(id, |object| {
            let object: &mut dyn Any = object;
            match object.downcast_mut::<StageBox>() {
                Some(stage) if stage.offset != offset => {
                    stage.offset = offset;
                    true
                }
                _ => false,
            }
        });
        // Placement happens during layout, so a moved child needs a layout
        // pass, not just paint.
        if changed == Some(true) {
            owner.mark_needs_layout(id);
        }
    }

    fn children(&self) -> ChildSpec {
        ChildSpec::Single(self.child.clone())
    }
}

struct BlockBox {
    color: u32,
    paints: Rc<Cell<usize>>,
}

impl RenderBox for BlockBox {
    fn perform_layout(
        &mut self,
        _ctx: &LayoutContext<'_>,
        _id: RenderId,
        constraints: Constraints,
    ) -> Size {
        constraints.constrain(Size::new(20.0, 20.0))
    }

    fn paint(&mut self, ctx: &mut PaintContext<'_>, _id: RenderId) {
        self.paints.set(self.paints.get() + 1);
        let color = Color::from_hex(self.color);
        ctx.canvas()
            .draw_rect(Rect::new(0.0, 0.0, 20.0, 20.0), Paint::from_color(color));
    }

    fn is_repaint_boundary(&self) -> bool {
        true
    }
}

struct Block {
    color: u32,
    counters: PaintCounters,
}

impl RenderWidget for Block {
    fn create_render_object(&self) -> Box<dyn RenderBox> {
        Box::new(BlockBox {
            color: self.color,
            paints: self.counters.block.clone(),
        })
    }

    fn update_render_object(&self, owner: &PipelineOwner, id: RenderId) {
        let color = self.color;
        let changed = owner.with_object_mut(id, |object| {
            let object: &mut dyn Any = object;
            match object.downcast_mut::<BlockBox>() {
                Some(block) if block.color != color => {
                    block.color = color;
                    true
                }
                _ => false,
            }
        });
        if changed == Some(true) {
            owner.mark_needs_paint(id);
        }
    }
}

struct Panel {
    key: Key,
    color: u32,
    counters: PaintCounters,
}

impl StatelessWidget for Panel {
    fn key(&self) -> Option<Key> {
        Some(self.key.clone())
    }

    fn build(&self, _ctx: &mut BuildContext<'_>) -> Widget {
        Widget::render(Block {
            color: self.color,
            counters: self.counters.clone(),
        })
    }
}

struct Scene {
    counters: PaintCounters,
}

struct SceneState {
    offset: Offset,
    panel_key: Key,
    color: u32,
    counters: PaintCounters,
}

impl StatefulWidget for Scene {
    fn create_state(&self) -> Box<dyn State> {
        Box::new(SceneState {
            offset: Offset::new(5.0, 5.0),
            panel_key: Key::str("left"),
            color: 0xFF0000,
            counters: self.counters.clone(),
        })
    }
}

impl State for SceneState {
    fn build(&mut self, _ctx: &mut BuildContext<'_>) -> Widget {
        Widget::render(Stage {
            offset: self.offset,
            child: Widget::stateless(Panel {
                key: self.panel_key.clone(),
                color: self.color,
                counters: self.counters.clone(),
            }),
            counters: self.counters.clone(),
        })
    }
}

struct Harness {
    app: App,
    scene: ElementId,
    counters: PaintCounters,
    constraints: Constraints,
}

impl Harness {
    fn new() -> Self {
        let _ = env_logger::builder().is_test(true).try_init();
        let counters = PaintCounters::default();
        let mut app = App::new();
        let scene = app.mount(Widget::stateful(Scene {
            counters: counters.clone(),
        }));
        Self {
            app,
            scene,
            counters,
            constraints: Constraints::tight(Size::new(100.0, 100.0)),
        }
    }

    fn pump(&mut self) -> bool {
        let mut canvas = PictureRecorder::new();
        self.app.pump_frame(self.constraints, &mut canvas)
    }

    fn set_state(&mut self, f: impl FnOnce(&mut SceneState)) {
        let scene = self.scene;
        let (tree, owner) = self.app.tree_mut();
        tree.update_state::<SceneState>(owner, scene, f);
    }

    fn panel_element(&self) -> ElementId {
        let stage = self.app.tree().children_of(self.scene)[0];
        self.app.tree().children_of(stage)[0]
    }

    fn block_render(&self) -> RenderId {
        self.app.tree().render_object_of(self.panel_element()).unwrap()
    }
}

#[test]
fn test_first_frame_paints_everything_once() {
    let mut h = Harness::new();
    assert!(h.pump());
    assert_eq!(h.counters.stage.get(), 1);
    assert_eq!(h.counters.block.get(), 1);
}

#[test]
fn test_idle_frame_paints_nothing() {
    let mut h = Harness::new();
    h.pump();

    assert!(!h.pump());
    assert_eq!(h.counters.stage.get(), 1);
    assert_eq!(h.counters.block.get(), 1);
}

#[test]
fn test_moving_child_rerecords_parent_only() {
    let mut h = Harness::new();
    h.pump();

    h.set_state(|s| s.offset = Offset::new(10.0, 10.0));
    assert!(h.pump());

    // The stage re-records to place the block's layer at the new offset; the
    // block's own cached layer is reused untouched.
    assert_eq!(h.counters.stage.get(), 2);
    assert_eq!(h.counters.block.get(), 1);
}

#[test]
fn test_unchanged_offset_paints_nothing() {
    let mut h = Harness::new();
    h.pump();

    h.set_state(|s| s.offset = Offset::new(5.0, 5.0));
    h.pump();

    assert_eq!(h.counters.stage.get(), 1);
    assert_eq!(h.counters.block.get(), 1);
}

#[test]
fn test_equal_key_updates_in_place() {
    let mut h = Harness::new();
    h.pump();
    let panel_before = h.panel_element();
    let render_before = h.block_render();

    h.set_state(|s| s.color = 0x00FF00);
    assert!(h.pump());

    // Same panel key: the element and render object survive; only the block
    // re-records. The stage's layer still references the same block layer,
    // so the stage does not re-record.
    assert_eq!(h.panel_element(), panel_before);
    assert_eq!(h.block_render(), render_before);
    assert_eq!(h.counters.stage.get(), 1);
    assert_eq!(h.counters.block.get(), 2);
}

#[test]
fn test_key_change_replaces_subtree_and_disposes_layer() {
    let mut h = Harness::new();
    h.pump();
    let panel_before = h.panel_element();
    let render_before = h.block_render();
    let layer_before = h.app.pipeline().layer(render_before).unwrap();
    assert!(layer_before.has_content());

    h.set_state(|s| s.panel_key = Key::str("right"));
    assert!(h.pump());

    assert_ne!(h.panel_element(), panel_before);
    assert_ne!(h.block_render(), render_before);
    assert!(!h.app.tree().contains(panel_before));
    assert!(!h.app.pipeline().contains(render_before));
    // The replaced subtree's retained layer was disposed.
    assert!(!layer_before.has_content());
    // A fresh block painted under the new element.
    assert_eq!(h.counters.block.get(), 2);
}
