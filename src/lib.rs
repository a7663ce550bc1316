//! Retained-mode UI core: widget reconciliation, layout/paint scheduling,
//! and layer caching.
//!
//! The crate is organized around three trees. [`widget::Widget`]s are
//! immutable descriptions; the [`element::ElementTree`] instantiates them and
//! reconciles updates in place where [`widget::Widget::can_update`] allows;
//! render objects in the [`render::PipelineOwner`] do layout and paint, with
//! repaint boundaries caching their subtree in [`render::Layer`]s. Dirty
//! state flows through the [`build_owner::BuildOwner`] (builds) and the
//! pipeline (layout/paint), and [`App::pump_frame`] runs the phases in
//! order: dispatched jobs, build flush, layout flush, paint flush.

pub mod build_owner;
pub mod constraints;
pub mod element;
pub mod geometry;
pub mod jobs;
pub mod reactive;
pub mod render;
pub mod widget;

use std::rc::Rc;
use std::sync::Arc;

use build_owner::BuildOwner;
use constraints::Constraints;
use element::{ElementId, ElementTree};
use jobs::DispatchQueue;
use render::{Canvas, PipelineOwner};
use widget::Widget;

pub mod prelude {
    pub use crate::constraints::Constraints;
    pub use crate::element::{BuildContext, ElementId, ElementTree};
    pub use crate::geometry::{Color, Offset, Paint, Rect, Size};
    pub use crate::jobs::DispatchQueue;
    pub use crate::reactive::{Notifier, Observable, Subscription};
    pub use crate::render::{
        Canvas, DisplayList, DrawOp, Layer, LayoutContext, PaintContext, PictureRecorder,
        PipelineOwner, RenderBox, RenderId,
    };
    pub use crate::widget::{
        Aspect, ChildSpec, InheritedWidget, Key, RenderWidget, State, StatefulWidget,
        StatelessWidget, Widget,
    };
    pub use crate::App;
}

/// Owns the three trees and the dispatch queue, and drives frames.
pub struct App {
    tree: ElementTree,
    owner: BuildOwner,
    pipeline: Rc<PipelineOwner>,
    queue: Arc<DispatchQueue>,
}

impl App {
    pub fn new() -> Self {
        let pipeline = Rc::new(PipelineOwner::new());
        Self {
            tree: ElementTree::new(),
            owner: BuildOwner::new(pipeline.clone()),
            pipeline,
            queue: Arc::new(DispatchQueue::new()),
        }
    }

    /// Inflate `widget` as the root of the element tree, replacing and
    /// unmounting any previous root.
    pub fn mount(&mut self, widget: Widget) -> ElementId {
        let id = self.tree.mount_root(&self.owner, widget);
        self.queue.request_frame();
        id
    }

    pub fn tree(&self) -> &ElementTree {
        &self.tree
    }

    pub fn tree_mut(&mut self) -> (&mut ElementTree, &BuildOwner) {
        (&mut self.tree, &self.owner)
    }

    pub fn owner(&self) -> &BuildOwner {
        &self.owner
    }

    pub fn pipeline(&self) -> &PipelineOwner {
        &self.pipeline
    }

    /// Shareable handle for posting work from other threads.
    pub fn dispatcher(&self) -> Arc<DispatchQueue> {
        self.queue.clone()
    }

    /// Whether a frame would do any work right now.
    pub fn needs_frame(&self) -> bool {
        self.queue.has_pending()
            || self.owner.needs_build()
            || self.pipeline.needs_layout()
            || self.pipeline.needs_paint()
    }

    /// Run one frame: drain dispatched jobs, flush builds, then layout and
    /// paint under `constraints` onto `canvas`. Returns whether anything was
    /// painted.
    pub fn pump_frame(&mut self, constraints: Constraints, canvas: &mut dyn Canvas) -> bool {
        self.queue.take_frame_request();
        self.queue.drain(&mut self.tree, &self.owner);
        self.owner.flush_build(&mut self.tree);

        let Some(root) = self.tree.root() else {
            return false;
        };
        let Some(render_root) = self.tree.render_object_of(root) else {
            log::error!("root element produced no render object");
            return false;
        };

        self.pipeline.flush_layout_for_root(render_root, constraints);
        if !self.pipeline.needs_paint() {
            return false;
        }
        self.pipeline.flush_paint(render_root, canvas);
        true
    }
}

impl Default for App {
    fn default() -> Self {
        Self::new()
    }
}
