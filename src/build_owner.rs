//! The [`BuildOwner`]: dirty-element queue and build flush.
//!
//! Elements schedule themselves through [`ElementTree::mark_needs_build`];
//! the owner batches them and [`BuildOwner::flush_build`] rebuilds each one
//! once per flush, shallowest first. A parent's rebuild hands updated
//! widgets to its children and leaves them scheduled; the flush reaches
//! them at their own depth, so a child that was already dirty still builds
//! only once. An element re-dirtied while it is being rebuilt is deferred
//! to the next flush instead of looping.

use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::rc::Rc;

use crate::element::{ElementId, ElementTree};
use crate::render::PipelineOwner;

pub struct BuildOwner {
    pipeline: Rc<PipelineOwner>,
    dirty: RefCell<Vec<(ElementId, u32)>>,
    scheduled: RefCell<HashSet<ElementId>>,
    in_flush: Cell<bool>,
    rebuilt_this_flush: RefCell<HashSet<ElementId>>,
    deferred: RefCell<Vec<(ElementId, u32)>>,
}

impl BuildOwner {
    pub fn new(pipeline: Rc<PipelineOwner>) -> Self {
        Self {
            pipeline,
            dirty: RefCell::new(Vec::new()),
            scheduled: RefCell::new(HashSet::new()),
            in_flush: Cell::new(false),
            rebuilt_this_flush: RefCell::new(HashSet::new()),
            deferred: RefCell::new(Vec::new()),
        }
    }

    /// The layout/paint pipeline this owner feeds.
    pub fn pipeline(&self) -> &PipelineOwner {
        &self.pipeline
    }

    pub fn pipeline_handle(&self) -> Rc<PipelineOwner> {
        self.pipeline.clone()
    }

    /// Enqueue an element for the next flush. Duplicates are dropped; an
    /// element already rebuilt in the current flush goes to the flush after,
    /// which is what keeps a state mutation during build from looping.
    pub(crate) fn schedule_build(&self, id: ElementId, depth: u32) {
        if self.scheduled.borrow().contains(&id) {
            return;
        }
        if self.in_flush.get() && self.rebuilt_this_flush.borrow().contains(&id) {
            log::debug!("element re-dirtied during flush, deferring to next flush");
            self.deferred.borrow_mut().push((id, depth));
            return;
        }
        self.scheduled.borrow_mut().insert(id);
        self.dirty.borrow_mut().push((id, depth));
    }

    pub fn needs_build(&self) -> bool {
        !self.dirty.borrow().is_empty() || !self.deferred.borrow().is_empty()
    }

    pub fn pending_builds(&self) -> usize {
        self.dirty.borrow().len() + self.deferred.borrow().len()
    }

    /// Rebuild every queued element in ascending depth order.
    ///
    /// Elements scheduled while the flush runs (children inflated or dirtied
    /// by a parent's rebuild) join the current flush; they sit deeper than
    /// the element that scheduled them. Unmounted or already-clean elements
    /// are tolerated and skipped.
    pub fn flush_build(&self, tree: &mut ElementTree) {
        if self.dirty.borrow().is_empty() {
            self.promote_deferred();
            return;
        }
        log::debug!("flushing {} dirty element(s)", self.dirty.borrow().len());
        self.in_flush.set(true);

        loop {
            let next = {
                let mut dirty = self.dirty.borrow_mut();
                if dirty.is_empty() {
                    break;
                }
                let mut best = 0;
                for (i, entry) in dirty.iter().enumerate() {
                    if entry.1 < dirty[best].1 {
                        best = i;
                    }
                }
                dirty.swap_remove(best).0
            };
            self.scheduled.borrow_mut().remove(&next);
            // Insert before rebuilding: a reschedule from inside the build
            // must land in the deferred set.
            self.rebuilt_this_flush.borrow_mut().insert(next);
            tree.rebuild_if_needed(self, next);
        }

        self.in_flush.set(false);
        self.rebuilt_this_flush.borrow_mut().clear();
        self.promote_deferred();
    }

    fn promote_deferred(&self) {
        let mut deferred = self.deferred.borrow_mut();
        if deferred.is_empty() {
            return;
        }
        let mut scheduled = self.scheduled.borrow_mut();
        let mut dirty = self.dirty.borrow_mut();
        for (id, depth) in deferred.drain(..) {
            if scheduled.insert(id) {
                dirty.push((id, depth));
            }
        }
    }
}
