//! Thread-safe dispatch queue for frame work.
//!
//! Background threads cannot touch the element tree directly; they post
//! closures here and the frame loop drains them on the frame thread before
//! the build flush. Posting also raises the frame-request flag and fires the
//! waker (if one is installed) so an idle event loop wakes up.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, OnceLock};

use crate::build_owner::BuildOwner;
use crate::element::ElementTree;

/// A unit of work executed on the frame thread with tree access.
pub type Job = Box<dyn FnOnce(&mut ElementTree, &BuildOwner) + Send>;

#[derive(Default)]
pub struct DispatchQueue {
    jobs: Mutex<Vec<Job>>,
    frame_requested: AtomicBool,
    waker: OnceLock<Box<dyn Fn() + Send + Sync>>,
}

impl DispatchQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the event-loop wakeup called on the first post after an idle
    /// period. Can only be set once; later calls are ignored.
    pub fn set_waker(&self, waker: impl Fn() + Send + Sync + 'static) {
        let _ = self.waker.set(Box::new(waker));
    }

    /// Queue a job for the next frame. Safe to call from any thread.
    pub fn post(&self, job: impl FnOnce(&mut ElementTree, &BuildOwner) + Send + 'static) {
        let Ok(mut jobs) = self.jobs.lock() else {
            log::error!("dispatch queue lock poisoned, dropping job");
            return;
        };
        jobs.push(Box::new(job));
        drop(jobs);
        self.request_frame();
    }

    pub fn has_pending(&self) -> bool {
        self.jobs.lock().map(|j| !j.is_empty()).unwrap_or(false)
    }

    /// Run every queued job in posting order. Jobs posted while draining run
    /// in the next drain. Returns the number of jobs executed.
    pub fn drain(&self, tree: &mut ElementTree, owner: &BuildOwner) -> usize {
        let jobs = {
            let Ok(mut jobs) = self.jobs.lock() else {
                log::error!("dispatch queue lock poisoned, dropping pending jobs");
                return 0;
            };
            std::mem::take(&mut *jobs)
        };
        let count = jobs.len();
        if count > 0 {
            log::debug!("draining {count} dispatched job(s)");
        }
        for job in jobs {
            job(tree, owner);
        }
        count
    }

    /// Raise the frame-request flag; the waker fires only on the transition
    /// from idle, so repeated posts cost one atomic swap each.
    pub fn request_frame(&self) {
        let was_requested = self.frame_requested.swap(true, Ordering::Relaxed);
        if !was_requested {
            if let Some(waker) = self.waker.get() {
                waker();
            }
        }
    }

    /// Consume the frame-request flag.
    pub fn take_frame_request(&self) -> bool {
        self.frame_requested.swap(false, Ordering::Relaxed)
    }
}
