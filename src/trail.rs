//! Breadcrumb trail
//!
//! Records nested "currently doing X" descriptions so that errors leaving the
//! pipeline can say where they happened. Entries are pushed through [`Trail::enter`]
//! and popped when the returned guard is dropped, on every exit path.

use std::cell::RefCell;
use std::rc::Rc;

/// Shared, single-threaded breadcrumb stack
#[derive(Debug, Clone, Default)]
pub struct Trail {
    frames: Rc<RefCell<Vec<String>>>,
}

impl Trail {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a description; it is popped when the guard goes out of scope
    #[must_use = "the breadcrumb is popped as soon as the guard is dropped"]
    pub fn enter(&self, description: impl Into<String>) -> TrailGuard {
        let mut frames = self.frames.borrow_mut();
        frames.push(description.into());
        TrailGuard {
            frames: Rc::clone(&self.frames),
            depth: frames.len(),
        }
    }

    pub fn depth(&self) -> usize {
        self.frames.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.borrow().is_empty()
    }

    /// Snapshot of the current frames, outermost first
    pub fn frames(&self) -> Vec<String> {
        self.frames.borrow().clone()
    }

    /// Human-readable trail, outermost first
    pub fn describe(&self) -> String {
        self.frames.borrow().join(" > ")
    }
}

/// Pops its breadcrumb on drop
#[derive(Debug)]
pub struct TrailGuard {
    frames: Rc<RefCell<Vec<String>>>,
    depth: usize,
}

impl Drop for TrailGuard {
    fn drop(&mut self) {
        // Truncate rather than pop so an out-of-order drop cannot leave stale frames.
        self.frames.borrow_mut().truncate(self.depth.saturating_sub(1));
    }
}
