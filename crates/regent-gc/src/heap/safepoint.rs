//! Mutator registry and stop-the-world handshake.
//!
//! Every attached mutator is either *running* or *parked*. A collector asks
//! for a pause with [`Safepoints::begin_stw`], which raises the request flag
//! and waits until no mutator other than itself is running. Mutators notice
//! the flag in [`Safepoints::poll`] and park until the guard is dropped.
//! A mutator inside a blocking region counts as parked.
//!
//! Only one pause owner exists at a time. A mutator that wants to collect
//! while another thread owns the pause parks first, so two collecting
//! mutators cannot wait for each other.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};

use parking_lot::{Condvar, Mutex};

#[derive(Debug, Default)]
struct State {
    running: usize,
    owner: Option<ThreadId>,
    depth: usize,
}

/// Safepoint state of one heap.
#[derive(Debug, Default)]
pub(crate) struct Safepoints {
    requested: AtomicBool,
    state: Mutex<State>,
    changed: Condvar,
}

impl Safepoints {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// True while a pause is requested or in progress.
    #[inline]
    pub(crate) fn is_requested(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }

    /// Registers the calling thread as a running mutator.
    pub(crate) fn attach(&self) {
        let mut state = self.state.lock();
        while self.is_requested() {
            self.changed.wait(&mut state);
        }
        state.running += 1;
    }

    pub(crate) fn detach(&self) {
        let mut state = self.state.lock();
        debug_assert!(state.running > 0);
        state.running -= 1;
        self.changed.notify_all();
    }

    /// Parks the calling mutator if a pause is requested. Returns true if it parked.
    #[inline]
    pub(crate) fn poll(&self) -> bool {
        if !self.is_requested() {
            return false;
        }
        self.park();
        true
    }

    fn park(&self) {
        let me = thread::current().id();
        let mut state = self.state.lock();
        if state.owner == Some(me) {
            return;
        }
        state.running -= 1;
        self.changed.notify_all();
        while self.is_requested() {
            self.changed.wait(&mut state);
        }
        state.running += 1;
    }

    /// Leaves the running set for a blocking region.
    pub(crate) fn enter_native(&self) {
        let mut state = self.state.lock();
        state.running -= 1;
        self.changed.notify_all();
    }

    /// Rejoins the running set, waiting out any pause.
    pub(crate) fn leave_native(&self) {
        let mut state = self.state.lock();
        while self.is_requested() {
            self.changed.wait(&mut state);
        }
        state.running += 1;
    }

    /// Stops every mutator except the caller.
    ///
    /// `is_mutator` tells whether the caller is itself an attached mutator.
    /// Re-entrant on the owning thread.
    pub(crate) fn begin_stw(self: &Arc<Self>, is_mutator: bool) -> StwGuard {
        let me = thread::current().id();
        let mut state = self.state.lock();
        if state.owner == Some(me) {
            state.depth += 1;
            return StwGuard {
                safepoints: Arc::clone(self),
                is_mutator: false,
            };
        }
        if is_mutator {
            state.running -= 1;
            self.changed.notify_all();
        }
        while state.owner.is_some() {
            self.changed.wait(&mut state);
        }
        state.owner = Some(me);
        state.depth = 1;
        self.requested.store(true, Ordering::Release);
        while state.running > 0 {
            self.changed.wait(&mut state);
        }
        StwGuard {
            safepoints: Arc::clone(self),
            is_mutator,
        }
    }

    fn end_stw(&self, is_mutator: bool) {
        let mut state = self.state.lock();
        state.depth -= 1;
        if state.depth > 0 {
            return;
        }
        state.owner = None;
        self.requested.store(false, Ordering::Release);
        if is_mutator {
            state.running += 1;
        }
        self.changed.notify_all();
    }

    /// True if the calling thread currently owns the pause.
    pub(crate) fn owned_by_current(&self) -> bool {
        self.state.lock().owner == Some(thread::current().id())
    }

    pub(crate) fn running(&self) -> usize {
        self.state.lock().running
    }
}

/// Resumes the world when dropped.
#[must_use = "the world resumes as soon as the guard is dropped"]
pub(crate) struct StwGuard {
    safepoints: Arc<Safepoints>,
    is_mutator: bool,
}

impl Drop for StwGuard {
    fn drop(&mut self) {
        self.safepoints.end_stw(self.is_mutator);
    }
}
