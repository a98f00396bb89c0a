//! Collector lifecycle state.
//!
//! One [`GcState`] per heap, passed by reference to every component. It
//! holds the pause-level [`GcPhase`], the concurrent-marking
//! [`MarkStatus`] and the pending escalation requests.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, AtomicUsize, Ordering};

use parking_lot::{Condvar, Mutex};

use crate::tracing::gc_debug;

/// What a collection covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TriggerGcType {
    /// Semi-space copy of the young generation.
    Young,
    /// Young generation plus old-space marking with optional compaction of a
    /// collection set.
    Old,
    /// Whole-heap compaction.
    Full,
    /// Whole-heap compaction whose survivors are pinned in app-spawn regions.
    AppSpawnFull,
    /// Concurrent mark-sweep of the shared heap started from a threshold.
    SharedPartial,
    /// Concurrent mark-sweep of the shared heap.
    Shared,
    /// Compacting collection of the shared heap.
    SharedFull,
}

impl TriggerGcType {
    /// True for collections of a shared heap.
    #[must_use]
    pub const fn is_shared(self) -> bool {
        matches!(self, Self::SharedPartial | Self::Shared | Self::SharedFull)
    }
}

/// Why a collection was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GcReason {
    /// A space grew past its limit.
    AllocationLimit,
    /// An allocation could not be satisfied.
    AllocationFailed,
    /// The embedder reported idle time.
    Idle,
    /// The application moved to the background.
    SwitchBackground,
    /// The program asked for a collection.
    HintGc,
    /// Another component asked for a collection.
    External,
    /// Anything else.
    Other,
}

/// Pause-level phase of the collector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum GcPhase {
    /// No collection running.
    Idle = 0,
    /// Marking, concurrently or inside a pause.
    Marking = 1,
    /// Copying live objects.
    Evacuating = 2,
    /// Reclaiming unmarked memory.
    Sweeping = 3,
}

impl GcPhase {
    const fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Marking,
            2 => Self::Evacuating,
            3 => Self::Sweeping,
            _ => Self::Idle,
        }
    }

    /// True if `self -> next` is a legal transition.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Idle, Self::Marking | Self::Evacuating)
                | (Self::Marking, Self::Evacuating | Self::Sweeping | Self::Idle)
                | (Self::Evacuating, Self::Sweeping | Self::Idle)
                | (Self::Sweeping, Self::Idle)
        )
    }
}

/// Concurrent-marking lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkStatus {
    /// No marking cycle is active.
    ReadyToMark,
    /// Roots are shaded and tracing is in progress.
    Marking,
    /// Background tracing is done; remark is pending.
    MarkFinished,
}

/// Shared lifecycle state of a heap.
#[derive(Debug)]
pub(crate) struct GcState {
    phase: AtomicU8,
    status: Mutex<MarkStatus>,
    status_changed: Condvar,
    /// Mirrors `status != ReadyToMark` for the write barrier fast path.
    marking: AtomicBool,
    full_mark_requested: AtomicBool,
    oom_pending: AtomicBool,
    /// Bumped when the young generation is evacuated, invalidating mutator TLABs.
    young_epoch: AtomicU64,
    old_space_limit: AtomicUsize,
    overshoot: AtomicUsize,
}

impl GcState {
    pub(crate) fn new(old_space_limit: usize) -> Self {
        Self {
            phase: AtomicU8::new(GcPhase::Idle as u8),
            status: Mutex::new(MarkStatus::ReadyToMark),
            status_changed: Condvar::new(),
            marking: AtomicBool::new(false),
            full_mark_requested: AtomicBool::new(false),
            oom_pending: AtomicBool::new(false),
            young_epoch: AtomicU64::new(0),
            old_space_limit: AtomicUsize::new(old_space_limit),
            overshoot: AtomicUsize::new(0),
        }
    }

    pub(crate) fn phase(&self) -> GcPhase {
        GcPhase::from_u8(self.phase.load(Ordering::Acquire))
    }

    /// Moves to `next`. Illegal transitions are bugs.
    pub(crate) fn transition_to(&self, next: GcPhase) {
        let current = self.phase();
        debug_assert!(
            current == next || current.can_transition_to(next),
            "illegal gc phase transition {current:?} -> {next:?}"
        );
        self.phase.store(next as u8, Ordering::Release);
    }

    pub(crate) fn mark_status(&self) -> MarkStatus {
        *self.status.lock()
    }

    /// True between the start of marking and the end of remark.
    #[inline]
    pub(crate) fn is_marking(&self) -> bool {
        self.marking.load(Ordering::Acquire)
    }

    pub(crate) fn set_mark_status(&self, next: MarkStatus) {
        let mut status = self.status.lock();
        gc_debug!(from = ?*status, to = ?next, "mark status");
        *status = next;
        self.marking
            .store(next != MarkStatus::ReadyToMark, Ordering::Release);
        self.status_changed.notify_all();
    }

    /// Moves `Marking -> MarkFinished` unless someone reset the cycle.
    pub(crate) fn finish_marking(&self) {
        let mut status = self.status.lock();
        if *status == MarkStatus::Marking {
            *status = MarkStatus::MarkFinished;
            self.status_changed.notify_all();
        }
    }

    /// Blocks until the status leaves `Marking`.
    pub(crate) fn wait_mark_finished(&self) {
        let mut status = self.status.lock();
        while *status == MarkStatus::Marking {
            self.status_changed.wait(&mut status);
        }
    }

    pub(crate) fn request_full_mark(&self) {
        self.full_mark_requested.store(true, Ordering::Release);
    }

    pub(crate) fn full_mark_requested(&self) -> bool {
        self.full_mark_requested.load(Ordering::Acquire)
    }

    pub(crate) fn set_oom_pending(&self, pending: bool) {
        self.oom_pending.store(pending, Ordering::Release);
    }

    pub(crate) fn oom_pending(&self) -> bool {
        self.oom_pending.load(Ordering::Acquire)
    }

    /// Clears the escalation requests a full collection satisfies.
    pub(crate) fn clear_full_requests(&self) {
        self.full_mark_requested.store(false, Ordering::Release);
        self.oom_pending.store(false, Ordering::Release);
    }

    pub(crate) fn young_epoch(&self) -> u64 {
        self.young_epoch.load(Ordering::Acquire)
    }

    pub(crate) fn bump_young_epoch(&self) {
        self.young_epoch.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn old_space_limit(&self) -> usize {
        self.old_space_limit.load(Ordering::Relaxed)
    }

    pub(crate) fn set_old_space_limit(&self, limit: usize) {
        self.old_space_limit.store(limit, Ordering::Relaxed);
    }

    pub(crate) fn overshoot(&self) -> usize {
        self.overshoot.load(Ordering::Relaxed)
    }

    pub(crate) fn set_overshoot(&self, bytes: usize) {
        self.overshoot.store(bytes, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    #[test]
    fn test_phase_transitions() {
        assert!(GcPhase::Idle.can_transition_to(GcPhase::Marking));
        assert!(GcPhase::Marking.can_transition_to(GcPhase::Evacuating));
        assert!(GcPhase::Evacuating.can_transition_to(GcPhase::Sweeping));
        assert!(GcPhase::Sweeping.can_transition_to(GcPhase::Idle));
        assert!(!GcPhase::Idle.can_transition_to(GcPhase::Sweeping));
        assert!(!GcPhase::Sweeping.can_transition_to(GcPhase::Marking));
    }

    #[test]
    fn test_marking_flag_follows_status() {
        let state = GcState::new(0);
        assert!(!state.is_marking());
        state.set_mark_status(MarkStatus::Marking);
        assert!(state.is_marking());
        state.finish_marking();
        assert_eq!(state.mark_status(), MarkStatus::MarkFinished);
        assert!(state.is_marking());
        state.set_mark_status(MarkStatus::ReadyToMark);
        assert!(!state.is_marking());
    }

    #[test]
    fn test_waiter_wakes_on_finish() {
        let state = Arc::new(GcState::new(0));
        state.set_mark_status(MarkStatus::Marking);
        let waiter = {
            let state = Arc::clone(&state);
            thread::spawn(move || state.wait_mark_finished())
        };
        state.finish_marking();
        waiter.join().unwrap();
    }

    #[test]
    fn test_finish_after_reset_is_ignored() {
        let state = GcState::new(0);
        state.set_mark_status(MarkStatus::Marking);
        state.set_mark_status(MarkStatus::ReadyToMark);
        state.finish_marking();
        assert_eq!(state.mark_status(), MarkStatus::ReadyToMark);
    }
}
