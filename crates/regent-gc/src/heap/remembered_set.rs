//! Remembered sets.
//!
//! A region keeps up to three remembered sets, each a [`GcBitset`] with one
//! bit per slot of the region:
//!
//! * old→new: slots of this (non-young) region that may point into the young
//!   generation;
//! * local→shared: slots of this local region that may point into the shared
//!   heap;
//! * cross-region: slots of this region that point into a collection-set
//!   region of the current partial collection.
//!
//! Sets are created on first insert. Creation takes the region's lock and
//! re-checks (double-checked); inserting into an existing set is a single
//! atomic bit operation.
//!
//! While a region is swept concurrently, its old→new and local→shared bits
//! live in a second "sweeping" buffer. The sweeper clears dead ranges there,
//! mutators insert into the live buffer, and the two are merged once the
//! region is swept.

use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};

use parking_lot::Mutex;

use crate::gc::mark::GcBitset;
use crate::heap::region::{RegionFlags, SLOTS_PER_REGION};

/// The kinds of remembered set a region can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RememberedSetKind {
    /// Old→young slots.
    OldToNew,
    /// Local→shared slots.
    LocalToShare,
    /// Slots pointing into the collection set.
    CrossRegion,
}

/// Decides which remembered sets a freshly acquired region gets up front.
///
/// The decision only trades memory for first-insert latency; sets that are
/// not created eagerly are still created on demand.
pub trait RememberedSetPolicy: Send + Sync {
    /// True if a region with `flags` should start with a `kind` set allocated.
    fn create_eagerly(&self, flags: RegionFlags, kind: RememberedSetKind) -> bool;
}

/// Creates every set lazily.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultRememberedSetPolicy;

impl RememberedSetPolicy for DefaultRememberedSetPolicy {
    fn create_eagerly(&self, _flags: RegionFlags, _kind: RememberedSetKind) -> bool {
        false
    }
}

/// Gives non-movable and machine-code regions their old→new set up front.
///
/// Those regions live long and are written by runtime internals, so they
/// almost always end up needing one.
#[derive(Debug, Clone, Copy, Default)]
pub struct EagerNonMovablePolicy;

impl RememberedSetPolicy for EagerNonMovablePolicy {
    fn create_eagerly(&self, flags: RegionFlags, kind: RememberedSetKind) -> bool {
        kind == RememberedSetKind::OldToNew
            && flags.intersects(RegionFlags::NON_MOVABLE | RegionFlags::MACHINE_CODE)
    }
}

/// A bitset allocated on first use.
///
/// The pointer is published once and freed only on drop, so references
/// handed out live as long as the owner.
#[derive(Debug)]
struct LazyBitset(AtomicPtr<GcBitset>);

impl LazyBitset {
    const fn new() -> Self {
        Self(AtomicPtr::new(ptr::null_mut()))
    }

    fn get(&self) -> Option<&GcBitset> {
        let p = self.0.load(Ordering::Acquire);
        // SAFETY: non-null pointers come from `Box::into_raw` and are freed only in `Drop`.
        unsafe { p.as_ref() }
    }

    fn get_or_create(&self, lock: &Mutex<()>) -> &GcBitset {
        if let Some(set) = self.get() {
            return set;
        }
        let _guard = lock.lock();
        if let Some(set) = self.get() {
            return set;
        }
        let raw = Box::into_raw(Box::new(GcBitset::new(SLOTS_PER_REGION)));
        self.0.store(raw, Ordering::Release);
        // SAFETY: just published, never freed before `Drop`.
        unsafe { &*raw }
    }

    /// Exchanges the backing storage with `other`.
    ///
    /// Only called while no other thread touches either set.
    fn swap(&self, other: &Self) {
        let mine = self.0.load(Ordering::Acquire);
        let theirs = other.0.swap(mine, Ordering::AcqRel);
        self.0.store(theirs, Ordering::Release);
    }

    fn clear(&self) {
        if let Some(set) = self.get() {
            set.clear_all();
        }
    }
}

impl Drop for LazyBitset {
    fn drop(&mut self) {
        let p = *self.0.get_mut();
        if !p.is_null() {
            // SAFETY: allocated by `Box::into_raw` in `get_or_create`.
            drop(unsafe { Box::from_raw(p) });
        }
    }
}

/// The remembered sets of one region.
#[derive(Debug)]
pub(crate) struct RememberedSets {
    old_to_new: LazyBitset,
    sweeping_old_to_new: LazyBitset,
    local_to_share: LazyBitset,
    sweeping_local_to_share: LazyBitset,
    cross_region: LazyBitset,
    create_lock: Mutex<()>,
}

impl RememberedSets {
    pub(crate) const fn new() -> Self {
        Self {
            old_to_new: LazyBitset::new(),
            sweeping_old_to_new: LazyBitset::new(),
            local_to_share: LazyBitset::new(),
            sweeping_local_to_share: LazyBitset::new(),
            cross_region: LazyBitset::new(),
            create_lock: Mutex::new(()),
        }
    }

    const fn live(&self, kind: RememberedSetKind) -> &LazyBitset {
        match kind {
            RememberedSetKind::OldToNew => &self.old_to_new,
            RememberedSetKind::LocalToShare => &self.local_to_share,
            RememberedSetKind::CrossRegion => &self.cross_region,
        }
    }

    const fn sweeping(&self, kind: RememberedSetKind) -> Option<&LazyBitset> {
        match kind {
            RememberedSetKind::OldToNew => Some(&self.sweeping_old_to_new),
            RememberedSetKind::LocalToShare => Some(&self.sweeping_local_to_share),
            RememberedSetKind::CrossRegion => None,
        }
    }

    pub(crate) fn create(&self, kind: RememberedSetKind) {
        self.live(kind).get_or_create(&self.create_lock);
    }

    pub(crate) fn insert(&self, kind: RememberedSetKind, index: usize) {
        self.live(kind).get_or_create(&self.create_lock).set_atomic(index);
    }

    pub(crate) fn insert_range(&self, kind: RememberedSetKind, start: usize, end: usize) {
        self.live(kind)
            .get_or_create(&self.create_lock)
            .set_range_atomic(start, end);
    }

    pub(crate) fn contains(&self, kind: RememberedSetKind, index: usize) -> bool {
        let live = self.live(kind).get().is_some_and(|s| s.test(index));
        live || self
            .sweeping(kind)
            .and_then(LazyBitset::get)
            .is_some_and(|s| s.test(index))
    }

    pub(crate) fn has_any(&self, kind: RememberedSetKind) -> bool {
        let live = self.live(kind).get().is_some_and(|s| !s.is_clear());
        live || self
            .sweeping(kind)
            .and_then(LazyBitset::get)
            .is_some_and(|s| !s.is_clear())
    }

    /// Visits the bits of both buffers, dropping those for which `f` returns false.
    pub(crate) fn retain(&self, kind: RememberedSetKind, mut f: impl FnMut(usize) -> bool) {
        if let Some(set) = self.live(kind).get() {
            set.retain(&mut f);
        }
        if let Some(set) = self.sweeping(kind).and_then(LazyBitset::get) {
            set.retain(&mut f);
        }
    }

    pub(crate) fn for_each(&self, kind: RememberedSetKind, mut f: impl FnMut(usize)) {
        if let Some(set) = self.live(kind).get() {
            set.for_each_set(&mut f);
        }
        if let Some(set) = self.sweeping(kind).and_then(LazyBitset::get) {
            set.for_each_set(&mut f);
        }
    }

    pub(crate) fn clear(&self, kind: RememberedSetKind) {
        self.live(kind).clear();
        if let Some(set) = self.sweeping(kind) {
            set.clear();
        }
    }

    pub(crate) fn clear_all(&self) {
        self.clear(RememberedSetKind::OldToNew);
        self.clear(RememberedSetKind::LocalToShare);
        self.clear(RememberedSetKind::CrossRegion);
    }

    /// Moves the live old→new and local→shared bits into the sweeping buffers.
    ///
    /// Runs inside a pause, before the region is handed to the sweeper.
    pub(crate) fn begin_sweeping(&self) {
        for kind in [RememberedSetKind::OldToNew, RememberedSetKind::LocalToShare] {
            if let Some(sweeping) = self.sweeping(kind) {
                sweeping.clear();
                self.live(kind).swap(sweeping);
            }
        }
    }

    /// Drops sweeping-buffer bits in `[start, end)`.
    pub(crate) fn clear_sweeping_range(&self, start: usize, end: usize) {
        for kind in [RememberedSetKind::OldToNew, RememberedSetKind::LocalToShare] {
            if let Some(set) = self.sweeping(kind).and_then(LazyBitset::get) {
                set.clear_range(start, end);
            }
        }
    }

    /// Folds the sweeping buffers back into the live sets.
    pub(crate) fn finish_sweeping(&self) {
        for kind in [RememberedSetKind::OldToNew, RememberedSetKind::LocalToShare] {
            let Some(sweeping) = self.sweeping(kind).and_then(LazyBitset::get) else {
                continue;
            };
            if sweeping.is_clear() {
                continue;
            }
            self.live(kind)
                .get_or_create(&self.create_lock)
                .merge_from(sweeping);
            sweeping.clear_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sets_are_created_on_first_insert() {
        let sets = RememberedSets::new();
        assert!(!sets.has_any(RememberedSetKind::OldToNew));
        assert!(sets.live(RememberedSetKind::OldToNew).get().is_none());

        sets.insert(RememberedSetKind::OldToNew, 17);
        assert!(sets.contains(RememberedSetKind::OldToNew, 17));
        assert!(!sets.contains(RememberedSetKind::LocalToShare, 17));
        assert!(sets.live(RememberedSetKind::LocalToShare).get().is_none());
    }

    #[test]
    fn test_insert_during_sweep_survives_merge() {
        let sets = RememberedSets::new();
        sets.insert(RememberedSetKind::OldToNew, 4);
        sets.insert(RememberedSetKind::OldToNew, 40);
        sets.begin_sweeping();

        // Mutator writes land in the live buffer while the sweeper drops a dead range.
        sets.insert(RememberedSetKind::OldToNew, 100);
        sets.clear_sweeping_range(32, 64);
        assert!(sets.contains(RememberedSetKind::OldToNew, 4));
        assert!(!sets.contains(RememberedSetKind::OldToNew, 40));

        sets.finish_sweeping();
        let mut seen = Vec::new();
        sets.for_each(RememberedSetKind::OldToNew, |i| seen.push(i));
        assert_eq!(seen, vec![4, 100]);
    }

    #[test]
    fn test_retain_covers_both_buffers() {
        let sets = RememberedSets::new();
        sets.insert(RememberedSetKind::LocalToShare, 1);
        sets.begin_sweeping();
        sets.insert(RememberedSetKind::LocalToShare, 2);
        sets.retain(RememberedSetKind::LocalToShare, |i| i == 2);
        assert!(!sets.contains(RememberedSetKind::LocalToShare, 1));
        assert!(sets.contains(RememberedSetKind::LocalToShare, 2));
    }

    #[test]
    fn test_eager_policy() {
        let policy = EagerNonMovablePolicy;
        assert!(policy.create_eagerly(RegionFlags::NON_MOVABLE, RememberedSetKind::OldToNew));
        assert!(!policy.create_eagerly(RegionFlags::OLD, RememberedSetKind::OldToNew));
        assert!(!policy.create_eagerly(RegionFlags::NON_MOVABLE, RememberedSetKind::CrossRegion));
    }
}
