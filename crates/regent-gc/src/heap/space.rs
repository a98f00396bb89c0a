//! Spaces.
//!
//! A space is a set of regions with one allocation discipline:
//!
//! | Space | Allocation | Reclaimed by |
//! |---|---|---|
//! | [`SemiSpace`] | bump (TLABs) | copying |
//! | [`SweepableSpace`] (old, non-movable, machine code, shared) | free list | sweeping, evacuation for old |
//! | [`HugeObjectSpace`] | whole region runs | sweeping |
//! | [`ReadOnlySpace`] | bump | never |
//!
//! The sweeper drives every sweepable space through the [`Space`] trait.

use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::heap::free_list::FreeList;
use crate::heap::region::{Region, RegionFlags, RegionId, RegionTable, SweepState, REGION_SIZE};
use crate::object::{object_size, ObjectModel};

/// Allocation spaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpaceType {
    /// Young generation (semi space).
    Young,
    /// Old generation.
    Old,
    /// Objects that must never move.
    NonMovable,
    /// Executable code objects (never move).
    MachineCode,
    /// Objects above the huge-object threshold.
    Huge,
    /// Immutable objects that are never collected.
    ReadOnly,
    /// Old space of the shared heap.
    SharedOld,
    /// Non-movable space of the shared heap.
    SharedNonMovable,
    /// Huge-object space of the shared heap.
    SharedHuge,
}

impl SpaceType {
    /// True for spaces owned by a shared heap.
    #[must_use]
    pub const fn is_shared(self) -> bool {
        matches!(
            self,
            Self::SharedOld | Self::SharedNonMovable | Self::SharedHuge
        )
    }
}

/// What a sweep needs besides the space itself.
pub(crate) struct SweepContext<'a> {
    pub(crate) table: &'a RegionTable,
    pub(crate) model: &'a dyn ObjectModel,
}

/// A space whose dead objects are reclaimed by sweeping.
pub(crate) trait Space: Send + Sync {
    fn space_type(&self) -> SpaceType;

    /// Queues every region for sweeping and drops the stale free list.
    ///
    /// Runs inside a pause.
    fn prepare_sweep(&self, table: &RegionTable);

    /// Sweeps one queued region. Returns false once the queue is empty.
    fn async_sweep(&self, cx: &SweepContext<'_>) -> bool;

    /// Sweeps every queued region on the calling thread.
    fn sweep(&self, cx: &SweepContext<'_>) {
        while self.async_sweep(cx) {}
    }

    /// Committed bytes.
    fn committed_bytes(&self) -> usize;

    /// Estimated bytes of live objects.
    fn heap_object_size(&self) -> usize;
}

/// The young generation: a semi space of bump-allocated regions.
pub(crate) struct SemiSpace {
    state: Mutex<SemiState>,
    capacity_regions: usize,
}

#[derive(Default)]
struct SemiState {
    regions: Vec<RegionId>,
    current: Option<RegionId>,
    from: Vec<RegionId>,
}

impl SemiSpace {
    pub(crate) fn new(capacity_regions: usize) -> Self {
        Self {
            state: Mutex::new(SemiState::default()),
            capacity_regions,
        }
    }

    /// Bumps `size` bytes from the active regions, growing up to capacity.
    pub(crate) fn allocate(&self, table: &RegionTable, size: usize) -> Option<(usize, RegionId)> {
        debug_assert!(size <= REGION_SIZE);
        let mut state = self.state.lock();
        if let Some(id) = state.current {
            let region = table.region(id);
            if let Some(addr) = region.try_bump(size, region.end()) {
                return Some((addr, id));
            }
        }
        if state.regions.len() >= self.capacity_regions {
            return None;
        }
        let region = table.acquire(RegionFlags::YOUNG)?;
        state.regions.push(region.id());
        state.current = Some(region.id());
        region
            .try_bump(size, region.end())
            .map(|addr| (addr, region.id()))
    }

    /// Flags every active region as from-space and starts an empty to-space.
    pub(crate) fn flip(&self, table: &RegionTable) -> Vec<RegionId> {
        let mut state = self.state.lock();
        let from = std::mem::take(&mut state.regions);
        for &id in &from {
            table.region(id).add_flags(RegionFlags::FROM_SPACE);
        }
        state.current = None;
        state.from.clone_from(&from);
        from
    }

    /// Releases the from-space and ages the survivors in to-space.
    pub(crate) fn finish_gc(&self, table: &RegionTable) -> usize {
        let mut state = self.state.lock();
        let from = std::mem::take(&mut state.from);
        let freed = from.len();
        for id in from {
            table.release(id);
        }
        for &id in &state.regions {
            let region = table.region(id);
            region.set_age_mark(region.top());
        }
        freed
    }

    /// Active region ids.
    pub(crate) fn regions(&self) -> Vec<RegionId> {
        self.state.lock().regions.clone()
    }

    /// True if `addr` lies below the bump pointer of its young region.
    pub(crate) fn is_allocated(table: &RegionTable, addr: usize) -> bool {
        table
            .region_of(addr)
            .is_some_and(|r| r.in_young() && addr < r.top())
    }

    pub(crate) fn committed_bytes(&self) -> usize {
        self.state.lock().regions.len() * REGION_SIZE
    }

    pub(crate) fn heap_object_size(&self, table: &RegionTable) -> usize {
        self.state
            .lock()
            .regions
            .iter()
            .map(|&id| {
                let region = table.region(id);
                region.top() - region.begin()
            })
            .sum()
    }

    pub(crate) const fn capacity_regions(&self) -> usize {
        self.capacity_regions
    }
}

/// Free-list space reclaimed by sweeping: old, non-movable, machine code and
/// their shared counterparts.
pub(crate) struct SweepableSpace {
    kind: SpaceType,
    regions: Mutex<Vec<RegionId>>,
    free_list: Mutex<FreeList>,
    sweep_queue: Mutex<Vec<RegionId>>,
    live_bytes: AtomicUsize,
}

impl SweepableSpace {
    pub(crate) fn new(kind: SpaceType) -> Self {
        Self {
            kind,
            regions: Mutex::new(Vec::new()),
            free_list: Mutex::new(FreeList::new()),
            sweep_queue: Mutex::new(Vec::new()),
            live_bytes: AtomicUsize::new(0),
        }
    }

    /// Takes `size` bytes from the free list.
    pub(crate) fn allocate_from_free_list(&self, size: usize) -> Option<usize> {
        let addr = self.free_list.lock().allocate(size)?;
        self.live_bytes.fetch_add(size, Ordering::Relaxed);
        Some(addr)
    }

    /// Grabs a fresh region, puts it on the free list and allocates from it.
    pub(crate) fn expand_and_allocate(&self, table: &RegionTable, size: usize) -> Option<usize> {
        let region = table.acquire(RegionFlags::for_space(self.kind))?;
        // Allocations count themselves in as they are marked.
        region.set_alive_bytes(0);
        self.regions.lock().push(region.id());
        let mut free_list = self.free_list.lock();
        free_list.add(region.begin(), REGION_SIZE);
        let addr = free_list.allocate(size)?;
        self.live_bytes.fetch_add(size, Ordering::Relaxed);
        Some(addr)
    }

    /// Grabs a fresh region for one evacuation buffer.
    pub(crate) fn acquire_evacuation_region<'t>(
        &self,
        table: &'t RegionTable,
        extra: RegionFlags,
    ) -> Option<&'t Region> {
        let region = table.acquire(RegionFlags::for_space(self.kind) | extra)?;
        // Filled with copies only; nothing to learn from its stats until swept.
        region.set_alive_bytes(0);
        self.regions.lock().push(region.id());
        Some(region)
    }

    /// Returns an unused buffer tail to the free list.
    pub(crate) fn add_free_chunk(&self, addr: usize, size: usize) {
        self.free_list.lock().add(addr, size);
    }

    pub(crate) fn record_copied(&self, bytes: usize) {
        self.live_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub(crate) fn regions(&self) -> Vec<RegionId> {
        self.regions.lock().clone()
    }

    pub(crate) fn free_bytes(&self) -> usize {
        self.free_list.lock().free_bytes()
    }

    /// Flags the sparsest old regions as the collection set.
    pub(crate) fn select_cset(
        &self,
        table: &RegionTable,
        live_ratio_percent: usize,
        max_regions: usize,
    ) -> Vec<RegionId> {
        let mut candidates: Vec<(usize, RegionId)> = self
            .regions
            .lock()
            .iter()
            .map(|&id| table.region(id))
            .filter(|r| !r.flags().contains(RegionFlags::APP_SPAWN))
            .filter(|r| r.alive_bytes() * 100 < live_ratio_percent * REGION_SIZE)
            .map(|r| (r.alive_bytes(), r.id()))
            .collect();
        candidates.sort_unstable();
        candidates.truncate(max_regions);
        let cset: Vec<RegionId> = candidates.into_iter().map(|(_, id)| id).collect();
        if cset.is_empty() {
            return cset;
        }
        for &id in &cset {
            table.region(id).add_flags(RegionFlags::IN_CSET);
        }
        self.free_list
            .lock()
            .retain(|addr, _| table.region_of(addr).is_some_and(|r| !r.in_cset()));
        cset
    }

    /// Drops and returns the regions matching `pred`.
    pub(crate) fn remove_regions(
        &self,
        table: &RegionTable,
        mut pred: impl FnMut(&Region) -> bool,
    ) -> Vec<RegionId> {
        let mut removed = Vec::new();
        self.regions.lock().retain(|&id| {
            if pred(table.region(id)) {
                removed.push(id);
                false
            } else {
                true
            }
        });
        if !removed.is_empty() {
            self.free_list
                .lock()
                .retain(|addr, _| table.region_of(addr).is_some_and(|r| !pred(r)));
        }
        removed
    }

    pub(crate) fn set_live_bytes(&self, bytes: usize) {
        self.live_bytes.store(bytes, Ordering::Relaxed);
    }

    /// Sweeps `region` unless someone already did.
    pub(crate) fn sweep_region(&self, cx: &SweepContext<'_>, region: &Region) -> bool {
        if !region.try_begin_sweep() {
            return false;
        }
        let bits = region.mark_bits();
        let end = region.end();
        let mut cursor = region.begin();
        let mut live = 0;
        let mut chunks = Vec::new();
        let mut next = 0;
        while let Some(index) = bits.next_set(next) {
            let obj = region.object_at(index);
            if obj.raw() > cursor {
                chunks.push((cursor, obj.raw() - cursor));
                region.clear_rset_range_in_sweeping(cursor, obj.raw());
            }
            let size = object_size(cx.model, obj);
            live += size;
            cursor = (obj.raw() + size).min(end);
            next = (cursor - region.begin()) / crate::object::OBJECT_ALIGNMENT;
        }
        if cursor < end {
            chunks.push((cursor, end - cursor));
            region.clear_rset_range_in_sweeping(cursor, end);
        }
        region.set_alive_bytes(live);
        region.rsets().finish_sweeping();
        region.set_sweep_state(SweepState::Swept);

        if live == 0 {
            self.regions.lock().retain(|&id| id != region.id());
            cx.table.release(region.id());
        } else {
            self.live_bytes.fetch_add(live, Ordering::Relaxed);
            let mut free_list = self.free_list.lock();
            for (addr, size) in chunks {
                free_list.add(addr, size);
            }
        }
        true
    }

    #[cfg(test)]
    pub(crate) fn free_list_len(&self) -> usize {
        self.free_list.lock().len()
    }
}

impl Space for SweepableSpace {
    fn space_type(&self) -> SpaceType {
        self.kind
    }

    fn prepare_sweep(&self, table: &RegionTable) {
        self.free_list.lock().clear();
        self.live_bytes.store(0, Ordering::Relaxed);
        let regions = self.regions.lock().clone();
        for &id in &regions {
            let region = table.region(id);
            region.rsets().begin_sweeping();
            region.set_sweep_state(SweepState::NotSwept);
        }
        *self.sweep_queue.lock() = regions;
    }

    fn async_sweep(&self, cx: &SweepContext<'_>) -> bool {
        let Some(id) = self.sweep_queue.lock().pop() else {
            return false;
        };
        self.sweep_region(cx, cx.table.region(id));
        true
    }

    fn committed_bytes(&self) -> usize {
        self.regions.lock().len() * REGION_SIZE
    }

    fn heap_object_size(&self) -> usize {
        self.live_bytes.load(Ordering::Relaxed)
    }
}

/// Objects above the huge threshold, one region run each.
pub(crate) struct HugeObjectSpace {
    kind: SpaceType,
    heads: Mutex<Vec<RegionId>>,
    sweep_queue: Mutex<Vec<RegionId>>,
    committed: AtomicUsize,
    live_bytes: AtomicUsize,
}

impl HugeObjectSpace {
    pub(crate) fn new(kind: SpaceType) -> Self {
        Self {
            kind,
            heads: Mutex::new(Vec::new()),
            sweep_queue: Mutex::new(Vec::new()),
            committed: AtomicUsize::new(0),
            live_bytes: AtomicUsize::new(0),
        }
    }

    /// Allocates a run of regions for one object of `size` bytes.
    pub(crate) fn allocate(&self, table: &RegionTable, size: usize) -> Option<usize> {
        let count = size.div_ceil(REGION_SIZE);
        let flags = if self.kind.is_shared() {
            RegionFlags::SHARED
        } else {
            RegionFlags::FREE
        };
        let head = table.acquire_run(count, flags)?;
        self.heads.lock().push(head.id());
        self.committed
            .fetch_add(count * REGION_SIZE, Ordering::Relaxed);
        self.live_bytes.fetch_add(size, Ordering::Relaxed);
        Some(head.begin())
    }

    pub(crate) fn heads(&self) -> Vec<RegionId> {
        self.heads.lock().clone()
    }

    fn sweep_head(&self, cx: &SweepContext<'_>, head: &Region) {
        if !head.try_begin_sweep() {
            return;
        }
        let len = head.run_length();
        if head.is_marked(head.begin()) {
            for region in cx.table.run(head.id()) {
                region.rsets().finish_sweeping();
            }
            let size = object_size(cx.model, head.object_at(0));
            head.set_alive_bytes(size);
            self.live_bytes.fetch_add(size, Ordering::Relaxed);
            head.set_sweep_state(SweepState::Swept);
        } else {
            head.set_sweep_state(SweepState::Swept);
            self.heads.lock().retain(|&id| id != head.id());
            self.committed
                .fetch_sub(len * REGION_SIZE, Ordering::Relaxed);
            cx.table.release(head.id());
        }
    }
}

impl Space for HugeObjectSpace {
    fn space_type(&self) -> SpaceType {
        self.kind
    }

    fn prepare_sweep(&self, table: &RegionTable) {
        self.live_bytes.store(0, Ordering::Relaxed);
        let heads = self.heads.lock().clone();
        for &id in &heads {
            for region in table.run(id) {
                region.rsets().begin_sweeping();
            }
            table.region(id).set_sweep_state(SweepState::NotSwept);
        }
        *self.sweep_queue.lock() = heads;
    }

    fn async_sweep(&self, cx: &SweepContext<'_>) -> bool {
        let Some(id) = self.sweep_queue.lock().pop() else {
            return false;
        };
        self.sweep_head(cx, cx.table.region(id));
        true
    }

    fn committed_bytes(&self) -> usize {
        self.committed.load(Ordering::Relaxed)
    }

    fn heap_object_size(&self) -> usize {
        self.live_bytes.load(Ordering::Relaxed)
    }
}

/// Bump-allocated immutable objects that are never collected.
pub(crate) struct ReadOnlySpace {
    state: Mutex<Vec<RegionId>>,
}

impl ReadOnlySpace {
    pub(crate) const fn new() -> Self {
        Self {
            state: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn allocate(&self, table: &RegionTable, size: usize) -> Option<usize> {
        let mut regions = self.state.lock();
        if let Some(&id) = regions.last() {
            let region = table.region(id);
            if let Some(addr) = region.try_bump(size, region.end()) {
                return Some(addr);
            }
        }
        let region = table.acquire(RegionFlags::READ_ONLY)?;
        regions.push(region.id());
        region.try_bump(size, region.end())
    }

    pub(crate) fn committed_bytes(&self) -> usize {
        self.state.lock().len() * REGION_SIZE
    }
}
