//! The local heap.
//!
//! [`Heap`] owns the region table, the spaces and the collector state of one
//! runtime. Threads that run managed code [`attach`](Heap::attach) to get a
//! [`Mutator`], which allocates, stores references through the write
//! barrier and parks at safepoints.
//!
//! Collections run on the thread that requested them, inside a pause, with
//! parallel phases fanned out to the task pool. Concurrent marking and
//! sweeping run on the pool between pauses.
//!
//! Lock order, outermost first: pause ownership, space region lists, free
//! lists, work holders, the global work stack. No lock is held across a
//! pause request.

pub(crate) mod free_list;
pub mod region;
pub mod remembered_set;
pub(crate) mod safepoint;
pub mod space;
pub(crate) mod tlab;

use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

pub use space::SpaceType;

use crate::config::HeapConfig;
use crate::error::{HeapError, Result};
use crate::gc::barrier::{copy_references, write_barrier};
use crate::gc::concurrent_marker::ConcurrentMarker;
use crate::gc::state::{GcPhase, GcReason, GcState, MarkStatus, TriggerGcType};
use crate::gc::sweeper::{ConcurrentSweeper, SweepHost};
use crate::gc::verify::verify_heap;
use crate::gc::worklist::WorkManager;
use crate::gc::{full, partial, young, GcContext};
use crate::metrics::{GcMetrics, GcStats, PhaseTimer};
use crate::object::{align_object_size, Address, ClassWord, MarkWord, ObjectModel, ObjectSlot};
use crate::object::{WEAK_TAG, WORD_SIZE};
use crate::roots::{Root, RootProvider, RootSet};
use crate::shared::{SharedHeap, SharedHeapCore};
use crate::tracing::internal::{next_gc_id, trace_gc_collection};
use crate::tracing::{gc_debug, gc_info, gc_warn};
use region::{RegionFlags, RegionId, RegionTable};
use remembered_set::RememberedSetKind;
use safepoint::Safepoints;
use space::{HugeObjectSpace, ReadOnlySpace, SemiSpace, Space, SweepContext, SweepableSpace};
use tlab::Tlab;

static NEXT_HEAP_ID: AtomicU64 = AtomicU64::new(1);

/// Everything one local heap owns. Shared with background tasks.
pub(crate) struct HeapCore {
    pub(crate) id: u64,
    pub(crate) config: HeapConfig,
    pub(crate) model: Arc<dyn ObjectModel>,
    pub(crate) table: RegionTable,
    pub(crate) young: SemiSpace,
    pub(crate) old: SweepableSpace,
    pub(crate) non_movable: SweepableSpace,
    pub(crate) machine_code: SweepableSpace,
    pub(crate) huge: HugeObjectSpace,
    pub(crate) read_only: ReadOnlySpace,
    pub(crate) state: GcState,
    pub(crate) work: WorkManager,
    pub(crate) sweeper: ConcurrentSweeper,
    pub(crate) marker: ConcurrentMarker,
    pub(crate) roots: RootSet,
    pub(crate) safepoints: Arc<Safepoints>,
    pub(crate) stats: GcStats,
    pub(crate) last_metrics: Mutex<Option<GcMetrics>>,
    pub(crate) shared: Option<Arc<SharedHeapCore>>,
}

impl HeapCore {
    fn new(
        config: HeapConfig,
        model: Arc<dyn ObjectModel>,
        shared: Option<Arc<SharedHeapCore>>,
    ) -> Result<Self> {
        config.validate()?;
        let table = RegionTable::new(config.region_capacity(), Arc::clone(&config.rset_policy))?;
        let workers = config
            .parallel_gc_threads
            .max(config.concurrent_mark_tasks + 1);
        Ok(Self {
            id: NEXT_HEAP_ID.fetch_add(1, Ordering::Relaxed),
            young: SemiSpace::new(config.semi_space_regions()),
            old: SweepableSpace::new(SpaceType::Old),
            non_movable: SweepableSpace::new(SpaceType::NonMovable),
            machine_code: SweepableSpace::new(SpaceType::MachineCode),
            huge: HugeObjectSpace::new(SpaceType::Huge),
            read_only: ReadOnlySpace::new(),
            state: GcState::new(config.old_space_initial_limit),
            work: WorkManager::new(workers),
            sweeper: ConcurrentSweeper::new(config.enable_concurrent_sweep),
            marker: ConcurrentMarker::new(),
            roots: RootSet::new(),
            safepoints: Arc::new(Safepoints::new()),
            stats: GcStats::new(),
            last_metrics: Mutex::new(None),
            table,
            model,
            config,
            shared,
        })
    }

    /// Borrowed view for marking and evacuation.
    pub(crate) fn context(&self, target_flags: RegionFlags) -> GcContext<'_> {
        GcContext {
            table: &self.table,
            model: &*self.model,
            work: &self.work,
            young: Some(&self.young),
            old: &self.old,
            tlab_size: self.config.tlab_size,
            target_flags,
            shared_table: self.shared.as_deref().map(|shared| &shared.table),
        }
    }

    fn sweepable(&self, space: SpaceType) -> Option<&SweepableSpace> {
        match space {
            SpaceType::Old => Some(&self.old),
            SpaceType::NonMovable => Some(&self.non_movable),
            SpaceType::MachineCode => Some(&self.machine_code),
            _ => None,
        }
    }

    /// Committed bytes of the spaces counted against the old-space limit.
    pub(crate) fn old_space_size(&self) -> usize {
        self.old.committed_bytes()
            + self.non_movable.committed_bytes()
            + self.machine_code.committed_bytes()
            + self.huge.committed_bytes()
    }

    /// Runs `trigger` (possibly escalated) inside a pause.
    ///
    /// `is_mutator` says whether the caller is a running mutator of this heap.
    pub(crate) fn collect(core: &Arc<Self>, trigger: TriggerGcType, reason: GcReason, is_mutator: bool) {
        debug_assert!(!trigger.is_shared());
        let _pause = core.safepoints.begin_stw(is_mutator);
        ConcurrentSweeper::ensure_all_task_finished(&**core);

        let state = &core.state;
        let mut gc_type = trigger;
        if matches!(gc_type, TriggerGcType::Young | TriggerGcType::Old)
            && (state.full_mark_requested() || state.oom_pending())
        {
            gc_type = TriggerGcType::Full;
        }
        if gc_type == TriggerGcType::Young && state.mark_status() != MarkStatus::ReadyToMark {
            gc_type = TriggerGcType::Old;
        }
        if gc_type == TriggerGcType::Old
            && reason == GcReason::AllocationLimit
            && core.config.enable_concurrent_mark
            && state.mark_status() == MarkStatus::ReadyToMark
        {
            ConcurrentMarker::initialize(core, true);
            ConcurrentMarker::start(core);
            gc_debug!(heap = core.id, "concurrent marking started");
            return;
        }

        let gc_id = next_gc_id();
        let _span = trace_gc_collection(gc_type, reason, gc_id);
        let start = Instant::now();
        if core.config.verify_heap {
            let failures = verify_heap(core, false);
            if failures > 0 {
                gc_warn!(failures, "heap verification failed before collection");
            }
        }

        let mut metrics = GcMetrics::new();
        metrics.gc_type = gc_type;
        metrics.reason = reason;
        metrics.heap_bytes_before = core.table.committed_bytes();
        let mut timer = PhaseTimer::new();
        match gc_type {
            TriggerGcType::Young => young::run(core, &mut metrics, &mut timer),
            TriggerGcType::Old => partial::run(core, &mut metrics, &mut timer),
            TriggerGcType::Full => full::run(core, false, &mut metrics, &mut timer),
            TriggerGcType::AppSpawnFull => full::run(core, true, &mut metrics, &mut timer),
            TriggerGcType::SharedPartial | TriggerGcType::Shared | TriggerGcType::SharedFull => {
                unreachable!("shared collections run on the shared heap")
            }
        }
        metrics.heap_bytes_after = core.table.committed_bytes();
        metrics.mark_duration = timer.mark;
        metrics.evacuate_duration = timer.evacuate;
        metrics.sweep_duration = timer.sweep;
        metrics.duration = start.elapsed();

        if core.config.verify_heap {
            ConcurrentSweeper::ensure_all_task_finished(&**core);
            let failures = verify_heap(core, false);
            if failures > 0 {
                gc_warn!(failures, "heap verification failed after collection");
            }
        }
        metrics.total_collections = core.stats.record(&metrics);
        gc_info!(
            heap = core.id,
            gc_type = ?metrics.gc_type,
            reason = ?metrics.reason,
            duration_us = metrics.duration.as_micros(),
            before = metrics.heap_bytes_before,
            after = metrics.heap_bytes_after,
            "collection finished"
        );
        *core.last_metrics.lock() = Some(metrics);
    }
}

impl SweepHost for HeapCore {
    fn sweep_space(&self, space: SpaceType) -> Option<&dyn Space> {
        match space {
            SpaceType::Huge => Some(&self.huge),
            other => self.sweepable(other).map(|s| s as &dyn Space),
        }
    }

    fn sweep_context(&self) -> SweepContext<'_> {
        SweepContext {
            table: &self.table,
            model: &*self.model,
        }
    }

    fn sweeper(&self) -> &ConcurrentSweeper {
        &self.sweeper
    }
}

/// A snapshot of one region, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionInfo {
    /// Region id.
    pub id: RegionId,
    /// Space the region belongs to.
    pub space: Option<SpaceType>,
    /// Region flags.
    pub flags: RegionFlags,
    /// Live bytes last measured by marking or sweeping.
    pub alive_bytes: usize,
    /// First address of the region.
    pub begin: usize,
    /// Bump pointer of the region.
    pub top: usize,
}

/// A garbage-collected heap.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use regent_gc::descriptor::{DescriptorModel, TypeDescriptor};
/// use regent_gc::{GcReason, Heap, HeapConfig, SpaceType, TriggerGcType};
///
/// static NODE: TypeDescriptor = TypeDescriptor::fixed("Node", 16, &[8]);
///
/// let heap = Heap::new(HeapConfig::default(), Arc::new(DescriptorModel)).unwrap();
/// let mut mutator = heap.attach();
/// let obj = mutator.allocate(SpaceType::Young, 16).unwrap();
/// NODE.write_header(obj);
/// let root = heap.root(Some(obj));
///
/// mutator.request_collection(TriggerGcType::Young, GcReason::HintGc);
/// let moved = root.get().unwrap();
/// assert_ne!(moved, obj);
/// ```
pub struct Heap {
    core: Arc<HeapCore>,
}

impl Heap {
    /// Creates a heap.
    ///
    /// # Errors
    ///
    /// Fails if the configuration is invalid or the address space cannot be
    /// reserved.
    pub fn new(config: HeapConfig, model: Arc<dyn ObjectModel>) -> Result<Self> {
        let core = HeapCore::new(config, model, None)?;
        gc_debug!(heap = core.id, "heap created");
        Ok(Self {
            core: Arc::new(core),
        })
    }

    /// Creates a heap whose objects may reference objects of `shared`.
    ///
    /// # Errors
    ///
    /// As [`new`](Self::new).
    pub fn with_shared(
        config: HeapConfig,
        model: Arc<dyn ObjectModel>,
        shared: &SharedHeap,
    ) -> Result<Self> {
        let core = Arc::new(HeapCore::new(config, model, Some(Arc::clone(shared.core())))?);
        shared.core().register(core.id, Arc::downgrade(&core));
        Ok(Self { core })
    }

    /// Registers the calling thread as a mutator.
    #[must_use]
    pub fn attach(&self) -> Mutator {
        self.core.safepoints.attach();
        Mutator {
            core: Arc::clone(&self.core),
            tlab: Tlab::new(),
            young_epoch: self.core.state.young_epoch(),
            _not_send: PhantomData,
        }
    }

    /// Creates a root handle holding `obj`.
    #[must_use]
    pub fn root(&self, obj: Option<Address>) -> Root {
        self.core.roots.create(obj)
    }

    /// Adds an external source of roots.
    pub fn add_root_provider(&self, provider: Arc<dyn RootProvider>) {
        self.core.roots.add_provider(provider);
    }

    /// Runs a collection from a thread that is not a running mutator.
    ///
    /// A thread with an attached mutator must use
    /// [`Mutator::request_collection`] instead, or the pause would wait for it.
    pub fn collect(&self, trigger: TriggerGcType, reason: GcReason) {
        if trigger.is_shared() {
            if let Some(shared) = &self.core.shared {
                shared.collect_sync(trigger, reason);
            }
            return;
        }
        HeapCore::collect(&self.core, trigger, reason, false);
    }

    /// True if the object at `addr` survived the last collection that
    /// traced it.
    ///
    /// Young objects are alive while they lie below the allocation top.
    /// Elsewhere the mark bit decides: long-lived spaces mark at allocation
    /// and sweeping keeps exactly the marked objects. While a marking cycle
    /// is in flight the bits are incomplete, so any in-use address answers
    /// true.
    #[must_use]
    pub fn is_alive(&self, addr: usize) -> bool {
        let Some(region) = self.core.table.object_region(addr) else {
            return false;
        };
        if !region.in_use() || region.flags().contains(RegionFlags::FROM_SPACE) {
            return false;
        }
        if region.in_young() {
            return SemiSpace::is_allocated(&self.core.table, addr);
        }
        if region.is_read_only() || self.core.state.is_marking() {
            return true;
        }
        region.is_marked(addr)
    }

    /// Cumulative statistics.
    #[must_use]
    pub fn stats(&self) -> &GcStats {
        &self.core.stats
    }

    /// Metrics of the most recent collection.
    #[must_use]
    pub fn last_gc_metrics(&self) -> Option<GcMetrics> {
        *self.core.last_metrics.lock()
    }

    /// The heap's configuration.
    #[must_use]
    pub fn config(&self) -> &HeapConfig {
        &self.core.config
    }

    /// Current concurrent-marking status.
    #[must_use]
    pub fn mark_status(&self) -> MarkStatus {
        self.core.state.mark_status()
    }

    /// Current pause-level phase.
    #[must_use]
    pub fn phase(&self) -> GcPhase {
        self.core.state.phase()
    }

    /// Checks the reachable graph and returns the number of violations.
    ///
    /// Call only while no mutator is running.
    #[must_use]
    pub fn verify(&self) -> usize {
        ConcurrentSweeper::ensure_all_task_finished(&*self.core);
        verify_heap(&self.core, false)
    }

    /// Bytes of regions currently in use.
    #[must_use]
    pub fn committed_bytes(&self) -> usize {
        self.core.table.committed_bytes()
    }

    /// Bytes counted against the old-space limit.
    #[must_use]
    pub fn old_space_size(&self) -> usize {
        self.core.old_space_size()
    }

    /// Waits until background sweeping is done.
    pub fn wait_for_sweeping(&self) {
        ConcurrentSweeper::ensure_all_task_finished(&*self.core);
    }

    #[doc(hidden)]
    #[must_use]
    pub fn region_info(&self, addr: usize) -> Option<RegionInfo> {
        let region = self.core.table.object_region(addr)?;
        Some(RegionInfo {
            id: region.id(),
            space: region.space_type(),
            flags: region.flags(),
            alive_bytes: region.alive_bytes(),
            begin: region.begin(),
            top: region.top(),
        })
    }

    #[doc(hidden)]
    #[must_use]
    pub fn old_to_new_contains(&self, slot: ObjectSlot) -> bool {
        self.rset_contains(RememberedSetKind::OldToNew, slot)
    }

    #[doc(hidden)]
    #[must_use]
    pub fn local_to_share_contains(&self, slot: ObjectSlot) -> bool {
        self.rset_contains(RememberedSetKind::LocalToShare, slot)
    }

    #[doc(hidden)]
    #[must_use]
    pub fn cross_region_contains(&self, slot: ObjectSlot) -> bool {
        self.rset_contains(RememberedSetKind::CrossRegion, slot)
    }

    fn rset_contains(&self, kind: RememberedSetKind, slot: ObjectSlot) -> bool {
        self.core
            .table
            .region_of(slot.address())
            .is_some_and(|r| r.rset_contains(kind, slot.address()))
    }

    #[doc(hidden)]
    #[must_use]
    pub fn is_marked(&self, obj: Address) -> bool {
        self.core
            .table
            .object_region(obj.raw())
            .is_some_and(|r| r.is_marked(obj.raw()))
    }

    #[doc(hidden)]
    #[must_use]
    pub fn is_forwarded(&self, obj: Address) -> bool {
        obj.mark_word().is_forwarded()
    }

    #[doc(hidden)]
    #[must_use]
    pub fn gray_objects(&self) -> Vec<Address> {
        self.core.work.gray_objects()
    }
}

impl Drop for Heap {
    fn drop(&mut self) {
        if let Some(shared) = &self.core.shared {
            shared.unregister(self.core.id);
        }
        ConcurrentMarker::abort(&self.core);
        ConcurrentSweeper::ensure_all_task_finished(&*self.core);
    }
}

impl fmt::Debug for Heap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Heap")
            .field("id", &self.core.id)
            .field("table", &self.core.table)
            .field("mark_status", &self.core.state.mark_status())
            .finish_non_exhaustive()
    }
}

/// A thread's handle on a [`Heap`].
///
/// Allocation and reference stores go through the mutator so the heap can
/// apply the write barrier and stop the thread at safepoints. A mutator is
/// bound to the thread that attached it.
pub struct Mutator {
    core: Arc<HeapCore>,
    tlab: Tlab,
    young_epoch: u64,
    _not_send: PhantomData<*const ()>,
}

impl Mutator {
    /// Allocates `size` zeroed bytes in `space`.
    ///
    /// The caller must write the header before the next allocation or
    /// safepoint. Objects at or above the huge threshold go to the huge space.
    ///
    /// # Errors
    ///
    /// [`HeapError::OutOfMemory`] once every collection has failed to make
    /// room, [`HeapError::ObjectTooLarge`] for read-only objects larger than a
    /// region, and [`HeapError::NoSharedHeap`] for shared spaces on a heap
    /// without one.
    pub fn allocate(&mut self, space: SpaceType, size: usize) -> Result<Address> {
        let size = align_object_size(size.max(WORD_SIZE));
        if space.is_shared() {
            return self.allocate_shared(space, size);
        }
        self.safepoint();
        if space == SpaceType::Young && size < self.core.config.huge_object_threshold {
            if let Some(addr) = self.fast_allocate_young(size) {
                return Ok(self.finish_allocation(addr, size, false));
            }
        }
        self.check_triggers();
        let space = if space != SpaceType::ReadOnly && size >= self.core.config.huge_object_threshold {
            SpaceType::Huge
        } else {
            space
        };
        let addr = match space {
            SpaceType::Young => self.allocate_young_slow(size)?,
            SpaceType::Old | SpaceType::NonMovable | SpaceType::MachineCode => {
                self.allocate_sweepable(space, size)?
            }
            SpaceType::Huge => self.allocate_huge(size)?,
            SpaceType::ReadOnly => self.allocate_read_only(size)?,
            SpaceType::SharedOld | SpaceType::SharedNonMovable | SpaceType::SharedHuge => {
                unreachable!("handled above")
            }
        };
        let old_generation = !matches!(space, SpaceType::Young | SpaceType::ReadOnly);
        Ok(self.finish_allocation(addr, size, old_generation))
    }

    /// Zeroes the object and marks it when marking is on or it is long-lived.
    fn finish_allocation(&self, addr: usize, size: usize, always_mark: bool) -> Address {
        // SAFETY: `[addr, addr + size)` was just handed out by a space.
        unsafe { std::ptr::write_bytes(addr as *mut u8, 0, size) };
        if always_mark || self.core.state.is_marking() {
            if let Some(region) = self.core.table.object_region(addr) {
                if region.mark(addr) {
                    region.add_alive_bytes(size);
                }
            }
        }
        // SAFETY: spaces hand out aligned, non-null addresses.
        unsafe { Address::from_raw(addr) }
            .unwrap_or_else(|| unreachable!("space returned a null or misaligned address"))
    }

    fn refresh_tlab(&mut self) {
        let epoch = self.core.state.young_epoch();
        if epoch != self.young_epoch {
            self.tlab = Tlab::new();
            self.young_epoch = epoch;
        }
    }

    fn fast_allocate_young(&mut self, size: usize) -> Option<usize> {
        self.refresh_tlab();
        self.tlab.allocate(size)
    }

    fn try_allocate_young(&mut self, size: usize) -> Option<usize> {
        self.refresh_tlab();
        if let Some(addr) = self.tlab.allocate(size) {
            return Some(addr);
        }
        let tlab_size = self.core.config.tlab_size;
        if size > tlab_size / 2 {
            return self.core.young.allocate(&self.core.table, size).map(|(a, _)| a);
        }
        let (start, region) = self.core.young.allocate(&self.core.table, tlab_size)?;
        self.tlab.reset(start, start + tlab_size, region);
        self.tlab.allocate(size)
    }

    fn allocate_young_slow(&mut self, size: usize) -> Result<usize> {
        if let Some(addr) = self.try_allocate_young(size) {
            return Ok(addr);
        }
        for trigger in [TriggerGcType::Young, TriggerGcType::Old, TriggerGcType::Full] {
            self.request_collection(trigger, GcReason::AllocationFailed);
            if let Some(addr) = self.try_allocate_young(size) {
                return Ok(addr);
            }
        }
        Err(self.out_of_memory(SpaceType::Young, size))
    }

    fn try_allocate_sweepable(&self, space: SpaceType, size: usize) -> Option<usize> {
        let core = &*self.core;
        let target = core.sweepable(space)?;
        target
            .allocate_from_free_list(size)
            .or_else(|| {
                if core.sweeper.is_sweeping() {
                    ConcurrentSweeper::ensure_task_finished(core, space);
                    target.allocate_from_free_list(size)
                } else {
                    None
                }
            })
            .or_else(|| target.expand_and_allocate(&core.table, size))
    }

    fn allocate_sweepable(&mut self, space: SpaceType, size: usize) -> Result<usize> {
        if let Some(addr) = self.try_allocate_sweepable(space, size) {
            return Ok(addr);
        }
        for trigger in [TriggerGcType::Old, TriggerGcType::Full] {
            self.request_collection(trigger, GcReason::AllocationFailed);
            if let Some(addr) = self.try_allocate_sweepable(space, size) {
                return Ok(addr);
            }
        }
        Err(self.out_of_memory(space, size))
    }

    fn allocate_huge(&mut self, size: usize) -> Result<usize> {
        if let Some(addr) = self.core.huge.allocate(&self.core.table, size) {
            return Ok(addr);
        }
        for trigger in [TriggerGcType::Old, TriggerGcType::Full] {
            self.request_collection(trigger, GcReason::AllocationFailed);
            if let Some(addr) = self.core.huge.allocate(&self.core.table, size) {
                return Ok(addr);
            }
        }
        Err(self.out_of_memory(SpaceType::Huge, size))
    }

    fn allocate_read_only(&self, size: usize) -> Result<usize> {
        if size > region::REGION_SIZE {
            return Err(HeapError::ObjectTooLarge {
                space: SpaceType::ReadOnly,
                size,
            });
        }
        self.core
            .read_only
            .allocate(&self.core.table, size)
            .ok_or(HeapError::OutOfMemory {
                space: SpaceType::ReadOnly,
                size,
            })
    }

    fn out_of_memory(&self, space: SpaceType, size: usize) -> HeapError {
        self.core.state.set_oom_pending(true);
        gc_warn!(?space, size, "allocation failed after full collection");
        HeapError::OutOfMemory { space, size }
    }

    fn allocate_shared(&mut self, space: SpaceType, size: usize) -> Result<Address> {
        let shared = Arc::clone(self.core.shared.as_ref().ok_or(HeapError::NoSharedHeap)?);
        self.safepoint();
        if let Some(obj) = shared.try_allocate(space, size) {
            shared.check_trigger();
            return Ok(obj);
        }
        for trigger in [TriggerGcType::Shared, TriggerGcType::SharedFull] {
            self.blocking(|| shared.collect_sync(trigger, GcReason::AllocationFailed));
            if let Some(obj) = shared.try_allocate(space, size) {
                return Ok(obj);
            }
        }
        gc_warn!(?space, size, "shared allocation failed");
        Err(HeapError::OutOfMemory { space, size })
    }

    /// Starts or finishes old-generation work once the limit is crossed.
    fn check_triggers(&mut self) {
        let state = &self.core.state;
        let old_size = self.core.old_space_size();
        let limit = state.old_space_limit();
        match state.mark_status() {
            MarkStatus::MarkFinished => {
                self.request_collection(TriggerGcType::Old, GcReason::AllocationLimit);
            }
            MarkStatus::Marking => {
                let overshoot = state.overshoot();
                if old_size > limit + overshoot {
                    if overshoot < self.core.config.old_space_max_overshoot {
                        state.set_overshoot(overshoot + self.core.config.old_space_step_overshoot);
                    } else {
                        self.request_collection(TriggerGcType::Old, GcReason::AllocationLimit);
                    }
                }
            }
            MarkStatus::ReadyToMark => {
                if old_size > limit {
                    self.request_collection(TriggerGcType::Old, GcReason::AllocationLimit);
                }
            }
        }
    }

    /// Runs a collection on this thread.
    ///
    /// Shared triggers are forwarded to the shared heap; this mutator counts
    /// as parked while it waits.
    pub fn request_collection(&mut self, trigger: TriggerGcType, reason: GcReason) {
        if trigger.is_shared() {
            if let Some(shared) = self.core.shared.clone() {
                self.blocking(|| shared.collect_sync(trigger, reason));
            }
            return;
        }
        HeapCore::collect(&self.core, trigger, reason, true);
        self.refresh_tlab();
    }

    /// Parks here if a pause is pending.
    #[inline]
    pub fn safepoint(&mut self) {
        if self.core.safepoints.poll() {
            self.refresh_tlab();
        }
    }

    /// Runs `f` as a parked mutator, so pauses need not wait for it.
    ///
    /// `f` must not touch the heap.
    pub fn blocking<R>(&mut self, f: impl FnOnce() -> R) -> R {
        struct Rejoin<'a>(&'a Safepoints);

        impl Drop for Rejoin<'_> {
            fn drop(&mut self) {
                self.0.leave_native();
            }
        }

        self.core.safepoints.enter_native();
        let result = {
            let _rejoin = Rejoin(&self.core.safepoints);
            f()
        };
        self.refresh_tlab();
        result
    }

    /// Tells the heap the program is idle; may run a collection.
    pub fn notify_idle(&mut self) {
        match self.core.state.mark_status() {
            MarkStatus::MarkFinished => {
                self.request_collection(TriggerGcType::Old, GcReason::Idle);
            }
            MarkStatus::Marking => {}
            MarkStatus::ReadyToMark => {
                let young = self.core.young.heap_object_size(&self.core.table);
                if young >= self.core.config.semi_space_capacity / 2 {
                    self.request_collection(TriggerGcType::Young, GcReason::Idle);
                }
            }
        }
    }

    /// Writes `class` into the header of a freshly allocated object.
    pub fn initialize_header(&self, obj: Address, class: ClassWord) {
        obj.header()
            .store(MarkWord::from_class(class).0, Ordering::Release);
    }

    /// Loads the reference at `offset` of `obj`.
    ///
    /// # Safety
    ///
    /// `offset` must be a reference slot of the live object `obj`.
    #[must_use]
    pub unsafe fn read_field(&self, obj: Address, offset: usize) -> Option<Address> {
        // SAFETY: guaranteed by the caller.
        unsafe { obj.field(offset) }.referent()
    }

    /// Stores a strong reference at `offset` of `obj`.
    ///
    /// # Safety
    ///
    /// As [`read_field`](Self::read_field); `value` must be a live object.
    pub unsafe fn write_field(&self, obj: Address, offset: usize, value: Option<Address>) {
        // SAFETY: guaranteed by the caller.
        let slot = unsafe { obj.field(offset) };
        let raw = value.map_or(0, Address::raw);
        slot.store_raw(raw);
        write_barrier(&self.core, slot, raw);
    }

    /// Stores a weak reference at `offset` of `obj`.
    ///
    /// # Safety
    ///
    /// As [`write_field`](Self::write_field).
    pub unsafe fn write_weak_field(&self, obj: Address, offset: usize, value: Option<Address>) {
        // SAFETY: guaranteed by the caller.
        let slot = unsafe { obj.field(offset) };
        let raw = value.map_or(0, |v| v.raw() | WEAK_TAG);
        slot.store_raw(raw);
        write_barrier(&self.core, slot, raw);
    }

    /// Copies `count` reference slots between objects (or within one).
    ///
    /// # Safety
    ///
    /// Both ranges must be `count` reference slots of live objects.
    pub unsafe fn copy_references(
        &self,
        dst: Address,
        dst_offset: usize,
        src: Address,
        src_offset: usize,
        count: usize,
    ) {
        // SAFETY: guaranteed by the caller.
        let (dst, src) = unsafe { (dst.field(dst_offset), src.field(src_offset)) };
        copy_references(&self.core, dst, src, count);
    }

    /// Id of the region holding `obj`, for diagnostics.
    #[doc(hidden)]
    #[must_use]
    pub fn region_of(&self, obj: Address) -> Option<RegionId> {
        self.core.table.object_region(obj.raw()).map(|r| r.id())
    }
}

impl Drop for Mutator {
    fn drop(&mut self) {
        self.core.safepoints.detach();
    }
}

impl fmt::Debug for Mutator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mutator")
            .field("heap", &self.core.id)
            .field("tlab", &self.tlab)
            .finish_non_exhaustive()
    }
}
