//! The shared heap.
//!
//! Objects every attached runtime can reach. A shared heap has no young
//! generation: objects are allocated black into mark-swept spaces and are
//! only moved by a shared full collection. Collections run on a dedicated
//! daemon thread and stop the attached runtimes through a handshake, one
//! runtime at a time in registration order.
//!
//! Shared objects never reference local objects. Local slots that hold a
//! shared reference carry a local→shared remembered-set bit, which is how
//! the shared collector finds its roots inside the runtimes.

mod collector;
mod daemon;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use crossbeam::channel;
use parking_lot::Mutex;

use crate::config::SharedHeapConfig;
use crate::error::Result;
use crate::gc::state::{GcReason, GcState, MarkStatus, TriggerGcType};
use crate::gc::sweeper::{ConcurrentSweeper, SweepHost};
use crate::gc::worklist::WorkManager;
use crate::gc::GcContext;
use crate::heap::region::{RegionFlags, RegionTable};
use crate::heap::remembered_set::DefaultRememberedSetPolicy;
use crate::heap::space::{HugeObjectSpace, Space, SpaceType, SweepContext, SweepableSpace};
use crate::heap::HeapCore;
use crate::metrics::{GcMetrics, GcStats};
use crate::object::{object_size, Address, ObjectModel};
use crate::task::TaskGroup;
use crate::tracing::gc_debug;
use daemon::{Daemon, Job};

pub(crate) struct SharedHeapCore {
    pub(crate) config: SharedHeapConfig,
    pub(crate) model: Arc<dyn ObjectModel>,
    pub(crate) table: RegionTable,
    pub(crate) old: SweepableSpace,
    pub(crate) non_movable: SweepableSpace,
    pub(crate) huge: HugeObjectSpace,
    pub(crate) state: GcState,
    pub(crate) work: WorkManager,
    pub(crate) sweeper: ConcurrentSweeper,
    pub(crate) stats: GcStats,
    pub(crate) last_metrics: Mutex<Option<GcMetrics>>,
    /// Attached runtimes, in registration order.
    runtimes: Mutex<Vec<(u64, Weak<HeapCore>)>>,
    /// Serializes shared collections.
    collect_lock: Mutex<()>,
    mark_tasks: TaskGroup,
    daemon: OnceLock<Daemon>,
    /// A threshold-triggered collection is queued.
    pending: AtomicBool,
}

impl SharedHeapCore {
    fn new(config: SharedHeapConfig, model: Arc<dyn ObjectModel>) -> Result<Self> {
        config.validate()?;
        let table = RegionTable::new(config.region_capacity(), Arc::new(DefaultRememberedSetPolicy))?;
        let workers = config
            .parallel_gc_threads
            .max(config.concurrent_mark_tasks + 1);
        Ok(Self {
            old: SweepableSpace::new(SpaceType::SharedOld),
            non_movable: SweepableSpace::new(SpaceType::SharedNonMovable),
            huge: HugeObjectSpace::new(SpaceType::SharedHuge),
            state: GcState::new(config.shared_old_limit),
            work: WorkManager::new(workers),
            sweeper: ConcurrentSweeper::new(config.enable_concurrent_sweep),
            stats: GcStats::new(),
            last_metrics: Mutex::new(None),
            runtimes: Mutex::new(Vec::new()),
            collect_lock: Mutex::new(()),
            mark_tasks: TaskGroup::new(),
            daemon: OnceLock::new(),
            pending: AtomicBool::new(false),
            table,
            model,
            config,
        })
    }

    /// Marking and compaction view of the shared heap.
    pub(crate) fn context(&self, target_flags: RegionFlags) -> GcContext<'_> {
        GcContext {
            table: &self.table,
            model: &*self.model,
            work: &self.work,
            young: None,
            old: &self.old,
            tlab_size: 0,
            target_flags,
            shared_table: None,
        }
    }

    pub(crate) fn register(&self, id: u64, runtime: Weak<HeapCore>) {
        self.runtimes.lock().push((id, runtime));
        gc_debug!(runtime = id, "runtime attached to shared heap");
    }

    pub(crate) fn unregister(&self, id: u64) {
        self.runtimes.lock().retain(|(rid, _)| *rid != id);
        gc_debug!(runtime = id, "runtime detached from shared heap");
    }

    /// Live attached runtimes, in registration order.
    pub(crate) fn runtimes(&self) -> Vec<Arc<HeapCore>> {
        let mut runtimes = self.runtimes.lock();
        runtimes.retain(|(_, rt)| rt.strong_count() > 0);
        runtimes.iter().filter_map(|(_, rt)| rt.upgrade()).collect()
    }

    /// Shades `target` when a mutator stores it while shared marking runs.
    #[inline]
    pub(crate) fn barrier_mark(&self, target: Address) {
        if !self.state.is_marking() {
            return;
        }
        if let Some(region) = self.table.object_region(target.raw()) {
            if region.mark(target.raw()) {
                region.add_alive_bytes(object_size(&*self.model, target));
                self.work.push_barrier(target);
            }
        }
    }

    /// Committed bytes counted against the shared trigger.
    pub(crate) fn old_space_size(&self) -> usize {
        self.old.committed_bytes() + self.non_movable.committed_bytes() + self.huge.committed_bytes()
    }

    /// Allocates a black object of `size` aligned bytes. `None` means full.
    pub(crate) fn try_allocate(&self, space: SpaceType, size: usize) -> Option<Address> {
        let space = if size >= self.config.huge_object_threshold {
            SpaceType::SharedHuge
        } else {
            space
        };
        let addr = match space {
            SpaceType::SharedHuge => self.huge.allocate(&self.table, size)?,
            SpaceType::SharedNonMovable => self.allocate_sweepable(&self.non_movable, space, size)?,
            _ => self.allocate_sweepable(&self.old, SpaceType::SharedOld, size)?,
        };
        // SAFETY: `[addr, addr + size)` was just handed out by a space.
        unsafe { std::ptr::write_bytes(addr as *mut u8, 0, size) };
        if let Some(region) = self.table.object_region(addr) {
            if region.mark(addr) {
                region.add_alive_bytes(size);
            }
        }
        // SAFETY: spaces hand out aligned, non-null addresses.
        unsafe { Address::from_raw(addr) }
    }

    fn allocate_sweepable(&self, target: &SweepableSpace, kind: SpaceType, size: usize) -> Option<usize> {
        target
            .allocate_from_free_list(size)
            .or_else(|| {
                if self.sweeper.is_sweeping() {
                    ConcurrentSweeper::ensure_task_finished(self, kind);
                    target.allocate_from_free_list(size)
                } else {
                    None
                }
            })
            .or_else(|| target.expand_and_allocate(&self.table, size))
    }

    /// Queues a threshold collection on the daemon once the limit is crossed.
    pub(crate) fn check_trigger(&self) {
        if self.old_space_size() <= self.state.old_space_limit() {
            return;
        }
        if self.pending.swap(true, Ordering::AcqRel) {
            return;
        }
        let job = Job {
            trigger: TriggerGcType::SharedPartial,
            reason: GcReason::AllocationLimit,
            done: None,
        };
        let posted = self.daemon.get().map(|daemon| daemon.post(job));
        if !matches!(posted, Some(Ok(()))) {
            self.pending.store(false, Ordering::Release);
        }
    }

    /// Runs a collection on the daemon and waits for it.
    ///
    /// The caller must not be a running mutator of an attached runtime.
    pub(crate) fn collect_sync(self: &Arc<Self>, trigger: TriggerGcType, reason: GcReason) {
        let Some(daemon) = self.daemon.get() else {
            self.collect_now(trigger, reason);
            return;
        };
        if daemon.is_current() {
            self.collect_now(trigger, reason);
            return;
        }
        let (done, finished) = channel::bounded(1);
        let job = Job {
            trigger,
            reason,
            done: Some(done),
        };
        match daemon.post(job) {
            Ok(()) => {
                let _ = finished.recv();
            }
            Err(job) => self.collect_now(job.trigger, job.reason),
        }
    }
}

impl SweepHost for SharedHeapCore {
    fn sweep_space(&self, space: SpaceType) -> Option<&dyn Space> {
        match space {
            SpaceType::SharedOld => Some(&self.old),
            SpaceType::SharedNonMovable => Some(&self.non_movable),
            SpaceType::SharedHuge => Some(&self.huge),
            _ => None,
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

/// A heap shared by several [`Heap`](crate::Heap)s.
///
/// Attach runtimes with [`Heap::with_shared`](crate::Heap::with_shared).
/// Mutators allocate shared objects through
/// [`Mutator::allocate`](crate::Mutator::allocate) with a shared
/// [`SpaceType`].
pub struct SharedHeap {
    core: Arc<SharedHeapCore>,
}

impl SharedHeap {
    /// Creates a shared heap and starts its collector thread.
    ///
    /// # Errors
    ///
    /// Fails if the configuration is invalid, the address space cannot be
    /// reserved or the collector thread cannot be spawned.
    pub fn new(config: SharedHeapConfig, model: Arc<dyn ObjectModel>) -> Result<Self> {
        let core = Arc::new(SharedHeapCore::new(config, model)?);
        let daemon = Daemon::spawn(Arc::downgrade(&core))?;
        if core.daemon.set(daemon).is_err() {
            unreachable!("daemon installed twice");
        }
        Ok(Self { core })
    }

    pub(crate) fn core(&self) -> &Arc<SharedHeapCore> {
        &self.core
    }

    /// Runs a shared collection and waits for it.
    ///
    /// Must not be called from a thread with a running mutator of an
    /// attached runtime; use [`Mutator::request_collection`](crate::Mutator::request_collection)
    /// there.
    pub fn collect(&self, trigger: TriggerGcType, reason: GcReason) {
        debug_assert!(trigger.is_shared(), "{trigger:?} is not a shared collection");
        self.core.collect_sync(trigger, reason);
    }

    /// True if `addr` lies in a region of this heap.
    #[must_use]
    pub fn contains(&self, addr: usize) -> bool {
        self.core.table.contains(addr)
    }

    /// Cumulative statistics.
    #[must_use]
    pub fn stats(&self) -> &GcStats {
        &self.core.stats
    }

    /// Metrics of the most recent shared collection.
    #[must_use]
    pub fn last_gc_metrics(&self) -> Option<GcMetrics> {
        *self.core.last_metrics.lock()
    }

    /// Current shared marking status.
    #[must_use]
    pub fn mark_status(&self) -> MarkStatus {
        self.core.state.mark_status()
    }

    /// Bytes counted against the shared trigger.
    #[must_use]
    pub fn old_space_size(&self) -> usize {
        self.core.old_space_size()
    }

    /// Current shared trigger.
    #[must_use]
    pub fn old_space_limit(&self) -> usize {
        self.core.state.old_space_limit()
    }

    /// Waits until background shared sweeping is done.
    pub fn wait_for_sweeping(&self) {
        ConcurrentSweeper::ensure_all_task_finished(&*self.core);
    }

    #[doc(hidden)]
    #[must_use]
    pub fn is_marked(&self, obj: Address) -> bool {
        self.core
            .table
            .object_region(obj.raw())
            .is_some_and(|r| r.is_marked(obj.raw()))
    }
}

impl fmt::Debug for SharedHeap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedHeap")
            .field("table", &self.core.table)
            .field("mark_status", &self.core.state.mark_status())
            .finish_non_exhaustive()
    }
}

