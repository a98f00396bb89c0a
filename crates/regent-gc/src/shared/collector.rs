//! Shared-heap collections, run on the daemon thread.
//!
//! A concurrent collection takes two handshakes. The first shades the
//! shared objects referenced from every runtime; background tasks then trace
//! the shared graph while mutators run; the second rescans, resolves weak
//! slots and starts sweeping. A full collection does everything inside one
//! handshake and compacts the shared old space.

use std::sync::Arc;
use std::time::Instant;

use super::SharedHeapCore;
use crate::gc::evacuate::retire_buffers;
use crate::gc::marker::{
    process_concurrently, process_mark_stack, CompressMarker, MarkStrategy, SharedMarker,
};
use crate::gc::state::{GcPhase, GcReason, MarkStatus, TriggerGcType};
use crate::gc::sweeper::ConcurrentSweeper;
use crate::gc::weak::{process_weak_copied, process_weak_marked};
use crate::gc::worklist::WorkerHolder;
use crate::gc::GcContext;
use crate::heap::region::RegionFlags;
use crate::heap::remembered_set::RememberedSetKind;
use crate::heap::safepoint::StwGuard;
use crate::heap::space::SpaceType;
use crate::heap::HeapCore;
use crate::metrics::{GcMetrics, PhaseTimer};
use crate::object::ObjectSlot;
use crate::task::{run_parallel, Taskpool};
use crate::tracing::internal::{next_gc_id, trace_gc_collection, trace_phase, TracePhase};
use crate::tracing::{gc_debug, gc_info, gc_warn};

const SHARED_SPACES: [SpaceType; 3] = [
    SpaceType::SharedOld,
    SpaceType::SharedNonMovable,
    SpaceType::SharedHuge,
];

/// Every attached runtime stopped, in registration order.
struct Handshake {
    _guards: Vec<StwGuard>,
    runtimes: Vec<Arc<HeapCore>>,
}

impl Handshake {
    fn begin(core: &SharedHeapCore) -> Self {
        let _span = trace_phase(TracePhase::Handshake);
        let runtimes = core.runtimes();
        let guards = runtimes
            .iter()
            .map(|rt| rt.safepoints.begin_stw(false))
            .collect();
        // Local sweeping rewrites the remembered sets scanned below.
        for rt in &runtimes {
            ConcurrentSweeper::ensure_all_task_finished(&**rt);
        }
        gc_debug!(runtimes = runtimes.len(), "shared handshake");
        Self {
            _guards: guards,
            runtimes,
        }
    }
}

/// Calls `f` on every root slot and local→shared slot of `runtimes`.
fn for_each_local_slot(runtimes: &[Arc<HeapCore>], f: &mut dyn FnMut(ObjectSlot)) {
    for rt in runtimes {
        rt.roots.for_each(&mut *f);
        rt.table.for_each_in_use(|region| {
            region.for_each_rset_slot(RememberedSetKind::LocalToShare, |addr| {
                // SAFETY: remembered slots lie inside objects of their region.
                f(unsafe { ObjectSlot::from_raw(addr) });
            });
        });
    }
}

fn mark_local_slots<S: MarkStrategy>(
    strategy: &S,
    cx: &GcContext<'_>,
    holder: &mut WorkerHolder,
    runtimes: &[Arc<HeapCore>],
) {
    for_each_local_slot(runtimes, &mut |slot| strategy.visit_slot(cx, holder, slot));
}

fn drain<S>(core: &Arc<SharedHeapCore>, strategy: S, target_flags: RegionFlags)
where
    S: MarkStrategy + Send + 'static,
{
    let workers = core.config.parallel_gc_threads.min(core.work.workers());
    run_parallel(core, workers, move |core: &SharedHeapCore, id| {
        let cx = core.context(target_flags);
        let mut holder = core.work.holder(id);
        process_mark_stack(&strategy, &cx, &mut holder);
    });
}

impl SharedHeapCore {
    /// Runs `trigger` on the calling thread. Serialized with other shared
    /// collections.
    pub(crate) fn collect_now(self: &Arc<Self>, trigger: TriggerGcType, reason: GcReason) {
        let _lock = self.collect_lock.lock();
        let gc_id = next_gc_id();
        let _span = trace_gc_collection(trigger, reason, gc_id);
        let start = Instant::now();
        ConcurrentSweeper::ensure_all_task_finished(&**self);

        let mut metrics = GcMetrics::new();
        metrics.gc_type = trigger;
        metrics.reason = reason;
        metrics.heap_bytes_before = self.table.committed_bytes();
        let mut timer = PhaseTimer::new();
        match trigger {
            TriggerGcType::SharedFull => self.full_collect(&mut metrics, &mut timer),
            _ => self.mark_sweep(&mut metrics, &mut timer),
        }
        self.pending.store(false, std::sync::atomic::Ordering::Release);

        metrics.heap_bytes_after = self.table.committed_bytes();
        metrics.mark_duration = timer.mark;
        metrics.evacuate_duration = timer.evacuate;
        metrics.sweep_duration = timer.sweep;
        metrics.duration = start.elapsed();
        metrics.total_collections = self.stats.record(&metrics);
        gc_info!(
            gc_type = ?metrics.gc_type,
            reason = ?metrics.reason,
            duration_us = metrics.duration.as_micros(),
            before = metrics.heap_bytes_before,
            after = metrics.heap_bytes_after,
            "shared collection finished"
        );
        *self.last_metrics.lock() = Some(metrics);
    }

    fn mark_sweep(self: &Arc<Self>, metrics: &mut GcMetrics, timer: &mut PhaseTimer) {
        timer.start();
        {
            let handshake = Handshake::begin(self);
            self.verify_if_configured(&handshake.runtimes, "before");
            self.initial_mark(&handshake.runtimes);
        }
        if self.config.enable_concurrent_mark {
            self.concurrent_mark();
        }
        let handshake = Handshake::begin(self);
        self.remark(&handshake.runtimes);
        timer.end_mark();

        timer.start();
        self.state.transition_to(GcPhase::Sweeping);
        ConcurrentSweeper::start(self, &SHARED_SPACES);
        self.state.transition_to(GcPhase::Idle);
        timer.end_sweep();
        self.recompute_limit();
        if self.config.verify_heap {
            ConcurrentSweeper::ensure_all_task_finished(&**self);
            self.verify_if_configured(&handshake.runtimes, "after");
        }
    }

    fn initial_mark(&self, runtimes: &[Arc<HeapCore>]) {
        let _span = trace_phase(TracePhase::InitialMark);
        self.state.transition_to(GcPhase::Marking);
        self.work.reset();
        self.table.for_each_in_use(|region| {
            region.clear_marks();
            region.set_alive_bytes(0);
        });
        self.state.set_mark_status(MarkStatus::Marking);
        self.stats.record_concurrent_mark();
        let cx = self.context(RegionFlags::FREE);
        let mut holder = self.work.holder(0);
        mark_local_slots(&SharedMarker, &cx, &mut holder, runtimes);
        // Weak slots found here live in local objects, which local GCs may
        // move before remark. Remark visits the local slots again.
        holder.weak_slots.clear();
        self.work.flush(&mut holder);
    }

    /// Traces the shared graph on the task pool and waits for it.
    fn concurrent_mark(self: &Arc<Self>) {
        let tasks = self.config.concurrent_mark_tasks;
        if tasks == 0 {
            return;
        }
        self.mark_tasks.add(tasks);
        for _ in 0..tasks {
            let core = Arc::clone(self);
            Taskpool::global().post(move || {
                let _span = trace_phase(TracePhase::ConcurrentMark);
                if let Some(id) = core.work.acquire_worker_id() {
                    {
                        let cx = core.context(RegionFlags::FREE);
                        let mut holder = core.work.holder(id);
                        process_concurrently(&SharedMarker, &cx, &mut holder);
                        core.work.flush(&mut holder);
                    }
                    core.work.release_worker_id(id);
                }
                if core.mark_tasks.finish() {
                    core.state.finish_marking();
                }
            });
        }
        self.mark_tasks.wait();
    }

    #[cfg_attr(not(feature = "tracing"), allow(unused_variables))]
    fn remark(self: &Arc<Self>, runtimes: &[Arc<HeapCore>]) {
        let _span = trace_phase(TracePhase::Remark);
        {
            let cx = self.context(RegionFlags::FREE);
            let mut holder = self.work.holder(0);
            mark_local_slots(&SharedMarker, &cx, &mut holder, runtimes);
            self.work.drain_barrier_queue(&mut holder);
            self.work.flush(&mut holder);
        }
        drain(self, SharedMarker, RegionFlags::FREE);

        let cx = self.context(RegionFlags::FREE);
        let slots = self.work.take_weak_slots();
        let cleared = process_weak_marked(&cx, &slots);
        gc_debug!(weak = slots.len(), cleared, "shared remark done");

        // Drop local→shared bits whose slot no longer holds a live shared reference.
        for rt in runtimes {
            rt.table.for_each_in_use(|region| {
                region.retain_rset(RememberedSetKind::LocalToShare, |addr| {
                    // SAFETY: remembered slots lie inside objects of their region.
                    let slot = unsafe { ObjectSlot::from_raw(addr) };
                    slot.referent().is_some_and(|target| {
                        self.table
                            .object_region(target.raw())
                            .is_some_and(|r| r.is_marked(target.raw()))
                    })
                });
            });
        }
        self.work.reset();
        self.state.set_mark_status(MarkStatus::ReadyToMark);
    }

    fn full_collect(self: &Arc<Self>, metrics: &mut GcMetrics, timer: &mut PhaseTimer) {
        let handshake = Handshake::begin(self);
        let runtimes = &handshake.runtimes;
        self.verify_if_configured(runtimes, "before");

        timer.start();
        self.state.transition_to(GcPhase::Evacuating);
        self.work.reset();
        self.table.for_each_in_use(|region| {
            region.clear_marks();
            region.set_alive_bytes(0);
        });
        let mut compacted = 0;
        for id in self.old.regions() {
            self.table.region(id).add_flags(RegionFlags::FROM_SPACE);
            compacted += 1;
        }
        metrics.cset_regions = compacted;
        {
            let _span = trace_phase(TracePhase::Mark);
            let cx = self.context(RegionFlags::FREE);
            let mut holder = self.work.holder(0);
            mark_local_slots(&CompressMarker, &cx, &mut holder, runtimes);
            self.work.flush(&mut holder);
        }
        drain(self, CompressMarker, RegionFlags::FREE);
        {
            let _span = trace_phase(TracePhase::ProcessWeak);
            let cx = self.context(RegionFlags::FREE);
            let slots = self.work.take_weak_slots();
            process_weak_copied(&cx, &slots, true);
            retire_buffers(&cx);
        }
        timer.end_evacuate();

        let stats = self.work.take_stats();
        metrics.bytes_copied = stats.bytes_copied;
        metrics.objects_copied = stats.objects_copied;

        timer.start();
        self.state.transition_to(GcPhase::Sweeping);
        let mut freed = 0;
        for id in self
            .old
            .remove_regions(&self.table, |region| region.flags().contains(RegionFlags::FROM_SPACE))
        {
            self.table.release(id);
            freed += 1;
        }
        metrics.regions_freed = freed;
        ConcurrentSweeper::start(self, &SHARED_SPACES);
        timer.end_sweep();

        self.work.reset();
        self.recompute_limit();
        self.state.transition_to(GcPhase::Idle);
        if self.config.verify_heap {
            ConcurrentSweeper::ensure_all_task_finished(&**self);
            self.verify_if_configured(runtimes, "after");
        }
    }

    /// The next trigger is twice the live shared data, never below the
    /// configured floor.
    fn recompute_limit(&self) {
        let mut live = 0;
        self.table.for_each_in_use(|region| {
            if !region.is_huge_tail() {
                live += region.alive_bytes();
            }
        });
        let limit = live.saturating_mul(2).max(self.config.shared_old_limit);
        self.state.set_old_space_limit(limit);
        gc_debug!(live, limit, "shared limit recomputed");
    }

    #[cfg_attr(not(feature = "tracing"), allow(unused_variables))]
    fn verify_if_configured(&self, runtimes: &[Arc<HeapCore>], when: &str) {
        if !self.config.verify_heap {
            return;
        }
        let failures = self.verify(runtimes);
        if failures > 0 {
            gc_warn!(failures, when, "shared heap verification failed");
        }
    }

    /// Walks the shared graph reachable from the runtimes and counts
    /// objects that are forwarded, headerless or in free regions.
    pub(crate) fn verify(&self, runtimes: &[Arc<HeapCore>]) -> usize {
        let mut failures = 0;
        let mut seen = std::collections::HashSet::new();
        let mut stack = Vec::new();
        let mut push = |slot: ObjectSlot, stack: &mut Vec<_>| {
            if slot.is_weak() {
                return;
            }
            if let Some(target) = slot.referent() {
                if self.table.contains(target.raw()) && seen.insert(target) {
                    stack.push(target);
                }
            }
        };
        for_each_local_slot(runtimes, &mut |slot| push(slot, &mut stack));
        while let Some(obj) = stack.pop() {
            let in_use = self
                .table
                .object_region(obj.raw())
                .is_some_and(|r| r.in_use());
            let word = obj.mark_word();
            let Some(class) = word.class().filter(|_| in_use && !word.is_forwarded()) else {
                gc_warn!(?obj, "broken shared object");
                failures += 1;
                continue;
            };
            let mut slots = Vec::new();
            self.model
                .for_each_reference_slot(obj, class, &mut |slot| slots.push(slot));
            for slot in slots {
                if slot.referent().is_some_and(|t| !self.table.contains(t.raw())) {
                    gc_warn!(?obj, ?slot, "shared object references a local object");
                    failures += 1;
                    continue;
                }
                push(slot, &mut stack);
            }
        }
        failures
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Barrier};
    use std::time::{Duration, Instant};

    use parking_lot::{Condvar, Mutex};

    use crate::config::{HeapConfig, SharedHeapConfig};
    use crate::descriptor::{DescriptorModel, TypeDescriptor, ARRAY_DATA_OFFSET};
    use crate::gc::state::{GcReason, MarkStatus, TriggerGcType};
    use crate::heap::region::REGION_SIZE;
    use crate::heap::{Heap, SpaceType};
    use crate::object::WORD_SIZE;
    use crate::shared::SharedHeap;
    use crate::task::Taskpool;

    static NODE: TypeDescriptor = TypeDescriptor::fixed("Node", 24, &[8, 16]);
    static BYTES: TypeDescriptor = TypeDescriptor::byte_array("Bytes");

    /// Occupies every pool thread until dropped, so a shared cycle stalls
    /// between its handshakes.
    struct PoolStall {
        gate: Arc<(Mutex<bool>, Condvar)>,
    }

    impl PoolStall {
        fn new() -> Self {
            let threads = Taskpool::global().threads();
            let gate = Arc::new((Mutex::new(false), Condvar::new()));
            let started = Arc::new(Barrier::new(threads + 1));
            for _ in 0..threads {
                let gate = Arc::clone(&gate);
                let started = Arc::clone(&started);
                Taskpool::global().post(move || {
                    started.wait();
                    let (open, cv) = &*gate;
                    let mut open = open.lock();
                    while !*open {
                        cv.wait(&mut open);
                    }
                });
            }
            started.wait();
            Self { gate }
        }
    }

    impl Drop for PoolStall {
        fn drop(&mut self) {
            let (open, cv) = &*self.gate;
            *open.lock() = true;
            cv.notify_all();
        }
    }

    #[test]
    fn test_local_gc_between_handshakes_keeps_weak_slots_current() {
        let mut shared_config = SharedHeapConfig::default()
            .with_max_heap_size(16 * 1024 * 1024)
            .with_concurrent_mark(true);
        shared_config.parallel_gc_threads = 1;
        shared_config.concurrent_mark_tasks = 1;
        let shared = SharedHeap::new(shared_config, Arc::new(DescriptorModel)).unwrap();
        // Local pauses must not need the stalled pool.
        let config = HeapConfig::default()
            .with_max_heap_size(16 * 1024 * 1024)
            .with_parallel_gc_threads(1)
            .with_concurrent_mark(false)
            .with_concurrent_sweep(false);
        let heap = Heap::with_shared(config, Arc::new(DescriptorModel), &shared).unwrap();
        let mut m = heap.attach();

        let dead = m.allocate(SpaceType::SharedOld, 24).unwrap();
        NODE.write_header(dead);
        // Keeps the holder off the region start, where an array header would land.
        let pad = m.allocate(SpaceType::Young, 24).unwrap();
        NODE.write_header(pad);
        let holder = m.allocate(SpaceType::Young, 24).unwrap();
        NODE.write_header(holder);
        let root = heap.root(Some(holder));
        unsafe { m.write_weak_field(holder, 8, Some(dead)) };
        let stale = holder.raw() + 8;

        let stall = PoolStall::new();
        std::thread::scope(|scope| {
            let collector = scope.spawn(|| shared.collect(TriggerGcType::Shared, GcReason::HintGc));
            m.blocking(|| {
                let deadline = Instant::now() + Duration::from_secs(10);
                while shared.mark_status() != MarkStatus::Marking && Instant::now() < deadline {
                    std::thread::sleep(Duration::from_millis(1));
                }
            });
            assert_eq!(shared.mark_status(), MarkStatus::Marking);

            // Move the holder and hand its old memory to a live byte array
            // whose payload looks like a pointer to the dead shared object.
            m.request_collection(TriggerGcType::Young, GcReason::HintGc);
            let moved = root.get().unwrap();
            assert_ne!(moved, holder);
            let mut keep = Vec::new();
            let len = REGION_SIZE / 4 - 64;
            let reused = (0..8).find_map(|_| {
                let obj = m.allocate(SpaceType::NonMovable, BYTES.instance_size(len)).unwrap();
                BYTES.initialize(obj, len);
                let data = obj.raw() + ARRAY_DATA_OFFSET;
                for word in (0..len / WORD_SIZE).map(|i| data + i * WORD_SIZE) {
                    unsafe { (word as *mut usize).write(dead.raw()) };
                }
                keep.push(heap.root(Some(obj)));
                (data..data + len).contains(&stale).then_some(obj)
            });
            assert!(reused.is_some(), "from-space region was not reused");

            drop(stall);
            m.blocking(|| collector.join().unwrap());

            assert_eq!(unsafe { (stale as *const usize).read() }, dead.raw());
            assert_eq!(unsafe { m.read_field(root.get().unwrap(), 8) }, None);
            assert!(!shared.is_marked(dead));
        });
    }
}
