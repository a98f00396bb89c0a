//! Concurrent marking of the local heap.
//!
//! A cycle has three steps:
//!
//! 1. [`initialize`](ConcurrentMarker::initialize), inside a pause: clear the
//!    mark bits, pick the collection set, shade the roots.
//! 2. [`start`](ConcurrentMarker::start): background tasks trace the graph
//!    while mutators run. The write barrier shades new targets into the
//!    barrier queue, which the tasks drain too.
//! 3. [`remark`](ConcurrentMarker::remark), inside a pause: rescan the roots,
//!    finish the queues in parallel, resolve weak slots.
//!
//! The last background task to finish flips the status to `MarkFinished`;
//! the next allocation check notices and runs the partial collection.

use std::sync::Arc;

use crate::gc::marker::{process_concurrently, process_mark_stack, MarkStrategy, NonMovableMarker};
use crate::gc::state::{GcPhase, MarkStatus};
use crate::gc::weak::process_weak_marked;
use crate::heap::region::RegionFlags;
use crate::heap::HeapCore;
use crate::task::{run_parallel, TaskGroup, Taskpool};
use crate::tracing::gc_debug;
use crate::tracing::internal::{trace_phase, TracePhase};

/// Background marking tasks of one heap.
pub(crate) struct ConcurrentMarker {
    tasks: TaskGroup,
}

impl ConcurrentMarker {
    pub(crate) fn new() -> Self {
        Self {
            tasks: TaskGroup::new(),
        }
    }

    /// Starts a marking cycle. Returns the number of collection-set regions.
    ///
    /// Runs inside a pause with the sweeper idle.
    pub(crate) fn initialize(core: &HeapCore, select_cset: bool) -> usize {
        let _span = trace_phase(TracePhase::InitialMark);
        debug_assert_eq!(core.state.mark_status(), MarkStatus::ReadyToMark);
        core.state.transition_to(GcPhase::Marking);
        core.work.reset();
        core.table.for_each_in_use(|region| {
            if !region.is_read_only() {
                region.clear_marks();
            }
        });
        let cset = if select_cset && core.config.enable_partial_compaction {
            core.old.select_cset(
                &core.table,
                core.config.cset_live_ratio_percent,
                core.config.max_cset_regions,
            )
        } else {
            Vec::new()
        };
        core.table.for_each_in_use(|region| {
            if !region.is_read_only() {
                region.set_alive_bytes(0);
            }
        });
        core.state.set_mark_status(MarkStatus::Marking);

        let cx = core.context(RegionFlags::FREE);
        let mut holder = core.work.holder(0);
        core.roots
            .for_each(&mut |slot| NonMovableMarker.visit_slot(&cx, &mut holder, slot));
        core.work.flush(&mut holder);
        gc_debug!(heap = core.id, cset = cset.len(), "marking initialized");
        cset.len()
    }

    /// Posts the background marking tasks.
    ///
    /// With zero tasks configured the status stays `Marking` and all tracing
    /// happens in [`remark`](Self::remark).
    pub(crate) fn start(core: &Arc<HeapCore>) {
        core.stats.record_concurrent_mark();
        let tasks = core.config.concurrent_mark_tasks;
        if tasks == 0 {
            return;
        }
        core.marker.tasks.add(tasks);
        for _ in 0..tasks {
            let core = Arc::clone(core);
            Taskpool::global().post(move || {
                let completed = Self::run_task(&core);
                if core.marker.tasks.finish() && completed && !core.work.is_cancelled() {
                    core.state.finish_marking();
                    gc_debug!(heap = core.id, "concurrent marking finished");
                }
            });
        }
    }

    fn run_task(core: &HeapCore) -> bool {
        let _span = trace_phase(TracePhase::ConcurrentMark);
        let Some(id) = core.work.acquire_worker_id() else {
            return true;
        };
        let completed = {
            let cx = core.context(RegionFlags::FREE);
            let mut holder = core.work.holder(id);
            let completed = process_concurrently(&NonMovableMarker, &cx, &mut holder);
            core.work.flush(&mut holder);
            completed
        };
        core.work.release_worker_id(id);
        completed
    }

    /// Completes marking inside a pause.
    #[cfg_attr(not(feature = "tracing"), allow(unused_variables))]
    pub(crate) fn remark(core: &Arc<HeapCore>) {
        let _span = trace_phase(TracePhase::Remark);
        core.marker.tasks.wait();
        {
            let cx = core.context(RegionFlags::FREE);
            let mut holder = core.work.holder(0);
            core.roots
                .for_each(&mut |slot| NonMovableMarker.visit_slot(&cx, &mut holder, slot));
            core.work.drain_barrier_queue(&mut holder);
            core.work.flush(&mut holder);
        }
        let workers = core.config.parallel_gc_threads.min(core.work.workers());
        run_parallel(core, workers, |core: &HeapCore, id| {
            let cx = core.context(RegionFlags::FREE);
            let mut holder = core.work.holder(id);
            process_mark_stack(&NonMovableMarker, &cx, &mut holder);
        });
        let slots = core.work.take_weak_slots();
        let cleared = process_weak_marked(&core.context(RegionFlags::FREE), &slots);
        gc_debug!(heap = core.id, weak = slots.len(), cleared, "remark done");
        core.state.finish_marking();
    }

    /// Cancels a running cycle and forgets its results.
    pub(crate) fn abort(core: &HeapCore) {
        if core.state.mark_status() == MarkStatus::ReadyToMark {
            return;
        }
        core.work.cancel();
        core.marker.tasks.wait();
        core.work.reset();
        core.state.set_mark_status(MarkStatus::ReadyToMark);
        core.table.for_each_in_use(|region| {
            if region.in_cset() {
                region.remove_flags(RegionFlags::IN_CSET);
            }
        });
        core.state.transition_to(GcPhase::Idle);
        gc_debug!(heap = core.id, "concurrent marking aborted");
    }

    /// True while background tasks are running.
    pub(crate) fn is_running(&self) -> bool {
        !self.tasks.is_idle()
    }
}
