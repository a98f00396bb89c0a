//! Full collection.
//!
//! Stops everything, abandons any marking cycle in flight and copies every
//! movable live object (young and old) into fresh old regions. Non-movable,
//! machine-code and huge objects are marked in place and swept. Used when
//! fragmentation outgrows what partial collections reclaim, when allocation
//! keeps failing, and, in its app-spawn form, to pin a pre-fork heap.

use std::sync::Arc;

use crate::gc::concurrent_marker::ConcurrentMarker;
use crate::gc::evacuate::retire_buffers;
use crate::gc::marker::{process_mark_stack, CompressMarker, MarkStrategy};
use crate::gc::partial::{recompute_old_limit, LOCAL_SWEPT_SPACES};
use crate::gc::state::GcPhase;
use crate::gc::sweeper::ConcurrentSweeper;
use crate::gc::weak::process_weak_copied;
use crate::heap::region::RegionFlags;
use crate::heap::remembered_set::RememberedSetKind;
use crate::heap::HeapCore;
use crate::metrics::{GcMetrics, PhaseTimer};
use crate::task::run_parallel;
use crate::tracing::internal::{trace_phase, TracePhase};

/// Runs a full collection. `app_spawn` tags survivor regions so later
/// partial collections never pick them for compaction.
pub(crate) fn run(
    core: &Arc<HeapCore>,
    app_spawn: bool,
    metrics: &mut GcMetrics,
    timer: &mut PhaseTimer,
) {
    ConcurrentMarker::abort(core);
    core.work.reset();
    let target_flags = if app_spawn {
        RegionFlags::APP_SPAWN
    } else {
        RegionFlags::FREE
    };

    timer.start();
    core.state.transition_to(GcPhase::Evacuating);
    core.table.for_each_in_use(|region| {
        if region.is_read_only() || region.in_shared() {
            return;
        }
        region.clear_marks();
        region.set_alive_bytes(0);
        let rsets = region.rsets();
        rsets.clear(RememberedSetKind::OldToNew);
        rsets.clear(RememberedSetKind::CrossRegion);
    });
    let from = core.young.flip(&core.table);
    let mut compacted = 0;
    for id in core.old.regions() {
        let region = core.table.region(id);
        if !region.flags().contains(RegionFlags::APP_SPAWN) {
            region.add_flags(RegionFlags::FROM_SPACE);
            compacted += 1;
        }
    }
    core.state.bump_young_epoch();
    metrics.cset_regions = compacted;

    {
        let _span = trace_phase(TracePhase::Mark);
        let cx = core.context(target_flags);
        let mut holder = core.work.holder(0);
        core.roots
            .for_each(&mut |slot| CompressMarker.visit_slot(&cx, &mut holder, slot));
        core.work.flush(&mut holder);
    }
    let workers = core.config.parallel_gc_threads.min(core.work.workers());
    run_parallel(core, workers, move |core: &HeapCore, id| {
        let cx = core.context(target_flags);
        let mut holder = core.work.holder(id);
        process_mark_stack(&CompressMarker, &cx, &mut holder);
    });
    {
        let _span = trace_phase(TracePhase::ProcessWeak);
        let cx = core.context(target_flags);
        let slots = core.work.take_weak_slots();
        process_weak_copied(&cx, &slots, true);
        retire_buffers(&cx);
    }
    timer.end_evacuate();

    let stats = core.work.take_stats();
    metrics.bytes_copied = stats.bytes_copied;
    metrics.bytes_promoted = stats.bytes_promoted;
    metrics.objects_copied = stats.objects_copied;

    timer.start();
    core.state.transition_to(GcPhase::Sweeping);
    let mut freed = from.len();
    core.young.finish_gc(&core.table);
    for id in core
        .old
        .remove_regions(&core.table, |region| region.flags().contains(RegionFlags::FROM_SPACE))
    {
        core.table.release(id);
        freed += 1;
    }
    metrics.regions_freed = freed;
    ConcurrentSweeper::start(core, &LOCAL_SWEPT_SPACES);
    timer.end_sweep();

    core.work.reset();
    core.state.clear_full_requests();
    recompute_old_limit(core);
    core.state.transition_to(GcPhase::Idle);
}
