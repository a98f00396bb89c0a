//! Young collection.
//!
//! Copies live objects out of the young generation. The roots are the root
//! set plus every old→new slot; objects that already survived one collection
//! (they sit below their region's age mark) are promoted into old space.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::gc::evacuate::retire_buffers;
use crate::gc::marker::{process_mark_stack, MarkStrategy, SemiGcMarker};
use crate::gc::state::{GcPhase, MarkStatus};
use crate::gc::weak::process_weak_copied;
use crate::heap::region::RegionFlags;
use crate::heap::remembered_set::RememberedSetKind;
use crate::heap::HeapCore;
use crate::metrics::{GcMetrics, PhaseTimer};
use crate::object::ObjectSlot;
use crate::task::run_parallel;
use crate::tracing::internal::{trace_phase, TracePhase};

pub(crate) fn run(core: &Arc<HeapCore>, metrics: &mut GcMetrics, timer: &mut PhaseTimer) {
    debug_assert_eq!(core.state.mark_status(), MarkStatus::ReadyToMark);
    core.state.transition_to(GcPhase::Evacuating);
    timer.start();
    let from = core.young.flip(&core.table);
    core.state.bump_young_epoch();
    {
        let _span = trace_phase(TracePhase::Evacuate);
        let cx = core.context(RegionFlags::FREE);
        let mut holder = core.work.holder(0);
        core.roots
            .for_each(&mut |slot| SemiGcMarker.visit_slot(&cx, &mut holder, slot));
        core.work.flush(&mut holder);
    }

    let remembered = Arc::new(core.table.collect_regions(|region| {
        !region.in_young()
            && !region.in_shared()
            && region.rsets().has_any(RememberedSetKind::OldToNew)
    }));
    let cursor = Arc::new(AtomicUsize::new(0));
    let workers = core.config.parallel_gc_threads.min(core.work.workers());
    run_parallel(core, workers, move |core: &HeapCore, id| {
        let cx = core.context(RegionFlags::FREE);
        let mut holder = core.work.holder(id);
        loop {
            let next = cursor.fetch_add(1, Ordering::Relaxed);
            let Some(&region) = remembered.get(next) else {
                break;
            };
            core.table
                .region(region)
                .retain_rset(RememberedSetKind::OldToNew, |addr| {
                    // SAFETY: remembered slots lie inside objects of this region.
                    let slot = unsafe { ObjectSlot::from_raw(addr) };
                    SemiGcMarker.visit_remembered(&cx, &mut holder, slot)
                });
            process_mark_stack(&SemiGcMarker, &cx, &mut holder);
        }
        process_mark_stack(&SemiGcMarker, &cx, &mut holder);
    });

    {
        let _span = trace_phase(TracePhase::ProcessWeak);
        let cx = core.context(RegionFlags::FREE);
        let slots = core.work.take_weak_slots();
        process_weak_copied(&cx, &slots, false);
        retire_buffers(&cx);
    }
    timer.end_evacuate();

    let stats = core.work.take_stats();
    metrics.bytes_copied = stats.bytes_copied;
    metrics.bytes_promoted = stats.bytes_promoted;
    metrics.objects_copied = stats.objects_copied;
    metrics.regions_freed = from.len();
    core.young.finish_gc(&core.table);
    core.work.reset();
    core.state.transition_to(GcPhase::Idle);
}
