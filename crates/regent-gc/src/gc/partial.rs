//! Partial (old) collection.
//!
//! Finishes a marking cycle, then evacuates the young generation together
//! with the collection set: the sparsest old regions picked when marking
//! started. Every other old region is swept in place. Slots that must be
//! redirected are found through the copied objects themselves, the old→new
//! sets and the cross-region sets recorded during marking.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::gc::concurrent_marker::ConcurrentMarker;
use crate::gc::evacuate::{evacuate, retire_buffers, Destination};
use crate::gc::state::{GcPhase, MarkStatus};
use crate::gc::sweeper::ConcurrentSweeper;
use crate::gc::{remember_slot, GcContext};
use crate::heap::region::{RegionFlags, RegionId};
use crate::heap::remembered_set::RememberedSetKind;
use crate::heap::space::SpaceType;
use crate::heap::HeapCore;
use crate::metrics::{GcMetrics, PhaseTimer};
use crate::object::ObjectSlot;
use crate::task::run_parallel;
use crate::tracing::gc_debug;
use crate::tracing::internal::{trace_phase, TracePhase};

/// Spaces swept in place after a partial or full collection.
pub(crate) const LOCAL_SWEPT_SPACES: [SpaceType; 4] = [
    SpaceType::Old,
    SpaceType::NonMovable,
    SpaceType::MachineCode,
    SpaceType::Huge,
];

pub(crate) fn run(core: &Arc<HeapCore>, metrics: &mut GcMetrics, timer: &mut PhaseTimer) {
    timer.start();
    if core.state.mark_status() == MarkStatus::ReadyToMark {
        ConcurrentMarker::initialize(core, true);
    }
    ConcurrentMarker::remark(core);
    timer.end_mark();

    timer.start();
    core.state.transition_to(GcPhase::Evacuating);
    let mut evacuated = core.young.flip(&core.table);
    let cset = core.table.collect_regions(|region| region.in_cset());
    metrics.cset_regions = cset.len();
    evacuated.extend_from_slice(&cset);
    core.state.bump_young_epoch();

    evacuate_marked(core, evacuated);
    retire_buffers(&core.context(RegionFlags::FREE));
    update_references(core);
    timer.end_evacuate();

    let stats = core.work.take_stats();
    metrics.bytes_copied = stats.bytes_copied;
    metrics.bytes_promoted = stats.bytes_promoted;
    metrics.objects_copied = stats.objects_copied;

    timer.start();
    core.state.transition_to(GcPhase::Sweeping);
    let mut freed = core.young.finish_gc(&core.table);
    for id in core.old.remove_regions(&core.table, |region| region.in_cset()) {
        core.table.release(id);
        freed += 1;
    }
    metrics.regions_freed = freed;
    ConcurrentSweeper::start(core, &LOCAL_SWEPT_SPACES);
    timer.end_sweep();

    core.state.set_mark_status(MarkStatus::ReadyToMark);
    core.work.reset();
    recompute_old_limit(core);
    core.state.transition_to(GcPhase::Idle);
}

/// Copies every marked object of `regions`, one region per claim.
fn evacuate_marked(core: &Arc<HeapCore>, regions: Vec<RegionId>) {
    let _span = trace_phase(TracePhase::Evacuate);
    let regions = Arc::new(regions);
    let cursor = Arc::new(AtomicUsize::new(0));
    let workers = core.config.parallel_gc_threads.min(core.work.workers());
    run_parallel(core, workers, move |core: &HeapCore, id| {
        let cx = core.context(RegionFlags::FREE);
        let mut holder = core.work.holder(id);
        loop {
            let next = cursor.fetch_add(1, Ordering::Relaxed);
            let Some(&region) = regions.get(next) else {
                break;
            };
            let region = core.table.region(region);
            let young = region.in_young();
            let age_mark = region.age_mark();
            let bits = region.mark_bits();
            let mut index = 0;
            while let Some(found) = bits.next_set(index) {
                let obj = region.object_at(found);
                let dest = if young && obj.raw() >= age_mark {
                    Destination::Young
                } else {
                    Destination::Old
                };
                let moved = evacuate(&cx, &mut holder, obj, dest);
                if moved.copied {
                    holder.copied.push(moved.to);
                }
                index = found + 1;
            }
        }
    });
}

/// Redirects `slot` if its target moved, then re-records its remembered-set bits.
fn update_slot(cx: &GcContext<'_>, slot: ObjectSlot) {
    let Some(target) = slot.referent() else {
        return;
    };
    let target = match cx.table.object_region(target.raw()) {
        Some(region) if region.should_evacuate() => {
            let Some(to) = target.mark_word().forwarding_address() else {
                return;
            };
            slot.update(to);
            to
        }
        _ => target,
    };
    remember_slot(cx, slot, target);
}

/// True if `slot` still needs its old→new bit.
fn points_to_survivor_space(cx: &GcContext<'_>, slot: ObjectSlot) -> bool {
    slot.referent()
        .and_then(|t| cx.table.region_of(t.raw()))
        .is_some_and(|r| r.in_young() && !r.should_evacuate())
}

fn update_references(core: &Arc<HeapCore>) {
    let _span = trace_phase(TracePhase::UpdateReferences);
    {
        let cx = core.context(RegionFlags::FREE);
        core.roots.for_each(&mut |slot| update_slot(&cx, slot));
    }
    let copied = Arc::new(core.work.take_copied());
    let holders = Arc::new(core.table.collect_regions(|region| {
        !region.should_evacuate() && !region.in_young() && !region.in_shared()
    }));
    gc_debug!(copied = copied.len(), regions = holders.len(), "updating references");

    let copied_cursor = Arc::new(AtomicUsize::new(0));
    let region_cursor = Arc::new(AtomicUsize::new(0));
    let workers = core.config.parallel_gc_threads.min(core.work.workers());
    run_parallel(core, workers, move |core: &HeapCore, _id| {
        let cx = core.context(RegionFlags::FREE);
        loop {
            let next = copied_cursor.fetch_add(1, Ordering::Relaxed);
            let Some(&obj) = copied.get(next) else {
                break;
            };
            let Some(class) = obj.mark_word().class() else {
                continue;
            };
            cx.model
                .for_each_reference_slot(obj, class, &mut |slot| update_slot(&cx, slot));
        }
        loop {
            let next = region_cursor.fetch_add(1, Ordering::Relaxed);
            let Some(&id) = holders.get(next) else {
                break;
            };
            let region = core.table.region(id);
            region.retain_rset(RememberedSetKind::OldToNew, |addr| {
                // SAFETY: remembered slots lie inside objects of this region.
                let slot = unsafe { ObjectSlot::from_raw(addr) };
                update_slot(&cx, slot);
                points_to_survivor_space(&cx, slot)
            });
            region.retain_rset(RememberedSetKind::CrossRegion, |addr| {
                // SAFETY: as above.
                update_slot(&cx, unsafe { ObjectSlot::from_raw(addr) });
                false
            });
        }
    });
}

/// Resets the old-space trigger from the bytes marking found alive.
///
/// Requests a full collection when committed old memory is more than twice
/// the live data and the new limit would not reclaim it.
pub(crate) fn recompute_old_limit(core: &HeapCore) {
    let mut live = 0;
    let mut committed = 0;
    core.table.for_each_in_use(|region| {
        if region.is_huge_tail() {
            committed += crate::heap::region::REGION_SIZE;
            return;
        }
        if matches!(
            region.space_type(),
            Some(SpaceType::Old | SpaceType::NonMovable | SpaceType::MachineCode | SpaceType::Huge)
        ) {
            live += region.alive_bytes();
            committed += crate::heap::region::REGION_SIZE;
        }
    });
    let grown = live.saturating_mul(core.config.growing_factor_percent) / 100;
    let limit = grown.max(core.config.min_old_space_limit);
    core.state.set_old_space_limit(limit);
    core.state.set_overshoot(0);
    if committed > 2 * live && committed / 2 > limit {
        core.state.request_full_mark();
    }
    gc_debug!(heap = core.id, live, committed, limit, "old space limit recomputed");
}
