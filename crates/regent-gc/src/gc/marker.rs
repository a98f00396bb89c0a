//! Marking strategies.
//!
//! Every collector traces the same way: pop a gray object, visit its
//! reference slots, shade what they point at. What "shade" means differs:
//!
//! - [`NonMovableMarker`] sets mark bits in place (concurrent and partial marking);
//! - [`SemiGcMarker`] copies young objects out of from-space;
//! - [`CompressMarker`] copies everything movable into fresh old regions;
//! - [`SharedMarker`] marks shared-heap objects reached from any runtime.
//!
//! The drain loop is generic over [`MarkStrategy`], so the per-slot call is
//! statically dispatched.

use crate::gc::evacuate::{evacuate, Destination};
use crate::gc::worklist::WorkerHolder;
use crate::gc::{remember_slot, GcContext};
use crate::heap::region::Region;
use crate::object::{object_size, Address, ObjectSlot};

/// How a collector shades the target of one slot.
pub(crate) trait MarkStrategy: Sync {
    /// Handles one slot of a gray object or a root.
    fn visit_slot(&self, cx: &GcContext<'_>, worker: &mut WorkerHolder, slot: ObjectSlot);
}

/// Visits every reference slot of `obj`.
#[inline]
pub(crate) fn scan_object<S: MarkStrategy>(
    strategy: &S,
    cx: &GcContext<'_>,
    worker: &mut WorkerHolder,
    obj: Address,
) {
    let Some(class) = obj.mark_word().class() else {
        debug_assert!(false, "scanning {obj:?} without a class word");
        return;
    };
    if !cx.model.has_reference_fields(class) {
        return;
    }
    cx.model.for_each_reference_slot(obj, class, &mut |slot| {
        strategy.visit_slot(cx, worker, slot);
    });
}

/// Drains the worker's queue and the global stack.
pub(crate) fn process_mark_stack<S: MarkStrategy>(
    strategy: &S,
    cx: &GcContext<'_>,
    worker: &mut WorkerHolder,
) {
    while let Some(obj) = cx.work.pop(worker) {
        scan_object(strategy, cx, worker, obj);
    }
}

/// Background variant: also drains the barrier queue and stops on cancel.
///
/// Returns false if cancelled.
pub(crate) fn process_concurrently<S: MarkStrategy>(
    strategy: &S,
    cx: &GcContext<'_>,
    worker: &mut WorkerHolder,
) -> bool {
    loop {
        while let Some(obj) = cx.work.pop(worker) {
            if cx.work.is_cancelled() {
                return false;
            }
            scan_object(strategy, cx, worker, obj);
        }
        match cx.work.pop_barrier() {
            Some(obj) => scan_object(strategy, cx, worker, obj),
            None => return true,
        }
    }
}

/// Marks `obj` and queues it if this call marked it.
#[inline]
pub(crate) fn mark_and_push(
    cx: &GcContext<'_>,
    worker: &mut WorkerHolder,
    region: &Region,
    obj: Address,
) {
    if region.mark(obj.raw()) {
        region.add_alive_bytes(object_size(cx.model, obj));
        cx.work.push(worker, obj);
    }
}

/// In-place marking of the local heap.
///
/// A slot pointing into the collection set from a region that stays put is
/// recorded in the holder's cross-region set so it can be redirected after
/// evacuation.
pub(crate) struct NonMovableMarker;

impl MarkStrategy for NonMovableMarker {
    fn visit_slot(&self, cx: &GcContext<'_>, worker: &mut WorkerHolder, slot: ObjectSlot) {
        let Some(target) = slot.referent() else {
            return;
        };
        let Some(region) = cx.table.object_region(target.raw()) else {
            return;
        };
        if region.is_read_only() {
            return;
        }
        if slot.is_weak() {
            worker.weak_slots.push(slot);
            return;
        }
        if region.in_cset() {
            if let Some(holder) = cx.table.region_of(slot.address()) {
                if !holder.should_evacuate() && holder.id() != region.id() {
                    holder.insert_cross_region(slot.address());
                }
            }
        }
        mark_and_push(cx, worker, region, target);
    }
}

/// Young collection: copy from-space objects, promoting the aged ones.
pub(crate) struct SemiGcMarker;

impl SemiGcMarker {
    /// Visits an old→young remembered slot. Returns whether the bit must stay.
    pub(crate) fn visit_remembered(
        &self,
        cx: &GcContext<'_>,
        worker: &mut WorkerHolder,
        slot: ObjectSlot,
    ) -> bool {
        self.visit_slot(cx, worker, slot);
        slot.referent()
            .and_then(|t| cx.table.region_of(t.raw()))
            .is_some_and(Region::in_young)
    }
}

impl MarkStrategy for SemiGcMarker {
    fn visit_slot(&self, cx: &GcContext<'_>, worker: &mut WorkerHolder, slot: ObjectSlot) {
        let Some(target) = slot.referent() else {
            return;
        };
        let Some(region) = cx.table.region_of(target.raw()) else {
            remember_slot(cx, slot, target);
            return;
        };
        if !region.should_evacuate() {
            remember_slot(cx, slot, target);
            return;
        }
        if slot.is_weak() {
            worker.weak_slots.push(slot);
            return;
        }
        let dest = if target.raw() < region.age_mark() {
            Destination::Old
        } else {
            Destination::Young
        };
        let moved = evacuate(cx, worker, target, dest);
        slot.update(moved.to);
        if moved.copied {
            cx.work.push(worker, moved.to);
        }
        remember_slot(cx, slot, moved.to);
    }
}

/// Full collection: copy every movable object into fresh old regions and
/// mark the rest in place.
pub(crate) struct CompressMarker;

impl MarkStrategy for CompressMarker {
    fn visit_slot(&self, cx: &GcContext<'_>, worker: &mut WorkerHolder, slot: ObjectSlot) {
        let Some(target) = slot.referent() else {
            return;
        };
        let Some(region) = cx.table.object_region(target.raw()) else {
            remember_slot(cx, slot, target);
            return;
        };
        if region.is_read_only() {
            return;
        }
        if slot.is_weak() {
            worker.weak_slots.push(slot);
            return;
        }
        if region.should_evacuate() {
            let moved = evacuate(cx, worker, target, Destination::Old);
            slot.update(moved.to);
            if moved.copied {
                cx.work.push(worker, moved.to);
            }
        } else {
            mark_and_push(cx, worker, region, target);
        }
    }
}

/// Shared-heap marking. Slots may live in any attached runtime; only targets
/// inside the shared heap are shaded.
pub(crate) struct SharedMarker;

impl MarkStrategy for SharedMarker {
    fn visit_slot(&self, cx: &GcContext<'_>, worker: &mut WorkerHolder, slot: ObjectSlot) {
        let Some(target) = slot.referent() else {
            return;
        };
        let Some(region) = cx.table.object_region(target.raw()) else {
            return;
        };
        if slot.is_weak() {
            worker.weak_slots.push(slot);
            return;
        }
        mark_and_push(cx, worker, region, target);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::descriptor::{DescriptorModel, TypeDescriptor};
    use crate::gc::worklist::WorkManager;
    use crate::heap::region::{RegionFlags, RegionTable};
    use crate::heap::remembered_set::{DefaultRememberedSetPolicy, RememberedSetKind};
    use crate::heap::space::{SemiSpace, SpaceType, SweepableSpace};

    static NODE: TypeDescriptor = TypeDescriptor::fixed("Node", 24, &[8, 16]);

    struct Fixture {
        table: RegionTable,
        model: DescriptorModel,
        work: WorkManager,
        young: SemiSpace,
        old: SweepableSpace,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                table: RegionTable::new(16, Arc::new(DefaultRememberedSetPolicy)).unwrap(),
                model: DescriptorModel,
                work: WorkManager::new(1),
                young: SemiSpace::new(2),
                old: SweepableSpace::new(SpaceType::Old),
            }
        }

        fn cx(&self) -> GcContext<'_> {
            GcContext {
                table: &self.table,
                model: &self.model,
                work: &self.work,
                young: Some(&self.young),
                old: &self.old,
                tlab_size: 4096,
                target_flags: RegionFlags::FREE,
                shared_table: None,
            }
        }

        fn young(&self) -> Address {
            let (addr, _) = self.young.allocate(&self.table, 24).unwrap();
            let obj = unsafe { Address::from_raw(addr) }.unwrap();
            NODE.write_header(obj);
            obj
        }

        fn old(&self) -> Address {
            let addr = self
                .old
                .allocate_from_free_list(24)
                .or_else(|| self.old.expand_and_allocate(&self.table, 24))
                .unwrap();
            let obj = unsafe { Address::from_raw(addr) }.unwrap();
            NODE.write_header(obj);
            obj
        }
    }

    fn link(from: Address, offset: usize, to: Address) -> ObjectSlot {
        let slot = unsafe { from.field(offset) };
        slot.store_raw(to.raw());
        slot
    }

    #[test]
    fn test_non_movable_marks_transitively() {
        let fx = Fixture::new();
        let a = fx.old();
        let b = fx.old();
        let c = fx.old();
        link(a, 8, b);
        link(b, 16, c);
        let cx = fx.cx();
        let mut worker = fx.work.holder(0);
        let region = fx.table.region_of(a.raw()).unwrap();
        mark_and_push(&cx, &mut worker, region, a);
        process_mark_stack(&NonMovableMarker, &cx, &mut worker);
        assert!(region.is_marked(b.raw()));
        assert!(region.is_marked(c.raw()));
        assert!(worker.is_empty());
    }

    #[test]
    fn test_cset_target_records_cross_region_slot() {
        let fx = Fixture::new();
        let holder = fx.old();
        // Second region holds the collection-set object.
        let cset_region = fx
            .old
            .acquire_evacuation_region(&fx.table, RegionFlags::FREE)
            .unwrap();
        cset_region.add_flags(RegionFlags::IN_CSET);
        let target = unsafe { Address::from_raw(cset_region.begin()) }.unwrap();
        NODE.write_header(target);
        let slot = link(holder, 8, target);

        let cx = fx.cx();
        let mut worker = fx.work.holder(0);
        NonMovableMarker.visit_slot(&cx, &mut worker, slot);
        let holder_region = fx.table.region_of(holder.raw()).unwrap();
        assert!(holder_region.rset_contains(RememberedSetKind::CrossRegion, slot.address()));
        assert!(cset_region.is_marked(target.raw()));
    }

    #[test]
    fn test_semi_marker_copies_and_remembers() {
        let fx = Fixture::new();
        let holder = fx.old();
        let child = fx.young();
        let grandchild = fx.young();
        let slot = link(holder, 8, child);
        link(child, 8, grandchild);
        fx.young.flip(&fx.table);

        let cx = fx.cx();
        let mut worker = fx.work.holder(0);
        assert!(SemiGcMarker.visit_remembered(&cx, &mut worker, slot));
        process_mark_stack(&SemiGcMarker, &cx, &mut worker);

        let new_child = slot.referent().unwrap();
        assert_ne!(new_child, child);
        let new_grandchild = unsafe { new_child.field(8) }.referent().unwrap();
        assert_ne!(new_grandchild, grandchild);
        assert_eq!(grandchild.mark_word().forwarding_address(), Some(new_grandchild));
        let holder_region = fx.table.region_of(holder.raw()).unwrap();
        assert!(holder_region.rset_contains(RememberedSetKind::OldToNew, slot.address()));
    }

    #[test]
    fn test_weak_slots_are_deferred() {
        let fx = Fixture::new();
        let holder = fx.old();
        let target = fx.old();
        let slot = unsafe { holder.field(8) };
        slot.store_raw(target.raw() | crate::object::WEAK_TAG);
        let cx = fx.cx();
        let mut worker = fx.work.holder(0);
        NonMovableMarker.visit_slot(&cx, &mut worker, slot);
        assert_eq!(worker.weak_slots, vec![slot]);
        assert!(!fx.table.region_of(target.raw()).unwrap().is_marked(target.raw()));
    }
}
