//! Weak slot processing.
//!
//! Tracing never shades through a weak slot; it records the slot instead.
//! Once the strong closure is known, every recorded slot is either cleared
//! (its referent died) or redirected (its referent moved).

use crate::gc::{remember_slot, GcContext};
use crate::object::ObjectSlot;

/// Resolves weak slots after in-place marking.
///
/// Unmarked referents are cleared. A live referent in the collection set gets
/// the slot recorded as a cross-region slot so the update pass redirects it.
pub(crate) fn process_weak_marked(cx: &GcContext<'_>, slots: &[ObjectSlot]) -> usize {
    let mut cleared = 0;
    for &slot in slots {
        let Some(target) = slot.referent() else {
            continue;
        };
        let Some(region) = cx.table.object_region(target.raw()) else {
            continue;
        };
        if region.is_read_only() {
            continue;
        }
        if !region.is_marked(target.raw()) {
            slot.clear();
            cleared += 1;
            continue;
        }
        if region.in_cset() {
            if let Some(holder) = cx.table.region_of(slot.address()) {
                if !holder.should_evacuate() && holder.id() != region.id() {
                    holder.insert_cross_region(slot.address());
                }
            }
        }
    }
    cleared
}

/// Resolves weak slots after a copying collection.
///
/// Forwarded referents are followed. A referent left behind in an evacuated
/// region was not reached and the slot is cleared. With `check_marks`, a
/// referent in a region that stayed put must also carry a mark bit.
pub(crate) fn process_weak_copied(
    cx: &GcContext<'_>,
    slots: &[ObjectSlot],
    check_marks: bool,
) -> usize {
    let mut cleared = 0;
    for &slot in slots {
        let Some(target) = slot.referent() else {
            continue;
        };
        let Some(region) = cx.table.object_region(target.raw()) else {
            continue;
        };
        if region.should_evacuate() {
            if let Some(to) = target.mark_word().forwarding_address() {
                slot.update(to);
                remember_slot(cx, slot, to);
            } else {
                slot.clear();
                cleared += 1;
            }
        } else if check_marks && !region.is_read_only() && !region.is_marked(target.raw()) {
            slot.clear();
            cleared += 1;
        }
    }
    cleared
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::descriptor::{DescriptorModel, TypeDescriptor};
    use crate::gc::evacuate::{evacuate, Destination};
    use crate::gc::worklist::WorkManager;
    use crate::heap::region::{RegionFlags, RegionTable};
    use crate::heap::remembered_set::{DefaultRememberedSetPolicy, RememberedSetKind};
    use crate::heap::space::{SemiSpace, SpaceType, SweepableSpace};
    use crate::object::{Address, WEAK_TAG};

    static CELL: TypeDescriptor = TypeDescriptor::fixed("Cell", 16, &[8]);

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

        fn old(&self) -> Address {
            let addr = self
                .old
                .allocate_from_free_list(16)
                .or_else(|| self.old.expand_and_allocate(&self.table, 16))
                .unwrap();
            let obj = unsafe { Address::from_raw(addr) }.unwrap();
            CELL.write_header(obj);
            obj
        }

        fn young(&self) -> Address {
            let (addr, _) = self.young.allocate(&self.table, 16).unwrap();
            let obj = unsafe { Address::from_raw(addr) }.unwrap();
            CELL.write_header(obj);
            obj
        }
    }

    fn weak_link(from: Address, to: Address) -> ObjectSlot {
        let slot = unsafe { from.field(8) };
        slot.store_raw(to.raw() | WEAK_TAG);
        slot
    }

    #[test]
    fn test_unmarked_referent_is_cleared() {
        let fx = Fixture::new();
        let holder = fx.old();
        let live = fx.old();
        let dead = fx.old();
        let keep = weak_link(holder, live);
        let other = fx.old();
        let drop_slot = weak_link(other, dead);
        fx.table.region_of(live.raw()).unwrap().mark(live.raw());

        let cleared = process_weak_marked(&fx.cx(), &[keep, drop_slot]);
        assert_eq!(cleared, 1);
        assert_eq!(keep.referent(), Some(live));
        assert!(keep.is_weak());
        assert_eq!(drop_slot.load_raw(), 0);
    }

    #[test]
    fn test_young_weak_referent_follows_copy() {
        let fx = Fixture::new();
        let holder = fx.old();
        let survivor = fx.young();
        let garbage = fx.young();
        let to_survivor = weak_link(holder, survivor);
        let other = fx.old();
        let to_garbage = weak_link(other, garbage);
        fx.young.flip(&fx.table);

        let cx = fx.cx();
        let moved = evacuate(&cx, &mut fx.work.holder(0), survivor, Destination::Young);
        let cleared = process_weak_copied(&cx, &[to_survivor, to_garbage], false);

        assert_eq!(cleared, 1);
        assert_eq!(to_survivor.referent(), Some(moved.to));
        assert!(to_survivor.is_weak());
        assert_eq!(to_garbage.load_raw(), 0);
        let holder_region = fx.table.region_of(holder.raw()).unwrap();
        assert!(holder_region.rset_contains(RememberedSetKind::OldToNew, to_survivor.address()));
    }

    #[test]
    fn test_marks_checked_only_when_asked() {
        let fx = Fixture::new();
        let holder = fx.old();
        let unmarked = fx.old();
        let slot = weak_link(holder, unmarked);
        assert_eq!(process_weak_copied(&fx.cx(), &[slot], false), 0);
        assert_eq!(slot.referent(), Some(unmarked));
        assert_eq!(process_weak_copied(&fx.cx(), &[slot], true), 1);
        assert_eq!(slot.load_raw(), 0);
    }
}
