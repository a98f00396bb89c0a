//! The write barrier.
//!
//! Runs after every reference store performed by a mutator. It keeps three
//! things true while the program mutates the graph:
//!
//! - every slot of a non-young region that points into the young generation
//!   has its old→new bit;
//! - every local slot that points into the shared heap has its local→shared bit;
//! - while marking, every newly stored strong target is shaded, so a black
//!   object can never hide the only path to a white one.
//!
//! Weak stores are shaded too while marking. The referent stays alive for the
//! current cycle, which is what a weak slot that tracing never saw needs.

use crate::heap::region::Region;
use crate::heap::HeapCore;
use crate::object::{object_size, Address, ObjectSlot, WEAK_TAG};

/// Post-write barrier for `slot`, which now holds `value`.
#[inline]
pub(crate) fn write_barrier(core: &HeapCore, slot: ObjectSlot, value: usize) {
    // SAFETY: mutators only store null or object addresses.
    let Some(target) = (unsafe { Address::from_raw(value & !WEAK_TAG) }) else {
        return;
    };
    if let Some(holder) = core.table.region_of(slot.address()) {
        local_holder(core, holder, slot, target);
    } else if let Some(shared) = &core.shared {
        if shared.table.contains(slot.address()) {
            debug_assert!(
                shared.table.contains(target.raw()),
                "shared object {slot:?} stores local {target:?}"
            );
            shared.barrier_mark(target);
        }
    }
}

fn local_holder(core: &HeapCore, holder: &Region, slot: ObjectSlot, target: Address) {
    let Some(region) = core.table.object_region(target.raw()) else {
        if let Some(shared) = &core.shared {
            if shared.table.contains(target.raw()) {
                holder.insert_local_to_share(slot.address());
                shared.barrier_mark(target);
            }
        }
        return;
    };
    if region.in_young() && !holder.in_young() {
        holder.insert_old_to_new(slot.address());
    }
    if core.state.is_marking() && !region.is_read_only() {
        if region.in_cset() && holder.id() != region.id() && !holder.should_evacuate() {
            holder.insert_cross_region(slot.address());
        }
        shade(core, region, target);
    }
}

#[inline]
fn shade(core: &HeapCore, region: &Region, target: Address) {
    if region.mark(target.raw()) {
        region.add_alive_bytes(object_size(&*core.model, target));
        core.work.push_barrier(target);
    }
}

/// Copies `count` reference slots from `src` to `dst` with barrier semantics.
///
/// Overlapping ranges are moved element by element in the safe direction.
/// Disjoint ranges are copied in bulk and their remembered-set bits are set
/// per region-sized piece of the destination.
pub(crate) fn copy_references(core: &HeapCore, dst: ObjectSlot, src: ObjectSlot, count: usize) {
    if count == 0 {
        return;
    }
    let word = std::mem::size_of::<usize>();
    let bytes = count * word;
    let (d, s) = (dst.address(), src.address());
    let overlap = d < s + bytes && s < d + bytes;
    // SAFETY: both ranges are `count` valid slots owned by live objects.
    let at = |base: usize, i: usize| unsafe { ObjectSlot::from_raw(base + i * word) };

    if overlap {
        let step = |i: usize| {
            let value = at(s, i).load_raw();
            at(d, i).store_raw(value);
            write_barrier(core, at(d, i), value);
        };
        if d > s {
            (0..count).rev().for_each(step);
        } else {
            (0..count).for_each(step);
        }
        return;
    }

    for i in 0..count {
        at(d, i).store_raw(at(s, i).load_raw());
    }

    if core.table.region_of(d).is_none() {
        // Shared destination: only marking cares.
        for i in 0..count {
            write_barrier(core, at(d, i), at(d, i).load_raw());
        }
        return;
    }

    let marking = core.state.is_marking();
    let mut start = d;
    let end = d + bytes;
    while start < end {
        let Some(holder) = core.table.region_of(start) else {
            break;
        };
        let piece_end = end.min(holder.end());
        let mut young = false;
        let mut shared = false;
        let mut slot_addr = start;
        while slot_addr < piece_end {
            // SAFETY: inside the destination range.
            let slot = unsafe { ObjectSlot::from_raw(slot_addr) };
            if let Some(target) = slot.referent() {
                match core.table.object_region(target.raw()) {
                    Some(region) => {
                        young |= region.in_young();
                        if marking && !region.is_read_only() {
                            if region.in_cset()
                                && holder.id() != region.id()
                                && !holder.should_evacuate()
                            {
                                holder.insert_cross_region(slot_addr);
                            }
                            shade(core, region, target);
                        }
                    }
                    None => {
                        if let Some(heap) = &core.shared {
                            if heap.table.contains(target.raw()) {
                                shared = true;
                                heap.barrier_mark(target);
                            }
                        }
                    }
                }
            }
            slot_addr += word;
        }
        if young && !holder.in_young() {
            holder.insert_old_to_new_range(start, piece_end);
        }
        if shared {
            holder.insert_local_to_share_range(start, piece_end);
        }
        start = piece_end;
    }
}
