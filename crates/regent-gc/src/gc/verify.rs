//! Heap verifier.
//!
//! Walks everything reachable from the roots and checks the invariants the
//! collectors rely on. Each failure is logged; the caller gets the count.

use std::collections::{HashSet, VecDeque};

use crate::heap::remembered_set::RememberedSetKind;
use crate::heap::HeapCore;
use crate::object::{Address, ObjectSlot};
use crate::tracing::gc_warn;

/// Checks the reachable graph of `core`. With `check_marks`, every reachable
/// object outside read-only space must carry a mark bit.
pub(crate) fn verify_heap(core: &HeapCore, check_marks: bool) -> usize {
    let mut failures = 0;
    let mut seen: HashSet<Address> = HashSet::new();
    let mut queue: VecDeque<Address> = VecDeque::new();

    let mut enqueue = |slot: ObjectSlot, queue: &mut VecDeque<Address>, failures: &mut usize| {
        if slot.is_weak() {
            return;
        }
        let Some(target) = slot.referent() else {
            return;
        };
        *failures += check_slot(core, slot, target);
        if core.table.contains(target.raw()) && seen.insert(target) {
            queue.push_back(target);
        }
    };

    core.roots
        .for_each(&mut |slot| enqueue(slot, &mut queue, &mut failures));

    while let Some(obj) = queue.pop_front() {
        let Some(region) = core.table.object_region(obj.raw()) else {
            continue;
        };
        if !region.in_use() {
            gc_warn!(?obj, "reachable object in a free region");
            failures += 1;
            continue;
        }
        let word = obj.mark_word();
        if word.is_forwarded() {
            gc_warn!(?obj, "reachable object is forwarded");
            failures += 1;
            continue;
        }
        let Some(class) = word.class() else {
            gc_warn!(?obj, "reachable object has no class word");
            failures += 1;
            continue;
        };
        if check_marks && !region.is_read_only() && !region.is_marked(obj.raw()) {
            gc_warn!(?obj, "reachable object is not marked");
            failures += 1;
        }
        let mut slots = Vec::new();
        core.model
            .for_each_reference_slot(obj, class, &mut |slot| slots.push(slot));
        for slot in slots {
            enqueue(slot, &mut queue, &mut failures);
        }
    }
    failures
}

/// Remembered-set checks for one edge.
fn check_slot(core: &HeapCore, slot: ObjectSlot, target: Address) -> usize {
    let Some(holder) = core.table.region_of(slot.address()) else {
        return 0;
    };
    if holder.in_shared() {
        return 0;
    }
    if let Some(region) = core.table.region_of(target.raw()) {
        if region.in_young()
            && !holder.in_young()
            && !holder.rset_contains(RememberedSetKind::OldToNew, slot.address())
        {
            gc_warn!(?slot, ?target, "old-to-young slot missing from remembered set");
            return 1;
        }
    } else if core
        .shared
        .as_ref()
        .is_some_and(|shared| shared.table.contains(target.raw()))
        && !holder.rset_contains(RememberedSetKind::LocalToShare, slot.address())
    {
        gc_warn!(?slot, ?target, "local-to-shared slot missing from remembered set");
        return 1;
    }
    0
}
