//! Young collection tests.

mod common;

use common::*;
use regent_gc::{SpaceType, TriggerGcType};

#[test]
fn test_young_gc_moves_survivors() {
    let heap = new_heap(stw_config());
    let mut m = heap.attach();

    let a = node(&mut m, SpaceType::Young);
    let b = node(&mut m, SpaceType::Young);
    link(&m, a, LEFT, Some(b));
    let root = heap.root(Some(a));

    young_gc(&mut m);

    let new_a = root.get().unwrap();
    assert_ne!(new_a, a);
    let new_b = field(&m, new_a, LEFT).unwrap();
    assert_ne!(new_b, b);
    assert!(field(&m, new_a, RIGHT).is_none());
    assert!(heap.is_alive(new_a.raw()));
    assert!(heap.is_alive(new_b.raw()));
    assert!(!heap.is_alive(a.raw()));
    assert_eq!(heap.verify(), 0);
}

#[test]
fn test_young_gc_copies_only_reachable_objects() {
    let heap = new_heap(stw_config());
    let mut m = heap.attach();

    let kept = node(&mut m, SpaceType::Young);
    for _ in 0..1000 {
        let _ = node(&mut m, SpaceType::Young);
    }
    let _root = heap.root(Some(kept));

    young_gc(&mut m);

    let metrics = heap.last_gc_metrics().unwrap();
    assert_eq!(metrics.gc_type, TriggerGcType::Young);
    assert_eq!(metrics.objects_copied, 1);
    assert_eq!(metrics.bytes_copied, NODE_SIZE);
    assert_eq!(heap.stats().young_collections(), 1);
}

#[test]
fn test_second_survival_promotes() {
    let heap = new_heap(stw_config());
    let mut m = heap.attach();

    let obj = node(&mut m, SpaceType::Young);
    let root = heap.root(Some(obj));

    young_gc(&mut m);
    let info = heap.region_info(root.get().unwrap().raw()).unwrap();
    assert_eq!(info.space, Some(SpaceType::Young));

    young_gc(&mut m);
    let info = heap.region_info(root.get().unwrap().raw()).unwrap();
    assert_eq!(info.space, Some(SpaceType::Old));
    assert_eq!(heap.last_gc_metrics().unwrap().bytes_promoted, NODE_SIZE);
    assert_eq!(heap.verify(), 0);
}

#[test]
fn test_old_to_young_slot_is_remembered_and_updated() {
    let heap = new_heap(stw_config());
    let mut m = heap.attach();

    let holder = node(&mut m, SpaceType::Old);
    let _root = heap.root(Some(holder));
    let young = node(&mut m, SpaceType::Young);
    link(&m, holder, LEFT, Some(young));
    assert!(heap.old_to_new_contains(slot(holder, LEFT)));
    assert!(!heap.old_to_new_contains(slot(holder, RIGHT)));

    young_gc(&mut m);
    let moved = field(&m, holder, LEFT).unwrap();
    assert_ne!(moved, young);
    assert_eq!(
        heap.region_info(moved.raw()).unwrap().space,
        Some(SpaceType::Young)
    );
    assert!(heap.old_to_new_contains(slot(holder, LEFT)));

    // Promoted: the bit is no longer needed.
    young_gc(&mut m);
    let promoted = field(&m, holder, LEFT).unwrap();
    assert_eq!(
        heap.region_info(promoted.raw()).unwrap().space,
        Some(SpaceType::Old)
    );
    assert!(!heap.old_to_new_contains(slot(holder, LEFT)));
    assert_eq!(heap.verify(), 0);
}

#[test]
fn test_shared_structure_is_copied_once() {
    let heap = new_heap(stw_config());
    let mut m = heap.attach();

    let shared = node(&mut m, SpaceType::Young);
    let a = node(&mut m, SpaceType::Young);
    let b = node(&mut m, SpaceType::Young);
    link(&m, a, LEFT, Some(shared));
    link(&m, b, LEFT, Some(shared));
    link(&m, a, RIGHT, Some(b));
    let root = heap.root(Some(a));

    young_gc(&mut m);

    let a = root.get().unwrap();
    let b = field(&m, a, RIGHT).unwrap();
    assert_eq!(field(&m, a, LEFT), field(&m, b, LEFT));
    assert_eq!(heap.last_gc_metrics().unwrap().objects_copied, 3);
}

#[test]
fn test_cycle_survives_and_garbage_cycle_is_dropped() {
    let heap = new_heap(stw_config());
    let mut m = heap.attach();

    let a = node(&mut m, SpaceType::Young);
    let b = node(&mut m, SpaceType::Young);
    link(&m, a, LEFT, Some(b));
    link(&m, b, LEFT, Some(a));
    let c = node(&mut m, SpaceType::Young);
    let d = node(&mut m, SpaceType::Young);
    link(&m, c, LEFT, Some(d));
    link(&m, d, LEFT, Some(c));
    let root = heap.root(Some(a));

    young_gc(&mut m);

    let a = root.get().unwrap();
    let b = field(&m, a, LEFT).unwrap();
    assert_eq!(field(&m, b, LEFT), Some(a));
    assert_eq!(heap.last_gc_metrics().unwrap().objects_copied, 2);
}

#[test]
fn test_allocation_is_zeroed_after_reuse() {
    let heap = new_heap(stw_config());
    let mut m = heap.attach();

    for _ in 0..3 {
        for _ in 0..2000 {
            let obj = node(&mut m, SpaceType::Young);
            assert!(field(&m, obj, LEFT).is_none());
            assert!(field(&m, obj, RIGHT).is_none());
            link(&m, obj, LEFT, Some(obj));
        }
        young_gc(&mut m);
    }
}

#[test]
fn test_exhausting_young_space_collects() {
    let heap = new_heap(stw_config());
    let mut m = heap.attach();
    let root = heap.root(None);

    // Several times the semi space; only the newest node is rooted.
    for _ in 0..200_000 {
        let obj = node(&mut m, SpaceType::Young);
        root.set(Some(obj));
    }
    assert!(heap.stats().young_collections() > 0);
    assert_eq!(heap.verify(), 0);
}

#[test]
fn test_huge_objects_bypass_young_space() {
    let heap = new_heap(stw_config());
    let mut m = heap.attach();

    let len = heap.config().huge_object_threshold;
    let big = bytes(&mut m, SpaceType::Young, len, 0xAB);
    let root = heap.root(Some(big));
    assert_eq!(
        heap.region_info(big.raw()).unwrap().space,
        Some(SpaceType::Huge)
    );

    young_gc(&mut m);
    assert_eq!(root.get(), Some(big));
    assert_eq!(byte_at(big, len - 1), 0xAB);

    root.set(None);
    full_gc(&mut m);
    heap.wait_for_sweeping();
    assert!(!heap.is_alive(big.raw()));
}
