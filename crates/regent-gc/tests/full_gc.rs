//! Full (compacting) collections, app-spawn pinning and out-of-memory handling.

mod common;

use common::*;
use regent_gc::heap::region::{RegionFlags, REGION_SIZE};
use regent_gc::{GcReason, HeapError, SpaceType, TriggerGcType};

#[test]
fn test_full_gc_moves_old_objects_and_preserves_contents() {
    let heap = new_heap(stw_config());
    let mut m = heap.attach();

    let holder = node(&mut m, SpaceType::Old);
    let data = bytes(&mut m, SpaceType::Old, 300, 0x33);
    link(&m, holder, LEFT, Some(data));
    let root = heap.root(Some(holder));

    full_gc(&mut m);

    let moved = root.get().unwrap();
    assert_ne!(moved, holder);
    let data2 = field(&m, moved, LEFT).unwrap();
    assert_ne!(data2, data);
    assert!((0..300).all(|i| byte_at(data2, i) == 0x33));
    assert_eq!(heap.stats().full_collections(), 1);
    assert_eq!(heap.verify(), 0);
}

#[test]
fn test_full_gc_reclaims_garbage_and_empties_young_space() {
    let heap = new_heap(stw_config());
    let mut m = heap.attach();

    let keep = node(&mut m, SpaceType::Young);
    let root = heap.root(Some(keep));
    for _ in 0..20_000 {
        let _ = node(&mut m, SpaceType::Old);
        let _ = node(&mut m, SpaceType::Young);
    }
    let before = heap.committed_bytes();

    full_gc(&mut m);
    heap.wait_for_sweeping();

    assert!(heap.committed_bytes() < before);
    let kept = root.get().unwrap();
    assert_eq!(
        heap.region_info(kept.raw()).unwrap().space,
        Some(SpaceType::Old)
    );
    assert!(heap.old_space_size() <= REGION_SIZE);
    let metrics = heap.last_gc_metrics().unwrap();
    assert_eq!(metrics.objects_copied, 1);
    assert!(metrics.bytes_reclaimed() > 0);
}

#[test]
fn test_non_movable_objects_stay_put() {
    let heap = new_heap(stw_config());
    let mut m = heap.attach();

    let pinned = node(&mut m, SpaceType::NonMovable);
    let root = heap.root(Some(pinned));
    let child = node(&mut m, SpaceType::Old);
    link(&m, pinned, LEFT, Some(child));

    full_gc(&mut m);
    assert_eq!(root.get(), Some(pinned));
    let child2 = field(&m, pinned, LEFT).unwrap();
    assert_ne!(child2, child);
    assert!(heap.is_alive(child2.raw()));
}

#[test]
fn test_read_only_objects_are_never_collected() {
    let heap = new_heap(stw_config());
    let mut m = heap.attach();

    let constant = bytes(&mut m, SpaceType::ReadOnly, 64, 0x11);
    full_gc(&mut m);
    heap.wait_for_sweeping();
    assert!(heap.is_alive(constant.raw()));
    assert_eq!(byte_at(constant, 63), 0x11);
}

#[test]
fn test_read_only_objects_larger_than_a_region_are_rejected() {
    let heap = new_heap(stw_config());
    let mut m = heap.attach();

    let err = m.allocate(SpaceType::ReadOnly, REGION_SIZE + 8).unwrap_err();
    assert!(matches!(
        err,
        HeapError::ObjectTooLarge {
            space: SpaceType::ReadOnly,
            ..
        }
    ));
}

#[test]
fn test_app_spawn_regions_are_not_compacted_again() {
    let heap = new_heap(stw_config());
    let mut m = heap.attach();

    let obj = node(&mut m, SpaceType::Old);
    let root = heap.root(Some(obj));
    m.request_collection(TriggerGcType::AppSpawnFull, GcReason::HintGc);

    let pinned = root.get().unwrap();
    assert_ne!(pinned, obj);
    let info = heap.region_info(pinned.raw()).unwrap();
    assert!(info.flags.contains(RegionFlags::APP_SPAWN));

    full_gc(&mut m);
    assert_eq!(root.get(), Some(pinned));
    old_gc(&mut m);
    assert_eq!(root.get(), Some(pinned));
    assert_eq!(heap.verify(), 0);
}

#[test]
fn test_non_movable_exhaustion_reports_out_of_memory() {
    let config = stw_config()
        .with_max_heap_size(8 * REGION_SIZE)
        .with_semi_space_capacity(REGION_SIZE);
    let heap = new_heap(config);
    let mut m = heap.attach();

    let chunk = REGION_SIZE / 4;
    let mut roots = Vec::new();
    let err = loop {
        match m.allocate(SpaceType::NonMovable, chunk) {
            Ok(obj) => {
                BYTES.initialize(obj, chunk - 16);
                roots.push(heap.root(Some(obj)));
            }
            Err(err) => break err,
        }
        assert!(roots.len() < 64, "the heap never filled up");
    };
    assert!(matches!(
        err,
        HeapError::OutOfMemory {
            space: SpaceType::NonMovable,
            ..
        }
    ));
    assert!(heap.stats().full_collections() >= 1);

    // Dropping the roots makes the memory reclaimable again.
    roots.clear();
    assert!(m.allocate(SpaceType::NonMovable, chunk).is_ok());
}
