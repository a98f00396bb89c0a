//! Sweeping, with and without the task pool, and mutators racing the sweeper.

mod common;

use std::sync::atomic::{AtomicBool, Ordering};

use common::*;
use regent_gc::heap::region::REGION_SIZE;
use regent_gc::{HeapConfig, SpaceType};

const NODES_PER_REGION: usize = REGION_SIZE / NODE_SIZE;

fn sweep_config(concurrent: bool) -> HeapConfig {
    stw_config()
        .with_partial_compaction(false)
        .with_concurrent_sweep(concurrent)
}

/// Allocates `count` old nodes and keeps every `keep_every`th alive through
/// a chain hanging off the returned root.
fn fragmented_list(
    heap: &regent_gc::Heap,
    m: &mut regent_gc::Mutator,
    count: usize,
    keep_every: usize,
) -> regent_gc::Root {
    let head = node(m, SpaceType::NonMovable);
    let root = heap.root(Some(head));
    let mut tail = head;
    for i in 0..count {
        let obj = node(m, SpaceType::Old);
        if i % keep_every == 0 {
            link(m, tail, LEFT, Some(obj));
            tail = obj;
        }
    }
    root
}

fn chain_len(m: &regent_gc::Mutator, root: &regent_gc::Root) -> usize {
    let mut len = 0;
    let mut cursor = root.get();
    while let Some(obj) = cursor {
        len += 1;
        cursor = field(m, obj, LEFT);
    }
    len
}

#[test]
fn test_concurrent_sweep_frees_memory_for_reuse() {
    let heap = new_heap(sweep_config(true));
    let mut m = heap.attach();

    let root = fragmented_list(&heap, &mut m, 4 * NODES_PER_REGION, 4);
    let regions_before = heap.old_space_size();
    old_gc(&mut m);

    // Allocation right after the pause races the sweep tasks.
    for _ in 0..2 * NODES_PER_REGION {
        let _ = node(&mut m, SpaceType::Old);
    }
    heap.wait_for_sweeping();
    assert!(heap.old_space_size() <= regions_before);
    assert_eq!(chain_len(&m, &root), 1 + NODES_PER_REGION);
    assert_eq!(heap.verify(), 0);
}

#[test]
fn test_synchronous_sweep_finishes_inside_the_pause() {
    let heap = new_heap(sweep_config(false));
    let mut m = heap.attach();

    let root = fragmented_list(&heap, &mut m, 2 * NODES_PER_REGION, 2);
    old_gc(&mut m);

    // Nothing left for the task pool.
    let regions = heap.old_space_size();
    for _ in 0..NODES_PER_REGION / 2 {
        let _ = node(&mut m, SpaceType::Old);
    }
    assert_eq!(heap.old_space_size(), regions);
    assert_eq!(chain_len(&m, &root), 1 + NODES_PER_REGION);
}

#[test]
fn test_empty_regions_are_released() {
    let heap = new_heap(sweep_config(true));
    let mut m = heap.attach();

    for _ in 0..3 * NODES_PER_REGION {
        let _ = node(&mut m, SpaceType::Old);
    }
    let committed = heap.committed_bytes();
    old_gc(&mut m);
    heap.wait_for_sweeping();
    assert!(heap.committed_bytes() <= committed - 2 * REGION_SIZE);
    assert_eq!(heap.old_space_size(), 0);
}

#[test]
fn test_mutators_on_several_threads() {
    let heap = new_heap(test_config().with_concurrent_mark_tasks(2));
    let stop = AtomicBool::new(false);

    std::thread::scope(|scope| {
        for t in 0..3u8 {
            let heap = &heap;
            let stop = &stop;
            scope.spawn(move || {
                let mut m = heap.attach();
                let data = bytes(&mut m, SpaceType::Old, 64, t);
                let root = heap.root(Some(data));
                let list = heap.root(None);
                let mut rounds = 0usize;
                while !stop.load(Ordering::Relaxed) || rounds < 1000 {
                    let obj = node(&mut m, SpaceType::Young);
                    link(&m, obj, LEFT, list.get());
                    list.set(Some(obj));
                    if rounds % 100 == 0 {
                        list.set(None);
                    }
                    rounds += 1;
                }
                let data = root.get().unwrap();
                assert!((0..64).all(|i| byte_at(data, i) == t));
            });
        }

        let mut m = heap.attach();
        for _ in 0..5 {
            young_gc(&mut m);
            old_gc(&mut m);
        }
        full_gc(&mut m);
        stop.store(true, Ordering::Relaxed);
        // The other mutators may still need a pause while we wait for them.
        drop(m);
    });
    assert_eq!(heap.verify(), 0);
}
