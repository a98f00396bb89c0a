//! Concurrent marking: start, barrier shading, remark and escalation.

mod common;

use std::time::{Duration, Instant};

use common::*;
use regent_gc::{GcReason, MarkStatus, SpaceType, TriggerGcType};

/// Marking that never progresses in the background, so tests observe the
/// `Marking` state deterministically.
fn paused_marking_config() -> regent_gc::HeapConfig {
    test_config()
        .with_concurrent_mark(true)
        .with_concurrent_mark_tasks(0)
}

fn start_marking(m: &mut regent_gc::Mutator) {
    m.request_collection(TriggerGcType::Old, GcReason::AllocationLimit);
}

#[test]
fn test_allocation_limit_starts_concurrent_marking() {
    let heap = new_heap(paused_marking_config());
    let mut m = heap.attach();
    let root = heap.root(Some(node(&mut m, SpaceType::Old)));

    start_marking(&mut m);
    assert_eq!(heap.mark_status(), MarkStatus::Marking);
    assert_eq!(heap.stats().concurrent_marks(), 1);
    // Starting a cycle is not a collection.
    assert_eq!(heap.stats().total_collections(), 0);
    assert!(heap.is_marked(root.get().unwrap()));

    old_gc(&mut m);
    assert_eq!(heap.mark_status(), MarkStatus::ReadyToMark);
    assert_eq!(heap.stats().partial_collections(), 1);
    assert_eq!(heap.verify(), 0);
}

#[test]
fn test_barrier_shades_stored_object() {
    let heap = new_heap(paused_marking_config());
    let mut m = heap.attach();

    let a = node(&mut m, SpaceType::Old);
    let d = node(&mut m, SpaceType::Old);
    let c = node(&mut m, SpaceType::Old);
    link(&m, d, LEFT, Some(c));
    let root_a = heap.root(Some(a));
    let root_d = heap.root(Some(d));

    start_marking(&mut m);
    assert!(!heap.is_marked(c));
    // Unmarked objects are not known dead until the cycle ends.
    assert!(heap.is_alive(c.raw()));

    // Move the only path to `c` behind `a` and cut the old one.
    link(&m, a, LEFT, Some(c));
    link(&m, d, LEFT, None);
    assert!(heap.is_marked(c));
    assert!(heap.gray_objects().contains(&c));

    old_gc(&mut m);
    let a = root_a.get().unwrap();
    assert!(field(&m, a, LEFT).is_some());
    assert!(field(&m, root_d.get().unwrap(), LEFT).is_none());
    assert_eq!(heap.verify(), 0);
}

#[test]
fn test_objects_allocated_during_marking_survive() {
    let heap = new_heap(paused_marking_config());
    let mut m = heap.attach();
    let holder = node(&mut m, SpaceType::Old);
    let root = heap.root(Some(holder));

    start_marking(&mut m);
    let fresh_old = node(&mut m, SpaceType::Old);
    let fresh_young = node(&mut m, SpaceType::Young);
    assert!(heap.is_marked(fresh_old));
    assert!(heap.is_marked(fresh_young));
    link(&m, holder, LEFT, Some(fresh_old));
    link(&m, holder, RIGHT, Some(fresh_young));

    old_gc(&mut m);
    let holder = root.get().unwrap();
    assert!(field(&m, holder, LEFT).is_some());
    assert!(field(&m, holder, RIGHT).is_some());
    assert_eq!(heap.verify(), 0);
}

#[test]
fn test_young_request_escalates_while_marking() {
    let heap = new_heap(paused_marking_config());
    let mut m = heap.attach();
    let _root = heap.root(Some(node(&mut m, SpaceType::Old)));

    start_marking(&mut m);
    young_gc(&mut m);

    let metrics = heap.last_gc_metrics().unwrap();
    assert_eq!(metrics.gc_type, TriggerGcType::Old);
    assert_eq!(heap.mark_status(), MarkStatus::ReadyToMark);
}

#[test]
fn test_full_gc_aborts_marking() {
    let heap = new_heap(paused_marking_config());
    let mut m = heap.attach();
    let root = heap.root(Some(node(&mut m, SpaceType::Old)));

    start_marking(&mut m);
    full_gc(&mut m);

    assert_eq!(heap.mark_status(), MarkStatus::ReadyToMark);
    assert_eq!(heap.last_gc_metrics().unwrap().gc_type, TriggerGcType::Full);
    assert!(heap.is_alive(root.get().unwrap().raw()));
    assert_eq!(heap.verify(), 0);
}

#[test]
fn test_background_tasks_finish_marking() {
    let config = test_config()
        .with_concurrent_mark(true)
        .with_concurrent_mark_tasks(2);
    let heap = new_heap(config);
    let mut m = heap.attach();

    // A long list so the background tasks have something to trace.
    let head = node(&mut m, SpaceType::Old);
    let root = heap.root(Some(head));
    let mut tail = head;
    for _ in 0..10_000 {
        let next = node(&mut m, SpaceType::Old);
        link(&m, tail, LEFT, Some(next));
        tail = next;
    }

    start_marking(&mut m);
    let deadline = Instant::now() + Duration::from_secs(10);
    while heap.mark_status() != MarkStatus::MarkFinished && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(1));
    }
    assert_eq!(heap.mark_status(), MarkStatus::MarkFinished);
    assert!(heap.is_marked(tail));

    // Idle time finishes the cycle.
    m.notify_idle();
    assert_eq!(heap.mark_status(), MarkStatus::ReadyToMark);

    let mut count = 0;
    let mut cursor = root.get();
    while let Some(obj) = cursor {
        count += 1;
        cursor = field(&m, obj, LEFT);
    }
    assert_eq!(count, 10_001);
}

#[test]
fn test_old_limit_triggers_marking_from_allocation() {
    let config = paused_marking_config().with_old_space_limit(2 * 1024 * 1024);
    let heap = new_heap(config);
    let mut m = heap.attach();
    let list = refs(&mut m, SpaceType::Old, 16);
    let _root = heap.root(Some(list));

    let mut started = false;
    for i in 0..200_000 {
        let obj = node(&mut m, SpaceType::Old);
        link(&m, list, element_offset(i % 16), Some(obj));
        if heap.mark_status() != MarkStatus::ReadyToMark {
            started = true;
            break;
        }
    }
    assert!(started, "crossing the old-space limit starts marking");
    assert_eq!(heap.stats().concurrent_marks(), 1);
}

#[test]
fn test_racing_stores_to_one_field_are_both_shaded() {
    let heap = new_heap(paused_marking_config());
    let mut m = heap.attach();

    let holder = node(&mut m, SpaceType::Old);
    let _root = heap.root(Some(holder));
    // Unreachable until stored, and unmarked when marking starts.
    let first = node(&mut m, SpaceType::Young);
    let second = node(&mut m, SpaceType::Young);

    start_marking(&mut m);
    assert!(!heap.is_marked(first));
    assert!(!heap.is_marked(second));

    m.blocking(|| {
        std::thread::scope(|scope| {
            for value in [first, second] {
                let heap = &heap;
                scope.spawn(move || {
                    let writer = heap.attach();
                    link(&writer, holder, LEFT, Some(value));
                });
            }
        });
    });

    assert!(heap.old_to_new_contains(slot(holder, LEFT)));
    let gray = heap.gray_objects();
    assert!(gray.contains(&first));
    assert!(gray.contains(&second));
    let stored = field(&m, holder, LEFT).unwrap();
    assert!(stored == first || stored == second);

    old_gc(&mut m);
    let survivor = field(&m, holder, LEFT).unwrap();
    assert!(heap.is_alive(survivor.raw()));
    assert_eq!(heap.verify(), 0);
}
