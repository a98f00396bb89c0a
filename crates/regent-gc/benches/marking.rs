//! Benchmark: old-generation marking and compaction.
//!
//! Compares a stop-the-world partial collection with a full compaction on
//! the same object graph, and measures the concurrent marking start pause.

use std::hint::black_box;
use std::sync::Arc;

use criterion::{criterion_group, criterion_main, Criterion};
use regent_gc::descriptor::{DescriptorModel, TypeDescriptor};
use regent_gc::{Address, GcReason, Heap, HeapConfig, Mutator, Root, SpaceType, TriggerGcType};

static NODE: TypeDescriptor = TypeDescriptor::fixed("Node", 24, &[8, 16]);

const TREE_DEPTH: u32 = 14;

fn heap(concurrent: bool) -> Heap {
    let config = HeapConfig::default()
        .with_max_heap_size(256 * 1024 * 1024)
        .with_concurrent_mark(concurrent)
        .with_verify_heap(false);
    Heap::new(config, Arc::new(DescriptorModel)).unwrap()
}

/// A complete binary tree of old nodes.
fn tree(m: &mut Mutator, depth: u32) -> Address {
    let obj = m.allocate(SpaceType::Old, 24).unwrap();
    NODE.write_header(obj);
    if depth > 0 {
        let left = tree(m, depth - 1);
        let right = tree(m, depth - 1);
        unsafe {
            m.write_field(obj, 8, Some(left));
            m.write_field(obj, 16, Some(right));
        }
    }
    obj
}

fn setup(concurrent: bool) -> (Heap, Mutator, Root) {
    let heap = heap(concurrent);
    let mut m = heap.attach();
    let root = heap.root(Some(tree(&mut m, TREE_DEPTH)));
    (heap, m, root)
}

fn bench_partial(c: &mut Criterion) {
    c.bench_function("partial_gc_binary_tree", |b| {
        let (heap, mut m, root) = setup(false);
        b.iter(|| {
            m.request_collection(TriggerGcType::Old, GcReason::HintGc);
            heap.wait_for_sweeping();
            black_box(root.get());
        });
    });
}

fn bench_full(c: &mut Criterion) {
    c.bench_function("full_gc_binary_tree", |b| {
        let (heap, mut m, root) = setup(false);
        b.iter(|| {
            m.request_collection(TriggerGcType::Full, GcReason::HintGc);
            heap.wait_for_sweeping();
            black_box(root.get());
        });
    });
}

fn bench_concurrent_cycle(c: &mut Criterion) {
    c.bench_function("concurrent_mark_cycle_binary_tree", |b| {
        let (heap, mut m, root) = setup(true);
        b.iter(|| {
            m.request_collection(TriggerGcType::Old, GcReason::AllocationLimit);
            m.request_collection(TriggerGcType::Old, GcReason::HintGc);
            heap.wait_for_sweeping();
            black_box(root.get());
        });
    });
}

criterion_group!(benches, bench_partial, bench_full, bench_concurrent_cycle);
criterion_main!(benches);
