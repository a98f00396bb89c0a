//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use regent_gc::descriptor::{DescriptorModel, TypeDescriptor, ARRAY_DATA_OFFSET};
use regent_gc::{
    Address, GcReason, Heap, HeapConfig, Mutator, ObjectModel, ObjectSlot, SpaceType,
    TriggerGcType, WORD_SIZE,
};

/// Two reference fields, at `LEFT` and `RIGHT`.
pub static NODE: TypeDescriptor = TypeDescriptor::fixed("Node", NODE_SIZE, &[LEFT, RIGHT]);
pub static REFS: TypeDescriptor = TypeDescriptor::ref_array("Refs");
pub static BYTES: TypeDescriptor = TypeDescriptor::byte_array("Bytes");

pub const NODE_SIZE: usize = 24;
pub const LEFT: usize = 8;
pub const RIGHT: usize = 16;

pub fn model() -> Arc<dyn ObjectModel> {
    Arc::new(DescriptorModel)
}

/// Small heap with verification on and a fixed number of GC threads.
pub fn test_config() -> HeapConfig {
    HeapConfig::default()
        .with_max_heap_size(64 * 1024 * 1024)
        .with_semi_space_capacity(1024 * 1024)
        .with_parallel_gc_threads(2)
        .with_concurrent_mark_tasks(1)
        .with_verify_heap(true)
}

/// Like [`test_config`] but marking only happens inside pauses.
pub fn stw_config() -> HeapConfig {
    test_config().with_concurrent_mark(false)
}

pub fn new_heap(config: HeapConfig) -> Heap {
    Heap::new(config, model()).expect("heap")
}

pub fn node(m: &mut Mutator, space: SpaceType) -> Address {
    let obj = m.allocate(space, NODE_SIZE).expect("allocate node");
    NODE.write_header(obj);
    obj
}

pub fn refs(m: &mut Mutator, space: SpaceType, len: usize) -> Address {
    let obj = m
        .allocate(space, REFS.instance_size(len))
        .expect("allocate refs");
    REFS.initialize(obj, len);
    obj
}

/// A byte array filled with `fill`.
pub fn bytes(m: &mut Mutator, space: SpaceType, len: usize, fill: u8) -> Address {
    let obj = m
        .allocate(space, BYTES.instance_size(len))
        .expect("allocate bytes");
    BYTES.initialize(obj, len);
    unsafe { std::ptr::write_bytes((obj.raw() + ARRAY_DATA_OFFSET) as *mut u8, fill, len) };
    obj
}

pub fn byte_at(obj: Address, index: usize) -> u8 {
    unsafe { *((obj.raw() + ARRAY_DATA_OFFSET + index) as *const u8) }
}

pub fn element_offset(index: usize) -> usize {
    ARRAY_DATA_OFFSET + index * WORD_SIZE
}

pub fn link(m: &Mutator, from: Address, offset: usize, to: Option<Address>) {
    unsafe { m.write_field(from, offset, to) };
}

pub fn weak_link(m: &Mutator, from: Address, offset: usize, to: Option<Address>) {
    unsafe { m.write_weak_field(from, offset, to) };
}

pub fn field(m: &Mutator, obj: Address, offset: usize) -> Option<Address> {
    unsafe { m.read_field(obj, offset) }
}

pub fn slot(obj: Address, offset: usize) -> ObjectSlot {
    unsafe { obj.field(offset) }
}

pub fn young_gc(m: &mut Mutator) {
    m.request_collection(TriggerGcType::Young, GcReason::HintGc);
}

pub fn old_gc(m: &mut Mutator) {
    m.request_collection(TriggerGcType::Old, GcReason::HintGc);
}

pub fn full_gc(m: &mut Mutator) {
    m.request_collection(TriggerGcType::Full, GcReason::HintGc);
}
