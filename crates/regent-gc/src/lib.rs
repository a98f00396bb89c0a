//! A region-based heap with a generational, concurrent and compacting
//! garbage collector, for language runtimes.
//!
//! `regent-gc` manages the memory of a managed runtime. The embedder
//! describes its object layout through [`ObjectModel`], allocates through a
//! per-thread [`Mutator`] and keeps objects alive through [`Root`]s. The heap
//! takes care of the rest:
//!
//! - **Young collections** copy survivors between two semi-spaces and promote
//!   objects that already survived once.
//! - **Concurrent marking** traces the old generation on a task pool while
//!   mutators run, guarded by an incremental-update write barrier.
//! - **Partial collections** finish marking, evacuate the young generation
//!   plus the sparsest old regions and sweep the rest concurrently.
//! - **Full collections** compact every movable object.
//! - A [`SharedHeap`] can be attached to several heaps; its collector runs
//!   on its own thread and stops the runtimes through a handshake.
//!
//! # Quick Start
//!
//! ```
//! use std::sync::Arc;
//! use regent_gc::descriptor::{DescriptorModel, TypeDescriptor};
//! use regent_gc::{GcReason, Heap, HeapConfig, SpaceType, TriggerGcType};
//!
//! // 8-byte header, then one reference field.
//! static PAIR: TypeDescriptor = TypeDescriptor::fixed("Pair", 16, &[8]);
//!
//! let heap = Heap::new(HeapConfig::default(), Arc::new(DescriptorModel)).unwrap();
//! let mut mutator = heap.attach();
//!
//! let a = mutator.allocate(SpaceType::Young, 16).unwrap();
//! PAIR.write_header(a);
//! let b = mutator.allocate(SpaceType::Young, 16).unwrap();
//! PAIR.write_header(b);
//! unsafe { mutator.write_field(a, 8, Some(b)) };
//!
//! let root = heap.root(Some(a));
//! mutator.request_collection(TriggerGcType::Young, GcReason::HintGc);
//!
//! let a = root.get().unwrap();
//! assert!(unsafe { mutator.read_field(a, 8) }.is_some());
//! ```
//!
//! # Threads
//!
//! A [`Mutator`] is bound to the thread that attached it and must call
//! [`Mutator::safepoint`] regularly (allocation does so implicitly).
//! Code that blocks for a long time runs inside [`Mutator::blocking`].

#![warn(missing_docs)]
#![allow(clippy::module_name_repetitions)]

mod config;
pub mod descriptor;
mod error;
mod gc;
pub mod heap;
pub mod metrics;
mod object;
mod roots;
mod shared;
mod sync;
mod task;
pub mod tracing;

pub use config::{HeapConfig, SharedHeapConfig};
pub use error::{HeapError, Result};
pub use gc::mark::GcBitset;
pub use gc::{GcPhase, GcReason, MarkStatus, TriggerGcType};
pub use heap::{Heap, Mutator, RegionInfo, SpaceType};
pub use metrics::{GcMetrics, GcStats};
pub use object::{
    align_object_size, Address, ClassWord, ObjectModel, ObjectSlot, OBJECT_ALIGNMENT, WEAK_TAG,
    WORD_SIZE,
};
pub use roots::{Root, RootProvider};
pub use shared::SharedHeap;
pub use task::available_parallelism;
