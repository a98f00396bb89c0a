//! Marking work distribution.
//!
//! Each worker owns a [`WorkerHolder`] with two fixed-capacity
//! [`WorkNode`]s: pushes go to the *in* node, pops come from the *out*
//! node, and the two swap when the out node runs dry. A full in node is
//! published to the [`GlobalWorkStack`] where idle workers steal it.
//! Objects shaded by the write barrier go through a separate lock-free queue.
//!
//! The union of every node plus the barrier queue is the gray set: objects
//! marked but not yet scanned.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crossbeam_queue::SegQueue;
use parking_lot::{Mutex, MutexGuard};

use crate::heap::tlab::Tlab;
use crate::object::{Address, ObjectSlot};

/// Objects per work node.
pub(crate) const NODE_CAPACITY: usize = 256;

/// A fixed-capacity stack of gray objects.
#[derive(Debug)]
pub(crate) struct WorkNode {
    items: Vec<Address>,
}

impl WorkNode {
    pub(crate) fn new() -> Box<Self> {
        Box::new(Self {
            items: Vec::with_capacity(NODE_CAPACITY),
        })
    }

    /// Pushes `obj`. Returns false when the node is full.
    #[inline]
    pub(crate) fn push(&mut self, obj: Address) -> bool {
        if self.items.len() == NODE_CAPACITY {
            return false;
        }
        self.items.push(obj);
        true
    }

    #[inline]
    pub(crate) fn pop(&mut self) -> Option<Address> {
        self.items.pop()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.items.len()
    }
}

/// Lock-protected stack of published work nodes.
#[derive(Debug, Default)]
pub(crate) struct GlobalWorkStack {
    nodes: Mutex<Vec<Box<WorkNode>>>,
    len: AtomicUsize,
}

impl GlobalWorkStack {
    pub(crate) fn push(&self, node: Box<WorkNode>) {
        let mut nodes = self.nodes.lock();
        nodes.push(node);
        self.len.store(nodes.len(), Ordering::Release);
    }

    pub(crate) fn pop(&self) -> Option<Box<WorkNode>> {
        if self.is_empty() {
            return None;
        }
        let mut nodes = self.nodes.lock();
        let node = nodes.pop();
        self.len.store(nodes.len(), Ordering::Release);
        node
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len.load(Ordering::Acquire) == 0
    }
}

/// Per-worker evacuation counters.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct EvacuationStats {
    pub(crate) bytes_copied: usize,
    pub(crate) bytes_promoted: usize,
    pub(crate) objects_copied: usize,
}

impl EvacuationStats {
    fn merge(&mut self, other: Self) {
        self.bytes_copied += other.bytes_copied;
        self.bytes_promoted += other.bytes_promoted;
        self.objects_copied += other.objects_copied;
    }
}

/// Everything one GC worker owns during a collection.
#[derive(Debug)]
pub(crate) struct WorkerHolder {
    in_node: Box<WorkNode>,
    out_node: Box<WorkNode>,
    /// Weak slots met while tracing, resolved after marking.
    pub(crate) weak_slots: Vec<ObjectSlot>,
    /// Objects this worker copied whose slots still need updating.
    pub(crate) copied: Vec<Address>,
    pub(crate) young_tlab: Tlab,
    pub(crate) old_tlab: Tlab,
    pub(crate) stats: EvacuationStats,
}

impl WorkerHolder {
    fn new() -> Self {
        Self {
            in_node: WorkNode::new(),
            out_node: WorkNode::new(),
            weak_slots: Vec::new(),
            copied: Vec::new(),
            young_tlab: Tlab::new(),
            old_tlab: Tlab::new(),
            stats: EvacuationStats::default(),
        }
    }

    /// True if both local nodes are empty.
    pub(crate) fn is_empty(&self) -> bool {
        self.in_node.is_empty() && self.out_node.is_empty()
    }
}

/// Work queues of one heap's collector.
pub(crate) struct WorkManager {
    holders: Box<[Mutex<WorkerHolder>]>,
    global: GlobalWorkStack,
    node_pool: Mutex<Vec<Box<WorkNode>>>,
    barrier_queue: SegQueue<Address>,
    idle_ids: Mutex<Vec<usize>>,
    cancelled: AtomicBool,
}

impl WorkManager {
    /// Creates `workers` holders. Holder 0 belongs to the collecting thread.
    pub(crate) fn new(workers: usize) -> Self {
        let workers = workers.max(1);
        Self {
            holders: (0..workers).map(|_| Mutex::new(WorkerHolder::new())).collect(),
            global: GlobalWorkStack::default(),
            node_pool: Mutex::new(Vec::new()),
            barrier_queue: SegQueue::new(),
            idle_ids: Mutex::new((1..workers).rev().collect()),
            cancelled: AtomicBool::new(false),
        }
    }

    pub(crate) fn workers(&self) -> usize {
        self.holders.len()
    }

    /// Locks the holder of worker `id`.
    pub(crate) fn holder(&self, id: usize) -> MutexGuard<'_, WorkerHolder> {
        self.holders[id].lock()
    }

    fn fresh_node(&self) -> Box<WorkNode> {
        self.node_pool.lock().pop().unwrap_or_else(WorkNode::new)
    }

    fn recycle(&self, node: Box<WorkNode>) {
        debug_assert!(node.is_empty());
        self.node_pool.lock().push(node);
    }

    /// Pushes a gray object, publishing the local node when it fills up.
    ///
    /// Publishing wakes nobody. Workers that already ran dry have exited, and
    /// the node is taken by a worker still popping, at the latest the pusher
    /// itself once its local nodes are empty. Remark drains whatever is left.
    #[inline]
    pub(crate) fn push(&self, holder: &mut WorkerHolder, obj: Address) {
        if holder.in_node.push(obj) {
            return;
        }
        let full = std::mem::replace(&mut holder.in_node, self.fresh_node());
        self.global.push(full);
        let pushed = holder.in_node.push(obj);
        debug_assert!(pushed);
    }

    /// Pops the next gray object: local nodes first, then a stolen node.
    #[inline]
    pub(crate) fn pop(&self, holder: &mut WorkerHolder) -> Option<Address> {
        if let Some(obj) = holder.out_node.pop() {
            return Some(obj);
        }
        if !holder.in_node.is_empty() {
            std::mem::swap(&mut holder.in_node, &mut holder.out_node);
            return holder.out_node.pop();
        }
        let stolen = self.global.pop()?;
        let empty = std::mem::replace(&mut holder.out_node, stolen);
        self.recycle(empty);
        holder.out_node.pop()
    }

    /// Publishes the holder's local work so other workers can take it.
    pub(crate) fn flush(&self, holder: &mut WorkerHolder) {
        for node in [&mut holder.in_node, &mut holder.out_node] {
            if !node.is_empty() {
                let full = std::mem::replace(node, self.fresh_node());
                self.global.push(full);
            }
        }
    }

    pub(crate) fn has_global_work(&self) -> bool {
        !self.global.is_empty()
    }

    /// Queues an object shaded by the write barrier.
    pub(crate) fn push_barrier(&self, obj: Address) {
        self.barrier_queue.push(obj);
    }

    pub(crate) fn pop_barrier(&self) -> Option<Address> {
        self.barrier_queue.pop()
    }

    /// Moves barrier-shaded objects into `holder`.
    pub(crate) fn drain_barrier_queue(&self, holder: &mut WorkerHolder) -> usize {
        let mut moved = 0;
        while let Some(obj) = self.barrier_queue.pop() {
            self.push(holder, obj);
            moved += 1;
        }
        moved
    }

    /// Takes a holder id for a background task.
    pub(crate) fn acquire_worker_id(&self) -> Option<usize> {
        self.idle_ids.lock().pop()
    }

    pub(crate) fn release_worker_id(&self, id: usize) {
        debug_assert!(id != 0);
        self.idle_ids.lock().push(id);
    }

    /// Asks background tasks to stop at the next object.
    pub(crate) fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Takes every recorded weak slot.
    pub(crate) fn take_weak_slots(&self) -> Vec<ObjectSlot> {
        let mut slots = Vec::new();
        for holder in &*self.holders {
            slots.append(&mut holder.lock().weak_slots);
        }
        slots
    }

    /// Takes every copied object recorded for reference updating.
    pub(crate) fn take_copied(&self) -> Vec<Address> {
        let mut copied = Vec::new();
        for holder in &*self.holders {
            copied.append(&mut holder.lock().copied);
        }
        copied
    }

    /// Sums and resets the evacuation counters.
    pub(crate) fn take_stats(&self) -> EvacuationStats {
        let mut total = EvacuationStats::default();
        for holder in &*self.holders {
            total.merge(std::mem::take(&mut holder.lock().stats));
        }
        total
    }

    /// Drops every queued object and per-cycle record.
    pub(crate) fn reset(&self) {
        while let Some(mut node) = self.global.pop() {
            node.items.clear();
            self.recycle(node);
        }
        while self.barrier_queue.pop().is_some() {}
        for holder in &*self.holders {
            let mut holder = holder.lock();
            holder.in_node.items.clear();
            holder.out_node.items.clear();
            holder.weak_slots.clear();
            holder.copied.clear();
            holder.stats = EvacuationStats::default();
        }
        self.cancelled.store(false, Ordering::Release);
    }

    /// Snapshot of the gray set. Only meaningful while no worker runs.
    pub(crate) fn gray_objects(&self) -> Vec<Address> {
        let mut gray = Vec::new();
        for holder in &*self.holders {
            let holder = holder.lock();
            gray.extend_from_slice(&holder.in_node.items);
            gray.extend_from_slice(&holder.out_node.items);
        }
        for node in self.global.nodes.lock().iter() {
            gray.extend_from_slice(&node.items);
        }
        // SegQueue has no iterator; cycle the queue once.
        let len = self.barrier_queue.len();
        for _ in 0..len {
            if let Some(obj) = self.barrier_queue.pop() {
                gray.push(obj);
                self.barrier_queue.push(obj);
            }
        }
        gray
    }

    /// Iterates the holders.
    pub(crate) fn holders(&self) -> impl Iterator<Item = &Mutex<WorkerHolder>> {
        self.holders.iter()
    }
}
