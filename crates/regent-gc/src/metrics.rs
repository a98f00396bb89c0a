//! GC metrics and statistics.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use crate::gc::state::{GcReason, TriggerGcType};

/// Statistics from the most recent garbage collection.
#[derive(Debug, Clone, Copy)]
pub struct GcMetrics {
    /// Kind of collection that ran (after escalation).
    pub gc_type: TriggerGcType,
    /// Why the collection was requested.
    pub reason: GcReason,
    /// Duration of the pause.
    pub duration: Duration,
    /// Duration of the marking part of the pause.
    pub mark_duration: Duration,
    /// Duration of evacuation and reference updating.
    pub evacuate_duration: Duration,
    /// Duration of the sweep part of the pause (preparation only when sweeping concurrently).
    pub sweep_duration: Duration,
    /// Heap bytes in use before the collection.
    pub heap_bytes_before: usize,
    /// Heap bytes in use after the collection.
    pub heap_bytes_after: usize,
    /// Bytes copied by evacuation.
    pub bytes_copied: usize,
    /// Bytes copied from the young generation into old space.
    pub bytes_promoted: usize,
    /// Number of objects evacuated.
    pub objects_copied: usize,
    /// Regions returned to the free pool.
    pub regions_freed: usize,
    /// Number of old regions evacuated as the collection set.
    pub cset_regions: usize,
    /// Collections of this heap so far, including this one.
    pub total_collections: usize,
}

impl Default for GcMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl GcMetrics {
    /// Create a new `GcMetrics` with all fields set to zero/defaults.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            gc_type: TriggerGcType::Young,
            reason: GcReason::Other,
            duration: Duration::ZERO,
            mark_duration: Duration::ZERO,
            evacuate_duration: Duration::ZERO,
            sweep_duration: Duration::ZERO,
            heap_bytes_before: 0,
            heap_bytes_after: 0,
            bytes_copied: 0,
            bytes_promoted: 0,
            objects_copied: 0,
            regions_freed: 0,
            cset_regions: 0,
            total_collections: 0,
        }
    }

    /// Bytes the collection gave back, saturating at zero.
    #[must_use]
    pub const fn bytes_reclaimed(&self) -> usize {
        self.heap_bytes_before.saturating_sub(self.heap_bytes_after)
    }
}

/// Internal helper for capturing phase durations.
///
/// ```
/// use regent_gc::metrics::PhaseTimer;
///
/// let mut timer = PhaseTimer::new();
/// timer.start();
/// // ... mark phase work ...
/// timer.end_mark();
///
/// timer.start();
/// // ... evacuation work ...
/// timer.end_evacuate();
/// ```
#[derive(Debug, Clone, Copy)]
pub struct PhaseTimer {
    /// Accumulated mark phase time.
    pub mark: Duration,
    /// Accumulated evacuation phase time.
    pub evacuate: Duration,
    /// Accumulated sweep phase time.
    pub sweep: Duration,
    /// Start time of current phase.
    current_start: Option<Instant>,
}

impl Default for PhaseTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl PhaseTimer {
    /// Create a new `PhaseTimer` with all durations set to zero.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            mark: Duration::ZERO,
            evacuate: Duration::ZERO,
            sweep: Duration::ZERO,
            current_start: None,
        }
    }

    /// Start timing a phase.
    pub fn start(&mut self) {
        self.current_start = Some(Instant::now());
    }

    /// End the mark phase and add its duration.
    pub fn end_mark(&mut self) {
        if let Some(start) = self.current_start.take() {
            self.mark += start.elapsed();
        }
    }

    /// End the evacuation phase and add its duration.
    pub fn end_evacuate(&mut self) {
        if let Some(start) = self.current_start.take() {
            self.evacuate += start.elapsed();
        }
    }

    /// End the sweep phase and add its duration.
    pub fn end_sweep(&mut self) {
        if let Some(start) = self.current_start.take() {
            self.sweep += start.elapsed();
        }
    }
}

/// Cumulative statistics of one heap.
///
/// ```
/// use regent_gc::metrics::GcStats;
///
/// let stats = GcStats::new();
/// assert_eq!(stats.total_collections(), 0);
/// ```
#[derive(Debug)]
pub struct GcStats {
    collections: AtomicUsize,
    young_collections: AtomicUsize,
    partial_collections: AtomicUsize,
    full_collections: AtomicUsize,
    shared_collections: AtomicUsize,
    concurrent_marks: AtomicUsize,
    bytes_reclaimed: AtomicUsize,
    bytes_promoted: AtomicUsize,
    pause_ns: AtomicU64,
}

impl Default for GcStats {
    fn default() -> Self {
        Self::new()
    }
}

impl GcStats {
    /// Create a new `GcStats` with all counters initialized to zero.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            collections: AtomicUsize::new(0),
            young_collections: AtomicUsize::new(0),
            partial_collections: AtomicUsize::new(0),
            full_collections: AtomicUsize::new(0),
            shared_collections: AtomicUsize::new(0),
            concurrent_marks: AtomicUsize::new(0),
            bytes_reclaimed: AtomicUsize::new(0),
            bytes_promoted: AtomicUsize::new(0),
            pause_ns: AtomicU64::new(0),
        }
    }

    /// Records a finished collection and returns its sequence number.
    pub(crate) fn record(&self, metrics: &GcMetrics) -> usize {
        let total = self.collections.fetch_add(1, Ordering::Relaxed) + 1;
        let counter = match metrics.gc_type {
            TriggerGcType::Young => &self.young_collections,
            TriggerGcType::Old => &self.partial_collections,
            TriggerGcType::Full | TriggerGcType::AppSpawnFull => &self.full_collections,
            TriggerGcType::SharedPartial | TriggerGcType::Shared | TriggerGcType::SharedFull => {
                &self.shared_collections
            }
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.bytes_reclaimed
            .fetch_add(metrics.bytes_reclaimed(), Ordering::Relaxed);
        self.bytes_promoted
            .fetch_add(metrics.bytes_promoted, Ordering::Relaxed);
        let nanos = u64::try_from(metrics.duration.as_nanos()).unwrap_or(u64::MAX);
        self.pause_ns.fetch_add(nanos, Ordering::Relaxed);
        total
    }

    pub(crate) fn record_concurrent_mark(&self) {
        self.concurrent_marks.fetch_add(1, Ordering::Relaxed);
    }

    /// Total collections.
    #[must_use]
    pub fn total_collections(&self) -> usize {
        self.collections.load(Ordering::Relaxed)
    }

    /// Young collections.
    #[must_use]
    pub fn young_collections(&self) -> usize {
        self.young_collections.load(Ordering::Relaxed)
    }

    /// Partial (old) collections.
    #[must_use]
    pub fn partial_collections(&self) -> usize {
        self.partial_collections.load(Ordering::Relaxed)
    }

    /// Full and app-spawn collections.
    #[must_use]
    pub fn full_collections(&self) -> usize {
        self.full_collections.load(Ordering::Relaxed)
    }

    /// Shared-heap collections.
    #[must_use]
    pub fn shared_collections(&self) -> usize {
        self.shared_collections.load(Ordering::Relaxed)
    }

    /// Concurrent marking cycles started.
    #[must_use]
    pub fn concurrent_marks(&self) -> usize {
        self.concurrent_marks.load(Ordering::Relaxed)
    }

    /// Bytes reclaimed across all collections.
    #[must_use]
    pub fn total_bytes_reclaimed(&self) -> usize {
        self.bytes_reclaimed.load(Ordering::Relaxed)
    }

    /// Bytes promoted into old space across all collections.
    #[must_use]
    pub fn total_bytes_promoted(&self) -> usize {
        self.bytes_promoted.load(Ordering::Relaxed)
    }

    /// Pause time across all collections.
    #[must_use]
    pub fn total_pause_time(&self) -> Duration {
        Duration::from_nanos(self.pause_ns.load(Ordering::Relaxed))
    }
}
