//! Heap configuration.
//!
//! [`HeapConfig`] sizes a local heap and switches the concurrent phases on or
//! off; [`SharedHeapConfig`] does the same for a [`SharedHeap`](crate::SharedHeap).
//! Both validate themselves before a heap is built.

use std::fmt;
use std::sync::Arc;

use crate::error::{HeapError, Result};
use crate::heap::region::REGION_SIZE;
use crate::heap::remembered_set::{DefaultRememberedSetPolicy, RememberedSetPolicy};

/// Minimum growth applied to the old-space limit after a collection.
const DEFAULT_MIN_OLD_SPACE_LIMIT: usize = 2 * 1024 * 1024;

/// Configuration for a local heap.
///
/// # Example
///
/// ```
/// use regent_gc::HeapConfig;
///
/// let config = HeapConfig::default()
///     .with_max_heap_size(64 * 1024 * 1024)
///     .with_concurrent_mark(false);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Clone)]
pub struct HeapConfig {
    /// Bytes of address space reserved for the heap.
    pub max_heap_size: usize,
    /// Capacity of the active semi space in bytes.
    pub semi_space_capacity: usize,
    /// Old-space size that triggers the first old collection.
    pub old_space_initial_limit: usize,
    /// Lower bound of the recomputed old-space limit.
    pub min_old_space_limit: usize,
    /// Growth applied to live old bytes when recomputing the limit, in percent.
    pub growing_factor_percent: usize,
    /// Objects at least this large go to the huge-object space.
    pub huge_object_threshold: usize,
    /// Number of parallel GC workers including the collecting thread.
    pub parallel_gc_threads: usize,
    /// Number of background marking tasks posted when concurrent marking starts.
    pub concurrent_mark_tasks: usize,
    /// Start concurrent marking when the old-space limit is reached.
    pub enable_concurrent_mark: bool,
    /// Sweep on the task pool instead of inside the pause.
    pub enable_concurrent_sweep: bool,
    /// Evacuate sparsely populated old regions during partial collections.
    pub enable_partial_compaction: bool,
    /// Old regions with a live ratio below this percentage join the collection set.
    pub cset_live_ratio_percent: usize,
    /// Upper bound on collection-set regions per partial collection.
    pub max_cset_regions: usize,
    /// Size of a mutator's young-space allocation buffer.
    pub tlab_size: usize,
    /// Allowance added per step while concurrent marking races the allocator.
    pub old_space_step_overshoot: usize,
    /// Upper bound of the accumulated overshoot allowance.
    pub old_space_max_overshoot: usize,
    /// Run the heap verifier before and after every collection.
    pub verify_heap: bool,
    /// Decides whether remembered sets are created eagerly.
    pub rset_policy: Arc<dyn RememberedSetPolicy>,
}

impl HeapConfig {
    /// Sets the reserved heap size.
    #[must_use]
    pub const fn with_max_heap_size(mut self, size: usize) -> Self {
        self.max_heap_size = size;
        self
    }

    /// Sets the semi-space capacity.
    #[must_use]
    pub const fn with_semi_space_capacity(mut self, size: usize) -> Self {
        self.semi_space_capacity = size;
        self
    }

    /// Sets the initial old-space limit.
    #[must_use]
    pub const fn with_old_space_limit(mut self, size: usize) -> Self {
        self.old_space_initial_limit = size;
        self
    }

    /// Sets the huge-object threshold.
    #[must_use]
    pub const fn with_huge_object_threshold(mut self, size: usize) -> Self {
        self.huge_object_threshold = size;
        self
    }

    /// Sets the number of parallel GC workers.
    #[must_use]
    pub const fn with_parallel_gc_threads(mut self, threads: usize) -> Self {
        self.parallel_gc_threads = threads;
        self
    }

    /// Sets the number of background marking tasks.
    ///
    /// Zero leaves all tracing to the remark pause.
    #[must_use]
    pub const fn with_concurrent_mark_tasks(mut self, tasks: usize) -> Self {
        self.concurrent_mark_tasks = tasks;
        self
    }

    /// Enables or disables concurrent marking.
    #[must_use]
    pub const fn with_concurrent_mark(mut self, enabled: bool) -> Self {
        self.enable_concurrent_mark = enabled;
        self
    }

    /// Enables or disables concurrent sweeping.
    #[must_use]
    pub const fn with_concurrent_sweep(mut self, enabled: bool) -> Self {
        self.enable_concurrent_sweep = enabled;
        self
    }

    /// Enables or disables collection-set evacuation in partial collections.
    #[must_use]
    pub const fn with_partial_compaction(mut self, enabled: bool) -> Self {
        self.enable_partial_compaction = enabled;
        self
    }

    /// Sets the live-ratio threshold for collection-set selection.
    #[must_use]
    pub const fn with_cset_live_ratio_percent(mut self, percent: usize) -> Self {
        self.cset_live_ratio_percent = percent;
        self
    }

    /// Sets the mutator allocation buffer size.
    #[must_use]
    pub const fn with_tlab_size(mut self, size: usize) -> Self {
        self.tlab_size = size;
        self
    }

    /// Enables heap verification around collections.
    #[must_use]
    pub const fn with_verify_heap(mut self, enabled: bool) -> Self {
        self.verify_heap = enabled;
        self
    }

    /// Replaces the remembered-set creation policy.
    #[must_use]
    pub fn with_rset_policy(mut self, policy: Arc<dyn RememberedSetPolicy>) -> Self {
        self.rset_policy = policy;
        self
    }

    /// Number of regions the semi space may hold.
    #[must_use]
    pub const fn semi_space_regions(&self) -> usize {
        self.semi_space_capacity.div_ceil(REGION_SIZE)
    }

    /// Number of regions in the reservation.
    #[must_use]
    pub const fn region_capacity(&self) -> usize {
        self.max_heap_size / REGION_SIZE
    }

    /// Checks the configuration for values the heap cannot work with.
    ///
    /// # Errors
    ///
    /// Returns [`HeapError::InvalidConfig`] naming the first offending value.
    pub fn validate(&self) -> Result<()> {
        if self.max_heap_size < 4 * REGION_SIZE {
            return Err(invalid("max_heap_size must cover at least four regions"));
        }
        if self.semi_space_capacity == 0 {
            return Err(invalid("semi_space_capacity must be non-zero"));
        }
        // Survivors need a to-space as large as the from-space.
        if 2 * self.semi_space_regions() >= self.region_capacity() {
            return Err(invalid("semi space does not fit twice into the heap"));
        }
        if self.huge_object_threshold == 0 || self.huge_object_threshold > REGION_SIZE / 2 {
            return Err(invalid("huge_object_threshold must be in (0, REGION_SIZE / 2]"));
        }
        if self.tlab_size < 1024 || self.tlab_size > REGION_SIZE {
            return Err(invalid("tlab_size must be in [1 KiB, REGION_SIZE]"));
        }
        if self.parallel_gc_threads == 0 || self.parallel_gc_threads > 64 {
            return Err(invalid("parallel_gc_threads must be in [1, 64]"));
        }
        if self.concurrent_mark_tasks >= 64 {
            return Err(invalid("concurrent_mark_tasks must be below 64"));
        }
        if self.cset_live_ratio_percent > 100 {
            return Err(invalid("cset_live_ratio_percent must be at most 100"));
        }
        if self.growing_factor_percent < 100 {
            return Err(invalid("growing_factor_percent must be at least 100"));
        }
        Ok(())
    }
}

impl Default for HeapConfig {
    fn default() -> Self {
        let threads = crate::task::available_parallelism().min(8);
        Self {
            max_heap_size: 256 * 1024 * 1024,
            semi_space_capacity: 4 * 1024 * 1024,
            old_space_initial_limit: 32 * 1024 * 1024,
            min_old_space_limit: DEFAULT_MIN_OLD_SPACE_LIMIT,
            growing_factor_percent: 200,
            huge_object_threshold: REGION_SIZE / 2,
            parallel_gc_threads: threads,
            concurrent_mark_tasks: threads.saturating_sub(1).max(1),
            enable_concurrent_mark: true,
            enable_concurrent_sweep: true,
            enable_partial_compaction: true,
            cset_live_ratio_percent: 65,
            max_cset_regions: 64,
            tlab_size: 32 * 1024,
            old_space_step_overshoot: 2 * REGION_SIZE,
            old_space_max_overshoot: 16 * REGION_SIZE,
            verify_heap: cfg!(debug_assertions),
            rset_policy: Arc::new(DefaultRememberedSetPolicy),
        }
    }
}

impl fmt::Debug for HeapConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HeapConfig")
            .field("max_heap_size", &self.max_heap_size)
            .field("semi_space_capacity", &self.semi_space_capacity)
            .field("old_space_initial_limit", &self.old_space_initial_limit)
            .field("huge_object_threshold", &self.huge_object_threshold)
            .field("parallel_gc_threads", &self.parallel_gc_threads)
            .field("concurrent_mark_tasks", &self.concurrent_mark_tasks)
            .field("enable_concurrent_mark", &self.enable_concurrent_mark)
            .field("enable_concurrent_sweep", &self.enable_concurrent_sweep)
            .field("enable_partial_compaction", &self.enable_partial_compaction)
            .field("verify_heap", &self.verify_heap)
            .finish_non_exhaustive()
    }
}

/// Configuration for a [`SharedHeap`](crate::SharedHeap).
#[derive(Debug, Clone)]
pub struct SharedHeapConfig {
    /// Bytes of address space reserved for the shared heap.
    pub max_heap_size: usize,
    /// Committed shared bytes that trigger a shared collection.
    pub shared_old_limit: usize,
    /// Objects at least this large go to the shared huge-object space.
    pub huge_object_threshold: usize,
    /// Number of parallel workers including the daemon thread.
    pub parallel_gc_threads: usize,
    /// Number of background marking tasks posted by the daemon.
    pub concurrent_mark_tasks: usize,
    /// Mark concurrently between the two handshakes.
    pub enable_concurrent_mark: bool,
    /// Sweep on the task pool after the reclaim handshake.
    pub enable_concurrent_sweep: bool,
    /// Run the shared heap verifier around collections.
    pub verify_heap: bool,
}

impl SharedHeapConfig {
    /// Sets the reserved shared heap size.
    #[must_use]
    pub const fn with_max_heap_size(mut self, size: usize) -> Self {
        self.max_heap_size = size;
        self
    }

    /// Sets the shared collection trigger.
    #[must_use]
    pub const fn with_shared_old_limit(mut self, size: usize) -> Self {
        self.shared_old_limit = size;
        self
    }

    /// Enables or disables concurrent shared marking.
    #[must_use]
    pub const fn with_concurrent_mark(mut self, enabled: bool) -> Self {
        self.enable_concurrent_mark = enabled;
        self
    }

    /// Enables or disables concurrent shared sweeping.
    #[must_use]
    pub const fn with_concurrent_sweep(mut self, enabled: bool) -> Self {
        self.enable_concurrent_sweep = enabled;
        self
    }

    /// Number of regions in the shared reservation.
    #[must_use]
    pub const fn region_capacity(&self) -> usize {
        self.max_heap_size / REGION_SIZE
    }

    /// Checks the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`HeapError::InvalidConfig`] naming the first offending value.
    pub fn validate(&self) -> Result<()> {
        if self.max_heap_size < 4 * REGION_SIZE {
            return Err(invalid("shared max_heap_size must cover at least four regions"));
        }
        if self.huge_object_threshold == 0 || self.huge_object_threshold > REGION_SIZE / 2 {
            return Err(invalid("shared huge_object_threshold must be in (0, REGION_SIZE / 2]"));
        }
        if self.parallel_gc_threads == 0 || self.parallel_gc_threads > 64 {
            return Err(invalid("shared parallel_gc_threads must be in [1, 64]"));
        }
        if self.concurrent_mark_tasks >= 64 {
            return Err(invalid("shared concurrent_mark_tasks must be below 64"));
        }
        Ok(())
    }
}

impl Default for SharedHeapConfig {
    fn default() -> Self {
        let threads = crate::task::available_parallelism().min(4);
        Self {
            max_heap_size: 128 * 1024 * 1024,
            shared_old_limit: 16 * 1024 * 1024,
            huge_object_threshold: REGION_SIZE / 2,
            parallel_gc_threads: threads,
            concurrent_mark_tasks: threads.saturating_sub(1).max(1),
            enable_concurrent_mark: true,
            enable_concurrent_sweep: true,
            verify_heap: cfg!(debug_assertions),
        }
    }
}

fn invalid(msg: &str) -> HeapError {
    HeapError::InvalidConfig(msg.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(HeapConfig::default().validate().is_ok());
        assert!(SharedHeapConfig::default().validate().is_ok());
    }

    #[test]
    fn test_semi_space_must_fit_twice() {
        let config = HeapConfig::default()
            .with_max_heap_size(8 * REGION_SIZE)
            .with_semi_space_capacity(4 * REGION_SIZE);
        assert!(matches!(config.validate(), Err(HeapError::InvalidConfig(_))));
    }

    #[test]
    fn test_huge_threshold_bounds() {
        let config = HeapConfig::default().with_huge_object_threshold(REGION_SIZE);
        assert!(config.validate().is_err());
        let config = HeapConfig::default().with_huge_object_threshold(1024);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_semi_space_regions_rounds_up() {
        let config = HeapConfig::default().with_semi_space_capacity(REGION_SIZE + 1);
        assert_eq!(config.semi_space_regions(), 2);
    }
}
