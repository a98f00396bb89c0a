//! GC tracing support.
//!
//! When the `tracing` feature is enabled, this module provides structured
//! tracing spans and events for garbage collection operations. Without the
//! feature every helper compiles to a no-op so call sites stay unconditional.

#[cfg(feature = "tracing")]
pub mod internal {
    use std::sync::atomic::{AtomicU64, Ordering};
    use tracing::{span, Level};

    use crate::gc::state::{GcReason, TriggerGcType};

    /// Phases of a collection that get their own span.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum TracePhase {
        /// Root shading at the start of a marking cycle.
        InitialMark,
        /// Background tracing on the task pool.
        ConcurrentMark,
        /// Stop-the-world completion of marking.
        Remark,
        /// Stop-the-world tracing without a concurrent pass.
        Mark,
        /// Copying live objects out of evacuated regions.
        Evacuate,
        /// Redirecting slots to relocated objects.
        UpdateReferences,
        /// Clearing or redirecting weak slots.
        ProcessWeak,
        /// Reclaiming unmarked memory.
        Sweep,
        /// Suspending every runtime attached to a shared heap.
        Handshake,
    }

    /// Stable identifier for a GC run.
    ///
    /// This ID is used to correlate all events within a single garbage
    /// collection run. It is a monotonically increasing counter that
    /// starts at 1.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct GcId(pub u64);

    /// Global counter for generating unique GC IDs.
    static NEXT_GC_ID: AtomicU64 = AtomicU64::new(1);

    /// Generate the next unique GC ID.
    pub fn next_gc_id() -> GcId {
        GcId(NEXT_GC_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Create a span for the entire GC collection.
    pub fn trace_gc_collection(
        gc_type: TriggerGcType,
        reason: GcReason,
        gc_id: GcId,
    ) -> span::EnteredSpan {
        span!(
            Level::DEBUG,
            "gc_collect",
            gc_type = ?gc_type,
            reason = ?reason,
            gc_id = gc_id.0
        )
        .entered()
    }

    /// Create a span for a GC phase.
    pub fn trace_phase(phase: TracePhase) -> span::EnteredSpan {
        span!(Level::DEBUG, "gc_phase", phase = ?phase).entered()
    }

    /// Log the start of a GC phase.
    pub fn log_phase_start(phase: TracePhase, heap_bytes: usize) {
        tracing::debug!(phase = ?phase, heap_bytes, "phase_start");
    }

    /// Log the end of a GC phase.
    pub fn log_phase_end(phase: TracePhase, bytes_reclaimed: usize) {
        tracing::debug!(phase = ?phase, bytes_reclaimed, "phase_end");
    }
}

#[cfg(not(feature = "tracing"))]
pub mod internal {
    use crate::gc::state::{GcReason, TriggerGcType};

    /// Phases of a collection that get their own span.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum TracePhase {
        /// Root shading at the start of a marking cycle.
        InitialMark,
        /// Background tracing on the task pool.
        ConcurrentMark,
        /// Stop-the-world completion of marking.
        Remark,
        /// Stop-the-world tracing without a concurrent pass.
        Mark,
        /// Copying live objects out of evacuated regions.
        Evacuate,
        /// Redirecting slots to relocated objects.
        UpdateReferences,
        /// Clearing or redirecting weak slots.
        ProcessWeak,
        /// Reclaiming unmarked memory.
        Sweep,
        /// Suspending every runtime attached to a shared heap.
        Handshake,
    }

    /// Stub type when tracing is disabled.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct GcId(pub u64);

    /// Stub function when tracing is disabled.
    pub const fn next_gc_id() -> GcId {
        GcId(0)
    }

    /// Stub function when tracing is disabled.
    pub const fn trace_gc_collection(_gc_type: TriggerGcType, _reason: GcReason, _gc_id: GcId) {}

    /// Stub function when tracing is disabled.
    pub const fn trace_phase(_phase: TracePhase) {}

    /// Stub function when tracing is disabled.
    pub const fn log_phase_start(_phase: TracePhase, _heap_bytes: usize) {}

    /// Stub function when tracing is disabled.
    pub const fn log_phase_end(_phase: TracePhase, _bytes_reclaimed: usize) {}
}

pub use internal::GcId;

/// `tracing::debug!` when the feature is on, nothing otherwise.
macro_rules! gc_debug {
    ($($arg:tt)*) => {{
        #[cfg(feature = "tracing")]
        ::tracing::debug!($($arg)*);
    }};
}

/// `tracing::info!` when the feature is on, nothing otherwise.
macro_rules! gc_info {
    ($($arg:tt)*) => {{
        #[cfg(feature = "tracing")]
        ::tracing::info!($($arg)*);
    }};
}

/// `tracing::warn!` when the feature is on, nothing otherwise.
macro_rules! gc_warn {
    ($($arg:tt)*) => {{
        #[cfg(feature = "tracing")]
        ::tracing::warn!($($arg)*);
    }};
}

pub(crate) use gc_debug;
pub(crate) use gc_info;
pub(crate) use gc_warn;
