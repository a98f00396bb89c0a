//! Garbage collection.
//!
//! Building blocks (work queues, marking strategies, evacuation, the write
//! barrier, weak processing, the sweeper) plus the orchestrators that compose
//! them into young, partial and full collections.

pub(crate) mod barrier;
pub(crate) mod concurrent_marker;
pub(crate) mod evacuate;
pub(crate) mod full;
pub mod mark;
pub(crate) mod marker;
pub(crate) mod partial;
pub mod state;
pub(crate) mod sweeper;
pub(crate) mod verify;
pub(crate) mod weak;
pub(crate) mod worklist;
pub(crate) mod young;

pub use state::{GcPhase, GcReason, MarkStatus, TriggerGcType};

use crate::gc::worklist::WorkManager;
use crate::heap::region::{RegionFlags, RegionTable};
use crate::heap::space::{SemiSpace, SweepableSpace};
use crate::object::{Address, ObjectModel, ObjectSlot};

/// What marking and evacuation code needs to see of a heap.
///
/// Built on the stack for each phase, so components hold indices and
/// borrows instead of pointers back into the heap.
pub(crate) struct GcContext<'a> {
    pub(crate) table: &'a RegionTable,
    pub(crate) model: &'a dyn ObjectModel,
    pub(crate) work: &'a WorkManager,
    /// Young generation, absent for the shared heap.
    pub(crate) young: Option<&'a SemiSpace>,
    /// Destination of promoted and compacted objects.
    pub(crate) old: &'a SweepableSpace,
    pub(crate) tlab_size: usize,
    /// Extra flags for regions that receive compacted objects.
    pub(crate) target_flags: RegionFlags,
    /// Table of the attached shared heap, if any.
    pub(crate) shared_table: Option<&'a RegionTable>,
}

impl GcContext<'_> {
    /// True if `addr` lies in the attached shared heap.
    #[inline]
    pub(crate) fn is_shared(&self, addr: usize) -> bool {
        self.shared_table.is_some_and(|t| t.contains(addr))
    }
}

/// Records the remembered-set bits the edge `slot -> target` needs.
///
/// Used wherever the collector writes or copies a slot itself, since those
/// stores bypass the write barrier. Root slots and shared holders need none.
pub(crate) fn remember_slot(cx: &GcContext<'_>, slot: ObjectSlot, target: Address) {
    let Some(holder) = cx.table.region_of(slot.address()) else {
        return;
    };
    if holder.in_shared() {
        return;
    }
    if let Some(region) = cx.table.region_of(target.raw()) {
        if region.in_young() && !holder.in_young() {
            holder.insert_old_to_new(slot.address());
        }
    } else if cx.is_shared(target.raw()) {
        holder.insert_local_to_share(slot.address());
    }
}
