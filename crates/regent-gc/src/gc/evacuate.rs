//! Object relocation.
//!
//! Copying is a race between GC workers, settled by one compare-and-swap on
//! the source header:
//!
//! 1. load the header; if it already forwards, use that address;
//! 2. allocate from the worker's buffer and copy the object;
//! 3. CAS the header from the loaded class word to `copy | FORWARD_TAG`.
//!
//! The winner owns the copy. A loser gives its allocation back and follows
//! the winner's forwarding address, so every slot converges on one copy.

use std::alloc::{handle_alloc_error, Layout};
use std::sync::atomic::Ordering;

use crate::gc::worklist::WorkerHolder;
use crate::gc::GcContext;
use crate::object::{object_size, Address, MarkWord, OBJECT_ALIGNMENT, WORD_SIZE};
use crate::tracing::gc_warn;

/// Where a copy goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Destination {
    /// Young to-space.
    Young,
    /// Old space.
    Old,
}

/// Outcome of [`evacuate`].
#[derive(Debug, Clone, Copy)]
pub(crate) struct Evacuated {
    pub(crate) to: Address,
    /// True if this call made the copy and must scan it.
    pub(crate) copied: bool,
}

/// Relocates `obj`, or returns where another worker already put it.
pub(crate) fn evacuate(
    cx: &GcContext<'_>,
    worker: &mut WorkerHolder,
    obj: Address,
    dest: Destination,
) -> Evacuated {
    let word = obj.mark_word();
    if let Some(to) = word.forwarding_address() {
        return Evacuated { to, copied: false };
    }
    if word.class().is_none() {
        debug_assert!(false, "evacuating {obj:?} without a class word");
        return Evacuated {
            to: obj,
            copied: false,
        };
    }
    let size = object_size(cx.model, obj);
    let (dest, to) = allocate(cx, worker, dest, size);

    // SAFETY: `to` is a fresh allocation of `size` bytes owned by this worker and
    // the source stays unmodified while the world is stopped.
    unsafe {
        std::ptr::copy_nonoverlapping(
            (obj.raw() + WORD_SIZE) as *const u8,
            (to.raw() + WORD_SIZE) as *mut u8,
            size - WORD_SIZE,
        );
    }
    to.header().store(word.0, Ordering::Relaxed);

    match obj.header().compare_exchange(
        word.0,
        MarkWord::from_forwarding(to).0,
        Ordering::AcqRel,
        Ordering::Acquire,
    ) {
        Ok(_) => {
            record_copy(cx, worker, obj, to, dest, size);
            Evacuated { to, copied: true }
        }
        Err(current) => {
            rollback(worker, dest, to, size);
            let to = MarkWord(current)
                .forwarding_address()
                .unwrap_or_else(|| unreachable!("header of {obj:?} changed without forwarding"));
            Evacuated { to, copied: false }
        }
    }
}

fn record_copy(
    cx: &GcContext<'_>,
    worker: &mut WorkerHolder,
    from: Address,
    to: Address,
    dest: Destination,
    size: usize,
) {
    worker.stats.bytes_copied += size;
    worker.stats.objects_copied += 1;
    if dest == Destination::Old {
        if let Some(region) = cx.table.region_of(to.raw()) {
            // The worker is the only writer of its old buffer region.
            region.mark_non_atomic(to.raw());
            region.add_alive_bytes(size);
        }
        cx.old.record_copied(size);
        if cx.table.region_of(from.raw()).is_some_and(|r| r.in_young()) {
            worker.stats.bytes_promoted += size;
        }
    }
}

fn rollback(worker: &mut WorkerHolder, dest: Destination, to: Address, size: usize) {
    let tlab = match dest {
        Destination::Young => &mut worker.young_tlab,
        Destination::Old => &mut worker.old_tlab,
    };
    // Direct allocations cannot be undone; they stay as unmarked garbage.
    let _ = tlab.rollback(to.raw(), size);
}

fn allocate(
    cx: &GcContext<'_>,
    worker: &mut WorkerHolder,
    dest: Destination,
    size: usize,
) -> (Destination, Address) {
    if dest == Destination::Young {
        if let Some(addr) = allocate_young(cx, worker, size) {
            return (Destination::Young, addr);
        }
    }
    (Destination::Old, allocate_old(cx, worker, size))
}

fn allocate_young(cx: &GcContext<'_>, worker: &mut WorkerHolder, size: usize) -> Option<Address> {
    let young = cx.young?;
    if let Some(addr) = worker.young_tlab.allocate(size) {
        return to_address(addr);
    }
    if size > cx.tlab_size / 2 {
        let (addr, _) = young.allocate(cx.table, size)?;
        return to_address(addr);
    }
    let (start, region) = young.allocate(cx.table, cx.tlab_size)?;
    worker
        .young_tlab
        .reset(start, start + cx.tlab_size, region);
    worker.young_tlab.allocate(size).and_then(to_address)
}

fn allocate_old(cx: &GcContext<'_>, worker: &mut WorkerHolder, size: usize) -> Address {
    if let Some(addr) = worker.old_tlab.allocate(size).and_then(to_address) {
        return addr;
    }
    retire_old_buffer(cx, worker);
    let Some(region) = cx.old.acquire_evacuation_region(cx.table, cx.target_flags) else {
        gc_warn!(size, "heap exhausted during evacuation");
        handle_alloc_error(
            Layout::from_size_align(size, OBJECT_ALIGNMENT).unwrap_or_else(|_| Layout::new::<usize>()),
        );
    };
    worker
        .old_tlab
        .reset(region.begin(), region.end(), region.id());
    worker
        .old_tlab
        .allocate(size)
        .and_then(to_address)
        .unwrap_or_else(|| unreachable!("object of {size} bytes exceeds a region"))
}

fn retire_old_buffer(cx: &GcContext<'_>, worker: &mut WorkerHolder) {
    if let Some((_, top, end)) = worker.old_tlab.take() {
        if end > top {
            cx.old.add_free_chunk(top, end - top);
        }
    }
}

/// Returns every worker's unused buffer tails at the end of a collection.
pub(crate) fn retire_buffers(cx: &GcContext<'_>) {
    for holder in cx.work.holders() {
        let mut holder = holder.lock();
        holder.young_tlab.take();
        retire_old_buffer(cx, &mut holder);
    }
}

fn to_address(addr: usize) -> Option<Address> {
    // SAFETY: buffers hand out aligned addresses inside the reservation.
    unsafe { Address::from_raw(addr) }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::descriptor::{DescriptorModel, TypeDescriptor};
    use crate::gc::worklist::WorkManager;
    use crate::heap::region::{RegionFlags, RegionTable};
    use crate::heap::remembered_set::DefaultRememberedSetPolicy;
    use crate::heap::space::{SemiSpace, SpaceType, SweepableSpace};

    static BOX: TypeDescriptor = TypeDescriptor::fixed("Box", 24, &[8]);

    struct Fixture {
        table: RegionTable,
        model: DescriptorModel,
        work: WorkManager,
        young: SemiSpace,
        old: SweepableSpace,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                table: RegionTable::new(16, Arc::new(DefaultRememberedSetPolicy)).unwrap(),
                model: DescriptorModel,
                work: WorkManager::new(2),
                young: SemiSpace::new(2),
                old: SweepableSpace::new(SpaceType::Old),
            }
        }

        fn cx(&self) -> GcContext<'_> {
            GcContext {
                table: &self.table,
                model: &self.model,
                work: &self.work,
                young: Some(&self.young),
                old: &self.old,
                tlab_size: 4096,
                target_flags: RegionFlags::FREE,
                shared_table: None,
            }
        }

        fn young_object(&self) -> Address {
            let (addr, _) = self.young.allocate(&self.table, 24).unwrap();
            let obj = unsafe { Address::from_raw(addr) }.unwrap();
            BOX.write_header(obj);
            unsafe { obj.field(16) }.store_raw(0xfeed_0000);
            obj
        }
    }

    #[test]
    fn test_second_evacuation_follows_forwarding() {
        let fx = Fixture::new();
        let obj = fx.young_object();
        fx.young.flip(&fx.table);
        let cx = fx.cx();
        let mut w0 = fx.work.holder(0);
        let first = evacuate(&cx, &mut w0, obj, Destination::Young);
        assert!(first.copied);
        assert_ne!(first.to, obj);
        assert_eq!(unsafe { first.to.field(16) }.load_raw(), 0xfeed_0000);
        assert_eq!(obj.mark_word().forwarding_address(), Some(first.to));
        drop(w0);

        let mut w1 = fx.work.holder(1);
        let second = evacuate(&cx, &mut w1, obj, Destination::Old);
        assert!(!second.copied);
        assert_eq!(second.to, first.to);
    }

    #[test]
    fn test_racing_evacuations_agree_on_one_copy() {
        let fx = Fixture::new();
        let objects: Vec<Address> = (0..64).map(|_| fx.young_object()).collect();
        fx.young.flip(&fx.table);
        let cx = fx.cx();

        for obj in objects {
            let start = std::sync::Barrier::new(2);
            let results: Vec<Evacuated> = std::thread::scope(|scope| {
                let racers: Vec<_> = (0..2)
                    .map(|id| {
                        let (cx, start) = (&cx, &start);
                        scope.spawn(move || {
                            let mut worker = cx.work.holder(id);
                            start.wait();
                            evacuate(cx, &mut worker, obj, Destination::Young)
                        })
                    })
                    .collect();
                racers.into_iter().map(|r| r.join().unwrap()).collect()
            });

            assert_eq!(results.iter().filter(|r| r.copied).count(), 1);
            assert_eq!(results[0].to, results[1].to);
            assert_eq!(obj.mark_word().forwarding_address(), Some(results[0].to));
            assert_eq!(unsafe { results[0].to.field(16) }.load_raw(), 0xfeed_0000);
        }
        let copied: usize = (0..2).map(|id| fx.work.holder(id).stats.objects_copied).sum();
        assert_eq!(copied, 64);
    }

    #[test]
    fn test_old_copies_are_marked_and_counted() {
        let fx = Fixture::new();
        let obj = fx.young_object();
        fx.young.flip(&fx.table);
        let cx = fx.cx();
        let mut worker = fx.work.holder(0);
        let moved = evacuate(&cx, &mut worker, obj, Destination::Old);
        let region = fx.table.region_of(moved.to.raw()).unwrap();
        assert!(region.is_marked(moved.to.raw()));
        assert_eq!(region.alive_bytes(), 24);
        assert_eq!(worker.stats.bytes_promoted, 24);
        drop(worker);

        retire_buffers(&cx);
        assert_eq!(fx.old.free_bytes(), crate::heap::region::REGION_SIZE - 24);
    }

    #[test]
    fn test_full_to_space_falls_back_to_old() {
        let fx = Fixture::new();
        let obj = fx.young_object();
        fx.young.flip(&fx.table);
        // Fill the to-space.
        while fx.young.allocate(&fx.table, 64 * 1024).is_some() {}
        let cx = fx.cx();
        let mut worker = fx.work.holder(0);
        let moved = evacuate(&cx, &mut worker, obj, Destination::Young);
        let region = fx.table.region_of(moved.to.raw()).unwrap();
        assert!(!region.in_young());
    }
}
