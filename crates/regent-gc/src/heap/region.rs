//! Regions and the region arena.
//!
//! A heap reserves one aligned range of address space and cuts it into
//! [`REGION_SIZE`] regions. Every region is an entry of the [`RegionTable`]
//! arena, addressed by a stable [`RegionId`]; the region containing an address
//! is found with a shift, never by following pointers. Huge objects occupy a
//! run of consecutive regions whose tails point back at the head.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use sys_alloc::{Mmap, MmapOptions};

use crate::error::{HeapError, Result};
use crate::gc::mark::GcBitset;
use crate::heap::remembered_set::{RememberedSetKind, RememberedSetPolicy, RememberedSets};
use crate::heap::space::SpaceType;
use crate::object::{Address, OBJECT_ALIGNMENT};
use crate::tracing::gc_warn;

/// log2 of the region size.
pub const REGION_SHIFT: usize = 18;

/// Size of a region in bytes (256 KiB).
pub const REGION_SIZE: usize = 1 << REGION_SHIFT;

/// Number of 8-byte slots in a region.
pub const SLOTS_PER_REGION: usize = REGION_SIZE / OBJECT_ALIGNMENT;

/// Stable index of a region inside its table.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct RegionId(u32);

impl RegionId {
    /// Position in the table.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    #[cfg(test)]
    pub(crate) const fn default_for_tests() -> Self {
        Self(0)
    }
}

/// Kind and state bits of a region.
#[derive(Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct RegionFlags(u32);

impl RegionFlags {
    /// Not in use.
    pub const FREE: Self = Self(0);
    /// Semi-space region.
    pub const YOUNG: Self = Self(1);
    /// Old-space region.
    pub const OLD: Self = Self(1 << 1);
    /// Non-movable region.
    pub const NON_MOVABLE: Self = Self(1 << 2);
    /// Machine-code region (non-movable).
    pub const MACHINE_CODE: Self = Self(1 << 3);
    /// Part of a huge-object run.
    pub const HUGE: Self = Self(1 << 4);
    /// Non-head region of a huge-object run.
    pub const HUGE_TAIL: Self = Self(1 << 5);
    /// Read-only region, never collected.
    pub const READ_ONLY: Self = Self(1 << 6);
    /// Belongs to a shared heap.
    pub const SHARED: Self = Self(1 << 7);
    /// Produced by an app-spawn collection; never evacuated again.
    pub const APP_SPAWN: Self = Self(1 << 8);
    /// Selected into the collection set of the current partial collection.
    pub const IN_CSET: Self = Self(1 << 9);
    /// Young region being evacuated by the current collection.
    pub const FROM_SPACE: Self = Self(1 << 10);

    const NAMES: [(Self, &'static str); 11] = [
        (Self::YOUNG, "YOUNG"),
        (Self::OLD, "OLD"),
        (Self::NON_MOVABLE, "NON_MOVABLE"),
        (Self::MACHINE_CODE, "MACHINE_CODE"),
        (Self::HUGE, "HUGE"),
        (Self::HUGE_TAIL, "HUGE_TAIL"),
        (Self::READ_ONLY, "READ_ONLY"),
        (Self::SHARED, "SHARED"),
        (Self::APP_SPAWN, "APP_SPAWN"),
        (Self::IN_CSET, "IN_CSET"),
        (Self::FROM_SPACE, "FROM_SPACE"),
    ];

    /// Raw bits.
    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// True if every bit of `other` is set.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// True if any bit of `other` is set.
    #[must_use]
    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    /// Flags describing the space a region belongs to.
    #[must_use]
    pub const fn for_space(space: SpaceType) -> Self {
        match space {
            SpaceType::Young => Self::YOUNG,
            SpaceType::Old => Self::OLD,
            SpaceType::NonMovable => Self::NON_MOVABLE,
            SpaceType::MachineCode => Self::MACHINE_CODE,
            SpaceType::Huge => Self::HUGE,
            SpaceType::ReadOnly => Self::READ_ONLY,
            SpaceType::SharedOld => Self(Self::OLD.0 | Self::SHARED.0),
            SpaceType::SharedNonMovable => Self(Self::NON_MOVABLE.0 | Self::SHARED.0),
            SpaceType::SharedHuge => Self(Self::HUGE.0 | Self::SHARED.0),
        }
    }
}

impl std::ops::BitOr for RegionFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Debug for RegionFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 == 0 {
            return f.write_str("FREE");
        }
        let mut first = true;
        for (flag, name) in Self::NAMES {
            if self.contains(flag) {
                if !first {
                    f.write_str(" | ")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        Ok(())
    }
}

/// Progress of a region through the current sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SweepState {
    /// Waiting for the sweeper.
    NotSwept = 0,
    /// Claimed by a sweeper thread.
    Sweeping = 1,
    /// Done; its free chunks are published.
    Swept = 2,
}

/// A fixed-size chunk of the heap.
pub struct Region {
    id: RegionId,
    begin: usize,
    flags: AtomicU32,
    /// Head: number of regions in the huge run. Tail: index of the head.
    run: AtomicU32,
    top: AtomicUsize,
    age_mark: AtomicUsize,
    alive_bytes: AtomicUsize,
    sweep_state: AtomicU8,
    mark_bits: OnceLock<GcBitset>,
    rsets: RememberedSets,
}

impl Region {
    fn new(id: RegionId, begin: usize) -> Self {
        Self {
            id,
            begin,
            flags: AtomicU32::new(0),
            run: AtomicU32::new(0),
            top: AtomicUsize::new(begin),
            age_mark: AtomicUsize::new(begin),
            alive_bytes: AtomicUsize::new(0),
            sweep_state: AtomicU8::new(SweepState::Swept as u8),
            mark_bits: OnceLock::new(),
            rsets: RememberedSets::new(),
        }
    }

    /// Stable id.
    #[must_use]
    pub const fn id(&self) -> RegionId {
        self.id
    }

    /// First byte of the region.
    #[must_use]
    pub const fn begin(&self) -> usize {
        self.begin
    }

    /// One past the last byte of the region.
    #[must_use]
    pub const fn end(&self) -> usize {
        self.begin + REGION_SIZE
    }

    /// True if `addr` lies inside this region.
    #[must_use]
    pub const fn contains(&self, addr: usize) -> bool {
        addr >= self.begin && addr < self.begin + REGION_SIZE
    }

    /// Current flags.
    #[must_use]
    pub fn flags(&self) -> RegionFlags {
        RegionFlags(self.flags.load(Ordering::Acquire))
    }

    pub(crate) fn add_flags(&self, flags: RegionFlags) {
        self.flags.fetch_or(flags.0, Ordering::AcqRel);
    }

    pub(crate) fn remove_flags(&self, flags: RegionFlags) {
        self.flags.fetch_and(!flags.0, Ordering::AcqRel);
    }

    /// True unless the region sits in the free pool.
    #[must_use]
    pub fn in_use(&self) -> bool {
        self.flags() != RegionFlags::FREE
    }

    /// Young generation.
    #[must_use]
    pub fn in_young(&self) -> bool {
        self.flags().contains(RegionFlags::YOUNG)
    }

    /// Shared heap.
    #[must_use]
    pub fn in_shared(&self) -> bool {
        self.flags().contains(RegionFlags::SHARED)
    }

    /// Read-only space.
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.flags().contains(RegionFlags::READ_ONLY)
    }

    /// Collection set of the running partial collection.
    #[must_use]
    pub fn in_cset(&self) -> bool {
        self.flags().contains(RegionFlags::IN_CSET)
    }

    /// Evacuated by the running collection.
    #[must_use]
    pub fn should_evacuate(&self) -> bool {
        self.flags()
            .intersects(RegionFlags::IN_CSET | RegionFlags::FROM_SPACE)
    }

    /// Non-head part of a huge-object run.
    #[must_use]
    pub fn is_huge_tail(&self) -> bool {
        self.flags().contains(RegionFlags::HUGE_TAIL)
    }

    /// Space this region belongs to, or `None` when free.
    #[must_use]
    pub fn space_type(&self) -> Option<SpaceType> {
        let flags = self.flags();
        let shared = flags.contains(RegionFlags::SHARED);
        let space = if flags.contains(RegionFlags::YOUNG) {
            SpaceType::Young
        } else if flags.contains(RegionFlags::HUGE) {
            if shared {
                SpaceType::SharedHuge
            } else {
                SpaceType::Huge
            }
        } else if flags.contains(RegionFlags::OLD) {
            if shared {
                SpaceType::SharedOld
            } else {
                SpaceType::Old
            }
        } else if flags.contains(RegionFlags::NON_MOVABLE) {
            if shared {
                SpaceType::SharedNonMovable
            } else {
                SpaceType::NonMovable
            }
        } else if flags.contains(RegionFlags::MACHINE_CODE) {
            SpaceType::MachineCode
        } else if flags.contains(RegionFlags::READ_ONLY) {
            SpaceType::ReadOnly
        } else {
            return None;
        };
        Some(space)
    }

    /// Number of regions in a huge run (1 for ordinary regions).
    #[must_use]
    pub fn run_length(&self) -> usize {
        if self.flags().contains(RegionFlags::HUGE) && !self.is_huge_tail() {
            self.run.load(Ordering::Acquire) as usize
        } else {
            1
        }
    }

    /// Bump pointer of the allocation area (young and read-only regions).
    #[must_use]
    pub fn top(&self) -> usize {
        self.top.load(Ordering::Acquire)
    }

    pub(crate) fn set_top(&self, top: usize) {
        self.top.store(top, Ordering::Release);
    }

    /// Bumps `top` by `size` if it stays below `limit`.
    pub(crate) fn try_bump(&self, size: usize, limit: usize) -> Option<usize> {
        self.top
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |top| {
                (top + size <= limit).then_some(top + size)
            })
            .ok()
    }

    /// Gives back `[from, to)` if it is still the last allocation.
    pub(crate) fn try_rollback(&self, from: usize, to: usize) -> bool {
        self.top
            .compare_exchange(to, from, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Objects below this address survived at least one young collection.
    #[must_use]
    pub fn age_mark(&self) -> usize {
        self.age_mark.load(Ordering::Acquire)
    }

    pub(crate) fn set_age_mark(&self, mark: usize) {
        self.age_mark.store(mark, Ordering::Release);
    }

    /// Live bytes measured by the last marking or sweep.
    #[must_use]
    pub fn alive_bytes(&self) -> usize {
        self.alive_bytes.load(Ordering::Relaxed)
    }

    pub(crate) fn add_alive_bytes(&self, bytes: usize) {
        self.alive_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub(crate) fn set_alive_bytes(&self, bytes: usize) {
        self.alive_bytes.store(bytes, Ordering::Relaxed);
    }

    /// Current sweep state.
    #[must_use]
    pub fn sweep_state(&self) -> SweepState {
        match self.sweep_state.load(Ordering::Acquire) {
            0 => SweepState::NotSwept,
            1 => SweepState::Sweeping,
            _ => SweepState::Swept,
        }
    }

    pub(crate) fn set_sweep_state(&self, state: SweepState) {
        self.sweep_state.store(state as u8, Ordering::Release);
    }

    /// Claims the region for sweeping; fails if it is not waiting to be swept.
    pub(crate) fn try_begin_sweep(&self) -> bool {
        self.sweep_state
            .compare_exchange(
                SweepState::NotSwept as u8,
                SweepState::Sweeping as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    #[inline]
    const fn slot_index(&self, addr: usize) -> usize {
        (addr - self.begin) / OBJECT_ALIGNMENT
    }

    /// Address of slot `index`.
    #[must_use]
    pub const fn slot_address(&self, index: usize) -> usize {
        self.begin + index * OBJECT_ALIGNMENT
    }

    /// The region's mark bitmap.
    pub fn mark_bits(&self) -> &GcBitset {
        self.mark_bits.get_or_init(|| GcBitset::new(SLOTS_PER_REGION))
    }

    /// Marks the object at `addr`. Returns true if this call marked it.
    #[inline]
    pub fn mark(&self, addr: usize) -> bool {
        self.mark_bits().set_atomic(self.slot_index(addr))
    }

    /// Marks from the thread that exclusively owns the memory at `addr`.
    #[inline]
    pub(crate) fn mark_non_atomic(&self, addr: usize) -> bool {
        self.mark_bits().set_non_atomic(self.slot_index(addr))
    }

    /// True if the object at `addr` is marked.
    #[inline]
    #[must_use]
    pub fn is_marked(&self, addr: usize) -> bool {
        self.mark_bits().test(self.slot_index(addr))
    }

    pub(crate) fn clear_marks(&self) {
        self.mark_bits().clear_all();
    }

    pub(crate) fn rsets(&self) -> &RememberedSets {
        &self.rsets
    }

    /// Records that the slot at `slot` may point into the young generation.
    pub fn insert_old_to_new(&self, slot: usize) {
        self.rsets
            .insert(RememberedSetKind::OldToNew, self.slot_index(slot));
    }

    /// Records that the slot at `slot` may point into the shared heap.
    pub fn insert_local_to_share(&self, slot: usize) {
        self.rsets
            .insert(RememberedSetKind::LocalToShare, self.slot_index(slot));
    }

    /// Records that the slot at `slot` points into the collection set.
    pub fn insert_cross_region(&self, slot: usize) {
        self.rsets
            .insert(RememberedSetKind::CrossRegion, self.slot_index(slot));
    }

    /// Marks every slot in `[start, end)` as a possible old→young slot.
    pub(crate) fn insert_old_to_new_range(&self, start: usize, end: usize) {
        self.rsets.insert_range(
            RememberedSetKind::OldToNew,
            self.slot_index(start),
            self.slot_index(end),
        );
    }

    /// Marks every slot in `[start, end)` as a possible local→shared slot.
    pub(crate) fn insert_local_to_share_range(&self, start: usize, end: usize) {
        self.rsets.insert_range(
            RememberedSetKind::LocalToShare,
            self.slot_index(start),
            self.slot_index(end),
        );
    }

    /// True if the remembered set of `kind` has the bit for `slot`.
    #[must_use]
    pub fn rset_contains(&self, kind: RememberedSetKind, slot: usize) -> bool {
        self.rsets.contains(kind, self.slot_index(slot))
    }

    /// Visits every remembered slot of `kind`, dropping the ones `f` rejects.
    pub(crate) fn retain_rset(&self, kind: RememberedSetKind, mut f: impl FnMut(usize) -> bool) {
        let begin = self.begin;
        self.rsets
            .retain(kind, |index| f(begin + index * OBJECT_ALIGNMENT));
    }

    /// Visits every remembered slot of `kind`.
    pub(crate) fn for_each_rset_slot(&self, kind: RememberedSetKind, mut f: impl FnMut(usize)) {
        let begin = self.begin;
        self.rsets
            .for_each(kind, |index| f(begin + index * OBJECT_ALIGNMENT));
    }

    /// Drops sweeping-buffer remembered-set bits for the dead range `[start, end)`.
    pub(crate) fn clear_rset_range_in_sweeping(&self, start: usize, end: usize) {
        self.rsets
            .clear_sweeping_range(self.slot_index(start), self.slot_index(end));
    }

    /// Loads the object at `addr` as an [`Address`].
    pub(crate) fn object_at(&self, index: usize) -> Address {
        // SAFETY: mark bits are only set at object starts inside this region.
        unsafe { Address::from_raw(self.slot_address(index)) }
            .unwrap_or_else(|| unreachable!("region addresses are non-null and aligned"))
    }

    fn reset(&self, flags: RegionFlags, policy: &dyn RememberedSetPolicy) {
        self.flags.store(flags.0, Ordering::Release);
        self.run.store(1, Ordering::Release);
        self.top.store(self.begin, Ordering::Release);
        self.age_mark.store(self.begin, Ordering::Release);
        // Unknown occupancy counts as full until measured.
        self.alive_bytes.store(REGION_SIZE, Ordering::Relaxed);
        self.set_sweep_state(SweepState::Swept);
        self.clear_marks();
        self.rsets.clear_all();
        for kind in [
            RememberedSetKind::OldToNew,
            RememberedSetKind::LocalToShare,
            RememberedSetKind::CrossRegion,
        ] {
            if policy.create_eagerly(flags, kind) {
                self.rsets.create(kind);
            }
        }
    }
}

impl fmt::Debug for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Region")
            .field("id", &self.id)
            .field("begin", &format_args!("{:#x}", self.begin))
            .field("flags", &self.flags())
            .field("top", &format_args!("{:#x}", self.top()))
            .field("alive_bytes", &self.alive_bytes())
            .finish_non_exhaustive()
    }
}

/// Arena of every region of one heap.
pub struct RegionTable {
    mmap: Mmap,
    base: usize,
    regions: Box<[Region]>,
    pool: Mutex<BTreeSet<u32>>,
    in_use: AtomicUsize,
    policy: Arc<dyn RememberedSetPolicy>,
}

impl RegionTable {
    /// Reserves `capacity` regions of address space.
    ///
    /// # Errors
    ///
    /// Returns [`HeapError::ReserveFailed`] if the OS refuses the reservation.
    pub fn new(capacity: usize, policy: Arc<dyn RememberedSetPolicy>) -> Result<Self> {
        let size = capacity * REGION_SIZE;
        let mmap = MmapOptions::new()
            .len(size)
            .align(REGION_SIZE)
            .no_reserve(true)
            .map_anon()
            .map_err(|source| HeapError::ReserveFailed { size, source })?;
        let base = mmap.ptr() as usize;
        let regions = (0..capacity)
            .map(|i| {
                let id = RegionId(u32::try_from(i).unwrap_or(u32::MAX));
                Region::new(id, base + i * REGION_SIZE)
            })
            .collect();
        let pool = (0..capacity)
            .filter_map(|i| u32::try_from(i).ok())
            .collect();
        Ok(Self {
            mmap,
            base,
            regions,
            pool: Mutex::new(pool),
            in_use: AtomicUsize::new(0),
            policy,
        })
    }

    /// Number of regions in the arena.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.regions.len()
    }

    /// Number of regions currently in use.
    #[must_use]
    pub fn regions_in_use(&self) -> usize {
        self.in_use.load(Ordering::Relaxed)
    }

    /// Bytes of regions in use.
    #[must_use]
    pub fn committed_bytes(&self) -> usize {
        self.regions_in_use() * REGION_SIZE
    }

    /// Number of regions left in the free pool.
    #[must_use]
    pub fn free_regions(&self) -> usize {
        self.pool.lock().len()
    }

    /// True if `addr` falls inside this heap's reservation.
    #[inline]
    #[must_use]
    pub fn contains(&self, addr: usize) -> bool {
        addr >= self.base && addr < self.base + self.regions.len() * REGION_SIZE
    }

    /// Region by id.
    #[must_use]
    pub fn region(&self, id: RegionId) -> &Region {
        &self.regions[id.index()]
    }

    /// Region containing `addr`, if it lies in the reservation.
    #[inline]
    #[must_use]
    pub fn region_of(&self, addr: usize) -> Option<&Region> {
        if self.contains(addr) {
            Some(&self.regions[(addr - self.base) >> REGION_SHIFT])
        } else {
            None
        }
    }

    /// Region holding the header of the object at `addr`, following huge tails to their head.
    #[must_use]
    pub fn object_region(&self, addr: usize) -> Option<&Region> {
        let region = self.region_of(addr)?;
        if region.is_huge_tail() {
            Some(&self.regions[region.run.load(Ordering::Acquire) as usize])
        } else {
            Some(region)
        }
    }

    #[cfg_attr(not(feature = "tracing"), allow(unused_variables))]
    fn commit(&self, first: usize, count: usize) -> bool {
        match self.mmap.commit(first * REGION_SIZE, count * REGION_SIZE) {
            Ok(()) => true,
            Err(err) => {
                gc_warn!(error = %err, "failed to commit region memory");
                false
            }
        }
    }

    /// Takes the lowest free region and gives it `flags`.
    pub fn acquire(&self, flags: RegionFlags) -> Option<&Region> {
        let index = {
            let mut pool = self.pool.lock();
            pool.pop_first()?
        };
        if !self.commit(index as usize, 1) {
            self.pool.lock().insert(index);
            return None;
        }
        let region = &self.regions[index as usize];
        region.reset(flags, &*self.policy);
        self.in_use.fetch_add(1, Ordering::Relaxed);
        Some(region)
    }

    /// Takes `count` consecutive free regions for one huge object.
    ///
    /// The head gets `flags | HUGE`, the tails additionally `HUGE_TAIL`.
    pub fn acquire_run(&self, count: usize, flags: RegionFlags) -> Option<&Region> {
        debug_assert!(count > 0);
        let first = {
            let mut pool = self.pool.lock();
            let first = find_run(&pool, count)?;
            for i in first..first + count {
                pool.remove(&(i as u32));
            }
            first
        };
        if !self.commit(first, count) {
            let mut pool = self.pool.lock();
            pool.extend((first..first + count).filter_map(|i| u32::try_from(i).ok()));
            return None;
        }
        let head = &self.regions[first];
        let head_flags = flags | RegionFlags::HUGE;
        head.reset(head_flags, &*self.policy);
        head.run
            .store(u32::try_from(count).unwrap_or(u32::MAX), Ordering::Release);
        for region in &self.regions[first + 1..first + count] {
            region.reset(head_flags | RegionFlags::HUGE_TAIL, &*self.policy);
            region
                .run
                .store(u32::try_from(first).unwrap_or(u32::MAX), Ordering::Release);
        }
        self.in_use.fetch_add(count, Ordering::Relaxed);
        Some(head)
    }

    /// Returns a region (or a whole huge run, given its head) to the free pool.
    #[cfg_attr(not(feature = "tracing"), allow(unused_variables))]
    pub fn release(&self, id: RegionId) {
        let first = id.index();
        let count = self.regions[first].run_length();
        for region in &self.regions[first..first + count] {
            debug_assert!(region.in_use(), "releasing a free region: {region:?}");
            region.flags.store(0, Ordering::Release);
            region.rsets.clear_all();
        }
        if let Err(err) = self.mmap.decommit(first * REGION_SIZE, count * REGION_SIZE) {
            gc_warn!(error = %err, "failed to decommit region memory");
        }
        self.in_use.fetch_sub(count, Ordering::Relaxed);
        let mut pool = self.pool.lock();
        pool.extend((first..first + count).filter_map(|i| u32::try_from(i).ok()));
    }

    /// `head` and, for a huge run, its tails.
    pub(crate) fn run(&self, head: RegionId) -> &[Region] {
        let first = head.index();
        &self.regions[first..first + self.regions[first].run_length()]
    }

    /// Calls `f` for every region in use, huge tails included.
    pub fn for_each_in_use(&self, mut f: impl FnMut(&Region)) {
        for region in self.regions.iter().filter(|r| r.in_use()) {
            f(region);
        }
    }

    /// Ids of every region in use matching `pred`.
    pub fn collect_regions(&self, mut pred: impl FnMut(&Region) -> bool) -> Vec<RegionId> {
        self.regions
            .iter()
            .filter(|r| r.in_use() && pred(r))
            .map(Region::id)
            .collect()
    }
}

impl fmt::Debug for RegionTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegionTable")
            .field("base", &format_args!("{:#x}", self.base))
            .field("capacity", &self.capacity())
            .field("in_use", &self.regions_in_use())
            .finish_non_exhaustive()
    }
}

fn find_run(pool: &BTreeSet<u32>, count: usize) -> Option<usize> {
    let mut start = None;
    let mut len = 0usize;
    let mut prev: Option<u32> = None;
    for &idx in pool {
        match prev {
            Some(p) if p + 1 == idx => len += 1,
            _ => {
                start = Some(idx as usize);
                len = 1;
            }
        }
        if len == count {
            return start;
        }
        prev = Some(idx);
    }
    None
}
