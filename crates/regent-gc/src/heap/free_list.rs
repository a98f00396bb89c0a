//! Free-chunk list for the sweepable spaces.
//!
//! Chunks are bucketed by exact size in a `BTreeMap`, which gives best-fit
//! allocation: the smallest chunk that is large enough is split and its
//! remainder goes back into the list.

use std::collections::BTreeMap;

use crate::object::OBJECT_ALIGNMENT;

/// Chunks smaller than this are not worth tracking.
pub const MIN_FREE_CHUNK: usize = 2 * OBJECT_ALIGNMENT;

/// Best-fit list of free chunks.
#[derive(Debug, Default)]
pub struct FreeList {
    chunks: BTreeMap<usize, Vec<usize>>,
    free_bytes: usize,
    count: usize,
}

impl FreeList {
    /// Create an empty list.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            chunks: BTreeMap::new(),
            free_bytes: 0,
            count: 0,
        }
    }

    /// Adds `[addr, addr + size)`. Chunks below [`MIN_FREE_CHUNK`] are dropped.
    pub fn add(&mut self, addr: usize, size: usize) {
        if size < MIN_FREE_CHUNK {
            return;
        }
        debug_assert_eq!(addr % OBJECT_ALIGNMENT, 0);
        self.chunks.entry(size).or_default().push(addr);
        self.free_bytes += size;
        self.count += 1;
    }

    /// Carves `size` bytes out of the best-fitting chunk.
    pub fn allocate(&mut self, size: usize) -> Option<usize> {
        let (&chunk_size, addrs) = self.chunks.range_mut(size..).next()?;
        let addr = addrs.pop()?;
        if addrs.is_empty() {
            self.chunks.remove(&chunk_size);
        }
        self.free_bytes -= chunk_size;
        self.count -= 1;
        self.add(addr + size, chunk_size - size);
        Some(addr)
    }

    /// Keeps only the chunks for which `keep(addr, size)` holds.
    pub fn retain(&mut self, mut keep: impl FnMut(usize, usize) -> bool) {
        let mut free_bytes = 0;
        let mut count = 0;
        self.chunks.retain(|&size, addrs| {
            addrs.retain(|&addr| keep(addr, size));
            free_bytes += size * addrs.len();
            count += addrs.len();
            !addrs.is_empty()
        });
        self.free_bytes = free_bytes;
        self.count = count;
    }

    /// Drops every chunk.
    pub fn clear(&mut self) {
        self.chunks.clear();
        self.free_bytes = 0;
        self.count = 0;
    }

    /// Total bytes held.
    #[must_use]
    pub const fn free_bytes(&self) -> usize {
        self.free_bytes
    }

    /// Number of chunks held.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.count
    }

    /// True if no chunk is held.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// True if a chunk starts at `addr`.
    #[must_use]
    pub fn contains_chunk(&self, addr: usize) -> bool {
        self.chunks.values().any(|addrs| addrs.contains(&addr))
    }
}
