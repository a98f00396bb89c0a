//! Bump-pointer allocation buffers.

use crate::heap::region::RegionId;

/// A `[top, end)` window of a region owned by one thread.
#[derive(Debug, Default)]
pub struct Tlab {
    top: usize,
    end: usize,
    region: Option<RegionId>,
}

impl Tlab {
    /// An empty buffer.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            top: 0,
            end: 0,
            region: None,
        }
    }

    /// Installs a fresh window.
    pub fn reset(&mut self, start: usize, end: usize, region: RegionId) {
        self.top = start;
        self.end = end;
        self.region = Some(region);
    }

    /// Bumps `size` bytes off the window.
    #[inline]
    pub fn allocate(&mut self, size: usize) -> Option<usize> {
        if self.region.is_none() || self.end - self.top < size {
            return None;
        }
        let addr = self.top;
        self.top += size;
        Some(addr)
    }

    /// Undoes the most recent allocation if `[addr, addr + size)` was it.
    pub fn rollback(&mut self, addr: usize, size: usize) -> bool {
        if self.region.is_some() && addr + size == self.top {
            self.top = addr;
            true
        } else {
            false
        }
    }

    /// Bytes left in the window.
    #[must_use]
    pub const fn remaining(&self) -> usize {
        self.end - self.top
    }

    /// Region the window lives in.
    #[must_use]
    pub const fn region(&self) -> Option<RegionId> {
        self.region
    }

    /// Empties the buffer, returning the unused tail.
    pub fn take(&mut self) -> Option<(RegionId, usize, usize)> {
        let region = self.region.take()?;
        let leftover = (region, self.top, self.end);
        self.top = 0;
        self.end = 0;
        Some(leftover)
    }
}
