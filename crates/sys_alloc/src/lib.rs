//! Virtual memory primitives for region-based heaps.
//!
//! A heap reserves one large, aligned range of address space up front and
//! hands out fixed-size regions from it. Pages backing a released region are
//! returned to the OS with [`Mmap::decommit`] and brought back with
//! [`Mmap::commit`] when the region is reused.

use std::io;

#[cfg(unix)]
mod unix;
#[cfg(unix)]
use unix as os;

#[cfg(windows)]
mod windows;
#[cfg(windows)]
use windows as os;

pub use os::page_size;

/// Returns the system allocation granularity.
///
/// On Windows, this is typically 64KB. On Unix, this is typically the system page size.
/// Alignments up to this value come for free from the OS.
#[must_use]
pub fn allocation_granularity() -> usize {
    #[cfg(windows)]
    {
        os::allocation_granularity()
    }
    #[cfg(unix)]
    {
        os::page_size()
    }
}

/// A handle to a memory mapped region.
///
/// The region is automatically unmapped when this handle is dropped.
pub struct Mmap {
    inner: os::MmapInner,
    /// Offset of the first usable byte inside the OS mapping (non-zero when aligned).
    offset: usize,
    len: usize,
}

impl Mmap {
    /// Returns a pointer to the start of the usable range.
    #[must_use]
    pub fn ptr(&self) -> *mut u8 {
        // SAFETY: `offset + len` never exceeds the OS mapping.
        unsafe { self.inner.ptr().add(self.offset) }
    }

    /// Returns the length of the usable range in bytes.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Returns true if the mapping is empty.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Makes `[offset, offset + len)` readable and writable.
    ///
    /// Ranges are rounded outward to page boundaries.
    ///
    /// # Errors
    ///
    /// Returns the OS error if the pages cannot be committed.
    pub fn commit(&self, offset: usize, len: usize) -> io::Result<()> {
        let (start, len) = self.page_range(offset, len)?;
        // SAFETY: the range lies inside this mapping.
        unsafe { os::commit(start, len) }
    }

    /// Returns the physical pages backing `[offset, offset + len)` to the OS.
    ///
    /// The address range stays reserved. Contents are unspecified after a
    /// decommit, so callers must re-initialise the memory before reuse.
    ///
    /// # Errors
    ///
    /// Returns the OS error if the pages cannot be released.
    pub fn decommit(&self, offset: usize, len: usize) -> io::Result<()> {
        let (start, len) = self.page_range(offset, len)?;
        // SAFETY: the range lies inside this mapping and no live data is kept there.
        unsafe { os::decommit(start, len) }
    }

    fn page_range(&self, offset: usize, len: usize) -> io::Result<(*mut u8, usize)> {
        if offset.checked_add(len).is_none_or(|end| end > self.len) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "range exceeds the mapping",
            ));
        }
        let page = page_size();
        let begin = offset & !(page - 1);
        let end = (offset + len).div_ceil(page) * page;
        let end = end.min(self.len);
        // SAFETY: `begin` is within the mapping.
        Ok((unsafe { self.ptr().add(begin) }, end - begin))
    }
}

// SAFETY: the mapping is plain memory owned by this handle.
unsafe impl Send for Mmap {}
// SAFETY: the handle itself is immutable; concurrent access to the memory is the caller's contract.
unsafe impl Sync for Mmap {}

/// Configuration for creating a memory mapping.
#[derive(Debug, Clone)]
pub struct MmapOptions {
    len: usize,
    align: usize,
    no_reserve: bool,
}

impl MmapOptions {
    /// Creates a new `MmapOptions` with default settings (length 0).
    /// You must set a length before mapping.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            len: 0,
            align: 0,
            no_reserve: false,
        }
    }

    /// Sets the length of the mapping in bytes.
    #[must_use]
    pub const fn len(mut self, len: usize) -> Self {
        self.len = len;
        self
    }

    /// Requires the start of the usable range to be a multiple of `align`.
    ///
    /// `align` must be a power of two. The mapping over-reserves by `align`
    /// bytes and trims (or skips) the unaligned head.
    #[must_use]
    pub const fn align(mut self, align: usize) -> Self {
        self.align = align;
        self
    }

    /// Reserves address space without backing it up front.
    ///
    /// On Unix this adds `MAP_NORESERVE`. On Windows the range is only
    /// reserved and [`Mmap::commit`] must be called before touching a page.
    #[must_use]
    pub const fn no_reserve(mut self, no_reserve: bool) -> Self {
        self.no_reserve = no_reserve;
        self
    }

    /// Creates an anonymous memory map.
    ///
    /// # Errors
    ///
    /// Returns an error if the length is zero, the alignment is not a power of
    /// two, or the OS refuses the mapping.
    pub fn map_anon(&self) -> io::Result<Mmap> {
        if self.len == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "length must be greater than 0",
            ));
        }
        if self.align != 0 && !self.align.is_power_of_two() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "alignment must be a power of two",
            ));
        }
        let extra = if self.align > allocation_granularity() {
            self.align
        } else {
            0
        };
        let total = self.len.checked_add(extra).ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "length overflows")
        })?;

        let inner = os::MmapInner::map_anon(total, self.no_reserve)?;

        let (inner, offset) = if extra == 0 {
            (inner, 0)
        } else {
            let base = inner.ptr() as usize;
            let head = base.next_multiple_of(self.align) - base;
            // SAFETY: `[head, head + len)` lies inside the mapping of `total` bytes.
            unsafe { inner.trim(head, self.len) }
        };

        Ok(Mmap {
            inner,
            offset,
            len: self.len,
        })
    }
}

impl Default for MmapOptions {
    fn default() -> Self {
        Self::new()
    }
}
