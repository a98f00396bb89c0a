//! Region bitsets.
//!
//! A [`GcBitset`] records one bit per 8-byte slot of a region. The same type
//! backs the mark bitmap (a bit per object start) and every remembered set
//! (a bit per reference slot).

use crate::sync::{AtomicU64, Ordering};

const BITS_PER_WORD: usize = 64;

/// A fixed-capacity bitset with atomic and owner-only access paths.
///
/// # Example
///
/// ```
/// use regent_gc::GcBitset;
///
/// let bits = GcBitset::new(512);
/// assert!(bits.set_atomic(3));
/// assert!(!bits.set_atomic(3));
/// assert!(bits.test(3));
/// ```
#[derive(Debug)]
pub struct GcBitset {
    words: Box<[AtomicU64]>,
    len: usize,
}

impl GcBitset {
    /// Create a bitset holding `len` bits, all clear.
    #[must_use]
    pub fn new(len: usize) -> Self {
        let words = (0..len.div_ceil(BITS_PER_WORD))
            .map(|_| AtomicU64::new(0))
            .collect();
        Self { words, len }
    }

    /// Number of bits.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// True if the bitset holds no bits.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    const fn split(index: usize) -> (usize, u64) {
        (index / BITS_PER_WORD, 1u64 << (index % BITS_PER_WORD))
    }

    /// Sets a bit from any thread. Returns true if this call set it.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of bounds.
    #[inline]
    pub fn set_atomic(&self, index: usize) -> bool {
        debug_assert!(index < self.len);
        let (word, mask) = Self::split(index);
        self.words[word].fetch_or(mask, Ordering::AcqRel) & mask == 0
    }

    /// Sets a bit with a plain read-modify-write.
    ///
    /// Only the thread that exclusively owns the covered memory may use this,
    /// e.g. a worker marking objects in its own evacuation buffer.
    #[inline]
    pub fn set_non_atomic(&self, index: usize) -> bool {
        debug_assert!(index < self.len);
        let (word, mask) = Self::split(index);
        let old = self.words[word].load(Ordering::Relaxed);
        if old & mask != 0 {
            return false;
        }
        self.words[word].store(old | mask, Ordering::Relaxed);
        true
    }

    /// Reads a bit.
    #[inline]
    #[must_use]
    pub fn test(&self, index: usize) -> bool {
        debug_assert!(index < self.len);
        let (word, mask) = Self::split(index);
        self.words[word].load(Ordering::Acquire) & mask != 0
    }

    /// Clears a bit from any thread.
    #[inline]
    pub fn clear_atomic(&self, index: usize) {
        let (word, mask) = Self::split(index);
        self.words[word].fetch_and(!mask, Ordering::AcqRel);
    }

    /// Sets every bit in `[start, end)`.
    pub fn set_range_atomic(&self, start: usize, end: usize) {
        self.apply_range(start, end, |word, mask| {
            word.fetch_or(mask, Ordering::AcqRel);
        });
    }

    /// Clears every bit in `[start, end)`.
    pub fn clear_range(&self, start: usize, end: usize) {
        self.apply_range(start, end, |word, mask| {
            word.fetch_and(!mask, Ordering::AcqRel);
        });
    }

    fn apply_range(&self, start: usize, end: usize, op: impl Fn(&AtomicU64, u64)) {
        let end = end.min(self.len);
        if start >= end {
            return;
        }
        let first = start / BITS_PER_WORD;
        let last = (end - 1) / BITS_PER_WORD;
        for idx in first..=last {
            let lo = if idx == first { start % BITS_PER_WORD } else { 0 };
            let hi = if idx == last {
                (end - 1) % BITS_PER_WORD
            } else {
                BITS_PER_WORD - 1
            };
            let width = hi - lo + 1;
            let mask = if width == BITS_PER_WORD {
                u64::MAX
            } else {
                ((1u64 << width) - 1) << lo
            };
            op(&self.words[idx], mask);
        }
    }

    /// Clears every bit.
    pub fn clear_all(&self) {
        for word in &*self.words {
            word.store(0, Ordering::Relaxed);
        }
    }

    /// ORs every bit of `other` into `self`.
    pub fn merge_from(&self, other: &Self) {
        debug_assert_eq!(self.len, other.len);
        for (dst, src) in self.words.iter().zip(other.words.iter()) {
            let bits = src.load(Ordering::Acquire);
            if bits != 0 {
                dst.fetch_or(bits, Ordering::AcqRel);
            }
        }
    }

    /// True if no bit is set.
    #[must_use]
    pub fn is_clear(&self) -> bool {
        self.words.iter().all(|w| w.load(Ordering::Acquire) == 0)
    }

    /// Number of set bits.
    #[must_use]
    pub fn count(&self) -> usize {
        self.words
            .iter()
            .map(|w| w.load(Ordering::Acquire).count_ones() as usize)
            .sum()
    }

    /// Calls `f` with the index of every set bit, in ascending order.
    ///
    /// Bits set concurrently with the walk may or may not be observed.
    pub fn for_each_set(&self, mut f: impl FnMut(usize)) {
        for (idx, word) in self.words.iter().enumerate() {
            let mut bits = word.load(Ordering::Acquire);
            while bits != 0 {
                let bit = bits.trailing_zeros() as usize;
                f(idx * BITS_PER_WORD + bit);
                bits &= bits - 1;
            }
        }
    }

    /// Like [`for_each_set`](Self::for_each_set), clearing every bit for which `f` returns false.
    pub fn retain(&self, mut f: impl FnMut(usize) -> bool) {
        for (idx, word) in self.words.iter().enumerate() {
            let mut bits = word.load(Ordering::Acquire);
            let mut dropped = 0u64;
            while bits != 0 {
                let bit = bits.trailing_zeros() as usize;
                if !f(idx * BITS_PER_WORD + bit) {
                    dropped |= 1u64 << bit;
                }
                bits &= bits - 1;
            }
            if dropped != 0 {
                word.fetch_and(!dropped, Ordering::AcqRel);
            }
        }
    }

    /// Index of the first set bit at or after `from`, if any.
    #[must_use]
    pub fn next_set(&self, from: usize) -> Option<usize> {
        if from >= self.len {
            return None;
        }
        let mut idx = from / BITS_PER_WORD;
        let mut bits = self.words[idx].load(Ordering::Acquire) & (u64::MAX << (from % BITS_PER_WORD));
        loop {
            if bits != 0 {
                let found = idx * BITS_PER_WORD + bits.trailing_zeros() as usize;
                return (found < self.len).then_some(found);
            }
            idx += 1;
            if idx >= self.words.len() {
                return None;
            }
            bits = self.words[idx].load(Ordering::Acquire);
        }
    }
}
