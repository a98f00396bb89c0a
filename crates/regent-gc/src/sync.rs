//! Atomics shared with the loom model tests.
//!
//! Building with `--cfg loom` swaps these for loom's checked atomics so the
//! models in `tests/loom.rs` exercise the real bitset code.

#[cfg(loom)]
pub(crate) use loom::sync::atomic::{AtomicU64, Ordering};
#[cfg(not(loom))]
pub(crate) use std::sync::atomic::{AtomicU64, Ordering};
