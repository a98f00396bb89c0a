//! Marking primitives.

mod bitmap;

pub use bitmap::GcBitset;
