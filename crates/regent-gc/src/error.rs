//! Error types returned by heap construction and allocation.

use std::io;

use thiserror::Error;

use crate::heap::SpaceType;

/// Errors reported by the heap.
///
/// Collector-internal failures never surface here: running out of memory
/// while relocating a live object aborts the process, and broken invariants
/// are debug assertions.
#[derive(Debug, Error)]
pub enum HeapError {
    /// Allocation failed after every collection the heap could run.
    #[error("out of memory allocating {size} bytes in {space:?} space")]
    OutOfMemory {
        /// Space the allocation targeted.
        space: SpaceType,
        /// Requested size in bytes.
        size: usize,
    },
    /// The OS refused to reserve the heap's address range.
    #[error("failed to reserve {size} bytes of address space")]
    ReserveFailed {
        /// Requested reservation size.
        size: usize,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },
    /// A configuration value is out of range.
    #[error("invalid heap configuration: {0}")]
    InvalidConfig(String),
    /// The object cannot be placed in the requested space.
    #[error("object of {size} bytes cannot be allocated in {space:?} space")]
    ObjectTooLarge {
        /// Space the allocation targeted.
        space: SpaceType,
        /// Requested size in bytes.
        size: usize,
    },
    /// A shared-space allocation was requested on a heap without a shared heap.
    #[error("heap is not attached to a shared heap")]
    NoSharedHeap,
    /// The shared collector thread could not be started.
    #[error("failed to spawn the shared gc daemon")]
    DaemonSpawn(#[source] io::Error),
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, HeapError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = HeapError::OutOfMemory {
            space: SpaceType::Old,
            size: 64,
        };
        assert_eq!(err.to_string(), "out of memory allocating 64 bytes in Old space");

        let err = HeapError::InvalidConfig("semi space is empty".into());
        assert!(err.to_string().contains("semi space is empty"));
    }

    #[test]
    fn test_reserve_failed_keeps_source() {
        let err = HeapError::ReserveFailed {
            size: 1 << 30,
            source: io::Error::from(io::ErrorKind::OutOfMemory),
        };
        assert!(std::error::Error::source(&err).is_some());
    }
}
