//! Physical memory heaps.
//!
//! A [`HeapBackend`] turns a heap name and a size into a shareable buffer fd.
//! Which heap a buffer comes from is decided by the [`HeapSelector`] from the
//! buffer's usage bits.
//!
//! # Backends
//!
//! | Backend | Storage | Use |
//! |---------|---------|-----|
//! | [`DmaHeapBackend`] | `/dev/dma_heap/<name>` | Production on Linux with DMA-BUF heaps |
//! | [`MemfdHeapBackend`] | `memfd_create` | Hosts without DMA heaps, tests |

mod dma_heap;
mod memfd;
mod selector;

pub use dma_heap::DmaHeapBackend;
pub use memfd::MemfdHeapBackend;
pub use selector::{EXACT_HEAPS, HeapSelector, HeapSpec, HeapTarget, SUBSET_HEAPS, heap_names};

use crate::error::Result;
use crate::usage::BufferUsage;
use rustix::fd::{BorrowedFd, OwnedFd};
use std::collections::BTreeSet;

/// Allocation flags passed to the backend with each request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapFlags {
    /// CPU caches may hold buffer contents.
    pub cached: bool,
    /// Buffer holds protected content.
    pub protected: bool,
}

impl HeapFlags {
    /// Flags implied by a usage.
    ///
    /// Sensor-direct buffers are always uncached.
    pub fn from_usage(usage: BufferUsage) -> Self {
        Self {
            cached: usage.cpu_read_often() && !usage.contains(BufferUsage::SENSOR_DIRECT_DATA),
            protected: usage.contains(BufferUsage::PROTECTED),
        }
    }
}

/// Direction of CPU access bracketed by a sync call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncAccess {
    /// CPU reads.
    Read,
    /// CPU writes.
    Write,
    /// CPU reads and writes.
    ReadWrite,
}

impl SyncAccess {
    /// Access implied by read/write intent. No intent maps to read-write.
    pub fn from_intent(read: bool, write: bool) -> Self {
        match (read, write) {
            (true, false) => SyncAccess::Read,
            (false, true) => SyncAccess::Write,
            _ => SyncAccess::ReadWrite,
        }
    }
}

/// Kernel-facing allocation capability.
pub trait HeapBackend: Send + Sync {
    /// Allocate `size` bytes from `heap`.
    ///
    /// # Errors
    ///
    /// Any failure is a resource failure for the caller.
    fn alloc(&self, heap: &str, size: u64, flags: HeapFlags) -> Result<OwnedFd>;

    /// Attach a debug name to a buffer fd.
    fn set_name(&self, fd: BorrowedFd<'_>, name: &str) -> Result<()>;

    /// Begin CPU access.
    fn sync_start(&self, fd: BorrowedFd<'_>, access: SyncAccess) -> Result<()>;

    /// End CPU access.
    fn sync_end(&self, fd: BorrowedFd<'_>, access: SyncAccess) -> Result<()>;

    /// Names of the heaps present on this system.
    fn available_heaps(&self) -> BTreeSet<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heap_flags_from_usage() {
        let flags = HeapFlags::from_usage(BufferUsage::CPU_READ_OFTEN);
        assert!(flags.cached);
        assert!(!flags.protected);

        let flags = HeapFlags::from_usage(BufferUsage::CPU_READ_RARELY | BufferUsage::PROTECTED);
        assert!(!flags.cached);
        assert!(flags.protected);

        let flags =
            HeapFlags::from_usage(BufferUsage::CPU_READ_OFTEN | BufferUsage::SENSOR_DIRECT_DATA);
        assert!(!flags.cached);
    }

    #[test]
    fn test_sync_access_from_intent() {
        assert_eq!(SyncAccess::from_intent(true, false), SyncAccess::Read);
        assert_eq!(SyncAccess::from_intent(false, true), SyncAccess::Write);
        assert_eq!(SyncAccess::from_intent(true, true), SyncAccess::ReadWrite);
        assert_eq!(SyncAccess::from_intent(false, false), SyncAccess::ReadWrite);
    }
}
