//! memfd-backed heap emulation.
//!
//! Provides the same contract as the kernel DMA heaps on hosts that have none.
//! A memfd can be mapped, passed over SCM_RIGHTS and fstat'ed like a DMA-BUF,
//! which is all the allocator and mapper need.

use super::{HeapBackend, HeapFlags, SyncAccess, heap_names};
use crate::error::{Error, Result};
use rustix::fd::{BorrowedFd, OwnedFd};
use rustix::fs::MemfdFlags;
use std::collections::BTreeSet;

/// Heap backend built on `memfd_create`.
#[derive(Debug, Clone)]
pub struct MemfdHeapBackend {
    heaps: BTreeSet<String>,
    label: String,
}

impl MemfdHeapBackend {
    /// Backend exposing only the general-purpose heaps.
    pub fn new() -> Self {
        Self::with_heaps([heap_names::SYSTEM, heap_names::SYSTEM_UNCACHED])
    }

    /// Backend exposing exactly `heaps`.
    pub fn with_heaps<I, S>(heaps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            heaps: heaps.into_iter().map(Into::into).collect(),
            label: "gralloc".to_owned(),
        }
    }

    /// Backend exposing every heap the selector knows about.
    pub fn with_all_heaps() -> Self {
        Self::with_heaps([
            heap_names::SYSTEM,
            heap_names::SYSTEM_UNCACHED,
            heap_names::FACEAUTH_IMAGE,
            heap_names::FACEAUTH_RAW_IMAGE,
            heap_names::FACEAUTH_PREVIEW,
            heap_names::FACEAUTH_MODEL,
            heap_names::FACEAUTH_TPU,
            heap_names::VIDEO_FRAME,
            heap_names::SENSOR_DIRECT,
        ])
    }

    /// Prefix for memfd names, visible in `/proc/<pid>/fd`.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Prefix used for memfd names.
    pub fn label(&self) -> &str {
        &self.label
    }
}

impl Default for MemfdHeapBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl HeapBackend for MemfdHeapBackend {
    fn alloc(&self, heap: &str, size: u64, flags: HeapFlags) -> Result<OwnedFd> {
        if !self.heaps.contains(heap) {
            return Err(Error::NoResources(format!("heap {heap} does not exist")));
        }
        if size == 0 {
            return Err(Error::NoResources("zero-sized allocation".into()));
        }

        let fd = rustix::fs::memfd_create(format!("{}:{}", self.label, heap), MemfdFlags::CLOEXEC)?;
        rustix::fs::ftruncate(&fd, size)?;
        tracing::trace!(heap, size, ?flags, "memfd allocation");
        Ok(fd)
    }

    fn set_name(&self, fd: BorrowedFd<'_>, _name: &str) -> Result<()> {
        // memfd names are fixed at creation.
        rustix::fs::fstat(fd)?;
        Ok(())
    }

    fn sync_start(&self, fd: BorrowedFd<'_>, _access: SyncAccess) -> Result<()> {
        rustix::fs::fstat(fd)?;
        Ok(())
    }

    fn sync_end(&self, fd: BorrowedFd<'_>, _access: SyncAccess) -> Result<()> {
        rustix::fs::fstat(fd)?;
        Ok(())
    }

    fn available_heaps(&self) -> BTreeSet<String> {
        self.heaps.clone()
    }
}
