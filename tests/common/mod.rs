//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use gralloc::heap::{HeapBackend, HeapFlags, MemfdHeapBackend, SyncAccess};
use gralloc::prelude::*;
use rustix::fd::{BorrowedFd, OwnedFd};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Once;

/// Install a test subscriber once; honours `RUST_LOG`.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// memfd backend whose fds carry `label`, so a test can count what it leaks.
pub fn labelled_backend(label: &str) -> MemfdHeapBackend {
    MemfdHeapBackend::new().with_label(label)
}

/// Open fds of this process that were created by a backend labelled `label`.
pub fn open_fds_with_label(label: &str) -> usize {
    let needle = format!("memfd:{label}:");
    std::fs::read_dir("/proc/self/fd")
        .map(|dir| {
            dir.filter_map(|entry| entry.ok())
                .filter_map(|entry| std::fs::read_link(entry.path()).ok())
                .filter(|target| target.to_string_lossy().contains(&needle))
                .count()
        })
        .unwrap_or(0)
}

/// Backend that fails the `fail_at`-th allocation (0-based) and delegates
/// everything else.
pub struct FailingBackend {
    inner: MemfdHeapBackend,
    fail_at: usize,
    calls: AtomicUsize,
}

impl FailingBackend {
    pub fn new(inner: MemfdHeapBackend, fail_at: usize) -> Self {
        Self {
            inner,
            fail_at,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl HeapBackend for FailingBackend {
    fn alloc(&self, heap: &str, size: u64, flags: HeapFlags) -> gralloc::Result<OwnedFd> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == self.fail_at {
            return Err(Error::NoResources("injected allocation failure".into()));
        }
        self.inner.alloc(heap, size, flags)
    }

    fn set_name(&self, fd: BorrowedFd<'_>, name: &str) -> gralloc::Result<()> {
        self.inner.set_name(fd, name)
    }

    fn sync_start(&self, fd: BorrowedFd<'_>, access: SyncAccess) -> gralloc::Result<()> {
        self.inner.sync_start(fd, access)
    }

    fn sync_end(&self, fd: BorrowedFd<'_>, access: SyncAccess) -> gralloc::Result<()> {
        self.inner.sync_end(fd, access)
    }

    fn available_heaps(&self) -> BTreeSet<String> {
        self.inner.available_heaps()
    }
}

/// Services over a memfd backend labelled `label`.
pub fn gralloc(label: &str) -> Gralloc {
    init_tracing();
    Gralloc::new(
        GrallocConfig::default().with_diagnostics_capacity(64),
        Arc::new(labelled_backend(label)),
    )
    .unwrap()
}

/// An RGBA buffer request.
pub fn rgba_info(name: &str, width: u32, height: u32, usage: BufferUsage) -> BufferDescriptorInfo {
    BufferDescriptorInfo {
        name: name.into(),
        width,
        height,
        layer_count: 1,
        format: PixelFormat::RGBA_8888,
        usage,
        reserved_size: 0,
    }
}

/// CPU read/write usage.
pub fn cpu_rw() -> BufferUsage {
    BufferUsage::CPU_READ_OFTEN | BufferUsage::CPU_WRITE_OFTEN
}
