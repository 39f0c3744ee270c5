//! Kernel DMA-BUF heap backend.
//!
//! Each heap is a character device under `/dev/dma_heap`. Allocation is a
//! single ioctl on the heap device that returns a new DMA-BUF fd.

use super::{HeapBackend, HeapFlags, SyncAccess};
use crate::error::{Error, Result};
use parking_lot::Mutex;
use rustix::fd::{AsRawFd, BorrowedFd, FromRawFd, OwnedFd};
use rustix::fs::{Mode, OFlags};
use std::collections::{BTreeSet, HashMap};
use std::ffi::CString;
use std::path::PathBuf;

// See: include/uapi/linux/dma-heap.h and include/uapi/linux/dma-buf.h

/// DMA_HEAP_IOCTL_ALLOC: _IOWR('H', 0, struct dma_heap_allocation_data)
const DMA_HEAP_IOCTL_ALLOC: libc::c_ulong = 0xc018_4800;

/// DMA_BUF_IOCTL_SYNC: _IOW('b', 0, struct dma_buf_sync)
const DMA_BUF_IOCTL_SYNC: libc::c_ulong = 0x4008_6200;

/// DMA_BUF_SET_NAME: _IOW('b', 1, const char *)
const DMA_BUF_SET_NAME: libc::c_ulong = 0x4008_6201;

const DMA_BUF_SYNC_READ: u64 = 1 << 0;
const DMA_BUF_SYNC_WRITE: u64 = 2 << 0;
const DMA_BUF_SYNC_RW: u64 = DMA_BUF_SYNC_READ | DMA_BUF_SYNC_WRITE;
const DMA_BUF_SYNC_START: u64 = 0 << 2;
const DMA_BUF_SYNC_END: u64 = 1 << 2;

/// Longest name the kernel keeps for a DMA-BUF, including the terminator.
const DMA_BUF_NAME_LEN: usize = 32;

/// dma_heap_allocation_data for DMA_HEAP_IOCTL_ALLOC.
#[repr(C)]
struct DmaHeapAllocationData {
    /// Requested size.
    len: u64,
    /// OUTPUT: the new DMA-BUF fd.
    fd: u32,
    /// Flags for the returned fd (O_RDWR, O_CLOEXEC).
    fd_flags: u32,
    /// Heap-specific flags.
    heap_flags: u64,
}

/// dma_buf_sync for DMA_BUF_IOCTL_SYNC.
#[repr(C)]
struct DmaBufSync {
    flags: u64,
}

/// Backend that allocates from `/dev/dma_heap/<name>`.
///
/// Heap device fds are opened on first use and kept open.
pub struct DmaHeapBackend {
    root: PathBuf,
    devices: Mutex<HashMap<String, OwnedFd>>,
}

impl DmaHeapBackend {
    /// Backend rooted at `root` (normally `/dev/dma_heap`).
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            devices: Mutex::new(HashMap::new()),
        }
    }

    fn device_fd(&self, heap: &str) -> Result<libc::c_int> {
        let mut devices = self.devices.lock();
        if let Some(fd) = devices.get(heap) {
            return Ok(fd.as_raw_fd());
        }

        let path = self.root.join(heap);
        let fd = rustix::fs::open(&path, OFlags::RDONLY | OFlags::CLOEXEC, Mode::empty())
            .map_err(|e| {
                Error::NoResources(format!("failed to open heap {}: {}", path.display(), e))
            })?;
        let raw = fd.as_raw_fd();
        devices.insert(heap.to_owned(), fd);
        Ok(raw)
    }

    fn sync(&self, fd: BorrowedFd<'_>, access: SyncAccess, phase: u64) -> Result<()> {
        let direction = match access {
            SyncAccess::Read => DMA_BUF_SYNC_READ,
            SyncAccess::Write => DMA_BUF_SYNC_WRITE,
            SyncAccess::ReadWrite => DMA_BUF_SYNC_RW,
        };
        let mut sync = DmaBufSync {
            flags: direction | phase,
        };

        // SAFETY: DMA_BUF_IOCTL_SYNC reads a dma_buf_sync from the pointer;
        // the struct is initialized and outlives the call.
        let ret = unsafe { libc::ioctl(fd.as_raw_fd(), DMA_BUF_IOCTL_SYNC, &mut sync) };
        if ret < 0 {
            return Err(std::io::Error::last_os_error().into());
        }
        Ok(())
    }
}

impl Default for DmaHeapBackend {
    fn default() -> Self {
        Self::new(crate::config::defaults::DMA_HEAP_ROOT)
    }
}

impl HeapBackend for DmaHeapBackend {
    fn alloc(&self, heap: &str, size: u64, flags: HeapFlags) -> Result<OwnedFd> {
        let device = self.device_fd(heap)?;

        let mut data = DmaHeapAllocationData {
            len: size,
            fd: 0,
            fd_flags: (libc::O_RDWR | libc::O_CLOEXEC) as u32,
            heap_flags: 0,
        };

        // SAFETY: DMA_HEAP_IOCTL_ALLOC fills in data.fd on success. The device
        // fd is kept open by self.devices for the duration of the call.
        let ret = unsafe { libc::ioctl(device, DMA_HEAP_IOCTL_ALLOC, &mut data) };
        if ret < 0 {
            let err = std::io::Error::last_os_error();
            tracing::error!(heap, size, ?flags, error = %err, "DMA heap allocation failed");
            return Err(Error::NoResources(format!(
                "allocation of {size} bytes from {heap} failed: {err}"
            )));
        }

        // SAFETY: on success the kernel returned a new fd we now own.
        Ok(unsafe { OwnedFd::from_raw_fd(data.fd as libc::c_int) })
    }

    fn set_name(&self, fd: BorrowedFd<'_>, name: &str) -> Result<()> {
        let truncated: Vec<u8> = name.bytes().take(DMA_BUF_NAME_LEN - 1).collect();
        let name = CString::new(truncated)
            .map_err(|_| Error::BadValue("buffer name contains a NUL byte".into()))?;

        // SAFETY: the kernel copies at most DMA_BUF_NAME_LEN bytes from a
        // NUL-terminated string that lives until the call returns.
        let ret = unsafe { libc::ioctl(fd.as_raw_fd(), DMA_BUF_SET_NAME, name.as_ptr()) };
        if ret < 0 {
            return Err(std::io::Error::last_os_error().into());
        }
        Ok(())
    }

    fn sync_start(&self, fd: BorrowedFd<'_>, access: SyncAccess) -> Result<()> {
        self.sync(fd, access, DMA_BUF_SYNC_START)
    }

    fn sync_end(&self, fd: BorrowedFd<'_>, access: SyncAccess) -> Result<()> {
        self.sync(fd, access, DMA_BUF_SYNC_END)
    }

    fn available_heaps(&self) -> BTreeSet<String> {
        match std::fs::read_dir(&self.root) {
            Ok(entries) => entries
                .filter_map(|entry| entry.ok())
                .filter_map(|entry| entry.file_name().into_string().ok())
                .collect(),
            Err(e) => {
                tracing::warn!(root = %self.root.display(), error = %e, "Cannot list DMA heaps");
                BTreeSet::new()
            }
        }
    }
}

impl std::fmt::Debug for DmaHeapBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DmaHeapBackend")
            .field("root", &self.root)
            .field("open_heaps", &self.devices.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_available_heaps_lists_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("system"), b"").unwrap();
        std::fs::write(dir.path().join("system-uncached"), b"").unwrap();

        let backend = DmaHeapBackend::new(dir.path());
        let heaps = backend.available_heaps();
        assert_eq!(heaps.len(), 2);
        assert!(heaps.contains("system"));
        assert!(heaps.contains("system-uncached"));
    }

    #[test]
    fn test_missing_root_has_no_heaps() {
        let dir = tempfile::tempdir().unwrap();
        let backend = DmaHeapBackend::new(dir.path().join("absent"));
        assert!(backend.available_heaps().is_empty());
    }

    #[test]
    fn test_missing_heap_is_resource_error() {
        let dir = tempfile::tempdir().unwrap();
        let backend = DmaHeapBackend::new(dir.path());
        let err = backend.alloc("system", 4096, HeapFlags::default()).unwrap_err();
        assert!(matches!(err, Error::NoResources(_)));
    }

    #[test]
    fn test_ioctl_numbers() {
        // _IOWR('H', 0, 24 bytes)
        assert_eq!(std::mem::size_of::<DmaHeapAllocationData>(), 24);
        assert_eq!(DMA_HEAP_IOCTL_ALLOC, (3 << 30) | (24 << 16) | (b'H' as libc::c_ulong) << 8);
        // _IOW('b', 0, 8 bytes)
        assert_eq!(DMA_BUF_IOCTL_SYNC, (1 << 30) | (8 << 16) | (b'b' as libc::c_ulong) << 8);
    }
}
