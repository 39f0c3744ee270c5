//! CPU mappings of DMA-BUF fds.
//!
//! A [`DmaBufMapping`] is the CPU view of one buffer fd. It borrows the fd
//! only for the `mmap` call: the mapping stays valid after the fd is closed,
//! and is unmapped when dropped.
//!
//! # Example
//!
//! ```rust,ignore
//! use gralloc::memory::DmaBufMapping;
//!
//! let mut mapping = DmaBufMapping::map(fd.as_fd(), size, true)?;
//! mapping.as_mut_slice().unwrap().fill(0);
//! ```

use crate::error::{Error, Result};
use rustix::fd::BorrowedFd;
use rustix::mm::{MapFlags, ProtFlags};
use std::ptr::NonNull;

/// A shared mapping of a DMA-BUF (or memfd) fd.
///
/// # Thread Safety
///
/// `DmaBufMapping` is `Send + Sync`. Concurrent reads are safe; mutable
/// access requires `&mut self`. Coherency with devices is the caller's job
/// (bracket CPU access with the heap's sync calls).
pub struct DmaBufMapping {
    ptr: NonNull<u8>,
    len: usize,
    read_only: bool,
}

impl DmaBufMapping {
    /// Map `len` bytes of `fd` from offset 0.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoResources`] if `len` is zero or `mmap` fails.
    pub fn map(fd: BorrowedFd<'_>, len: usize, writable: bool) -> Result<Self> {
        if len == 0 {
            return Err(Error::NoResources("cannot map an empty buffer".into()));
        }

        let prot = if writable {
            ProtFlags::READ | ProtFlags::WRITE
        } else {
            ProtFlags::READ
        };

        // SAFETY: a fresh shared mapping chosen by the kernel; nothing else
        // aliases the returned range.
        let ptr = unsafe {
            rustix::mm::mmap(std::ptr::null_mut(), len, prot, MapFlags::SHARED, fd, 0)
                .map_err(|e| Error::NoResources(format!("mmap of {len} bytes failed: {e}")))?
        };

        let ptr = NonNull::new(ptr.cast::<u8>())
            .ok_or_else(|| Error::NoResources("mmap returned null".into()))?;

        Ok(Self {
            ptr,
            len,
            read_only: !writable,
        })
    }

    /// Base address of the mapping.
    #[inline]
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    /// Mapped bytes.
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: ptr is valid for len bytes for the lifetime of self
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    /// Mapped bytes, mutably. `None` for read-only mappings.
    #[inline]
    pub fn as_mut_slice(&mut self) -> Option<&mut [u8]> {
        if self.read_only {
            None
        } else {
            // SAFETY: ptr is valid for len bytes and we hold &mut self
            Some(unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) })
        }
    }

    /// Whether the mapping is read-only.
    #[inline]
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Size in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Always false; empty mappings cannot be created.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Drop for DmaBufMapping {
    fn drop(&mut self) {
        // SAFETY: ptr/len came from a successful mmap and are unmapped once.
        unsafe {
            let _ = rustix::mm::munmap(self.ptr.as_ptr().cast(), self.len);
        }
    }
}

// SAFETY: the mapping is plain shared memory; the pointer is not tied to the
// creating thread.
unsafe impl Send for DmaBufMapping {}

// SAFETY: shared access only reads; writes need &mut self.
unsafe impl Sync for DmaBufMapping {}

impl std::fmt::Debug for DmaBufMapping {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DmaBufMapping")
            .field("ptr", &self.ptr)
            .field("len", &self.len)
            .field("read_only", &self.read_only)
            .finish()
    }
}
