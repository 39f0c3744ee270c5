//! Buffer handles.
//!
//! A buffer travels between processes as a [`RawBufferHandle`]: a fixed set of
//! fds (one per memory plane, then the attribute fd) plus a serialized
//! [`HandleHeader`] describing the layout. The header starts with a magic
//! value and version, the signature checked before any field is trusted.
//!
//! Inside a process that imported the buffer, the handle becomes a
//! [`BufferHandle`], which additionally owns the attribute mapping and the
//! CPU access state used by lock/unlock.
//!
//! ```text
//! RawBufferHandle
//! ├── header: HandleHeader (magic, version, ids, layout)
//! └── fds: [plane 0, .., plane N-1, attribute]
//! ```

use crate::config::defaults::MAX_BUFFER_FDS;
use crate::error::{Error, Result};
use crate::format::{PixelFormat, PlaneInfo};
use crate::memory::DmaBufMapping;
use crate::usage::BufferUsage;
use parking_lot::{Mutex, MutexGuard};
use rustix::fd::{AsFd, BorrowedFd, OwnedFd};
use smallvec::SmallVec;
use std::sync::atomic::{AtomicU32, Ordering};

/// Magic value at the start of every handle header ("GRALLOCH" in ASCII).
pub const HANDLE_MAGIC: u64 = 0x4752_414C_4C4F_4348;

/// Current handle header version.
pub const HANDLE_VERSION: u32 = 1;

/// Global counter for the low half of buffer ids.
static BUFFER_ID_COUNTER: AtomicU32 = AtomicU32::new(1);

/// Generate a process-unique buffer id.
///
/// The upper 32 bits hold the allocating pid, so ids are also unique across
/// allocator processes.
pub fn next_buffer_id() -> u64 {
    let pid = std::process::id() as u64;
    let seq = BUFFER_ID_COUNTER.fetch_add(1, Ordering::Relaxed) as u64;
    (pid << 32) | seq
}

/// Self-describing part of a buffer handle.
#[derive(Clone, Debug, PartialEq, Eq, rkyv::Archive, rkyv::Serialize, rkyv::Deserialize)]
#[rkyv(derive(Debug))]
pub struct HandleHeader {
    /// Must be [`HANDLE_MAGIC`].
    pub magic: u64,
    /// Must be [`HANDLE_VERSION`].
    pub version: u32,
    /// Number of memory fds (attribute fd not included).
    pub num_fds: u32,
    /// Process-global buffer identity.
    pub buffer_id: u64,
    /// Debug name.
    pub name: String,
    /// Heap the memory fds came from.
    pub heap: String,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Stride of the first plane, in pixels.
    pub stride: u32,
    /// Number of layers.
    pub layer_count: u32,
    /// Format the client asked for.
    pub req_format: u32,
    /// Format actually allocated.
    pub alloc_format: u32,
    /// Producer usage.
    pub producer_usage: u64,
    /// Consumer usage.
    pub consumer_usage: u64,
    /// Size of each memory fd.
    pub alloc_sizes: Vec<u64>,
    /// Per-plane layout.
    pub planes: Vec<PlaneInfo>,
    /// Size of the attribute fd.
    pub attr_size: u64,
    /// Bytes of client reserved region inside the attribute fd.
    pub reserved_region_size: u64,
}

impl HandleHeader {
    /// Requested format.
    #[inline]
    pub fn requested_format(&self) -> PixelFormat {
        PixelFormat(self.req_format)
    }

    /// Allocated format.
    #[inline]
    pub fn allocated_format(&self) -> PixelFormat {
        PixelFormat(self.alloc_format)
    }

    /// Producer and consumer usage combined.
    #[inline]
    pub fn usage(&self) -> BufferUsage {
        BufferUsage::from_bits(self.producer_usage | self.consumer_usage)
    }

    /// Total bytes across all memory fds.
    pub fn allocation_size(&self) -> u64 {
        self.alloc_sizes.iter().sum()
    }

    /// Check the signature and internal consistency.
    pub fn validate(&self) -> Result<()> {
        if self.magic != HANDLE_MAGIC {
            return Err(Error::BadBuffer(format!(
                "invalid handle magic: expected {:x}, got {:x}",
                HANDLE_MAGIC, self.magic
            )));
        }
        if self.version != HANDLE_VERSION {
            return Err(Error::BadBuffer(format!(
                "unsupported handle version: expected {}, got {}",
                HANDLE_VERSION, self.version
            )));
        }
        let num_fds = self.num_fds as usize;
        if num_fds == 0 || num_fds > MAX_BUFFER_FDS {
            return Err(Error::BadBuffer(format!("invalid fd count {num_fds}")));
        }
        if self.alloc_sizes.len() != num_fds {
            return Err(Error::BadBuffer(format!(
                "{} sizes for {} fds",
                self.alloc_sizes.len(),
                num_fds
            )));
        }
        if self.planes.is_empty() || self.planes.iter().any(|p| p.fd_index >= self.num_fds) {
            return Err(Error::BadBuffer("plane refers to a missing fd".into()));
        }
        Ok(())
    }

    /// Number of fds and of 32-bit integers needed to transport the buffer.
    pub fn transport_size(&self) -> Result<(u32, u32)> {
        let ints = self.to_bytes()?.len().div_ceil(4);
        Ok((self.num_fds + 1, ints as u32))
    }

    /// Serialize for transport.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        rkyv::to_bytes::<rkyv::rancor::Error>(self)
            .map(|bytes| bytes.to_vec())
            .map_err(|e| Error::BadBuffer(format!("handle header serialization failed: {e}")))
    }

    /// Deserialize a header received from another process.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut aligned = rkyv::util::AlignedVec::<8>::new();
        aligned.extend_from_slice(bytes);
        rkyv::from_bytes::<Self, rkyv::rancor::Error>(&aligned)
            .map_err(|e| Error::BadBuffer(format!("malformed handle header: {e}")))
    }
}

/// Transport form of a buffer: header plus owned fds.
#[derive(Debug)]
pub struct RawBufferHandle {
    /// Layout and identity.
    pub header: HandleHeader,
    /// Memory fds followed by the attribute fd.
    pub fds: Vec<OwnedFd>,
}

impl RawBufferHandle {
    /// Check the header signature and that the fds match it.
    pub fn validate(&self) -> Result<()> {
        self.header.validate()?;
        let expected = self.header.num_fds as usize + 1;
        if self.fds.len() != expected {
            return Err(Error::BadBuffer(format!(
                "handle carries {} fds, header expects {}",
                self.fds.len(),
                expected
            )));
        }
        Ok(())
    }

    /// Buffer identity.
    #[inline]
    pub fn buffer_id(&self) -> u64 {
        self.header.buffer_id
    }

    /// Memory fds.
    pub fn plane_fds(&self) -> &[OwnedFd] {
        let n = (self.header.num_fds as usize).min(self.fds.len());
        &self.fds[..n]
    }

    /// Attribute fd, if present.
    pub fn attr_fd(&self) -> Option<BorrowedFd<'_>> {
        self.fds.get(self.header.num_fds as usize).map(|fd| fd.as_fd())
    }

    /// Duplicate every fd into a new, independently owned handle.
    pub fn try_clone(&self) -> Result<Self> {
        let fds = self
            .fds
            .iter()
            .map(|fd| rustix::io::fcntl_dupfd_cloexec(fd, 0))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::NoResources(format!("failed to duplicate handle fds: {e}")))?;
        Ok(Self {
            header: self.header.clone(),
            fds,
        })
    }

    /// Number of fds and of 32-bit integers needed to transport this handle.
    pub fn transport_size(&self) -> Result<(u32, u32)> {
        self.header.transport_size()
    }
}

/// CPU access state of an imported buffer.
#[derive(Debug, Default)]
pub struct CpuState {
    /// Per-fd CPU mapping, `None` while unmapped.
    pub mappings: SmallVec<[Option<DmaBufMapping>; MAX_BUFFER_FDS]>,
    /// A read lock is held.
    pub cpu_read: bool,
    /// A write lock is held.
    pub cpu_write: bool,
    /// Number of outstanding locks.
    pub lock_depth: u32,
}

impl CpuState {
    /// Whether any access flag is set.
    #[inline]
    pub fn is_locked(&self) -> bool {
        self.cpu_read || self.cpu_write
    }
}

/// A buffer imported into this process.
///
/// Owns its fds and mappings; dropping it unmaps everything and closes every
/// fd.
pub struct BufferHandle {
    header: HandleHeader,
    fds: SmallVec<[OwnedFd; MAX_BUFFER_FDS]>,
    attr_fd: OwnedFd,
    attr: Mutex<DmaBufMapping>,
    cpu: Mutex<CpuState>,
}

impl BufferHandle {
    /// Take ownership of a validated raw handle and map its attribute region.
    pub fn from_raw(raw: RawBufferHandle) -> Result<Self> {
        raw.validate()?;
        let RawBufferHandle { header, mut fds } = raw;

        let attr_fd = fds
            .pop()
            .ok_or_else(|| Error::BadBuffer("handle has no attribute fd".into()))?;
        let attr_len = usize::try_from(header.attr_size)
            .map_err(|_| Error::BadBuffer("attribute size overflows".into()))?;
        let attr = DmaBufMapping::map(attr_fd.as_fd(), attr_len, true)?;

        let mut mappings = SmallVec::new();
        mappings.resize_with(fds.len(), || None);

        Ok(Self {
            header,
            fds: fds.into_iter().collect(),
            attr_fd,
            attr: Mutex::new(attr),
            cpu: Mutex::new(CpuState {
                mappings,
                ..CpuState::default()
            }),
        })
    }

    /// Export a transport handle with duplicated fds.
    pub fn to_raw(&self) -> Result<RawBufferHandle> {
        let fds = self
            .fds
            .iter()
            .chain(std::iter::once(&self.attr_fd))
            .map(|fd| rustix::io::fcntl_dupfd_cloexec(fd, 0))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::NoResources(format!("failed to duplicate handle fds: {e}")))?;
        Ok(RawBufferHandle {
            header: self.header.clone(),
            fds,
        })
    }

    /// Layout and identity.
    #[inline]
    pub fn header(&self) -> &HandleHeader {
        &self.header
    }

    /// Buffer identity.
    #[inline]
    pub fn buffer_id(&self) -> u64 {
        self.header.buffer_id
    }

    /// Number of memory fds. Fixed for the life of the buffer.
    #[inline]
    pub fn fd_count(&self) -> usize {
        self.fds.len()
    }

    /// Memory fd `index`.
    pub fn plane_fd(&self, index: usize) -> Option<BorrowedFd<'_>> {
        self.fds.get(index).map(|fd| fd.as_fd())
    }

    /// All memory fds.
    pub fn plane_fds(&self) -> impl Iterator<Item = BorrowedFd<'_>> {
        self.fds.iter().map(|fd| fd.as_fd())
    }

    /// Attribute fd.
    #[inline]
    pub fn attr_fd(&self) -> BorrowedFd<'_> {
        self.attr_fd.as_fd()
    }

    /// Lock and access the attribute region.
    pub fn attr(&self) -> MutexGuard<'_, DmaBufMapping> {
        self.attr.lock()
    }

    /// Lock and access the CPU state.
    pub fn cpu(&self) -> MutexGuard<'_, CpuState> {
        self.cpu.lock()
    }
}

impl std::fmt::Debug for BufferHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferHandle")
            .field("buffer_id", &format_args!("{:#x}", self.header.buffer_id))
            .field("name", &self.header.name)
            .field("fds", &self.fds.len())
            .field("width", &self.header.width)
            .field("height", &self.header.height)
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// A one-plane raw handle backed by memfds.
    pub(crate) fn memfd_handle(plane_size: u64, attr_size: u64) -> RawBufferHandle {
        let plane = rustix::fs::memfd_create("plane", rustix::fs::MemfdFlags::CLOEXEC).unwrap();
        rustix::fs::ftruncate(&plane, plane_size).unwrap();
        let attr = rustix::fs::memfd_create("attr", rustix::fs::MemfdFlags::CLOEXEC).unwrap();
        rustix::fs::ftruncate(&attr, attr_size).unwrap();

        RawBufferHandle {
            header: HandleHeader {
                magic: HANDLE_MAGIC,
                version: HANDLE_VERSION,
                num_fds: 1,
                buffer_id: next_buffer_id(),
                name: "test".into(),
                heap: "system".into(),
                width: 16,
                height: 16,
                stride: 16,
                layer_count: 1,
                req_format: PixelFormat::RGBA_8888.code(),
                alloc_format: PixelFormat::RGBA_8888.code(),
                producer_usage: BufferUsage::CPU_WRITE_OFTEN.bits(),
                consumer_usage: BufferUsage::CPU_READ_OFTEN.bits(),
                alloc_sizes: vec![plane_size],
                planes: vec![PlaneInfo {
                    offset: 0,
                    byte_stride: 64,
                    alloc_width: 16,
                    alloc_height: 16,
                    sample_increment_bits: 32,
                    horizontal_subsampling: 1,
                    vertical_subsampling: 1,
                    fd_index: 0,
                }],
                attr_size,
                reserved_region_size: 0,
            },
            fds: vec![plane, attr],
        }
    }

    #[test]
    fn test_buffer_ids_are_unique() {
        let a = next_buffer_id();
        let b = next_buffer_id();
        assert_ne!(a, b);
        assert_eq!(a >> 32, std::process::id() as u64);
    }

    #[test]
    fn test_validate_signature() {
        let mut raw = memfd_handle(1024, 4096);
        assert!(raw.validate().is_ok());

        raw.header.magic = 0;
        assert!(matches!(raw.validate(), Err(Error::BadBuffer(_))));
    }

    #[test]
    fn test_validate_fd_count() {
        let mut raw = memfd_handle(1024, 4096);
        raw.fds.pop();
        assert!(matches!(raw.validate(), Err(Error::BadBuffer(_))));
    }

    #[test]
    fn test_header_bytes_roundtrip() {
        let raw = memfd_handle(1024, 4096);
        let bytes = raw.header.to_bytes().unwrap();
        assert_eq!(HandleHeader::from_bytes(&bytes).unwrap(), raw.header);
        assert!(HandleHeader::from_bytes(&bytes[..bytes.len() / 2]).is_err());
    }

    #[test]
    fn test_try_clone_dups_fds() {
        let raw = memfd_handle(1024, 4096);
        let clone = raw.try_clone().unwrap();
        assert_eq!(clone.header, raw.header);
        for (a, b) in raw.fds.iter().zip(&clone.fds) {
            assert_eq!(
                crate::memory::inode(a).unwrap(),
                crate::memory::inode(b).unwrap()
            );
        }
    }

    #[test]
    fn test_transport_size() {
        let raw = memfd_handle(1024, 4096);
        let (fds, ints) = raw.transport_size().unwrap();
        assert_eq!(fds, 2);
        assert!(ints > 0);
    }

    #[test]
    fn test_buffer_handle_from_raw() {
        let raw = memfd_handle(1024, 4096);
        let id = raw.buffer_id();
        let handle = BufferHandle::from_raw(raw).unwrap();
        assert_eq!(handle.buffer_id(), id);
        assert_eq!(handle.fd_count(), 1);
        assert_eq!(handle.attr().len(), 4096);
        assert!(!handle.cpu().is_locked());
        assert!(handle.cpu().mappings[0].is_none());

        let exported = handle.to_raw().unwrap();
        assert!(exported.validate().is_ok());
    }
}
