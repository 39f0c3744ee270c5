//! Client-side buffer operations.
//!
//! The [`Mapper`] is what a process uses on buffers it received: import
//! them into the registry, lock them for CPU access, and read or write their
//! metadata. Every operation first resolves the [`BufferRef`] through the
//! registry, so an unregistered or stale reference fails with
//! [`Error::BadBuffer`] before anything else happens.
//!
//! # Lock states
//!
//! ```text
//!            lock(read|write)            unlock (last)
//! Unlocked ───────────────────> Locked ───────────────> Unlocked
//!                               │    ^
//!                               └────┘ flush / reread / nested lock
//! ```

use crate::config::GrallocConfig;
use crate::descriptor::{BufferDescriptor, BufferDescriptorInfo};
use crate::error::{Error, Result};
use crate::fence::Fence;
use crate::format::FormatCalculator;
use crate::handle::{BufferHandle, RawBufferHandle};
use crate::heap::{HeapBackend, HeapSelector, SyncAccess};
use crate::memory::DmaBufMapping;
use crate::metadata::codec::Rect;
use crate::metadata::{
    BufferDump, MetadataStore, MetadataType, MetadataTypeDescription, SHARED_METADATA_SIZE,
    list_supported,
};
use crate::observability::instrument_lock;
use crate::registry::{BufferRef, BufferRegistry};
use crate::usage::BufferUsage;
use std::ptr::NonNull;
use std::sync::Arc;

/// CPU address range returned by [`Mapper::lock`].
///
/// Valid until the matching [`Mapper::unlock`], and only while the buffer
/// stays registered.
#[derive(Debug, Clone, Copy)]
pub struct LockedRegion {
    ptr: NonNull<u8>,
    len: usize,
}

impl LockedRegion {
    /// Address of the first plane.
    #[inline]
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    /// Bytes addressable from [`as_ptr`](Self::as_ptr).
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the region is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Client reserved bytes inside the attribute region.
#[derive(Debug, Clone, Copy)]
pub struct ReservedRegion {
    ptr: NonNull<u8>,
    len: usize,
}

impl ReservedRegion {
    /// Start of the region.
    #[inline]
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    /// Size of the region.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the region is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Operations on imported buffers.
pub struct Mapper {
    registry: Arc<BufferRegistry>,
    backend: Arc<dyn HeapBackend>,
    selector: HeapSelector,
    calculator: Arc<dyn FormatCalculator>,
    store: MetadataStore,
    max_reserved_region_size: u64,
}

impl Mapper {
    /// Create a mapper over `registry`.
    pub fn new(
        config: &GrallocConfig,
        registry: Arc<BufferRegistry>,
        backend: Arc<dyn HeapBackend>,
        calculator: Arc<dyn FormatCalculator>,
    ) -> Self {
        Self {
            registry,
            selector: HeapSelector::new(Arc::clone(&backend)),
            backend,
            store: MetadataStore::new(Arc::clone(&calculator)),
            calculator,
            max_reserved_region_size: config.max_reserved_region_size,
        }
    }

    /// Registry backing this mapper.
    pub fn registry(&self) -> &Arc<BufferRegistry> {
        &self.registry
    }

    fn resolve(&self, buffer: BufferRef) -> Result<Arc<BufferHandle>> {
        self.registry.lookup(buffer)
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Register a received buffer. The caller keeps `raw`.
    pub fn import(&self, raw: &RawBufferHandle) -> Result<BufferRef> {
        self.registry.import(raw)
    }

    /// Release one reference.
    pub fn free(&self, buffer: BufferRef) -> Result<()> {
        self.registry.free(buffer)
    }

    /// Take another reference.
    pub fn retain(&self, buffer: BufferRef) -> Result<()> {
        self.registry.retain(buffer)
    }

    /// Transport handle with duplicated fds, for sending to another process.
    pub fn export(&self, buffer: BufferRef) -> Result<RawBufferHandle> {
        self.resolve(buffer)?.to_raw()
    }

    /// Number of fds and 32-bit integers needed to transport `buffer`.
    pub fn get_transport_size(&self, buffer: BufferRef) -> Result<(u32, u32)> {
        self.resolve(buffer)?.header().transport_size()
    }

    // ========================================================================
    // CPU access
    // ========================================================================

    /// Lock `buffer` for CPU access.
    ///
    /// Waits on `fence` first, then closes it. `region` must lie inside the
    /// buffer; an all-zero rectangle means the whole buffer. The returned
    /// address is the start of the first plane regardless of `region`.
    ///
    /// # Errors
    ///
    /// - [`Error::BadBuffer`] if `buffer` is not registered
    /// - [`Error::BadValue`] if `usage` asks for no CPU access, access the
    ///   buffer was not allocated for, or `region` is outside the buffer
    /// - [`Error::NoResources`] if mapping or cache sync fails
    pub fn lock(
        &self,
        buffer: BufferRef,
        usage: BufferUsage,
        region: Rect,
        fence: Option<Fence>,
    ) -> Result<LockedRegion> {
        let handle = self.resolve(buffer)?;
        let header = handle.header();
        let _span = instrument_lock(header.buffer_id, usage);

        let allocated = header.usage();
        let (read, write) = (usage.cpu_read(), usage.cpu_write());
        if !read && !write {
            tracing::error!(buffer_id = header.buffer_id, ?usage, "lock without CPU usage");
            return Err(Error::BadValue(format!("lock usage {usage:?} has no CPU access")));
        }
        if allocated.forbids_cpu_access()
            || (read && !allocated.cpu_read())
            || (write && !allocated.cpu_write())
        {
            tracing::error!(
                buffer_id = header.buffer_id,
                requested = ?usage,
                allocated = ?allocated,
                "lock usage not allowed by allocation usage"
            );
            return Err(Error::BadValue(format!(
                "lock usage {usage:?} not allowed for buffer usage {allocated:?}"
            )));
        }
        if region != Rect::default() && !region.fits(header.width, header.height) {
            tracing::error!(
                buffer_id = header.buffer_id,
                ?region,
                width = header.width,
                height = header.height,
                "lock region outside the buffer"
            );
            return Err(Error::BadValue(format!(
                "lock region {region:?} outside {}x{}",
                header.width, header.height
            )));
        }

        if let Some(fence) = fence {
            fence.wait_and_close()?;
        }

        let mut cpu = handle.cpu();
        if write && cpu.cpu_write {
            // TODO: track write locks per owner and reject a second concurrent writer.
            tracing::warn!(buffer_id = header.buffer_id, "buffer is already locked for writing");
        }

        let writable = allocated.cpu_write();
        for (index, slot) in cpu.mappings.iter_mut().enumerate() {
            if slot.is_some() {
                continue;
            }
            let fd = handle
                .plane_fd(index)
                .ok_or_else(|| Error::BadBuffer(format!("buffer has no fd {index}")))?;
            let len = usize::try_from(header.alloc_sizes[index])
                .map_err(|_| Error::BadBuffer("plane size overflows".into()))?;
            *slot = Some(DmaBufMapping::map(fd, len, writable)?);
        }

        let access = SyncAccess::from_intent(read, write);
        let fds: Vec<_> = handle.plane_fds().collect();
        for (started, fd) in fds.iter().enumerate() {
            if let Err(e) = self.backend.sync_start(*fd, access) {
                tracing::error!(buffer_id = header.buffer_id, error = %e, "cache sync failed");
                for fd in &fds[..started] {
                    let _ = self.backend.sync_end(*fd, access);
                }
                return Err(Error::NoResources(format!("sync start: {e}")));
            }
        }

        cpu.cpu_read |= read;
        cpu.cpu_write |= write;
        cpu.lock_depth += 1;

        let first = &header.planes[0];
        let mapping = cpu.mappings[first.fd_index as usize]
            .as_ref()
            .ok_or_else(|| Error::BadBuffer("first plane is not mapped".into()))?;
        let offset = usize::try_from(first.offset)
            .ok()
            .filter(|offset| *offset < mapping.len())
            .ok_or_else(|| Error::BadBuffer("first plane offset outside its fd".into()))?;
        // SAFETY: offset is within the live mapping.
        let ptr = unsafe { mapping.as_ptr().add(offset) };
        let ptr = NonNull::new(ptr).ok_or_else(|| Error::BadBuffer("null mapping".into()))?;

        tracing::trace!(buffer_id = header.buffer_id, depth = cpu.lock_depth, "buffer locked");
        Ok(LockedRegion {
            ptr,
            len: mapping.len() - offset,
        })
    }

    /// Release a CPU lock.
    ///
    /// CPU writes are complete when this returns, so no release fence is
    /// produced.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BadBuffer`] if `buffer` is not registered or not
    /// locked.
    pub fn unlock(&self, buffer: BufferRef) -> Result<Option<Fence>> {
        let handle = self.resolve(buffer)?;
        let mut cpu = handle.cpu();
        if !cpu.is_locked() {
            tracing::error!(buffer_id = handle.buffer_id(), "unlock of a buffer that is not locked");
            return Err(Error::BadBuffer("buffer is not locked".into()));
        }

        let access = SyncAccess::from_intent(cpu.cpu_read, cpu.cpu_write);
        for fd in handle.plane_fds() {
            if let Err(e) = self.backend.sync_end(fd, access) {
                tracing::warn!(buffer_id = handle.buffer_id(), error = %e, "cache sync end failed");
            }
        }

        cpu.lock_depth = cpu.lock_depth.saturating_sub(1);
        if cpu.lock_depth == 0 {
            cpu.cpu_read = false;
            cpu.cpu_write = false;
        }
        Ok(None)
    }

    /// Make CPU writes so far visible to other devices while staying locked.
    pub fn flush(&self, buffer: BufferRef) -> Result<Option<Fence>> {
        self.resync(buffer, SyncAccess::Write)
    }

    /// Make device writes visible to the CPU while staying locked.
    pub fn reread(&self, buffer: BufferRef) -> Result<Option<Fence>> {
        self.resync(buffer, SyncAccess::Read)
    }

    fn resync(&self, buffer: BufferRef, access: SyncAccess) -> Result<Option<Fence>> {
        let handle = self.resolve(buffer)?;
        let cpu = handle.cpu();
        if !cpu.is_locked() {
            tracing::error!(buffer_id = handle.buffer_id(), ?access, "buffer is not locked");
            return Err(Error::BadBuffer("buffer is not locked".into()));
        }
        let applies = match access {
            SyncAccess::Write => cpu.cpu_write,
            SyncAccess::Read => cpu.cpu_read,
            SyncAccess::ReadWrite => true,
        };
        if applies {
            for fd in handle.plane_fds() {
                self.backend.sync_end(fd, access)?;
                self.backend.sync_start(fd, access)?;
            }
        }
        Ok(None)
    }

    // ========================================================================
    // Metadata
    // ========================================================================

    /// Read metadata from a registered buffer.
    pub fn get(&self, buffer: BufferRef, metadata_type: &MetadataType) -> Result<Vec<u8>> {
        let handle = self.resolve(buffer)?;
        self.store.get(&handle, metadata_type)
    }

    /// Write metadata on a registered buffer.
    pub fn set(&self, buffer: BufferRef, metadata_type: &MetadataType, value: &[u8]) -> Result<()> {
        let handle = self.resolve(buffer)?;
        self.store.set(&handle, metadata_type, value)
    }

    /// Read metadata a buffer for `info` would have.
    pub fn get_from_descriptor_info(
        &self,
        info: &BufferDescriptorInfo,
        metadata_type: &MetadataType,
    ) -> Result<Vec<u8>> {
        self.store.get_from_descriptor_info(info, metadata_type)
    }

    /// Every supported metadata type.
    pub fn list_supported(&self) -> Vec<MetadataTypeDescription> {
        list_supported()
    }

    /// Snapshot one buffer's metadata.
    pub fn dump_buffer(&self, buffer: BufferRef) -> Result<BufferDump> {
        let handle = self.resolve(buffer)?;
        Ok(self.store.dump_buffer(&handle))
    }

    /// Snapshot every registered buffer.
    pub fn dump_buffers(&self) -> Vec<BufferDump> {
        let mut dumps = Vec::with_capacity(self.registry.len());
        self.registry
            .for_each(|_, handle| dumps.push(self.store.dump_buffer(handle)));
        dumps
    }

    // ========================================================================
    // Validation
    // ========================================================================

    /// The client reserved region of `buffer`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BadBuffer`] if `buffer` is not registered or was
    /// allocated without a reserved region.
    pub fn get_reserved_region(&self, buffer: BufferRef) -> Result<ReservedRegion> {
        let handle = self.resolve(buffer)?;
        let size = handle.header().reserved_region_size;
        if size == 0 {
            return Err(Error::BadBuffer("buffer has no reserved region".into()));
        }
        let attr = handle.attr();
        let start = SHARED_METADATA_SIZE as usize;
        let len = size as usize;
        if start + len > attr.len() {
            return Err(Error::BadBuffer(format!(
                "reserved region of {len} bytes exceeds attribute region of {}",
                attr.len()
            )));
        }
        // SAFETY: start + len is within the attribute mapping.
        let ptr = unsafe { attr.as_ptr().add(start) };
        let ptr = NonNull::new(ptr).ok_or_else(|| Error::BadBuffer("null mapping".into()))?;
        Ok(ReservedRegion { ptr, len })
    }

    /// Check that `buffer` can hold what `info` describes at `stride`.
    ///
    /// A zero `stride` skips the stride check.
    ///
    /// # Errors
    ///
    /// - [`Error::BadBuffer`] if `buffer` is not registered
    /// - [`Error::BadValue`] on any mismatch
    pub fn validate_buffer_size(
        &self,
        buffer: BufferRef,
        info: &BufferDescriptorInfo,
        stride: u32,
    ) -> Result<()> {
        let handle = self.resolve(buffer)?;
        let header = handle.header();
        info.validate().map_err(|e| Error::BadValue(e.to_string()))?;

        let mismatch = |what: &str, expected: String, actual: String| {
            tracing::error!(
                buffer_id = header.buffer_id,
                what,
                %expected,
                %actual,
                "buffer does not match descriptor"
            );
            Err(Error::BadValue(format!(
                "{what} mismatch: expected {expected}, buffer has {actual}"
            )))
        };

        if info.width != header.width || info.height != header.height {
            return mismatch(
                "size",
                format!("{}x{}", info.width, info.height),
                format!("{}x{}", header.width, header.height),
            );
        }
        if info.layer_count != header.layer_count {
            return mismatch(
                "layer count",
                info.layer_count.to_string(),
                header.layer_count.to_string(),
            );
        }
        if info.format.code() != header.req_format {
            return mismatch(
                "format",
                format!("{:?}", info.format),
                format!("{:?}", header.requested_format()),
            );
        }
        if info.usage != header.usage() {
            return mismatch(
                "usage",
                format!("{:?}", info.usage),
                format!("{:?}", header.usage()),
            );
        }
        if stride != 0 && stride != header.stride {
            return mismatch("stride", stride.to_string(), header.stride.to_string());
        }
        if info.reserved_size > header.reserved_region_size {
            return mismatch(
                "reserved size",
                info.reserved_size.to_string(),
                header.reserved_region_size.to_string(),
            );
        }

        let layout = self.calculator.derive(&BufferDescriptor::from_info(info))?;
        if layout.alloc_format.code() != header.alloc_format {
            return mismatch(
                "allocated format",
                format!("{:?}", layout.alloc_format),
                format!("{:?}", header.allocated_format()),
            );
        }
        if layout.fd_count() != header.alloc_sizes.len()
            || layout
                .alloc_sizes
                .iter()
                .zip(&header.alloc_sizes)
                .any(|(needed, have)| needed > have)
        {
            return mismatch(
                "allocation sizes",
                format!("{:?}", layout.alloc_sizes),
                format!("{:?}", header.alloc_sizes),
            );
        }
        if layout.planes.as_slice() != header.planes.as_slice() {
            return mismatch(
                "plane layout",
                format!("{:?}", layout.planes),
                format!("{:?}", header.planes),
            );
        }
        Ok(())
    }

    /// Whether a buffer for `info` could be allocated on this system.
    pub fn is_supported(&self, info: &BufferDescriptorInfo) -> bool {
        if info.validate().is_err() || info.reserved_size > self.max_reserved_region_size {
            return false;
        }
        self.calculator
            .derive(&BufferDescriptor::from_info(info))
            .is_ok()
            && self.selector.select_heap(info.usage).is_some()
    }
}

impl std::fmt::Debug for Mapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mapper")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}
