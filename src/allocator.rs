//! Buffer allocation.
//!
//! One allocate call produces `count` buffers of identical layout. Each
//! buffer is a set of memory fds from the heap picked for its usage plus one
//! attribute fd holding [`SharedMetadata`] and the client reserved region.
//!
//! Failure at any point releases everything the call has opened so far:
//! fds are owned values, so dropping the partial results closes them.
//!
//! ```text
//! validate ─> reserved cap ─> derive layout ─> select heap ─> alloc planes
//!                                                               │
//!        diagnostics <─ header <─ init metadata <─ alloc attr <─┘
//! ```

use crate::config::GrallocConfig;
use crate::descriptor::{BufferDescriptor, DescriptorCodec};
use crate::diagnostics::{DiagnosticsEntry, DiagnosticsLog};
use crate::error::{Error, Result};
use crate::format::{BufferLayout, FormatCalculator, default_dataspace};
use crate::handle::{HANDLE_MAGIC, HANDLE_VERSION, HandleHeader, RawBufferHandle, next_buffer_id};
use crate::heap::{HeapBackend, HeapFlags, HeapSelector};
use crate::memory::{DmaBufMapping, inode};
use crate::metadata::{SHARED_METADATA_SIZE, SharedMetadata};
use crate::observability::{
    AllocationMetrics, instrument_allocate, record_allocation_failure, trace_heap_selected,
};
use crate::usage::BufferUsage;
use rustix::fd::{AsFd, OwnedFd};
use smallvec::SmallVec;
use std::sync::Arc;

/// Usage the attribute fd is allocated with.
const ATTRIBUTE_USAGE: BufferUsage =
    BufferUsage::from_bits(BufferUsage::CPU_READ_OFTEN.bits() | BufferUsage::CPU_WRITE_OFTEN.bits());

/// Buffers produced by one allocate call.
///
/// The handles own their fds. A caller that keeps a buffer imports it
/// through the mapper, which duplicates the fds; dropping the result then
/// releases the allocator's copies.
#[derive(Debug)]
pub struct AllocationResult {
    /// Pixel stride shared by every buffer.
    pub stride: u32,
    /// One handle per requested buffer.
    pub buffers: Vec<RawBufferHandle>,
}

/// Allocates buffers from heaps.
pub struct Allocator {
    backend: Arc<dyn HeapBackend>,
    selector: HeapSelector,
    calculator: Arc<dyn FormatCalculator>,
    diagnostics: Arc<DiagnosticsLog>,
    max_reserved_region_size: u64,
    roi_info_extra_size: u64,
    max_buffer_count: u32,
}

impl Allocator {
    /// Create an allocator.
    pub fn new(
        config: &GrallocConfig,
        backend: Arc<dyn HeapBackend>,
        calculator: Arc<dyn FormatCalculator>,
        diagnostics: Arc<DiagnosticsLog>,
    ) -> Self {
        Self::with_selector(
            config,
            Arc::clone(&backend),
            HeapSelector::new(backend),
            calculator,
            diagnostics,
        )
    }

    /// Create an allocator with a custom heap selector.
    pub fn with_selector(
        config: &GrallocConfig,
        backend: Arc<dyn HeapBackend>,
        selector: HeapSelector,
        calculator: Arc<dyn FormatCalculator>,
        diagnostics: Arc<DiagnosticsLog>,
    ) -> Self {
        Self {
            backend,
            selector,
            calculator,
            diagnostics,
            max_reserved_region_size: config.max_reserved_region_size,
            roi_info_extra_size: config.roi_info_extra_size,
            max_buffer_count: config.max_buffer_count,
        }
    }

    /// Heap selector in use.
    pub fn selector(&self) -> &HeapSelector {
        &self.selector
    }

    /// Allocate `count` buffers from an encoded descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BadDescriptor`] if `descriptor` does not decode, then
    /// everything [`allocate`](Self::allocate) returns.
    pub fn allocate_encoded(&self, descriptor: &[u8], count: u32) -> Result<AllocationResult> {
        let descriptor = DescriptorCodec::decode(descriptor).inspect_err(|e| {
            record_allocation_failure(e.kind());
        })?;
        self.allocate(&descriptor, count)
    }

    /// Allocate `count` buffers for `descriptor`.
    ///
    /// Either every buffer is returned or none is; nothing stays allocated
    /// after an error.
    ///
    /// # Errors
    ///
    /// - [`Error::BadDescriptor`] for a zero dimension, layer count or format
    /// - [`Error::BadValue`] for a zero count, a count over the cap or a
    ///   reserved region over the cap
    /// - [`Error::Unsupported`] for an unknown format or diverging strides
    /// - [`Error::NoResources`] when a heap is missing or exhausted
    pub fn allocate(&self, descriptor: &BufferDescriptor, count: u32) -> Result<AllocationResult> {
        let _span = instrument_allocate(&descriptor.name, count);
        self.allocate_batch(descriptor, count).inspect_err(|e| {
            tracing::error!(
                name = %descriptor.name,
                count,
                error = %e,
                "allocation failed"
            );
            record_allocation_failure(e.kind());
        })
    }

    fn allocate_batch(&self, descriptor: &BufferDescriptor, count: u32) -> Result<AllocationResult> {
        descriptor.validate()?;
        if count == 0 {
            return Err(Error::BadValue("buffer count must be nonzero".into()));
        }
        if count > self.max_buffer_count {
            return Err(Error::BadValue(format!(
                "buffer count {count} exceeds the cap of {}",
                self.max_buffer_count
            )));
        }
        if descriptor.reserved_size > self.max_reserved_region_size {
            return Err(Error::BadValue(format!(
                "reserved region of {} bytes exceeds the {} byte cap",
                descriptor.reserved_size, self.max_reserved_region_size
            )));
        }

        let usage = descriptor.combined_usage();
        let mut stride = None;
        let mut buffers = Vec::new();
        let mut entries = Vec::new();

        for _ in 0..count {
            let layout = self.calculator.derive(descriptor)?;
            match stride {
                None => stride = Some(layout.pixel_stride),
                Some(first) if first != layout.pixel_stride => {
                    tracing::error!(
                        expected = first,
                        got = layout.pixel_stride,
                        "buffers of one allocation derived different strides"
                    );
                    return Err(Error::Unsupported(format!(
                        "stride {} differs from first buffer stride {first}",
                        layout.pixel_stride
                    )));
                }
                Some(_) => {}
            }

            let (raw, entry) = self.allocate_one(descriptor, &layout, usage)?;
            buffers.push(raw);
            entries.push(entry);
        }

        for entry in entries {
            self.diagnostics.append(entry);
        }

        Ok(AllocationResult {
            stride: stride.unwrap_or(0),
            buffers,
        })
    }

    fn allocate_one(
        &self,
        descriptor: &BufferDescriptor,
        layout: &BufferLayout,
        usage: BufferUsage,
    ) -> Result<(RawBufferHandle, DiagnosticsEntry)> {
        let heap = self.selector.select_heap(usage).ok_or_else(|| {
            Error::NoResources(format!("no heap available for usage {usage:?}"))
        })?;
        let metrics = AllocationMetrics::new(heap);
        let _timer = metrics.start_timer();
        let flags = HeapFlags::from_usage(usage);

        let mut fds: Vec<OwnedFd> = Vec::with_capacity(layout.fd_count() + 1);
        for &size in &layout.alloc_sizes {
            trace_heap_selected(usage, heap, size);
            let fd = self.backend.alloc(heap, size, flags).map_err(|e| {
                tracing::error!(heap, size, error = %e, "plane allocation failed");
                Error::NoResources(format!("{heap}: {e}"))
            })?;
            fds.push(fd);
        }

        let attr_size = self.attribute_size(descriptor.reserved_size, usage);
        let attr = self.allocate_attribute(descriptor, layout, attr_size)?;

        for fd in &fds {
            if let Err(e) = self.backend.set_name(fd.as_fd(), &descriptor.name) {
                tracing::warn!(name = %descriptor.name, error = %e, "failed to name buffer");
            }
        }

        fds.push(attr);
        let inodes = fds
            .iter()
            .map(inode)
            .collect::<Result<SmallVec<[u64; 4]>>>()?;

        let header = HandleHeader {
            magic: HANDLE_MAGIC,
            version: HANDLE_VERSION,
            num_fds: layout.fd_count() as u32,
            buffer_id: next_buffer_id(),
            name: descriptor.name.clone(),
            heap: heap.to_owned(),
            width: descriptor.width,
            height: descriptor.height,
            stride: layout.pixel_stride,
            layer_count: descriptor.layer_count,
            req_format: descriptor.format.code(),
            alloc_format: layout.alloc_format.code(),
            producer_usage: descriptor.producer_usage.bits(),
            consumer_usage: descriptor.consumer_usage.bits(),
            alloc_sizes: layout.alloc_sizes.to_vec(),
            planes: layout.planes.to_vec(),
            attr_size,
            reserved_region_size: descriptor.reserved_size,
        };
        metrics.record_buffer(layout.total_size());

        let entry = DiagnosticsEntry {
            buffer_id: header.buffer_id,
            inodes,
            format: header.req_format,
            usage: descriptor.producer_usage,
            width: header.width,
            height: header.height,
            name: header.name.clone(),
        };
        tracing::debug!(
            buffer_id = header.buffer_id,
            heap,
            size = layout.total_size(),
            stride = layout.pixel_stride,
            "buffer allocated"
        );

        Ok((RawBufferHandle { header, fds }, entry))
    }

    /// Attribute fd size: shared metadata, reserved region, ROI area.
    fn attribute_size(&self, reserved_size: u64, usage: BufferUsage) -> u64 {
        let roi = if usage.contains(BufferUsage::ROIINFO) {
            self.roi_info_extra_size
        } else {
            0
        };
        SHARED_METADATA_SIZE + reserved_size + roi
    }

    fn allocate_attribute(
        &self,
        descriptor: &BufferDescriptor,
        layout: &BufferLayout,
        attr_size: u64,
    ) -> Result<OwnedFd> {
        let heap = self.selector.select_heap(ATTRIBUTE_USAGE).ok_or_else(|| {
            Error::NoResources("no heap available for the attribute region".into())
        })?;
        let fd = self
            .backend
            .alloc(heap, attr_size, HeapFlags::from_usage(ATTRIBUTE_USAGE))
            .map_err(|e| {
                tracing::error!(heap, attr_size, error = %e, "attribute allocation failed");
                Error::NoResources(format!("attribute region: {e}"))
            })?;

        let len = usize::try_from(attr_size)
            .map_err(|_| Error::BadValue("attribute size overflows".into()))?;
        let mut mapping = DmaBufMapping::map(fd.as_fd(), len, true)?;
        let region = mapping
            .as_mut_slice()
            .ok_or_else(|| Error::NoResources("attribute region mapped read-only".into()))?;
        region.fill(0);

        let dataspace = default_dataspace(
            self.calculator.is_yuv(layout.alloc_format),
            descriptor.height,
        );
        SharedMetadata::new(&descriptor.name, dataspace).encode_into(region)?;
        Ok(fd)
    }
}

impl std::fmt::Debug for Allocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Allocator")
            .field("selector", &self.selector)
            .field("max_reserved_region_size", &self.max_reserved_region_size)
            .finish_non_exhaustive()
    }
}
