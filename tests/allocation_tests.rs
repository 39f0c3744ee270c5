//! Allocation, rollback and diagnostics through the public services.

mod common;

use common::{FailingBackend, cpu_rw, gralloc, labelled_backend, open_fds_with_label, rgba_info};
use gralloc::format::{BufferLayout, FormatCalculator, LinearFormatCalculator, PlaneComponent};
use gralloc::heap::{HeapSelector, HeapSpec, HeapTarget, MemfdHeapBackend, heap_names};
use gralloc::prelude::*;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Linear layouts, except every call after the first widens the stride.
struct DriftingStride {
    inner: LinearFormatCalculator,
    calls: AtomicUsize,
}

impl DriftingStride {
    fn new() -> Self {
        Self {
            inner: LinearFormatCalculator::new(),
            calls: AtomicUsize::new(0),
        }
    }
}

impl FormatCalculator for DriftingStride {
    fn derive(&self, descriptor: &BufferDescriptor) -> Result<BufferLayout> {
        let mut layout = self.inner.derive(descriptor)?;
        if self.calls.fetch_add(1, Ordering::SeqCst) > 0 {
            layout.pixel_stride += 16;
        }
        Ok(layout)
    }

    fn plane_components(&self, format: PixelFormat) -> Vec<Vec<PlaneComponent>> {
        self.inner.plane_components(format)
    }

    fn fourcc(&self, format: PixelFormat) -> u32 {
        self.inner.fourcc(format)
    }

    fn is_yuv(&self, format: PixelFormat) -> bool {
        self.inner.is_yuv(format)
    }
}

// ============================================================================
// Batches
// ============================================================================

#[test]
fn test_batch_shares_stride_and_gets_distinct_ids() {
    let g = gralloc("alloc-batch");
    let info = rgba_info("batch", 100, 20, cpu_rw());
    let encoded = DescriptorCodec::encode(&info).unwrap();

    let result = g.allocator().allocate_encoded(&encoded, 3).unwrap();
    assert_eq!(result.stride, 112);
    assert_eq!(result.buffers.len(), 3);

    let mut ids: Vec<u64> = result.buffers.iter().map(|b| b.buffer_id()).collect();
    ids.dedup();
    assert_eq!(ids.len(), 3);
    for buffer in &result.buffers {
        assert_eq!(buffer.header.stride, 112);
        assert_eq!(buffer.header.name, "batch");
    }

    // Two fds per buffer: pixels and attributes.
    assert_eq!(open_fds_with_label("alloc-batch"), 6);
    drop(result);
    assert_eq!(open_fds_with_label("alloc-batch"), 0);
}

#[test]
fn test_failed_batch_releases_everything() {
    common::init_tracing();
    // Third buffer's pixel allocation fails after two complete buffers.
    let backend = Arc::new(FailingBackend::new(labelled_backend("alloc-rollback"), 4));
    let g = Gralloc::new(GrallocConfig::default(), backend.clone()).unwrap();

    let info = rgba_info("rollback", 64, 64, cpu_rw());
    let err = g
        .allocator()
        .allocate(&BufferDescriptor::from_info(&info), 3)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NoResources);
    assert_eq!(backend.calls(), 5);
    assert_eq!(open_fds_with_label("alloc-rollback"), 0);

    // Nothing from the failed batch reaches the diagnostics log.
    assert_eq!(g.dump_debug_info(), "");
}

#[test]
fn test_diverging_stride_fails_whole_batch() {
    common::init_tracing();
    let g = Gralloc::with_calculator(
        GrallocConfig::default(),
        Arc::new(labelled_backend("alloc-stride")),
        Arc::new(DriftingStride::new()),
    )
    .unwrap();

    let info = rgba_info("stride", 64, 64, cpu_rw());
    let err = g
        .allocator()
        .allocate(&BufferDescriptor::from_info(&info), 2)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unsupported);
    assert_eq!(open_fds_with_label("alloc-stride"), 0);
    assert_eq!(g.diagnostics().total(), 0);
}

#[test]
fn test_huge_count_is_rejected_up_front() {
    let g = gralloc("alloc-count");
    let info = rgba_info("count", 16, 16, cpu_rw());
    let descriptor = BufferDescriptor::from_info(&info);

    let err = g.allocator().allocate(&descriptor, u32::MAX).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BadValue);
    assert_eq!(open_fds_with_label("alloc-count"), 0);

    let cap = g.config().max_buffer_count;
    let result = g.allocator().allocate(&descriptor, cap).unwrap();
    assert_eq!(result.buffers.len(), cap as usize);
}

#[test]
fn test_reserved_region_over_cap() {
    let g = gralloc("alloc-reserved");
    let mut info = rgba_info("reserved", 16, 16, cpu_rw());
    info.reserved_size = g.config().max_reserved_region_size + 1;

    let err = g
        .allocator()
        .allocate(&BufferDescriptor::from_info(&info), 1)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BadValue);
    assert_eq!(open_fds_with_label("alloc-reserved"), 0);

    info.reserved_size = g.config().max_reserved_region_size;
    let result = g
        .allocator()
        .allocate(&BufferDescriptor::from_info(&info), 1)
        .unwrap();
    assert_eq!(
        result.buffers[0].header.reserved_region_size,
        g.config().max_reserved_region_size
    );
}

#[test]
fn test_corrupt_descriptor_is_rejected() {
    let g = gralloc("alloc-corrupt");
    let mut encoded = DescriptorCodec::encode(&rgba_info("x", 8, 8, cpu_rw())).unwrap();
    encoded.truncate(encoded.len() - 1);
    let err = g.allocator().allocate_encoded(&encoded, 1).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BadDescriptor);
}

#[test]
fn test_unknown_format_is_unsupported() {
    let g = gralloc("alloc-format");
    let mut info = rgba_info("odd", 8, 8, cpu_rw());
    info.format = PixelFormat(0x7777);
    let err = g
        .allocator()
        .allocate(&BufferDescriptor::from_info(&info), 1)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unsupported);
    assert_eq!(open_fds_with_label("alloc-format"), 0);
}

#[test]
fn test_protected_without_secure_heap() {
    let g = gralloc("alloc-protected");
    let info = rgba_info("secure", 32, 32, BufferUsage::PROTECTED | BufferUsage::GPU_TEXTURE);
    let err = g
        .allocator()
        .allocate(&BufferDescriptor::from_info(&info), 1)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NoResources);
}

// ============================================================================
// Heap tables
// ============================================================================

#[test]
fn test_subset_table_order_decides() {
    let backend = Arc::new(MemfdHeapBackend::with_all_heaps());
    let usage = BufferUsage::PROTECTED | BufferUsage::HW_COMPOSER;

    // Composer-only protected buffers go to the video scaler, not a heap.
    let builtin = HeapSelector::new(backend.clone());
    assert_eq!(builtin.select_heap(usage), None);

    // Moving the bare PROTECTED entry first shadows the scaler entry.
    let reordered = HeapSelector::with_tables(
        backend,
        Vec::new(),
        vec![
            HeapSpec::new(
                BufferUsage::PROTECTED,
                HeapTarget::FirstAvailable(&[heap_names::VIDEO_FRAME]),
            ),
            HeapSpec::new(usage, HeapTarget::Unbacked)
                .excluding(BufferUsage::HW_TEXTURE | BufferUsage::HW_RENDER),
            HeapSpec::new(BufferUsage::NONE, HeapTarget::Default),
        ],
    );
    assert_eq!(reordered.select_heap(usage), Some(heap_names::VIDEO_FRAME));
    assert_eq!(
        reordered.select_heap(BufferUsage::CPU_READ_OFTEN),
        Some(heap_names::SYSTEM)
    );
}

#[test]
fn test_video_scaler_usage_has_no_heap() {
    let g = Gralloc::new(
        GrallocConfig::default(),
        Arc::new(MemfdHeapBackend::with_all_heaps()),
    )
    .unwrap();
    let scaler = rgba_info("scaler", 32, 32, BufferUsage::PROTECTED | BufferUsage::HW_COMPOSER);
    let err = g
        .allocator()
        .allocate(&BufferDescriptor::from_info(&scaler), 1)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NoResources);

    let textured = rgba_info(
        "textured",
        32,
        32,
        BufferUsage::PROTECTED | BufferUsage::HW_COMPOSER | BufferUsage::HW_TEXTURE,
    );
    let result = g
        .allocator()
        .allocate(&BufferDescriptor::from_info(&textured), 1)
        .unwrap();
    assert_eq!(result.buffers[0].header.heap, heap_names::VIDEO_FRAME);
}

#[test]
fn test_exact_match_survives_table_reordering() {
    use gralloc::heap::EXACT_HEAPS;

    let backend = Arc::new(MemfdHeapBackend::with_all_heaps());
    let usage = BufferUsage::PROTECTED | BufferUsage::HW_CAMERA_WRITE | BufferUsage::TPU_INPUT;

    let mut exact = EXACT_HEAPS.to_vec();
    exact.reverse();
    let mut subset = gralloc::heap::SUBSET_HEAPS.to_vec();
    subset.rotate_left(1);

    let selector = HeapSelector::with_tables(backend, exact, subset);
    assert_eq!(selector.select_heap(usage), Some(heap_names::FACEAUTH_IMAGE));
    assert_eq!(
        selector.select_heap(BufferUsage::NONE),
        Some(heap_names::SYSTEM_UNCACHED)
    );
}

#[test]
fn test_secure_video_allocates_on_all_heaps_backend() {
    common::init_tracing();
    let g = Gralloc::new(
        GrallocConfig::default(),
        Arc::new(MemfdHeapBackend::with_all_heaps()),
    )
    .unwrap();
    let info = rgba_info("vframe", 32, 32, BufferUsage::PROTECTED | BufferUsage::VIDEO_DECODER);
    let result = g
        .allocator()
        .allocate(&BufferDescriptor::from_info(&info), 1)
        .unwrap();
    assert_eq!(result.buffers[0].header.heap, heap_names::VIDEO_FRAME);
}

// ============================================================================
// Diagnostics
// ============================================================================

#[test]
fn test_diagnostics_lists_allocations() {
    let g = gralloc("alloc-diag");
    let info = rgba_info("diag", 40, 10, cpu_rw());
    let result = g
        .allocator()
        .allocate(&BufferDescriptor::from_info(&info), 2)
        .unwrap();

    let dump = g.dump_debug_info();
    assert_eq!(dump.lines().count(), 2);
    for (line, buffer) in dump.lines().zip(&result.buffers) {
        assert!(line.starts_with(&format!("buffer_id: {}, inodes: ", buffer.buffer_id())));
        assert!(line.ends_with("width: 40, height: 10, name: diag"));
    }

    // One inode per fd in the handle, attribute fd included.
    for (entry, buffer) in g.diagnostics().entries().iter().zip(&result.buffers) {
        assert_eq!(entry.inodes.len(), buffer.fds.len());
    }
}

#[test]
fn test_diagnostics_records_producer_usage() {
    let g = gralloc("alloc-diag-usage");
    let info = rgba_info("usage", 16, 16, cpu_rw());
    let mut descriptor = BufferDescriptor::from_info(&info);
    descriptor.consumer_usage |= BufferUsage::GPU_TEXTURE;
    g.allocator().allocate(&descriptor, 1).unwrap();

    let entries = g.diagnostics().entries();
    assert_eq!(entries[0].usage, descriptor.producer_usage);
    assert!(!entries[0].usage.contains(BufferUsage::GPU_TEXTURE));
}

#[test]
fn test_concurrent_allocations_are_all_logged() {
    let g = Arc::new(gralloc("alloc-concurrent"));
    let handles: Vec<_> = (0..8)
        .map(|t| {
            let g = Arc::clone(&g);
            std::thread::spawn(move || {
                for i in 0..4 {
                    let info = rgba_info(&format!("t{t}-{i}"), 16, 16, cpu_rw());
                    g.allocator()
                        .allocate(&BufferDescriptor::from_info(&info), 1)
                        .unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(g.diagnostics().total(), 32);
    assert_eq!(g.dump_debug_info().lines().count(), 32);
    assert_eq!(open_fds_with_label("alloc-concurrent"), 0);
}
