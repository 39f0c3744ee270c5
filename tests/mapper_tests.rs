//! Import, CPU access and metadata across producer and consumer services.

mod common;

use common::{cpu_rw, gralloc, open_fds_with_label, rgba_info};
use gralloc::memory::ipc::{recv_handle, send_handle};
use gralloc::metadata::codec::{decode_crop, decode_i32, decode_u64, encode_crop, encode_i32};
use gralloc::prelude::*;
use std::os::unix::net::UnixStream;

fn allocate_one(g: &Gralloc, info: &BufferDescriptorInfo) -> RawBufferHandle {
    let mut result = g
        .allocator()
        .allocate(&BufferDescriptor::from_info(info), 1)
        .unwrap();
    result.buffers.pop().unwrap()
}

// ============================================================================
// Registry
// ============================================================================

#[test]
fn test_import_free_releases_fds() {
    let g = gralloc("mapper-lifecycle");
    let raw = allocate_one(&g, &rgba_info("life", 16, 16, cpu_rw()));

    let buffer = g.mapper().import(&raw).unwrap();
    drop(raw);
    assert_eq!(open_fds_with_label("mapper-lifecycle"), 2);

    g.mapper().retain(buffer).unwrap();
    g.mapper().free(buffer).unwrap();
    assert_eq!(open_fds_with_label("mapper-lifecycle"), 2);
    g.mapper().free(buffer).unwrap();
    assert_eq!(open_fds_with_label("mapper-lifecycle"), 0);

    assert_eq!(g.mapper().free(buffer).unwrap_err().kind(), ErrorKind::BadBuffer);
}

#[test]
fn test_double_import_is_refused() {
    let g = gralloc("mapper-double");
    let raw = allocate_one(&g, &rgba_info("double", 16, 16, cpu_rw()));

    let buffer = g.mapper().import(&raw).unwrap();
    let err = g.mapper().import(&raw).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NoResources);
    assert_eq!(g.registry().len(), 1);

    g.mapper().free(buffer).unwrap();
    // Freed identities can be imported again.
    let again = g.mapper().import(&raw).unwrap();
    g.mapper().free(again).unwrap();
}

#[test]
fn test_tampered_handle_is_bad_buffer() {
    let g = gralloc("mapper-tampered");
    let mut raw = allocate_one(&g, &rgba_info("tampered", 16, 16, cpu_rw()));
    raw.header.magic ^= 1;
    assert_eq!(g.mapper().import(&raw).unwrap_err().kind(), ErrorKind::BadBuffer);

    let mut raw = allocate_one(&g, &rgba_info("short", 16, 16, cpu_rw()));
    raw.fds.pop();
    assert_eq!(g.mapper().import(&raw).unwrap_err().kind(), ErrorKind::BadBuffer);
}

#[test]
fn test_shutdown_releases_registered_buffers() {
    let g = gralloc("mapper-shutdown");
    for i in 0..3 {
        let raw = allocate_one(&g, &rgba_info(&format!("s{i}"), 8, 8, cpu_rw()));
        g.mapper().import(&raw).unwrap();
    }
    assert_eq!(open_fds_with_label("mapper-shutdown"), 6);
    assert_eq!(g.shutdown(), 3);
    assert_eq!(open_fds_with_label("mapper-shutdown"), 0);
}

// ============================================================================
// Cross-process sharing
// ============================================================================

#[test]
fn test_handle_over_socket_shares_pixels_and_metadata() {
    let producer = gralloc("mapper-ipc-producer");
    let consumer = gralloc("mapper-ipc-consumer");
    let raw = allocate_one(&producer, &rgba_info("shared", 32, 8, cpu_rw()));
    let (tx, rx) = UnixStream::pair().unwrap();

    let sender = std::thread::spawn(move || {
        send_handle(&tx, &raw).unwrap();
        raw
    });
    let received = recv_handle(&rx).unwrap();
    let raw = sender.join().unwrap();

    let ours = producer.mapper().import(&raw).unwrap();
    let theirs = consumer.mapper().import(&received).unwrap();
    drop((raw, received));

    let region = producer
        .mapper()
        .lock(ours, BufferUsage::CPU_WRITE_OFTEN, Rect::default(), None)
        .unwrap();
    // SAFETY: locked for writing and at least 16 bytes long.
    unsafe { region.as_ptr().copy_from(b"hello, consumer!".as_ptr(), 16) };
    producer.mapper().unlock(ours).unwrap();

    let dataspace = StandardMetadataType::Dataspace.metadata_type();
    producer
        .mapper()
        .set(ours, &dataspace, &encode_i32(0x1234))
        .unwrap();

    let region = consumer
        .mapper()
        .lock(theirs, BufferUsage::CPU_READ_OFTEN, Rect::default(), None)
        .unwrap();
    // SAFETY: locked for reading.
    let bytes = unsafe { std::slice::from_raw_parts(region.as_ptr(), 16) };
    assert_eq!(bytes, b"hello, consumer!");
    consumer.mapper().unlock(theirs).unwrap();

    let value = consumer.mapper().get(theirs, &dataspace).unwrap();
    assert_eq!(decode_i32(&value).unwrap(), 0x1234);
}

#[test]
fn test_exported_handle_reports_transport_size() {
    let g = gralloc("mapper-export");
    let raw = allocate_one(&g, &rgba_info("export", 16, 16, cpu_rw()));
    let buffer = g.mapper().import(&raw).unwrap();

    let exported = g.mapper().export(buffer).unwrap();
    assert_eq!(exported.buffer_id(), raw.buffer_id());
    assert_eq!(
        g.mapper().get_transport_size(buffer).unwrap(),
        exported.transport_size().unwrap()
    );
}

// ============================================================================
// CPU access
// ============================================================================

#[test]
fn test_lock_requires_matching_usage() {
    let g = gralloc("mapper-lock-usage");
    let raw = allocate_one(
        &g,
        &rgba_info("gpu-only", 16, 16, BufferUsage::GPU_TEXTURE | BufferUsage::CPU_READ_RARELY),
    );
    let buffer = g.mapper().import(&raw).unwrap();

    let err = g
        .mapper()
        .lock(buffer, BufferUsage::CPU_WRITE_OFTEN, Rect::default(), None)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BadValue);

    g.mapper()
        .lock(buffer, BufferUsage::CPU_READ_RARELY, Rect::full(8, 8), None)
        .unwrap();
    g.mapper().unlock(buffer).unwrap();
    assert_eq!(g.mapper().unlock(buffer).unwrap_err().kind(), ErrorKind::BadBuffer);
}

#[test]
fn test_lock_after_free_is_bad_buffer() {
    let g = gralloc("mapper-lock-freed");
    let raw = allocate_one(&g, &rgba_info("freed", 16, 16, cpu_rw()));
    let buffer = g.mapper().import(&raw).unwrap();
    g.mapper().free(buffer).unwrap();

    let err = g
        .mapper()
        .lock(buffer, BufferUsage::CPU_READ_OFTEN, Rect::default(), None)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BadBuffer);
}

// ============================================================================
// Metadata
// ============================================================================

#[test]
fn test_read_only_metadata() {
    let g = gralloc("mapper-meta-ro");
    let raw = allocate_one(&g, &rgba_info("ro", 24, 12, cpu_rw()));
    let buffer = g.mapper().import(&raw).unwrap();

    let width = StandardMetadataType::Width.metadata_type();
    assert_eq!(decode_u64(&g.mapper().get(buffer, &width).unwrap()).unwrap(), 24);

    let err = g.mapper().set(buffer, &width, &10u64.to_le_bytes()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unsupported);

    let vendor = MetadataType::new("com.example.Unknown", 1);
    assert_eq!(g.mapper().get(buffer, &vendor).unwrap_err().kind(), ErrorKind::Unsupported);
}

#[test]
fn test_crop_defaults_and_updates() {
    let g = gralloc("mapper-meta-crop");
    let raw = allocate_one(&g, &rgba_info("crop", 24, 12, cpu_rw()));
    let buffer = g.mapper().import(&raw).unwrap();
    let crop = StandardMetadataType::Crop.metadata_type();

    let initial = decode_crop(&g.mapper().get(buffer, &crop).unwrap()).unwrap();
    assert_eq!(initial, vec![Rect::full(24, 12)]);

    let inner = Rect { left: 2, top: 2, right: 20, bottom: 10 };
    g.mapper().set(buffer, &crop, &encode_crop(&[inner])).unwrap();
    assert_eq!(
        decode_crop(&g.mapper().get(buffer, &crop).unwrap()).unwrap(),
        vec![inner]
    );

    let outside = Rect { left: 0, top: 0, right: 25, bottom: 12 };
    let err = g.mapper().set(buffer, &crop, &encode_crop(&[outside])).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BadValue);
}

#[test]
fn test_dump_is_all_or_nothing() {
    let g = gralloc("mapper-dump");
    let good = g
        .mapper()
        .import(&allocate_one(&g, &rgba_info("good", 8, 8, cpu_rw())))
        .unwrap();
    let bad = g
        .mapper()
        .import(&allocate_one(&g, &rgba_info("bad", 8, 8, cpu_rw())))
        .unwrap();

    assert!(!g.mapper().dump_buffer(good).unwrap().is_empty());

    // Wipe the shared metadata header of one buffer.
    let handle = g.registry().lookup(bad).unwrap();
    handle.attr().as_mut_slice().unwrap()[..16].fill(0);

    assert!(g.mapper().dump_buffer(bad).unwrap().is_empty());
    let dumps = g.mapper().dump_buffers();
    assert_eq!(dumps.len(), 2);
    assert_eq!(dumps.iter().filter(|d| d.is_empty()).count(), 1);

    let name = StandardMetadataType::Name.metadata_type();
    assert!(g.mapper().dump_buffer(good).unwrap().get(&name).is_some());
}

#[test]
fn test_metadata_from_descriptor_info() {
    let g = gralloc("mapper-meta-info");
    let info = rgba_info("info", 100, 20, cpu_rw());
    let stride = StandardMetadataType::Stride.metadata_type();
    let bytes = g.mapper().get_from_descriptor_info(&info, &stride).unwrap();
    assert_eq!(u32::from_le_bytes(bytes[..4].try_into().unwrap()), 112);

    let id = StandardMetadataType::BufferId.metadata_type();
    assert_eq!(
        g.mapper().get_from_descriptor_info(&info, &id).unwrap_err().kind(),
        ErrorKind::Unsupported
    );
    assert!(g.mapper().is_supported(&info));
}

#[test]
fn test_every_metadata_type_needs_registration() {
    let g = gralloc("mapper-meta-unregistered");
    let buffer = g
        .mapper()
        .import(&allocate_one(&g, &rgba_info("gone", 8, 8, cpu_rw())))
        .unwrap();
    g.mapper().free(buffer).unwrap();

    for description in g.mapper().list_supported() {
        let err = g.mapper().get(buffer, &description.metadata_type).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadBuffer, "{:?}", description.metadata_type);
    }
}
