//! Descriptor codec benchmarks.

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use gralloc::descriptor::{BufferDescriptorInfo, DescriptorCodec};
use gralloc::format::PixelFormat;
use gralloc::usage::BufferUsage;

fn info(name_len: usize) -> BufferDescriptorInfo {
    BufferDescriptorInfo {
        name: "n".repeat(name_len),
        width: 1920,
        height: 1080,
        layer_count: 1,
        format: PixelFormat::YCBCR_420_888,
        usage: BufferUsage::CPU_READ_OFTEN | BufferUsage::VIDEO_DECODER,
        reserved_size: 4096,
    }
}

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("descriptor_encode");

    for name_len in [0, 32, 256] {
        let info = info(name_len);
        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::from_parameter(name_len), &info, |b, info| {
            b.iter(|| std::hint::black_box(DescriptorCodec::encode(info).unwrap()));
        });
    }

    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("descriptor_decode");

    for name_len in [0, 32, 256] {
        let bytes = DescriptorCodec::encode(&info(name_len)).unwrap();
        group.throughput(Throughput::Bytes(bytes.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(name_len), &bytes, |b, bytes| {
            b.iter(|| std::hint::black_box(DescriptorCodec::decode(bytes).unwrap()));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_encode, bench_decode);
criterion_main!(benches);
