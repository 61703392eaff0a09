//! Chunk codec benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use kitestore_bench::{chunk_run, payload};
use kitestore_core::{compute_checksum, parse_chunks, Chunk, ChunkId};

fn bench_checksum(c: &mut Criterion) {
    let mut group = c.benchmark_group("checksum");

    for size in [64, 1024, 16 * 1024].iter() {
        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let data = payload(size);
            b.iter(|| black_box(compute_checksum(black_box(&data))));
        });
    }

    group.finish();
}

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("chunk_encode");

    for size in [64, 1024, 16 * 1024].iter() {
        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let chunk = Chunk::new(ChunkId::new(1), payload(size));
            let mut buf = Vec::with_capacity(chunk.encoded_len());
            b.iter(|| {
                buf.clear();
                chunk.encode_into(black_box(&mut buf));
                black_box(buf.len());
            });
        });
    }

    group.finish();
}

/// Parsing a whole segment image, as recovery does.
fn bench_parse_segment(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse_segment");
    group.sample_size(30);

    for count in [100, 1_000, 10_000].iter() {
        let mut image = Vec::new();
        for chunk in chunk_run(0, *count, 256) {
            chunk.encode_into(&mut image);
        }

        group.throughput(Throughput::Bytes(image.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &image, |b, image| {
            b.iter(|| {
                let parsed = parse_chunks(ChunkId::new(0), black_box(image)).unwrap();
                black_box(parsed.chunks.len());
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_checksum, bench_encode, bench_parse_segment);
criterion_main!(benches);
