//! Segment benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use kitestore_bench::chunk_run;
use kitestore_core::{ChunkId, Segment};
use kitestore_storage::InMemoryBackend;
use std::path::PathBuf;
use tempfile::TempDir;

/// Batched appends into an in-memory segment.
fn bench_inmemory_append(c: &mut Criterion) {
    let mut group = c.benchmark_group("segment_append_inmemory");

    for batch in [1usize, 10, 100].iter() {
        group.throughput(Throughput::Elements(*batch as u64));
        group.bench_with_input(BenchmarkId::from_parameter(batch), batch, |b, &batch| {
            let segment = Segment::closed(ChunkId::new(0), PathBuf::from("bench"), 0);
            segment
                .open_with(Box::new(InMemoryBackend::new()))
                .unwrap();
            let mut next = 0i64;

            b.iter(|| {
                let run = chunk_run(next, batch, 256);
                segment.append(black_box(&run), false).unwrap();
                next += batch as i64;
            });
        });
    }

    group.finish();
}

/// Batched appends to a segment file, with and without fsync.
fn bench_file_append(c: &mut Criterion) {
    let mut group = c.benchmark_group("segment_append_file");
    group.sample_size(20);

    for sync in [false, true] {
        let name = if sync { "sync" } else { "no_sync" };
        group.bench_function(name, |b| {
            let temp_dir = TempDir::new().unwrap();
            let segment =
                Segment::create(ChunkId::new(0), temp_dir.path().join("segment-0.data")).unwrap();
            let mut next = 0i64;

            b.iter(|| {
                let run = chunk_run(next, 100, 256);
                segment.append(black_box(&run), sync).unwrap();
                next += 100;
            });
        });
    }

    group.finish();
}

/// Point lookups in a resident segment.
fn bench_get(c: &mut Criterion) {
    let mut group = c.benchmark_group("segment_get");

    let segment = Segment::closed(ChunkId::new(0), PathBuf::from("bench"), 0);
    segment
        .open_with(Box::new(InMemoryBackend::new()))
        .unwrap();
    segment.append(&chunk_run(0, 10_000, 128), false).unwrap();

    let mut idx = 0i64;
    group.bench_function("resident_10000", |b| {
        b.iter(|| {
            let chunk = segment.get(black_box(ChunkId::new((idx * 7) % 10_000))).unwrap();
            idx += 1;
            black_box(chunk);
        });
    });

    group.finish();
}

criterion_group!(benches, bench_inmemory_append, bench_file_append, bench_get);
criterion_main!(benches);
