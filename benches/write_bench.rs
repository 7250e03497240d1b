// Write performance benchmarks for lsmdb

use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput};
use lsmdb::{CompressionType, Options, WriteBatch, WriteOptions, DB};
use rand::Rng;
use std::hint::black_box;
use tempfile::TempDir;

fn fresh_db(options: Options) -> (TempDir, DB) {
    let temp_dir = TempDir::new().unwrap();
    let db = DB::open(temp_dir.path(), options).unwrap();
    (temp_dir, db)
}

fn benchmark_sequential_write(c: &mut Criterion) {
    let mut group = c.benchmark_group("sequential_write");

    for size in [100, 1000, 10000] {
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter_batched(
                || fresh_db(Options::default()),
                |(_dir, db)| {
                    for i in 0..size {
                        let key = format!("key{:08}", i);
                        let value = format!("value{:08}", i);
                        db.put(key.as_bytes(), value.as_bytes()).unwrap();
                    }
                    black_box(&db);
                },
                BatchSize::PerIteration,
            );
        });
    }

    group.finish();
}

fn benchmark_random_write(c: &mut Criterion) {
    let mut group = c.benchmark_group("random_write");

    for size in [100, 1000, 10000] {
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter_batched(
                || fresh_db(Options::default()),
                |(_dir, db)| {
                    let mut rng = rand::rng();
                    for _ in 0..size {
                        let key_num: u32 = rng.random();
                        let key = format!("key{:08}", key_num);
                        let value = format!("value{:08}", key_num);
                        db.put(key.as_bytes(), value.as_bytes()).unwrap();
                    }
                    black_box(&db);
                },
                BatchSize::PerIteration,
            );
        });
    }

    group.finish();
}

fn benchmark_batch_write(c: &mut Criterion) {
    let mut group = c.benchmark_group("batch_write");

    for batch_size in [10, 100, 1000] {
        let mut batch = WriteBatch::new();
        for i in 0..batch_size {
            let key = format!("key{:08}", i);
            let value = format!("value{:08}", i);
            batch.put(key.as_bytes(), value.as_bytes());
        }

        let (_dir, db) = fresh_db(Options::default());
        group.throughput(Throughput::Elements(batch_size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(batch_size), &batch, |b, batch| {
            b.iter(|| db.write(&WriteOptions::default(), black_box(batch)).unwrap());
        });
    }

    group.finish();
}

fn benchmark_sync_write(c: &mut Criterion) {
    let mut group = c.benchmark_group("sync_write");
    let (_dir, db) = fresh_db(Options::default());
    let mut i = 0u64;

    group.throughput(Throughput::Elements(1));
    group.bench_function("put_sync", |b| {
        b.iter(|| {
            i += 1;
            let key = format!("key{:08}", i);
            db.put_with(&WriteOptions::new().sync(true), key.as_bytes(), b"durable").unwrap();
        });
    });

    group.finish();
}

fn benchmark_overwrite(c: &mut Criterion) {
    let mut group = c.benchmark_group("overwrite");

    group.throughput(Throughput::Elements(1000));
    group.bench_function("overwrite_1000", |b| {
        let (_dir, db) = fresh_db(Options::default());
        for i in 0..1000 {
            let key = format!("key{:08}", i);
            let value = format!("initial_value{:08}", i);
            db.put(key.as_bytes(), value.as_bytes()).unwrap();
        }

        b.iter(|| {
            for i in 0..1000 {
                let key = format!("key{:08}", i);
                let value = format!("updated_value{:08}", i);
                db.put(key.as_bytes(), value.as_bytes()).unwrap();
            }
            black_box(&db);
        });
    });

    group.finish();
}

fn benchmark_flush_with_compression(c: &mut Criterion) {
    let mut group = c.benchmark_group("flush_with_compression");

    let mut kinds = vec![("none", CompressionType::None)];
    #[cfg(feature = "snappy")]
    kinds.push(("snappy", CompressionType::Snappy));
    #[cfg(feature = "lz4-compression")]
    kinds.push(("lz4", CompressionType::Lz4));

    for (name, compression) in kinds {
        group.bench_function(name, |b| {
            b.iter_batched(
                || fresh_db(Options::default().compression(compression)),
                |(_dir, db)| {
                    for i in 0..1000 {
                        let key = format!("key{:08}", i);
                        db.put(key.as_bytes(), &[b'x'; 100]).unwrap();
                    }
                    db.flush_memtable().unwrap();
                },
                BatchSize::PerIteration,
            );
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    benchmark_sequential_write,
    benchmark_random_write,
    benchmark_batch_write,
    benchmark_sync_write,
    benchmark_overwrite,
    benchmark_flush_with_compression
);
criterion_main!(benches);
