// Read performance benchmarks for Strata

use std::hint::black_box;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use strata::{Options, ReadOptions, DB};
use tempfile::TempDir;

fn populated(options: Options, size: usize) -> (TempDir, DB) {
    let temp_dir = TempDir::new().unwrap();
    let db = DB::open(temp_dir.path(), options).unwrap();
    for i in 0..size {
        let key = format!("key{:08}", i);
        let value = format!("value{:08}", i);
        db.put(key.as_bytes(), value.as_bytes()).unwrap();
    }
    db.flush().unwrap();
    (temp_dir, db)
}

fn benchmark_sequential_read(c: &mut Criterion) {
    let mut group = c.benchmark_group("sequential_read");

    for size in [100, 1000, 10000].iter() {
        let (_dir, db) = populated(Options::default(), *size);

        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            b.iter(|| {
                for i in 0..size {
                    let key = format!("key{:08}", i);
                    let value = db.get(key.as_bytes()).unwrap();
                    black_box(value);
                }
            });
        });
    }

    group.finish();
}

fn benchmark_random_read(c: &mut Criterion) {
    let mut group = c.benchmark_group("random_read");

    for size in [100, 1000, 10000].iter() {
        let (_dir, db) = populated(Options::default(), *size);

        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            b.iter(|| {
                use rand::Rng;
                let mut rng = rand::rng();

                for _ in 0..size {
                    let key_num: usize = rng.random_range(0..size);
                    let key = format!("key{:08}", key_num);
                    let value = db.get(key.as_bytes()).unwrap();
                    black_box(value);
                }
            });
        });
    }

    group.finish();
}

fn benchmark_cache_hit(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache_hit");

    let (_dir, db) = populated(Options::default(), 1000);
    for i in 0..1000 {
        let key = format!("key{:08}", i);
        let _ = db.get(key.as_bytes()).unwrap();
    }

    group.throughput(Throughput::Elements(1000));
    group.bench_function("cached_reads", |b| {
        b.iter(|| {
            for i in 0..1000 {
                let key = format!("key{:08}", i);
                black_box(db.get(key.as_bytes()).unwrap());
            }
        });
    });

    let (_dir, uncached) = populated(Options::default().block_cache_size(0), 1000);
    group.bench_function("uncached_reads", |b| {
        b.iter(|| {
            for i in 0..1000 {
                let key = format!("key{:08}", i);
                black_box(uncached.get(key.as_bytes()).unwrap());
            }
        });
    });

    group.finish();
}

fn benchmark_read_with_bloom_filter(c: &mut Criterion) {
    let mut group = c.benchmark_group("read_missing");
    group.throughput(Throughput::Elements(1000));

    for (name, bits) in [("without_bloom", 0), ("with_bloom", 10)] {
        let (_dir, db) = populated(Options::default().bloom_bits_per_key(bits), 1000);
        group.bench_function(name, |b| {
            b.iter(|| {
                // Keys 1000-1999 were never written
                for i in 1000..2000 {
                    let key = format!("key{:08}", i);
                    black_box(db.get(key.as_bytes()).unwrap());
                }
            });
        });
    }

    group.finish();
}

fn benchmark_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("scan");

    let (_dir, db) = populated(Options::default(), 10000);
    for i in (0..10000).step_by(3) {
        let key = format!("key{:08}", i);
        db.put(key.as_bytes(), b"overwritten").unwrap();
    }

    group.throughput(Throughput::Elements(10000));
    group.bench_function("full_scan", |b| {
        b.iter(|| {
            let count = db.iter().unwrap().count();
            black_box(count);
        });
    });

    group.throughput(Throughput::Elements(100));
    group.bench_function("range_100", |b| {
        b.iter(|| {
            let entries: Vec<_> = db
                .scan(Some(b"key00005000".as_slice()), Some(b"key00005100".as_slice()))
                .unwrap()
                .collect();
            black_box(entries);
        });
    });

    group.finish();
}

fn benchmark_snapshot_read(c: &mut Criterion) {
    let mut group = c.benchmark_group("snapshot_read");

    let (_dir, db) = populated(Options::default(), 1000);
    let snapshot = db.snapshot();
    for i in 0..1000 {
        let key = format!("key{:08}", i);
        db.put(key.as_bytes(), b"newer").unwrap();
    }

    group.throughput(Throughput::Elements(1000));
    group.bench_function("behind_1000_updates", |b| {
        b.iter(|| {
            for i in 0..1000 {
                let key = format!("key{:08}", i);
                let value = db
                    .get_opt(key.as_bytes(), ReadOptions::at(&snapshot))
                    .unwrap();
                black_box(value);
            }
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    benchmark_sequential_read,
    benchmark_random_read,
    benchmark_cache_hit,
    benchmark_read_with_bloom_filter,
    benchmark_scan,
    benchmark_snapshot_read
);
criterion_main!(benches);
