//! Performance benchmarks for dirlease
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use dirlease::lock::{LeaseLock, LockOptions, MarkerPaths};
use dirlease::store::ResourceStore;
use std::time::Duration;
use tempfile::TempDir;

fn bench_lock() -> LeaseLock {
    LeaseLock::with_options(
        LockOptions::default()
            .with_timeout(Duration::from_secs(60))
            .with_poll_interval(Duration::from_millis(1)),
    )
}

fn bench_acquire_release(c: &mut Criterion) {
    let dir = TempDir::new().unwrap();
    let name = dir.path().join("job").to_string_lossy().to_string();
    let lock = bench_lock();

    c.bench_function("uncontended_acquire_release", |b| {
        b.iter(|| {
            let lease = lock.acquire(black_box(&name)).unwrap();
            black_box(lock.release(&lease));
        });
    });
}

fn bench_inspect(c: &mut Criterion) {
    let dir = TempDir::new().unwrap();
    let name = dir.path().join("job").to_string_lossy().to_string();
    let lock = bench_lock();
    let lease = lock.acquire(&name).unwrap();

    c.bench_function("inspect_held_lock", |b| {
        b.iter(|| {
            let _ = black_box(lock.inspect(black_box(&name)));
        });
    });

    lock.release(&lease);
}

fn bench_marker_paths(c: &mut Criterion) {
    c.bench_function("marker_paths_for_name", |b| {
        b.iter(|| {
            let _ = black_box(MarkerPaths::for_name(black_box("/shared/locks/jobA/")));
        });
    });
}

fn bench_store_set_get(c: &mut Criterion) {
    let mut group = c.benchmark_group("store_set_get");

    for entries in [1usize, 100, 1000].iter() {
        let dir = TempDir::new().unwrap();
        let store = ResourceStore::create(dir.path(), "bench", bench_lock());
        {
            let guard = store.acquire().unwrap();
            for i in 0..*entries {
                guard.set(&format!("key_{}", i), &vec![i; 8]).unwrap();
            }
        }

        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::new("entries", entries), entries, |b, _| {
            b.iter(|| {
                let guard = store.acquire().unwrap();
                guard.set("key_0", &vec![7usize; 8]).unwrap();
                let value: Vec<usize> = guard.get("key_0").unwrap();
                black_box(value);
                guard.release();
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_acquire_release,
    bench_inspect,
    bench_marker_paths,
    bench_store_set_get
);
criterion_main!(benches);
