use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rand::prelude::*;
use tempdir::TempDir;

use avatar_engine::{ContentHash, ContentStore};

// Modify time limit here
const BENCHMARK_TIME_LIMIT: std::time::Duration =
    std::time::Duration::from_secs(20);

fn generate_random_data(size: usize) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    (0..size).map(|_| rng.gen()).collect()
}

/// Benchmarks hashing, storing and loading avatar blobs of typical sizes.
fn bench_content_store(c: &mut Criterion) {
    let mut group = c.benchmark_group("content_store");
    group.measurement_time(BENCHMARK_TIME_LIMIT);

    let dir = TempDir::new("content_store_benchmark")
        .expect("Failed to create temporary directory");
    let store = ContentStore::new("bench".to_string(), dir.path())
        .expect("Failed to create content store");

    let inputs = [("small", 4096), ("medium", 32768), ("large", 262144)];

    for (name, size) in inputs.iter() {
        let input_data = generate_random_data(*size);
        let hash = ContentHash::from_bytes(&input_data);

        let id = format!("hash:{}", name);
        let data = input_data.clone();
        group.bench_function(id, move |b| {
            b.iter(|| ContentHash::from_bytes(black_box(&data)));
        });

        let id = format!("store:{}", name);
        let (bench_store, bench_hash, data) =
            (store.clone(), hash.clone(), input_data.clone());
        group.bench_function(id, move |b| {
            b.iter(|| {
                bench_store
                    .store(black_box(&bench_hash), black_box(&data))
                    .expect("store returned an error")
            });
        });

        let id = format!("load:{}", name);
        let bench_store = store.clone();
        group.bench_function(id, move |b| {
            b.iter(|| {
                bench_store
                    .load(black_box(&hash))
                    .expect("load returned an error")
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_content_store);
criterion_main!(benches);
