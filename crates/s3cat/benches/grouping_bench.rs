//! 🏎️ How fast do listings turn into groups, and groups into objects?
//! Run with `cargo bench -p s3cat`. Numbers on a laptop are vibes, not SLAs.

use std::hint::black_box;
use std::sync::Arc;
use std::time::Duration;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use s3cat::units::{KIB, MIB};
use s3cat::{AssemblyOptions, InMemoryStore, RetryPolicy, SourceRecord, grouped_assemble};

/// 🎲 Deterministic sizes between 1 KiB and 8 MiB, so both planner piles get traffic.
fn listing(count: usize) -> Vec<SourceRecord> {
    let mut state: u64 = 0x5eed;
    (0..count)
        .map(|i| {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let size = KIB + (state >> 33) % (8 * MIB);
            SourceRecord::new(format!("logs/{i:08}.json"), size)
        })
        .collect()
}

fn grouping(c: &mut Criterion) {
    let mut group = c.benchmark_group("grouping");
    for count in [1_000usize, 100_000] {
        let records = listing(count);
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::new("group by 1 GiB", count), &records, |b, records| {
            b.iter(|| s3cat::grouping::group(black_box(records), Some(1024 * MIB)))
        });
        group.bench_with_input(BenchmarkId::new("plan every group", count), &records, |b, records| {
            b.iter(|| {
                s3cat::grouping::group(records, Some(64 * MIB))
                    .iter()
                    .map(|g| s3cat::planner::plan(g, s3cat::planner::SERVER_COPY_MIN))
                    .count()
            })
        });
    }
    group.finish();
}

fn assemble_in_memory(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .enable_all()
        .build()
        .unwrap();

    // 📦 200 small objects, 4 KiB each, squeezed into 64 KiB outputs
    let store = InMemoryStore::new();
    let records: Vec<SourceRecord> = runtime.block_on(async {
        let mut records = Vec::new();
        for i in 0..200 {
            let key = format!("small/{i:04}");
            store.put(key.clone(), vec![b'x'; 4 * KIB as usize]).await;
            records.push(SourceRecord::new(key, 4 * KIB));
        }
        records
    });
    let options = AssemblyOptions {
        number_output_parts: true,
        small_part_concurrency: 4,
        retry: RetryPolicy {
            max_attempts: 1,
            backoff: Duration::ZERO,
        },
        ..AssemblyOptions::default()
    };
    let store = Arc::new(store);

    let mut group = c.benchmark_group("assemble");
    group.throughput(Throughput::Bytes(200 * 4 * KIB));
    group.bench_function("200 x 4 KiB into 64 KiB groups", |b| {
        b.to_async(&runtime).iter(|| {
            let store = Arc::clone(&store);
            let records = records.clone();
            let options = options.clone();
            async move {
                grouped_assemble(store, &records, Some(64 * KIB), "bench/out.bin", &options)
                    .await
                    .unwrap()
            }
        })
    });
    group.finish();
}

criterion_group!(benches, grouping, assemble_in_memory);
criterion_main!(benches);
