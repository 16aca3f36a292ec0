//! Benchmarks for shard-group lookup and the write path
//!
//! Run with: cargo bench

use chrono::{DateTime, TimeZone, Utc};
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use shardline::shard_group::truncate;
use shardline::write::ShardGroupList;
use shardline::*;
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

const ORG: Id = Id::new(0x1000);
const BUCKET: Id = Id::new(0x2000);

fn base() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

fn hourly_groups(count: u64) -> Vec<ShardGroup> {
    (0..count)
        .map(|i| {
            let start = base() + chrono::Duration::hours(i as i64);
            ShardGroup::new(
                Id::new(10_000 + i * 2),
                start,
                start + chrono::Duration::hours(1),
                vec![Shard::new(Id::new(10_001 + i * 2))],
            )
            .unwrap()
        })
        .collect()
}

fn bench_truncate(c: &mut Criterion) {
    let mut group = c.benchmark_group("truncate");
    let t = Utc.with_ymd_and_hms(2024, 3, 6, 13, 47, 12).unwrap();

    for (name, unit) in [
        ("hour", Duration::from_secs(3600)),
        ("week", Duration::from_secs(7 * 86_400)),
    ] {
        group.bench_function(name, |b| b.iter(|| truncate(black_box(t), unit).unwrap()));
    }

    group.finish();
}

fn bench_working_set(c: &mut Criterion) {
    let mut group = c.benchmark_group("shard_group_list");

    for size in [10u64, 100, 1000] {
        let mut list = ShardGroupList::new();
        for g in hourly_groups(size) {
            list.insert(g);
        }
        let probe = base() + chrono::Duration::minutes(size as i64 * 30);

        group.bench_function(format!("lookup_{}", size), |b| {
            b.iter(|| list.shard_group_at(black_box(probe)).map(|g| g.id))
        });
    }

    group.finish();
}

fn bench_catalog(c: &mut Criterion) {
    let mut group = c.benchmark_group("catalog");
    let ctx = Context::background();

    let dir = tempdir().unwrap();
    let kv = Arc::new(SqliteKv::open_dir(dir.path()).unwrap());
    let store = ShardGroupStore::open(&ctx, kv).unwrap();
    for g in hourly_groups(500) {
        store.create(&ctx, BUCKET, &g).unwrap();
    }

    let t = base() + chrono::Duration::hours(250);
    let filter = ShardGroupFilter::new().bucket(BUCKET).min(t).max(t);
    group.bench_function("covering_lookup_500", |b| {
        b.iter(|| store.list(&ctx, black_box(&filter)).unwrap())
    });

    group.finish();
}

fn bench_write(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("write");
    let ctx = Context::background();

    let store = Arc::new(ShardGroupStore::open(&ctx, Arc::new(MemoryKv::new())).unwrap());
    let buckets = Arc::new(InMemoryBucketService::with_buckets([Bucket::new(
        BUCKET, ORG, "bench",
    )]));
    let groups = Arc::new(
        ShardGroupManager::new(store, buckets.clone(), Arc::new(SnowflakeGenerator::default()))
            .shards_per_group(4),
    );
    let writer = WriteService::new(buckets, groups, Arc::new(MemoryEngine::new()));

    let now = Utc::now();
    let points: Vec<Point> = (0..1000)
        .map(|i| {
            Point::new("cpu", now - chrono::Duration::seconds(i))
                .tag("host", format!("host-{}", i % 16))
                .field("usage", i as f64)
        })
        .collect();

    group.throughput(Throughput::Elements(points.len() as u64));
    group.bench_function("write_points_1000", |b| {
        b.iter(|| {
            rt.block_on(async {
                writer
                    .write_points(&ctx, ORG, BUCKET, black_box(points.clone()))
                    .await
                    .unwrap()
            })
        })
    });

    group.finish();
}

criterion_group!(benches, bench_truncate, bench_working_set, bench_catalog, bench_write);
criterion_main!(benches);
