//! End-to-end write path on the durable backends

use chrono::{Duration as ChronoDuration, Utc};
use shardline::shard_group::truncate;
use shardline::*;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

const ORG: Id = Id::new(0x1000);
const BUCKET: Id = Id::new(0x2000);
const DAY: Duration = Duration::from_secs(86_400);

struct Node {
    groups: Arc<ShardGroupManager>,
    engine: Arc<FileEngine>,
    writer: WriteService,
}

fn open(dir: &Path, retention: Duration) -> Node {
    let ctx = Context::background();
    let kv = Arc::new(SqliteKv::open_dir(dir.join("meta")).unwrap());
    let store = Arc::new(ShardGroupStore::open(&ctx, kv).unwrap());
    let buckets = Arc::new(InMemoryBucketService::with_buckets([
        Bucket::new(BUCKET, ORG, "telemetry").retention(retention)
    ]));
    let groups = Arc::new(
        ShardGroupManager::new(store, buckets.clone(), Arc::new(SnowflakeGenerator::default()))
            .shards_per_group(2),
    );
    let engine = Arc::new(FileEngine::open(dir.join("shards")).unwrap().without_sync());
    let writer = WriteService::new(buckets, groups.clone(), engine.clone());
    Node {
        groups,
        engine,
        writer,
    }
}

fn point(host: &str, time: chrono::DateTime<Utc>) -> Point {
    Point::new("cpu", time).tag("host", host).field("usage", 0.5)
}

#[tokio::test]
async fn test_write_survives_restart() {
    let dir = tempdir().unwrap();
    let ctx = Context::background();
    let today = truncate(Utc::now(), DAY).unwrap();
    let yesterday = today - ChronoDuration::hours(10);

    let first_ids = {
        let node = open(dir.path(), DAY * 30);
        let summary = node
            .writer
            .write_points(
                &ctx,
                ORG,
                BUCKET,
                vec![
                    point("a", yesterday),
                    point("b", yesterday),
                    point("a", today + ChronoDuration::minutes(1)),
                ],
            )
            .await
            .unwrap();
        assert_eq!(summary.written, 3);

        let groups = node
            .groups
            .shard_groups_by_time_range(&ctx, BUCKET, yesterday, today + ChronoDuration::hours(1))
            .await
            .unwrap();
        assert_eq!(groups.len(), 2);
        assert!(groups[0].start_time < groups[1].start_time);
        groups.into_iter().map(|g| g.id).collect::<Vec<_>>()
    };

    // Same windows after reopening resolve to the same groups.
    let node = open(dir.path(), DAY * 30);
    node.writer
        .write_points(&ctx, ORG, BUCKET, vec![point("c", yesterday)])
        .await
        .unwrap();

    let groups = node
        .groups
        .find_shard_groups(&ctx, &ShardGroupFilter::new().bucket(BUCKET))
        .await
        .unwrap();
    let mut ids: Vec<_> = groups.iter().map(|g| g.id).collect();
    ids.sort();
    let mut expected = first_ids.clone();
    expected.sort();
    assert_eq!(ids, expected);

    let mut stored = 0;
    for id in node.engine.shard_ids().await {
        stored += node.engine.read_points(id).await.unwrap().len();
    }
    assert_eq!(stored, 4);

    let report = node.groups.store().verify_index(&ctx).unwrap();
    assert!(report.is_consistent());
}

#[tokio::test]
async fn test_delete_then_rewrite_creates_new_group() {
    let dir = tempdir().unwrap();
    let node = open(dir.path(), DAY * 2);
    let ctx = Context::background();
    let now = Utc::now();

    node.writer
        .write_points(&ctx, ORG, BUCKET, vec![point("a", now)])
        .await
        .unwrap();
    let old = node.groups.ensure_shard_group(&ctx, BUCKET, now).await.unwrap();

    node.groups
        .delete_shard_group(&ctx, BUCKET, old.id)
        .await
        .unwrap();
    assert!(node
        .groups
        .find_shard_group(&ctx, old.id)
        .await
        .unwrap_err()
        .is_not_found());

    node.writer
        .write_points(&ctx, ORG, BUCKET, vec![point("a", now)])
        .await
        .unwrap();
    let new = node.groups.ensure_shard_group(&ctx, BUCKET, now).await.unwrap();
    assert_ne!(new.id, old.id);
    assert_eq!(
        (new.start_time, new.end_time),
        (old.start_time, old.end_time)
    );
}

#[tokio::test]
async fn test_concurrent_writers_share_groups() {
    let dir = tempdir().unwrap();
    let node = Arc::new(open(dir.path(), DAY * 7));
    let now = Utc::now();

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let node = Arc::clone(&node);
            tokio::spawn(async move {
                let points = (0..10)
                    .map(|j| point(&format!("host-{}-{}", i, j), now))
                    .collect();
                node.writer
                    .write_points(&Context::background(), ORG, BUCKET, points)
                    .await
                    .unwrap()
            })
        })
        .collect();

    let mut written = 0;
    for handle in handles {
        written += handle.await.unwrap().written;
    }
    assert_eq!(written, 80);

    let groups = node
        .groups
        .find_shard_groups(&Context::background(), &ShardGroupFilter::new().bucket(BUCKET))
        .await
        .unwrap();
    assert_eq!(groups.len(), 1);
}
