//! Point routing and shard fan-out

use super::list::ShardGroupList;
use crate::context::Context;
use crate::engine::ShardEngine;
use crate::error::{Error, Result};
use crate::id::Id;
use crate::point::Point;
use crate::shard_group::ShardGroupService;
use crate::tenant::{Bucket, BucketService};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::Instrument;

/// Outcome of a successful [`WriteService::write_points`] call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WriteSummary {
    /// Points handed to the storage engine
    pub written: usize,
    /// Points older than the bucket's retention
    pub dropped: usize,
    /// Shard batches written
    pub shards: usize,
}

pub struct WriteService {
    buckets: Arc<dyn BucketService>,
    shard_groups: Arc<dyn ShardGroupService>,
    engine: Arc<dyn ShardEngine>,
}

impl WriteService {
    pub fn new(
        buckets: Arc<dyn BucketService>,
        shard_groups: Arc<dyn ShardGroupService>,
        engine: Arc<dyn ShardEngine>,
    ) -> Self {
        Self {
            buckets,
            shard_groups,
            engine,
        }
    }

    /// Route `points` to their shards and write them
    ///
    /// Points outside the bucket's retention are dropped. Shard batches are
    /// written concurrently; if any fails, one of the failures is returned
    /// after all batches have finished.
    pub async fn write_points(
        &self,
        ctx: &Context,
        org_id: Id,
        bucket_id: Id,
        points: Vec<Point>,
    ) -> Result<WriteSummary> {
        let span = tracing::info_span!(
            "write_points",
            write_id = %uuid::Uuid::new_v4(),
            org_id = %org_id,
            bucket_id = %bucket_id,
            points = points.len(),
        );
        self.write(ctx, org_id, bucket_id, points)
            .instrument(span)
            .await
    }

    async fn write(
        &self,
        ctx: &Context,
        org_id: Id,
        bucket_id: Id,
        points: Vec<Point>,
    ) -> Result<WriteSummary> {
        let bucket = self.buckets.find_bucket_by_id(ctx, bucket_id).await?;
        if bucket.org_id != org_id {
            return Err(Error::not_found("bucket", bucket_id));
        }

        let cutoff = retention_cutoff(&bucket, Utc::now());
        let mut summary = WriteSummary::default();
        let mut groups = ShardGroupList::new();
        let mut batches: HashMap<Id, Vec<Point>> = HashMap::new();

        for point in points {
            if cutoff.is_some_and(|c| point.time < c) {
                summary.dropped += 1;
                continue;
            }

            if !groups.covers(point.time) {
                let group = self
                    .shard_groups
                    .ensure_shard_group(ctx, bucket_id, point.time)
                    .await?;
                groups.insert(group);
            }

            let group = groups.shard_group_at(point.time).ok_or_else(|| {
                Error::Internal(format!("no shard group returned for {}", point.time))
            })?;
            let shard = group.shard_for(point.hash_id()).ok_or_else(|| {
                Error::Internal(format!("shard group {} has no shards", group.id))
            })?;

            batches.entry(shard.id).or_default().push(point);
            summary.written += 1;
        }

        if summary.dropped > 0 {
            tracing::debug!("Dropped {} points outside retention", summary.dropped);
        }
        summary.shards = batches.len();

        let mut tasks = JoinSet::new();
        for (shard_id, batch) in batches {
            let engine = Arc::clone(&self.engine);
            let ctx = ctx.clone();
            let bucket_name = bucket.name.clone();
            let rp = bucket.retention_policy_name.clone();

            tasks.spawn(
                async move {
                    let res = ctx
                        .run(write_to_shard(
                            engine.as_ref(),
                            &bucket_name,
                            &rp,
                            shard_id,
                            &batch,
                        ))
                        .await;
                    (shard_id, res)
                }
                .in_current_span(),
            );
        }

        let mut first_err = None;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(()))) => {}
                Ok((shard_id, Err(e))) => {
                    tracing::error!(shard_id = %shard_id, "Failed to write to shard: {}", e);
                    first_err.get_or_insert(e);
                }
                Err(e) => {
                    tracing::error!("Shard write task failed: {}", e);
                    first_err.get_or_insert(Error::Internal(format!("shard write task: {}", e)));
                }
            }
        }

        match first_err {
            Some(e) => Err(e),
            None => Ok(summary),
        }
    }
}

/// Oldest timestamp kept by `bucket`, or `None` for infinite retention
fn retention_cutoff(bucket: &Bucket, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    if bucket.has_infinite_retention() {
        return None;
    }
    chrono::Duration::from_std(bucket.retention_period)
        .ok()
        .and_then(|period| now.checked_sub_signed(period))
}

/// Write a batch, creating the shard and retrying once if it does not exist
async fn write_to_shard(
    engine: &dyn ShardEngine,
    bucket: &str,
    retention_policy: &str,
    shard_id: Id,
    points: &[Point],
) -> Result<()> {
    match engine.write_to_shard(shard_id, points).await {
        Err(Error::ShardNotFound(_)) => {
            tracing::debug!(shard_id = %shard_id, "Shard not found, creating it");
            engine
                .create_shard(bucket, retention_policy, shard_id, true)
                .await?;
            engine.write_to_shard(shard_id, points).await
        }
        res => res,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::MemoryEngine;
    use crate::error::ErrorCode;
    use crate::id::SnowflakeGenerator;
    use crate::kv::MemoryKv;
    use crate::shard_group::{truncate, ShardGroupFilter, ShardGroupManager, ShardGroupStore};
    use crate::tenant::InMemoryBucketService;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    const ORG: Id = Id::new(0x1000);
    const BUCKET: Id = Id::new(0x2000);
    const DAY: Duration = Duration::from_secs(86_400);

    struct Fixture {
        buckets: Arc<InMemoryBucketService>,
        groups: Arc<ShardGroupManager>,
    }

    impl Fixture {
        fn new(retention: Duration, shards_per_group: usize) -> Self {
            let ctx = Context::background();
            let store = Arc::new(ShardGroupStore::open(&ctx, Arc::new(MemoryKv::new())).unwrap());
            let buckets = Arc::new(InMemoryBucketService::with_buckets([Bucket::new(
                BUCKET, ORG, "metrics",
            )
            .retention(retention)]));
            let groups = Arc::new(
                ShardGroupManager::new(
                    store,
                    buckets.clone(),
                    Arc::new(SnowflakeGenerator::default()),
                )
                .shards_per_group(shards_per_group),
            );
            Self { buckets, groups }
        }

        fn service(&self, engine: Arc<dyn ShardEngine>) -> WriteService {
            WriteService::new(self.buckets.clone(), self.groups.clone(), engine)
        }

        async fn group_count(&self) -> usize {
            self.groups
                .find_shard_groups(&Context::background(), &ShardGroupFilter::new().bucket(BUCKET))
                .await
                .unwrap()
                .len()
        }
    }

    fn point(host: &str, time: DateTime<Utc>) -> Point {
        Point::new("cpu", time).tag("host", host).field("usage", 0.5)
    }

    /// Counts calls and fails writes with a fixed error
    struct FailingEngine {
        writes: AtomicUsize,
        creates: AtomicUsize,
        shard_missing: bool,
    }

    impl FailingEngine {
        fn new(shard_missing: bool) -> Self {
            Self {
                writes: AtomicUsize::new(0),
                creates: AtomicUsize::new(0),
                shard_missing,
            }
        }
    }

    #[async_trait]
    impl ShardEngine for FailingEngine {
        async fn write_to_shard(&self, shard_id: Id, _points: &[Point]) -> Result<()> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            if self.shard_missing {
                Err(Error::ShardNotFound(shard_id))
            } else {
                Err(Error::Internal("disk on fire".to_string()))
            }
        }

        async fn create_shard(&self, _: &str, _: &str, _: Id, _: bool) -> Result<()> {
            self.creates.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_point_at_end_of_time_is_rejected() {
        let fixture = Fixture::new(Duration::ZERO, 1);
        let service = fixture.service(Arc::new(MemoryEngine::new()));

        let late = DateTime::<Utc>::MAX_UTC - chrono::Duration::hours(1);
        let err = service
            .write_points(&Context::background(), ORG, BUCKET, vec![point("a", late)])
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::Invalid);
        assert_eq!(fixture.group_count().await, 0);
    }

    #[tokio::test]
    async fn test_points_in_two_windows() {
        let fixture = Fixture::new(DAY * 2, 1);
        let engine = Arc::new(MemoryEngine::new());
        let service = fixture.service(engine.clone());

        let today = truncate(Utc::now(), DAY).unwrap();
        let yesterday_noon = today - chrono::Duration::hours(12);
        let points = vec![
            point("a", yesterday_noon),
            point("a", today + chrono::Duration::minutes(5)),
            point("b", yesterday_noon + chrono::Duration::hours(6)),
        ];

        let summary = service
            .write_points(&Context::background(), ORG, BUCKET, points)
            .await
            .unwrap();
        assert_eq!(
            summary,
            WriteSummary {
                written: 3,
                dropped: 0,
                shards: 2
            }
        );
        assert_eq!(fixture.group_count().await, 2);
        assert_eq!(engine.shard_count().await, 2);

        let groups = fixture
            .groups
            .find_shard_groups(&Context::background(), &ShardGroupFilter::new().bucket(BUCKET))
            .await
            .unwrap();
        for group in groups {
            let stored = engine.points(group.shards[0].id).await.unwrap();
            assert!(stored.iter().all(|p| group.covers(p.time)));
            let expected = if group.covers(yesterday_noon) { 2 } else { 1 };
            assert_eq!(stored.len(), expected);
            assert_eq!(
                engine.shard_owner(group.shards[0].id).await.unwrap(),
                ("metrics".to_string(), "autogen".to_string())
            );
        }
    }

    #[tokio::test]
    async fn test_existing_groups_are_reused() {
        let fixture = Fixture::new(DAY * 2, 1);
        let engine = Arc::new(MemoryEngine::new());
        let service = fixture.service(engine.clone());
        let now = Utc::now();

        for _ in 0..3 {
            service
                .write_points(&Context::background(), ORG, BUCKET, vec![point("a", now)])
                .await
                .unwrap();
        }
        assert_eq!(fixture.group_count().await, 1);
        assert_eq!(engine.shard_count().await, 1);
    }

    #[tokio::test]
    async fn test_out_of_retention_point_is_dropped() {
        let fixture = Fixture::new(DAY, 1);
        let engine = Arc::new(MemoryEngine::new());
        let service = fixture.service(engine.clone());

        let old = Utc::now() - chrono::Duration::hours(48);
        let summary = service
            .write_points(&Context::background(), ORG, BUCKET, vec![point("a", old)])
            .await
            .unwrap();

        assert_eq!(summary.dropped, 1);
        assert_eq!(summary.written, 0);
        assert_eq!(fixture.group_count().await, 0);
        assert_eq!(engine.shard_count().await, 0);
    }

    #[tokio::test]
    async fn test_missing_shard_is_created_and_retried() {
        let fixture = Fixture::new(DAY * 2, 1);
        let engine = Arc::new(MemoryEngine::new());
        let service = fixture.service(engine.clone());

        let summary = service
            .write_points(&Context::background(), ORG, BUCKET, vec![point("a", Utc::now())])
            .await
            .unwrap();
        assert_eq!(summary.written, 1);
        assert_eq!(engine.shard_count().await, 1);
    }

    #[tokio::test]
    async fn test_retry_happens_once() {
        let fixture = Fixture::new(DAY * 2, 1);
        let engine = Arc::new(FailingEngine::new(true));
        let service = fixture.service(engine.clone());

        let err = service
            .write_points(&Context::background(), ORG, BUCKET, vec![point("a", Utc::now())])
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ShardNotFound);
        assert_eq!(engine.writes.load(Ordering::SeqCst), 2);
        assert_eq!(engine.creates.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_other_engine_errors_surface() {
        let fixture = Fixture::new(DAY * 2, 4);
        let engine = Arc::new(FailingEngine::new(false));
        let service = fixture.service(engine.clone());
        let now = Utc::now();
        let points = (0..20).map(|i| point(&format!("host-{}", i), now)).collect();

        let err = service
            .write_points(&Context::background(), ORG, BUCKET, points)
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::Internal);
        assert_eq!(engine.creates.load(Ordering::SeqCst), 0);
        assert!(engine.writes.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn test_batches_keep_input_order() {
        let fixture = Fixture::new(DAY * 2, 4);
        let engine = Arc::new(MemoryEngine::new());
        let service = fixture.service(engine.clone());
        let start = Utc::now() - chrono::Duration::minutes(30);

        let points: Vec<_> = (0..40)
            .map(|i| point(&format!("host-{}", i % 8), start + chrono::Duration::seconds(i)))
            .collect();
        let summary = service
            .write_points(&Context::background(), ORG, BUCKET, points)
            .await
            .unwrap();
        assert_eq!(summary.written, 40);

        let groups = fixture
            .groups
            .find_shard_groups(&Context::background(), &ShardGroupFilter::new().bucket(BUCKET))
            .await
            .unwrap();
        let mut total = 0;
        for group in &groups {
            for shard in &group.shards {
                if let Some(points) = engine.points(shard.id).await {
                    assert!(points.windows(2).all(|w| w[0].time <= w[1].time));
                    assert!(points
                        .iter()
                        .all(|p| group.shard_for(p.hash_id()).unwrap().id == shard.id));
                    total += points.len();
                }
            }
        }
        assert_eq!(total, 40);
    }

    #[tokio::test]
    async fn test_wrong_org_is_not_found() {
        let fixture = Fixture::new(DAY * 2, 1);
        let service = fixture.service(Arc::new(MemoryEngine::new()));

        let err = service
            .write_points(&Context::background(), Id::new(0x9999), BUCKET, vec![])
            .await
            .unwrap_err();
        assert!(err.is_not_found());

        let err = service
            .write_points(&Context::background(), ORG, Id::new(0x9999), vec![])
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_cancelled_write() {
        let fixture = Fixture::new(DAY * 2, 1);
        let engine = Arc::new(MemoryEngine::new());
        let service = fixture.service(engine.clone());
        let ctx = Context::background();
        ctx.cancel();

        let err = service
            .write_points(&ctx, ORG, BUCKET, vec![point("a", Utc::now())])
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::Cancelled);
        assert_eq!(engine.shard_count().await, 0);
    }

    #[test]
    fn test_retention_cutoff() {
        let now = Utc::now();
        let bucket = Bucket::new(BUCKET, ORG, "metrics");
        assert_eq!(retention_cutoff(&bucket, now), None);

        let bucket = bucket.retention(DAY);
        assert_eq!(
            retention_cutoff(&bucket, now),
            Some(now - chrono::Duration::days(1))
        );
    }
}
