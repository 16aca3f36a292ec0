//! Shard-group service
//!
//! Finds or creates the group that owns a point in time. Creation is
//! serialized per bucket so concurrent writers for the same window share a
//! single group; the store's overlap check covers writers in other
//! processes.

use super::store::ShardGroupStore;
use super::types::{
    out_of_range, truncate, RetentionPolicyInfo, Shard, ShardGroup, ShardGroupFilter,
};
use super::ShardGroupService;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::id::{next_id, Id, IdGenerator};
use crate::tenant::BucketService;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub struct ShardGroupManager {
    store: Arc<ShardGroupStore>,
    buckets: Arc<dyn BucketService>,
    id_generator: Arc<dyn IdGenerator>,
    shards_per_group: usize,
    creation_locks: Mutex<HashMap<Id, Arc<tokio::sync::Mutex<()>>>>,
}

impl ShardGroupManager {
    pub fn new(
        store: Arc<ShardGroupStore>,
        buckets: Arc<dyn BucketService>,
        id_generator: Arc<dyn IdGenerator>,
    ) -> Self {
        Self {
            store,
            buckets,
            id_generator,
            shards_per_group: 1,
            creation_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Builder: number of shards created with each new group
    pub fn shards_per_group(mut self, n: usize) -> Self {
        self.shards_per_group = n.max(1);
        self
    }

    pub fn store(&self) -> &ShardGroupStore {
        &self.store
    }

    fn creation_lock(&self, bucket_id: Id) -> Result<Arc<tokio::sync::Mutex<()>>> {
        let mut locks = self
            .creation_locks
            .lock()
            .map_err(|e| Error::Internal(format!("creation lock table poisoned: {}", e)))?;
        Ok(Arc::clone(locks.entry(bucket_id).or_default()))
    }

    /// Drop the bucket's lock once no caller holds or waits on it
    fn release_creation_lock(&self, bucket_id: Id) {
        if let Ok(mut locks) = self.creation_locks.lock() {
            if locks
                .get(&bucket_id)
                .is_some_and(|lock| Arc::strong_count(lock) == 1)
            {
                locks.remove(&bucket_id);
            }
        }
    }

    /// First group of `bucket_id` covering `t`, in scan order
    fn find_covering(
        &self,
        ctx: &Context,
        bucket_id: Id,
        t: DateTime<Utc>,
    ) -> Result<Option<ShardGroup>> {
        let filter = ShardGroupFilter::new().bucket(bucket_id).min(t).max(t);
        Ok(self
            .store
            .list(ctx, &filter)?
            .into_iter()
            .find(|g| g.covers(t)))
    }

    /// Interval for a new group holding `t`, clipped to its neighbours
    fn boundaries(
        &self,
        ctx: &Context,
        bucket_id: Id,
        t: DateTime<Utc>,
        duration: Duration,
    ) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
        let length = chrono::Duration::from_std(duration)
            .map_err(|e| Error::Invalid(format!("shard group duration: {}", e)))?;
        let mut start = truncate(t, duration)?;
        let mut end = start
            .checked_add_signed(length)
            .ok_or_else(|| out_of_range(t))?;

        let filter = ShardGroupFilter::new().bucket(bucket_id).min(start).max(end);
        for neighbour in self.store.list(ctx, &filter)? {
            if neighbour.end_time <= t {
                start = start.max(neighbour.end_time);
            } else if neighbour.start_time > t {
                end = end.min(neighbour.start_time);
            }
        }

        Ok((start, end))
    }

    fn new_group(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<ShardGroup> {
        let id = next_id(self.id_generator.as_ref())?;
        let shards = (0..self.shards_per_group)
            .map(|_| next_id(self.id_generator.as_ref()).map(Shard::new))
            .collect::<Result<Vec<_>>>()?;
        ShardGroup::new(id, start, end, shards)
    }

    /// Create the group covering `timestamp` while holding the bucket's lock
    async fn create_covering(
        &self,
        ctx: &Context,
        bucket_id: Id,
        timestamp: DateTime<Utc>,
        lock: Arc<tokio::sync::Mutex<()>>,
    ) -> Result<ShardGroup> {
        let _guard = ctx.run(async move { Ok(lock.lock_owned().await) }).await?;

        // Someone may have created it while we waited.
        if let Some(group) = self.find_covering(ctx, bucket_id, timestamp)? {
            return Ok(group);
        }

        let rp = self.retention_policy(ctx, bucket_id).await?;
        let (start, end) = self.boundaries(ctx, bucket_id, timestamp, rp.shard_group_duration)?;
        let group = self.new_group(start, end)?;

        match self.store.create(ctx, bucket_id, &group) {
            Ok(()) => {
                tracing::info!(
                    bucket_id = %bucket_id,
                    shard_group_id = %group.id,
                    shards = group.shards.len(),
                    "Created shard group [{}, {})",
                    group.start_time,
                    group.end_time
                );
                Ok(group)
            }
            Err(e) if e.is_conflict() => {
                tracing::debug!("Shard group creation for bucket {} lost a race: {}", bucket_id, e);
                self.find_covering(ctx, bucket_id, timestamp)?.ok_or(e)
            }
            Err(e) => Err(e),
        }
    }

    pub async fn retention_policy(&self, ctx: &Context, bucket_id: Id) -> Result<RetentionPolicyInfo> {
        let bucket = self.buckets.find_bucket_by_id(ctx, bucket_id).await?;
        Ok(RetentionPolicyInfo::from_bucket(&bucket))
    }

    pub async fn find_shard_group(&self, ctx: &Context, id: Id) -> Result<ShardGroup> {
        self.store.find_by_id(ctx, id)
    }

    /// Groups of `bucket_id` intersecting `[min, max]`, oldest first
    pub async fn shard_groups_by_time_range(
        &self,
        ctx: &Context,
        bucket_id: Id,
        min: DateTime<Utc>,
        max: DateTime<Utc>,
    ) -> Result<Vec<ShardGroup>> {
        let filter = ShardGroupFilter::new().bucket(bucket_id).min(min).max(max);
        let mut groups = self.store.list(ctx, &filter)?;
        groups.sort_by_key(|g| g.start_time);
        Ok(groups)
    }
}

#[async_trait]
impl ShardGroupService for ShardGroupManager {
    async fn ensure_shard_group(
        &self,
        ctx: &Context,
        bucket_id: Id,
        timestamp: DateTime<Utc>,
    ) -> Result<ShardGroup> {
        if let Some(group) = self.find_covering(ctx, bucket_id, timestamp)? {
            return Ok(group);
        }

        let lock = self.creation_lock(bucket_id)?;
        let res = self.create_covering(ctx, bucket_id, timestamp, lock).await;
        self.release_creation_lock(bucket_id);
        res
    }

    async fn find_shard_groups(
        &self,
        ctx: &Context,
        filter: &ShardGroupFilter,
    ) -> Result<Vec<ShardGroup>> {
        self.store.list(ctx, filter)
    }

    async fn delete_shard_group(&self, ctx: &Context, bucket_id: Id, id: Id) -> Result<()> {
        self.store.delete(ctx, bucket_id, id)?;
        tracing::info!(bucket_id = %bucket_id, shard_group_id = %id, "Deleted shard group");
        Ok(())
    }
}
