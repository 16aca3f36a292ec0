//! In-memory shard engine

use super::ShardEngine;
use crate::error::{Error, Result};
use crate::id::Id;
use crate::point::Point;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Debug)]
struct MemoryShard {
    bucket: String,
    retention_policy: String,
    enabled: bool,
    points: Vec<Point>,
}

/// Shards held in a map; used by tests and dry runs
#[derive(Debug, Default)]
pub struct MemoryEngine {
    shards: RwLock<HashMap<Id, MemoryShard>>,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Points written to `shard_id`, in write order
    pub async fn points(&self, shard_id: Id) -> Option<Vec<Point>> {
        let shards = self.shards.read().await;
        shards.get(&shard_id).map(|s| s.points.clone())
    }

    pub async fn has_shard(&self, shard_id: Id) -> bool {
        self.shards.read().await.contains_key(&shard_id)
    }

    pub async fn shard_count(&self) -> usize {
        self.shards.read().await.len()
    }

    /// `(bucket, retention policy)` a shard was created under
    pub async fn shard_owner(&self, shard_id: Id) -> Option<(String, String)> {
        let shards = self.shards.read().await;
        shards
            .get(&shard_id)
            .map(|s| (s.bucket.clone(), s.retention_policy.clone()))
    }
}

#[async_trait]
impl ShardEngine for MemoryEngine {
    async fn write_to_shard(&self, shard_id: Id, points: &[Point]) -> Result<()> {
        let mut shards = self.shards.write().await;
        let shard = shards
            .get_mut(&shard_id)
            .ok_or(Error::ShardNotFound(shard_id))?;
        if !shard.enabled {
            return Err(Error::Invalid(format!("shard {} is disabled", shard_id)));
        }
        shard.points.extend_from_slice(points);
        Ok(())
    }

    async fn create_shard(
        &self,
        bucket: &str,
        retention_policy: &str,
        shard_id: Id,
        enabled: bool,
    ) -> Result<()> {
        let mut shards = self.shards.write().await;
        shards.entry(shard_id).or_insert_with(|| MemoryShard {
            bucket: bucket.to_string(),
            retention_policy: retention_policy.to_string(),
            enabled,
            points: Vec::new(),
        });
        Ok(())
    }
}
