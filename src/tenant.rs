//! Buckets and bucket lookup
//!
//! Buckets are owned by the tenant service; this crate only reads them to
//! learn where a write goes and how long its data is kept.

use crate::context::Context;
use crate::error::{Error, Result};
use crate::id::Id;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

/// Retention policy name used when none is configured
pub const DEFAULT_RETENTION_POLICY: &str = "autogen";

/// A tenant-scoped retention container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bucket {
    pub id: Id,
    pub org_id: Id,
    pub name: String,
    /// Zero means data is kept forever
    pub retention_period: Duration,
    pub retention_policy_name: String,
}

impl Bucket {
    pub fn new(id: Id, org_id: Id, name: impl Into<String>) -> Self {
        Self {
            id,
            org_id,
            name: name.into(),
            retention_period: Duration::ZERO,
            retention_policy_name: DEFAULT_RETENTION_POLICY.to_string(),
        }
    }

    /// Builder: set retention period
    pub fn retention(mut self, period: Duration) -> Self {
        self.retention_period = period;
        self
    }

    /// Builder: set retention policy name
    pub fn retention_policy(mut self, name: impl Into<String>) -> Self {
        self.retention_policy_name = name.into();
        self
    }

    pub fn has_infinite_retention(&self) -> bool {
        self.retention_period.is_zero()
    }
}

/// Read access to buckets
#[async_trait]
pub trait BucketService: Send + Sync {
    /// Bucket with `id`, or NotFound
    async fn find_bucket_by_id(&self, ctx: &Context, id: Id) -> Result<Bucket>;
}

/// Bucket directory held in memory, filled from configuration or tests
#[derive(Debug, Default)]
pub struct InMemoryBucketService {
    buckets: RwLock<HashMap<Id, Bucket>>,
}

impl InMemoryBucketService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_buckets(buckets: impl IntoIterator<Item = Bucket>) -> Self {
        Self {
            buckets: RwLock::new(buckets.into_iter().map(|b| (b.id, b)).collect()),
        }
    }

    /// Add or replace a bucket
    pub fn insert(&self, bucket: Bucket) -> Result<()> {
        let mut buckets = self
            .buckets
            .write()
            .map_err(|e| Error::Internal(format!("bucket lock poisoned: {}", e)))?;
        buckets.insert(bucket.id, bucket);
        Ok(())
    }

    pub fn remove(&self, id: Id) -> Result<Option<Bucket>> {
        let mut buckets = self
            .buckets
            .write()
            .map_err(|e| Error::Internal(format!("bucket lock poisoned: {}", e)))?;
        Ok(buckets.remove(&id))
    }
}

#[async_trait]
impl BucketService for InMemoryBucketService {
    async fn find_bucket_by_id(&self, ctx: &Context, id: Id) -> Result<Bucket> {
        ctx.err()?;
        let buckets = self
            .buckets
            .read()
            .map_err(|e| Error::Internal(format!("bucket lock poisoned: {}", e)))?;
        buckets
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::not_found("bucket", id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_find_bucket() {
        let bucket = Bucket::new(Id::new(2000), Id::new(1000), "telemetry")
            .retention(Duration::from_secs(3600));
        let service = InMemoryBucketService::with_buckets([bucket.clone()]);
        let ctx = Context::background();

        assert_eq!(
            service.find_bucket_by_id(&ctx, Id::new(2000)).await.unwrap(),
            bucket
        );
        let err = service
            .find_bucket_by_id(&ctx, Id::new(2001))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_with_buckets_keeps_last_duplicate() {
        let service = InMemoryBucketService::with_buckets([
            Bucket::new(Id::new(2000), Id::new(1000), "old"),
            Bucket::new(Id::new(2000), Id::new(1000), "new"),
            Bucket::new(Id::new(2001), Id::new(1000), "other"),
        ]);
        let ctx = Context::background();

        let bucket = service.find_bucket_by_id(&ctx, Id::new(2000)).await.unwrap();
        assert_eq!(bucket.name, "new");
        assert!(service.find_bucket_by_id(&ctx, Id::new(2001)).await.is_ok());
    }

    #[test]
    fn test_bucket_defaults() {
        let bucket = Bucket::new(Id::new(2000), Id::new(1000), "telemetry");
        assert!(bucket.has_infinite_retention());
        assert_eq!(bucket.retention_policy_name, DEFAULT_RETENTION_POLICY);
    }

    #[tokio::test]
    async fn test_remove_bucket() {
        let service =
            InMemoryBucketService::with_buckets([Bucket::new(Id::new(2000), Id::new(1000), "a")]);
        assert!(service.remove(Id::new(2000)).unwrap().is_some());
        assert!(service
            .find_bucket_by_id(&Context::background(), Id::new(2000))
            .await
            .is_err());
    }
}
