//! Shard groups
//!
//! Every bucket's timeline is cut into non-overlapping, half-open shard
//! groups. Each group holds one or more shards; a point goes to the group
//! covering its timestamp and to the shard picked by its series hash.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────┐   ensure / find / delete   ┌──────────────────┐
//! │ ShardGroupManager  │ ─────────────────────────▶ │ ShardGroupStore  │
//! │ (per-bucket locks, │                            │ shardgroupsv1 +  │
//! │  boundary clipping)│                            │ shardgroupindexv1│
//! └─────────┬──────────┘                            └────────┬─────────┘
//!           │ find_bucket_by_id                              │ view / update
//!           ▼                                                ▼
//!     BucketService                                       KvStore
//! ```

mod service;
mod store;
mod types;

pub use service::ShardGroupManager;
pub use store::{ShardGroupStore, SHARD_GROUP_BUCKET, SHARD_GROUP_INDEX};
pub use types::{
    shard_group_duration, truncate, RetentionPolicyInfo, Shard, ShardGroup, ShardGroupFilter,
};

use crate::context::Context;
use crate::error::Result;
use crate::id::Id;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Shard-group operations used by the write path
#[async_trait]
pub trait ShardGroupService: Send + Sync {
    /// Group of `bucket_id` covering `timestamp`, created if absent
    async fn ensure_shard_group(
        &self,
        ctx: &Context,
        bucket_id: Id,
        timestamp: DateTime<Utc>,
    ) -> Result<ShardGroup>;

    async fn find_shard_groups(
        &self,
        ctx: &Context,
        filter: &ShardGroupFilter,
    ) -> Result<Vec<ShardGroup>>;

    /// Remove a group and its index entry; NotFound if `bucket_id` does not own it
    async fn delete_shard_group(&self, ctx: &Context, bucket_id: Id, id: Id) -> Result<()>;
}
