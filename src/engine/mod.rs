//! Partitioned storage engine contract
//!
//! The write path hands each shard its batch of points through
//! [`ShardEngine`]. Physical shards are created lazily: a write to a shard
//! the engine has never seen fails with `ShardNotFound`, and the caller
//! creates the shard and tries again.

mod file;
mod memory;

pub use file::FileEngine;
pub use memory::MemoryEngine;

use crate::error::Result;
use crate::id::Id;
use crate::point::Point;
use async_trait::async_trait;

#[async_trait]
pub trait ShardEngine: Send + Sync {
    /// Append `points` to shard `shard_id`
    ///
    /// Returns `Error::ShardNotFound` when the shard does not exist.
    async fn write_to_shard(&self, shard_id: Id, points: &[Point]) -> Result<()>;

    /// Create shard `shard_id` under `bucket` / `retention_policy`
    ///
    /// Creating a shard that already exists is not an error.
    async fn create_shard(
        &self,
        bucket: &str,
        retention_policy: &str,
        shard_id: Id,
        enabled: bool,
    ) -> Result<()>;
}
