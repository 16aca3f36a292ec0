//! Durable shard-group catalog
//!
//! Records live in `shardgroupsv1` keyed by encoded group id; the
//! `shardgroupindexv1` index maps a bucket id to its groups. Both are
//! written in one transaction so neither half is ever visible alone.

use super::types::{Shard, ShardGroup, ShardGroupFilter};
use crate::context::Context;
use crate::error::{Error, Result};
use crate::id::Id;
use crate::kv::{Index, IndexReport, KvStore, Tx};
use std::sync::Arc;

pub const SHARD_GROUP_BUCKET: &[u8] = b"shardgroupsv1";

/// Lookup of shard groups by bucket id
pub const SHARD_GROUP_INDEX: Index = Index::new(b"shardgroupindexv1", SHARD_GROUP_BUCKET);

fn decode(bytes: &[u8]) -> Result<ShardGroup> {
    serde_json::from_slice(bytes).map_err(|e| Error::Codec(format!("shard group record: {}", e)))
}

pub struct ShardGroupStore {
    kv: Arc<dyn KvStore>,
    index: Index,
}

impl ShardGroupStore {
    /// Wrap `kv`, creating the catalog buckets if needed
    pub fn open(ctx: &Context, kv: Arc<dyn KvStore>) -> Result<Self> {
        let index = SHARD_GROUP_INDEX;
        kv.update(ctx, &mut |tx: &mut dyn Tx| {
            tx.create_bucket_if_not_exists(SHARD_GROUP_BUCKET)?;
            index.initialize(tx)
        })?;
        Ok(Self { kv, index })
    }

    /// Persist `group` as belonging to `bucket_id`
    ///
    /// Fails with Conflict if the id is taken or the interval overlaps another
    /// group of the same bucket.
    pub fn create(&self, ctx: &Context, bucket_id: Id, group: &ShardGroup) -> Result<()> {
        group.validate()?;
        let key = group.id.encode()?;
        let foreign = bucket_id.encode()?;
        let value = serde_json::to_vec(group)?;

        self.kv.update(ctx, &mut |tx: &mut dyn Tx| {
            match tx.bucket(SHARD_GROUP_BUCKET)?.get(&key) {
                Ok(_) => {
                    return Err(Error::Conflict(format!(
                        "shard group ID {} already exists",
                        group.id
                    )))
                }
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }

            let mut overlapping = None;
            self.index.walk(ctx, tx, &foreign, &mut |_, v| {
                let existing = decode(v)?;
                if existing.overlaps(group.start_time, group.end_time) {
                    overlapping = Some(existing.id);
                }
                Ok(())
            })?;
            if let Some(other) = overlapping {
                return Err(Error::Conflict(format!(
                    "shard group {} overlaps shard group {} of bucket {}",
                    group.id, other, bucket_id
                )));
            }

            tx.bucket(SHARD_GROUP_BUCKET)?.put(&key, &value)?;
            self.index.insert(tx, &foreign, &key)
        })
    }

    pub fn find_by_id(&self, ctx: &Context, id: Id) -> Result<ShardGroup> {
        let key = id.encode()?;
        let mut found = None;

        self.kv.view(ctx, &mut |tx: &mut dyn Tx| {
            let bytes = tx.bucket(SHARD_GROUP_BUCKET)?.get(&key).map_err(|e| {
                if e.is_not_found() {
                    Error::not_found("shard group", id)
                } else {
                    e
                }
            })?;
            found = Some(decode(&bytes)?);
            Ok(())
        })?;

        found.ok_or_else(|| Error::not_found("shard group", id))
    }

    /// Groups matching `filter`, in key order of the scan (not time order)
    pub fn list(&self, ctx: &Context, filter: &ShardGroupFilter) -> Result<Vec<ShardGroup>> {
        let foreign = filter.bucket_id.map(Id::encode).transpose()?;
        let mut groups = Vec::new();

        self.kv.view(ctx, &mut |tx: &mut dyn Tx| {
            groups.clear();

            if let Some(foreign) = &foreign {
                return self.index.walk(ctx, tx, foreign, &mut |_, v| {
                    let group = decode(v)?;
                    if filter.matches(&group) {
                        groups.push(group);
                    }
                    Ok(())
                });
            }

            let bucket = tx.bucket(SHARD_GROUP_BUCKET)?;
            let mut cursor = bucket.forward_cursor(&[], &[])?;
            while let Some((_, v)) = cursor.next() {
                ctx.err()?;
                let group = decode(&v)?;
                if filter.matches(&group) {
                    groups.push(group);
                }
            }
            cursor.err()
        })?;

        Ok(groups)
    }

    /// Remove group `id` of bucket `bucket_id` together with its index entry
    pub fn delete(&self, ctx: &Context, bucket_id: Id, id: Id) -> Result<()> {
        let key = id.encode()?;
        let foreign = bucket_id.encode()?;

        self.kv.update(ctx, &mut |tx: &mut dyn Tx| {
            if !self.index.contains(tx, &foreign, &key)? {
                return Err(Error::not_found(
                    "shard group",
                    format!("{} in bucket {}", id, bucket_id),
                ));
            }
            self.index.delete(tx, &foreign, &key)?;
            tx.bucket(SHARD_GROUP_BUCKET)?.delete(&key)
        })
    }

    /// Append `shard` to group `id`
    pub fn add_shard(&self, ctx: &Context, id: Id, shard: Shard) -> Result<ShardGroup> {
        let key = id.encode()?;
        let mut updated = None;

        self.kv.update(ctx, &mut |tx: &mut dyn Tx| {
            let mut bucket = tx.bucket(SHARD_GROUP_BUCKET)?;
            let bytes = bucket.get(&key).map_err(|e| {
                if e.is_not_found() {
                    Error::not_found("shard group", id)
                } else {
                    e
                }
            })?;

            let mut group = decode(&bytes)?;
            if group.shards.iter().any(|s| s.id == shard.id) {
                return Err(Error::Conflict(format!(
                    "shard {} already belongs to shard group {}",
                    shard.id, id
                )));
            }
            group.shards.push(shard.clone());

            bucket.put(&key, &serde_json::to_vec(&group)?)?;
            updated = Some(group);
            Ok(())
        })?;

        updated.ok_or_else(|| Error::Internal("shard group update produced no record".to_string()))
    }

    /// Cross-check records against the bucket index
    pub fn verify_index(&self, ctx: &Context) -> Result<IndexReport> {
        let mut report = IndexReport::default();
        self.kv.view(ctx, &mut |tx: &mut dyn Tx| {
            report = self.index.verify(ctx, tx)?;
            Ok(())
        })?;
        Ok(report)
    }
}
