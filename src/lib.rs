//! # Shardline
//!
//! Shard-group catalog and write fan-out for a multi-tenant time-series
//! store.
//!
//! ## Features
//!
//! - **Time partitioning**: each bucket's timeline is cut into half-open
//!   shard groups whose length follows the bucket's retention
//! - **Durable catalog**: groups and a bucket index in one transactional
//!   key-value store (SQLite, or in-memory for tests)
//! - **Fan-out writes**: one task per shard, shards created on first write
//! - **Duplicate avoidance**: per-bucket find-or-create plus an overlap check
//!   inside the catalog transaction
//!
//! ## Modules
//!
//! - [`kv`]: transactional key-value facade, secondary index, backends
//! - [`shard_group`]: shard-group model, catalog store and service
//! - [`write`]: point routing and per-shard fan-out
//! - [`engine`]: storage engine contract and implementations
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use shardline::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let ctx = Context::background();
//!
//!     let kv = Arc::new(SqliteKv::open_dir("/tmp/shardline/meta")?);
//!     let store = Arc::new(ShardGroupStore::open(&ctx, kv)?);
//!     let buckets = Arc::new(InMemoryBucketService::with_buckets([
//!         Bucket::new(Id::new(0x2000), Id::new(0x1000), "telemetry")
//!             .retention(std::time::Duration::from_secs(72 * 3600)),
//!     ]));
//!     let groups = Arc::new(ShardGroupManager::new(
//!         store,
//!         buckets.clone(),
//!         Arc::new(SnowflakeGenerator::default()),
//!     ));
//!     let engine = Arc::new(FileEngine::open("/tmp/shardline/shards")?);
//!
//!     let writer = WriteService::new(buckets, groups, engine);
//!     let point = Point::new("cpu", chrono::Utc::now())
//!         .tag("host", "a")
//!         .field("usage", 0.42);
//!     let summary = writer
//!         .write_points(&ctx, Id::new(0x1000), Id::new(0x2000), vec![point])
//!         .await?;
//!
//!     println!("wrote {} points to {} shards", summary.written, summary.shards);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod id;
pub mod kv;
pub mod point;
pub mod shard_group;
pub mod tenant;
pub mod write;

// Re-export top-level types for convenience
pub use config::{BucketConfig, Config, ConfigError, LoggingConfig};
pub use context::Context;
pub use engine::{FileEngine, MemoryEngine, ShardEngine};
pub use error::{Error, ErrorCode};
pub use id::{Id, IdGenerator, SnowflakeGenerator};
pub use kv::{KvStore, MemoryKv, SqliteKv};
pub use point::{FieldValue, Point};
pub use shard_group::{
    RetentionPolicyInfo, Shard, ShardGroup, ShardGroupFilter, ShardGroupManager,
    ShardGroupService, ShardGroupStore,
};
pub use tenant::{Bucket, BucketService, InMemoryBucketService};
pub use write::{WriteService, WriteSummary};
