//! Write path
//!
//! ```text
//! points ─▶ retention cutoff ─▶ ShardGroupList (ensure on miss)
//!        ─▶ shard = hash(series) mod shards ─▶ one task per shard batch
//!        ─▶ ShardEngine::write_to_shard (create + retry once on ShardNotFound)
//! ```

mod list;
mod service;

pub use list::ShardGroupList;
pub use service::{WriteService, WriteSummary};
