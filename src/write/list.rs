use crate::shard_group::ShardGroup;
use chrono::{DateTime, Utc};

/// Shard groups touched by one write, ordered by end time
#[derive(Debug, Default)]
pub struct ShardGroupList {
    groups: Vec<ShardGroup>,
}

impl ShardGroupList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Insert keeping ascending end-time order
    pub fn insert(&mut self, group: ShardGroup) -> &ShardGroup {
        let at = self
            .groups
            .partition_point(|g| g.end_time <= group.end_time);
        self.groups.insert(at, group);
        &self.groups[at]
    }

    /// Group covering `t`: first group ending after `t`, if it starts at or before `t`
    pub fn shard_group_at(&self, t: DateTime<Utc>) -> Option<&ShardGroup> {
        let at = self.groups.partition_point(|g| g.end_time <= t);
        self.groups.get(at).filter(|g| g.start_time <= t)
    }

    pub fn covers(&self, t: DateTime<Utc>) -> bool {
        self.shard_group_at(t).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ShardGroup> {
        self.groups.iter()
    }
}
