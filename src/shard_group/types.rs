//! Shard-group data model
//!
//! - `ShardGroup`: a half-open time interval of one bucket and its shards
//! - `ShardGroupFilter`: predicate used by catalog scans
//! - `RetentionPolicyInfo`: partitioning parameters derived from a bucket

use crate::error::{Error, Result};
use crate::id::Id;
use crate::tenant::Bucket;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const HOUR: Duration = Duration::from_secs(3600);
const DAY: Duration = Duration::from_secs(24 * 3600);

/// Seconds between 0001-01-01T00:00:00Z and the Unix epoch
const ZERO_TIME_TO_UNIX_SECS: i128 = 62_135_596_800;

/// Shard-group length for a bucket retention period
///
/// Zero (infinite) or at least 180 days gives weekly groups, at least two
/// days gives daily groups, anything shorter hourly groups.
pub fn shard_group_duration(retention: Duration) -> Duration {
    if retention.is_zero() || retention >= DAY * 180 {
        DAY * 7
    } else if retention >= DAY * 2 {
        DAY
    } else {
        HOUR
    }
}

/// Round `t` down to a multiple of `unit` counted from 0001-01-01 UTC
///
/// Weekly boundaries therefore fall on Mondays. Fails with Invalid when the
/// boundary falls before the earliest representable time.
pub fn truncate(t: DateTime<Utc>, unit: Duration) -> Result<DateTime<Utc>> {
    let unit_nanos = unit.as_nanos() as i128;
    if unit_nanos <= 0 {
        return Ok(t);
    }

    let since_zero = (i128::from(t.timestamp()) + ZERO_TIME_TO_UNIX_SECS) * 1_000_000_000
        + i128::from(t.timestamp_subsec_nanos());
    let excess = i64::try_from(since_zero.rem_euclid(unit_nanos))
        .map_err(|_| Error::Invalid(format!("truncation unit {:?} is too large", unit)))?;

    t.checked_sub_signed(chrono::Duration::nanoseconds(excess))
        .ok_or_else(|| out_of_range(t))
}

pub(crate) fn out_of_range(t: DateTime<Utc>) -> Error {
    Error::Invalid(format!("time {} is outside the partitionable range", t))
}

/// Physical write target inside a shard group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shard {
    pub id: Id,
}

impl Shard {
    pub fn new(id: Id) -> Self {
        Self { id }
    }
}

/// Time partition of a bucket covering `[start_time, end_time)`
///
/// The owning bucket is not part of the record; the catalog index tracks it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardGroup {
    pub id: Id,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    #[serde(default)]
    pub shards: Vec<Shard>,
}

impl ShardGroup {
    pub fn new(
        id: Id,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        shards: Vec<Shard>,
    ) -> Result<Self> {
        let group = Self {
            id,
            start_time,
            end_time,
            shards,
        };
        group.validate()?;
        Ok(group)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.id.is_valid() {
            return Err(Error::Invalid("shard group id must not be zero".to_string()));
        }
        if self.start_time >= self.end_time {
            return Err(Error::Invalid(format!(
                "shard group {} starts at {} which is not before its end {}",
                self.id, self.start_time, self.end_time
            )));
        }
        Ok(())
    }

    /// `start_time <= t < end_time`
    pub fn covers(&self, t: DateTime<Utc>) -> bool {
        self.start_time <= t && t < self.end_time
    }

    /// Whether `[start, end)` shares any instant with this group
    pub fn overlaps(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        self.start_time < end && start < self.end_time
    }

    pub fn duration(&self) -> chrono::Duration {
        self.end_time - self.start_time
    }

    /// Shard owning a series with hash `hash`
    pub fn shard_for(&self, hash: u64) -> Option<&Shard> {
        if self.shards.is_empty() {
            return None;
        }
        self.shards.get((hash % self.shards.len() as u64) as usize)
    }
}

/// Catalog scan predicate; unset fields match everything
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShardGroupFilter {
    /// Restrict to groups indexed under this bucket
    pub bucket_id: Option<Id>,
    /// Groups ending after this instant
    pub min: Option<DateTime<Utc>>,
    /// Groups starting at or before this instant
    pub max: Option<DateTime<Utc>>,
    /// Groups with `start < t < end`
    pub between_time: Option<DateTime<Utc>>,
}

impl ShardGroupFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bucket(mut self, id: Id) -> Self {
        self.bucket_id = Some(id);
        self
    }

    pub fn min(mut self, t: DateTime<Utc>) -> Self {
        self.min = Some(t);
        self
    }

    pub fn max(mut self, t: DateTime<Utc>) -> Self {
        self.max = Some(t);
        self
    }

    pub fn between(mut self, t: DateTime<Utc>) -> Self {
        self.between_time = Some(t);
        self
    }

    /// Time predicate; `bucket_id` is applied by the scan itself
    pub fn matches(&self, group: &ShardGroup) -> bool {
        if let Some(min) = self.min {
            if group.end_time <= min {
                return false;
            }
        }

        if let Some(max) = self.max {
            if group.start_time > max {
                return false;
            }
        }

        if let Some(t) = self.between_time {
            if !(group.start_time < t && group.end_time > t) {
                return false;
            }
        }

        true
    }
}

/// Partitioning parameters of a bucket
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetentionPolicyInfo {
    pub name: String,
    /// Zero means infinite
    pub duration: Duration,
    pub shard_group_duration: Duration,
}

impl RetentionPolicyInfo {
    pub fn from_bucket(bucket: &Bucket) -> Self {
        Self {
            name: bucket.retention_policy_name.clone(),
            duration: bucket.retention_period,
            shard_group_duration: shard_group_duration(bucket.retention_period),
        }
    }
}
