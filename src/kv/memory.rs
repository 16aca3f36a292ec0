//! In-memory copy-on-write backend
//!
//! Each read-write transaction works on a private copy of the data and
//! swaps it in on success, so a failed closure leaves no trace.
//!
//! Read transactions also work on a full copy of the data. Use it for tests
//! and benchmarks; [`super::SqliteKv`] is the backend for real catalogs.

use super::{Bucket, CursorConfig, CursorOption, ForwardCursor, KvStore, Tx, TxFn};
use crate::context::Context;
use crate::error::{Error, Result};
use std::collections::{BTreeMap, VecDeque};
use std::sync::RwLock;

type Entries = BTreeMap<Vec<u8>, Vec<u8>>;
type Buckets = BTreeMap<Vec<u8>, Entries>;

#[derive(Debug, Default)]
pub struct MemoryKv {
    data: RwLock<Buckets>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvStore for MemoryKv {
    fn view(&self, ctx: &Context, f: &mut TxFn<'_>) -> Result<()> {
        ctx.err()?;
        let mut snapshot = self
            .data
            .read()
            .map_err(|e| Error::Internal(format!("kv lock poisoned: {}", e)))?
            .clone();

        let mut tx = MemoryTx {
            data: &mut snapshot,
            writable: false,
        };
        f(&mut tx)
    }

    fn update(&self, ctx: &Context, f: &mut TxFn<'_>) -> Result<()> {
        ctx.err()?;
        let mut guard = self
            .data
            .write()
            .map_err(|e| Error::Internal(format!("kv lock poisoned: {}", e)))?;

        let mut working = guard.clone();
        {
            let mut tx = MemoryTx {
                data: &mut working,
                writable: true,
            };
            f(&mut tx)?;
        }

        ctx.err()?;
        *guard = working;
        Ok(())
    }
}

struct MemoryTx<'a> {
    data: &'a mut Buckets,
    writable: bool,
}

impl Tx for MemoryTx<'_> {
    fn bucket(&mut self, name: &[u8]) -> Result<Box<dyn Bucket + '_>> {
        let writable = self.writable;
        let entries = self.data.get_mut(name).ok_or_else(|| {
            Error::Kv(format!(
                "bucket {} does not exist",
                String::from_utf8_lossy(name)
            ))
        })?;
        Ok(Box::new(MemoryBucket { entries, writable }))
    }

    fn create_bucket_if_not_exists(&mut self, name: &[u8]) -> Result<()> {
        if !self.writable {
            return Err(Error::Kv("transaction is read-only".to_string()));
        }
        self.data.entry(name.to_vec()).or_default();
        Ok(())
    }

    fn writable(&self) -> bool {
        self.writable
    }
}

struct MemoryBucket<'a> {
    entries: &'a mut Entries,
    writable: bool,
}

impl MemoryBucket<'_> {
    fn check_writable(&self) -> Result<()> {
        if self.writable {
            Ok(())
        } else {
            Err(Error::Kv("transaction is read-only".to_string()))
        }
    }
}

impl Bucket for MemoryBucket<'_> {
    fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        self.entries
            .get(key)
            .cloned()
            .ok_or_else(|| Error::not_found("key", String::from_utf8_lossy(key)))
    }

    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.check_writable()?;
        self.entries.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&mut self, key: &[u8]) -> Result<()> {
        self.check_writable()?;
        self.entries.remove(key);
        Ok(())
    }

    fn forward_cursor(
        &self,
        seek: &[u8],
        opts: &[CursorOption],
    ) -> Result<Box<dyn ForwardCursor + '_>> {
        let config = CursorConfig::new(opts);
        let start = config.start(seek).to_vec();

        let entries: VecDeque<_> = self
            .entries
            .range(start..)
            .take_while(|(k, _)| config.admits(k))
            .take(config.limit.unwrap_or(usize::MAX))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        Ok(Box::new(SnapshotCursor { entries }))
    }
}

/// Cursor over entries copied out of the bucket when it was opened
struct SnapshotCursor {
    entries: VecDeque<(Vec<u8>, Vec<u8>)>,
}

impl ForwardCursor for SnapshotCursor {
    fn next(&mut self) -> Option<(Vec<u8>, Vec<u8>)> {
        self.entries.pop_front()
    }

    fn err(&mut self) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) {
        self.entries.clear();
    }
}
