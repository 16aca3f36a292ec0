//! Secondary index over a source bucket
//!
//! Entries live in their own bucket under `foreign ∥ '/' ∥ primary` with the
//! primary key as value, so all records belonging to one foreign key form a
//! contiguous prefix range. Callers insert and delete entries in the same
//! transaction that writes the source record.

use super::{CursorOption, Tx};
use crate::context::Context;
use crate::error::{Error, Result};
use std::collections::HashSet;

const SEPARATOR: u8 = b'/';

#[derive(Debug, Clone, Copy)]
pub struct Index {
    name: &'static [u8],
    source: &'static [u8],
}

/// Inconsistencies found by [`Index::verify`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexReport {
    /// `(foreign, primary)` entries whose source record is gone
    pub dangling: Vec<(Vec<u8>, Vec<u8>)>,
    /// Source keys with no index entry
    pub unindexed: Vec<Vec<u8>>,
}

impl IndexReport {
    pub fn is_consistent(&self) -> bool {
        self.dangling.is_empty() && self.unindexed.is_empty()
    }
}

impl Index {
    pub const fn new(name: &'static [u8], source: &'static [u8]) -> Self {
        Self { name, source }
    }

    pub fn name(&self) -> &'static [u8] {
        self.name
    }

    /// Create the index bucket
    pub fn initialize(&self, tx: &mut dyn Tx) -> Result<()> {
        tx.create_bucket_if_not_exists(self.name)
    }

    pub fn index_key(foreign: &[u8], primary: &[u8]) -> Vec<u8> {
        let mut key = Self::prefix(foreign);
        key.extend_from_slice(primary);
        key
    }

    fn prefix(foreign: &[u8]) -> Vec<u8> {
        let mut prefix = Vec::with_capacity(foreign.len() + 1 + crate::id::ID_LENGTH);
        prefix.extend_from_slice(foreign);
        prefix.push(SEPARATOR);
        prefix
    }

    pub fn insert(&self, tx: &mut dyn Tx, foreign: &[u8], primary: &[u8]) -> Result<()> {
        tx.bucket(self.name)?
            .put(&Self::index_key(foreign, primary), primary)
    }

    pub fn delete(&self, tx: &mut dyn Tx, foreign: &[u8], primary: &[u8]) -> Result<()> {
        tx.bucket(self.name)?
            .delete(&Self::index_key(foreign, primary))
    }

    pub fn contains(&self, tx: &mut dyn Tx, foreign: &[u8], primary: &[u8]) -> Result<bool> {
        match tx.bucket(self.name)?.get(&Self::index_key(foreign, primary)) {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Primary keys indexed under `foreign`, in key order
    pub fn primary_keys(
        &self,
        ctx: &Context,
        tx: &mut dyn Tx,
        foreign: &[u8],
    ) -> Result<Vec<Vec<u8>>> {
        let prefix = Self::prefix(foreign);
        let bucket = tx.bucket(self.name)?;
        let mut cursor = bucket.forward_cursor(&prefix, &[CursorOption::WithPrefix(prefix.clone())])?;

        let mut keys = Vec::new();
        while let Some((_, primary)) = cursor.next() {
            ctx.err()?;
            keys.push(primary);
        }
        cursor.err()?;
        cursor.close();
        Ok(keys)
    }

    /// Visit `(primary key, source value)` for every record under `foreign`
    pub fn walk(
        &self,
        ctx: &Context,
        tx: &mut dyn Tx,
        foreign: &[u8],
        visit: &mut dyn FnMut(&[u8], &[u8]) -> Result<()>,
    ) -> Result<()> {
        let keys = self.primary_keys(ctx, tx, foreign)?;
        let source = tx.bucket(self.source)?;

        for primary in keys {
            ctx.err()?;
            let value = source.get(&primary).map_err(|e| {
                if e.is_not_found() {
                    Error::Internal(format!(
                        "index {} references missing record {}",
                        String::from_utf8_lossy(self.name),
                        String::from_utf8_lossy(&primary)
                    ))
                } else {
                    e
                }
            })?;
            visit(&primary, &value)?;
        }
        Ok(())
    }

    /// Compare the index against its source bucket
    pub fn verify(&self, ctx: &Context, tx: &mut dyn Tx) -> Result<IndexReport> {
        let mut entries = Vec::new();
        {
            let bucket = tx.bucket(self.name)?;
            let mut cursor = bucket.forward_cursor(&[], &[])?;
            while let Some((key, primary)) = cursor.next() {
                ctx.err()?;
                let foreign = key
                    .iter()
                    .position(|b| *b == SEPARATOR)
                    .map(|at| key[..at].to_vec())
                    .ok_or_else(|| {
                        Error::Internal(format!(
                            "malformed index key {}",
                            String::from_utf8_lossy(&key)
                        ))
                    })?;
                entries.push((foreign, primary));
            }
            cursor.err()?;
        }

        let mut report = IndexReport::default();
        let mut indexed = HashSet::new();
        let source = tx.bucket(self.source)?;

        for (foreign, primary) in entries {
            match source.get(&primary) {
                Ok(_) => {
                    indexed.insert(primary);
                }
                Err(e) if e.is_not_found() => report.dangling.push((foreign, primary)),
                Err(e) => return Err(e),
            }
        }

        let mut cursor = source.forward_cursor(&[], &[])?;
        while let Some((key, _)) = cursor.next() {
            ctx.err()?;
            if !indexed.contains(&key) {
                report.unindexed.push(key);
            }
        }
        cursor.err()?;

        Ok(report)
    }
}
