//! Key-value transaction facade
//!
//! The catalog is stored in named buckets of ordered byte keys. All access
//! happens inside a transaction handed to a closure:
//!
//! ```text
//! KvStore::view(ctx, |tx| ...)     read-only, sees a consistent snapshot
//! KvStore::update(ctx, |tx| ...)   read-write, commits only if the closure
//!                                  returns Ok and the context is still live
//! ```
//!
//! Two backends are provided: [`SqliteKv`] for durable catalogs and
//! [`MemoryKv`] for tests and benchmarks.

mod index;
mod memory;
mod sqlite;

pub use index::{Index, IndexReport};
pub use memory::MemoryKv;
pub use sqlite::SqliteKv;

use crate::context::Context;
use crate::error::Result;

/// Closure run inside a transaction
pub type TxFn<'f> = dyn FnMut(&mut dyn Tx) -> Result<()> + 'f;

/// A transactional store of named buckets
pub trait KvStore: Send + Sync {
    /// Run `f` in a read-only transaction
    fn view(&self, ctx: &Context, f: &mut TxFn<'_>) -> Result<()>;

    /// Run `f` in a read-write transaction; nothing is kept unless it returns Ok
    fn update(&self, ctx: &Context, f: &mut TxFn<'_>) -> Result<()>;
}

/// An open transaction
pub trait Tx {
    /// Open an existing bucket; missing buckets are an internal error
    fn bucket(&mut self, name: &[u8]) -> Result<Box<dyn Bucket + '_>>;

    /// Create `name` unless it exists (read-write transactions only)
    fn create_bucket_if_not_exists(&mut self, name: &[u8]) -> Result<()>;

    fn writable(&self) -> bool;
}

/// Ordered key space inside a transaction
pub trait Bucket {
    /// Value stored under `key`, or a NotFound error
    fn get(&self, key: &[u8]) -> Result<Vec<u8>>;

    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Removing an absent key is not an error
    fn delete(&mut self, key: &[u8]) -> Result<()>;

    /// Cursor over keys `>= seek` in ascending order
    fn forward_cursor(
        &self,
        seek: &[u8],
        opts: &[CursorOption],
    ) -> Result<Box<dyn ForwardCursor + '_>>;
}

/// Ascending iterator over a bucket
pub trait ForwardCursor {
    /// Next entry, `None` once exhausted, closed or failed
    fn next(&mut self) -> Option<(Vec<u8>, Vec<u8>)>;

    /// Error that stopped iteration, if any
    fn err(&mut self) -> Result<()>;

    fn close(&mut self);
}

/// Options applied to [`Bucket::forward_cursor`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CursorOption {
    /// Only visit keys starting with this prefix
    WithPrefix(Vec<u8>),
    /// Stop after this many entries
    WithLimit(usize),
}

/// Resolved cursor options
#[derive(Debug, Clone, Default)]
pub(crate) struct CursorConfig {
    pub prefix: Option<Vec<u8>>,
    pub limit: Option<usize>,
}

impl CursorConfig {
    pub fn new(opts: &[CursorOption]) -> Self {
        let mut config = Self::default();
        for opt in opts {
            match opt {
                CursorOption::WithPrefix(prefix) => config.prefix = Some(prefix.clone()),
                CursorOption::WithLimit(limit) => config.limit = Some(*limit),
            }
        }
        config
    }

    /// First key the cursor may return
    pub fn start<'a>(&'a self, seek: &'a [u8]) -> &'a [u8] {
        match &self.prefix {
            Some(prefix) if prefix.as_slice() > seek => prefix,
            _ => seek,
        }
    }

    pub fn admits(&self, key: &[u8]) -> bool {
        self.prefix
            .as_ref()
            .map(|prefix| key.starts_with(prefix))
            .unwrap_or(true)
    }
}

/// Smallest key greater than every key starting with `prefix`
pub(crate) fn prefix_successor(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.pop() {
        if last < u8::MAX {
            end.push(last + 1);
            return Some(end);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_successor() {
        assert_eq!(prefix_successor(b"ab"), Some(b"ac".to_vec()));
        assert_eq!(prefix_successor(&[0x01, 0xff]), Some(vec![0x02]));
        assert_eq!(prefix_successor(&[0xff, 0xff]), None);
        assert_eq!(prefix_successor(b""), None);
    }

    #[test]
    fn test_cursor_config_start() {
        let config = CursorConfig::new(&[CursorOption::WithPrefix(b"m".to_vec())]);
        assert_eq!(config.start(b"a"), b"m");
        assert_eq!(config.start(b"mz"), b"mz");
        assert!(config.admits(b"mouse"));
        assert!(!config.admits(b"n"));
    }
}
