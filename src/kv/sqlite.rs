//! SQLite-backed durable store
//!
//! Buckets are rows of one `kv_entries` table keyed by `(bucket, key)`.
//! SQLite compares BLOBs with memcmp, so key order matches byte order and
//! prefix scans become range scans on the primary key.
//!
//! # Performance
//! - Point get/put: O(log n)
//! - Cursor: pages of [`PAGE_SIZE`] rows, O(log n + k)

use super::{
    prefix_successor, Bucket, CursorConfig, CursorOption, ForwardCursor, KvStore, Tx, TxFn,
};
use crate::context::Context;
use crate::error::{Error, Result};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, TransactionBehavior};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Rows fetched per cursor round trip
pub const PAGE_SIZE: usize = 256;

/// File name used by [`SqliteKv::open_dir`]
pub const DEFAULT_FILENAME: &str = "meta.db";

/// Durable key-value store (std::sync::Mutex because Connection is !Sync)
pub struct SqliteKv {
    conn: Mutex<Connection>,
    path: PathBuf,
}

impl SqliteKv {
    /// Create or open the database at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open_with_flags(
            &path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = FULL;
            PRAGMA busy_timeout = 1000;
            ",
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS kv_buckets (
                name BLOB PRIMARY KEY
            ) WITHOUT ROWID",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS kv_entries (
                bucket BLOB NOT NULL,
                key BLOB NOT NULL,
                value BLOB NOT NULL,
                PRIMARY KEY (bucket, key)
            ) WITHOUT ROWID",
            [],
        )?;

        tracing::info!("Opened catalog at {:?}", path);
        Ok(Self {
            conn: Mutex::new(conn),
            path,
        })
    }

    /// Open `meta.db` inside `dir`
    pub fn open_dir(dir: impl AsRef<Path>) -> Result<Self> {
        Self::open(dir.as_ref().join(DEFAULT_FILENAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn run(
        &self,
        ctx: &Context,
        behavior: TransactionBehavior,
        writable: bool,
        f: &mut TxFn<'_>,
    ) -> Result<()> {
        ctx.err()?;

        let mut conn = self
            .conn
            .lock()
            .map_err(|e| Error::Internal(format!("catalog lock poisoned: {}", e)))?;
        let tx = conn.transaction_with_behavior(behavior)?;

        {
            let mut stx = SqliteTx {
                conn: &tx,
                writable,
            };
            f(&mut stx)?;
        }

        // Dropping an uncommitted transaction rolls it back.
        ctx.err()?;
        tx.commit()?;
        Ok(())
    }
}

impl KvStore for SqliteKv {
    fn view(&self, ctx: &Context, f: &mut TxFn<'_>) -> Result<()> {
        self.run(ctx, TransactionBehavior::Deferred, false, f)
    }

    fn update(&self, ctx: &Context, f: &mut TxFn<'_>) -> Result<()> {
        self.run(ctx, TransactionBehavior::Immediate, true, f)
    }
}

struct SqliteTx<'t> {
    conn: &'t Connection,
    writable: bool,
}

impl Tx for SqliteTx<'_> {
    fn bucket(&mut self, name: &[u8]) -> Result<Box<dyn Bucket + '_>> {
        let exists = self
            .conn
            .query_row(
                "SELECT 1 FROM kv_buckets WHERE name = ?1",
                params![name],
                |_| Ok(()),
            )
            .optional()?
            .is_some();

        if !exists {
            return Err(Error::Kv(format!(
                "bucket {} does not exist",
                String::from_utf8_lossy(name)
            )));
        }

        Ok(Box::new(SqliteBucket {
            conn: self.conn,
            name: name.to_vec(),
            writable: self.writable,
        }))
    }

    fn create_bucket_if_not_exists(&mut self, name: &[u8]) -> Result<()> {
        if !self.writable {
            return Err(Error::Kv("transaction is read-only".to_string()));
        }
        self.conn.execute(
            "INSERT OR IGNORE INTO kv_buckets (name) VALUES (?1)",
            params![name],
        )?;
        Ok(())
    }

    fn writable(&self) -> bool {
        self.writable
    }
}

struct SqliteBucket<'t> {
    conn: &'t Connection,
    name: Vec<u8>,
    writable: bool,
}

impl SqliteBucket<'_> {
    fn check_writable(&self) -> Result<()> {
        if self.writable {
            Ok(())
        } else {
            Err(Error::Kv("transaction is read-only".to_string()))
        }
    }
}

impl Bucket for SqliteBucket<'_> {
    fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT value FROM kv_entries WHERE bucket = ?1 AND key = ?2")?;

        stmt.query_row(params![self.name, key], |row| row.get::<_, Vec<u8>>(0))
            .optional()?
            .ok_or_else(|| Error::not_found("key", String::from_utf8_lossy(key)))
    }

    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.check_writable()?;
        let mut stmt = self.conn.prepare_cached(
            "INSERT OR REPLACE INTO kv_entries (bucket, key, value) VALUES (?1, ?2, ?3)",
        )?;
        stmt.execute(params![self.name, key, value])?;
        Ok(())
    }

    fn delete(&mut self, key: &[u8]) -> Result<()> {
        self.check_writable()?;
        let mut stmt = self
            .conn
            .prepare_cached("DELETE FROM kv_entries WHERE bucket = ?1 AND key = ?2")?;
        stmt.execute(params![self.name, key])?;
        Ok(())
    }

    fn forward_cursor(
        &self,
        seek: &[u8],
        opts: &[CursorOption],
    ) -> Result<Box<dyn ForwardCursor + '_>> {
        let config = CursorConfig::new(opts);
        let from = config.start(seek).to_vec();
        let upper = config.prefix.as_deref().and_then(prefix_successor);

        Ok(Box::new(SqliteCursor {
            conn: self.conn,
            bucket: self.name.clone(),
            from,
            upper,
            remaining: config.limit,
            config,
            page: VecDeque::new(),
            exhausted: false,
            closed: false,
            err: None,
        }))
    }
}

/// Cursor that pulls [`PAGE_SIZE`] rows at a time
struct SqliteCursor<'t> {
    conn: &'t Connection,
    bucket: Vec<u8>,
    /// Inclusive lower bound of the next page
    from: Vec<u8>,
    /// Exclusive upper bound derived from the prefix
    upper: Option<Vec<u8>>,
    remaining: Option<usize>,
    config: CursorConfig,
    page: VecDeque<(Vec<u8>, Vec<u8>)>,
    exhausted: bool,
    closed: bool,
    err: Option<Error>,
}

impl SqliteCursor<'_> {
    fn fill(&mut self) -> Result<()> {
        let conn = self.conn;
        let mut stmt = conn.prepare_cached(
            "SELECT key, value FROM kv_entries
             WHERE bucket = ?1 AND key >= ?2 AND (?3 IS NULL OR key < ?3)
             ORDER BY key
             LIMIT ?4",
        )?;

        let rows = stmt.query_map(
            params![self.bucket, self.from, self.upper, PAGE_SIZE as i64],
            |row| Ok((row.get::<_, Vec<u8>>(0)?, row.get::<_, Vec<u8>>(1)?)),
        )?;

        let mut fetched = 0;
        for row in rows {
            self.page.push_back(row?);
            fetched += 1;
        }

        if fetched < PAGE_SIZE {
            self.exhausted = true;
        }

        // Smallest key strictly after the last one seen.
        if let Some((last, _)) = self.page.back() {
            let mut from = last.clone();
            from.push(0);
            self.from = from;
        }
        Ok(())
    }
}

impl ForwardCursor for SqliteCursor<'_> {
    fn next(&mut self) -> Option<(Vec<u8>, Vec<u8>)> {
        if self.closed || self.err.is_some() || self.remaining == Some(0) {
            return None;
        }

        if self.page.is_empty() && !self.exhausted {
            if let Err(e) = self.fill() {
                self.err = Some(e);
                return None;
            }
        }

        let (key, value) = self.page.pop_front()?;
        if !self.config.admits(&key) {
            self.close();
            return None;
        }

        if let Some(remaining) = self.remaining.as_mut() {
            *remaining -= 1;
        }
        Some((key, value))
    }

    fn err(&mut self) -> Result<()> {
        match self.err.take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn close(&mut self) {
        self.closed = true;
        self.page.clear();
    }
}
