//! Directory-backed shard engine
//!
//! Layout:
//!
//! ```text
//! <dir>/<bucket>/<retention policy>/<shard id>/
//!     shard.json    - owner and enabled flag
//!     points.jsonl  - one JSON point per line, append only
//! ```
//!
//! Existing shards are discovered when the engine is opened. A torn last
//! line is cut off before the next append.

use super::ShardEngine;
use crate::error::{Error, Result};
use crate::id::Id;
use crate::point::Point;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

const META_FILE: &str = "shard.json";
const POINTS_FILE: &str = "points.jsonl";
const TAIL_CHUNK: u64 = 4096;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ShardMeta {
    id: Id,
    bucket: String,
    retention_policy: String,
    enabled: bool,
}

struct ShardFile {
    dir: PathBuf,
    meta: ShardMeta,
    /// Serializes appends to `points.jsonl`
    append: Mutex<()>,
}

impl ShardFile {
    fn points_path(&self) -> PathBuf {
        self.dir.join(POINTS_FILE)
    }
}

pub struct FileEngine {
    dir: PathBuf,
    shards: RwLock<HashMap<Id, Arc<ShardFile>>>,
    /// Fsync after each batch
    sync: bool,
}

impl FileEngine {
    /// Open the engine rooted at `dir`, creating it if needed
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;

        let shards = Self::load_shards(&dir)?;
        if !shards.is_empty() {
            tracing::info!("Loaded {} shards from {:?}", shards.len(), dir);
        }

        Ok(Self {
            dir,
            shards: RwLock::new(shards),
            sync: true,
        })
    }

    /// Builder: disable fsync after each batch
    pub fn without_sync(mut self) -> Self {
        self.sync = false;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn load_shards(dir: &Path) -> Result<HashMap<Id, Arc<ShardFile>>> {
        let mut shards = HashMap::new();

        for bucket in subdirs(dir)? {
            for rp in subdirs(&bucket)? {
                for shard_dir in subdirs(&rp)? {
                    let meta_path = shard_dir.join(META_FILE);
                    if !meta_path.exists() {
                        continue;
                    }
                    match read_meta(&meta_path) {
                        Ok(meta) => {
                            shards.insert(
                                meta.id,
                                Arc::new(ShardFile {
                                    dir: shard_dir,
                                    meta,
                                    append: Mutex::new(()),
                                }),
                            );
                        }
                        Err(e) => {
                            tracing::warn!("Failed to load shard {:?}: {}", shard_dir, e);
                        }
                    }
                }
            }
        }

        Ok(shards)
    }

    async fn shard(&self, shard_id: Id) -> Result<Arc<ShardFile>> {
        self.shards
            .read()
            .await
            .get(&shard_id)
            .cloned()
            .ok_or(Error::ShardNotFound(shard_id))
    }

    /// Ids of all known shards, ascending
    pub async fn shard_ids(&self) -> Vec<Id> {
        let mut ids: Vec<Id> = self.shards.read().await.keys().copied().collect();
        ids.sort();
        ids
    }

    /// Every point stored in `shard_id`, in write order
    ///
    /// A torn last line from an interrupted append is skipped.
    pub async fn read_points(&self, shard_id: Id) -> Result<Vec<Point>> {
        let shard = self.shard(shard_id).await?;
        let _guard = shard.append.lock().await;

        let path = shard.points_path();
        if !path.exists() {
            return Ok(Vec::new());
        }

        let reader = BufReader::new(File::open(&path)?);
        let mut points = Vec::new();
        for (n, line) in reader.lines().enumerate() {
            let line = line?;
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str(&line) {
                Ok(point) => points.push(point),
                Err(e) => {
                    tracing::warn!("Shard {} corrupt at line {}: {}", shard_id, n + 1, e);
                    break;
                }
            }
        }
        Ok(points)
    }
}

#[async_trait]
impl ShardEngine for FileEngine {
    async fn write_to_shard(&self, shard_id: Id, points: &[Point]) -> Result<()> {
        let shard = self.shard(shard_id).await?;
        if !shard.meta.enabled {
            return Err(Error::Invalid(format!("shard {} is disabled", shard_id)));
        }

        let _guard = shard.append.lock().await;
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(shard.points_path())?;
        repair_tail(&mut file, shard_id)?;
        let mut writer = BufWriter::new(file);
        for point in points {
            serde_json::to_writer(&mut writer, point)?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;
        if self.sync {
            writer.get_ref().sync_data()?;
        }
        Ok(())
    }

    async fn create_shard(
        &self,
        bucket: &str,
        retention_policy: &str,
        shard_id: Id,
        enabled: bool,
    ) -> Result<()> {
        check_component("bucket", bucket)?;
        check_component("retention policy", retention_policy)?;

        let mut shards = self.shards.write().await;
        if shards.contains_key(&shard_id) {
            return Ok(());
        }

        let dir = self
            .dir
            .join(bucket)
            .join(retention_policy)
            .join(shard_id.to_string());
        std::fs::create_dir_all(&dir)?;

        let meta = ShardMeta {
            id: shard_id,
            bucket: bucket.to_string(),
            retention_policy: retention_policy.to_string(),
            enabled,
        };
        std::fs::write(dir.join(META_FILE), serde_json::to_vec_pretty(&meta)?)?;

        tracing::debug!("Created shard {} at {:?}", shard_id, dir);
        shards.insert(
            shard_id,
            Arc::new(ShardFile {
                dir,
                meta,
                append: Mutex::new(()),
            }),
        );
        Ok(())
    }
}

/// Truncate `file` after its last newline if it ends mid-line
fn repair_tail(file: &mut File, shard_id: Id) -> Result<()> {
    let len = file.metadata()?.len();
    if len == 0 {
        return Ok(());
    }

    let mut last = [0u8; 1];
    file.seek(SeekFrom::Start(len - 1))?;
    file.read_exact(&mut last)?;
    if last[0] == b'\n' {
        return Ok(());
    }

    let mut keep = 0;
    let mut end = len;
    let mut buf = Vec::new();
    while end > 0 {
        let start = end.saturating_sub(TAIL_CHUNK);
        buf.resize((end - start) as usize, 0);
        file.seek(SeekFrom::Start(start))?;
        file.read_exact(&mut buf)?;
        if let Some(i) = buf.iter().rposition(|&b| b == b'\n') {
            keep = start + i as u64 + 1;
            break;
        }
        end = start;
    }

    file.set_len(keep)?;
    tracing::warn!(
        "Shard {} ended in a torn line, truncated {} bytes",
        shard_id,
        len - keep
    );
    Ok(())
}

fn subdirs(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut dirs = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            dirs.push(path);
        }
    }
    Ok(dirs)
}

fn read_meta(path: &Path) -> Result<ShardMeta> {
    let content = std::fs::read(path)?;
    Ok(serde_json::from_slice(&content)?)
}

/// Names become directory names, so they must be a single path component
fn check_component(what: &str, name: &str) -> Result<()> {
    if name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\', '\0'])
    {
        return Err(Error::Invalid(format!(
            "{} name {:?} cannot be used as a directory name",
            what, name
        )));
    }
    Ok(())
}
