//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and environment variable overrides.

use crate::id::Id;
use crate::tenant::{Bucket, InMemoryBucketService, DEFAULT_RETENTION_POLICY};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub meta: MetaConfig,

    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub buckets: Vec<BucketConfig>,
}

/// Shard-group catalog configuration
#[derive(Debug, Clone, Deserialize)]
pub struct MetaConfig {
    #[serde(default = "default_meta_dir")]
    pub dir: String,

    #[serde(default = "default_shards_per_group")]
    pub shards_per_group: usize,
}

fn default_meta_dir() -> String {
    data_dir("meta")
}

fn default_shards_per_group() -> usize {
    1
}

impl Default for MetaConfig {
    fn default() -> Self {
        Self {
            dir: default_meta_dir(),
            shards_per_group: default_shards_per_group(),
        }
    }
}

/// Shard data configuration
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_engine_dir")]
    pub dir: String,
}

fn default_engine_dir() -> String {
    data_dir("shards")
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            dir: default_engine_dir(),
        }
    }
}

fn data_dir(sub: &str) -> String {
    dirs::data_local_dir()
        .map(|p| p.join("shardline").join(sub).to_string_lossy().to_string())
        .unwrap_or_else(|| format!("./shardline_data/{}", sub))
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,

    pub file: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            file: None,
        }
    }
}

/// A bucket known to this node
#[derive(Debug, Clone, Deserialize)]
pub struct BucketConfig {
    pub id: Id,
    pub org_id: Id,
    pub name: String,

    /// 0 keeps data forever
    #[serde(default)]
    pub retention_hours: u64,

    #[serde(default = "default_retention_policy")]
    pub retention_policy: String,
}

fn default_retention_policy() -> String {
    DEFAULT_RETENTION_POLICY.to_string()
}

impl BucketConfig {
    pub fn to_bucket(&self) -> Bucket {
        Bucket::new(self.id, self.org_id, self.name.clone())
            .retention(Duration::from_secs(self.retention_hours.saturating_mul(3600)))
            .retention_policy(self.retention_policy.clone())
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from default locations or environment
    pub fn load_default() -> Self {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("shardline").join("config.toml")),
            Some(PathBuf::from("/etc/shardline/config.toml")),
            Some(PathBuf::from("./shardline.toml")),
        ];

        for path_opt in config_paths.iter().flatten() {
            if path_opt.exists() {
                match Self::load_with_env(path_opt) {
                    Ok(config) => {
                        tracing::info!("Loaded config from {:?}", path_opt);
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load config from {:?}: {}", path_opt, e);
                    }
                }
            }
        }

        tracing::info!("Using default config with environment overrides");
        Self::from_env()
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(dir) = var("SHARDLINE_META_DIR") {
            self.meta.dir = dir;
        }
        if let Some(n) = var("SHARDLINE_SHARDS_PER_GROUP") {
            match n.parse() {
                Ok(n) => self.meta.shards_per_group = n,
                Err(e) => tracing::warn!("Ignoring SHARDLINE_SHARDS_PER_GROUP={:?}: {}", n, e),
            }
        }

        if let Some(dir) = var("SHARDLINE_ENGINE_DIR") {
            self.engine.dir = dir;
        }

        if let Some(level) = var("SHARDLINE_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = var("SHARDLINE_LOG_FORMAT") {
            self.logging.format = format;
        }
    }

    /// Check values serde cannot
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.meta.shards_per_group == 0 {
            return Err(ConfigError::Invalid(
                "meta.shards_per_group must be at least 1".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for bucket in &self.buckets {
            if !bucket.id.is_valid() || !bucket.org_id.is_valid() {
                return Err(ConfigError::Invalid(format!(
                    "bucket {:?} has a zero id",
                    bucket.name
                )));
            }
            if bucket.name.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("bucket {} has no name", bucket.id)));
            }
            if !seen.insert(bucket.id) {
                return Err(ConfigError::Invalid(format!(
                    "bucket {} is listed twice",
                    bucket.id
                )));
            }
        }

        Ok(())
    }

    /// Bucket directory holding the configured buckets
    pub fn bucket_service(&self) -> InMemoryBucketService {
        InMemoryBucketService::with_buckets(self.buckets.iter().map(BucketConfig::to_bucket))
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# Shardline Configuration
#
# Environment variables override these settings:
# - SHARDLINE_META_DIR
# - SHARDLINE_SHARDS_PER_GROUP
# - SHARDLINE_ENGINE_DIR
# - SHARDLINE_LOG_LEVEL
# - SHARDLINE_LOG_FORMAT

[meta]
# Directory holding the shard-group catalog (meta.db)
dir = "~/.local/share/shardline/meta"

# Shards created with every new shard group
shards_per_group = 1

[engine]
# Directory holding shard data
dir = "~/.local/share/shardline/shards"

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"

# Optional log file path
# file = "/var/log/shardline/shardline.log"

# Buckets accepted for writes. Ids are 16 hex characters.
# retention_hours = 0 keeps data forever.
[[buckets]]
id = "0000000000002000"
org_id = "0000000000001000"
name = "telemetry"
retention_hours = 72
retention_policy = "autogen"
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[test]
    fn test_generated_config_parses() {
        let config: Config = toml::from_str(&generate_default_config()).unwrap();
        config.validate().unwrap();
        assert_eq!(config.meta.shards_per_group, 1);
        assert_eq!(config.logging.format, "pretty");

        let bucket = config.buckets[0].to_bucket();
        assert_eq!(bucket.id, Id::new(0x2000));
        assert_eq!(bucket.org_id, Id::new(0x1000));
        assert_eq!(bucket.retention_period, Duration::from_secs(72 * 3600));
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("shardline.toml");
        std::fs::write(&path, "").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.meta.shards_per_group, 1);
        assert!(config.meta.dir.ends_with("meta"));
        assert!(config.buckets.is_empty());
    }

    #[test]
    fn test_load_errors() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("missing.toml");
        assert!(matches!(Config::load(&missing), Err(ConfigError::Io { .. })));

        let bad = dir.path().join("bad.toml");
        std::fs::write(&bad, "[meta]\nshards_per_group = \"many\"\n").unwrap();
        assert!(matches!(Config::load(&bad), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            ("SHARDLINE_META_DIR", "/tmp/meta"),
            ("SHARDLINE_SHARDS_PER_GROUP", "4"),
            ("SHARDLINE_LOG_FORMAT", "json"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_overrides(|k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(config.meta.dir, "/tmp/meta");
        assert_eq!(config.meta.shards_per_group, 4);
        assert_eq!(config.logging.format, "json");
        assert_eq!(config.logging.level, "info");

        config.apply_overrides(|k| (k == "SHARDLINE_SHARDS_PER_GROUP").then(|| "x".to_string()));
        assert_eq!(config.meta.shards_per_group, 4);
    }

    #[test]
    fn test_validate() {
        let mut config: Config = toml::from_str(
            r#"
            [[buckets]]
            id = "0000000000002000"
            org_id = "0000000000001000"
            name = "a"

            [[buckets]]
            id = "0000000000002000"
            org_id = "0000000000001000"
            name = "b"
            "#,
        )
        .unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        config.buckets.pop();
        config.validate().unwrap();
        assert!(config.buckets[0].to_bucket().has_infinite_retention());

        config.buckets[0].name = " ".to_string();
        assert!(config.validate().is_err());

        config.buckets.clear();
        config.meta.shards_per_group = 0;
        assert!(config.validate().is_err());
    }
}
