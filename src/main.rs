//! Shardline CLI
//!
//! Command-line interface for Shardline operations:
//! - Write points into a bucket
//! - Inspect, create and delete shard groups
//! - Check the catalog index
//! - Generate a config file

use anyhow::{bail, Context as _};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use shardline::config::{generate_default_config, Config, LoggingConfig};
use shardline::{
    Context, FileEngine, Id, Point, ShardGroup, ShardGroupFilter, ShardGroupManager,
    ShardGroupService, ShardGroupStore, SnowflakeGenerator, SqliteKv, WriteService,
};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "shardline")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Shard-group catalog and write fan-out for time-series buckets")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (default: standard locations, then environment)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Output format (table, json)
    #[arg(short, long, default_value = "table", global = true)]
    pub format: String,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write JSON points into a bucket
    Write {
        /// Bucket id (16 hex characters)
        #[arg(short, long)]
        bucket: Id,
        /// Organization id (default: the bucket's configured organization)
        #[arg(short, long)]
        org: Option<Id>,
        /// JSON array or JSON lines of points (default: stdin)
        #[arg(short, long)]
        input: Option<PathBuf>,
        /// Give up after this many seconds
        #[arg(long)]
        timeout_secs: Option<u64>,
    },

    /// Manage shard groups
    Groups {
        #[command(subcommand)]
        command: GroupCommands,
    },

    /// Generate default config file
    Config {
        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
pub enum GroupCommands {
    /// List shard groups
    List {
        /// Only groups of this bucket
        #[arg(short, long)]
        bucket: Option<Id>,
        /// Groups ending after this time (RFC 3339)
        #[arg(long)]
        min: Option<DateTime<Utc>>,
        /// Groups starting at or before this time (RFC 3339)
        #[arg(long)]
        max: Option<DateTime<Utc>>,
    },

    /// Find or create the group covering a time
    Ensure {
        #[arg(short, long)]
        bucket: Id,
        /// RFC 3339 timestamp (default: now)
        #[arg(short, long)]
        time: Option<DateTime<Utc>>,
    },

    /// Delete a shard group
    Delete {
        #[arg(short, long)]
        bucket: Id,
        /// Shard group id
        id: Id,
    },

    /// Cross-check shard groups against the bucket index
    Verify,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Commands::Config { output } = &cli.command {
        let content = generate_default_config();
        match output {
            Some(path) => {
                std::fs::write(path, content)
                    .with_context(|| format!("writing config to {:?}", path))?;
                println!("Config written to {:?}", path);
            }
            None => print!("{}", content),
        }
        return Ok(());
    }

    let config = match &cli.config {
        Some(path) => Config::load_with_env(path)?,
        None => Config::load_default(),
    };
    config.validate()?;
    init_logging(&config.logging)?;

    tracing::debug!("Shardline v{}", env!("CARGO_PKG_VERSION"));

    let ctx = Context::background();
    let interrupt = ctx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling");
            interrupt.cancel();
        }
    });

    let node = Node::open(&ctx, &config)?;

    match cli.command {
        Commands::Write {
            bucket,
            org,
            input,
            timeout_secs,
        } => {
            let org = match org {
                Some(org) => org,
                None => match config.buckets.iter().find(|b| b.id == bucket) {
                    Some(b) => b.org_id,
                    None => bail!("bucket {} is not configured; pass --org", bucket),
                },
            };
            let points = read_points(input.as_deref())?;
            let ctx = match timeout_secs {
                Some(secs) => ctx.with_timeout(Duration::from_secs(secs)),
                None => ctx,
            };

            let summary = node.writer.write_points(&ctx, org, bucket, points).await?;

            match cli.format.as_str() {
                "json" => println!("{}", serde_json::to_string_pretty(&summary)?),
                _ => {
                    println!("Written: {}", summary.written);
                    println!("Dropped (retention): {}", summary.dropped);
                    println!("Shards: {}", summary.shards);
                }
            }
        }

        Commands::Groups { command } => match command {
            GroupCommands::List { bucket, min, max } => {
                let mut filter = ShardGroupFilter::new();
                filter.bucket_id = bucket;
                filter.min = min;
                filter.max = max;

                let mut groups = node.groups.find_shard_groups(&ctx, &filter).await?;
                groups.sort_by_key(|g| g.start_time);
                print_groups(&cli.format, &groups)?;
            }

            GroupCommands::Ensure { bucket, time } => {
                let t = time.unwrap_or_else(Utc::now);
                let group = node.groups.ensure_shard_group(&ctx, bucket, t).await?;
                print_groups(&cli.format, std::slice::from_ref(&group))?;
            }

            GroupCommands::Delete { bucket, id } => {
                node.groups.delete_shard_group(&ctx, bucket, id).await?;
                println!("Deleted shard group {}", id);
            }

            GroupCommands::Verify => {
                let report = node.groups.store().verify_index(&ctx)?;
                if report.is_consistent() {
                    println!("Index is consistent");
                } else {
                    for (bucket, group) in &report.dangling {
                        println!(
                            "dangling: bucket {} -> group {}",
                            String::from_utf8_lossy(bucket),
                            String::from_utf8_lossy(group)
                        );
                    }
                    for group in &report.unindexed {
                        println!("unindexed: group {}", String::from_utf8_lossy(group));
                    }
                    bail!(
                        "index has {} dangling and {} unindexed entries",
                        report.dangling.len(),
                        report.unindexed.len()
                    );
                }
            }
        },

        // Handled before any store is opened
        Commands::Config { .. } => {}
    }

    Ok(())
}

/// Services wired from configuration
struct Node {
    groups: Arc<ShardGroupManager>,
    writer: WriteService,
}

impl Node {
    fn open(ctx: &Context, config: &Config) -> anyhow::Result<Self> {
        let kv = Arc::new(
            SqliteKv::open_dir(&config.meta.dir)
                .with_context(|| format!("opening catalog in {}", config.meta.dir))?,
        );
        let store = Arc::new(ShardGroupStore::open(ctx, kv)?);
        let buckets = Arc::new(config.bucket_service());

        let groups = Arc::new(
            ShardGroupManager::new(
                store,
                buckets.clone(),
                Arc::new(SnowflakeGenerator::default()),
            )
            .shards_per_group(config.meta.shards_per_group),
        );

        let engine = Arc::new(
            FileEngine::open(&config.engine.dir)
                .with_context(|| format!("opening shard data in {}", config.engine.dir))?,
        );
        let writer = WriteService::new(buckets, groups.clone(), engine);

        Ok(Self { groups, writer })
    }
}

fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("shardline={}", config.level).into());

    let writer = match &config.file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("opening log file {}", path))?;
            BoxMakeWriter::new(Arc::new(file))
        }
        None => BoxMakeWriter::new(std::io::stderr),
    };
    let ansi = config.file.is_none();

    let registry = tracing_subscriber::registry().with(filter);
    if config.format == "json" {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(writer))
            .init();
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_ansi(ansi)
                    .with_writer(writer),
            )
            .init();
    }
    Ok(())
}

/// Parse a JSON array of points, or one point per line
fn read_points(input: Option<&Path>) -> anyhow::Result<Vec<Point>> {
    let content = match input {
        Some(path) => {
            std::fs::read_to_string(path).with_context(|| format!("reading {:?}", path))?
        }
        None => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            buf
        }
    };

    if content.trim_start().starts_with('[') {
        return Ok(serde_json::from_str(&content)?);
    }

    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(n, line)| {
            serde_json::from_str::<Point>(line)
                .with_context(|| format!("point on line {}", n + 1))
        })
        .collect()
}

fn print_groups(format: &str, groups: &[ShardGroup]) -> anyhow::Result<()> {
    if format == "json" {
        println!("{}", serde_json::to_string_pretty(groups)?);
        return Ok(());
    }

    if groups.is_empty() {
        println!("No shard groups.");
        return Ok(());
    }

    println!("{:<18} {:<22} {:<22} {}", "ID", "Start", "End", "Shards");
    println!("{}", "-".repeat(80));
    for group in groups {
        let shards: Vec<String> = group.shards.iter().map(|s| s.id.to_string()).collect();
        println!(
            "{:<18} {:<22} {:<22} {}",
            group.id,
            group.start_time.format("%Y-%m-%dT%H:%M:%SZ"),
            group.end_time.format("%Y-%m-%dT%H:%M:%SZ"),
            shards.join(",")
        );
    }
    Ok(())
}
