//! pricecache maintenance binary
//!
//! Operates on cache state left on disk by the library:
//!
//! ```text
//! pricecache clean    --dir ./cache            sweep expired L2 files
//! pricecache inspect  --dir ./cache            summarize L2 files as JSON
//! pricecache store    --file cache.json        list (or --purge) an entry store
//! pricecache maintain --config cache.yaml      run optimize on an interval
//! ```

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{debug, error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use pricecache::cache::exporter;
use pricecache::cache::{Codec, DiskTier, L2Config};
use pricecache::config::parse_duration;
use pricecache::{CacheConfig, EntryStore, TieredCache};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Maintenance tool for the pricing cache
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info", global = true)]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON", global = true)]
    log_json: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Delete expired files from a disk tier directory
    Clean {
        /// Disk tier directory
        #[arg(long, default_value = "./cache")]
        dir: PathBuf,

        /// TTL measured against file mtime
        #[arg(long, default_value = "24h", value_parser = duration_arg)]
        ttl: Duration,
    },

    /// Summarize a disk tier directory
    Inspect {
        /// Disk tier directory
        #[arg(long, default_value = "./cache")]
        dir: PathBuf,

        /// TTL measured against file mtime
        #[arg(long, default_value = "24h", value_parser = duration_arg)]
        ttl: Duration,
    },

    /// List the keys of an entry store file
    Store {
        /// Store file
        #[arg(long)]
        file: PathBuf,

        /// Drop expired entries and rewrite the file
        #[arg(long)]
        purge: bool,
    },

    /// Run the maintenance sweep on a timer until interrupted
    Maintain {
        /// Cache config file (YAML or JSON); defaults apply when omitted
        #[arg(long, env = "PRICECACHE_CONFIG")]
        config: Option<PathBuf>,

        /// Time between sweeps
        #[arg(long, default_value = "5m", value_parser = duration_arg)]
        interval: Duration,
    },
}

fn duration_arg(s: &str) -> std::result::Result<Duration, String> {
    parse_duration(s).map_err(|e| e.to_string())
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args);

    match args.command {
        Command::Clean { dir, ttl } => clean(dir, ttl),
        Command::Inspect { dir, ttl } => inspect(dir, ttl),
        Command::Store { file, purge } => store(file, purge),
        Command::Maintain { config, interval } => maintain(config, interval).await,
    }
}

fn open_disk_tier(dir: PathBuf, ttl: Duration) -> Result<DiskTier> {
    let tier = DiskTier::new(L2Config {
        ttl,
        codec: Some(Codec::None),
        ..L2Config::at(&dir)
    })
    .with_context(|| format!("opening disk tier at {}", dir.display()))?;
    Ok(tier)
}

fn clean(dir: PathBuf, ttl: Duration) -> Result<()> {
    let tier = open_disk_tier(dir, ttl)?;
    let removed = tier.clean().context("cleaning disk tier")?;
    info!(removed, dir = %tier.dir().display(), "Disk tier cleaned");
    println!("{}", removed);
    Ok(())
}

fn inspect(dir: PathBuf, ttl: Duration) -> Result<()> {
    let tier = open_disk_tier(dir, ttl)?;
    let summary = tier.summary().context("reading disk tier")?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn store(file: PathBuf, purge: bool) -> Result<()> {
    let store = EntryStore::open(&file);
    if purge {
        let removed = store
            .purge_expired()
            .with_context(|| format!("purging {}", file.display()))?;
        info!(removed, file = %file.display(), "Entry store purged");
    }
    for key in store.keys() {
        println!("{}", key);
    }
    Ok(())
}

async fn maintain(config: Option<PathBuf>, interval: Duration) -> Result<()> {
    let config = match &config {
        Some(path) => CacheConfig::from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => CacheConfig::default(),
    };
    let cache = TieredCache::new(config).context("building cache")?;

    info!("Starting maintenance loop");
    info!("  Disk tier: {}", cache.l2().dir().display());
    info!("  Interval: {:?}", interval);

    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match cache.optimize().await {
                    Ok(report) => info!(?report, "Sweep complete"),
                    Err(e) => error!(error = %e, "Sweep failed"),
                }
                match exporter::render(&cache.stats()) {
                    Ok(text) => debug!("\n{}", text),
                    Err(e) => error!(error = %e, "Failed to render stats"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal");
                break;
            }
        }
    }

    info!("Maintenance loop stopped");
    Ok(())
}

// =============================================================================
// Logging
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}
