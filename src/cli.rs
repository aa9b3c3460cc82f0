//! Command-line interface definitions for thumbcache.
//!
//! # Example
//!
//! ```bash
//! # Cache a thumbnail for an image
//! thumbcache put ~/Pictures/IMG_0001.png
//!
//! # Inspect the cache
//! thumbcache stats --json
//!
//! # Expire old entries and drop thumbnails of deleted files
//! thumbcache cleanup --expired --orphaned
//! ```

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Two-tier thumbnail cache maintenance tool.
#[derive(Debug, Parser)]
#[command(name = "thumbcache")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase verbosity level (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Path to a TOML configuration file
    #[arg(long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    /// Cache database file or directory (overrides config)
    #[arg(long, value_name = "PATH", global = true, env = "THUMBCACHE_DB")]
    pub db: Option<PathBuf>,

    /// zstd compression level for new entries, 0 to disable (overrides config)
    #[arg(long, value_name = "LEVEL", global = true)]
    pub compression_level: Option<i32>,

    /// Report errors as JSON on stderr
    #[arg(long, global = true)]
    pub json_errors: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Show cache statistics
    Stats(StatsArgs),
    /// Decode an image and cache its thumbnail
    Put(PutArgs),
    /// Look up the cached thumbnail of an image
    Get(GetArgs),
    /// Remove the cached thumbnail of an image
    Remove(RemoveArgs),
    /// Load cached thumbnails of a directory's files into memory
    Prefetch(PrefetchArgs),
    /// Run maintenance (all tasks when no flag is given)
    Cleanup(CleanupArgs),
    /// Reclaim disk space
    Compact,
    /// Remove every cached thumbnail
    Clear,
}

/// Arguments for `stats`.
#[derive(Debug, Args)]
pub struct StatsArgs {
    /// Print statistics as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for `put`.
#[derive(Debug, Args)]
pub struct PutArgs {
    /// Source image
    #[arg(value_name = "IMAGE")]
    pub image: PathBuf,

    /// Longest thumbnail edge in pixels
    #[arg(long, value_name = "PIXELS", default_value = "256")]
    pub size: u32,
}

/// Arguments for `get`.
#[derive(Debug, Args)]
pub struct GetArgs {
    /// Source image
    #[arg(value_name = "IMAGE")]
    pub image: PathBuf,

    /// Write the thumbnail to this PNG file
    #[arg(short, long, value_name = "PNG")]
    pub output: Option<PathBuf>,
}

/// Arguments for `remove`.
#[derive(Debug, Args)]
pub struct RemoveArgs {
    /// Source image
    #[arg(value_name = "IMAGE")]
    pub image: PathBuf,
}

/// Arguments for `prefetch`.
#[derive(Debug, Args)]
pub struct PrefetchArgs {
    /// Directory whose files should be warmed
    #[arg(value_name = "DIR")]
    pub directory: PathBuf,
}

/// Arguments for `cleanup`.
#[derive(Debug, Args)]
pub struct CleanupArgs {
    /// Remove entries past the retention period
    #[arg(long)]
    pub expired: bool,

    /// Remove entries whose source file no longer exists
    #[arg(long)]
    pub orphaned: bool,

    /// Evict entries until the configured limits hold
    #[arg(long)]
    pub limits: bool,
}

impl CleanupArgs {
    /// Whether no task was selected, meaning "run all of them".
    #[must_use]
    pub fn run_all(&self) -> bool {
        !self.expired && !self.orphaned && !self.limits
    }
}
