//! Construction-time configuration: CLI flags with an optional TOML overlay.
//!
//! Mirrors the teacher's own `clap` + `serde` + `toml` dependency triple
//! (declared in `Cargo.toml`), here finally wired up to a binary.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use serde::Deserialize;

use crate::cache::CacheConfig;

#[derive(Parser, Debug)]
#[command(name = "assemblyfs", about = "Read-only FUSE view over a faceted genomic assembly catalog")]
pub struct Cli {
    /// Path to the tab-separated assembly summary catalog.
    pub catalog: PathBuf,

    /// Where to mount the filesystem.
    pub mount_point: PathBuf,

    /// Optional TOML file overlaying the cache-tuning flags below.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Local cache root. Defaults to a directory under the OS cache dir.
    #[arg(long)]
    pub root_dir: Option<PathBuf>,

    /// Bounded in-flight download queue capacity.
    #[arg(long)]
    pub max_queue: Option<usize>,

    /// Worker pool size for concurrent downloads.
    #[arg(long)]
    pub concurrent_downloads: Option<usize>,

    /// Per-request timeout, in seconds, for a dedup wait or a download.
    #[arg(long)]
    pub download_timeout_seconds: Option<u64>,
}

/// The subset of [`Cli`]'s cache-tuning flags that may also come from a
/// `--config` TOML file. CLI flags win when both are given.
#[derive(Debug, Default, Deserialize)]
pub struct FileConfig {
    pub root_dir: Option<PathBuf>,
    pub max_queue: Option<usize>,
    pub concurrent_downloads: Option<usize>,
    pub download_timeout_seconds: Option<u64>,
}

impl FileConfig {
    pub fn load(path: &Path) -> std::io::Result<Self> {
        let text = fs::read_to_string(path)?;
        toml::from_str(&text).map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err))
    }
}

/// Resolves [`Cli`] flags against an optional [`FileConfig`] overlay into a
/// concrete [`CacheConfig`], falling back to a fresh temp directory under
/// the OS cache dir when no root was given anywhere.
pub fn resolve_cache_config(cli: &Cli, file: &FileConfig) -> CacheConfig {
    let root_dir = cli
        .root_dir
        .clone()
        .or_else(|| file.root_dir.clone())
        .unwrap_or_else(default_root_dir);

    let mut config = CacheConfig::new(root_dir);
    if let Some(max_queue) = cli.max_queue.or(file.max_queue) {
        config.max_queue = max_queue;
    }
    if let Some(concurrent_downloads) = cli.concurrent_downloads.or(file.concurrent_downloads) {
        config.concurrent_downloads = concurrent_downloads;
    }
    if let Some(secs) = cli.download_timeout_seconds.or(file.download_timeout_seconds) {
        config.download_timeout = Duration::from_secs(secs);
    }
    config
}

fn default_root_dir() -> PathBuf {
    std::env::temp_dir().join("assemblyfs-cache")
}
