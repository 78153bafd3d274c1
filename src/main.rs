//! Binary entry point: parses CLI flags, loads the catalog, builds the
//! download cache, and mounts the FUSE filesystem (blocking until unmount).

use std::fs::File;
use std::sync::Arc;

use clap::Parser;

use assemblyfs::cache::{DownloadCache, HttpFetcher};
use assemblyfs::catalog::Index;
use assemblyfs::config::{self, Cli, FileConfig};
use assemblyfs::fs::AssemblyFs;
use assemblyfs::url_lookup::UrlLookup;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let file_config = match &cli.config {
        Some(path) => FileConfig::load(path)?,
        None => FileConfig::default(),
    };
    let cache_config = config::resolve_cache_config(&cli, &file_config);

    let catalog_file = File::open(&cli.catalog)?;
    let index = Arc::new(Index::build(catalog_file)?);
    tracing::info!(catalog = %cli.catalog.display(), rows = index.row_count(), "catalog loaded");

    let url_lookup = Arc::new(UrlLookup::from_index(&index));
    let cache = DownloadCache::new(cache_config, url_lookup, Arc::new(HttpFetcher::new())).await?;

    std::fs::create_dir_all(&cli.mount_point)?;
    let rt_handle = tokio::runtime::Handle::current();
    let filesystem = AssemblyFs::new(index, cache, rt_handle);

    let options = vec![
        fuser::MountOption::RO,
        fuser::MountOption::FSName("assemblyfs".to_string()),
        fuser::MountOption::AutoUnmount,
    ];

    let mount_point = cli.mount_point.clone();
    tracing::info!(mount_point = %mount_point.display(), "mounting");
    tokio::task::spawn_blocking(move || fuser::mount2(filesystem, &mount_point, &options)).await??;

    Ok(())
}
