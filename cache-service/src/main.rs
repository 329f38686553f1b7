//! Standalone process entry point: load configuration, wire up both
//! drivers, and keep them alive until the process is asked to stop.
//!
//! There is deliberately no HTTP listener here — the request schema and
//! transport are out of scope for this workspace. What ships is the piece a
//! transport would be built on top of: a running [`cache_service::Engine`]
//! reachable by a shell that embeds this crate as a library.

use clap::Parser;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "cache-nest", about = "Standalone cache engine process")]
struct Args {
    /// Path to a TOML configuration file; falls back to compiled-in
    /// defaults and CACHE_-prefixed environment variables.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let _recorder = metrics_prometheus::install();

    let args = Args::parse();
    info!(config = ?args.config, "loading cache engine configuration");
    let engine = cache_service::bootstrap(args.config.as_deref())?;
    info!("cache engine ready");

    let memory_usage = engine.memory.resource_usage();
    let disk_usage = engine.disk.resource_usage();
    info!(
        memory_entries = memory_usage.total_entries,
        disk_entries = disk_usage.total_entries,
        "initial resource usage"
    );

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received, exiting");
    Ok(())
}
