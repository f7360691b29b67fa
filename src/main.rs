//! tiered-blob-cache: command-line driver for the two-tier string cache.
//!
//! Each invocation opens the cache described by the config file, runs one
//! command against it and closes it again, so values persist between runs
//! through the disk tier.

use clap::Parser;
use tracing::info;

use tiered_blob_cache::config::{Cli, Command, Config};
use tiered_blob_cache::CacheContext;

fn main() -> anyhow::Result<()> {
    // Parse CLI arguments.
    let cli = Cli::parse();

    // Initialize tracing/logging.
    let filter = if cli.verbose {
        "tiered_blob_cache=debug"
    } else {
        "tiered_blob_cache=warn"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    info!("tiered-blob-cache v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration.
    let mut config = Config::load(&cli.config)?;
    if let Some(dir) = cli.dir {
        config.disk.path = dir;
    }

    info!(
        dir = %config.disk.path.display(),
        memory_budget = config.memory.max_bytes,
        disk_budget = config.disk.max_bytes,
        disk_count = config.disk.max_count,
        strategy = %config.memory.strategy(),
        "Configuration loaded"
    );

    let cache = CacheContext::open(config)?;

    let mut found = true;
    match cli.command {
        Command::Put { key, value } => cache.put(&key, &value),
        Command::Get { key, max_age } => {
            let value = match max_age {
                Some(minutes) => cache.get_with_max_age(&key, minutes),
                None => cache.get(&key),
            };
            match value {
                Some(value) => println!("{value}"),
                None => found = false,
            }
        }
        Command::Remove { key } => cache.remove(&key),
        Command::Clear => cache.clear(),
        Command::Stats => {
            let stats = serde_json::json!({
                "cache": cache.stats(),
                "disk": cache.store_stats(),
            });
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
    }

    cache.close();
    if !found {
        std::process::exit(1);
    }
    Ok(())
}
