mod cli;
mod commands;
mod output;

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use hybrid_cache::{HybridCache, HybridCacheConfig, RedisStore, init_tracing_with_level, loader};

use cli::{Cli, Commands};
use output::print_error;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        print_error(&format!("{e:#}"));
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = resolve_config(&cli)?;
    init_tracing_with_level(&config.logging.level);

    let store = Arc::new(RedisStore::from_config(&config.redis));

    match &cli.command {
        Commands::Watch => {
            let cache: HybridCache = HybridCache::new(config.topic.as_str(), store)?;
            commands::watch::watch(cache).await?;
        }
        Commands::Get(args) => {
            let cache = commands::keys::one_shot(&config.topic, store)?;
            commands::keys::get(&cache, args).await?;
        }
        Commands::Put(args) => {
            commands::keys::put(&store, args).await?;
        }
        Commands::Invalidate(args) => {
            let cache = commands::keys::one_shot(&config.topic, store)?;
            commands::keys::invalidate(&cache, args).await?;
        }
        Commands::Update(args) => {
            let cache = commands::keys::one_shot(&config.topic, store)?;
            commands::keys::update(&cache, args).await?;
        }
    }

    Ok(())
}

/// Config file and environment first, then command-line overrides.
fn resolve_config(cli: &Cli) -> Result<HybridCacheConfig> {
    let mut config = loader::load_config(cli.config.as_deref())?;
    if let Some(topic) = &cli.topic {
        config.topic = topic.clone();
    }
    if let Some(url) = &cli.redis_url {
        config.redis.url = url.clone();
    }
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }
    config.validate()?;
    Ok(config)
}
