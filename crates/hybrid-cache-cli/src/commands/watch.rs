use anyhow::Result;
use colored::Colorize;
use hybrid_cache::HybridCache;

use crate::output::print_invalidation;

pub async fn watch(cache: HybridCache) -> Result<()> {
    cache.on("invalidate", print_invalidation)?;
    cache.subscribe().await?;
    println!(
        "{} {} (Ctrl-C to stop)",
        "Watching".cyan(),
        cache.topic()
    );

    tokio::signal::ctrl_c().await?;
    cache.unsubscribe().await?;
    tracing::info!(stats = ?cache.stats().await, "watch stopped");
    Ok(())
}
