use std::sync::Arc;

use anyhow::{Context, Result};
use hybrid_cache::{HybridCache, RedisStore, SharedStore};

use super::{parse_value, ttl};
use crate::cli::{KeyArgs, ValueArgs};
use crate::output::{print_success, print_value};

pub async fn get(cache: &HybridCache, args: &KeyArgs) -> Result<()> {
    match cache.get_durable(&args.key).await? {
        Some(value) => print_value(&value),
        None => anyhow::bail!("Key not found: {}", args.key),
    }
    Ok(())
}

/// Writes straight to the shared store and waits for the reply; a detached
/// write would be lost when the process exits.
pub async fn put(store: &RedisStore, args: &ValueArgs) -> Result<()> {
    let value = parse_value(&args.value);
    let serialized = serde_json::to_string(&value)?;
    store
        .set(&args.key, &serialized, ttl(args.ttl_ms))
        .await
        .with_context(|| format!("failed to write {}", args.key))?;
    print_success(&format!("Stored {}", args.key));
    Ok(())
}

pub async fn invalidate(cache: &HybridCache, args: &KeyArgs) -> Result<()> {
    cache.invalidate(args.key.as_str()).await?;
    print_success(&format!(
        "Published invalidation of {} on {}",
        args.key,
        cache.topic()
    ));
    Ok(())
}

pub async fn update(cache: &HybridCache, args: &ValueArgs) -> Result<()> {
    let value = parse_value(&args.value);
    cache
        .invalidate_and_update(args.key.as_str(), value, ttl(args.ttl_ms))
        .await?;
    print_success(&format!(
        "Published update of {} on {}",
        args.key,
        cache.topic()
    ));
    Ok(())
}

/// An unsubscribed cache over `store`, enough for one-shot commands.
pub fn one_shot(topic: &str, store: Arc<RedisStore>) -> Result<HybridCache> {
    Ok(HybridCache::new(topic, store)?)
}
