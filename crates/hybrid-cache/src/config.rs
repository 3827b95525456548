use serde::{Deserialize, Serialize};

use crate::error::CacheError;

pub use hybrid_cache_store::RedisConfig;

/// Settings for a Redis-backed [`crate::HybridCache`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HybridCacheConfig {
    /// Invalidation topic shared by every cache in the coherence group
    #[serde(default = "default_topic")]
    pub topic: String,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_topic() -> String {
    "hybrid-cache".into()
}

impl Default for HybridCacheConfig {
    fn default() -> Self {
        Self {
            topic: default_topic(),
            redis: RedisConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl HybridCacheConfig {
    pub fn validate(&self) -> Result<(), CacheError> {
        if self.topic.is_empty() {
            return Err(CacheError::configuration("topic must not be empty"));
        }
        if self.redis.url.is_empty() {
            return Err(CacheError::configuration("redis.url must not be empty"));
        }
        if self.redis.pool_size == 0 {
            return Err(CacheError::configuration("redis.pool_size must be > 0"));
        }
        if self.redis.timeout_ms == 0 {
            return Err(CacheError::configuration("redis.timeout_ms must be > 0"));
        }
        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(CacheError::configuration(format!(
                "logging.level must be one of {valid_levels:?}"
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

pub mod loader {
    use super::HybridCacheConfig;
    use crate::error::CacheError;
    use config::{Config, Environment, File};
    use std::path::{Path, PathBuf};

    pub const DEFAULT_CONFIG_FILE: &str = "hybrid-cache.toml";

    /// Loads configuration from an optional TOML file plus environment
    /// overrides, then validates it.
    ///
    /// Without an explicit path, `hybrid-cache.toml` in the working directory
    /// is used when present. A missing file is not an error.
    pub fn load_config(path: Option<&str>) -> Result<HybridCacheConfig, CacheError> {
        let mut builder = Config::builder();
        let file = PathBuf::from(path.unwrap_or(DEFAULT_CONFIG_FILE));
        if file.exists() {
            builder = builder.add_source(File::from(file));
        }
        // e.g. HYBRID_CACHE__REDIS__URL=redis://cache:6379
        builder = builder.add_source(
            Environment::with_prefix("HYBRID_CACHE")
                .try_parsing(true)
                .separator("__"),
        );
        let cfg = builder
            .build()
            .map_err(|e| CacheError::configuration(format!("config build error: {e}")))?;
        let merged: HybridCacheConfig = cfg
            .try_deserialize()
            .map_err(|e| CacheError::configuration(format!("config deserialize error: {e}")))?;
        merged.validate()?;
        Ok(merged)
    }

    pub fn load_config_from_path<P: AsRef<Path>>(
        path: Option<P>,
    ) -> Result<HybridCacheConfig, CacheError> {
        let p = path
            .as_ref()
            .map(|p| p.as_ref().to_string_lossy().to_string());
        load_config(p.as_deref())
    }
}
