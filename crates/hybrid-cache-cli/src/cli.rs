use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "hybrid-cache")]
#[command(about = "Inspect and invalidate hybrid-cache topics on Redis")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to a TOML config file (defaults to ./hybrid-cache.toml)
    #[arg(short, long, global = true, env = "HYBRID_CACHE_CONFIG")]
    pub config: Option<String>,

    /// Invalidation topic (overrides config)
    #[arg(short, long, global = true)]
    pub topic: Option<String>,

    /// Redis URL (overrides config)
    #[arg(long, global = true, env = "REDIS_URL")]
    pub redis_url: Option<String>,

    /// Log level (overrides config)
    #[arg(long, global = true)]
    pub log_level: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Print every invalidation published on the topic until Ctrl-C
    Watch,
    /// Read a value from the shared store
    Get(KeyArgs),
    /// Write a value to the shared store without notifying peers
    Put(ValueArgs),
    /// Evict a key from every subscribed cache
    Invalidate(KeyArgs),
    /// Replace a key in every subscribed cache
    Update(ValueArgs),
}

#[derive(clap::Args)]
pub struct KeyArgs {
    /// Cache key
    pub key: String,
}

#[derive(clap::Args)]
pub struct ValueArgs {
    /// Cache key
    pub key: String,
    /// Value as JSON; anything that isn't valid JSON is sent as a string
    pub value: String,
    /// Expiry in milliseconds (0 or absent: never expires)
    #[arg(long)]
    pub ttl_ms: Option<u64>,
}
