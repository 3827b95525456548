use hybrid_cache_store::StoreError;
use thiserror::Error;

/// Error types for cache coordinator operations
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Expected a non-empty topic name")]
    InvalidTopic,

    #[error("Event name must be \"invalidate\", got \"{0}\"")]
    UnsupportedEvent(String),

    #[error("Cache was unsubscribed and cannot subscribe again")]
    Unsubscribed,

    #[error("Shared store error: {0}")]
    Store(#[from] StoreError),

    #[error("JSON serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl CacheError {
    /// Create a new UnsupportedEvent error
    pub fn unsupported_event(name: impl Into<String>) -> Self {
        Self::UnsupportedEvent(name.into())
    }

    /// Create a new Configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Check if this error is a programmer error rather than a runtime failure
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            Self::InvalidTopic | Self::UnsupportedEvent(_) | Self::Unsubscribed
        )
    }
}

/// Result type alias for cache operations
pub type Result<T> = std::result::Result<T, CacheError>;
