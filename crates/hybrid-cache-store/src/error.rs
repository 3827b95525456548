//! Error types for the shared store boundary.

/// Errors that can occur while talking to the shared store or its bus.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Failed to obtain a pooled connection.
    #[error("Redis pool error: {0}")]
    Pool(String),

    /// Failed to open a connection to the store.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The SUBSCRIBE handshake was not acknowledged.
    #[error("Subscribe error: {0}")]
    Subscribe(String),

    /// A PUBLISH was rejected.
    #[error("Publish error: {0}")]
    Publish(String),

    /// A GET or SET command failed.
    #[error("Command error: {0}")]
    Command(String),
}

impl StoreError {
    /// Creates a new `Pool` error.
    #[must_use]
    pub fn pool(message: impl Into<String>) -> Self {
        Self::Pool(message.into())
    }

    /// Creates a new `Connection` error.
    #[must_use]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection(message.into())
    }

    /// Creates a new `Subscribe` error.
    #[must_use]
    pub fn subscribe(message: impl Into<String>) -> Self {
        Self::Subscribe(message.into())
    }

    /// Creates a new `Publish` error.
    #[must_use]
    pub fn publish(message: impl Into<String>) -> Self {
        Self::Publish(message.into())
    }

    /// Creates a new `Command` error.
    #[must_use]
    pub fn command(message: impl Into<String>) -> Self {
        Self::Command(message.into())
    }

    /// Returns true if retrying later could succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Pool(_) | Self::Connection(_))
    }
}
