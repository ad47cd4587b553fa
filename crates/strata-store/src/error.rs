//! Error types for storage protocols

/// Result type for storage operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Storage-layer errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Record absent where the operation requires it
    #[error("record not found: {0}")]
    NotFound(String),

    /// Store not reachable or not configured
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Store reported a failure
    #[error("backend error: {0}")]
    Backend(String),

    /// Concurrent modification or invariant clash
    #[error("conflict: {0}")]
    Conflict(String),

    /// Payload could not be encoded or decoded
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Check if error is a missing record
    #[inline]
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Check if retrying later may succeed
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Backend(_) | Self::Conflict(_))
    }
}
