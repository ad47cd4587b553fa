//! Error types for the state surface
//!
//! Missing data is never an error here: reads return `Ok(None)`. Errors are
//! reserved for:
//! - malformed identifiers
//! - blob store failures (no fallback exists for bytes)
//! - stored payloads that no longer decode
//! - lineage invariant violations

use strata_core::CoreError;
use strata_store::StoreError;

/// Main surface error type
#[derive(Debug, thiserror::Error)]
pub enum SurfaceError {
    /// No blob store configured
    #[error("blob store unavailable: {0}")]
    BlobStoreUnavailable(String),

    /// Blob store failed on read, write or delete
    #[error("blob store error: {0}")]
    Blob(#[source] StoreError),

    /// Blob store refused an upload
    #[error("blob write rejected for {path}")]
    BlobWriteRejected { path: String },

    /// Malformed key, ref id or path
    #[error("invalid reference: {0}")]
    InvalidReference(#[from] CoreError),

    /// Stored payload did not decode into the requested record
    #[error("corrupt state at {key}: {reason}")]
    CorruptState { key: String, reason: String },

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),
}

impl SurfaceError {
    /// Check if error comes from the blob store
    #[inline]
    #[must_use]
    pub fn is_blob_failure(&self) -> bool {
        matches!(
            self,
            Self::BlobStoreUnavailable(_) | Self::Blob(_) | Self::BlobWriteRejected { .. }
        )
    }

    /// Check if error is retryable
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Blob(inner) => inner.is_retryable(),
            Self::BlobWriteRejected { .. } => true,
            _ => false,
        }
    }
}

/// Lineage graph errors
#[derive(Debug, thiserror::Error)]
pub enum LineageError {
    /// Fact does not exist
    #[error("lineage fact not found: {file_id} ({tenant_id})")]
    NotFound { file_id: String, tenant_id: String },

    /// A different fact is already recorded for this file
    #[error("lineage already recorded for {0} with different type or parent")]
    AlreadyRecorded(String),

    /// Parent not allowed for this file
    #[error("invalid parent for {file_id}: {reason}")]
    InvalidParent { file_id: String, reason: String },

    /// Child already derives from another file
    #[error("{child} already has parent {existing}, cannot link to {requested}")]
    ParentConflict {
        child: String,
        existing: String,
        requested: String,
    },

    /// Link would make a file its own ancestor
    #[error("cycle detected: {path:?}")]
    CycleDetected { path: Vec<String> },

    /// File linked to itself
    #[error("file cannot be linked to itself: {0}")]
    SelfLink(String),

    /// Stored fact changed between read and write
    #[error("version conflict on {file_id}: expected {expected}, found {found}")]
    VersionConflict {
        file_id: String,
        expected: u64,
        found: u64,
    },

    /// Underlying surface failure
    #[error("lineage storage error: {0}")]
    Storage(#[from] SurfaceError),
}

impl LineageError {
    #[inline]
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Violations of the forest invariant
    #[inline]
    #[must_use]
    pub fn is_invariant_violation(&self) -> bool {
        matches!(
            self,
            Self::InvalidParent { .. }
                | Self::ParentConflict { .. }
                | Self::CycleDetected { .. }
                | Self::SelfLink(_)
        )
    }
}
