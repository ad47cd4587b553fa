//! Error types for the core model

use crate::hash::DigestError;
use crate::path::PathError;

/// Parse and validation errors for core identifiers
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Malformed `{kind}:{tenant}:{resource}` key
    #[error("invalid state key: {0}")]
    InvalidKey(String),

    /// Unknown state kind prefix
    #[error("unknown state kind: {0}")]
    UnknownKind(String),

    /// Malformed `file:{tenant}:{session}:{uuid}` id
    #[error("invalid file reference id: {0}")]
    InvalidRefId(String),

    /// Bad blob path
    #[error("invalid blob path: {0}")]
    Path(#[from] PathError),

    /// Bad content digest
    #[error("invalid content digest: {0}")]
    Digest(#[from] DigestError),

    /// Payload did not match the expected variant
    #[error("payload mismatch: expected {expected}, found {found}")]
    PayloadMismatch {
        expected: &'static str,
        found: &'static str,
    },

    /// Payload (de)serialization failed
    #[error("payload serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
