//! TTL enforcement errors

use strata_store::StoreError;

/// Errors that abort a sweep
///
/// Failures on a single contract never abort; they are collected in
/// [`SweepReport::errors`](crate::SweepReport::errors).
#[derive(Debug, thiserror::Error)]
pub enum TtlError {
    /// Expired contracts could not be listed
    #[error("contract query failed: {0}")]
    ContractQuery(#[source] StoreError),
}

impl TtlError {
    /// Check if the next scheduled sweep may succeed
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ContractQuery(inner) => inner.is_retryable(),
        }
    }
}
