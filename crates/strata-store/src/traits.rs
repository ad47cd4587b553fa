//! Protocols the surface and the TTL job require from their collaborators

use crate::StoreResult;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde_json::Value;
use strata_core::{BlobPath, MaterializationContract, Metadata, Tags};

/// Payload and tags as returned by a state backend
#[derive(Debug, Clone, PartialEq)]
pub struct StoredState {
    pub payload: Value,
    pub tags: Tags,
}

/// Namespaced key -> payload store with per-key TTL
///
/// Keys are `{kind}:{tenant_id}:{resource_id}`. `ttl_seconds == 0` means
/// the entry never expires. Tags are for filtering and observability only.
#[async_trait]
pub trait StateBackend: Send + Sync {
    /// Write or overwrite an entry; `Ok(false)` means the store refused it
    async fn store_state(
        &self,
        state_id: &str,
        payload: Value,
        tags: Tags,
        ttl_seconds: u64,
    ) -> StoreResult<bool>;

    /// Write only if the stored entry is still at `expected_version`
    ///
    /// The check and the write must be one atomic step. A missing entry, or
    /// one without a numeric `version` field, is at version 0. `Ok(false)`
    /// means another writer got there first and nothing was written.
    async fn store_state_if_version(
        &self,
        state_id: &str,
        payload: Value,
        tags: Tags,
        ttl_seconds: u64,
        expected_version: u64,
    ) -> StoreResult<bool>;

    /// Read an unexpired entry
    async fn retrieve_state(&self, state_id: &str) -> StoreResult<Option<StoredState>>;

    /// Remove an entry; `Ok(false)` means it was absent
    async fn delete_state(&self, state_id: &str) -> StoreResult<bool>;

    /// Keys of unexpired entries carrying every tag in `filter_tags`
    async fn list_states(&self, filter_tags: &Tags, limit: usize) -> StoreResult<Vec<String>>;
}

/// `version` field of a stored payload, 0 when absent
#[must_use]
pub fn payload_version(payload: &Value) -> u64 {
    payload
        .get("version")
        .and_then(Value::as_u64)
        .unwrap_or(0)
}

/// One listed blob
#[derive(Debug, Clone, PartialEq)]
pub struct BlobInfo {
    pub path: BlobPath,
    pub size: u64,
    pub metadata: Metadata,
}

/// Content store addressed by bucket-relative path
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store bytes at `path`, replacing any previous content
    async fn upload(&self, path: &BlobPath, bytes: Bytes) -> StoreResult<bool>;

    /// Fetch bytes; `Ok(None)` when nothing is stored at `path`
    async fn download(&self, path: &BlobPath) -> StoreResult<Option<Bytes>>;

    /// Remove bytes; `Ok(false)` means nothing was there
    async fn delete(&self, path: &BlobPath) -> StoreResult<bool>;

    /// Blobs whose path lies under `prefix`
    async fn list(&self, prefix: &str) -> StoreResult<Vec<BlobInfo>>;
}

/// Source of materialization contracts for TTL enforcement
#[async_trait]
pub trait ContractStore: Send + Sync {
    /// Active contracts with `expires_at <= before`
    async fn list_expired(&self, before: DateTime<Utc>) -> StoreResult<Vec<MaterializationContract>>;

    /// Transition a contract to expired
    async fn mark_expired(
        &self,
        contract_id: &str,
        tenant_id: &str,
        expired_at: DateTime<Utc>,
    ) -> StoreResult<()>;

    /// Stamp `source_expired_at` on lineage derived from `source_file_id`
    async fn mark_lineage_expired(
        &self,
        source_file_id: &str,
        tenant_id: &str,
        expired_at: DateTime<Utc>,
    ) -> StoreResult<usize>;
}

/// Receiver for lineage expiry stamps
///
/// Lets a contract store delegate `mark_lineage_expired` to whatever owns
/// the lineage facts.
#[async_trait]
pub trait LineageExpirySink: Send + Sync {
    /// Stamp the fact; returns the number of facts changed
    async fn stamp_source_expired(
        &self,
        file_id: &str,
        tenant_id: &str,
        expired_at: DateTime<Utc>,
    ) -> StoreResult<usize>;
}
