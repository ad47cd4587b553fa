//! Testing utilities for Strata workspace
//!
//! Fault-injecting stores and contract fixtures.

#![allow(missing_docs)]

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{Duration, Utc};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use strata_core::{BlobPath, MaterializationContract, MaterializationType, Tags};
use strata_store::{
    BlobInfo, BlobStore, MemoryStateBackend, StateBackend, StoreError, StoreResult, StoredState,
};

/// How a failing store misbehaves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    /// Every call returns an error
    Error,
    /// Writes report `false`, reads find nothing
    Reject,
}

/// State backend that never works
#[derive(Debug)]
pub struct FailingStateBackend {
    failure: Failure,
    calls: AtomicUsize,
}

impl FailingStateBackend {
    #[must_use]
    pub fn erroring() -> Self {
        Self {
            failure: Failure::Error,
            calls: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub fn rejecting() -> Self {
        Self {
            failure: Failure::Reject,
            calls: AtomicUsize::new(0),
        }
    }

    /// Calls received so far
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }

    fn fail<T>(&self, rejected: T) -> StoreResult<T> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        match self.failure {
            Failure::Error => Err(StoreError::Unavailable("injected failure".to_string())),
            Failure::Reject => Ok(rejected),
        }
    }
}

#[async_trait]
impl StateBackend for FailingStateBackend {
    async fn store_state(&self, _: &str, _: Value, _: Tags, _: u64) -> StoreResult<bool> {
        self.fail(false)
    }

    async fn store_state_if_version(
        &self,
        _: &str,
        _: Value,
        _: Tags,
        _: u64,
        _: u64,
    ) -> StoreResult<bool> {
        self.fail(false)
    }

    async fn retrieve_state(&self, _: &str) -> StoreResult<Option<StoredState>> {
        self.fail(None)
    }

    async fn delete_state(&self, _: &str) -> StoreResult<bool> {
        self.fail(false)
    }

    async fn list_states(&self, _: &Tags, _: usize) -> StoreResult<Vec<String>> {
        self.fail(Vec::new())
    }
}

/// Memory backend that can be switched into failure at runtime
#[derive(Debug, Default)]
pub struct FlakyStateBackend {
    inner: MemoryStateBackend,
    failing: AtomicBool,
}

impl FlakyStateBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Relaxed);
    }

    /// Underlying store, for assertions
    #[must_use]
    pub fn inner(&self) -> &MemoryStateBackend {
        &self.inner
    }

    fn check(&self) -> StoreResult<()> {
        if self.failing.load(Ordering::Relaxed) {
            Err(StoreError::Backend("backend switched off".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl StateBackend for FlakyStateBackend {
    async fn store_state(
        &self,
        state_id: &str,
        payload: Value,
        tags: Tags,
        ttl_seconds: u64,
    ) -> StoreResult<bool> {
        self.check()?;
        self.inner.store_state(state_id, payload, tags, ttl_seconds).await
    }

    async fn store_state_if_version(
        &self,
        state_id: &str,
        payload: Value,
        tags: Tags,
        ttl_seconds: u64,
        expected_version: u64,
    ) -> StoreResult<bool> {
        self.check()?;
        self.inner
            .store_state_if_version(state_id, payload, tags, ttl_seconds, expected_version)
            .await
    }

    async fn retrieve_state(&self, state_id: &str) -> StoreResult<Option<StoredState>> {
        self.check()?;
        self.inner.retrieve_state(state_id).await
    }

    async fn delete_state(&self, state_id: &str) -> StoreResult<bool> {
        self.check()?;
        self.inner.delete_state(state_id).await
    }

    async fn list_states(&self, filter_tags: &Tags, limit: usize) -> StoreResult<Vec<String>> {
        self.check()?;
        self.inner.list_states(filter_tags, limit).await
    }
}

/// Memory backend that yields to the scheduler before every call
///
/// Shared between several surfaces it stands in for a remote store: tasks
/// joined on one thread interleave at each backend round trip.
#[derive(Debug, Default)]
pub struct YieldingStateBackend {
    inner: MemoryStateBackend,
}

impl YieldingStateBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateBackend for YieldingStateBackend {
    async fn store_state(
        &self,
        state_id: &str,
        payload: Value,
        tags: Tags,
        ttl_seconds: u64,
    ) -> StoreResult<bool> {
        tokio::task::yield_now().await;
        self.inner.store_state(state_id, payload, tags, ttl_seconds).await
    }

    async fn store_state_if_version(
        &self,
        state_id: &str,
        payload: Value,
        tags: Tags,
        ttl_seconds: u64,
        expected_version: u64,
    ) -> StoreResult<bool> {
        tokio::task::yield_now().await;
        self.inner
            .store_state_if_version(state_id, payload, tags, ttl_seconds, expected_version)
            .await
    }

    async fn retrieve_state(&self, state_id: &str) -> StoreResult<Option<StoredState>> {
        tokio::task::yield_now().await;
        self.inner.retrieve_state(state_id).await
    }

    async fn delete_state(&self, state_id: &str) -> StoreResult<bool> {
        tokio::task::yield_now().await;
        self.inner.delete_state(state_id).await
    }

    async fn list_states(&self, filter_tags: &Tags, limit: usize) -> StoreResult<Vec<String>> {
        tokio::task::yield_now().await;
        self.inner.list_states(filter_tags, limit).await
    }
}

/// Blob store that never works
#[derive(Debug)]
pub struct FailingBlobStore {
    failure: Failure,
}

impl FailingBlobStore {
    #[must_use]
    pub fn erroring() -> Self {
        Self {
            failure: Failure::Error,
        }
    }

    #[must_use]
    pub fn rejecting() -> Self {
        Self {
            failure: Failure::Reject,
        }
    }

    fn fail<T>(&self, rejected: T) -> StoreResult<T> {
        match self.failure {
            Failure::Error => Err(StoreError::Unavailable("injected blob failure".to_string())),
            Failure::Reject => Ok(rejected),
        }
    }
}

#[async_trait]
impl BlobStore for FailingBlobStore {
    async fn upload(&self, _: &BlobPath, _: Bytes) -> StoreResult<bool> {
        self.fail(false)
    }

    async fn download(&self, _: &BlobPath) -> StoreResult<Option<Bytes>> {
        self.fail(None)
    }

    async fn delete(&self, _: &BlobPath) -> StoreResult<bool> {
        self.fail(false)
    }

    async fn list(&self, _: &str) -> StoreResult<Vec<BlobInfo>> {
        self.fail(Vec::new())
    }
}

/// Contract that expired `minutes_ago` minutes ago
pub fn expired_contract(id: &str, tenant_id: &str, minutes_ago: i64) -> MaterializationContract {
    MaterializationContract::new(
        id,
        tenant_id,
        MaterializationType::FullArtifact,
        Utc::now() - Duration::minutes(minutes_ago),
    )
}

/// Expired full-artifact contract over the blob at `path`, linked to `file_id`
pub fn expired_artifact_contract(
    id: &str,
    tenant_id: &str,
    file_id: &str,
    path: &BlobPath,
) -> MaterializationContract {
    expired_contract(id, tenant_id, 5)
        .with_storage_path(path)
        .with_file_id(file_id)
}

/// Contract that expires `minutes_ahead` minutes from now
pub fn active_contract(id: &str, tenant_id: &str, minutes_ahead: i64) -> MaterializationContract {
    MaterializationContract::new(
        id,
        tenant_id,
        MaterializationType::FullArtifact,
        Utc::now() + Duration::minutes(minutes_ahead),
    )
}

pub fn blob_path(raw: &str) -> BlobPath {
    raw.parse().unwrap()
}

pub fn tags(pairs: &[(&str, &str)]) -> Tags {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect()
}
