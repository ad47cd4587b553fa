//! State surface facade
//!
//! One entry point for execution state, session state and file references.
//! State writes go through the [`StateRouter`](crate::router) and never fail
//! because of the backing store. File bytes go to the blob store, which has
//! no fallback.

use crate::config::{SurfaceConfig, SurfaceMode};
use crate::error::SurfaceError;
use crate::router::{StateRouter, WriteRoute};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use strata_core::{
    BlobPath, ContentDigest, ExecutionState, FileRefId, FileReference, Metadata, SessionState,
    StateKey, StateKind, StatePayload, StateRecord,
};
use strata_store::{BlobStore, MemoryStateBackend, StateBackend};

/// Surface result type
pub type SurfaceResult<T> = Result<T, SurfaceError>;

/// Bytes already written to the blob store by the caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobLocation {
    pub path: BlobPath,
    pub content_hash: ContentDigest,
    pub size: u64,
}

/// Point-in-time view of surface health
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SurfaceHealth {
    pub mode: SurfaceMode,
    pub backend_configured: bool,
    pub blob_store_configured: bool,
    /// Entries held by the fallback, expired ones included until purged
    pub fallback_entries: usize,
    /// Operations that fell back since startup
    pub degraded_operations: u64,
    /// Deletes made during an outage, not yet applied to the backend
    pub pending_deletes: usize,
}

impl SurfaceHealth {
    /// Backed mode running on its backend without degradation
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        match self.mode {
            SurfaceMode::MemoryOnly => true,
            SurfaceMode::Backed => {
                self.backend_configured
                    && self.degraded_operations == 0
                    && self.pending_deletes == 0
            }
        }
    }
}

/// Unified state and file-reference access
pub struct StateSurface {
    config: SurfaceConfig,
    router: StateRouter,
    blobs: Option<Arc<dyn BlobStore>>,
}

impl StateSurface {
    /// Surface with a fresh fallback and no backends attached
    #[must_use]
    pub fn new(config: SurfaceConfig) -> Self {
        let router = StateRouter::new(config.mode, Arc::new(MemoryStateBackend::new()));
        Self {
            config,
            router,
            blobs: None,
        }
    }

    /// Memory-only surface with default TTLs
    #[must_use]
    pub fn memory_only() -> Self {
        Self::new(SurfaceConfig::memory_only())
    }

    /// Attach the backing state store
    #[must_use]
    pub fn with_state_backend(mut self, backend: Arc<dyn StateBackend>) -> Self {
        self.router.set_backend(backend);
        self
    }

    /// Attach the blob store
    #[must_use]
    pub fn with_blob_store(mut self, blobs: Arc<dyn BlobStore>) -> Self {
        self.blobs = Some(blobs);
        self
    }

    /// Share a fallback store between surfaces
    #[must_use]
    pub fn with_fallback(mut self, fallback: Arc<MemoryStateBackend>) -> Self {
        self.router.set_fallback(fallback);
        self
    }

    #[inline]
    #[must_use]
    pub fn config(&self) -> &SurfaceConfig {
        &self.config
    }

    #[inline]
    #[must_use]
    pub fn fallback(&self) -> &Arc<MemoryStateBackend> {
        self.router.fallback()
    }

    #[must_use]
    pub fn health(&self) -> SurfaceHealth {
        SurfaceHealth {
            mode: self.config.mode,
            backend_configured: self.router.has_backend(),
            blob_store_configured: self.blobs.is_some(),
            fallback_entries: self.router.fallback().len(),
            degraded_operations: self.router.degraded_operations(),
            pending_deletes: self.router.pending_deletes(),
        }
    }

    /// Evict expired fallback entries
    pub fn purge_fallback(&self, now: DateTime<Utc>) -> usize {
        self.router.fallback().purge_expired(now)
    }

    // ------------------------------------------------------------------
    // Raw state
    // ------------------------------------------------------------------

    /// Read a payload
    ///
    /// # Errors
    /// Returns [`SurfaceError::InvalidReference`] for a malformed key.
    pub async fn get_state(
        &self,
        kind: StateKind,
        tenant_id: &str,
        resource_id: &str,
    ) -> SurfaceResult<Option<Value>> {
        let key = StateKey::new(kind, tenant_id, resource_id)?;
        Ok(self
            .router
            .read(&key.to_string())
            .await
            .map(|stored| stored.payload))
    }

    /// Write a payload; `ttl_seconds` of `None` applies the kind's policy
    ///
    /// # Errors
    /// Returns [`SurfaceError::InvalidReference`] for a malformed key.
    pub async fn set_state(
        &self,
        kind: StateKind,
        tenant_id: &str,
        resource_id: &str,
        payload: Value,
        ttl_seconds: Option<u64>,
    ) -> SurfaceResult<WriteRoute> {
        let key = StateKey::new(kind, tenant_id, resource_id)?;
        Ok(self.write_at(&key, payload, ttl_seconds).await)
    }

    /// Delete a payload; `false` if nothing was stored
    ///
    /// # Errors
    /// Returns [`SurfaceError::InvalidReference`] for a malformed key.
    pub async fn delete_state(
        &self,
        kind: StateKind,
        tenant_id: &str,
        resource_id: &str,
    ) -> SurfaceResult<bool> {
        let key = StateKey::new(kind, tenant_id, resource_id)?;
        Ok(self.router.delete(&key.to_string()).await)
    }

    /// Resource ids stored under `(kind, tenant_id)`, sorted
    ///
    /// # Errors
    /// Returns [`SurfaceError::InvalidReference`] for a malformed tenant.
    pub async fn list_ids(
        &self,
        kind: StateKind,
        tenant_id: &str,
        limit: usize,
    ) -> SurfaceResult<Vec<String>> {
        // validates the tenant
        StateKey::new(kind, tenant_id, "_")?;
        let prefix = StateKey::namespace_prefix(kind, tenant_id);
        Ok(self
            .router
            .list(kind, tenant_id, limit)
            .await
            .into_iter()
            .filter_map(|state_id| state_id.strip_prefix(&prefix).map(str::to_string))
            .collect())
    }

    async fn write_at(&self, key: &StateKey, payload: Value, ttl_seconds: Option<u64>) -> WriteRoute {
        let ttl = ttl_seconds.unwrap_or_else(|| self.config.ttl.for_kind(key.kind()));
        let route = self.router.write(key, payload, ttl).await;
        tracing::trace!("Wrote {} via {:?} (ttl {}s)", key, route, ttl);
        route
    }

    // ------------------------------------------------------------------
    // Typed records
    // ------------------------------------------------------------------

    /// Write a typed record under its kind's namespace
    ///
    /// # Errors
    /// Fails on a malformed key or if the record cannot be encoded.
    pub async fn set_record<T: StateRecord>(
        &self,
        tenant_id: &str,
        resource_id: &str,
        record: T,
        ttl_seconds: Option<u64>,
    ) -> SurfaceResult<WriteRoute> {
        let key = StateKey::new(T::KIND, tenant_id, resource_id)?;
        self.set_record_at(&key, record, ttl_seconds).await
    }

    /// Read a typed record
    ///
    /// # Errors
    /// Returns [`SurfaceError::CorruptState`] if the stored payload is not
    /// a `T`.
    pub async fn get_record<T: StateRecord>(
        &self,
        tenant_id: &str,
        resource_id: &str,
    ) -> SurfaceResult<Option<T>> {
        let key = StateKey::new(T::KIND, tenant_id, resource_id)?;
        self.get_record_at(&key).await
    }

    async fn set_record_at<T: StateRecord>(
        &self,
        key: &StateKey,
        record: T,
        ttl_seconds: Option<u64>,
    ) -> SurfaceResult<WriteRoute> {
        let payload = record
            .into_payload()
            .to_value()
            .map_err(|e| corrupt(key, &e))?;
        Ok(self.write_at(key, payload, ttl_seconds).await)
    }

    /// Write a record only if the stored copy is still at `expected_version`
    ///
    /// Returns `false`, writing nothing, when another writer moved the
    /// version on.
    pub(crate) async fn set_record_if_version<T: StateRecord>(
        &self,
        tenant_id: &str,
        resource_id: &str,
        record: T,
        expected_version: u64,
    ) -> SurfaceResult<bool> {
        let key = StateKey::new(T::KIND, tenant_id, resource_id)?;
        let payload = record
            .into_payload()
            .to_value()
            .map_err(|e| corrupt(&key, &e))?;
        let ttl = self.config.ttl.for_kind(key.kind());
        let route = self
            .router
            .write_if_version(&key, payload, ttl, expected_version)
            .await;
        tracing::trace!("Conditional write of {} via {:?}", key, route);
        Ok(route.is_some())
    }

    async fn get_record_at<T: StateRecord>(&self, key: &StateKey) -> SurfaceResult<Option<T>> {
        let Some(stored) = self.router.read(&key.to_string()).await else {
            return Ok(None);
        };
        StatePayload::from_value(stored.payload)
            .and_then(T::from_payload)
            .map(Some)
            .map_err(|e| corrupt(key, &e))
    }

    /// # Errors
    /// Returns [`SurfaceError::InvalidReference`] for a malformed tenant or id.
    pub async fn set_execution_state(
        &self,
        tenant_id: &str,
        mut state: ExecutionState,
    ) -> SurfaceResult<WriteRoute> {
        state.updated_at = Utc::now();
        let execution_id = state.execution_id.clone();
        self.set_record(tenant_id, &execution_id, state, None).await
    }

    /// # Errors
    /// Returns [`SurfaceError::CorruptState`] if the entry is not an execution.
    pub async fn get_execution_state(
        &self,
        tenant_id: &str,
        execution_id: &str,
    ) -> SurfaceResult<Option<ExecutionState>> {
        self.get_record(tenant_id, execution_id).await
    }

    /// # Errors
    /// Returns [`SurfaceError::InvalidReference`] for a malformed tenant or id.
    pub async fn set_session_state(
        &self,
        tenant_id: &str,
        mut state: SessionState,
    ) -> SurfaceResult<WriteRoute> {
        state.updated_at = Utc::now();
        let session_id = state.session_id.clone();
        self.set_record(tenant_id, &session_id, state, None).await
    }

    /// # Errors
    /// Returns [`SurfaceError::CorruptState`] if the entry is not a session.
    pub async fn get_session_state(
        &self,
        tenant_id: &str,
        session_id: &str,
    ) -> SurfaceResult<Option<SessionState>> {
        self.get_record(tenant_id, session_id).await
    }

    // ------------------------------------------------------------------
    // Files
    // ------------------------------------------------------------------

    fn blob_store(&self) -> SurfaceResult<&Arc<dyn BlobStore>> {
        self.blobs
            .as_ref()
            .ok_or_else(|| SurfaceError::BlobStoreUnavailable("no blob store configured".into()))
    }

    /// Upload bytes and record a reference to them
    ///
    /// The blob is written first; metadata is only recorded once the bytes
    /// exist, so a failed upload leaves nothing behind.
    ///
    /// # Errors
    /// Fails if no blob store is configured, the upload fails or is
    /// rejected, or the tenant or session id is malformed.
    pub async fn store_file(
        &self,
        tenant_id: &str,
        session_id: &str,
        bytes: impl Into<Bytes>,
        filename: &str,
        metadata: Metadata,
    ) -> SurfaceResult<FileRefId> {
        let blobs = self.blob_store()?;
        let ref_id = FileRefId::generate(tenant_id, session_id)?;
        let bytes = bytes.into();
        let location = BlobLocation {
            path: BlobPath::for_upload(tenant_id, session_id, ref_id.file_uuid(), filename),
            content_hash: ContentDigest::compute(&bytes),
            size: bytes.len() as u64,
        };

        match blobs.upload(&location.path, bytes).await {
            Ok(true) => {}
            Ok(false) => {
                return Err(SurfaceError::BlobWriteRejected {
                    path: location.path.to_string(),
                })
            }
            Err(err) => return Err(SurfaceError::Blob(err)),
        }

        tracing::info!(
            "Stored {} bytes for {} at {} ({})",
            location.size,
            ref_id,
            location.path,
            location.content_hash.short()
        );
        self.record_file(ref_id, location, filename, metadata).await
    }

    /// Record a reference to bytes the caller already stored
    ///
    /// # Errors
    /// Returns [`SurfaceError::InvalidReference`] for a malformed tenant or
    /// session id.
    pub async fn store_file_reference(
        &self,
        tenant_id: &str,
        session_id: &str,
        location: BlobLocation,
        filename: &str,
        metadata: Metadata,
    ) -> SurfaceResult<FileRefId> {
        let ref_id = FileRefId::generate(tenant_id, session_id)?;
        self.record_file(ref_id, location, filename, metadata).await
    }

    async fn record_file(
        &self,
        ref_id: FileRefId,
        location: BlobLocation,
        filename: &str,
        metadata: Metadata,
    ) -> SurfaceResult<FileRefId> {
        let reference = FileReference::new(
            ref_id.clone(),
            location.path,
            filename,
            location.content_hash,
            location.size,
            metadata,
        );
        self.set_record_at(&ref_id.state_key(), reference, None).await?;
        Ok(ref_id)
    }

    /// Reference record for `ref_id`; never contains the bytes
    ///
    /// # Errors
    /// Returns [`SurfaceError::CorruptState`] if the entry is not a file
    /// reference.
    pub async fn get_file_metadata(&self, ref_id: &FileRefId) -> SurfaceResult<Option<FileReference>> {
        self.get_record_at(&ref_id.state_key()).await
    }

    /// Download the bytes behind `ref_id`
    ///
    /// A reference whose blob has disappeared yields `Ok(None)` and a
    /// warning; it is not repaired.
    ///
    /// # Errors
    /// Fails if no blob store is configured or the download errors.
    pub async fn get_file(&self, ref_id: &FileRefId) -> SurfaceResult<Option<Bytes>> {
        let blobs = self.blob_store()?;
        let Some(reference) = self.get_file_metadata(ref_id).await? else {
            return Ok(None);
        };

        match blobs.download(&reference.storage_location).await {
            Ok(Some(bytes)) => Ok(Some(bytes)),
            Ok(None) => {
                tracing::warn!(
                    ref_id = %ref_id,
                    path = %reference.storage_location,
                    "Inconsistent file reference: blob missing"
                );
                Ok(None)
            }
            Err(err) => Err(SurfaceError::Blob(err)),
        }
    }

    /// Delete the bytes (best effort) and the reference
    ///
    /// Returns whether the reference existed.
    ///
    /// # Errors
    /// Returns [`SurfaceError::CorruptState`] if the entry is not a file
    /// reference.
    pub async fn delete_file(&self, ref_id: &FileRefId) -> SurfaceResult<bool> {
        let Some(reference) = self.get_file_metadata(ref_id).await? else {
            return Ok(false);
        };

        match &self.blobs {
            Some(blobs) => {
                if let Err(err) = blobs.delete(&reference.storage_location).await {
                    tracing::warn!(
                        "Blob delete failed for {} at {}: {}",
                        ref_id,
                        reference.storage_location,
                        err
                    );
                }
            }
            None => tracing::warn!("No blob store configured, leaving bytes for {}", ref_id),
        }

        Ok(self.router.delete(&ref_id.state_key().to_string()).await)
    }

    /// Merge `patch` into a reference's metadata; `null` values remove keys
    ///
    /// # Errors
    /// Returns [`SurfaceError::CorruptState`] if the entry is not a file
    /// reference.
    pub async fn update_file_metadata(
        &self,
        ref_id: &FileRefId,
        patch: Metadata,
    ) -> SurfaceResult<Option<FileReference>> {
        let Some(mut reference) = self.get_file_metadata(ref_id).await? else {
            return Ok(None);
        };
        reference.merge_metadata(patch);
        self.set_record_at(&ref_id.state_key(), reference.clone(), None)
            .await?;
        Ok(Some(reference))
    }

    /// File references stored for a tenant, ordered by ref id
    ///
    /// # Errors
    /// Fails on a malformed tenant or a corrupt entry.
    pub async fn list_files(&self, tenant_id: &str, limit: usize) -> SurfaceResult<Vec<FileReference>> {
        let ids = self.list_ids(StateKind::File, tenant_id, limit).await?;
        let mut files = Vec::with_capacity(ids.len());
        for id in ids {
            let key = StateKey::new(StateKind::File, tenant_id, id)?;
            // entries may expire between listing and reading
            if let Some(reference) = self.get_record_at(&key).await? {
                files.push(reference);
            }
        }
        Ok(files)
    }
}

impl std::fmt::Debug for StateSurface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateSurface")
            .field("config", &self.config)
            .field("router", &self.router)
            .field("blob_store", &self.blobs.is_some())
            .finish()
    }
}

fn corrupt(key: &StateKey, err: &strata_core::CoreError) -> SurfaceError {
    SurfaceError::CorruptState {
        key: key.to_string(),
        reason: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use strata_core::{ExecutionStatus, LineageFact, FileType};
    use strata_store::MemoryBlobStore;
    use strata_test_utils::{FailingBlobStore, FailingStateBackend};

    fn with_blobs() -> (StateSurface, Arc<MemoryBlobStore>) {
        let blobs = Arc::new(MemoryBlobStore::new());
        let surface = StateSurface::memory_only().with_blob_store(blobs.clone());
        (surface, blobs)
    }

    fn meta(pairs: &[(&str, Value)]) -> Metadata {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    #[tokio::test]
    async fn state_round_trip() {
        let surface = StateSurface::memory_only();
        surface
            .set_state(StateKind::Session, "acme", "s1", json!({"step": 2}), None)
            .await
            .unwrap();

        let read = surface.get_state(StateKind::Session, "acme", "s1").await.unwrap();
        assert_eq!(read, Some(json!({"step": 2})));
        assert_eq!(
            surface.get_state(StateKind::Session, "other", "s1").await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn policy_ttl_applied_when_unspecified() {
        let surface = StateSurface::memory_only();
        surface
            .set_state(StateKind::Execution, "acme", "e1", json!(1), None)
            .await
            .unwrap();
        surface
            .set_state(StateKind::Execution, "acme", "e2", json!(1), Some(5))
            .await
            .unwrap();

        let fallback = surface.fallback();
        assert_eq!(fallback.entry("execution:acme:e1").unwrap().ttl_seconds, 3600);
        assert_eq!(fallback.entry("execution:acme:e2").unwrap().ttl_seconds, 5);
    }

    #[tokio::test]
    async fn invalid_tenant_rejected() {
        let surface = StateSurface::memory_only();
        let err = surface
            .set_state(StateKind::Session, "bad:tenant", "s1", json!(1), None)
            .await
            .unwrap_err();
        assert!(matches!(err, SurfaceError::InvalidReference(_)));
    }

    #[tokio::test]
    async fn delete_and_list() {
        let surface = StateSurface::memory_only();
        for id in ["s2", "s1"] {
            surface
                .set_state(StateKind::Session, "acme", id, json!(null), None)
                .await
                .unwrap();
        }
        assert_eq!(
            surface.list_ids(StateKind::Session, "acme", 10).await.unwrap(),
            vec!["s1", "s2"]
        );
        assert!(surface.delete_state(StateKind::Session, "acme", "s1").await.unwrap());
        assert!(!surface.delete_state(StateKind::Session, "acme", "s1").await.unwrap());
        assert_eq!(
            surface.list_ids(StateKind::Session, "acme", 10).await.unwrap(),
            vec!["s2"]
        );
    }

    #[tokio::test]
    async fn failing_backend_is_transparent() {
        let surface = StateSurface::new(SurfaceConfig::default())
            .with_state_backend(Arc::new(FailingStateBackend::erroring()));

        let route = surface
            .set_state(StateKind::Session, "acme", "s1", json!({"a": 1}), None)
            .await
            .unwrap();
        assert_eq!(route, WriteRoute::Fallback);
        assert_eq!(
            surface.get_state(StateKind::Session, "acme", "s1").await.unwrap(),
            Some(json!({"a": 1}))
        );
        assert_eq!(
            surface.list_ids(StateKind::Session, "acme", 10).await.unwrap(),
            vec!["s1"]
        );
        assert!(!surface.health().is_healthy());
    }

    #[tokio::test]
    async fn typed_execution_and_session_state() {
        let surface = StateSurface::memory_only();
        let execution = ExecutionState::new("run-1", ExecutionStatus::Running)
            .with_data("progress", json!(0.5));
        surface.set_execution_state("acme", execution).await.unwrap();

        let read = surface
            .get_execution_state("acme", "run-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(read.status, ExecutionStatus::Running);
        assert_eq!(read.data["progress"], json!(0.5));

        surface
            .set_session_state("acme", SessionState::new("s1").with_user("u1"))
            .await
            .unwrap();
        let session = surface.get_session_state("acme", "s1").await.unwrap().unwrap();
        assert_eq!(session.user_id.as_deref(), Some("u1"));
    }

    #[tokio::test]
    async fn wrong_payload_variant_is_corrupt() {
        let surface = StateSurface::memory_only();
        surface
            .set_state(StateKind::Execution, "acme", "run-1", json!({"not": "tagged"}), None)
            .await
            .unwrap();
        let err = surface.get_execution_state("acme", "run-1").await.unwrap_err();
        assert!(matches!(err, SurfaceError::CorruptState { .. }));
    }

    #[tokio::test]
    async fn lineage_record_through_generic_accessors() {
        let surface = StateSurface::memory_only();
        let fact = LineageFact::new("f1", "acme", FileType::Uploaded, "a.pdf", None, Metadata::new());
        surface.set_record("acme", "f1", fact.clone(), None).await.unwrap();

        let read: LineageFact = surface.get_record("acme", "f1").await.unwrap().unwrap();
        assert_eq!(read, fact);
        assert_eq!(surface.fallback().entry("lineage:acme:f1").unwrap().ttl_seconds, 0);
    }

    #[tokio::test]
    async fn store_and_fetch_file() {
        let (surface, blobs) = with_blobs();
        let ref_id = surface
            .store_file("acme", "s1", b"hello".to_vec(), "notes.txt", Metadata::new())
            .await
            .unwrap();

        assert_eq!(
            surface.get_file(&ref_id).await.unwrap(),
            Some(Bytes::from_static(b"hello"))
        );

        let reference = surface.get_file_metadata(&ref_id).await.unwrap().unwrap();
        assert_eq!(reference.size, 5);
        assert_eq!(reference.filename, "notes.txt");
        assert_eq!(reference.content_type.as_deref(), Some("text/plain"));
        assert!(reference.content_hash.matches(b"hello"));
        assert!(blobs.contains(&reference.storage_location));
    }

    #[tokio::test]
    async fn store_file_requires_blob_store() {
        let surface = StateSurface::memory_only();
        let err = surface
            .store_file("acme", "s1", b"x".to_vec(), "a.bin", Metadata::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SurfaceError::BlobStoreUnavailable(_)));
        assert!(surface.fallback().is_empty());
    }

    #[tokio::test]
    async fn failed_upload_writes_no_metadata() {
        let surface =
            StateSurface::memory_only().with_blob_store(Arc::new(FailingBlobStore::erroring()));
        let err = surface
            .store_file("acme", "s1", b"x".to_vec(), "a.bin", Metadata::new())
            .await
            .unwrap_err();
        assert!(err.is_blob_failure());
        assert!(surface.list_files("acme", 10).await.unwrap().is_empty());

        let surface =
            StateSurface::memory_only().with_blob_store(Arc::new(FailingBlobStore::rejecting()));
        let err = surface
            .store_file("acme", "s1", b"x".to_vec(), "a.bin", Metadata::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SurfaceError::BlobWriteRejected { .. }));
    }

    #[tokio::test]
    async fn get_file_without_blob_store_is_error() {
        let (surface, _) = with_blobs();
        let ref_id = surface
            .store_file("acme", "s1", b"x".to_vec(), "a.bin", Metadata::new())
            .await
            .unwrap();

        let detached = StateSurface::memory_only().with_fallback(surface.fallback().clone());
        assert!(detached.get_file_metadata(&ref_id).await.unwrap().is_some());
        let err = detached.get_file(&ref_id).await.unwrap_err();
        assert!(matches!(err, SurfaceError::BlobStoreUnavailable(_)));
    }

    #[tokio::test]
    async fn missing_blob_is_none_not_error() {
        let (surface, blobs) = with_blobs();
        let ref_id = surface
            .store_file("acme", "s1", b"x".to_vec(), "a.bin", Metadata::new())
            .await
            .unwrap();
        let reference = surface.get_file_metadata(&ref_id).await.unwrap().unwrap();
        blobs.delete(&reference.storage_location).await.unwrap();

        assert_eq!(surface.get_file(&ref_id).await.unwrap(), None);
        assert!(surface.get_file_metadata(&ref_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn store_file_reference_writes_metadata_only() {
        let (surface, blobs) = with_blobs();
        let path: BlobPath = "acme/s1/external/data.csv".parse().unwrap();
        let location = BlobLocation {
            path: path.clone(),
            content_hash: ContentDigest::compute(b"a,b"),
            size: 3,
        };
        let ref_id = surface
            .store_file_reference("acme", "s1", location, "data.csv", Metadata::new())
            .await
            .unwrap();

        let reference = surface.get_file_metadata(&ref_id).await.unwrap().unwrap();
        assert_eq!(reference.storage_location, path);
        assert!(blobs.is_empty());
    }

    #[tokio::test]
    async fn delete_file_removes_blob_and_reference() {
        let (surface, blobs) = with_blobs();
        let ref_id = surface
            .store_file("acme", "s1", b"x".to_vec(), "a.bin", Metadata::new())
            .await
            .unwrap();

        assert!(surface.delete_file(&ref_id).await.unwrap());
        assert!(blobs.is_empty());
        assert!(surface.get_file_metadata(&ref_id).await.unwrap().is_none());
        assert!(!surface.delete_file(&ref_id).await.unwrap());
    }

    #[tokio::test]
    async fn delete_file_survives_blob_failure() {
        let (surface, _) = with_blobs();
        let ref_id = surface
            .store_file("acme", "s1", b"x".to_vec(), "a.bin", Metadata::new())
            .await
            .unwrap();

        let broken = StateSurface::memory_only()
            .with_fallback(surface.fallback().clone())
            .with_blob_store(Arc::new(FailingBlobStore::erroring()));
        assert!(broken.delete_file(&ref_id).await.unwrap());
        assert!(surface.get_file_metadata(&ref_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn update_metadata_merges() {
        let (surface, _) = with_blobs();
        let ref_id = surface
            .store_file(
                "acme",
                "s1",
                b"x".to_vec(),
                "a.bin",
                meta(&[("source", json!("upload")), ("draft", json!(true))]),
            )
            .await
            .unwrap();

        let updated = surface
            .update_file_metadata(
                &ref_id,
                meta(&[("reviewed", json!(true)), ("draft", Value::Null)]),
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.metadata["source"], json!("upload"));
        assert_eq!(updated.metadata["reviewed"], json!(true));
        assert!(!updated.metadata.contains_key("draft"));

        let stored = surface.get_file_metadata(&ref_id).await.unwrap().unwrap();
        assert_eq!(stored, updated);

        let unknown = FileRefId::generate("acme", "s1").unwrap();
        assert!(surface
            .update_file_metadata(&unknown, Metadata::new())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn list_files_per_tenant() {
        let (surface, _) = with_blobs();
        for name in ["a.txt", "b.txt"] {
            surface
                .store_file("acme", "s1", b"x".to_vec(), name, Metadata::new())
                .await
                .unwrap();
        }
        surface
            .store_file("other", "s1", b"x".to_vec(), "c.txt", Metadata::new())
            .await
            .unwrap();

        let files = surface.list_files("acme", 10).await.unwrap();
        assert_eq!(files.len(), 2);
        assert!(files.iter().all(|f| f.tenant_id() == "acme"));
        assert_eq!(surface.list_files("acme", 1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn health_reports_configuration() {
        let (surface, _) = with_blobs();
        surface
            .set_state(StateKind::Session, "acme", "s1", json!(1), None)
            .await
            .unwrap();

        let health = surface.health();
        assert_eq!(health.mode, SurfaceMode::MemoryOnly);
        assert!(health.blob_store_configured);
        assert!(!health.backend_configured);
        assert_eq!(health.fallback_entries, 1);
        assert!(health.is_healthy());
    }
}
