//! Backend selection with in-memory fallback
//!
//! Every state operation goes through [`StateRouter::with_backend`]: it runs
//! the call against the backing store and reports `None` when the caller
//! has to fall back. Fallback entries only exist for writes the backend
//! missed, so when present they are the newest copy of a key.
//!
//! A delete the backend missed leaves a tombstone. Tombstoned keys read as
//! absent, and the delete is replayed against the backend on the next
//! operation that reaches it.

use crate::config::SurfaceMode;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use strata_core::{StateKey, StateKind, Tags};
use strata_store::{payload_version, MemoryStateBackend, StateBackend, StoreResult, StoredState};

/// Tag naming the store that accepted a write
pub const TAG_BACKEND: &str = "backend";
/// Tag naming the path (`primary` or `fallback`) that served a write
pub const TAG_STRATEGY: &str = "strategy";
/// Tag carrying the state kind
pub const TAG_TYPE: &str = "type";
/// Tag carrying the tenant
pub const TAG_TENANT: &str = "tenant_id";

/// Where a write landed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteRoute {
    /// Backing store accepted it
    Backing,
    /// Memory-only mode, fallback is the primary store
    Memory,
    /// Backend absent or failing, written to the fallback
    Fallback,
}

impl WriteRoute {
    const fn backend_label(self) -> &'static str {
        match self {
            Self::Backing => "backing",
            Self::Memory | Self::Fallback => "memory",
        }
    }

    const fn strategy_label(self) -> &'static str {
        match self {
            Self::Backing | Self::Memory => "primary",
            Self::Fallback => "fallback",
        }
    }
}

/// Tags attached to a write of `key` through `route`
#[must_use]
pub fn write_tags(key: &StateKey, route: WriteRoute) -> Tags {
    let mut tags = Tags::new();
    tags.insert(TAG_BACKEND.to_string(), route.backend_label().to_string());
    tags.insert(TAG_STRATEGY.to_string(), route.strategy_label().to_string());
    tags.insert(TAG_TYPE.to_string(), key.kind().as_str().to_string());
    tags.insert(TAG_TENANT.to_string(), key.tenant_id().to_string());
    tags
}

fn namespace_filter(kind: StateKind, tenant_id: &str) -> Tags {
    let mut tags = Tags::new();
    tags.insert(TAG_TYPE.to_string(), kind.as_str().to_string());
    tags.insert(TAG_TENANT.to_string(), tenant_id.to_string());
    tags
}

pub(crate) struct StateRouter {
    mode: SurfaceMode,
    backend: Option<Arc<dyn StateBackend>>,
    fallback: Arc<MemoryStateBackend>,
    /// Deletes the backend has not seen yet
    tombstones: DashMap<String, DateTime<Utc>>,
    degraded: AtomicU64,
}

impl StateRouter {
    pub(crate) fn new(mode: SurfaceMode, fallback: Arc<MemoryStateBackend>) -> Self {
        Self {
            mode,
            backend: None,
            fallback,
            tombstones: DashMap::new(),
            degraded: AtomicU64::new(0),
        }
    }

    pub(crate) fn set_backend(&mut self, backend: Arc<dyn StateBackend>) {
        self.backend = Some(backend);
    }

    pub(crate) fn set_fallback(&mut self, fallback: Arc<MemoryStateBackend>) {
        self.fallback = fallback;
    }

    pub(crate) fn has_backend(&self) -> bool {
        self.backend.is_some()
    }

    pub(crate) fn fallback(&self) -> &Arc<MemoryStateBackend> {
        &self.fallback
    }

    pub(crate) fn degraded_operations(&self) -> u64 {
        self.degraded.load(Ordering::Relaxed)
    }

    pub(crate) fn pending_deletes(&self) -> usize {
        self.tombstones.len()
    }

    /// Run `call` against the backing store
    ///
    /// `None` means the caller must use the fallback: memory-only mode, no
    /// backend configured, or the backend returned an error (logged).
    pub(crate) async fn with_backend<'a, T, F, Fut>(
        &'a self,
        operation: &'static str,
        state_id: &str,
        call: F,
    ) -> Option<T>
    where
        F: FnOnce(&'a dyn StateBackend) -> Fut,
        Fut: Future<Output = StoreResult<T>>,
    {
        if self.mode == SurfaceMode::MemoryOnly {
            return None;
        }
        let Some(backend) = self.backend.as_deref() else {
            self.degrade(operation, state_id, "no backing store configured");
            return None;
        };
        match call(backend).await {
            Ok(value) => Some(value),
            Err(err) => {
                self.degrade(operation, state_id, &err.to_string());
                None
            }
        }
    }

    fn degrade(&self, operation: &'static str, state_id: &str, reason: &str) {
        self.degraded.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(
            operation,
            state_id,
            reason,
            "State backend degraded, using in-memory fallback"
        );
    }

    /// Push deletes made during an outage to the backend
    async fn replay_tombstones(&self) {
        if self.tombstones.is_empty() || self.mode == SurfaceMode::MemoryOnly {
            return;
        }
        let Some(backend) = self.backend.as_deref() else {
            return;
        };
        let pending: Vec<String> = self.tombstones.iter().map(|t| t.key().clone()).collect();
        for state_id in pending {
            match backend.delete_state(&state_id).await {
                Ok(_) => {
                    self.tombstones.remove(&state_id);
                    tracing::debug!("Replayed delete of {} against backend", state_id);
                }
                Err(err) => {
                    tracing::debug!("Backend still unavailable for delete replay: {}", err);
                    return;
                }
            }
        }
    }

    /// Drop the fallback copy of a key the backend now holds
    async fn clear_fallback(&self, state_id: &str) {
        // an older fallback copy would shadow the backend on reads
        if let Err(err) = self.fallback.delete_state(state_id).await {
            tracing::debug!("Could not clear fallback copy of {}: {}", state_id, err);
        }
        self.tombstones.remove(state_id);
    }

    pub(crate) async fn write(
        &self,
        key: &StateKey,
        payload: serde_json::Value,
        ttl_seconds: u64,
    ) -> WriteRoute {
        self.replay_tombstones().await;
        let state_id = key.to_string();
        let tags = write_tags(key, WriteRoute::Backing);
        let accepted = self
            .with_backend("store_state", &state_id, |backend| {
                backend.store_state(&state_id, payload.clone(), tags, ttl_seconds)
            })
            .await;

        let route = match accepted {
            Some(true) => {
                self.clear_fallback(&state_id).await;
                return WriteRoute::Backing;
            }
            Some(false) => {
                self.degrade("store_state", &state_id, "backend rejected write");
                WriteRoute::Fallback
            }
            None if self.mode == SurfaceMode::MemoryOnly => WriteRoute::Memory,
            None => WriteRoute::Fallback,
        };

        if let Err(err) = self
            .fallback
            .store_state(&state_id, payload, write_tags(key, route), ttl_seconds)
            .await
        {
            tracing::error!("Fallback write failed for {}: {}", state_id, err);
        }
        route
    }

    /// Write only if the current copy of `key` is at `expected_version`
    ///
    /// `None` means the stored version moved on and nothing was written.
    /// A fallback copy left by an outage is the current copy; the first
    /// write after recovery promotes it to the backend unconditionally.
    pub(crate) async fn write_if_version(
        &self,
        key: &StateKey,
        payload: serde_json::Value,
        ttl_seconds: u64,
        expected_version: u64,
    ) -> Option<WriteRoute> {
        self.replay_tombstones().await;
        let state_id = key.to_string();
        let id = state_id.as_str();
        let local_version = self
            .fallback
            .retrieve_state(id)
            .await
            .ok()
            .flatten()
            .map(|stored| payload_version(&stored.payload));
        if local_version.is_some_and(|found| found != expected_version) {
            return None;
        }

        let tags = write_tags(key, WriteRoute::Backing);
        let backend_payload = payload.clone();
        let accepted = self
            .with_backend("store_state_if_version", id, |backend| async move {
                if local_version.is_some() {
                    backend.store_state(id, backend_payload, tags, ttl_seconds).await
                } else {
                    backend
                        .store_state_if_version(id, backend_payload, tags, ttl_seconds, expected_version)
                        .await
                }
            })
            .await;

        let route = match accepted {
            Some(true) => {
                self.clear_fallback(id).await;
                return Some(WriteRoute::Backing);
            }
            Some(false) if local_version.is_none() => return None,
            Some(false) => {
                self.degrade("store_state_if_version", id, "backend rejected write");
                WriteRoute::Fallback
            }
            None if self.mode == SurfaceMode::MemoryOnly => WriteRoute::Memory,
            None => WriteRoute::Fallback,
        };

        // with a backend, a missing fallback copy only has to stay missing
        let fallback_expected = if route == WriteRoute::Memory || local_version.is_some() {
            expected_version
        } else {
            0
        };
        match self
            .fallback
            .store_state_if_version(id, payload, write_tags(key, route), ttl_seconds, fallback_expected)
            .await
        {
            Ok(true) => Some(route),
            Ok(false) => None,
            Err(err) => {
                tracing::error!("Fallback write failed for {}: {}", id, err);
                None
            }
        }
    }

    pub(crate) async fn read(&self, state_id: &str) -> Option<StoredState> {
        self.replay_tombstones().await;
        if let Ok(Some(local)) = self.fallback.retrieve_state(state_id).await {
            return Some(local);
        }
        if self.tombstones.contains_key(state_id) {
            return None;
        }
        self.with_backend("retrieve_state", state_id, |backend| {
            backend.retrieve_state(state_id)
        })
        .await
        .flatten()
    }

    /// Delete from both stores; `true` if either held the key
    ///
    /// While the backend is down the delete is recorded as a tombstone and
    /// reported as found unless the key was already tombstoned.
    pub(crate) async fn delete(&self, state_id: &str) -> bool {
        self.replay_tombstones().await;
        let local = self.fallback.delete_state(state_id).await.unwrap_or(false);
        let backing = self
            .with_backend("delete_state", state_id, |backend| {
                backend.delete_state(state_id)
            })
            .await;

        match backing {
            Some(found) => {
                self.tombstones.remove(state_id);
                found || local
            }
            None if self.mode == SurfaceMode::MemoryOnly => local,
            None => {
                let fresh = self
                    .tombstones
                    .insert(state_id.to_string(), Utc::now())
                    .is_none();
                tracing::warn!("Recorded pending delete of {}", state_id);
                local || fresh
            }
        }
    }

    /// Merged, sorted state ids in one namespace
    pub(crate) async fn list(&self, kind: StateKind, tenant_id: &str, limit: usize) -> Vec<String> {
        self.replay_tombstones().await;
        let prefix = StateKey::namespace_prefix(kind, tenant_id);
        let filter = namespace_filter(kind, tenant_id);

        let mut ids = self
            .with_backend("list_states", &prefix, |backend| {
                backend.list_states(&filter, limit)
            })
            .await
            .unwrap_or_default();
        let local = self
            .fallback
            .list_states(&filter, limit)
            .await
            .unwrap_or_default();
        ids.extend(local.iter().cloned());

        ids.retain(|id| {
            id.starts_with(&prefix) && (!self.tombstones.contains_key(id) || local.contains(id))
        });
        ids.sort();
        ids.dedup();
        ids.truncate(limit);
        ids
    }
}

impl std::fmt::Debug for StateRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateRouter")
            .field("mode", &self.mode)
            .field("backend", &self.backend.is_some())
            .field("fallback_entries", &self.fallback.len())
            .field("pending_deletes", &self.tombstones.len())
            .field("degraded", &self.degraded_operations())
            .finish()
    }
}
