//! In-memory state backend
//!
//! Serves as the fallback store behind every state surface. Entries expire
//! lazily: reads and listings skip and evict anything past its TTL, and
//! [`MemoryStateBackend::purge_expired`] sweeps the whole map.

use crate::traits::{payload_version, StateBackend, StoredState};
use crate::StoreResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::Value;
use strata_core::{StateEntry, Tags};

/// Concurrent in-memory state map
#[derive(Debug, Default)]
pub struct MemoryStateBackend {
    entries: DashMap<String, StateEntry>,
}

impl MemoryStateBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, expired ones included until purged
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Full entry, including timestamps
    #[must_use]
    pub fn entry(&self, state_id: &str) -> Option<StateEntry> {
        self.live_entry(state_id, Utc::now())
    }

    /// Evict every entry expired at `now`; returns how many were removed
    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            tracing::debug!("Purged {} expired fallback entries", removed);
        }
        removed
    }

    fn live_entry(&self, state_id: &str, now: DateTime<Utc>) -> Option<StateEntry> {
        let entry = self.entries.get(state_id)?.clone();
        if entry.is_expired(now) {
            self.entries
                .remove_if(state_id, |_, current| current.is_expired(now));
            return None;
        }
        Some(entry)
    }
}

#[async_trait]
impl StateBackend for MemoryStateBackend {
    async fn store_state(
        &self,
        state_id: &str,
        payload: Value,
        tags: Tags,
        ttl_seconds: u64,
    ) -> StoreResult<bool> {
        let now = Utc::now();
        self.entries
            .entry(state_id.to_string())
            .and_modify(|entry| {
                if entry.is_expired(now) {
                    *entry = StateEntry::new(state_id, payload.clone(), tags.clone(), ttl_seconds);
                } else {
                    entry.overwrite(payload.clone(), tags.clone(), ttl_seconds);
                }
            })
            .or_insert_with(|| StateEntry::new(state_id, payload, tags, ttl_seconds));
        Ok(true)
    }

    async fn store_state_if_version(
        &self,
        state_id: &str,
        payload: Value,
        tags: Tags,
        ttl_seconds: u64,
        expected_version: u64,
    ) -> StoreResult<bool> {
        let now = Utc::now();
        // the entry guard holds the shard lock across check and write
        match self.entries.entry(state_id.to_string()) {
            Entry::Occupied(mut occupied) => {
                let expired = occupied.get().is_expired(now);
                let current = if expired {
                    0
                } else {
                    payload_version(&occupied.get().payload)
                };
                if current != expected_version {
                    return Ok(false);
                }
                if expired {
                    occupied.insert(StateEntry::new(state_id, payload, tags, ttl_seconds));
                } else {
                    occupied.get_mut().overwrite(payload, tags, ttl_seconds);
                }
            }
            Entry::Vacant(vacant) => {
                if expected_version != 0 {
                    return Ok(false);
                }
                vacant.insert(StateEntry::new(state_id, payload, tags, ttl_seconds));
            }
        }
        Ok(true)
    }

    async fn retrieve_state(&self, state_id: &str) -> StoreResult<Option<StoredState>> {
        Ok(self
            .live_entry(state_id, Utc::now())
            .map(|entry| StoredState {
                payload: entry.payload,
                tags: entry.tags,
            }))
    }

    async fn delete_state(&self, state_id: &str) -> StoreResult<bool> {
        let now = Utc::now();
        Ok(self
            .entries
            .remove(state_id)
            .is_some_and(|(_, entry)| !entry.is_expired(now)))
    }

    async fn list_states(&self, filter_tags: &Tags, limit: usize) -> StoreResult<Vec<String>> {
        let now = Utc::now();
        let mut keys: Vec<String> = self
            .entries
            .iter()
            .filter(|item| !item.value().is_expired(now) && item.value().matches_tags(filter_tags))
            .map(|item| item.key().clone())
            .collect();
        keys.sort();
        keys.truncate(limit);
        Ok(keys)
    }
}
