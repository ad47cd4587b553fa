//! Typed state payloads and the stored entry envelope
//!
//! Backends only ever see [`serde_json::Value`]. [`StatePayload`] is the
//! single serialization boundary between that and the typed records.

use super::{FileReference, LineageFact, Metadata};
use crate::error::CoreError;
use crate::key::StateKind;
use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Observability tags attached to stored state
pub type Tags = BTreeMap<String, String>;

/// Status of a pipeline execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    /// No further transitions expected
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Execution state of one pipeline run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionState {
    pub execution_id: String,
    #[serde(default)]
    pub status: ExecutionStatus,
    #[serde(default)]
    pub data: Metadata,
    pub updated_at: DateTime<Utc>,
}

impl ExecutionState {
    #[must_use]
    pub fn new(execution_id: impl Into<String>, status: ExecutionStatus) -> Self {
        Self {
            execution_id: execution_id.into(),
            status,
            data: Metadata::new(),
            updated_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn with_data(mut self, key: impl Into<String>, value: Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }
}

/// State of one user session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub session_id: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub data: Metadata,
    pub updated_at: DateTime<Utc>,
}

impl SessionState {
    #[must_use]
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            user_id: None,
            data: Metadata::new(),
            updated_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    #[must_use]
    pub fn with_data(mut self, key: impl Into<String>, value: Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }
}

/// Tagged payload, one variant per [`StateKind`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StatePayload {
    Execution(ExecutionState),
    Session(SessionState),
    File(FileReference),
    Lineage(LineageFact),
}

impl StatePayload {
    #[must_use]
    pub const fn kind(&self) -> StateKind {
        match self {
            Self::Execution(_) => StateKind::Execution,
            Self::Session(_) => StateKind::Session,
            Self::File(_) => StateKind::File,
            Self::Lineage(_) => StateKind::Lineage,
        }
    }

    /// Encode for a backend
    ///
    /// # Errors
    /// Returns [`CoreError::Serialization`] if encoding fails.
    pub fn to_value(&self) -> Result<Value, CoreError> {
        Ok(serde_json::to_value(self)?)
    }

    /// Decode a backend value
    ///
    /// # Errors
    /// Returns [`CoreError::Serialization`] if the value is not a tagged payload.
    pub fn from_value(value: Value) -> Result<Self, CoreError> {
        Ok(serde_json::from_value(value)?)
    }
}

/// A record type that maps onto exactly one [`StatePayload`] variant
pub trait StateRecord: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Namespace the record lives in
    const KIND: StateKind;

    fn into_payload(self) -> StatePayload;

    /// Extract from a payload
    ///
    /// # Errors
    /// Returns [`CoreError::PayloadMismatch`] for any other variant.
    fn from_payload(payload: StatePayload) -> Result<Self, CoreError>;
}

macro_rules! impl_state_record {
    ($ty:ty, $variant:ident, $kind:expr) => {
        impl StateRecord for $ty {
            const KIND: StateKind = $kind;

            fn into_payload(self) -> StatePayload {
                StatePayload::$variant(self)
            }

            fn from_payload(payload: StatePayload) -> Result<Self, CoreError> {
                match payload {
                    StatePayload::$variant(inner) => Ok(inner),
                    other => Err(CoreError::PayloadMismatch {
                        expected: $kind.as_str(),
                        found: other.kind().as_str(),
                    }),
                }
            }
        }
    };
}

impl_state_record!(ExecutionState, Execution, StateKind::Execution);
impl_state_record!(SessionState, Session, StateKind::Session);
impl_state_record!(FileReference, File, StateKind::File);
impl_state_record!(LineageFact, Lineage, StateKind::Lineage);

/// Stored entry envelope
///
/// `ttl_seconds == 0` never expires. Overwrites keep `created_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateEntry {
    pub key: String,
    pub payload: Value,
    #[serde(default)]
    pub tags: Tags,
    pub ttl_seconds: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StateEntry {
    #[must_use]
    pub fn new(key: impl Into<String>, payload: Value, tags: Tags, ttl_seconds: u64) -> Self {
        let now = Utc::now();
        Self {
            key: key.into(),
            payload,
            tags,
            ttl_seconds,
            created_at: now,
            updated_at: now,
        }
    }

    /// Replace payload, tags and TTL in place
    pub fn overwrite(&mut self, payload: Value, tags: Tags, ttl_seconds: u64) {
        self.payload = payload;
        self.tags = tags;
        self.ttl_seconds = ttl_seconds;
        self.updated_at = Utc::now();
    }

    /// Expiry instant, measured from the last write
    #[must_use]
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        if self.ttl_seconds == 0 {
            return None;
        }
        let secs = i64::try_from(self.ttl_seconds).unwrap_or(i64::MAX);
        Duration::try_seconds(secs).and_then(|ttl| self.updated_at.checked_add_signed(ttl))
    }

    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at().is_some_and(|at| at <= now)
    }

    /// All of `filter` present with equal values
    #[must_use]
    pub fn matches_tags(&self, filter: &Tags) -> bool {
        filter
            .iter()
            .all(|(k, v)| self.tags.get(k).is_some_and(|have| have == v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn payload_is_tagged_by_kind() {
        let payload = ExecutionState::new("run-1", ExecutionStatus::Running).into_payload();
        let value = payload.to_value().unwrap();
        assert_eq!(value["kind"], json!("execution"));
        assert_eq!(value["status"], json!("running"));
        assert_eq!(StatePayload::from_value(value).unwrap(), payload);
    }

    #[test]
    fn mismatched_variant_is_rejected() {
        let payload = SessionState::new("s1").into_payload();
        let err = ExecutionState::from_payload(payload).unwrap_err();
        assert!(matches!(
            err,
            CoreError::PayloadMismatch {
                expected: "execution",
                found: "session"
            }
        ));
    }

    #[test]
    fn untagged_value_fails_to_decode() {
        assert!(StatePayload::from_value(json!({"session_id": "s1"})).is_err());
    }

    #[test]
    fn zero_ttl_never_expires() {
        let entry = StateEntry::new("k", json!(1), Tags::new(), 0);
        assert!(entry.expires_at().is_none());
        assert!(!entry.is_expired(Utc::now() + Duration::days(10_000)));
    }

    #[test]
    fn ttl_expiry_measured_from_update() {
        let entry = StateEntry::new("k", json!(1), Tags::new(), 60);
        assert!(!entry.is_expired(entry.updated_at + Duration::seconds(59)));
        assert!(entry.is_expired(entry.updated_at + Duration::seconds(60)));
    }

    #[test]
    fn huge_ttl_does_not_overflow() {
        let entry = StateEntry::new("k", json!(1), Tags::new(), u64::MAX);
        assert!(!entry.is_expired(Utc::now()));
    }

    #[test]
    fn overwrite_keeps_created_at() {
        let mut entry = StateEntry::new("k", json!(1), Tags::new(), 60);
        let created = entry.created_at;
        entry.overwrite(json!(2), Tags::new(), 120);
        assert_eq!(entry.created_at, created);
        assert_eq!(entry.payload, json!(2));
        assert_eq!(entry.ttl_seconds, 120);
    }

    #[test]
    fn tag_filter_requires_all() {
        let mut tags = Tags::new();
        tags.insert("tenant_id".into(), "acme".into());
        tags.insert("type".into(), "session".into());
        let entry = StateEntry::new("k", json!(null), tags, 0);

        let mut filter = Tags::new();
        assert!(entry.matches_tags(&filter));
        filter.insert("tenant_id".into(), "acme".into());
        assert!(entry.matches_tags(&filter));
        filter.insert("type".into(), "file".into());
        assert!(!entry.matches_tags(&filter));
    }

    #[test]
    fn terminal_statuses() {
        assert!(ExecutionStatus::Completed.is_terminal());
        assert!(!ExecutionStatus::Running.is_terminal());
    }
}
