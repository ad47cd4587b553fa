//! Materialization contracts subject to TTL enforcement

use super::Metadata;
use crate::path::BlobPath;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};

/// Metadata key linking a contract to a lineage fact
pub const FILE_ID_KEY: &str = "file_id";

/// Metadata key carrying an explicit bucket-relative blob path
pub const STORAGE_PATH_KEY: &str = "storage_path";

/// How an external source was materialized
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MaterializationType {
    /// Full copy of the source bytes
    FullArtifact,
    /// Extracted subset of the source bytes
    PartialExtraction,
    /// Re-derivable on demand; nothing stored
    Deterministic,
    /// Pointer only; nothing stored
    ReferenceOnly,
    /// Any type this crate does not know about
    Other(String),
}

impl MaterializationType {
    /// Whether contracts of this type own stored bytes to purge
    #[inline]
    #[must_use]
    pub fn stores_bytes(&self) -> bool {
        matches!(self, Self::FullArtifact | Self::PartialExtraction)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::FullArtifact => "full_artifact",
            Self::PartialExtraction => "partial_extraction",
            Self::Deterministic => "deterministic",
            Self::ReferenceOnly => "reference_only",
            Self::Other(other) => other,
        }
    }
}

impl From<String> for MaterializationType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "full_artifact" => Self::FullArtifact,
            "partial_extraction" => Self::PartialExtraction,
            "deterministic" => Self::Deterministic,
            "reference_only" => Self::ReferenceOnly,
            _ => Self::Other(value),
        }
    }
}

impl From<MaterializationType> for String {
    fn from(value: MaterializationType) -> Self {
        value.as_str().to_string()
    }
}

impl Display for MaterializationType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Contract lifecycle; `Active -> Expired` happens once
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContractStatus {
    #[default]
    Active,
    Expired,
}

/// Time-bounded record for a stored artifact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaterializationContract {
    pub contract_id: String,
    pub tenant_id: String,
    pub materialization_type: MaterializationType,
    #[serde(default)]
    pub external_source_identifier: Option<String>,
    #[serde(default)]
    pub external_source_metadata: Metadata,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub status: ContractStatus,
    #[serde(default)]
    pub expired_at: Option<DateTime<Utc>>,
}

impl MaterializationContract {
    /// New active contract
    #[must_use]
    pub fn new(
        contract_id: impl Into<String>,
        tenant_id: impl Into<String>,
        materialization_type: MaterializationType,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            contract_id: contract_id.into(),
            tenant_id: tenant_id.into(),
            materialization_type,
            external_source_identifier: None,
            external_source_metadata: Metadata::new(),
            expires_at,
            status: ContractStatus::Active,
            expired_at: None,
        }
    }

    /// Set the external locator
    #[must_use]
    pub fn with_source(mut self, identifier: impl Into<String>) -> Self {
        self.external_source_identifier = Some(identifier.into());
        self
    }

    /// Link to a lineage fact
    #[must_use]
    pub fn with_file_id(mut self, file_id: impl Into<String>) -> Self {
        self.external_source_metadata
            .insert(FILE_ID_KEY.to_string(), serde_json::Value::String(file_id.into()));
        self
    }

    /// Set an explicit blob path
    #[must_use]
    pub fn with_storage_path(mut self, path: &BlobPath) -> Self {
        self.external_source_metadata.insert(
            STORAGE_PATH_KEY.to_string(),
            serde_json::Value::String(path.to_string()),
        );
        self
    }

    /// Active and past its expiry at `now`
    #[inline]
    #[must_use]
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == ContractStatus::Active && self.expires_at <= now
    }

    /// Lineage file this contract materializes, if recorded
    #[must_use]
    pub fn lineage_file_id(&self) -> Option<&str> {
        self.external_source_metadata
            .get(FILE_ID_KEY)
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
    }

    /// Blob holding this contract's bytes
    ///
    /// An explicit `storage_path` in the metadata takes precedence over the
    /// external identifier. `None` when neither resolves.
    #[must_use]
    pub fn blob_path(&self) -> Option<BlobPath> {
        self.external_source_metadata
            .get(STORAGE_PATH_KEY)
            .and_then(|v| v.as_str())
            .and_then(BlobPath::from_locator)
            .or_else(|| {
                self.external_source_identifier
                    .as_deref()
                    .and_then(BlobPath::from_locator)
            })
    }
}
