//! Lineage facts: one node of the upload -> parse -> embed forest

use super::Metadata;
use chrono::{DateTime, Utc};
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};

/// Pipeline stage that produced a file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileType {
    /// Original upload; a root of the forest
    Uploaded,
    /// Output of a parser
    Parsed,
    /// Output of an embedding stage
    Embedded,
}

impl FileType {
    /// Relationship recorded on the parent when no explicit one is given
    #[must_use]
    pub const fn default_relationship(self) -> Option<&'static str> {
        match self {
            Self::Uploaded => None,
            Self::Parsed => Some("parsed_from"),
            Self::Embedded => Some("embedded_from"),
        }
    }

    /// Whether facts of this type may name a parent
    #[inline]
    #[must_use]
    pub const fn is_derived(self) -> bool {
        !matches!(self, Self::Uploaded)
    }
}

impl Display for FileType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Uploaded => "uploaded",
            Self::Parsed => "parsed",
            Self::Embedded => "embedded",
        };
        f.write_str(name)
    }
}

/// Provenance record for a single file
///
/// Facts are created once and only extended: children are appended, a
/// parent is set, an expiry is stamped. `version` increases on every write
/// and backs the compare-and-write in the lineage accessor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineageFact {
    pub file_id: String,
    pub tenant_id: String,
    pub file_type: FileType,
    pub ui_name: String,
    #[serde(default)]
    pub parent_file_id: Option<String>,
    #[serde(default)]
    pub child_file_ids: IndexSet<String>,
    #[serde(default)]
    pub relationships: BTreeMap<String, String>,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_expired_at: Option<DateTime<Utc>>,
}

impl LineageFact {
    /// New fact at version 0
    #[must_use]
    pub fn new(
        file_id: impl Into<String>,
        tenant_id: impl Into<String>,
        file_type: FileType,
        ui_name: impl Into<String>,
        parent_file_id: Option<String>,
        metadata: Metadata,
    ) -> Self {
        let now = Utc::now();
        Self {
            file_id: file_id.into(),
            tenant_id: tenant_id.into(),
            file_type,
            ui_name: ui_name.into(),
            parent_file_id,
            child_file_ids: IndexSet::new(),
            relationships: BTreeMap::new(),
            metadata,
            version: 0,
            created_at: now,
            updated_at: now,
            source_expired_at: None,
        }
    }

    /// Append a child; returns `false` if nothing changed
    pub fn add_child(&mut self, child_file_id: &str, relationship: &str) -> bool {
        let inserted = self.child_file_ids.insert(child_file_id.to_string());
        let rel_changed = match self.relationships.get(child_file_id) {
            Some(existing) => existing != relationship,
            None => true,
        };
        if rel_changed {
            self.relationships
                .insert(child_file_id.to_string(), relationship.to_string());
        }
        inserted || rel_changed
    }

    /// Drop a child entry; used only to undo a partially applied link
    pub fn remove_child(&mut self, child_file_id: &str) -> bool {
        self.relationships.remove(child_file_id);
        self.child_file_ids.shift_remove(child_file_id)
    }

    /// Stamp the source expiry, keeping the earliest stamp
    pub fn stamp_source_expired(&mut self, at: DateTime<Utc>) -> bool {
        match self.source_expired_at {
            Some(existing) if existing <= at => false,
            _ => {
                self.source_expired_at = Some(at);
                true
            }
        }
    }

    /// Bump version and `updated_at` ahead of a write
    pub fn touch(&mut self) {
        self.version += 1;
        self.updated_at = Utc::now();
    }

    /// Single-hop view of this fact
    #[must_use]
    pub fn chain(&self) -> LineageChain {
        LineageChain {
            file_id: self.file_id.clone(),
            ui_name: self.ui_name.clone(),
            file_type: self.file_type,
            parent_file_id: self.parent_file_id.clone(),
            child_file_ids: self.child_file_ids.iter().cloned().collect(),
            relationships: self.relationships.clone(),
            source_expired_at: self.source_expired_at,
        }
    }
}

/// Read model returned by lineage lookups
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineageChain {
    pub file_id: String,
    pub ui_name: String,
    pub file_type: FileType,
    pub parent_file_id: Option<String>,
    pub child_file_ids: Vec<String>,
    pub relationships: BTreeMap<String, String>,
    pub source_expired_at: Option<DateTime<Utc>>,
}
