//! File reference records

use super::Metadata;
use crate::hash::ContentDigest;
use crate::key::FileRefId;
use crate::path::BlobPath;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Pointer to stored file bytes plus descriptive metadata
///
/// Never carries the bytes themselves. Valid only once the blob at
/// `storage_location` exists. Every field except `metadata` is fixed at
/// creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileReference {
    pub ref_id: FileRefId,
    pub storage_location: BlobPath,
    pub filename: String,
    pub content_hash: ContentDigest,
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
}

impl FileReference {
    /// Build a reference, guessing the content type from the filename
    #[must_use]
    pub fn new(
        ref_id: FileRefId,
        storage_location: BlobPath,
        filename: impl Into<String>,
        content_hash: ContentDigest,
        size: u64,
        metadata: Metadata,
    ) -> Self {
        let filename = filename.into();
        let content_type = metadata
            .get("content_type")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .or_else(|| guess_content_type(&filename).map(str::to_string));
        Self {
            ref_id,
            storage_location,
            filename,
            content_hash,
            size,
            content_type,
            metadata,
            created_at: Utc::now(),
        }
    }

    #[inline]
    #[must_use]
    pub fn tenant_id(&self) -> &str {
        self.ref_id.tenant_id()
    }

    #[inline]
    #[must_use]
    pub fn session_id(&self) -> &str {
        self.ref_id.session_id()
    }

    /// Merge `patch` into `metadata`; a `null` value removes the key
    pub fn merge_metadata(&mut self, patch: Metadata) {
        for (key, value) in patch {
            if value.is_null() {
                self.metadata.remove(&key);
            } else {
                self.metadata.insert(key, value);
            }
        }
    }
}

/// Content type by file extension
#[must_use]
pub fn guess_content_type(filename: &str) -> Option<&'static str> {
    let (_, ext) = filename.rsplit_once('.')?;
    let mime = match ext.to_ascii_lowercase().as_str() {
        "pdf" => "application/pdf",
        "json" => "application/json",
        "csv" => "text/csv",
        "txt" | "log" => "text/plain",
        "md" => "text/markdown",
        "html" | "htm" => "text/html",
        "xml" => "application/xml",
        "parquet" => "application/vnd.apache.parquet",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "zip" => "application/zip",
        _ => return None,
    };
    Some(mime)
}
