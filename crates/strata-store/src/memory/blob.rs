//! In-memory blob store

use crate::traits::{BlobInfo, BlobStore};
use crate::StoreResult;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use strata_core::{BlobPath, ContentDigest, Metadata};

#[derive(Debug, Clone)]
struct StoredBlob {
    bytes: Bytes,
    digest: ContentDigest,
    uploaded_at: DateTime<Utc>,
}

/// Blob store keyed by [`BlobPath`]
///
/// Intended for tests and single-process deployments. Listing reports the
/// SHA-256 digest and upload time as metadata.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: DashMap<BlobPath, StoredBlob>,
}

impl MemoryBlobStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    #[must_use]
    pub fn contains(&self, path: &BlobPath) -> bool {
        self.blobs.contains_key(path)
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }

    /// Total stored bytes
    #[must_use]
    pub fn total_bytes(&self) -> u64 {
        self.blobs
            .iter()
            .map(|item| item.value().bytes.len() as u64)
            .sum()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn upload(&self, path: &BlobPath, bytes: Bytes) -> StoreResult<bool> {
        let digest = ContentDigest::compute(&bytes);
        self.blobs.insert(
            path.clone(),
            StoredBlob {
                bytes,
                digest,
                uploaded_at: Utc::now(),
            },
        );
        Ok(true)
    }

    async fn download(&self, path: &BlobPath) -> StoreResult<Option<Bytes>> {
        Ok(self.blobs.get(path).map(|blob| blob.bytes.clone()))
    }

    async fn delete(&self, path: &BlobPath) -> StoreResult<bool> {
        Ok(self.blobs.remove(path).is_some())
    }

    async fn list(&self, prefix: &str) -> StoreResult<Vec<BlobInfo>> {
        let mut listed: Vec<BlobInfo> = self
            .blobs
            .iter()
            .filter(|item| item.key().starts_with(prefix))
            .map(|item| {
                let blob = item.value();
                let mut metadata = Metadata::new();
                metadata.insert("content_hash".into(), blob.digest.to_string().into());
                metadata.insert("uploaded_at".into(), blob.uploaded_at.to_rfc3339().into());
                BlobInfo {
                    path: item.key().clone(),
                    size: blob.bytes.len() as u64,
                    metadata,
                }
            })
            .collect();
        listed.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(listed)
    }
}
