//! Bucket-relative blob paths
//!
//! Provides [`BlobPath`], the locator a [`FileReference`](crate::FileReference)
//! stores in `storage_location`. Blob stores are addressed by these paths,
//! never by full URIs.

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;
use uuid::Uuid;

/// URI schemes that carry a bucket segment before the path
const BUCKET_SCHEMES: &[&str] = &["gs://", "s3://"];

/// Path of a blob within its bucket
///
/// Segments are joined with `/`. A path is never empty and never contains
/// `.` or `..` segments.
///
/// # Examples
/// - `acme/sess-1/5f0c.../report.pdf`
/// - `gs://bucket/acme/report.pdf` reduces to `acme/report.pdf`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BlobPath(Vec<String>);

impl BlobPath {
    /// Derive the storage path for a newly uploaded file
    ///
    /// Layout is `{tenant}/{session}/{uuid}/{filename}` with the filename
    /// reduced to its final component.
    #[must_use]
    pub fn for_upload(tenant_id: &str, session_id: &str, file_uuid: Uuid, filename: &str) -> Self {
        Self(vec![
            sanitize_segment(tenant_id),
            sanitize_segment(session_id),
            file_uuid.to_string(),
            sanitize_filename(filename),
        ])
    }

    /// Reduce an external locator to a bucket-relative path
    ///
    /// `gs://bucket/a/b` and `s3://bucket/a/b` become `a/b`. Relative paths
    /// pass through (leading slashes stripped). Returns `None` when nothing
    /// resolvable remains, e.g. an empty string or a bare bucket URI.
    #[must_use]
    pub fn from_locator(locator: &str) -> Option<Self> {
        let trimmed = locator.trim();
        let relative = match BUCKET_SCHEMES
            .iter()
            .find_map(|scheme| trimmed.strip_prefix(scheme))
        {
            Some(rest) => rest.split_once('/').map(|(_, path)| path)?,
            None => trimmed,
        };
        relative.parse().ok()
    }

    /// Path segments
    #[inline]
    #[must_use]
    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// Final segment (the stored filename)
    #[inline]
    #[must_use]
    pub fn file_name(&self) -> Option<&str> {
        self.0.last().map(String::as_str)
    }

    /// Check whether this path lies under `prefix`
    ///
    /// Matching is on whole segments: `acme/s1` is under `acme` but not
    /// under `ac`.
    #[must_use]
    pub fn starts_with(&self, prefix: &str) -> bool {
        let prefix = prefix.trim_matches('/');
        if prefix.is_empty() {
            return true;
        }
        let wanted: Vec<&str> = prefix.split('/').collect();
        wanted.len() <= self.0.len() && self.0.iter().zip(&wanted).all(|(a, b)| a == b)
    }

    /// Render as a single string
    #[must_use]
    pub fn as_string(&self) -> String {
        self.0.join("/")
    }
}

impl Display for BlobPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("/"))
    }
}

impl FromStr for BlobPath {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim().trim_start_matches('/');
        if trimmed.is_empty() {
            return Err(PathError::Empty);
        }
        let segments = trimmed
            .split('/')
            .filter(|seg| !seg.is_empty())
            .map(|seg| {
                if seg == "." || seg == ".." {
                    Err(PathError::Traversal(s.to_string()))
                } else {
                    Ok(seg.to_string())
                }
            })
            .collect::<Result<Vec<_>, _>>()?;
        if segments.is_empty() {
            return Err(PathError::Empty);
        }
        Ok(Self(segments))
    }
}

impl TryFrom<String> for BlobPath {
    type Error = PathError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<BlobPath> for String {
    fn from(value: BlobPath) -> Self {
        value.as_string()
    }
}

fn sanitize_segment(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| if c == '/' || c == '\\' { '_' } else { c })
        .collect();
    match cleaned.as_str() {
        "" | "." | ".." => "_".to_string(),
        _ => cleaned,
    }
}

fn sanitize_filename(filename: &str) -> String {
    let base = filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default();
    sanitize_segment(base)
}

/// Blob path errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathError {
    /// Nothing left after trimming
    #[error("empty blob path")]
    Empty,

    /// `.` or `..` segment
    #[error("path traversal segment in {0}")]
    Traversal(String),
}
