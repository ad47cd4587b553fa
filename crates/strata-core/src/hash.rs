//! Content digests for stored file bytes
//!
//! Provides [`ContentDigest`], a strongly-typed SHA-256 digest recorded on
//! every [`FileReference`](crate::FileReference).

use sha2::{Digest, Sha256};
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

/// Prefix used in the textual form of a digest
pub const DIGEST_PREFIX: &str = "sha256:";

/// A 32-byte SHA-256 content digest
///
/// Rendered as `sha256:<64 hex chars>`. Parsing also accepts the bare hex
/// form so digests computed by upstream stages can be registered as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContentDigest([u8; 32]);

impl ContentDigest {
    /// Wrap raw digest bytes
    #[inline]
    #[must_use]
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Digest of `data`
    #[must_use]
    pub fn compute(data: &[u8]) -> Self {
        let out = Sha256::digest(data);
        Self(out.into())
    }

    /// Raw digest bytes
    #[inline]
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex without the algorithm prefix
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// First 12 hex chars, for log lines
    #[must_use]
    pub fn short(&self) -> String {
        hex::encode(&self.0[..6])
    }

    /// Check `data` against this digest
    #[must_use]
    pub fn matches(&self, data: &[u8]) -> bool {
        Self::compute(data) == *self
    }
}

impl Display for ContentDigest {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{DIGEST_PREFIX}{}", hex::encode(self.0))
    }
}

impl FromStr for ContentDigest {
    type Err = DigestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex_part = s.strip_prefix(DIGEST_PREFIX).unwrap_or(s);
        let bytes = hex::decode(hex_part)?;
        if bytes.len() != 32 {
            return Err(DigestError::InvalidLength {
                expected: 32,
                actual: bytes.len(),
            });
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }
}

impl serde::Serialize for ContentDigest {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> serde::Deserialize<'de> for ContentDigest {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Errors parsing a textual digest
#[derive(Debug, thiserror::Error)]
pub enum DigestError {
    /// Wrong number of bytes after decoding
    #[error("invalid digest length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    /// Not valid hex
    #[error("hex decode error: {0}")]
    HexDecode(#[from] hex::FromHexError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_vector() {
        let digest = ContentDigest::compute(b"abc");
        assert_eq!(
            digest.to_hex(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn display_has_prefix_and_parses_back() {
        let digest = ContentDigest::compute(b"hello");
        let text = digest.to_string();
        assert!(text.starts_with(DIGEST_PREFIX));
        assert_eq!(text.parse::<ContentDigest>().unwrap(), digest);
    }

    #[test]
    fn bare_hex_is_accepted() {
        let digest = ContentDigest::compute(b"hello");
        assert_eq!(digest.to_hex().parse::<ContentDigest>().unwrap(), digest);
    }

    #[test]
    fn short_length_rejected() {
        let result = "sha256:abcd".parse::<ContentDigest>();
        assert!(matches!(
            result,
            Err(DigestError::InvalidLength { expected: 32, actual: 2 })
        ));
    }

    #[test]
    fn matches_checks_content() {
        let digest = ContentDigest::compute(b"payload");
        assert!(digest.matches(b"payload"));
        assert!(!digest.matches(b"other"));
    }

    #[test]
    fn serde_uses_prefixed_string() {
        let digest = ContentDigest::compute(b"x");
        let json = serde_json::to_string(&digest).unwrap();
        assert!(json.starts_with("\"sha256:"));
        let back: ContentDigest = serde_json::from_str(&json).unwrap();
        assert_eq!(back, digest);
    }
}
