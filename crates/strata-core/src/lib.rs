//! Strata Core
//!
//! Identifiers, keys and typed records shared by the state surface, the
//! lineage accessor and the TTL enforcement job. Nothing in this crate
//! performs I/O.
//!
//! # Core Concepts
//!
//! - [`StateKey`]: `{kind}:{tenant_id}:{resource_id}` namespaced key
//! - [`FileRefId`]: `file:{tenant}:{session}:{uuid}` reference id
//! - [`BlobPath`]: bucket-relative blob locator
//! - [`ContentDigest`]: SHA-256 digest of stored bytes
//! - [`StatePayload`]: tagged payload, one variant per [`StateKind`]
//!
//! # Example
//!
//! ```rust
//! use strata_core::{BlobPath, FileRefId, StateKind, StateKey};
//!
//! let id = FileRefId::generate("acme", "session-1").unwrap();
//! let path = BlobPath::for_upload("acme", "session-1", id.file_uuid(), "report.pdf");
//! assert_eq!(path.file_name(), Some("report.pdf"));
//!
//! let key = StateKey::new(StateKind::Session, "acme", "session-1").unwrap();
//! assert_eq!(key.to_string(), "session:acme:session-1");
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod error;
mod hash;
mod key;
mod path;
pub mod types;

pub use error::CoreError;
pub use hash::{ContentDigest, DigestError, DIGEST_PREFIX};
pub use key::{FileRefId, StateKey, StateKind};
pub use path::{BlobPath, PathError};
pub use types::{
    ContractStatus, ExecutionState, ExecutionStatus, FileReference, FileType, LineageChain,
    LineageFact, MaterializationContract, MaterializationType, Metadata, SessionState, StateEntry,
    StatePayload, StateRecord, Tags,
};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
