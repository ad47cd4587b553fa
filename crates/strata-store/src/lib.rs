//! Strata storage protocols
//!
//! The contracts the state surface and the TTL job require from their
//! collaborators:
//! - [`StateBackend`]: namespaced key -> payload store with per-key TTL
//! - [`BlobStore`]: raw file bytes addressed by [`BlobPath`](strata_core::BlobPath)
//! - [`ContractStore`]: materialization contracts subject to expiry
//!
//! The [`memory`] module provides in-memory implementations of all three.
//! How production backends implement these protocols is outside this crate.

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod error;
pub mod memory;
mod traits;

pub use error::{StoreError, StoreResult};
pub use memory::{MemoryBlobStore, MemoryContractStore, MemoryStateBackend};
pub use traits::{
    payload_version, BlobInfo, BlobStore, ContractStore, LineageExpirySink, StateBackend,
    StoredState,
};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
