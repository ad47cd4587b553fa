//! In-memory implementations of the storage protocols
//!
//! [`MemoryStateBackend`] is the fallback store every state surface owns.
//! The blob and contract stores are reference implementations for tests
//! and single-process deployments.

mod blob;
mod contract;
mod state;

pub use blob::MemoryBlobStore;
pub use contract::MemoryContractStore;
pub use state::MemoryStateBackend;
