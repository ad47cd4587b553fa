//! Strata State Surface
//!
//! A single facade over execution state, session state and file references,
//! plus the lineage graph that records how files derive from one another.
//!
//! # Core Concepts
//!
//! - [`StateSurface`]: namespaced state access with an in-memory fallback
//!   for when the backing store is absent or failing
//! - [`LineageGraph`]: upload -> parse -> embed provenance forest
//! - [`SurfaceConfig`]: mode, TTL policy and logging settings
//!
//! File bytes live in a [`BlobStore`](strata_store::BlobStore) and have no
//! fallback: blob failures surface as [`SurfaceError`]s.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use strata_core::{FileType, Metadata};
//! use strata_store::MemoryBlobStore;
//! use strata_surface::{LineageGraph, StateSurface};
//!
//! # tokio_test_block(async {
//! let surface = Arc::new(
//!     StateSurface::memory_only().with_blob_store(Arc::new(MemoryBlobStore::new())),
//! );
//! let ref_id = surface
//!     .store_file("acme", "session-1", b"%PDF".to_vec(), "report.pdf", Metadata::new())
//!     .await
//!     .unwrap();
//!
//! let lineage = LineageGraph::new(surface.clone());
//! let id = ref_id.to_string();
//! lineage
//!     .record_lineage(&id, FileType::Uploaded, "report.pdf", "acme", None, Metadata::new())
//!     .await
//!     .unwrap();
//! assert!(lineage.get_chain(&id, "acme").await.unwrap().is_some());
//! # });
//! # fn tokio_test_block<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
//! # }
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod config;
mod error;
mod lineage;
pub mod logging;
mod router;
mod surface;

pub use config::{LogConfig, LogFormat, SurfaceConfig, SurfaceMode, TtlPolicy};
pub use error::{LineageError, SurfaceError};
pub use lineage::{LineageGraph, LineageResult, ReconcileReport, DEFAULT_RELATIONSHIP};
pub use logging::init_tracing;
pub use router::{write_tags, WriteRoute, TAG_BACKEND, TAG_STRATEGY, TAG_TENANT, TAG_TYPE};
pub use surface::{BlobLocation, StateSurface, SurfaceHealth, SurfaceResult};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
