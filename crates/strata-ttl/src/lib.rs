//! Strata TTL Enforcement
//!
//! Expires materialization contracts once their `expires_at` passes,
//! purges the blobs they cover and stamps the lineage of the source file.
//!
//! - [`TtlEnforcementJob`]: one re-entrant sweep
//! - [`SweepScheduler`]: runs the job on an interval until shut down
//! - [`TtlConfig`]: interval, concurrency and dry-run settings

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod config;
mod error;
mod job;
mod scheduler;
#[cfg(test)]
mod test_support;

pub use config::TtlConfig;
pub use error::TtlError;
pub use job::{SweepReport, TtlEnforcementJob};
pub use scheduler::{SchedulerHandle, SweepScheduler};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
