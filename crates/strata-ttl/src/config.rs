//! Sweep configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// TTL job settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TtlConfig {
    /// Seconds between scheduled sweeps
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Lineage groups processed at once; `1` is sequential
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Report what would happen without deleting or marking
    #[serde(default)]
    pub dry_run: bool,
}

fn default_interval_secs() -> u64 {
    300
}

fn default_concurrency() -> usize {
    1
}

impl Default for TtlConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            concurrency: default_concurrency(),
            dry_run: false,
        }
    }
}

impl TtlConfig {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    #[must_use]
    pub fn with_interval_secs(mut self, secs: u64) -> Self {
        self.interval_secs = secs;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Sweep period, never shorter than one second
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}
