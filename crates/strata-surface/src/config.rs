//! Surface configuration
//!
//! Loaded from TOML, then overridden by `STRATA_*` environment variables.
//! Every field has a default, so an empty file is a valid configuration.

use crate::error::SurfaceError;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use strata_core::StateKind;

/// Environment variable prefix for overrides
pub const ENV_PREFIX: &str = "STRATA_";

/// Where state writes go
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SurfaceMode {
    /// Backing store first, in-memory fallback on failure
    #[default]
    Backed,
    /// In-memory fallback only
    MemoryOnly,
}

impl SurfaceMode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Backed => "backed",
            Self::MemoryOnly => "memory_only",
        }
    }
}

impl FromStr for SurfaceMode {
    type Err = SurfaceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "backed" => Ok(Self::Backed),
            "memory_only" | "memory-only" | "memory" => Ok(Self::MemoryOnly),
            other => Err(SurfaceError::Config(format!("unknown mode: {other}"))),
        }
    }
}

/// Default TTL per state kind, in seconds; `0` never expires
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TtlPolicy {
    #[serde(default = "default_execution_secs")]
    pub execution_secs: u64,
    #[serde(default = "default_session_secs")]
    pub session_secs: u64,
    #[serde(default = "default_file_secs")]
    pub file_secs: u64,
    #[serde(default)]
    pub lineage_secs: u64,
}

fn default_execution_secs() -> u64 {
    3600
}

fn default_session_secs() -> u64 {
    86_400
}

fn default_file_secs() -> u64 {
    86_400
}

impl Default for TtlPolicy {
    fn default() -> Self {
        Self {
            execution_secs: default_execution_secs(),
            session_secs: default_session_secs(),
            file_secs: default_file_secs(),
            lineage_secs: 0,
        }
    }
}

impl TtlPolicy {
    /// TTL applied when a write does not specify one
    #[inline]
    #[must_use]
    pub const fn for_kind(&self, kind: StateKind) -> u64 {
        match kind {
            StateKind::Execution => self.execution_secs,
            StateKind::Session => self.session_secs,
            StateKind::File => self.file_secs,
            StateKind::Lineage => self.lineage_secs,
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Filter directive used when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

/// State surface configuration
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SurfaceConfig {
    #[serde(default)]
    pub mode: SurfaceMode,
    #[serde(default)]
    pub ttl: TtlPolicy,
    #[serde(default)]
    pub log: LogConfig,
}

impl SurfaceConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Memory-only configuration, mostly for tests
    #[must_use]
    pub fn memory_only() -> Self {
        Self::default().with_mode(SurfaceMode::MemoryOnly)
    }

    #[inline]
    #[must_use]
    pub fn with_mode(mut self, mode: SurfaceMode) -> Self {
        self.mode = mode;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_ttl(mut self, ttl: TtlPolicy) -> Self {
        self.ttl = ttl;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_log(mut self, log: LogConfig) -> Self {
        self.log = log;
        self
    }

    /// Parse TOML without applying environment overrides
    ///
    /// # Errors
    /// Returns [`SurfaceError::Config`] on malformed TOML.
    pub fn from_toml_str(raw: &str) -> Result<Self, SurfaceError> {
        toml::from_str(raw).map_err(|e| SurfaceError::Config(e.to_string()))
    }

    /// Load from a TOML file, then apply `STRATA_*` environment overrides
    ///
    /// # Errors
    /// Fails if the file cannot be read, does not parse, or an override
    /// carries an unparsable value.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let mut config = Self::from_toml_str(&raw)
            .with_context(|| format!("parsing config {}", path.display()))?;
        config
            .apply_overrides(|name| std::env::var(name).ok())
            .context("applying environment overrides")?;
        tracing::debug!("Loaded surface config from {}", path.display());
        Ok(config)
    }

    /// Apply overrides from `lookup`, keyed by full variable name
    ///
    /// # Errors
    /// Returns [`SurfaceError::Config`] if a variable is set but unparsable.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), SurfaceError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |suffix: &str| lookup(&format!("{ENV_PREFIX}{suffix}"));

        if let Some(mode) = var("MODE") {
            self.mode = mode.parse()?;
        }
        if let Some(level) = var("LOG_LEVEL") {
            self.log.level = level;
        }
        if let Some(secs) = var("TTL_EXECUTION_SECS") {
            self.ttl.execution_secs = parse_secs("TTL_EXECUTION_SECS", &secs)?;
        }
        if let Some(secs) = var("TTL_SESSION_SECS") {
            self.ttl.session_secs = parse_secs("TTL_SESSION_SECS", &secs)?;
        }
        if let Some(secs) = var("TTL_FILE_SECS") {
            self.ttl.file_secs = parse_secs("TTL_FILE_SECS", &secs)?;
        }
        Ok(())
    }
}

fn parse_secs(name: &str, raw: &str) -> Result<u64, SurfaceError> {
    raw.trim()
        .parse()
        .map_err(|_| SurfaceError::Config(format!("{ENV_PREFIX}{name}: not a number: {raw}")))
}
