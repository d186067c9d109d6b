//! Engine configuration.
//!
//! Loaded from `CHRONICLE_*` environment variables or from a YAML document.
//! Every field has a default, so an empty environment yields a usable
//! configuration.

use serde::Deserialize;
use thiserror::Error;

use crate::snapshot::SnapshotPolicy;

/// Output format for the tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// One JSON object per line.
    #[default]
    Json,
    /// Human-readable multi-line output.
    Pretty,
}

/// Tunables shared by the engine components.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Snapshot cadence in versions; `0` disables snapshots.
    pub snapshot_every: u64,
    /// Snapshots kept per stream after each new one is taken.
    pub snapshots_kept: usize,
    /// Attempts a command gets before a concurrency conflict is surfaced.
    pub append_retry_budget: u32,
    /// Per-subscriber queue capacity of the event bus.
    pub bus_queue_capacity: usize,
    /// Events fetched per read when a projection catches up.
    pub projection_batch_size: usize,
    /// Events processed between projection checkpoint writes.
    pub projection_checkpoint_every: u64,
    /// Resets a `reset_on_error` projection may perform before giving up.
    pub projection_max_resets: u32,
    /// Tracing output format.
    pub log_format: LogFormat,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            snapshot_every: 50,
            snapshots_kept: 1,
            append_retry_budget: 3,
            bus_queue_capacity: 1024,
            projection_batch_size: 256,
            projection_checkpoint_every: 100,
            projection_max_resets: 3,
            log_format: LogFormat::Json,
        }
    }
}

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A variable is present but cannot be parsed.
    #[error("invalid value for {key}: {value}")]
    Invalid {
        /// Variable name.
        key: &'static str,
        /// The offending value.
        value: String,
    },

    /// The YAML document is malformed.
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_yaml::Error),
}

impl EngineConfig {
    /// Reads configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if a variable is set but malformed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads configuration through an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if a variable is set but malformed.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            snapshot_every: parse_var(&lookup, "CHRONICLE_SNAPSHOT_EVERY", defaults.snapshot_every)?,
            snapshots_kept: parse_var(&lookup, "CHRONICLE_SNAPSHOTS_KEPT", defaults.snapshots_kept)?,
            append_retry_budget: parse_var(
                &lookup,
                "CHRONICLE_APPEND_RETRY_BUDGET",
                defaults.append_retry_budget,
            )?,
            bus_queue_capacity: parse_var(
                &lookup,
                "CHRONICLE_BUS_QUEUE_CAPACITY",
                defaults.bus_queue_capacity,
            )?,
            projection_batch_size: parse_var(
                &lookup,
                "CHRONICLE_PROJECTION_BATCH_SIZE",
                defaults.projection_batch_size,
            )?,
            projection_checkpoint_every: parse_var(
                &lookup,
                "CHRONICLE_PROJECTION_CHECKPOINT_EVERY",
                defaults.projection_checkpoint_every,
            )?,
            projection_max_resets: parse_var(
                &lookup,
                "CHRONICLE_PROJECTION_MAX_RESETS",
                defaults.projection_max_resets,
            )?,
            log_format: match lookup("CHRONICLE_LOG_FORMAT").as_deref() {
                None => defaults.log_format,
                Some("json") => LogFormat::Json,
                Some("pretty") => LogFormat::Pretty,
                Some(other) => {
                    return Err(ConfigError::Invalid {
                        key: "CHRONICLE_LOG_FORMAT",
                        value: other.to_owned(),
                    });
                }
            },
        })
    }

    /// Parses a YAML document; missing keys take their defaults.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Parse` if the document is malformed.
    pub fn from_yaml(document: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(document)?)
    }

    /// The snapshot policy implied by `snapshot_every`.
    #[must_use]
    pub fn snapshot_policy(&self) -> SnapshotPolicy {
        match self.snapshot_every {
            0 => SnapshotPolicy::Never,
            n => SnapshotPolicy::EveryNVersions(n),
        }
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value: raw }),
    }
}
