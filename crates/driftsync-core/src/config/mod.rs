//! Engine tuning configuration.
//!
//! Every field has a default, so an empty JSON object (or no file at all) is a
//! valid configuration. Unknown keys are rejected to catch typos early.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::models::DEFAULT_MAX_RETRIES;
use crate::{Error, Result};

const MIB: u64 = 1024 * 1024;

/// Runtime knobs for the detector, queue and transfer coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Window in which filesystem events on one path are collapsed
    pub debounce_window_ms: u64,
    /// Interval between reconciliation scans in watch mode
    pub scan_interval_secs: u64,
    /// Interval between queue drains in `OperationQueue::run`
    pub queue_poll_interval_secs: u64,
    /// Upper bound on concurrently executing queued operations
    pub max_concurrent_transfers: usize,
    /// Retry cap stamped on newly enqueued operations
    pub max_retries: u32,
    pub backoff_base_secs: u64,
    pub backoff_cap_secs: u64,
    /// How long completed operations and resolved conflicts are kept
    pub completed_retention_days: u64,
    /// Bytes per chunk for chunked uploads
    pub chunk_size: u64,
    /// Files at or below this size use a single-shot upload
    pub small_file_threshold: u64,
    /// Capacity of the raw watcher event channel
    pub watcher_channel_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            debounce_window_ms: 2_000,
            scan_interval_secs: 300,
            queue_poll_interval_secs: 30,
            max_concurrent_transfers: 4,
            max_retries: DEFAULT_MAX_RETRIES,
            backoff_base_secs: 5,
            backoff_cap_secs: 300,
            completed_retention_days: 7,
            chunk_size: 4 * MIB,
            small_file_threshold: 4 * MIB,
            watcher_channel_capacity: 1_024,
        }
    }
}

impl EngineConfig {
    /// Load and validate a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let config = Self::from_json(&raw)
            .map_err(|error| Error::Config(format!("{}: {error}", path.display())))?;
        tracing::debug!(path = %path.display(), "Loaded engine config");
        Ok(config)
    }

    /// Load `path` if it exists, otherwise use defaults.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Parse and validate a JSON payload.
    pub fn from_json(payload: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(payload)
            .map_err(|error| Error::Config(format!("invalid config JSON: {error}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(Error::Config("chunk_size must be greater than zero".to_string()));
        }
        if self.max_concurrent_transfers == 0 {
            return Err(Error::Config(
                "max_concurrent_transfers must be greater than zero".to_string(),
            ));
        }
        if self.backoff_base_secs == 0 {
            return Err(Error::Config(
                "backoff_base_secs must be greater than zero".to_string(),
            ));
        }
        if self.backoff_cap_secs < self.backoff_base_secs {
            return Err(Error::Config(format!(
                "backoff_cap_secs ({}) must not be below backoff_base_secs ({})",
                self.backoff_cap_secs, self.backoff_base_secs
            )));
        }
        if self.watcher_channel_capacity == 0 {
            return Err(Error::Config(
                "watcher_channel_capacity must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub const fn debounce_window(&self) -> Duration {
        Duration::from_millis(self.debounce_window_ms)
    }

    pub const fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs)
    }

    pub const fn queue_poll_interval(&self) -> Duration {
        Duration::from_secs(self.queue_poll_interval_secs)
    }

    pub const fn backoff_base(&self) -> Duration {
        Duration::from_secs(self.backoff_base_secs)
    }

    pub const fn backoff_cap(&self) -> Duration {
        Duration::from_secs(self.backoff_cap_secs)
    }

    pub const fn completed_retention(&self) -> Duration {
        Duration::from_secs(self.completed_retention_days * 24 * 60 * 60)
    }
}
