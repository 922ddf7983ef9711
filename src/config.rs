//! Configuration management for pairtail.
//!
//! Loads and validates configuration from TOML files; every knob has a
//! default so running without a config file is valid.

use anyhow::Result;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::tailer::TailerSettings;

// Default values as constants
const DEFAULT_POLL_INTERVAL_MS: u64 = 10_000;
const DEFAULT_MAX_TORN_RETRIES: u32 = 10;
const DEFAULT_BATCH_BYTES: u64 = 5_000;
const DEFAULT_BATCH_COUNT: u64 = 5_000;
const DEFAULT_SCAN_INTERVAL_MS: u64 = 5_000;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub tailer: TailerConfig,
    #[serde(default)]
    pub sink: SinkConfig,
    #[serde(default)]
    pub supervisor: SupervisorConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TailerConfig {
    /// Sleep between poll iterations (DEFAULT: 10000 ms)
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Poll cycles granted to a torn trailing record before the tailer
    /// gives up at day rollover (DEFAULT: 10)
    #[serde(default = "default_max_torn_retries")]
    pub max_torn_retries: u32,
}

impl Default for TailerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            max_torn_retries: DEFAULT_MAX_TORN_RETRIES,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SinkConfig {
    /// Accumulated payload bytes that trigger a flush (DEFAULT: 5000)
    #[serde(default = "default_batch_bytes")]
    pub batch_bytes: u64,
    /// Accumulated entries that trigger a flush (DEFAULT: 5000)
    #[serde(default = "default_batch_count")]
    pub batch_count: u64,
    /// When set, batches are persisted as ndjson files under this
    /// directory; otherwise the hand-off is logged only.
    #[serde(default)]
    pub output_dir: Option<String>,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            batch_bytes: DEFAULT_BATCH_BYTES,
            batch_count: DEFAULT_BATCH_COUNT,
            output_dir: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SupervisorConfig {
    /// Sleep between day-directory scans (DEFAULT: 5000 ms)
    #[serde(default = "default_scan_interval_ms")]
    pub scan_interval_ms: u64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            scan_interval_ms: DEFAULT_SCAN_INTERVAL_MS,
        }
    }
}

// Serde default functions (must be regular fn, not const fn)
fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}
fn default_max_torn_retries() -> u32 {
    DEFAULT_MAX_TORN_RETRIES
}
fn default_batch_bytes() -> u64 {
    DEFAULT_BATCH_BYTES
}
fn default_batch_count() -> u64 {
    DEFAULT_BATCH_COUNT
}
fn default_scan_interval_ms() -> u64 {
    DEFAULT_SCAN_INTERVAL_MS
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path.as_ref())?;
        let config: Config = toml::from_str(&raw)?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.tailer.poll_interval_ms == 0 {
            anyhow::bail!("tailer.poll_interval_ms must be positive");
        }
        if self.tailer.max_torn_retries == 0 {
            anyhow::bail!("tailer.max_torn_retries must be at least 1");
        }
        if self.sink.batch_bytes == 0 {
            anyhow::bail!("sink.batch_bytes must be positive");
        }
        if self.sink.batch_count == 0 {
            anyhow::bail!("sink.batch_count must be positive");
        }
        if self.supervisor.scan_interval_ms == 0 {
            anyhow::bail!("supervisor.scan_interval_ms must be positive");
        }
        if let Some(dir) = &self.sink.output_dir {
            if dir.trim().is_empty() {
                anyhow::bail!("sink.output_dir cannot be empty when set");
            }
        }
        Ok(())
    }

    pub fn tailer_settings(&self) -> TailerSettings {
        TailerSettings {
            poll_interval: Duration::from_millis(self.tailer.poll_interval_ms),
            max_torn_retries: self.tailer.max_torn_retries,
        }
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_millis(self.supervisor.scan_interval_ms)
    }

    pub fn output_dir_path(&self) -> Option<PathBuf> {
        self.sink.output_dir.as_ref().map(|dir| {
            let expanded = shellexpand::tilde(dir);
            PathBuf::from(expanded.as_ref())
        })
    }
}
