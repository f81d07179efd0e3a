//! Runtime configuration via `stoa.toml`
//!
//! Every key is optional; a missing key takes its default. A config that
//! parses is still validated before a runtime will open with it.

use serde::{Deserialize, Serialize};
use std::path::Path;
use stoa_core::{Error, Limits, LockDiscipline, Result};

/// Config file name used by [`StmConfig::write_default_if_missing`] callers
pub const CONFIG_FILE_NAME: &str = "stoa.toml";

/// Runtime configuration loaded from `stoa.toml`
///
/// # Example
///
/// ```toml
/// max_threads = 16
/// lock_discipline = "sorted"
/// retry_limit = 100
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StmConfig {
    /// Worker slots, at most 128
    pub max_threads: usize,
    /// Period of the background epoch advancer
    pub epoch_interval_ms: u64,
    /// Spawn the advancer when the runtime opens
    pub start_advancer: bool,
    /// Order in which a commit takes its write locks
    pub lock_discipline: LockDiscipline,
    /// Lock attempts before a commit reports a conflict
    pub lock_spin_bound: u32,
    /// Item capacity of one transaction
    pub max_items: usize,
    /// Items per arena chunk
    pub item_chunk: usize,
    /// Default attempt limit for `Worker::run`; unlimited when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_limit: Option<u64>,
    /// First retry backoff; 0 only yields the thread
    pub backoff_base_us: u64,
    /// Upper bound on the retry backoff
    pub backoff_max_us: u64,
}

impl Default for StmConfig {
    fn default() -> Self {
        let limits = Limits::default();
        Self {
            max_threads: limits.max_threads,
            epoch_interval_ms: 1,
            start_advancer: true,
            lock_discipline: LockDiscipline::InsertionOrder,
            lock_spin_bound: limits.lock_spin_bound,
            max_items: limits.max_items,
            item_chunk: limits.item_chunk,
            retry_limit: None,
            backoff_base_us: 0,
            backoff_max_us: 1000,
        }
    }
}

impl StmConfig {
    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# stoa runtime configuration

# Worker slots (1..=128). Each thread running transactions holds one.
max_threads = 128

# Background epoch advancer period, and whether it starts with the runtime.
epoch_interval_ms = 1
start_advancer = true

# Write-lock order at commit: "insertion_order" (default) or "sorted".
# Pick one per deployment.
lock_discipline = "insertion_order"

# Lock attempts before a commit gives up on a held lock.
lock_spin_bound = 64

# Per-transaction item capacity and arena chunk size.
max_items = 32768
item_chunk = 512

# Default attempt limit for the retry loop (unlimited when unset).
# retry_limit = 1000

# Backoff between retries, doubling from base up to max.
# A base of 0 only yields the thread.
backoff_base_us = 0
backoff_max_us = 1000
"#
    }

    /// Parse and validate a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: StmConfig =
            toml::from_str(content).map_err(|e| Error::ConfigParse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a config file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or holds values
    /// the runtime cannot use.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: StmConfig = toml::from_str(&content).map_err(|e| {
            Error::ConfigParse(format!(
                "Failed to parse config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Write the default config file if it does not already exist.
    pub fn write_default_if_missing(path: &Path) -> Result<()> {
        if !path.exists() {
            std::fs::write(path, Self::default_toml())?;
        }
        Ok(())
    }

    /// Serialize this config to TOML and write it to the given path.
    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::InvalidConfig(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Check every value is usable
    pub fn validate(&self) -> Result<()> {
        self.to_limits().validate()?;
        if self.epoch_interval_ms == 0 {
            return Err(Error::InvalidConfig(
                "epoch_interval_ms must be at least 1".into(),
            ));
        }
        if self.retry_limit == Some(0) {
            return Err(Error::InvalidConfig(
                "retry_limit must allow at least one attempt".into(),
            ));
        }
        if self.backoff_base_us > self.backoff_max_us {
            return Err(Error::InvalidConfig(format!(
                "backoff_base_us ({}) exceeds backoff_max_us ({})",
                self.backoff_base_us, self.backoff_max_us
            )));
        }
        Ok(())
    }

    /// Transaction limits implied by this config
    pub fn to_limits(&self) -> Limits {
        Limits {
            max_items: self.max_items,
            item_chunk: self.item_chunk,
            lock_spin_bound: self.lock_spin_bound,
            max_threads: self.max_threads,
        }
    }
}
