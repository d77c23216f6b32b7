//! Configuration management for Guardrail.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::{FileStore, DEFAULT_CAPACITY_BYTES};
use crate::error::{GuardrailError, Result};
use crate::ratelimit::PolicySet;

/// Main configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GuardrailConfig {
    /// Cache configuration
    #[serde(default)]
    pub cache: CacheSettings,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingSettings,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Cache configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheSettings {
    /// Path of the file-backed store
    #[serde(default = "default_store_path")]
    pub store_path: PathBuf,

    /// Store capacity in bytes of keys plus values
    #[serde(default = "default_capacity_bytes")]
    pub capacity_bytes: usize,

    /// Interval between background sweeps of expired entries
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            store_path: default_store_path(),
            capacity_bytes: default_capacity_bytes(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

impl CacheSettings {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    /// Open the file-backed store, at `path_override` if given.
    pub fn open_store(&self, path_override: Option<&Path>) -> Result<FileStore> {
        let path = path_override.unwrap_or(self.store_path.as_path());
        Ok(FileStore::open(path, self.capacity_bytes)?)
    }
}

fn default_store_path() -> PathBuf {
    PathBuf::from("guardrail-cache.json")
}

fn default_capacity_bytes() -> usize {
    DEFAULT_CAPACITY_BYTES
}

fn default_sweep_interval() -> u64 {
    300
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RateLimitingSettings {
    /// Path to a YAML file of named policies layered over the built-ins
    pub policies_path: Option<PathBuf>,
}

impl RateLimitingSettings {
    /// Built-in policies, overridden by the policy file if one is configured.
    pub fn load_policies(&self) -> Result<PolicySet> {
        let builtin = PolicySet::builtin();
        match &self.policies_path {
            Some(path) => Ok(builtin.merged_with(PolicySet::from_file(path)?)),
            None => Ok(builtin),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Default filter directive, overridden by `RUST_LOG`
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl GuardrailConfig {
    /// Load configuration from a file path.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Parse configuration from YAML.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: GuardrailConfig =
            serde_yaml::from_str(yaml).map_err(|e| GuardrailError::Config(e.to_string()))?;

        if config.cache.sweep_interval_secs == 0 {
            return Err(GuardrailError::Config(
                "cache.sweep_interval_secs must be greater than zero".to_string(),
            ));
        }
        Ok(config)
    }
}
