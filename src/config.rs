use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;

/// Tunables for compilation and graph validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerConfig {
    /// Workflows deeper than this get an advisory warning.
    pub max_depth_warning: usize,
    /// Critical paths longer than this get an advisory warning.
    pub critical_path_warning: usize,
    pub supported_ir_major: u32,
    /// Identifying key used for deduplication when a lookup source names none.
    pub default_key_field: String,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            max_depth_warning: 10,
            critical_path_warning: 12,
            supported_ir_major: 1,
            default_key_field: "id".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    /// Upper bound on a single audit store call before it is abandoned.
    pub store_timeout_ms: u64,
}

impl TrackingConfig {
    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            store_timeout_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub compiler: CompilerConfig,
    pub tracking: TrackingConfig,
}

impl Config {
    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Loads a configuration file. Missing keys keep their defaults.
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_string(),
            source,
        })?;
        Self::from_json_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_string(),
            source,
        })
    }
}
