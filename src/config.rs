//! Engine Configuration
//!
//! Loads engine options from a YAML or JSON file. The format is picked
//! from the file extension: `.yaml` and `.yml` are YAML, anything else is
//! read as JSON.
//!
//! # Example
//!
//! ```yaml
//! name: billing
//! tick_ms: 25
//! context:
//!   region: eu
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{debug, info};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::context::Context;

/// Engine name used when the file doesn't set one.
pub const DEFAULT_ENGINE_NAME: &str = "engine";

/// Tick period in milliseconds used when the file doesn't set one.
pub const DEFAULT_TICK_MS: u64 = 50;

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}. Check that the file exists and is readable")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Failed to parse config JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid value for '{field}': {message}")]
    Invalid {
        field: &'static str,
        message: String,
    },
}

/// Engine options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Engine name, used in error messages and logs
    #[serde(default = "default_name")]
    pub name: String,

    /// Tick period of flows built from this config
    #[serde(default = "default_tick_ms", alias = "tick")]
    pub tick_ms: u64,

    /// Context merged under every dispatched run
    #[serde(default)]
    pub context: Context,
}

fn default_name() -> String {
    DEFAULT_ENGINE_NAME.to_string()
}

fn default_tick_ms() -> u64 {
    DEFAULT_TICK_MS
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            tick_ms: DEFAULT_TICK_MS,
            context: Context::new(),
        }
    }
}

impl EngineConfig {
    /// Parses and validates a YAML document.
    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Parses and validates a JSON document.
    pub fn from_json_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    /// Rejects values no engine could run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "tick_ms",
                message: "tick must be at least 1 ms".to_string(),
            });
        }
        if self.name.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "name",
                message: "engine name must not be blank".to_string(),
            });
        }
        Ok(())
    }
}

/// Loads engine configuration from a file.
pub fn load_config(path: impl AsRef<Path>) -> Result<EngineConfig, ConfigError> {
    let path = path.as_ref();
    info!("Loading configuration from: {}", path.display());

    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    debug!("Config content loaded ({} bytes)", content.len());

    let is_yaml = matches!(
        path.extension().and_then(|ext| ext.to_str()),
        Some("yaml") | Some("yml")
    );

    let config = if is_yaml {
        EngineConfig::from_yaml_str(&content)?
    } else {
        EngineConfig::from_json_str(&content)?
    };

    info!(
        "Engine '{}': tick {} ms, {} context keys",
        config.name,
        config.tick_ms,
        config.context.len()
    );

    Ok(config)
}
