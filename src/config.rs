// src/config.rs

//! Runtime settings for the notifier and the `fsnotifier` binary.
//!
//! Settings are read from a JSON file named by the `FSNOTIFIER_CONFIG`
//! environment variable. Every field has a default, so a partial file (or no
//! file at all) is fine.

use std::fs;
use std::path::{Path, PathBuf};

use log::{info, warn};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::error::{NotifyError, Result};
use crate::os::inotify::MIN_READ_BUFFER;

/// Environment variable naming the config file.
pub const CONFIG_ENV_VAR: &str = "FSNOTIFIER_CONFIG";

/// Process-wide configuration, loaded on first use.
pub static CONFIG: Lazy<Config> = Lazy::new(Config::load_or_default);

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Bytes requested per read from the inotify descriptor. Raised to the
    /// size of one maximal event if set lower.
    pub read_buffer_size: usize,
    /// Flags the binary watches with when none are given on the command line.
    pub default_flags: Vec<String>,
    /// `env_logger` filter used when `RUST_LOG` is unset.
    pub log_filter: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            read_buffer_size: 64 * 1024,
            default_flags: [
                "create",
                "delete",
                "modify",
                "attrib",
                "moved_from",
                "moved_to",
                "delete_self",
                "move_self",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            log_filter: "info".to_string(),
        }
    }
}

impl Config {
    pub fn from_json_str(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let config_error = |source: anyhow::Error| NotifyError::Config {
            path: path.to_path_buf(),
            source,
        };
        let text = fs::read_to_string(path).map_err(|e| config_error(e.into()))?;
        Self::from_json_str(&text).map_err(|e| config_error(e.into()))
    }

    /// Loads from `FSNOTIFIER_CONFIG` if set, falling back to defaults on any
    /// problem.
    pub fn load_or_default() -> Self {
        let Some(path) = std::env::var_os(CONFIG_ENV_VAR).map(PathBuf::from) else {
            return Config::default();
        };
        match Self::load(&path) {
            Ok(config) => {
                info!("Loaded configuration from {}", path.display());
                config
            }
            Err(e) => {
                warn!("{:#}; using default configuration", anyhow::Error::from(e));
                Config::default()
            }
        }
    }

    /// The read buffer size actually used.
    pub fn effective_read_buffer_size(&self) -> usize {
        self.read_buffer_size.max(MIN_READ_BUFFER)
    }
}
