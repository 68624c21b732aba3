//! Block configuration
//!
//! Per-block settings live in a YAML file, one section per block key:
//!
//! ```yaml
//! blocks:
//!   my_crate::Scale:
//!     factor: 2.5
//! ```
//!
//! ## Location (highest to lowest)
//!
//! 1. `$BLOCKDAG_CONFIG`
//! 2. `<config dir>/blockdag/blockdag.yaml` (`~/.config` on Linux, `%APPDATA%` on Windows)

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{DagError, Result};

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV: &str = "BLOCKDAG_CONFIG";

/// A section containing `config_update: false` is never replaced by `merge()`.
pub const CONFIG_UPDATE: &str = "config_update";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// block key -> settings
    #[serde(default)]
    pub blocks: BTreeMap<String, Map<String, Value>>,
}

impl Config {
    /// Get the default config file path
    pub fn default_path() -> PathBuf {
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            if !path.is_empty() {
                return PathBuf::from(path);
            }
        }
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("blockdag")
            .join("blockdag.yaml")
    }

    /// Load from the default location.
    ///
    /// Returns an empty config if the file doesn't exist.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::default_path())
    }

    /// Load from `path`; missing file → empty config, malformed → error.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).map_err(|e| DagError::Config {
            reason: format!("Failed to read config file {}: {}", path.display(), e),
        })?;

        Self::from_yaml(&content).map_err(|e| DagError::Config {
            reason: format!("Failed to parse config file {}: {}", path.display(), e),
        })
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Settings for one block key.
    pub fn section(&self, block_key: &str) -> Option<&Map<String, Value>> {
        self.blocks.get(block_key)
    }

    /// Typed lookup of one setting. `Ok(None)` if the section or key is absent.
    pub fn value<T: DeserializeOwned>(&self, block_key: &str, key: &str) -> Result<Option<T>> {
        let Some(raw) = self.section(block_key).and_then(|s| s.get(key)) else {
            return Ok(None);
        };
        serde_json::from_value(raw.clone())
            .map(Some)
            .map_err(|e| DagError::Config {
                reason: format!("Bad value for '{block_key}.{key}': {e}"),
            })
    }

    pub fn set_value(&mut self, block_key: &str, key: &str, value: impl Into<Value>) {
        self.blocks
            .entry(block_key.to_string())
            .or_default()
            .insert(key.to_string(), value.into());
    }

    /// Fold `other` into this config, section by section.
    ///
    /// New sections are added. Existing sections are updated key by key
    /// unless they carry `config_update: false`.
    pub fn merge(&mut self, other: Config) {
        for (name, section) in other.blocks {
            match self.blocks.get_mut(&name) {
                None => {
                    self.blocks.insert(name, section);
                }
                Some(existing) => {
                    let locked = existing.get(CONFIG_UPDATE) == Some(&Value::Bool(false));
                    if !locked {
                        existing.extend(section);
                    }
                }
            }
        }
    }
}
