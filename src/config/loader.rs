//! Configuration Loader
//!
//! Handles loading and merging client configuration from multiple sources.

use crate::config::client::ClientConfig;
use crate::error::{RelayError, Result};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

/// Configuration loader with support for multiple sources
pub struct ConfigLoader {
    config: ClientConfig,
    /// Every key set so far, explicit nulls included
    layers: Map<String, Value>,
}

impl ConfigLoader {
    fn empty() -> Self {
        Self {
            config: ClientConfig::default(),
            layers: Map::new(),
        }
    }

    /// Create a new config loader and load from default locations
    pub fn new() -> Result<Self> {
        let mut loader = Self::empty();

        loader.load_from_default_paths()?;

        Ok(loader)
    }

    /// Create a loader with a specific config file
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let mut loader = Self::empty();

        loader.load_from_file(path)?;

        Ok(loader)
    }

    /// Load configuration from default paths
    fn load_from_default_paths(&mut self) -> Result<()> {
        for path in Self::get_config_paths() {
            if path.exists() {
                self.load_from_file(&path)?;
            }
        }

        Ok(())
    }

    /// Get list of config paths to check, lowest precedence first
    fn get_config_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();

        if let Some(home_dir) = dirs::home_dir() {
            paths.push(home_dir.join(".completion-relay").join("config.json"));
        }

        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("completion-relay").join("config.json"));
        }

        paths.push(PathBuf::from("completion-relay.json"));

        if let Ok(custom_path) = std::env::var("COMPLETION_RELAY_CONFIG") {
            paths.push(PathBuf::from(custom_path));
        }

        paths
    }

    /// Load configuration from a specific file
    fn load_from_file(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            RelayError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;

        let overlay: Value = serde_json::from_str(&content).map_err(|e| {
            RelayError::Config(format!("Failed to parse {}: {}", path.display(), e))
        })?;

        self.merge_config(overlay)
            .map_err(|e| RelayError::Config(format!("Invalid config in {}: {}", path.display(), e)))
    }

    /// Merge a JSON object into the current config (its keys override ours)
    fn merge_config(&mut self, overlay: Value) -> Result<()> {
        let Value::Object(overlay) = overlay else {
            return Err(RelayError::Config("expected a JSON object".to_string()));
        };

        let mut layers = self.layers.clone();
        layers.extend(overlay);
        self.config = serde_json::from_value(Value::Object(layers.clone()))?;
        self.layers = layers;

        Ok(())
    }

    /// Get the loaded configuration
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Take ownership of the configuration
    pub fn into_config(self) -> ClientConfig {
        self.config
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new().unwrap_or_else(|_| Self::empty())
    }
}
