//! Configuration types and loading
//!
//! Settings for the command line front end: session tuning, the set of
//! already-known device ids and the profile applied on connect.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

use crate::session::SessionConfig;

/// Root configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Configuration name/description
    #[serde(default)]
    pub name: String,

    /// Session settings
    #[serde(default)]
    pub session: SessionConfig,

    /// Device ids already seen; `list --new` hides them
    #[serde(default)]
    pub known_devices: Vec<u32>,

    /// Profile applied when `monitor` connects
    #[serde(default)]
    pub default_profile: Option<String>,

    /// Maximum lines per second printed by `monitor` (0 = every report)
    #[serde(default = "default_monitor_rate")]
    pub monitor_rate_hz: u32,
}

fn default_monitor_rate() -> u32 {
    20
}

impl Default for Config {
    fn default() -> Self {
        Self {
            name: "Default Configuration".to_string(),
            session: SessionConfig::default(),
            known_devices: Vec::new(),
            default_profile: None,
            monitor_rate_hz: default_monitor_rate(),
        }
    }
}

impl Config {
    /// Load configuration from a JSON file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Load `config.json` from a directory, or a file directly
    pub fn load_dir<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.is_dir() {
            return Self::load(path);
        }

        let main_config = path.join("config.json");
        if main_config.exists() {
            return Self::load(&main_config);
        }

        Ok(Config::default())
    }

    /// Save configuration to a JSON file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Remember a device id. Returns false if it was already known.
    pub fn remember_device(&mut self, id: u32) -> bool {
        if self.known_devices.contains(&id) {
            return false;
        }
        self.known_devices.push(id);
        true
    }
}
