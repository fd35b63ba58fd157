use std::fs;
use std::path::PathBuf;

use anyhow::Context;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Visual flash intensity tier (0-3). Tiers below 3 flash connected
    /// lights at level 1.0 on loud passages; tier 3 flashes at 2.0.
    pub flash_mode: u8,

    /// Maximum wire length accepted when connecting two objects.
    pub max_cable_length: f32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            flash_mode: 1,
            max_cable_length: 16.0,
        }
    }
}

impl Config {
    /// Load configuration from the platform-specific config directory.
    /// Returns defaults if the file doesn't exist yet.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &PathBuf) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let data = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;
        let config = serde_json::from_str(&data)
            .with_context(|| format!("Failed to parse config at {}", path.display()))?;
        Ok(config)
    }

    /// Save configuration to the platform-specific config directory.
    pub fn save(&self) -> anyhow::Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &PathBuf) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory {}", parent.display()))?;
        }

        let data = serde_json::to_string_pretty(self)?;
        fs::write(path, data)
            .with_context(|| format!("Failed to save config to {}", path.display()))?;
        Ok(())
    }

    fn config_path() -> anyhow::Result<PathBuf> {
        let dir = dirs::config_dir().context("No config directory available on this platform")?;
        Ok(dir.join("soundwire").join("config.json"))
    }
}
