use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::address::Network;
use crate::device::Device;
use crate::error::{Error, Result};

/// Settings read from the JSON config file. Every field is optional.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub network: Network,
    pub log_level: String,
    /// Devices reported by the static discovery source.
    pub devices: Vec<Device>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            network: Network::Main,
            log_level: "info".to_string(),
            devices: Vec::new(),
        }
    }
}

/// Get the default config path
pub fn default_config_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".hwibridge")
        .join("config.json")
}

impl BridgeConfig {
    /// Load from `path`. A missing file gives the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::debug!("No config at {:?}, using defaults", path);
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)?;
        serde_json::from_str(&text)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn load_default() -> Result<Self> {
        Self::load(&default_config_path())
    }
}
