use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{HerdError, Result};

/// Connection settings for the virtualization engine and its image proxy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Base URL of the engine API, e.g. "https://engine.example.com/api".
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Disable certificate validation and hostname verification entirely.
    #[serde(default)]
    pub insecure: bool,
    /// CA bundle trusted for the engine API and the transfer proxy.
    pub ca_file: Option<PathBuf>,
}

impl EngineConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            username: None,
            password: None,
            insecure: false,
            ca_file: None,
        }
    }

    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &PathBuf) -> Result<Self> {
        if !path.exists() {
            return Err(HerdError::Config(format!(
                "engine config not found at {}; pass --url or create the file",
                path.display()
            )));
        }

        let content = std::fs::read_to_string(path)?;
        let config: EngineConfig =
            serde_yaml::from_str(&content).map_err(|e| HerdError::Config(e.to_string()))?;
        debug!("Loaded engine config from {}", path.display());
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path()?;
        if let Some(config_dir) = config_path.parent() {
            std::fs::create_dir_all(config_dir)?;
        }

        let content =
            serde_yaml::to_string(self).map_err(|e| HerdError::Config(e.to_string()))?;
        std::fs::write(&config_path, content)?;

        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        let home = dirs::home_dir()
            .ok_or_else(|| HerdError::Config("Cannot determine home directory".to_string()))?;
        Ok(home.join(".diskherd").join("config.yaml"))
    }
}
