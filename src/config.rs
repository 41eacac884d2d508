use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{AppError, Result};
use crate::sync::SyncSettings;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_db_path")]
    pub db_path: String,

    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,

    #[serde(default = "default_max_fetch_attempts")]
    pub max_fetch_attempts: u32,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_db_path() -> String {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("kioclip")
        .join("clips.db")
        .to_string_lossy()
        .to_string()
}

fn default_fetch_timeout() -> u64 {
    15
}

fn default_max_fetch_attempts() -> u32 {
    5
}

fn default_user_agent() -> String {
    format!("kioclip/{}", env!("CARGO_PKG_VERSION"))
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            fetch_timeout_secs: default_fetch_timeout(),
            max_fetch_attempts: default_max_fetch_attempts(),
            user_agent: default_user_agent(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    /// Reads the config at `path`, writing the defaults there first if it is missing.
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Config = toml::from_str(&content)?;
            config.validate()?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self).map_err(|e| AppError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("kioclip")
            .join("config.toml")
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn sync_settings(&self) -> SyncSettings {
        SyncSettings {
            fetch_timeout: self.fetch_timeout(),
            max_fetch_attempts: self.max_fetch_attempts,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.fetch_timeout_secs == 0 {
            return Err(AppError::Config("fetch_timeout_secs must be at least 1".to_string()));
        }
        if self.max_fetch_attempts == 0 {
            return Err(AppError::Config("max_fetch_attempts must be at least 1".to_string()));
        }
        Ok(())
    }
}
