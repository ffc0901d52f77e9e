//! Configuration Storage
//!
//! Reads and writes `terminal.json` under ~/.vmdash (%APPDATA%\vmdash on Windows).

use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use super::types::{TerminalConfig, CONFIG_VERSION};

/// Configuration storage errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to determine config directory")]
    NoConfigDir,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config version {found} is newer than supported {supported}")]
    VersionTooNew { found: u32, supported: u32 },
}

/// Get the vmdash configuration directory
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    #[cfg(windows)]
    {
        if let Some(app_data) = dirs::config_dir() {
            return Ok(app_data.join("vmdash"));
        }
        dirs::home_dir()
            .map(|home| home.join(".vmdash"))
            .ok_or(ConfigError::NoConfigDir)
    }

    #[cfg(not(windows))]
    {
        dirs::home_dir()
            .map(|home| home.join(".vmdash"))
            .ok_or(ConfigError::NoConfigDir)
    }
}

/// Get the terminal config file path
pub fn terminal_config_file() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("terminal.json"))
}

/// Terminal config persistence
#[derive(Debug, Clone)]
pub struct ConfigStorage {
    path: PathBuf,
}

impl ConfigStorage {
    /// Storage at the default location
    pub fn new() -> Result<Self, ConfigError> {
        Ok(Self {
            path: terminal_config_file()?,
        })
    }

    /// Storage at a custom path
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the config. A missing file yields defaults.
    pub async fn load(&self) -> Result<TerminalConfig, ConfigError> {
        let contents = match fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No config at {:?}, using defaults", self.path);
                return Ok(TerminalConfig::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        let config: TerminalConfig = serde_json::from_str(&contents)?;
        if config.version > CONFIG_VERSION {
            return Err(ConfigError::VersionTooNew {
                found: config.version,
                supported: CONFIG_VERSION,
            });
        }
        Ok(config)
    }

    /// Save the config (write to temp file, then rename)
    pub async fn save(&self, config: &TerminalConfig) -> Result<(), ConfigError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let temp_path = self.path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(config)?;

        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(json.as_bytes()).await?;
        file.sync_all().await?;

        fs::rename(&temp_path, &self.path).await?;
        Ok(())
    }
}
