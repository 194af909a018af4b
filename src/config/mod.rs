//! Engine configuration file
//!
//! The file is optional: without one every build runs with
//! [`Config::default`]. Sections and keys left out keep their defaults.

pub mod schema;

pub use schema::{Config, EngineConfig, GeneralConfig, LogFormat};

use crate::error::{ComposeError, ComposeResult};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

/// Reads and writes the config file at one resolved location
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    /// Manager for the per-user config file
    pub fn new() -> Self {
        Self::with_path(Self::default_config_path())
    }

    pub fn with_path(path: PathBuf) -> Self {
        Self { config_path: path }
    }

    /// `--config` / `SUBSYS_CONFIG` when given, the per-user file otherwise
    pub fn resolve(explicit: Option<PathBuf>) -> Self {
        explicit.map_or_else(Self::new, Self::with_path)
    }

    /// `<config dir>/subsys/config.toml`, or `./subsys/config.toml` when the
    /// platform has no config directory
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("subsys")
            .join("config.toml")
    }

    pub fn path(&self) -> &Path {
        &self.config_path
    }

    /// Settings from the managed file, or the defaults when it does not exist
    pub async fn load(&self) -> ComposeResult<Config> {
        if !self.exists().await? {
            debug!("No config at {}, using engine defaults", self.config_path.display());
            return Ok(Config::default());
        }
        self.load_from_file(&self.config_path).await
    }

    /// Settings from `path`; any parse error names the file
    pub async fn load_from_file(&self, path: &Path) -> ComposeResult<Config> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| ComposeError::io(format!("reading config from {}", path.display()), e))?;

        let config: Config = toml::from_str(&content).map_err(|e| ComposeError::ConfigInvalid {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        debug!(
            "Loaded config from {} (cache capacity {}, level timeout {:?})",
            path.display(),
            config.engine.cache_capacity,
            config.engine.level_timeout()
        );
        Ok(config)
    }

    /// Write `config` to the managed file, creating its directory
    pub async fn save(&self, config: &Config) -> ComposeResult<()> {
        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| ComposeError::ConfigDirCreate {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
        }

        let content = toml::to_string_pretty(config)?;
        fs::write(&self.config_path, content).await.map_err(|e| {
            ComposeError::io(format!("writing config to {}", self.config_path.display()), e)
        })?;

        info!("Configuration saved to {}", self.config_path.display());
        Ok(())
    }

    /// Write the default settings unless a file is already there.
    ///
    /// Returns whether the file was written; `force` replaces an existing one.
    pub async fn init(&self, force: bool) -> ComposeResult<bool> {
        if !force && self.exists().await? {
            return Ok(false);
        }
        self.save(&Config::default()).await?;
        Ok(true)
    }

    async fn exists(&self) -> ComposeResult<bool> {
        fs::try_exists(&self.config_path).await.map_err(|e| {
            ComposeError::io(format!("checking config at {}", self.config_path.display()), e)
        })
    }
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}
