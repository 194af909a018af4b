//! Configuration schema for subsys
//!
//! Configuration is stored at `~/.config/subsys/config.toml`

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// Composition engine settings
    pub engine: EngineConfig,
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Enable verbose logging
    pub verbose: bool,

    /// Log line format on stderr
    pub log_format: LogFormat,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            verbose: false,
            log_format: LogFormat::Text,
        }
    }
}

/// `general.log_format`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

/// Composition engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Dependency graphs kept in the shared cache (0 disables caching)
    pub cache_capacity: usize,

    /// Upper bound for one level's `init` join in milliseconds (0 = none)
    pub level_timeout_ms: u64,

    /// Reject extensions naming a contract that is not registered
    pub fail_on_unknown_contract: bool,
}

impl EngineConfig {
    /// The per-level `init` bound, if one is configured
    pub fn level_timeout(&self) -> Option<Duration> {
        (self.level_timeout_ms > 0).then(|| Duration::from_millis(self.level_timeout_ms))
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache_capacity: crate::graph::cache::DEFAULT_CAPACITY,
            level_timeout_ms: 0,
            fail_on_unknown_contract: true,
        }
    }
}
