//! Runtime configuration
//!
//! One TOML document with a section per subsystem. Every section and field is
//! optional and falls back to its default.
//!
//! # Configuration hierarchy
//!
//! ```text
//! Priority (high → low):
//! 1. Environment variables (COMPONENT_RUNTIME_*)
//! 2. Configuration file
//! 3. Default values
//! ```
//!
//! # Usage
//!
//! ```rust
//! use component_runtime::util::config::RuntimeConfig;
//!
//! let mut config = RuntimeConfig::from_toml_str("[gc]\nttl_ms = 250").unwrap();
//! config.apply_env().unwrap();
//! assert!(config.scheduler.num_workers >= 1);
//! ```
//!
//! ```toml
//! [scheduler]
//! num_workers = 4
//!
//! [gc]
//! ttl_ms = 5000
//! sweep_interval_ms = 1000
//!
//! [hot_reload]
//! extension = "cmp"
//!
//! [log]
//! level = "info"
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::runtime::gc::GcConfig;
use crate::runtime::hot_reload::HotReloadConfig;
use crate::runtime::scheduler::SchedulerConfig;
use crate::util::logger::{LogConfig, LogLevel};

/// Worker count override
pub const ENV_WORKERS: &str = "COMPONENT_RUNTIME_WORKERS";
/// GC TTL override, in milliseconds
pub const ENV_GC_TTL_MS: &str = "COMPONENT_RUNTIME_GC_TTL_MS";
/// Log level override
pub const ENV_LOG: &str = "COMPONENT_RUNTIME_LOG";

/// Complete runtime configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub scheduler: SchedulerConfig,
    pub gc: GcConfig,
    pub hot_reload: HotReloadConfig,
    pub log: LogConfig,
}

impl RuntimeConfig {
    /// Parse a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Load a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Load `path` if it exists, otherwise defaults; then apply env overrides.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            Self::load(path)?
        } else {
            Self::default()
        };
        config.apply_env()?;
        Ok(config)
    }

    /// Serialize as pretty TOML.
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Apply `COMPONENT_RUNTIME_*` overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides read through `lookup`.
    pub fn apply_env_from<F>(
        &mut self,
        lookup: F,
    ) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_WORKERS) {
            self.scheduler.num_workers = match value.trim().parse::<usize>() {
                Ok(n) if n > 0 => n,
                _ => return Err(ConfigError::invalid_env(ENV_WORKERS, &value)),
            };
        }

        if let Some(value) = lookup(ENV_GC_TTL_MS) {
            self.gc.ttl_ms = value
                .trim()
                .parse()
                .map_err(|_| ConfigError::invalid_env(ENV_GC_TTL_MS, &value))?;
        }

        if let Some(value) = lookup(ENV_LOG) {
            self.log.level =
                LogLevel::parse(&value).ok_or_else(|| ConfigError::invalid_env(ENV_LOG, &value))?;
        }

        Ok(())
    }
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error reading {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Config parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Config serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("Invalid value for {var}: {value:?}")]
    InvalidEnv { var: &'static str, value: String },
}

impl ConfigError {
    fn invalid_env(
        var: &'static str,
        value: impl Into<String>,
    ) -> Self {
        ConfigError::InvalidEnv {
            var,
            value: value.into(),
        }
    }
}
