use std::path::Path;

use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use thiserror::Error;

use crate::adapters::oracle::PROVIDERS;
use crate::domain::models::config::{Config, RemoteConfig};

/// Project-local configuration directory.
pub const CONFIG_DIR: &str = ".vpn-tuner";
pub const ENV_PREFIX: &str = "VPN_TUNER_";

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Remote host is not configured (set remote.host or VPN_TUNER_REMOTE__HOST)")]
    MissingHost,

    #[error("Invalid SSH port: 0")]
    InvalidPort,

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("Database path cannot be empty")]
    EmptyDatabasePath,

    #[error("Invalid max_connections: {0}. Must be at least 1")]
    InvalidMaxConnections(u32),

    #[error("Invalid max_experiments: 0. Must be at least 1")]
    InvalidMaxExperiments,

    #[error("min_experiments ({0}) cannot exceed max_experiments ({1})")]
    InvalidMinExperiments(u32, u32),

    #[error("Invalid max_rounds: 0. Must be at least 1")]
    InvalidMaxRounds,

    #[error("Invalid round_trim_pct: {0}. Must be in [0, 0.5)")]
    InvalidTrim(f64),

    #[error("Invalid smart_skip_ratio: {0}. Must be in (0, 1]")]
    InvalidSkipRatio(f64),

    #[error("Unknown oracle provider: {0}")]
    UnknownProvider(String),
}

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. .vpn-tuner/config.yaml
    /// 3. .vpn-tuner/local.yaml (optional local overrides)
    /// 4. Environment variables (VPN_TUNER_* prefix, `__` separates sections)
    pub fn load() -> Result<Config> {
        Self::load_from_dir(Path::new("."))
    }

    /// Same as [`ConfigLoader::load`] with the config directory under `root`.
    pub fn load_from_dir(root: &Path) -> Result<Config> {
        let dir = root.join(CONFIG_DIR);
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(dir.join("config.yaml")))
            .merge(Yaml::file(dir.join("local.yaml")))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file; environment variables still apply.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .context(format!("Failed to load config from {}", path.as_ref().display()))?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        if config.remote.port == 0 {
            return Err(ConfigError::InvalidPort);
        }

        if config.database.path.is_empty() {
            return Err(ConfigError::EmptyDatabasePath);
        }
        if config.database.max_connections == 0 {
            return Err(ConfigError::InvalidMaxConnections(config.database.max_connections));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }
        let valid_log_formats = ["json", "pretty"];
        if !valid_log_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }

        let optimizer = &config.optimizer;
        if optimizer.max_experiments == 0 {
            return Err(ConfigError::InvalidMaxExperiments);
        }
        if optimizer.min_experiments > optimizer.max_experiments {
            return Err(ConfigError::InvalidMinExperiments(
                optimizer.min_experiments,
                optimizer.max_experiments,
            ));
        }

        let measurement = &config.measurement;
        if measurement.max_rounds == 0 {
            return Err(ConfigError::InvalidMaxRounds);
        }
        if !(0.0..0.5).contains(&measurement.round_trim_pct) {
            return Err(ConfigError::InvalidTrim(measurement.round_trim_pct));
        }
        if !(measurement.smart_skip_ratio > 0.0 && measurement.smart_skip_ratio <= 1.0) {
            return Err(ConfigError::InvalidSkipRatio(measurement.smart_skip_ratio));
        }

        if !PROVIDERS.contains(&config.oracle.provider.as_str()) {
            return Err(ConfigError::UnknownProvider(config.oracle.provider.clone()));
        }

        Ok(())
    }

    /// Checks needed only by commands that connect to the host.
    pub fn validate_remote(remote: &RemoteConfig) -> Result<(), ConfigError> {
        if remote.host.trim().is_empty() {
            return Err(ConfigError::MissingHost);
        }
        Ok(())
    }
}
