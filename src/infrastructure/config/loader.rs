use anyhow::{Context, Result};
use figment::providers::{Env, Serialized};
use figment::Figment;
use thiserror::Error;

use super::model::{Config, StorageProvider};

/// The full set of recognized `FOREMAN_*` environment keys. Anything else
/// under the prefix is rejected rather than silently ignored.
const KNOWN_KEYS: &[&str] = &[
    "HOST",
    "PORT",
    "MODE",
    "STORAGE_PROVIDER",
    "STORAGE_CONNECTION_STRING",
    "FILE_DATA_DIR",
    "FILE_LOCK_TIMEOUT",
    "LOG_LEVEL",
    "LOG_PRETTY",
    "ENABLE_AUTH",
    "SESSION_TIMEOUT",
    "SESSION_SECRET",
    "DEFAULT_MAX_RETRIES",
    "DEFAULT_LEASE_DURATION",
    "REAPER_INTERVAL",
];

/// Configuration error types.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Unknown configuration key: FOREMAN_{0}")]
    UnknownKey(String),

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid default_max_retries: {0}. Must be between 0 and 10")]
    InvalidMaxRetries(u32),

    #[error("Invalid default_lease_duration: {0}. Must be between 1 and 1440 minutes")]
    InvalidLeaseDuration(u32),

    #[error("Invalid reaper_interval: {0}. Must be between 1 and 60 minutes")]
    InvalidReaperInterval(u32),

    #[error("Invalid file_lock_timeout: {0}. Must be between 1 and 300 seconds")]
    InvalidLockTimeout(u64),

    #[error("Invalid session_timeout: {0}. Must be at least 60 seconds")]
    InvalidSessionTimeout(u64),

    #[error("storage_connection_string is required for the {0} provider")]
    MissingConnectionString(&'static str),

    #[error("file_data_dir cannot be empty")]
    EmptyDataDir,
}

/// Environment-driven configuration loader.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration: programmatic defaults overridden by `FOREMAN_*`
    /// environment variables. Unknown keys under the prefix are rejected.
    pub fn load() -> Result<Config> {
        Self::check_unknown_keys(std::env::vars().map(|(k, _)| k))?;

        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Env::prefixed("FOREMAN_"))
            .extract()
            .context("Failed to extract configuration from environment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    fn check_unknown_keys(vars: impl Iterator<Item = String>) -> Result<(), ConfigError> {
        for key in vars {
            if let Some(suffix) = key.strip_prefix("FOREMAN_") {
                if !KNOWN_KEYS.contains(&suffix) {
                    return Err(ConfigError::UnknownKey(suffix.to_string()));
                }
            }
        }
        Ok(())
    }

    /// Validate configuration after loading.
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.log_level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.log_level.clone()));
        }

        if config.default_max_retries > 10 {
            return Err(ConfigError::InvalidMaxRetries(config.default_max_retries));
        }

        if !(1..=1440).contains(&config.default_lease_duration) {
            return Err(ConfigError::InvalidLeaseDuration(
                config.default_lease_duration,
            ));
        }

        if !(1..=60).contains(&config.reaper_interval) {
            return Err(ConfigError::InvalidReaperInterval(config.reaper_interval));
        }

        if !(1..=300).contains(&config.file_lock_timeout) {
            return Err(ConfigError::InvalidLockTimeout(config.file_lock_timeout));
        }

        if config.session_timeout < 60 {
            return Err(ConfigError::InvalidSessionTimeout(config.session_timeout));
        }

        match config.storage_provider {
            StorageProvider::File => {
                if config.file_data_dir.is_empty() {
                    return Err(ConfigError::EmptyDataDir);
                }
            }
            StorageProvider::Mongodb => {
                if config.storage_connection_string.is_none() {
                    return Err(ConfigError::MissingConnectionString("mongodb"));
                }
            }
            StorageProvider::Redis => {
                if config.storage_connection_string.is_none() {
                    return Err(ConfigError::MissingConnectionString("redis"));
                }
            }
        }

        Ok(())
    }
}
