//! Service configuration model.
//!
//! All settings are environment-driven with the `FOREMAN_` prefix; see
//! [`crate::infrastructure::config::ConfigLoader`].

use serde::{Deserialize, Serialize};

/// Which surface the process runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// JSON-RPC tool server on stdin/stdout (default).
    #[default]
    Rpc,
    /// Authenticated HTTP REST API.
    Http,
    /// One-shot command-line invocation.
    Cli,
}

impl RunMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rpc => "rpc",
            Self::Http => "http",
            Self::Cli => "cli",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "rpc" => Some(Self::Rpc),
            "http" => Some(Self::Http),
            "cli" => Some(Self::Cli),
            _ => None,
        }
    }
}

/// Storage backend selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageProvider {
    #[default]
    File,
    Mongodb,
    Redis,
}

impl StorageProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Mongodb => "mongodb",
            Self::Redis => "redis",
        }
    }
}

/// Placeholder secret used when `FOREMAN_SESSION_SECRET` is unset. Fine for
/// local development; production deployments must override it.
pub const DEV_SESSION_SECRET: &str = "foreman-insecure-dev-secret";

/// Complete service configuration.
///
/// Field names map 1:1 onto `FOREMAN_*` environment keys (lowercased).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub mode: RunMode,
    pub storage_provider: StorageProvider,
    /// Connection string for the mongodb/redis providers.
    pub storage_connection_string: Option<String>,
    /// Data directory for the file provider.
    pub file_data_dir: String,
    /// Project-lock acquisition timeout in seconds (file provider).
    pub file_lock_timeout: u64,
    pub log_level: String,
    pub log_pretty: bool,
    pub enable_auth: bool,
    /// Default session TTL in seconds.
    pub session_timeout: u64,
    /// HMAC key for session tokens.
    pub session_secret: String,
    /// Project default: retry budget for new task types (0-10).
    pub default_max_retries: u32,
    /// Project default: lease duration in minutes (1-1440).
    pub default_lease_duration: u32,
    /// Project default: reaper sweep interval in minutes (1-60).
    pub reaper_interval: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 4820,
            mode: RunMode::default(),
            storage_provider: StorageProvider::default(),
            storage_connection_string: None,
            file_data_dir: "./data".to_string(),
            file_lock_timeout: 10,
            log_level: "info".to_string(),
            log_pretty: false,
            enable_auth: true,
            session_timeout: 3600,
            session_secret: DEV_SESSION_SECRET.to_string(),
            default_max_retries: 3,
            default_lease_duration: 10,
            reaper_interval: 5,
        }
    }
}
