//! Configuration parsing and validation for tenant-proxy.
//!
//! Settings come from an optional TOML file, then environment variables
//! (`TENANT_PROXY_*`), then CLI flags. Every section has defaults, so the
//! service can run from the environment alone.

use serde::Deserialize;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::SqliteSynchronous;

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address to listen on (e.g., "127.0.0.1:7400")
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Largest accepted request body, in bytes
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

fn default_listen() -> String {
    "127.0.0.1:7400".to_string()
}

fn default_max_body_bytes() -> usize {
    8 * 1024 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

/// Tenant database storage configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Base directory holding one sub-directory per tenant
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Database file name inside each tenant directory
    #[serde(default = "default_file_name")]
    pub file_name: String,
    /// How long SQLite waits on a locked database before giving up
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// SQLite `synchronous` pragma: off, normal, full or extra
    #[serde(default = "default_synchronous")]
    pub synchronous: String,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_file_name() -> String {
    "tenant.db".to_string()
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

fn default_synchronous() -> String {
    "normal".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            file_name: default_file_name(),
            busy_timeout_ms: default_busy_timeout_ms(),
            synchronous: default_synchronous(),
        }
    }
}

impl StorageConfig {
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    /// Parsed `synchronous` mode. Only fails on configs that skipped validation.
    pub fn synchronous_mode(&self) -> Result<SqliteSynchronous, ConfigError> {
        SqliteSynchronous::from_str(&self.synchronous).map_err(|_| {
            ConfigError::Validation(format!(
                "Unknown synchronous mode '{}' (expected off, normal, full or extra)",
                self.synchronous
            ))
        })
    }
}

/// Per-tenant job queue configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    /// Jobs a tenant queue holds before new submissions are rejected as busy
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
    /// Jobs that waited longer than this are rejected before they start
    #[serde(default)]
    pub max_wait_ms: Option<u64>,
}

fn default_max_depth() -> usize {
    1024
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
            max_wait_ms: None,
        }
    }
}

impl QueueConfig {
    pub fn max_wait(&self) -> Option<Duration> {
        self.max_wait_ms.map(Duration::from_millis)
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level used when RUST_LOG is not set
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Environment variable names recognised by [`Config::apply_env`].
pub mod env {
    pub const LISTEN: &str = "TENANT_PROXY_LISTEN";
    pub const PORT: &str = "TENANT_PROXY_PORT";
    pub const MAX_BODY_BYTES: &str = "TENANT_PROXY_MAX_BODY_BYTES";
    pub const DATA_DIR: &str = "TENANT_PROXY_DATA_DIR";
    pub const DB_FILE: &str = "TENANT_PROXY_DB_FILE";
    pub const BUSY_TIMEOUT_MS: &str = "TENANT_PROXY_BUSY_TIMEOUT_MS";
    pub const SYNCHRONOUS: &str = "TENANT_PROXY_SYNCHRONOUS";
    pub const MAX_QUEUE_DEPTH: &str = "TENANT_PROXY_MAX_QUEUE_DEPTH";
    pub const MAX_QUEUE_WAIT_MS: &str = "TENANT_PROXY_MAX_QUEUE_WAIT_MS";
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io {
            path: path.as_ref().display().to_string(),
            source: e,
        })?;

        Self::parse_str(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse_str(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Load the effective configuration: optional file, then the process
    /// environment, then validation.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `TENANT_PROXY_*` overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_with(|name| std::env::var(name).ok())
    }

    /// Apply overrides using a custom lookup function.
    ///
    /// Keeps tests away from global env state.
    pub fn apply_env_with<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(listen) = lookup(env::LISTEN) {
            self.server.listen = listen;
        }
        if let Some(port) = lookup(env::PORT) {
            let port: u16 = parse_env(env::PORT, &port)?;
            self.server.listen = replace_port(&self.server.listen, port);
        }
        if let Some(bytes) = lookup(env::MAX_BODY_BYTES) {
            self.server.max_body_bytes = parse_env(env::MAX_BODY_BYTES, &bytes)?;
        }
        if let Some(dir) = lookup(env::DATA_DIR) {
            self.storage.data_dir = PathBuf::from(dir);
        }
        if let Some(file) = lookup(env::DB_FILE) {
            self.storage.file_name = file;
        }
        if let Some(ms) = lookup(env::BUSY_TIMEOUT_MS) {
            self.storage.busy_timeout_ms = parse_env(env::BUSY_TIMEOUT_MS, &ms)?;
        }
        if let Some(mode) = lookup(env::SYNCHRONOUS) {
            self.storage.synchronous = mode;
        }
        if let Some(depth) = lookup(env::MAX_QUEUE_DEPTH) {
            self.queue.max_depth = parse_env(env::MAX_QUEUE_DEPTH, &depth)?;
        }
        if let Some(ms) = lookup(env::MAX_QUEUE_WAIT_MS) {
            self.queue.max_wait_ms = Some(parse_env(env::MAX_QUEUE_WAIT_MS, &ms)?);
        }
        Ok(())
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.storage.data_dir.as_os_str().is_empty() {
            return Err(ConfigError::Validation(
                "storage.data_dir must not be empty".to_string(),
            ));
        }

        let file = &self.storage.file_name;
        if file.is_empty() || file == "." || file == ".." || file.contains(['/', '\\']) {
            return Err(ConfigError::Validation(format!(
                "storage.file_name '{}' must be a plain file name",
                file
            )));
        }

        if self.storage.busy_timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "storage.busy_timeout_ms must be greater than zero".to_string(),
            ));
        }

        self.storage.synchronous_mode()?;

        if self.queue.max_depth == 0 {
            return Err(ConfigError::Validation(
                "queue.max_depth must be greater than zero".to_string(),
            ));
        }

        if self.queue.max_wait_ms.is_none() {
            tracing::debug!("No queue wait limit configured - queued jobs never expire");
        }

        Ok(())
    }
}

fn parse_env<T: FromStr>(var: &str, value: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::EnvVar {
        var: var.to_string(),
        message: format!("cannot parse '{}': {}", value, e),
    })
}

/// Swap the port of a listen address, keeping the host.
///
/// Accepts `host:port`, a bare host, and IPv6 with or without brackets. An
/// address with no host binds every interface.
fn replace_port(listen: &str, port: u16) -> String {
    let listen = listen.trim();
    if let Ok(mut addr) = listen.parse::<SocketAddr>() {
        addr.set_port(port);
        return addr.to_string();
    }
    let bare = listen.trim_start_matches('[').trim_end_matches(']');
    if let Ok(ip) = bare.parse::<IpAddr>() {
        return SocketAddr::new(ip, port).to_string();
    }
    match listen.rsplit_once(':') {
        Some((host, _)) if !host.is_empty() => format!("{}:{}", host, port),
        None if !listen.is_empty() => format!("{}:{}", listen, port),
        _ => format!("0.0.0.0:{}", port),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Configuration validation error: {0}")]
    Validation(String),

    #[error("Invalid environment variable '{var}': {message}")]
    EnvVar { var: String, message: String },
}
