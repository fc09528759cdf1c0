//! Configuration management for confstore
//!
//! This module provides file- and environment-based configuration with
//! defaults and validation. The store section describes how a database file is
//! opened; the logging section feeds [`crate::logging`].

use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

mod error;

pub use error::ConfigError;

use crate::logging::{LogConfig, LogLevel};
use crate::store::DEFAULT_NAME_DELIMITER;

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// How a store database is opened
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Database file
    pub path: PathBuf,

    /// Create the database file if it does not exist
    pub create_if_missing: bool,

    /// Name delimiter; must match the one stored in an existing database
    pub delimiter: char,

    /// How long to wait for a lock held by another connection
    #[serde(with = "humantime_serde")]
    pub busy_timeout: Duration,

    /// Number of prepared statements kept per connection
    pub statement_cache_capacity: usize,

    /// Overwrite deleted content with zeros
    pub secure_delete: bool,

    /// Fixed seed for initial entry revisions (tests only; random when unset)
    pub revision_seed: Option<u64>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Enable JSON formatting
    pub json_format: bool,

    /// Include timestamps
    pub with_timestamp: bool,

    /// Include target module
    pub with_target: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./confstore.db"),
            create_if_missing: false,
            delimiter: DEFAULT_NAME_DELIMITER,
            busy_timeout: Duration::from_secs(15),
            statement_cache_capacity: 32,
            secure_delete: true,
            revision_seed: None,
        }
    }
}

impl StoreConfig {
    /// Configuration for `path` with every other field at its default
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn create_if_missing(mut self, create: bool) -> Self {
        self.create_if_missing = create;
        self
    }

    pub fn delimiter(mut self, delimiter: char) -> Self {
        self.delimiter = delimiter;
        self
    }

    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    pub fn revision_seed(mut self, seed: u64) -> Self {
        self.revision_seed = Some(seed);
        self
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            with_timestamp: true,
            with_target: true,
        }
    }
}

impl LoggingConfig {
    /// Convert into the logging subsystem's configuration
    pub fn to_log_config(&self) -> Result<LogConfig, ConfigError> {
        let level = LogLevel::parse(&self.level).ok_or_else(|| {
            ConfigError::InvalidValue(format!("Invalid log level: {}", self.level))
        })?;

        Ok(LogConfig::new(level)
            .with_timestamp(self.with_timestamp)
            .with_target(self.with_target)
            .json_format(self.json_format))
    }
}

impl Config {
    /// Load configuration from environment variables
    ///
    /// Environment variables follow the pattern: CONFSTORE_<SECTION>_<KEY>
    /// Example: CONFSTORE_STORE_PATH=/var/lib/app/config.db
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        // Store config
        if let Ok(path) = env::var("CONFSTORE_STORE_PATH") {
            config.store.path = PathBuf::from(path);
        }
        if let Ok(create) = env::var("CONFSTORE_STORE_CREATE") {
            config.store.create_if_missing = create
                .parse()
                .map_err(|e| ConfigError::InvalidValue(format!("Invalid create flag: {}", e)))?;
        }
        if let Ok(delimiter) = env::var("CONFSTORE_STORE_DELIMITER") {
            config.store.delimiter = parse_delimiter(&delimiter)?;
        }
        if let Ok(timeout) = env::var("CONFSTORE_STORE_BUSY_TIMEOUT") {
            config.store.busy_timeout = humantime_serde::re::humantime::parse_duration(&timeout)
                .map_err(|e| ConfigError::InvalidValue(format!("Invalid busy timeout: {}", e)))?;
        }

        // Logging config
        if let Ok(level) = env::var("CONFSTORE_LOG_LEVEL") {
            config.logging.level = level;
        }
        if let Ok(json) = env::var("CONFSTORE_LOG_JSON") {
            config.logging.json_format = json
                .parse()
                .map_err(|e| ConfigError::InvalidValue(format!("Invalid JSON flag: {}", e)))?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;

        let config: Self = toml::from_str(&contents)?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.store.path.as_os_str().is_empty() {
            return Err(ConfigError::ValidationFailed("store path must not be empty".to_string()));
        }

        if self.store.statement_cache_capacity == 0 {
            return Err(ConfigError::ValidationFailed(
                "statement_cache_capacity must be greater than 0".to_string(),
            ));
        }

        if self.store.delimiter.is_control() {
            return Err(ConfigError::ValidationFailed(format!(
                "delimiter must be a printable character, got {:?}",
                self.store.delimiter
            )));
        }

        if LogLevel::parse(&self.logging.level).is_none() {
            return Err(ConfigError::ValidationFailed(format!(
                "Invalid log level: {}",
                self.logging.level
            )));
        }

        Ok(())
    }

    /// Save configuration to file
    pub fn save_to_file(&self, path: impl AsRef<std::path::Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let contents = toml::to_string_pretty(self)?;

        std::fs::write(path, contents).map_err(|source| ConfigError::FileWrite {
            path: path.to_path_buf(),
            source,
        })?;

        Ok(())
    }
}

/// Parse a delimiter given as text; exactly one character is accepted
pub fn parse_delimiter(value: &str) -> Result<char, ConfigError> {
    let mut chars = value.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Ok(c),
        _ => Err(ConfigError::InvalidValue(format!(
            "Delimiter must be a single character, got {:?}",
            value
        ))),
    }
}
