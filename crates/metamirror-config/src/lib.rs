//! metamirror Configuration Management
//!
//! Provides configuration loading with support for:
//! - Global config: `~/.metamirror/config.toml`
//! - Local config: `.metamirror/config.toml` (in the working directory)
//! - CLI overrides via `ConfigOverrides`
//!
//! Configuration is merged in order: global → local → CLI overrides.

mod error;
mod loader;

pub use error::ConfigError;
pub use loader::ConfigLoader;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Default maximum number of simultaneously borrowed connections per source
pub const DEFAULT_MAX_ACTIVE: usize = 5;

/// Default wait before a blocked borrow gives up, in milliseconds
pub const DEFAULT_BLOCK_TIMEOUT_MS: u64 = 5000;

/// Default persistence sink file
pub const DEFAULT_SINK_PATH: &str = "mirror.db";

/// Root configuration for metamirror.
///
/// Represents the fully merged configuration from all sources.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct MirrorConfig {
    /// Connection pool settings shared by every data source
    pub pool: PoolConfig,

    pub persistence: PersistenceConfig,

    pub logging: LoggingConfig,

    /// Named data sources (name → connection parameters)
    pub data_sources: BTreeMap<String, DataSourceConfig>,
}

/// Connection parameters for one data source.
///
/// # Example TOML
///
/// ```toml
/// [data_sources.shop]
/// url = "sqlite:/var/data/shop.db"
/// driver = "sqlite"
/// user = "reporting"
/// password_env = "SHOP_DB_PASSWORD"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct DataSourceConfig {
    pub url: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub driver: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,

    /// Environment variable holding the password; passwords are never
    /// stored in config files
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password_env: Option<String>,
}

/// Connection pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PoolConfig {
    /// Maximum simultaneously borrowed connections
    pub max_active: usize,

    /// What a borrow does when every connection is in use
    pub exhaustion: ExhaustionMode,

    /// Wait limit for `exhaustion = "block"`
    pub block_timeout_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_active: DEFAULT_MAX_ACTIVE,
            exhaustion: ExhaustionMode::default(),
            block_timeout_ms: DEFAULT_BLOCK_TIMEOUT_MS,
        }
    }
}

/// Pool exhaustion behaviour.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ExhaustionMode {
    /// Fail the borrow immediately (default)
    #[default]
    Fail,
    /// Wait for a connection to be returned
    Block,
}

impl std::fmt::Display for ExhaustionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fail => write!(f, "fail"),
            Self::Block => write!(f, "block"),
        }
    }
}

impl std::str::FromStr for ExhaustionMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "fail" => Ok(Self::Fail),
            "block" | "wait" => Ok(Self::Block),
            _ => Err(ConfigError::invalid_value(
                "pool.exhaustion",
                format!("unknown mode '{s}'. Valid values: fail, block"),
            )),
        }
    }
}

/// Persistence sink configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PersistenceConfig {
    /// SQLite file receiving snapshots
    pub sink_path: PathBuf,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            sink_path: PathBuf::from(DEFAULT_SINK_PATH),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::default(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable text format
    #[default]
    Text,
    /// Compact single-line format
    Compact,
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "compact" => Ok(Self::Compact),
            _ => Err(ConfigError::invalid_value(
                "logging.format",
                format!("unknown format '{s}'. Valid values: text, compact"),
            )),
        }
    }
}

/// CLI overrides for configuration values.
///
/// Used to apply command-line arguments over file-based config.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub max_active: Option<usize>,

    pub exhaustion: Option<ExhaustionMode>,

    pub sink_path: Option<PathBuf>,

    pub log_level: Option<String>,
}

impl MirrorConfig {
    /// Apply CLI overrides to this configuration.
    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(max_active) = overrides.max_active {
            self.pool.max_active = max_active;
        }

        if let Some(exhaustion) = overrides.exhaustion {
            self.pool.exhaustion = exhaustion;
        }

        if let Some(ref path) = overrides.sink_path {
            self.persistence.sink_path = path.clone();
        }

        if let Some(ref level) = overrides.log_level {
            self.logging.level = level.clone();
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pool.max_active == 0 {
            return Err(ConfigError::ValidationError(
                "pool.max_active must be at least 1".to_string(),
            ));
        }
        for (name, source) in &self.data_sources {
            if source.url.trim().is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "data_sources.{name}.url is required"
                )));
            }
        }
        Ok(())
    }

    /// Look up a named data source.
    pub fn data_source(&self, name: &str) -> Result<&DataSourceConfig, ConfigError> {
        self.data_sources
            .get(name)
            .ok_or_else(|| ConfigError::data_source_not_found(name))
    }

    /// Set a single value by dotted key, as written by `metamirror config set`.
    ///
    /// `data_sources.<name>.<field>` creates the data source if needed.
    pub fn set_value(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        match key {
            "pool.max_active" => {
                self.pool.max_active = value
                    .parse()
                    .map_err(|e: std::num::ParseIntError| ConfigError::invalid_value(key, e.to_string()))?;
            }
            "pool.exhaustion" => self.pool.exhaustion = value.parse()?,
            "pool.block_timeout_ms" => {
                self.pool.block_timeout_ms = value
                    .parse()
                    .map_err(|e: std::num::ParseIntError| ConfigError::invalid_value(key, e.to_string()))?;
            }
            "persistence.sink_path" => self.persistence.sink_path = PathBuf::from(value),
            "logging.level" => self.logging.level = value.to_string(),
            "logging.format" => self.logging.format = value.parse()?,
            _ => {
                let Some((name, field)) = key
                    .strip_prefix("data_sources.")
                    .and_then(|rest| rest.rsplit_once('.'))
                else {
                    return Err(ConfigError::invalid_value(key, "unknown configuration key"));
                };
                if !matches!(field, "url" | "driver" | "user" | "password_env") {
                    return Err(ConfigError::invalid_value(key, "unknown configuration key"));
                }
                let source = self.data_sources.entry(name.to_string()).or_default();
                let optional = (!value.is_empty()).then(|| value.to_string());
                match field {
                    "url" => source.url = value.to_string(),
                    "driver" => source.driver = optional,
                    "user" => source.user = optional,
                    _ => source.password_env = optional,
                }
            }
        }
        Ok(())
    }

    /// Resolve the sink path against a working directory.
    pub fn sink_path(&self, root: &std::path::Path) -> PathBuf {
        if self.persistence.sink_path.is_absolute() {
            self.persistence.sink_path.clone()
        } else {
            root.join(&self.persistence.sink_path)
        }
    }
}
