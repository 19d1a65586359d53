//! Configuration loader with inheritance support.
//!
//! Loads configuration from multiple sources and merges them:
//! 1. Global config: `~/.metamirror/config.toml`
//! 2. Local config: `.metamirror/config.toml` (in the working directory)
//! 3. CLI overrides
//!
//! Later sources override earlier ones.

use crate::error::ConfigError;
use crate::{
    ConfigOverrides, LoggingConfig, MirrorConfig, PersistenceConfig, PoolConfig,
    DEFAULT_BLOCK_TIMEOUT_MS, DEFAULT_MAX_ACTIVE, DEFAULT_SINK_PATH,
};
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

const CONFIG_FILE_NAME: &str = "config.toml";

/// Global configuration directory name (under the home directory).
const GLOBAL_CONFIG_DIR: &str = ".metamirror";

/// Local configuration directory name.
const LOCAL_CONFIG_DIR: &str = ".metamirror";

/// Configuration loader with caching and inheritance support.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    /// Global config directory (e.g., `~/.metamirror`)
    global_config_dir: Option<PathBuf>,

    /// Cached global config
    global_config: Option<MirrorConfig>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// Create a new configuration loader.
    ///
    /// Automatically detects the global config directory (`~/.metamirror`).
    pub fn new() -> Self {
        let global_config_dir = dirs::home_dir().map(|h| h.join(GLOBAL_CONFIG_DIR));

        Self {
            global_config_dir,
            global_config: None,
        }
    }

    /// Create a loader with a custom global config directory.
    pub fn with_global_dir(global_dir: impl Into<PathBuf>) -> Self {
        Self {
            global_config_dir: Some(global_dir.into()),
            global_config: None,
        }
    }

    pub fn global_config_path(&self) -> Option<PathBuf> {
        self.global_config_dir
            .as_ref()
            .map(|d| d.join(CONFIG_FILE_NAME))
    }

    pub fn local_config_path(&self, root: &Path) -> PathBuf {
        root.join(LOCAL_CONFIG_DIR).join(CONFIG_FILE_NAME)
    }

    /// Load configuration for a working directory with optional CLI overrides.
    ///
    /// Merges config in order: global → local → overrides.
    pub fn load(
        &mut self,
        root: &Path,
        overrides: Option<&ConfigOverrides>,
    ) -> Result<MirrorConfig, ConfigError> {
        let mut config = MirrorConfig::default();

        if let Some(global_config) = self.load_global()? {
            config = merge_configs(config, global_config);
        }

        if let Some(local_config) = self.load_local(root)? {
            config = merge_configs(config, local_config);
        }

        if let Some(ovr) = overrides {
            config.apply_overrides(ovr);
        }

        config.validate()?;
        Ok(config)
    }

    /// Load a single explicit config file over the defaults.
    ///
    /// Global and local files are ignored.
    pub fn load_file(
        &self,
        path: &Path,
        overrides: Option<&ConfigOverrides>,
    ) -> Result<MirrorConfig, ConfigError> {
        debug!("Loading config from {:?}", path);
        let mut config = merge_configs(MirrorConfig::default(), load_config_file(path)?);
        if let Some(ovr) = overrides {
            config.apply_overrides(ovr);
        }
        config.validate()?;
        Ok(config)
    }

    /// Load only the global configuration.
    pub fn load_global(&mut self) -> Result<Option<MirrorConfig>, ConfigError> {
        if let Some(ref config) = self.global_config {
            return Ok(Some(config.clone()));
        }

        let Some(global_path) = self.global_config_path() else {
            debug!("No home directory found, skipping global config");
            return Ok(None);
        };

        if !global_path.exists() {
            trace!("Global config not found at {:?}", global_path);
            return Ok(None);
        }

        debug!("Loading global config from {:?}", global_path);
        let config = load_config_file(&global_path)?;
        self.global_config = Some(config.clone());

        Ok(Some(config))
    }

    /// Load only the local configuration.
    pub fn load_local(&self, root: &Path) -> Result<Option<MirrorConfig>, ConfigError> {
        let local_path = self.local_config_path(root);

        if !local_path.exists() {
            trace!("Local config not found at {:?}", local_path);
            return Ok(None);
        }

        debug!("Loading local config from {:?}", local_path);
        load_config_file(&local_path).map(Some)
    }

    pub fn save_global(&self, config: &MirrorConfig) -> Result<(), ConfigError> {
        let Some(ref global_dir) = self.global_config_dir else {
            return Err(ConfigError::NoHomeDir);
        };

        save_config_file(&global_dir.join(CONFIG_FILE_NAME), config)
    }

    pub fn save_local(&self, root: &Path, config: &MirrorConfig) -> Result<(), ConfigError> {
        save_config_file(&self.local_config_path(root), config)
    }

    /// Create `~/.metamirror/config.toml` with defaults if it is missing.
    pub fn init_global(&self) -> Result<PathBuf, ConfigError> {
        let Some(ref global_dir) = self.global_config_dir else {
            return Err(ConfigError::NoHomeDir);
        };
        init_config_dir(global_dir)
    }

    /// Create `.metamirror/config.toml` with defaults if it is missing.
    pub fn init_local(&self, root: &Path) -> Result<PathBuf, ConfigError> {
        init_config_dir(&root.join(LOCAL_CONFIG_DIR))
    }
}

fn init_config_dir(dir: &Path) -> Result<PathBuf, ConfigError> {
    if !dir.exists() {
        std::fs::create_dir_all(dir).map_err(|e| ConfigError::create_dir(dir, e))?;
    }

    let config_path = dir.join(CONFIG_FILE_NAME);
    if !config_path.exists() {
        save_config_file(&config_path, &MirrorConfig::default())?;
    }

    Ok(config_path)
}

fn load_config_file(path: &Path) -> Result<MirrorConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::read_file(path, e))?;

    toml::from_str(&content).map_err(|e| ConfigError::parse_toml(path, e))
}

fn save_config_file(path: &Path, config: &MirrorConfig) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        if !parent.exists() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::create_dir(parent, e))?;
        }
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|e| ConfigError::write_file(path, e))
}

/// Merge two configurations, with `overlay` taking precedence.
///
/// Fields left at their default in `overlay` keep the `base` value, so
/// partial files only change what they mention.
fn merge_configs(base: MirrorConfig, overlay: MirrorConfig) -> MirrorConfig {
    MirrorConfig {
        pool: merge_pool(base.pool, overlay.pool),
        persistence: merge_persistence(base.persistence, overlay.persistence),
        logging: merge_logging(base.logging, overlay.logging),
        data_sources: {
            let mut sources = base.data_sources;
            sources.extend(overlay.data_sources);
            sources
        },
    }
}

fn merge_pool(base: PoolConfig, overlay: PoolConfig) -> PoolConfig {
    PoolConfig {
        max_active: if overlay.max_active != DEFAULT_MAX_ACTIVE {
            overlay.max_active
        } else {
            base.max_active
        },
        exhaustion: if overlay.exhaustion != crate::ExhaustionMode::Fail {
            overlay.exhaustion
        } else {
            base.exhaustion
        },
        block_timeout_ms: if overlay.block_timeout_ms != DEFAULT_BLOCK_TIMEOUT_MS {
            overlay.block_timeout_ms
        } else {
            base.block_timeout_ms
        },
    }
}

fn merge_persistence(base: PersistenceConfig, overlay: PersistenceConfig) -> PersistenceConfig {
    PersistenceConfig {
        sink_path: if overlay.sink_path != Path::new(DEFAULT_SINK_PATH) {
            overlay.sink_path
        } else {
            base.sink_path
        },
    }
}

fn merge_logging(base: LoggingConfig, overlay: LoggingConfig) -> LoggingConfig {
    LoggingConfig {
        level: if overlay.level != "info" {
            overlay.level
        } else {
            base.level
        },
        format: if overlay.format != crate::LogFormat::Text {
            overlay.format
        } else {
            base.format
        },
    }
}
