//! dlbridge Configuration
//!
//! Handles parsing and management of dlbridge.toml configuration files.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

use crate::ffi::{configure_global_pool, LibraryLoader, DEFAULT_CALLBACK_CAPACITY};

/// Name of the configuration file searched for
pub const CONFIG_FILE: &str = "dlbridge.toml";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Config file not found: {0}")]
    NotFound(String),
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Root configuration structure matching dlbridge.toml.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct BridgeConfig {
    /// Library search
    #[serde(default)]
    pub loader: LoaderConfig,

    /// Callback pool
    #[serde(default)]
    pub callbacks: CallbackConfig,

    /// Log output
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl BridgeConfig {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        let content = std::fs::read_to_string(path)?;
        let config: BridgeConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration from the current directory or parents.
    pub fn load_from_cwd() -> ConfigResult<Self> {
        let cwd = std::env::current_dir().map_err(ConfigError::Io)?;
        Self::find_and_load(&cwd)
    }

    /// Find and load configuration by searching up from the given directory.
    pub fn find_and_load(start_dir: &Path) -> ConfigResult<Self> {
        let mut dir = start_dir.to_path_buf();
        loop {
            let config_path = dir.join(CONFIG_FILE);
            if config_path.exists() {
                debug!(path = %config_path.display(), "loading configuration");
                return Self::load(&config_path);
            }
            if !dir.pop() {
                // Reached root without finding config
                return Ok(Self::default());
            }
        }
    }

    /// Save configuration to a file.
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Build a library loader from the `[loader]` section.
    pub fn library_loader(&self) -> LibraryLoader {
        LibraryLoader::with_search_paths(self.loader.search_paths.clone(), self.loader.default_paths)
    }

    /// Size the global callback pool and return the configured loader.
    ///
    /// The pool capacity only takes effect if the global pool has not been
    /// created yet.
    pub fn apply(&self) -> LibraryLoader {
        if !configure_global_pool(self.callbacks.capacity) {
            warn!(
                capacity = self.callbacks.capacity,
                "callback pool already created; capacity not applied"
            );
        }
        self.library_loader()
    }
}

/// Library search configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoaderConfig {
    /// Directories searched before the platform defaults
    #[serde(default)]
    pub search_paths: Vec<PathBuf>,

    /// Also search the platform library directories
    #[serde(default = "default_true")]
    pub default_paths: bool,
}

fn default_true() -> bool {
    true
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            search_paths: Vec::new(),
            default_paths: true,
        }
    }
}

/// Callback pool configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallbackConfig {
    /// Number of callback slots in the global pool
    #[serde(default = "default_capacity")]
    pub capacity: usize,
}

fn default_capacity() -> usize {
    DEFAULT_CALLBACK_CAPACITY
}

impl Default for CallbackConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `tracing` filter directive, e.g. `"info"` or `"dlbridge=trace"`
    #[serde(default = "default_filter")]
    pub filter: String,
}

fn default_filter() -> String {
    "warn".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_filter(),
        }
    }
}
