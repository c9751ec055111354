//! Runner configuration types and defaults.
//!
//! [`RunnerConfig`] tunes the engine and the console output of a single
//! runner. [`EntryConfig`] describes where the entry modes find the dev
//! server, the module bytes and the optional import units.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default number of compiled modules kept in the module cache
pub const DEFAULT_MODULE_CACHE_ENTRIES: usize = 8;

/// Default dev server address
pub const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:8080";

/// Default path of the module on the dev server
pub const DEFAULT_WASM_PATH: &str = "/main.wasm";

/// Default path of the watcher socket on the dev server
pub const DEFAULT_WATCHER_PATH: &str = "/watcher";

/// Specifier tried first for an import unit
pub const PRIMARY_UNIT_SPECIFIER: &str = "./wasm-import-unit.mjs";

/// Specifier tried when the primary one yields nothing
pub const FALLBACK_UNIT_SPECIFIER: &str =
    "./JavaScriptKit_JavaScriptKit.resources/Runtime/index.mjs";

/// Configuration for a single runner
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunnerConfig {
    /// Mirror module stdout/stderr to the host console (default: true)
    #[serde(default = "default_true")]
    pub mirror_console: bool,

    /// Allow the running module to be interrupted through an epoch bump
    #[serde(default)]
    pub epoch_interruption: bool,

    /// Maximum compiled modules kept in the module cache
    #[serde(default = "default_module_cache_entries")]
    pub module_cache_entries: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            mirror_console: true,
            epoch_interruption: false,
            module_cache_entries: DEFAULT_MODULE_CACHE_ENTRIES,
        }
    }
}

impl RunnerConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable or disable console mirroring
    pub fn with_mirror_console(mut self, mirror: bool) -> Self {
        self.mirror_console = mirror;
        self
    }

    /// Enable or disable epoch interruption
    pub fn with_epoch_interruption(mut self, enable: bool) -> Self {
        self.epoch_interruption = enable;
        self
    }

    /// Set the module cache size
    pub fn with_module_cache_entries(mut self, entries: usize) -> Self {
        self.module_cache_entries = entries;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.module_cache_entries == 0 {
            return Err(ConfigError::InvalidValue {
                field: "module_cache_entries".into(),
                reason: "must be greater than 0".into(),
            });
        }

        Ok(())
    }
}

/// Configuration shared by the entry modes
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryConfig {
    /// Dev server base URL (http or https)
    #[serde(default = "default_server_url")]
    pub server_url: String,

    /// Path of the module on the dev server
    #[serde(default = "default_wasm_path")]
    pub wasm_path: String,

    /// Path of the watcher socket on the dev server
    #[serde(default = "default_watcher_path")]
    pub watcher_path: String,

    /// Import unit specifiers, probed in order
    #[serde(default = "default_unit_specifiers")]
    pub unit_specifiers: Vec<String>,

    /// Runner settings
    #[serde(default)]
    pub runner: RunnerConfig,
}

impl Default for EntryConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            wasm_path: DEFAULT_WASM_PATH.to_string(),
            watcher_path: DEFAULT_WATCHER_PATH.to_string(),
            unit_specifiers: default_unit_specifiers(),
            runner: RunnerConfig::default(),
        }
    }
}

impl EntryConfig {
    /// Load a configuration from a JSON file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let config: EntryConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Set the server URL
    pub fn with_server_url(mut self, url: impl Into<String>) -> Self {
        self.server_url = url.into();
        self
    }

    /// Set the runner configuration
    pub fn with_runner(mut self, runner: RunnerConfig) -> Self {
        self.runner = runner;
        self
    }

    /// URL the module bytes are fetched from
    pub fn wasm_url(&self) -> String {
        format!("{}{}", self.server_url.trim_end_matches('/'), self.wasm_path)
    }

    /// URL of the watcher socket (`http` becomes `ws`, `https` becomes `wss`)
    pub fn watcher_url(&self) -> String {
        let base = self.server_url.trim_end_matches('/');
        let base = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            base.to_string()
        };
        format!("{}{}", base, self.watcher_path)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server_url.is_empty() {
            return Err(ConfigError::MissingField {
                field: "server_url".into(),
            });
        }

        if !self.server_url.starts_with("http://") && !self.server_url.starts_with("https://") {
            return Err(ConfigError::InvalidValue {
                field: "server_url".into(),
                reason: "must start with http:// or https://".into(),
            });
        }

        self.runner.validate()
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Invalid configuration value
    #[error("Invalid configuration value for {field}: {reason}")]
    InvalidValue {
        /// The field name
        field: String,
        /// The reason it's invalid
        reason: String,
    },

    /// Missing required field
    #[error("Missing required configuration field: {field}")]
    MissingField {
        /// The field name
        field: String,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

// Default value functions for serde
fn default_module_cache_entries() -> usize {
    DEFAULT_MODULE_CACHE_ENTRIES
}

fn default_true() -> bool {
    true
}

fn default_server_url() -> String {
    DEFAULT_SERVER_URL.to_string()
}

fn default_wasm_path() -> String {
    DEFAULT_WASM_PATH.to_string()
}

fn default_watcher_path() -> String {
    DEFAULT_WATCHER_PATH.to_string()
}

fn default_unit_specifiers() -> Vec<String> {
    vec![
        PRIMARY_UNIT_SPECIFIER.to_string(),
        FALLBACK_UNIT_SPECIFIER.to_string(),
    ]
}
