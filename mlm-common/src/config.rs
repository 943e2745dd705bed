//! Bootstrap configuration loading and root folder resolution
//!
//! Configuration lives in a small TOML file. A missing file is not fatal: the
//! built-in defaults are used and a warning is logged.

use crate::time;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Environment variable naming the root folder
pub const ROOT_FOLDER_ENV: &str = "MLM_ROOT_FOLDER";

/// Bootstrap configuration loaded from TOML file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TomlConfig {
    /// Root folder holding data, training buffer and model files
    #[serde(default)]
    pub root_folder: Option<PathBuf>,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Continuous training behaviour
    #[serde(default)]
    pub training: TrainingSettings,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path (optional, logs to stderr if not specified)
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

/// Continuous training settings (`[training]` table)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainingSettings {
    /// Save every promoted model to model storage
    #[serde(default = "default_true")]
    pub auto_save: bool,

    /// Merge the training buffer into the primary store from within the retrain loop
    #[serde(default)]
    pub auto_commit: bool,

    /// Cycling policy: keep searching for a better model this many times
    /// after the last promotion. `None` trains once.
    #[serde(default)]
    pub max_cycles: Option<u32>,

    /// Delay before the "still training" diagnostic line is logged
    #[serde(default = "default_progress_log_delay_ms")]
    pub progress_log_delay_ms: u64,

    /// Cancel a round that runs longer than this
    #[serde(default)]
    pub round_timeout_ms: Option<u64>,

    /// Directory for staging files written during data merges
    #[serde(default)]
    pub staging_dir: Option<PathBuf>,

    /// Capacity of the broadcast event bus
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

impl Default for TrainingSettings {
    fn default() -> Self {
        Self {
            auto_save: true,
            auto_commit: false,
            max_cycles: None,
            progress_log_delay_ms: default_progress_log_delay_ms(),
            round_timeout_ms: None,
            staging_dir: None,
            event_capacity: default_event_capacity(),
        }
    }
}

impl TrainingSettings {
    /// Delay before the "still training" diagnostic line
    pub fn progress_log_delay(&self) -> Duration {
        time::millis_to_duration(self.progress_log_delay_ms)
    }

    /// Round timeout as Duration, if configured
    pub fn round_timeout(&self) -> Option<Duration> {
        self.round_timeout_ms.map(time::millis_to_duration)
    }

    /// Staging directory, falling back to the OS temp dir
    pub fn staging_dir(&self) -> PathBuf {
        self.staging_dir.clone().unwrap_or_else(std::env::temp_dir)
    }

    /// Reject settings that cannot work
    pub fn validate(&self) -> Result<()> {
        if self.max_cycles == Some(0) {
            return Err(Error::Config(
                "training.max_cycles must be at least 1 (omit it to train once)".to_string(),
            ));
        }
        if self.event_capacity == 0 {
            return Err(Error::Config(
                "training.event_capacity must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_progress_log_delay_ms() -> u64 {
    250
}

fn default_event_capacity() -> usize {
    100
}

/// Load TOML configuration
///
/// A missing file yields the defaults (with a warning). A file that exists but
/// cannot be parsed is an error.
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    if !path.exists() {
        warn!(
            "Config file {} not found, using built-in defaults",
            path.display()
        );
        return Ok(TomlConfig::default());
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read TOML failed: {}", e)))?;
    let config: TomlConfig = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse TOML failed: {}", e)))?;
    config.training.validate()?;

    info!("Loaded TOML configuration from {}", path.display());
    Ok(config)
}

/// Write TOML configuration, creating parent directories as needed
pub fn write_toml_config(config: &TomlConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Serialize TOML failed: {}", e)))?;
    std::fs::write(path, content)?;
    Ok(())
}

/// Default configuration file location for a module (`<config dir>/mlm/<module>.toml`)
pub fn default_config_path(module_name: &str) -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("mlm").join(format!("{}.toml", module_name)))
}

/// OS-dependent default root folder path
pub fn get_default_root_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("mlm"))
        .unwrap_or_else(|| PathBuf::from("./mlm_data"))
}

/// Root folder resolution
///
/// Priority order:
/// 1. Command-line argument (highest priority)
/// 2. Environment variable `MLM_ROOT_FOLDER`
/// 3. TOML config file
/// 4. OS-dependent compiled default (fallback)
#[derive(Debug, Clone)]
pub struct RootFolderResolver {
    module_name: String,
    cli_arg: Option<PathBuf>,
    toml_root: Option<PathBuf>,
}

impl RootFolderResolver {
    pub fn new(module_name: impl Into<String>) -> Self {
        Self {
            module_name: module_name.into(),
            cli_arg: None,
            toml_root: None,
        }
    }

    /// Command-line override
    pub fn with_cli_arg(mut self, path: Option<PathBuf>) -> Self {
        self.cli_arg = path;
        self
    }

    /// Root folder from the TOML file
    pub fn with_toml_root(mut self, path: Option<PathBuf>) -> Self {
        self.toml_root = path;
        self
    }

    /// Resolve the root folder
    pub fn resolve(&self) -> PathBuf {
        if let Some(path) = &self.cli_arg {
            info!(module = %self.module_name, "Root folder: {} (command line)", path.display());
            return path.clone();
        }

        if let Ok(path) = std::env::var(ROOT_FOLDER_ENV) {
            if !path.trim().is_empty() {
                info!(module = %self.module_name, "Root folder: {} (environment)", path);
                return PathBuf::from(path);
            }
        }

        if let Some(path) = &self.toml_root {
            info!(module = %self.module_name, "Root folder: {} (TOML)", path.display());
            return path.clone();
        }

        let path = get_default_root_folder();
        info!(module = %self.module_name, "Root folder: {} (default)", path.display());
        path
    }
}
