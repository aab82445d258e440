//! Recorder Configuration
//!
//! Configuration is layered:
//!
//! 1. Built-in defaults ([`RecorderConfig::default`])
//! 2. Optional TOML file ([`RecorderConfig::load_from_path`])
//! 3. Command-line / environment overrides ([`ConfigOverrides`])
//!
//! # Example TOML
//!
//! ```toml
//! tap-name = "robot1"
//! output-dir = "/var/log/taps"
//! record-mode = "log-only"
//! shutdown-grace-ms = 2000
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::copier::{DEFAULT_CHUNK_SIZE, MAX_CHUNK_SIZE};
use crate::error::ConfigError;
use crate::tap::DEFAULT_LOG_EXTENSION;

/// Which tap directory to watch
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecordMode {
    /// All message traffic (`tap/all`)
    #[default]
    All,
    /// Log records only (`tap/log`)
    LogOnly,
}

/// Settings for a [`Recorder`](crate::Recorder)
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct RecorderConfig {
    /// Only record the tap with this name
    pub tap_name: Option<String>,
    /// Directory recordings are written to
    pub output_dir: PathBuf,
    /// Which tap directory to watch
    pub record_mode: RecordMode,
    /// Explicit runtime root (None = platform default)
    pub runtime_root: Option<PathBuf>,
    /// Recording file extension
    pub log_extension: String,
    /// Copy buffer size in bytes
    pub chunk_size: usize,
    /// How long shutdown waits for recordings before aborting them
    pub shutdown_grace_ms: u64,
    /// Append `-N` to recording names that already exist
    pub disambiguate_log_names: bool,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            tap_name: None,
            output_dir: PathBuf::from("."),
            record_mode: RecordMode::All,
            runtime_root: None,
            log_extension: DEFAULT_LOG_EXTENSION.to_string(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            shutdown_grace_ms: 5000,
            disambiguate_log_names: true,
        }
    }
}

impl RecorderConfig {
    /// Parse configuration from a TOML string
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Check values that would make recording impossible
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(name) = &self.tap_name {
            if name.is_empty() {
                return Err(ConfigError::Invalid("tap-name must not be empty".into()));
            }
            if name.contains(['/', '\\']) {
                return Err(ConfigError::Invalid(format!(
                    "tap-name must be a bare name, got {name:?}"
                )));
            }
        }
        if self.log_extension.is_empty() {
            return Err(ConfigError::Invalid("log-extension must not be empty".into()));
        }
        if self.chunk_size == 0 {
            return Err(ConfigError::Invalid("chunk-size must be non-zero".into()));
        }
        if self.chunk_size > MAX_CHUNK_SIZE {
            return Err(ConfigError::Invalid(format!(
                "chunk-size must be at most {MAX_CHUNK_SIZE} bytes, got {}",
                self.chunk_size
            )));
        }
        Ok(())
    }

    /// Shutdown grace period
    #[must_use]
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

/// Values from the command line or environment, applied over a loaded config
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// Override `tap-name`
    pub tap_name: Option<String>,
    /// Override `output-dir`
    pub output_dir: Option<PathBuf>,
    /// Override `record-mode`
    pub record_mode: Option<RecordMode>,
    /// Override `runtime-root`
    pub runtime_root: Option<PathBuf>,
    /// Override `shutdown-grace-ms`
    pub shutdown_grace_ms: Option<u64>,
}

impl ConfigOverrides {
    /// Apply the set overrides to `config` and re-validate
    pub fn apply(self, mut config: RecorderConfig) -> Result<RecorderConfig, ConfigError> {
        if let Some(name) = self.tap_name {
            config.tap_name = Some(name);
        }
        if let Some(dir) = self.output_dir {
            config.output_dir = dir;
        }
        if let Some(mode) = self.record_mode {
            config.record_mode = mode;
        }
        if let Some(root) = self.runtime_root {
            config.runtime_root = Some(root);
        }
        if let Some(ms) = self.shutdown_grace_ms {
            config.shutdown_grace_ms = ms;
        }
        config.validate()?;
        Ok(config)
    }
}
