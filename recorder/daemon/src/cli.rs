//! Command-line arguments

use std::path::PathBuf;

use clap::Parser;
use tap_recorder_core::{ConfigOverrides, RecordMode, RecorderConfig};

/// Record messages from local transport taps to file
#[derive(Debug, Parser)]
#[command(name = "tap-recorder", version, about)]
pub struct Args {
    /// The name of the tap to record (default: all taps)
    #[arg(long, env = "TAP_RECORDER_TAP_NAME")]
    pub tap_name: Option<String>,

    /// The directory to save tap recordings in
    #[arg(long, env = "TAP_RECORDER_OUTPUT_DIR")]
    pub output_dir: Option<PathBuf>,

    /// Only save log records, not message traffic
    #[arg(long, env = "TAP_RECORDER_LOG_RECORD_ONLY")]
    pub log_record_only: bool,

    /// Runtime root to find taps under (default: platform runtime directory)
    #[arg(long, env = "TAP_RECORDER_RUNTIME_DIR")]
    pub runtime_dir: Option<PathBuf>,

    /// TOML configuration file
    #[arg(long, env = "TAP_RECORDER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Seconds to wait for recordings to close on shutdown
    #[arg(long, env = "TAP_RECORDER_GRACE_SECS")]
    pub grace_secs: Option<u64>,
}

impl Args {
    /// Flags that override file values
    pub fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            tap_name: self.tap_name.clone(),
            output_dir: self.output_dir.clone(),
            record_mode: self.log_record_only.then_some(RecordMode::LogOnly),
            runtime_root: self.runtime_dir.clone(),
            shutdown_grace_ms: self.grace_secs.map(|s| s.saturating_mul(1000)),
        }
    }

    /// Load the config file (if any) and apply flag overrides
    pub fn to_config(&self) -> anyhow::Result<RecorderConfig> {
        let base = match &self.config {
            Some(path) => RecorderConfig::load_from_path(path)?,
            None => RecorderConfig::default(),
        };
        Ok(self.overrides().apply(base)?)
    }
}
