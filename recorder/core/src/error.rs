//! Error Types
//!
//! Errors are split by how far they reach:
//!
//! - [`ConfigError`]: startup problems. Fatal, recording cannot proceed.
//! - [`TapError`] / [`StreamError`]: a single recording attempt failed. Isolated
//!   to that tap; the recorder reports it and keeps running.
//! - [`RecorderError`]: lifecycle errors returned by the orchestrator itself.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while loading configuration or preparing directories
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read a config file
    #[error("Failed to read config file at {path}: {source}")]
    Read {
        /// The path that was attempted
        path: PathBuf,
        /// Underlying IO error
        #[source]
        source: io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A configuration value is out of range
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    /// A runtime or output directory could not be created
    #[error("Failed to create directory {path}: {source}")]
    RuntimeDir {
        /// Directory that could not be created
        path: PathBuf,
        /// Underlying IO error
        #[source]
        source: io::Error,
    },

    /// The runtime root could not be determined on this platform
    #[error("Could not determine runtime directory: {0}")]
    RuntimeUnavailable(String),
}

/// Failure while copying bytes from a tap into its recording
#[derive(Debug, Error)]
pub enum StreamError {
    /// Reading from the source failed
    #[error("read failed: {0}")]
    Read(io::Error),

    /// Writing to the sink failed
    #[error("write failed: {0}")]
    Write(io::Error),
}

/// Failure of a single recording attempt
#[derive(Debug, Error)]
pub enum TapError {
    /// The tap socket refused or could not accept the connection
    #[error("Failed to connect to tap socket {path}: {source}")]
    Connect {
        /// Socket that was dialled
        path: PathBuf,
        /// Underlying IO error
        #[source]
        source: io::Error,
    },

    /// The recording file could not be created (including name collisions)
    #[error("Failed to create recording {path}: {source}")]
    CreateLog {
        /// Recording path
        path: PathBuf,
        /// Underlying IO error
        #[source]
        source: io::Error,
    },

    /// The transfer broke off mid-stream
    #[error(transparent)]
    Stream(#[from] StreamError),

    /// The recording task panicked
    #[error("Recording task panicked: {0}")]
    Panicked(String),
}

impl TapError {
    /// Whether the attempt failed before any byte was streamed
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Self::Connect { .. } | Self::CreateLog { .. })
    }

    /// Whether a log file collision caused the failure
    #[must_use]
    pub fn is_log_collision(&self) -> bool {
        matches!(self, Self::CreateLog { source, .. } if source.kind() == io::ErrorKind::AlreadyExists)
    }
}

/// Errors returned by the [`Recorder`](crate::Recorder) lifecycle
#[derive(Debug, Error)]
pub enum RecorderError {
    /// Configuration or directory setup failed
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The filesystem watcher could not be installed
    #[error("Failed to watch {path}: {source}")]
    Watch {
        /// Directory being watched
        path: PathBuf,
        /// Underlying watcher error
        #[source]
        source: notify::Error,
    },

    /// The initial directory scan failed
    #[error("Failed to scan {path}: {source}")]
    Scan {
        /// Directory being scanned
        path: PathBuf,
        /// Underlying IO error
        #[source]
        source: io::Error,
    },

    /// `start` was called on a recorder that is already running
    #[error("Recorder already started")]
    AlreadyStarted,

    /// An operation needs a running recorder
    #[error("Recorder not running")]
    NotRunning,
}
