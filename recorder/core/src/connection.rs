//! Tap Connection
//!
//! Owns one socket and one recording file for the lifetime of a single
//! recording. Both live inside the future returned by [`TapConnection::run`],
//! so they are closed on every exit path: end-of-stream, IO failure,
//! cancellation, or the task being dropped.
//!
//! The connection never touches the registry; releasing the tap name is the
//! caller's job.

use std::path::{Path, PathBuf};

use tokio::fs::{File, OpenOptions};
use tokio::net::UnixStream;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::copier::{copy_stream, DEFAULT_CHUNK_SIZE};
use crate::error::TapError;
use crate::tap::Tap;

/// How a recording ended
#[derive(Debug)]
pub enum TapOutcome {
    /// The tap closed its end cleanly
    Completed {
        /// Bytes written to the recording
        bytes: u64,
    },
    /// Shutdown interrupted the recording
    Cancelled,
    /// The recording failed
    Failed(TapError),
}

impl TapOutcome {
    /// Error that ended the recording, if any
    #[must_use]
    pub fn error(&self) -> Option<&TapError> {
        match self {
            Self::Failed(e) => Some(e),
            _ => None,
        }
    }
}

/// A single recording: tap socket in, recording file out
#[derive(Debug, Clone)]
pub struct TapConnection {
    socket_path: PathBuf,
    log_path: PathBuf,
    chunk_size: usize,
}

impl TapConnection {
    /// Create a connection that records `socket_path` into `log_path`
    pub fn new(socket_path: impl Into<PathBuf>, log_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            log_path: log_path.into(),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    /// Create a connection for a claimed tap
    #[must_use]
    pub fn for_tap(tap: &Tap) -> Self {
        Self::new(&tap.socket_path, &tap.log_path)
    }

    /// Override the copy chunk size
    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Record until the tap closes or an IO error occurs
    pub async fn run(self) -> TapOutcome {
        match self.record().await {
            Ok(bytes) => TapOutcome::Completed { bytes },
            Err(e) => TapOutcome::Failed(e),
        }
    }

    /// Like [`run`](Self::run), but stops early once `cancel` turns `true`.
    ///
    /// A closed cancel channel counts as cancellation.
    pub async fn run_until(self, mut cancel: watch::Receiver<bool>) -> TapOutcome {
        if *cancel.borrow_and_update() {
            return TapOutcome::Cancelled;
        }

        let socket_path = self.socket_path.clone();
        tokio::select! {
            result = self.record() => match result {
                Ok(bytes) => TapOutcome::Completed { bytes },
                Err(e) => TapOutcome::Failed(e),
            },
            _ = cancel.wait_for(|stop| *stop) => {
                debug!(path = ?socket_path, "Recording cancelled");
                TapOutcome::Cancelled
            }
        }
    }

    async fn record(self) -> Result<u64, TapError> {
        let mut socket =
            UnixStream::connect(&self.socket_path)
                .await
                .map_err(|source| TapError::Connect {
                    path: self.socket_path.clone(),
                    source,
                })?;

        let mut file = create_new(&self.log_path).await?;

        info!(
            socket = ?self.socket_path,
            log = ?self.log_path,
            "Recording tap"
        );

        let bytes = copy_stream(&mut socket, &mut file, self.chunk_size).await?;
        debug!(bytes, "Tap reached end of stream");
        Ok(bytes)
    }
}

async fn create_new(path: &Path) -> Result<File, TapError> {
    OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await
        .map_err(|source| TapError::CreateLog {
            path: path.to_path_buf(),
            source,
        })
}
