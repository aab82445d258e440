//! Tap Recorder Core - Passive Capture of Local Transport Taps
//!
//! A running communication framework exposes "taps": Unix domain sockets that
//! stream a live duplicate of its message traffic. This crate discovers those
//! sockets and records each one, byte for byte, into a timestamped file for
//! offline inspection.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                          Recorder                             │
//! │                                                               │
//! │   TapDiscovery ──► Supervisor ──► TapRegistry (claim/release) │
//! │   (scan + watch)       │                                      │
//! │                        ▼                                      │
//! │               TapConnection per tap                           │
//! │               socket ──copy_stream──► <name>-<stamp>.robtap   │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Key Types
//!
//! - [`Recorder`]: start/shutdown lifecycle, the unit applications use
//! - [`TapRegistry`]: guarantees at most one recording per tap name
//! - [`TapConnection`]: one socket to one file
//! - [`TapDiscovery`]: initial scan plus filesystem watch
//! - [`RecorderConfig`]: configuration, loadable from TOML
//!
//! # Quick Start
//!
//! ```ignore
//! use tap_recorder_core::{Recorder, RecorderConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut recorder = Recorder::new(RecorderConfig::default())?;
//!     recorder.start()?;
//!     tokio::signal::ctrl_c().await?;
//!     recorder.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! # Module Overview
//!
//! - [`copier`]: chunked byte copy from socket to file
//! - [`registry`]: tap name claims
//! - [`connection`]: a single recording
//! - [`discovery`]: finding tap sockets
//! - [`recorder`]: orchestration
//! - [`tap`]: naming conventions and the timestamp clock
//! - [`config`]: configuration and overrides
//! - [`runtime`]: runtime root resolution
//! - [`error`]: error types

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod connection;
pub mod copier;
pub mod discovery;
pub mod error;
pub mod recorder;
pub mod registry;
pub mod runtime;
pub mod tap;

pub use config::{ConfigOverrides, RecordMode, RecorderConfig};
pub use connection::{TapConnection, TapOutcome};
pub use copier::{copy_stream, DEFAULT_CHUNK_SIZE, MAX_CHUNK_SIZE};
pub use discovery::{DiscoveryEvent, DiscoveryHandle, DiscoveryOrigin, TapDiscovery};
pub use error::{ConfigError, RecorderError, StreamError, TapError};
pub use recorder::{Recorder, RecorderEvent};
pub use registry::{RecordingId, TapClaim, TapRegistry};
pub use runtime::{FixedRuntimeRoot, PlatformRuntimeRoot, RuntimeRootProvider, TapDirectories};
pub use tap::{Clock, SystemClock, Tap};
