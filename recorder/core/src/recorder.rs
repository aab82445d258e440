//! Recorder - Discovery, Registry and Connections Wired Together
//!
//! The recorder is the externally visible unit. It watches one tap directory
//! and records every tap it finds (or only the configured one) to its own file.
//!
//! # Architecture
//!
//! ```text
//!   TapDiscovery ──(scan + notify)──► mpsc ──► Supervisor task
//!                                                  │
//!                                   filter ─► TapRegistry::claim
//!                                                  │
//!                                       JoinSet<recording tasks>
//!                                      ┌───────────┼───────────┐
//!                                 TapConnection TapConnection  ...
//!                                  (alpha)        (beta)
//! ```
//!
//! The supervisor is the single consumer of discovery events and the owner of
//! every recording task, so completions are observed in one place. Each task
//! holds a [`TapClaim`](crate::registry::TapClaim) that releases the tap name
//! when the task finishes, panics, or is aborted.
//!
//! # Lifecycle
//!
//! - [`Recorder::new`]: resolve directories (fatal on failure)
//! - [`Recorder::start`]: initial scan, then live watch
//! - [`Recorder::shutdown`]: stop watching, cancel recordings, wait up to the
//!   grace period, abort whatever is left
//!
//! # Per-Tap States
//!
//! `Idle → Claimed → Streaming → Released`, with `Claimed → Released` when the
//! connect or file creation fails. A released name can be claimed again by a
//! later discovery event.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tracing::{debug, error, info, warn, Instrument};

use crate::config::RecorderConfig;
use crate::connection::{TapConnection, TapOutcome};
use crate::discovery::{DiscoveryEvent, DiscoveryHandle, TapDiscovery};
use crate::error::{ConfigError, RecorderError, TapError};
use crate::registry::{TapClaim, TapRegistry};
use crate::runtime::{FixedRuntimeRoot, PlatformRuntimeRoot, RuntimeRootProvider, TapDirectories};
use crate::tap::{allocate_log_path, Clock, SystemClock, Tap};

/// Capacity of the recorder event broadcast channel
const EVENT_CAPACITY: usize = 256;

/// Operator-visible report of what the recorder is doing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecorderEvent {
    /// A tap was claimed and its recording scheduled
    TapStarted {
        /// Tap name
        name: String,
        /// Socket being recorded
        socket_path: PathBuf,
        /// Recording file
        log_path: PathBuf,
    },
    /// The tap closed and the recording is complete
    TapCompleted {
        /// Tap name
        name: String,
        /// Recording file
        log_path: PathBuf,
        /// Bytes recorded
        bytes: u64,
    },
    /// Shutdown stopped the recording
    TapCancelled {
        /// Tap name
        name: String,
        /// Recording file
        log_path: PathBuf,
    },
    /// The recording failed
    TapFailed {
        /// Tap name
        name: String,
        /// Recording file that was attempted
        log_path: PathBuf,
        /// Human-readable cause
        reason: String,
    },
}

impl RecorderEvent {
    /// Tap this event is about
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::TapStarted { name, .. }
            | Self::TapCompleted { name, .. }
            | Self::TapCancelled { name, .. }
            | Self::TapFailed { name, .. } => name,
        }
    }

    /// Whether the recording this event is about has ended
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::TapStarted { .. })
    }
}

/// Records taps from one directory until shut down
pub struct Recorder {
    config: RecorderConfig,
    watch_dir: PathBuf,
    registry: TapRegistry,
    clock: Arc<dyn Clock>,
    events: broadcast::Sender<RecorderEvent>,
    running: Option<Running>,
}

struct Running {
    discovery: TapDiscovery,
    watch: DiscoveryHandle,
    discovery_tx: mpsc::UnboundedSender<DiscoveryEvent>,
    cancel_tx: watch::Sender<bool>,
    supervisor: JoinHandle<()>,
}

impl Recorder {
    /// Create a recorder, resolving the runtime root from `config`.
    ///
    /// Uses `config.runtime_root` when set, otherwise the platform default.
    pub fn new(config: RecorderConfig) -> Result<Self, RecorderError> {
        match config.runtime_root.clone() {
            Some(root) => Self::with_provider(config, &FixedRuntimeRoot(root)),
            None => Self::with_provider(config, &PlatformRuntimeRoot),
        }
    }

    /// Create a recorder with an explicit runtime root provider
    pub fn with_provider(
        config: RecorderConfig,
        provider: &dyn RuntimeRootProvider,
    ) -> Result<Self, RecorderError> {
        config.validate()?;

        let dirs = TapDirectories::resolve(provider)?;
        let watch_dir = dirs.for_mode(config.record_mode).to_path_buf();

        std::fs::create_dir_all(&config.output_dir).map_err(|source| ConfigError::RuntimeDir {
            path: config.output_dir.clone(),
            source,
        })?;

        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        info!(
            watch_dir = ?watch_dir,
            output_dir = ?config.output_dir,
            tap_filter = ?config.tap_name,
            "Recorder configured"
        );

        Ok(Self {
            config,
            watch_dir,
            registry: TapRegistry::new(),
            clock: Arc::new(SystemClock),
            events,
            running: None,
        })
    }

    /// Replace the timestamp source used for recording names
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Directory being watched for tap sockets
    #[must_use]
    pub fn watch_dir(&self) -> &Path {
        &self.watch_dir
    }

    /// Registry of taps currently being recorded
    #[must_use]
    pub fn registry(&self) -> &TapRegistry {
        &self.registry
    }

    /// Names of taps currently being recorded
    #[must_use]
    pub fn active_taps(&self) -> Vec<String> {
        self.registry.active_taps()
    }

    /// Whether `start` has been called and `shutdown` has not
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Subscribe to recorder events
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<RecorderEvent> {
        self.events.subscribe()
    }

    /// Record pre-existing taps and start watching for new ones.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&mut self) -> Result<(), RecorderError> {
        if self.running.is_some() {
            return Err(RecorderError::AlreadyStarted);
        }

        let (discovery_tx, discovery_rx) = mpsc::unbounded_channel();
        let (cancel_tx, cancel_rx) = watch::channel(false);

        // Scan results queue in the channel until the supervisor runs
        let discovery = TapDiscovery::new(&self.watch_dir);
        let watch = discovery.start(discovery_tx.clone())?;

        let supervisor = Supervisor {
            settings: Settings::from_config(&self.config),
            registry: self.registry.clone(),
            clock: Arc::clone(&self.clock),
            events: self.events.clone(),
            cancel: cancel_rx,
            tasks: JoinSet::new(),
        };
        let span = tracing::info_span!("recorder", dir = ?self.watch_dir);
        let supervisor = tokio::spawn(supervisor.run(discovery_rx).instrument(span));

        self.running = Some(Running {
            discovery,
            watch,
            discovery_tx,
            cancel_tx,
            supervisor,
        });

        info!(dir = ?self.watch_dir, "Recorder started");
        Ok(())
    }

    /// Scan the watched directory again, returning how many taps were found
    pub fn rescan(&self) -> Result<usize, RecorderError> {
        let running = self.running.as_ref().ok_or(RecorderError::NotRunning)?;
        running.discovery.scan_into(&running.discovery_tx)
    }

    /// Stop watching, cancel active recordings and wait for them to finish.
    ///
    /// Recordings get the configured grace period to close their files;
    /// anything still running afterwards is aborted. No-op if not running.
    pub async fn shutdown(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };

        info!(active = self.registry.len(), "Recorder shutting down");

        running.watch.stop();
        drop(running.discovery_tx);
        running.cancel_tx.send_replace(true);

        if let Err(e) = running.supervisor.await {
            error!(error = %e, "Recorder supervisor ended abnormally");
        }

        info!("Recorder stopped");
    }

    /// Shut down and release the recorder
    pub async fn dispose(mut self) {
        self.shutdown().await;
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        // The supervisor keeps draining on its own
        if let Some(running) = self.running.take() {
            running.cancel_tx.send_replace(true);
        }
    }
}

impl std::fmt::Debug for Recorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Recorder")
            .field("watch_dir", &self.watch_dir)
            .field("running", &self.is_running())
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

/// Config values the supervisor needs per tap
#[derive(Debug, Clone)]
struct Settings {
    tap_filter: Option<String>,
    output_dir: PathBuf,
    log_extension: String,
    chunk_size: usize,
    disambiguate: bool,
    grace: Duration,
}

impl Settings {
    fn from_config(config: &RecorderConfig) -> Self {
        Self {
            tap_filter: config.tap_name.clone(),
            output_dir: config.output_dir.clone(),
            log_extension: config.log_extension.clone(),
            chunk_size: config.chunk_size,
            disambiguate: config.disambiguate_log_names,
            grace: config.shutdown_grace(),
        }
    }
}

/// Result handed back by a recording task
struct FinishedTap {
    tap: Tap,
    outcome: TapOutcome,
}

/// Consumes discovery events and owns the recording tasks
struct Supervisor {
    settings: Settings,
    registry: TapRegistry,
    clock: Arc<dyn Clock>,
    events: broadcast::Sender<RecorderEvent>,
    cancel: watch::Receiver<bool>,
    tasks: JoinSet<FinishedTap>,
}

impl Supervisor {
    async fn run(mut self, mut discovery_rx: mpsc::UnboundedReceiver<DiscoveryEvent>) {
        let mut cancel = self.cancel.clone();
        let mut discovery_open = true;

        loop {
            tokio::select! {
                biased;

                _ = cancel.wait_for(|stop| *stop) => break,

                Some(joined) = self.tasks.join_next(), if !self.tasks.is_empty() => {
                    self.on_joined(joined);
                }

                event = discovery_rx.recv(), if discovery_open => match event {
                    Some(event) => {
                        self.handle(&event.name, &event.socket_path);
                    }
                    None => {
                        debug!("Discovery channel closed");
                        discovery_open = false;
                    }
                },
            }
        }

        self.drain().await;
    }

    /// React to one discovery event. Returns whether a recording was scheduled.
    fn handle(&mut self, tap_name: &str, socket_path: &Path) -> bool {
        if let Some(filter) = &self.settings.tap_filter {
            if tap_name != filter {
                debug!(tap = %tap_name, filter = %filter, "Ignoring tap");
                return false;
            }
        }

        let Some(claim) = self.registry.claim(tap_name) else {
            return false;
        };

        let log_path = allocate_log_path(
            &self.settings.output_dir,
            tap_name,
            self.clock.now(),
            &self.settings.log_extension,
            self.settings.disambiguate,
        );

        let tap = Tap {
            name: tap_name.to_string(),
            socket_path: socket_path.to_path_buf(),
            log_path,
        };

        info!(tap = %tap.name, log = ?tap.log_path, "Starting tap");
        let _ = self.events.send(RecorderEvent::TapStarted {
            name: tap.name.clone(),
            socket_path: tap.socket_path.clone(),
            log_path: tap.log_path.clone(),
        });

        let connection = TapConnection::for_tap(&tap).with_chunk_size(self.settings.chunk_size);
        let recording = connection.run_until(self.cancel.clone());
        self.spawn_recording(tap, claim, recording);

        true
    }

    /// Run `recording` as a task holding `claim` until it finishes.
    ///
    /// A panic becomes [`TapError::Panicked`]; the claim is released on every
    /// exit path, including abort.
    fn spawn_recording<F>(&mut self, tap: Tap, claim: TapClaim, recording: F)
    where
        F: Future<Output = TapOutcome> + Send + 'static,
    {
        let span = tracing::info_span!("tap", tap = %tap.name, recording = %claim.id());

        self.tasks.spawn(
            async move {
                let outcome = AssertUnwindSafe(recording)
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|panic| {
                        TapOutcome::Failed(TapError::Panicked(panic_message(panic.as_ref())))
                    });
                drop(claim);
                FinishedTap { tap, outcome }
            }
            .instrument(span),
        );
    }

    fn on_joined(&mut self, joined: Result<FinishedTap, JoinError>) {
        match joined {
            Ok(finished) => self.report(finished),
            Err(e) if e.is_cancelled() => debug!("Recording task aborted"),
            Err(e) => error!(error = %e, "Recording task failed to join"),
        }
    }

    fn report(&self, finished: FinishedTap) {
        let FinishedTap {
            tap: Tap { name, log_path, .. },
            outcome,
        } = finished;

        let event = match outcome {
            TapOutcome::Completed { bytes } => {
                info!(tap = %name, bytes, "Stopping tap");
                RecorderEvent::TapCompleted {
                    name,
                    log_path,
                    bytes,
                }
            }
            TapOutcome::Cancelled => {
                info!(tap = %name, "Stopping tap (shutdown)");
                RecorderEvent::TapCancelled { name, log_path }
            }
            TapOutcome::Failed(e) => {
                if e.is_connection_error() {
                    warn!(tap = %name, error = %e, "Tap connection failed");
                } else {
                    warn!(tap = %name, error = %e, "Tap recording failed");
                }
                RecorderEvent::TapFailed {
                    name,
                    log_path,
                    reason: e.to_string(),
                }
            }
        };

        // No subscribers is fine
        let _ = self.events.send(event);
    }

    /// Wait for cancelled recordings, aborting those that outlive the grace period
    async fn drain(&mut self) {
        if self.tasks.is_empty() {
            return;
        }

        info!(active = self.tasks.len(), "Waiting for recordings to stop");

        let grace = self.settings.grace;
        let finished = tokio::time::timeout(grace, async {
            while let Some(joined) = self.tasks.join_next().await {
                self.on_joined(joined);
            }
        })
        .await;

        if finished.is_err() {
            warn!(
                remaining = self.tasks.len(),
                grace_ms = grace.as_millis(),
                "Grace period elapsed, aborting recordings"
            );
            self.tasks.abort_all();
            while let Some(joined) = self.tasks.join_next().await {
                self.on_joined(joined);
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, TimeZone, Utc};

    use super::*;

    struct FixedClock(DateTime<Utc>);

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.0
        }
    }

    fn supervisor(output_dir: &Path, filter: Option<&str>) -> (Supervisor, watch::Sender<bool>) {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let config = RecorderConfig {
            tap_name: filter.map(str::to_string),
            output_dir: output_dir.to_path_buf(),
            ..Default::default()
        };
        let (events, _) = broadcast::channel(16);
        let supervisor = Supervisor {
            settings: Settings::from_config(&config),
            registry: TapRegistry::new(),
            clock: Arc::new(FixedClock(
                Utc.with_ymd_and_hms(2021, 6, 1, 12, 0, 0).unwrap(),
            )),
            events,
            cancel: cancel_rx,
            tasks: JoinSet::new(),
        };
        (supervisor, cancel_tx)
    }

    #[tokio::test]
    async fn test_filter_ignores_other_taps() {
        let dir = tempfile::tempdir().unwrap();
        let (mut sup, _cancel) = supervisor(dir.path(), Some("gamma"));

        assert!(!sup.handle("alpha", &dir.path().join("alpha.sock")));
        assert!(!sup.registry.is_active("alpha"));
        assert!(sup.tasks.is_empty());

        assert!(sup.handle("gamma", &dir.path().join("gamma.sock")));
        assert!(sup.registry.is_active("gamma"));
        assert_eq!(sup.tasks.len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_events_schedule_one_recording() {
        let dir = tempfile::tempdir().unwrap();
        let (mut sup, _cancel) = supervisor(dir.path(), None);
        let socket = dir.path().join("beta.sock");

        assert!(sup.handle("beta", &socket));
        assert!(!sup.handle("beta", &socket));
        assert_eq!(sup.tasks.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_recording_releases_and_reports() {
        let dir = tempfile::tempdir().unwrap();
        let (mut sup, _cancel) = supervisor(dir.path(), None);
        let mut events = sup.events.subscribe();

        // No socket exists, so connect fails
        assert!(sup.handle("ghost", &dir.path().join("ghost.sock")));
        let joined = sup.tasks.join_next().await.unwrap();
        sup.on_joined(joined);

        assert!(!sup.registry.is_active("ghost"));
        assert!(matches!(
            events.recv().await.unwrap(),
            RecorderEvent::TapStarted { .. }
        ));
        match events.recv().await.unwrap() {
            RecorderEvent::TapFailed { name, log_path, .. } => {
                assert_eq!(name, "ghost");
                assert_eq!(log_path, dir.path().join("ghost-2021-06-01T12-00-00.robtap"));
            }
            other => panic!("unexpected event {other:?}"),
        }

        // Released names can be claimed again
        assert!(sup.handle("ghost", &dir.path().join("ghost.sock")));
    }

    #[tokio::test]
    async fn test_drain_releases_cancelled_recordings() {
        let dir = tempfile::tempdir().unwrap();
        let (mut sup, cancel) = supervisor(dir.path(), None);

        cancel.send_replace(true);
        assert!(sup.handle("alpha", &dir.path().join("alpha.sock")));
        sup.drain().await;

        assert!(sup.tasks.is_empty());
        assert!(sup.registry.is_empty());
    }

    #[tokio::test]
    async fn test_panicking_recording_releases_and_reports() {
        let dir = tempfile::tempdir().unwrap();
        let (mut sup, _cancel) = supervisor(dir.path(), None);
        let mut events = sup.events.subscribe();

        let claim = sup.registry.claim("faulty").unwrap();
        let tap = Tap {
            name: "faulty".into(),
            socket_path: dir.path().join("faulty.sock"),
            log_path: dir.path().join("faulty.robtap"),
        };
        sup.spawn_recording(tap, claim, async {
            if true {
                panic!("copier blew up");
            }
            TapOutcome::Cancelled
        });

        let joined = sup.tasks.join_next().await.unwrap();
        sup.on_joined(joined);

        assert!(!sup.registry.is_active("faulty"));
        match events.recv().await.unwrap() {
            RecorderEvent::TapFailed { name, reason, .. } => {
                assert_eq!(name, "faulty");
                assert!(reason.contains("panicked"), "reason: {reason}");
                assert!(reason.contains("copier blew up"), "reason: {reason}");
            }
            other => panic!("unexpected event {other:?}"),
        }

        assert!(sup.registry.claim("faulty").is_some());
    }

    #[tokio::test]
    async fn test_drain_aborts_recording_that_ignores_cancel() {
        let dir = tempfile::tempdir().unwrap();
        let (mut sup, cancel) = supervisor(dir.path(), None);
        sup.settings.grace = Duration::from_millis(50);

        let claim = sup.registry.claim("stuck").unwrap();
        let tap = Tap {
            name: "stuck".into(),
            socket_path: dir.path().join("stuck.sock"),
            log_path: dir.path().join("stuck.robtap"),
        };
        sup.spawn_recording(tap, claim, std::future::pending::<TapOutcome>());
        assert!(sup.registry.is_active("stuck"));

        cancel.send_replace(true);
        tokio::time::timeout(Duration::from_secs(5), sup.drain())
            .await
            .expect("drain should finish after the grace period");

        assert!(sup.tasks.is_empty());
        assert!(!sup.registry.is_active("stuck"));
        assert!(sup.registry.claim("stuck").is_some());
    }

    #[test]
    fn test_panic_message_extracts_text() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");

        let payload: Box<dyn Any + Send> = Box::new(String::from("owned boom"));
        assert_eq!(panic_message(payload.as_ref()), "owned boom");

        let payload: Box<dyn Any + Send> = Box::new(42u8);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic");
    }

    #[test]
    fn test_event_helpers() {
        let started = RecorderEvent::TapStarted {
            name: "alpha".into(),
            socket_path: PathBuf::from("alpha.sock"),
            log_path: PathBuf::from("alpha.robtap"),
        };
        assert_eq!(started.name(), "alpha");
        assert!(!started.is_terminal());

        let done = RecorderEvent::TapCompleted {
            name: "alpha".into(),
            log_path: PathBuf::from("alpha.robtap"),
            bytes: 3,
        };
        assert!(done.is_terminal());
    }
}
