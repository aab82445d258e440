//! Tap Discovery
//!
//! Finds tap sockets in a directory and reports them on a channel:
//!
//! 1. `start` makes one synchronous pass over the directory and emits an event
//!    for every `*.sock` entry present.
//! 2. It then installs a `notify` watcher that emits an event for each create
//!    or modify notification on a `*.sock` path.
//!
//! # Duplicates
//!
//! Discovery does not deduplicate. A single socket typically yields a create
//! event followed by one or more modify events, and the initial scan may race
//! the watcher for the same file. The registry decides which event wins.
//!
//! # Threading
//!
//! The watcher callback runs on a `notify` thread and only forwards events
//! into an unbounded Tokio channel. The recorder consumes that channel on a
//! single task.

use std::fs;
use std::path::{Path, PathBuf};

use notify::event::EventKind;
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::RecorderError;
use crate::tap::tap_name_from_path;

/// What produced a discovery event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryOrigin {
    /// Directory scan (initial pass or rescan)
    Scan,
    /// Watcher reported a new file
    Created,
    /// Watcher reported a change to an existing file
    Modified,
}

/// A candidate tap found in the watched directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryEvent {
    /// Tap name derived from the socket file name
    pub name: String,
    /// Full path of the socket
    pub socket_path: PathBuf,
    /// What produced the event
    pub origin: DiscoveryOrigin,
}

impl DiscoveryEvent {
    /// Build an event for `path`, or `None` if it is not a tap socket
    #[must_use]
    pub fn from_path(path: &Path, origin: DiscoveryOrigin) -> Option<Self> {
        tap_name_from_path(path).map(|name| Self {
            name,
            socket_path: path.to_path_buf(),
            origin,
        })
    }
}

fn classify(kind: &EventKind) -> Option<DiscoveryOrigin> {
    match kind {
        EventKind::Create(_) => Some(DiscoveryOrigin::Created),
        EventKind::Modify(_) => Some(DiscoveryOrigin::Modified),
        _ => None,
    }
}

/// Watches one directory for tap sockets
#[derive(Debug, Clone)]
pub struct TapDiscovery {
    dir: PathBuf,
}

impl TapDiscovery {
    /// Create discovery for `dir`
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// One synchronous pass over the directory, sorted by path
    pub fn scan(&self) -> Result<Vec<DiscoveryEvent>, RecorderError> {
        let entries = fs::read_dir(&self.dir).map_err(|source| RecorderError::Scan {
            path: self.dir.clone(),
            source,
        })?;

        let mut events: Vec<DiscoveryEvent> = entries
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    debug!(error = %e, "Skipping unreadable directory entry");
                    None
                }
            })
            .filter(|entry| entry.file_type().is_ok_and(|t| !t.is_dir()))
            .filter_map(|entry| DiscoveryEvent::from_path(&entry.path(), DiscoveryOrigin::Scan))
            .collect();

        events.sort_by(|a, b| a.socket_path.cmp(&b.socket_path));
        Ok(events)
    }

    /// Scan the directory into `tx`, returning how many events were sent
    pub fn scan_into(
        &self,
        tx: &mpsc::UnboundedSender<DiscoveryEvent>,
    ) -> Result<usize, RecorderError> {
        let events = self.scan()?;
        let count = events.len();
        for event in events {
            debug!(tap = %event.name, "Found tap in scan");
            if tx.send(event).is_err() {
                break;
            }
        }
        Ok(count)
    }

    /// Run the initial scan, then watch the directory until the handle drops
    pub fn start(
        &self,
        tx: mpsc::UnboundedSender<DiscoveryEvent>,
    ) -> Result<DiscoveryHandle, RecorderError> {
        let found = self.scan_into(&tx)?;
        info!(path = ?self.dir, found, "Initial tap scan complete");

        let watch_dir = self.dir.clone();
        let mut watcher =
            notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
                let event = match res {
                    Ok(event) => event,
                    Err(e) => {
                        warn!(error = %e, path = ?watch_dir, "Tap watcher error");
                        return;
                    }
                };

                let Some(origin) = classify(&event.kind) else {
                    return;
                };

                for path in event.paths.iter().filter(|p| !p.is_dir()) {
                    if let Some(discovered) = DiscoveryEvent::from_path(path, origin) {
                        debug!(tap = %discovered.name, ?origin, "Watcher event");
                        // Receiver gone means the recorder is shutting down
                        let _ = tx.send(discovered);
                    }
                }
            })
            .map_err(|source| RecorderError::Watch {
                path: self.dir.clone(),
                source,
            })?;

        watcher
            .watch(&self.dir, RecursiveMode::NonRecursive)
            .map_err(|source| RecorderError::Watch {
                path: self.dir.clone(),
                source,
            })?;

        info!(path = ?self.dir, "Watching for taps");

        Ok(DiscoveryHandle {
            dir: self.dir.clone(),
            _watcher: watcher,
        })
    }
}

/// Live directory watch; dropping it stops the watcher
pub struct DiscoveryHandle {
    dir: PathBuf,
    _watcher: RecommendedWatcher,
}

impl DiscoveryHandle {
    /// Stop watching
    pub fn stop(self) {
        info!(path = ?self.dir, "Stopped watching for taps");
    }
}

impl std::fmt::Debug for DiscoveryHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscoveryHandle")
            .field("dir", &self.dir)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::os::unix::net::UnixListener;
    use std::time::Duration;

    use notify::event::{CreateKind, ModifyKind, RemoveKind};
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_classify_event_kinds() {
        assert_eq!(
            classify(&EventKind::Create(CreateKind::File)),
            Some(DiscoveryOrigin::Created)
        );
        assert_eq!(
            classify(&EventKind::Modify(ModifyKind::Any)),
            Some(DiscoveryOrigin::Modified)
        );
        assert_eq!(classify(&EventKind::Remove(RemoveKind::File)), None);
    }

    #[test]
    fn test_scan_finds_only_sockets() {
        let dir = tempfile::tempdir().unwrap();
        let _beta = UnixListener::bind(dir.path().join("beta.sock")).unwrap();
        let _alpha = UnixListener::bind(dir.path().join("alpha.sock")).unwrap();
        fs::write(dir.path().join("notes.txt"), b"").unwrap();
        fs::create_dir(dir.path().join("nested.sock")).unwrap();

        let events = TapDiscovery::new(dir.path()).scan().unwrap();

        let names: Vec<&str> = events.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "beta"]);
        assert!(events.iter().all(|e| e.origin == DiscoveryOrigin::Scan));
        assert_eq!(events[0].socket_path, dir.path().join("alpha.sock"));
    }

    #[test]
    fn test_scan_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = TapDiscovery::new(dir.path().join("absent")).scan().unwrap_err();
        assert!(matches!(err, RecorderError::Scan { .. }));
    }

    #[tokio::test]
    async fn test_start_emits_scan_then_watch_events() {
        let dir = tempfile::tempdir().unwrap();
        let _alpha = UnixListener::bind(dir.path().join("alpha.sock")).unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = TapDiscovery::new(dir.path()).start(tx).unwrap();

        let first = rx.recv().await.unwrap();
        assert_eq!(first.name, "alpha");
        assert_eq!(first.origin, DiscoveryOrigin::Scan);

        let _beta = UnixListener::bind(dir.path().join("beta.sock")).unwrap();

        let seen = tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                let event = rx.recv().await.expect("watcher channel open");
                if event.name == "beta" {
                    return event;
                }
            }
        })
        .await
        .expect("watcher should report beta.sock");

        assert_ne!(seen.origin, DiscoveryOrigin::Scan);
        assert_eq!(seen.socket_path, dir.path().join("beta.sock"));

        handle.stop();
    }

    #[tokio::test]
    async fn test_watcher_skips_directories() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = TapDiscovery::new(dir.path()).start(tx).unwrap();

        fs::create_dir(dir.path().join("d.sock")).unwrap();
        let _epsilon = UnixListener::bind(dir.path().join("epsilon.sock")).unwrap();

        let before = tokio::time::timeout(Duration::from_secs(10), async {
            let mut before = Vec::new();
            loop {
                let event = rx.recv().await.expect("watcher channel open");
                if event.name == "epsilon" {
                    return before;
                }
                before.push(event.name);
            }
        })
        .await
        .expect("watcher should report epsilon.sock");

        assert!(!before.iter().any(|name| name == "d"), "got {before:?}");

        handle.stop();
    }
}
