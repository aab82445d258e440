//! Tap Naming
//!
//! A tap is a Unix domain socket named `<tap_name>.sock`. Each recording of a
//! tap is written to `<tap_name>-<UTC timestamp>.<ext>`, timestamp formatted as
//! `YYYY-MM-DDThh-mm-ss`.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::debug;

/// File extension that marks a tap socket
pub const TAP_SOCKET_EXTENSION: &str = "sock";

/// Default extension for recordings
pub const DEFAULT_LOG_EXTENSION: &str = "robtap";

/// Timestamp format used in recording file names
pub const LOG_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H-%M-%S";

/// Upper bound on `-N` suffixes tried when disambiguating a recording name
const MAX_DISAMBIGUATION: u32 = 1000;

/// One recording attempt for a tap
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tap {
    /// Tap name (socket file name without extension)
    pub name: String,
    /// Path of the tap socket
    pub socket_path: PathBuf,
    /// Path of the recording file
    pub log_path: PathBuf,
}

/// Source of recording timestamps
pub trait Clock: Send + Sync {
    /// Current UTC time
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock [`Clock`]
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Derive the tap name from a socket path (`/run/tap/all/alpha.sock` -> `alpha`)
///
/// Returns `None` if the path does not end in `.sock`, has an empty stem, or
/// the stem is not valid UTF-8.
#[must_use]
pub fn tap_name_from_path(path: &Path) -> Option<String> {
    if path.extension()? != TAP_SOCKET_EXTENSION {
        return None;
    }
    let Some(stem) = path.file_stem()?.to_str() else {
        debug!(path = ?path, "Ignoring tap socket with non-UTF-8 name");
        return None;
    };
    if stem.is_empty() {
        return None;
    }
    Some(stem.to_string())
}

/// Build the recording file name for `name` at `timestamp`
#[must_use]
pub fn log_file_name(name: &str, timestamp: DateTime<Utc>, extension: &str) -> String {
    format!(
        "{name}-{}.{extension}",
        timestamp.format(LOG_TIMESTAMP_FORMAT)
    )
}

/// Choose the recording path for `name` inside `output_dir`.
///
/// With `disambiguate` set, an existing file with the same second-resolution
/// name gets a `-1`, `-2`, ... suffix instead. The caller still opens the file
/// in create-new mode, so a lost race remains an error.
#[must_use]
pub fn allocate_log_path(
    output_dir: &Path,
    name: &str,
    timestamp: DateTime<Utc>,
    extension: &str,
    disambiguate: bool,
) -> PathBuf {
    let base = output_dir.join(log_file_name(name, timestamp, extension));
    if !disambiguate || !base.exists() {
        return base;
    }

    let stamp = timestamp.format(LOG_TIMESTAMP_FORMAT);
    (1..=MAX_DISAMBIGUATION)
        .map(|n| output_dir.join(format!("{name}-{stamp}-{n}.{extension}")))
        .find(|candidate| !candidate.exists())
        .unwrap_or(base)
}
