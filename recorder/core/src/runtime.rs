//! Runtime Directory Resolution
//!
//! Taps live under the local transport's runtime root:
//!
//! ```text
//! <runtime root>/
//! └── tap/
//!     ├── all/   one socket per node, all message traffic
//!     └── log/   one socket per node, log records only
//! ```
//!
//! Where the root lives depends on the platform and user, so it is supplied
//! through [`RuntimeRootProvider`]. [`PlatformRuntimeRoot`] mirrors the lookup
//! the transport itself performs; [`FixedRuntimeRoot`] pins an explicit path.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::RecordMode;
use crate::error::ConfigError;

/// Directory name the transport uses under per-user runtime dirs
const RUNTIME_DIR_NAME: &str = "robotraconteur";

/// Runtime root used when running as the superuser
const ROOT_RUNTIME_DIR: &str = "/var/run/robotraconteur/root";

/// Supplies the runtime root directory
pub trait RuntimeRootProvider: Send + Sync {
    /// Resolve (and create if needed) the runtime root
    fn runtime_root(&self) -> Result<PathBuf, ConfigError>;
}

/// An explicitly configured runtime root
#[derive(Debug, Clone)]
pub struct FixedRuntimeRoot(pub PathBuf);

impl RuntimeRootProvider for FixedRuntimeRoot {
    fn runtime_root(&self) -> Result<PathBuf, ConfigError> {
        ensure_dir(&self.0)?;
        Ok(self.0.clone())
    }
}

/// The platform's default runtime root
#[derive(Debug, Clone, Copy, Default)]
pub struct PlatformRuntimeRoot;

impl RuntimeRootProvider for PlatformRuntimeRoot {
    #[cfg(windows)]
    fn runtime_root(&self) -> Result<PathBuf, ConfigError> {
        let base = dirs::data_local_dir().ok_or_else(|| {
            ConfigError::RuntimeUnavailable("no local application data directory".into())
        })?;
        let path = base.join("RobotRaconteur").join("run");
        ensure_dir(&path)?;
        Ok(path)
    }

    #[cfg(target_os = "macos")]
    fn runtime_root(&self) -> Result<PathBuf, ConfigError> {
        let path = macos_runtime_root(current_uid(), std::env::var_os("TMPDIR").as_deref())?;
        ensure_private_dir(&path)?;
        Ok(path)
    }

    #[cfg(all(unix, not(target_os = "macos")))]
    fn runtime_root(&self) -> Result<PathBuf, ConfigError> {
        let path = unix_runtime_root(current_uid(), std::env::var_os("XDG_RUNTIME_DIR").as_deref());
        ensure_private_dir(&path)?;
        Ok(path)
    }
}

#[cfg(unix)]
fn current_uid() -> u32 {
    unsafe { libc::getuid() }
}

/// Runtime root on Linux and other non-macOS Unix systems
#[cfg(unix)]
#[must_use]
pub fn unix_runtime_root(uid: u32, xdg_runtime_dir: Option<&std::ffi::OsStr>) -> PathBuf {
    if uid == 0 {
        return PathBuf::from(ROOT_RUNTIME_DIR);
    }
    let base = xdg_runtime_dir
        .filter(|dir| !dir.is_empty())
        .map_or_else(|| PathBuf::from(format!("/var/run/user/{uid}")), PathBuf::from);
    base.join(RUNTIME_DIR_NAME)
}

/// Runtime root on macOS, derived from the per-user `TMPDIR`
///
/// `TMPDIR` is `/var/folders/xx/yyyy/T/`; the cache dir is its sibling `C`.
#[cfg(unix)]
pub fn macos_runtime_root(
    uid: u32,
    tmpdir: Option<&std::ffi::OsStr>,
) -> Result<PathBuf, ConfigError> {
    if uid == 0 {
        return Ok(PathBuf::from(ROOT_RUNTIME_DIR));
    }
    let tmpdir = tmpdir
        .map(Path::new)
        .ok_or_else(|| ConfigError::RuntimeUnavailable("TMPDIR is not set".into()))?;
    // Path::parent ignores a trailing separator
    let cache = tmpdir
        .parent()
        .ok_or_else(|| ConfigError::RuntimeUnavailable(format!("TMPDIR {tmpdir:?} has no parent")))?
        .join("C");
    if !cache.is_dir() {
        return Err(ConfigError::RuntimeUnavailable(format!(
            "user cache dir {cache:?} does not exist"
        )));
    }
    Ok(cache.join(RUNTIME_DIR_NAME))
}

fn ensure_dir(path: &Path) -> Result<(), ConfigError> {
    std::fs::create_dir_all(path).map_err(|source| ConfigError::RuntimeDir {
        path: path.to_path_buf(),
        source,
    })
}

/// Create `path` (and parents) with owner-only permissions; existing is fine
#[cfg(unix)]
fn ensure_private_dir(path: &Path) -> Result<(), ConfigError> {
    use std::os::unix::fs::DirBuilderExt;

    match std::fs::DirBuilder::new()
        .recursive(true)
        .mode(0o700)
        .create(path)
    {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(()),
        Err(source) => Err(ConfigError::RuntimeDir {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// The two tap directories under a runtime root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TapDirectories {
    /// Sockets carrying all message traffic
    pub all: PathBuf,
    /// Sockets carrying log records only
    pub log: PathBuf,
}

impl TapDirectories {
    /// Tap directories under `root`
    #[must_use]
    pub fn under(root: &Path) -> Self {
        let tap = root.join("tap");
        Self {
            all: tap.join("all"),
            log: tap.join("log"),
        }
    }

    /// Resolve the root through `provider` and create both directories
    pub fn resolve(provider: &dyn RuntimeRootProvider) -> Result<Self, ConfigError> {
        let dirs = Self::under(&provider.runtime_root()?);
        dirs.ensure()?;
        Ok(dirs)
    }

    /// Create both directories if missing
    pub fn ensure(&self) -> Result<(), ConfigError> {
        for dir in [&self.all, &self.log] {
            if !dir.is_dir() {
                ensure_dir(dir)?;
                debug!(path = ?dir, "Created tap directory");
            }
        }
        Ok(())
    }

    /// Directory to watch for `mode`
    #[must_use]
    pub fn for_mode(&self, mode: RecordMode) -> &Path {
        match mode {
            RecordMode::All => &self.all,
            RecordMode::LogOnly => &self.log,
        }
    }
}
