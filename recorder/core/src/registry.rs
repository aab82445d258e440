//! Tap Registry - At Most One Recording Per Tap
//!
//! The registry maps tap names to the recording currently holding them. It is
//! the only state shared between discovery and the recording tasks, and all
//! access goes through two atomic operations:
//!
//! - [`TapRegistry::try_claim`]: insert-if-absent
//! - [`TapRegistry::release`]: remove, idempotent
//!
//! # Claims
//!
//! [`TapRegistry::claim`] wraps `try_claim` in a [`TapClaim`] guard that
//! releases on drop, including when the owning task panics or is aborted.
//! Each claim carries a [`RecordingId`]; a guard only removes the entry if it
//! still owns it, so a late drop can never release a newer recording of the
//! same tap.
//!
//! # Thread Safety
//!
//! Backed by a `DashMap`; the entry API makes claim-if-absent atomic per key
//! without exposing lock semantics to callers.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

/// Unique identifier for one recording attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordingId(u64);

impl RecordingId {
    /// Allocate a new unique recording ID
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::SeqCst))
    }

}

impl Default for RecordingId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RecordingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rec-{}", self.0)
    }
}

/// Set of tap names that currently have an active recording
#[derive(Clone, Default)]
pub struct TapRegistry {
    inner: Arc<DashMap<String, RecordingId>>,
}

impl TapRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `name` active if it is not already.
    ///
    /// Returns `false` without side effects when another recording holds it.
    pub fn try_claim(&self, name: &str) -> bool {
        self.claim_entry(name).is_some()
    }

    /// Claim `name` and return a guard that releases it on drop
    #[must_use]
    pub fn claim(&self, name: &str) -> Option<TapClaim> {
        self.claim_entry(name).map(|id| TapClaim {
            registry: self.clone(),
            name: name.to_string(),
            id,
        })
    }

    fn claim_entry(&self, name: &str) -> Option<RecordingId> {
        match self.inner.entry(name.to_string()) {
            Entry::Occupied(_) => {
                tracing::debug!(tap = %name, "Tap already recording, claim rejected");
                None
            }
            Entry::Vacant(vacant) => {
                let id = RecordingId::new();
                vacant.insert(id);
                tracing::debug!(tap = %name, recording = %id, "Tap claimed");
                Some(id)
            }
        }
    }

    /// Mark `name` inactive. Releasing an unclaimed name is a no-op.
    ///
    /// Returns whether a claim was removed.
    pub fn release(&self, name: &str) -> bool {
        let removed = self.inner.remove(name).is_some();
        if removed {
            tracing::debug!(tap = %name, "Tap released");
        }
        removed
    }

    fn release_owned(&self, name: &str, id: RecordingId) -> bool {
        let removed = self.inner.remove_if(name, |_, owner| *owner == id).is_some();
        if removed {
            tracing::debug!(tap = %name, recording = %id, "Tap released");
        }
        removed
    }

    /// Check whether `name` is currently being recorded
    #[must_use]
    pub fn is_active(&self, name: &str) -> bool {
        self.inner.contains_key(name)
    }

    /// Number of active recordings
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Whether no recording is active
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Names of all active taps, sorted
    #[must_use]
    pub fn active_taps(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.iter().map(|r| r.key().clone()).collect();
        names.sort();
        names
    }

}

impl fmt::Debug for TapRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TapRegistry")
            .field("active", &self.active_taps())
            .finish()
    }
}

/// A held claim on a tap name, released on drop
#[derive(Debug)]
pub struct TapClaim {
    registry: TapRegistry,
    name: String,
    id: RecordingId,
}

impl TapClaim {
    /// Tap name this claim holds
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Recording this claim belongs to
    #[must_use]
    pub fn id(&self) -> RecordingId {
        self.id
    }
}

impl Drop for TapClaim {
    fn drop(&mut self) {
        self.registry.release_owned(&self.name, self.id);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    #[test]
    fn test_recording_id_display() {
        let id = RecordingId::new();
        assert!(id.to_string().starts_with("rec-"));
        assert_ne!(RecordingId::new(), RecordingId::new());
    }

    #[test]
    fn test_try_claim_is_exclusive() {
        let registry = TapRegistry::new();

        assert!(registry.try_claim("alpha"));
        assert!(!registry.try_claim("alpha"));
        assert!(registry.try_claim("beta"));

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.active_taps(), vec!["alpha", "beta"]);
    }

    #[test]
    fn test_release_allows_reclaim() {
        let registry = TapRegistry::new();

        assert!(registry.try_claim("alpha"));
        assert!(registry.release("alpha"));
        assert!(!registry.is_active("alpha"));
        assert!(registry.try_claim("alpha"));
    }

    #[test]
    fn test_release_unclaimed_is_noop() {
        let registry = TapRegistry::new();

        assert!(!registry.release("ghost"));
        assert!(!registry.release("ghost"));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_claim_guard_releases_on_drop() {
        let registry = TapRegistry::new();

        {
            let claim = registry.claim("alpha").expect("first claim");
            assert_eq!(claim.name(), "alpha");
            assert!(registry.is_active("alpha"));
            assert!(registry.claim("alpha").is_none());
        }

        assert!(!registry.is_active("alpha"));
    }

    #[test]
    fn test_stale_guard_does_not_release_newer_claim() {
        let registry = TapRegistry::new();

        let stale = registry.claim("alpha").unwrap();
        // Someone force-releases and a new recording takes over
        registry.release("alpha");
        let current = registry.claim("alpha").unwrap();
        assert_ne!(stale.id(), current.id());

        drop(stale);
        assert!(registry.is_active("alpha"));

        drop(current);
        assert!(!registry.is_active("alpha"));
    }

    #[test]
    fn test_concurrent_claims_have_one_winner() {
        let registry = TapRegistry::new();
        let winners = AtomicUsize::new(0);

        std::thread::scope(|s| {
            for _ in 0..32 {
                s.spawn(|| {
                    if registry.try_claim("alpha") {
                        winners.fetch_add(1, Ordering::SeqCst);
                    }
                });
            }
        });

        assert_eq!(winners.load(Ordering::SeqCst), 1);
        assert_eq!(registry.len(), 1);
    }
}
