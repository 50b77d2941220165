//! Signals shared between request handlers and the scheduler loop.
//!
//! Both primitives keep their authoritative state in memory and mirror it to a
//! marker file, the contract the legacy viewer tooling still watches.

use crate::store;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::SystemTime;
use tracing::{debug, error, warn};

/// Edge-triggered wake-up for the scheduler, modelled as a revision counter.
///
/// Many triggers between two scheduler ticks collapse into one restart.
pub struct WakeSignal {
    revision: AtomicU64,
    flag: PathBuf,
    boundary_seen: Mutex<Option<SystemTime>>,
}

impl WakeSignal {
    pub fn new(flag: PathBuf) -> Self {
        let boundary_seen = Mutex::new(store::mtime(&flag));
        Self {
            revision: AtomicU64::new(0),
            flag,
            boundary_seen,
        }
    }

    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::SeqCst)
    }

    pub fn trigger(&self) {
        let revision = self.revision.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(revision, "wake signal triggered");
        let mut seen = self.boundary_seen.lock();
        match store::touch(&self.flag) {
            Ok(()) => *seen = store::mtime(&self.flag),
            Err(err) => warn!(error = %err, "failed to touch wake flag"),
        }
    }

    /// Pick up touches of the flag file made by other processes. Returns
    /// whether the revision advanced.
    pub fn poll_boundary(&self) -> bool {
        let current = store::mtime(&self.flag);
        let mut seen = self.boundary_seen.lock();
        if current > *seen {
            *seen = current;
            let revision = self.revision.fetch_add(1, Ordering::SeqCst) + 1;
            debug!(revision, "wake flag touched externally");
            true
        } else {
            false
        }
    }

    pub fn flag_path(&self) -> &Path {
        &self.flag
    }
}

/// Marks deletes in progress so the scheduler holds off advancing.
///
/// Counts holders: the marker goes away only when the last overlapping
/// delete finishes.
pub struct DeletionLock {
    marker: PathBuf,
    holders: AtomicUsize,
}

/// Releases the [`DeletionLock`] when dropped, on every exit path.
#[must_use = "the deletion lock is released as soon as the guard is dropped"]
pub struct DeletionGuard<'a> {
    lock: &'a DeletionLock,
}

impl DeletionLock {
    pub fn new(marker: PathBuf) -> Self {
        Self {
            marker,
            holders: AtomicUsize::new(0),
        }
    }

    pub fn acquire(&self) -> DeletionGuard<'_> {
        let holders = self.holders.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(holders, "deletion lock acquired");
        if let Err(err) = store::touch(&self.marker) {
            error!(error = %err, "failed to create deletion lock marker");
        }
        DeletionGuard { lock: self }
    }

    /// Held in this process, or marked by another one.
    pub fn is_held(&self) -> bool {
        self.holders.load(Ordering::SeqCst) > 0 || self.marker.exists()
    }

    /// Remove a marker left behind by a previous process. Returns whether one
    /// was found.
    pub fn clear_stale(&self) -> bool {
        if self.holders.load(Ordering::SeqCst) > 0 {
            return false;
        }
        match store::remove_if_exists(&self.marker) {
            Ok(removed) => {
                if removed {
                    warn!(marker = %self.marker.display(), "removed stale deletion lock");
                }
                removed
            }
            Err(err) => {
                error!(error = %err, "failed to remove stale deletion lock");
                false
            }
        }
    }
}

impl Drop for DeletionGuard<'_> {
    fn drop(&mut self) {
        let remaining = self.lock.holders.fetch_sub(1, Ordering::SeqCst) - 1;
        if remaining > 0 {
            debug!(remaining, "deletion lock still held by another delete");
            return;
        }
        if let Err(err) = store::remove_if_exists(&self.lock.marker) {
            error!(error = %err, "failed to remove deletion lock marker");
        }
        debug!("deletion lock released");
    }
}
