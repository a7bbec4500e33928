//! Per-target write lock
//!
//! Imports and sync runs both write into a target's streams. They share one
//! [`TargetLocks`] so that at most one of them works on a given target at a
//! time; other targets are unaffected.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::futures::Notified;
use tokio::sync::Notify;
use tracing::debug;

#[derive(Debug, Default)]
pub struct TargetLocks {
    active: Mutex<HashSet<String>>,
    released: Notify,
}

/// Claim on one target, released on drop
#[derive(Debug)]
pub struct TargetGuard {
    locks: Arc<TargetLocks>,
    target_id: String,
}

impl TargetLocks {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Claim `target_id` if nothing else holds it
    pub fn try_acquire(self: &Arc<Self>, target_id: &str) -> Option<TargetGuard> {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if !active.insert(target_id.to_string()) {
            return None;
        }

        Some(TargetGuard {
            locks: self.clone(),
            target_id: target_id.to_string(),
        })
    }

    /// Wait until `target_id` is free, then claim it
    pub async fn acquire(self: &Arc<Self>, target_id: &str) -> TargetGuard {
        loop {
            let released = self.released();
            tokio::pin!(released);
            released.as_mut().enable();

            if let Some(guard) = self.try_acquire(target_id) {
                return guard;
            }

            debug!(target_id, "Target is busy, waiting for it to be released");
            released.await;
        }
    }

    /// Resolves on the next release of any target. Enable it before checking
    /// for a free target so a release in between is not missed.
    pub fn released(&self) -> Notified<'_> {
        self.released.notified()
    }
}

impl Drop for TargetGuard {
    fn drop(&mut self) {
        self.locks
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.target_id);
        self.locks.released.notify_waiters();
    }
}
