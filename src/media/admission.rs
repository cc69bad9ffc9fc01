//! Per-requester admission for media jobs.
//!
//! A requester holds at most one slot. The check and the insert happen under
//! one synchronous lock with no `.await` in between, so two handlers
//! interleaving on the runtime can never both get in. Release is tied to the
//! permit's `Drop`, which runs on every exit path, panics included.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, info};

/// Set of requesters with an in-flight job
#[derive(Debug, Clone, Default)]
pub struct AdmissionGuard {
    active: Arc<Mutex<HashSet<i64>>>,
}

impl AdmissionGuard {
    /// Create an empty guard
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the slot for `requester`.
    ///
    /// Returns `None` when the requester already holds one; the caller must
    /// reject the request rather than wait.
    #[must_use]
    pub fn try_acquire(&self, requester: i64) -> Option<AdmissionPermit> {
        let inserted = self
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(requester);
        if !inserted {
            info!(requester, "Rejected overlapping media job");
            return None;
        }
        debug!(requester, "Admission slot acquired");
        Some(AdmissionPermit {
            active: Arc::clone(&self.active),
            requester,
        })
    }

    /// Whether `requester` currently holds a slot
    #[must_use]
    pub fn is_active(&self, requester: i64) -> bool {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&requester)
    }

    /// Number of requesters with a job in flight
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.active.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

/// Proof of admission; the slot is released when this is dropped
#[derive(Debug)]
pub struct AdmissionPermit {
    active: Arc<Mutex<HashSet<i64>>>,
    requester: i64,
}

impl AdmissionPermit {
    /// Requester this permit belongs to
    #[must_use]
    pub const fn requester(&self) -> i64 {
        self.requester
    }

    /// Release the slot now instead of at end of scope
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.requester);
        debug!(requester = self.requester, "Admission slot released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_acquire_is_rejected() {
        let guard = AdmissionGuard::new();
        let permit = guard.try_acquire(7);
        assert!(permit.is_some());
        assert!(guard.try_acquire(7).is_none());
        assert!(guard.try_acquire(8).is_some());
        assert!(guard.is_active(7));
    }

    #[test]
    fn test_drop_releases() {
        let guard = AdmissionGuard::new();
        {
            let _permit = guard.try_acquire(1);
            assert!(guard.is_active(1));
        }
        assert!(!guard.is_active(1));
        assert_eq!(guard.active_count(), 0);

        let permit = guard.try_acquire(1);
        assert!(permit.is_some());
        if let Some(p) = permit {
            p.release();
        }
        assert!(!guard.is_active(1));
    }

    #[tokio::test]
    async fn test_release_on_task_panic() {
        let guard = AdmissionGuard::new();
        let cloned = guard.clone();
        let handle = tokio::spawn(async move {
            let _permit = cloned.try_acquire(42);
            panic!("job blew up");
        });
        assert!(handle.await.is_err());
        assert!(!guard.is_active(42));
    }
}
