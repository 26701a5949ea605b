use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Single-flight lock for scan execution.
///
/// At most one [`ScanGuard`] exists per lock at any instant. The guard is an
/// owned token: dropping it releases the lock, so every exit path (success,
/// error, panic unwind) releases without explicit cleanup code. Concurrent
/// triggers observe "already running" through [`try_acquire`] returning
/// `None`, and can await completion via [`wait_idle`].
///
/// [`try_acquire`]: ScanLock::try_acquire
/// [`wait_idle`]: ScanLock::wait_idle
#[derive(Debug, Clone)]
pub struct ScanLock {
    permits: Arc<Semaphore>,
}

/// Owned token representing "a scan is in flight".
#[derive(Debug)]
pub struct ScanGuard {
    _permit: OwnedSemaphorePermit,
}

impl ScanLock {
    pub fn new() -> Self {
        Self {
            permits: Arc::new(Semaphore::new(1)),
        }
    }

    /// Attempts to take the lock without waiting. `None` means a scan is
    /// already in flight.
    pub fn try_acquire(&self) -> Option<ScanGuard> {
        self.permits
            .clone()
            .try_acquire_owned()
            .ok()
            .map(|permit| ScanGuard { _permit: permit })
    }

    /// Whether a scan currently holds the lock.
    pub fn is_locked(&self) -> bool {
        self.permits.available_permits() == 0
    }

    /// Resolves once no scan is in flight. Does not reserve the lock; a
    /// caller racing another trigger must still [`try_acquire`].
    ///
    /// [`try_acquire`]: ScanLock::try_acquire
    pub async fn wait_idle(&self) {
        // The semaphore is never closed, so acquire only fails if it were;
        // the permit is dropped immediately either way.
        let _ = self.permits.acquire().await;
    }
}

impl Default for ScanLock {
    fn default() -> Self {
        Self::new()
    }
}
