//! Per-repository integration lock
//!
//! Only one integration may push to a repository at a time, otherwise
//! two pull requests could race past each other's target check. The
//! lock is a bounded wait: an integration that cannot acquire it
//! within the timeout reports failure instead of queueing forever.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Default bound on waiting for another integration to finish.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(600);

#[derive(Default)]
pub struct IntegrationLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl IntegrationLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock for a repository, waiting at most `timeout`.
    /// Returns `None` when the lock could not be acquired in time.
    pub async fn acquire(&self, repository: &str, timeout: Duration) -> Option<OwnedMutexGuard<()>> {
        let lock = {
            let mut locks = match self.locks.lock() {
                Ok(locks) => locks,
                Err(poisoned) => poisoned.into_inner(),
            };
            Arc::clone(
                locks
                    .entry(repository.to_string())
                    .or_insert_with(|| Arc::new(AsyncMutex::new(()))),
            )
        };
        tokio::time::timeout(timeout, lock.lock_owned()).await.ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lock_is_exclusive_per_repository() {
        let locks = IntegrationLocks::new();
        let held = locks
            .acquire("jdk", Duration::from_millis(10))
            .await
            .unwrap();

        // Same repository times out while held
        assert!(locks.acquire("jdk", Duration::from_millis(10)).await.is_none());

        // Other repositories are unaffected
        assert!(locks
            .acquire("loom", Duration::from_millis(10))
            .await
            .is_some());

        drop(held);
        assert!(locks.acquire("jdk", Duration::from_millis(10)).await.is_some());
    }
}
