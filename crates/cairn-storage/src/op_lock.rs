//! Keyed in-process operation lock.
//!
//! Serializes mutating operations per resource key (typically a file or
//! workspace path). Waiters on the same key run strictly one at a time in
//! arrival order; disjoint keys never contend. The lock is only ever taken
//! at the outermost operation entry point: the read/write primitives in
//! [`crate::file_store`] are plain functions that cannot re-enter it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use cairn_core::{Error, Result};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::task::spawn;
use tokio::time::timeout;

type Entries = HashMap<String, Arc<Mutex<()>>>;

/// Per-resource-key async mutex with FIFO ordering and bounded waits.
///
/// One entry exists per contended key; the last releaser removes it, so the
/// table only holds keys with live contenders.
#[derive(Debug)]
pub struct OperationLock {
    entries: Mutex<Entries>,
    wait_limit: Duration,
}

impl OperationLock {
    /// Creates a lock table whose acquisitions wait at most `wait_limit`.
    #[must_use]
    pub fn new(wait_limit: Duration) -> Arc<Self> {
        Arc::new(Self {
            entries: Mutex::new(HashMap::new()),
            wait_limit,
        })
    }

    /// Runs `operation` while holding the lock for `key`.
    ///
    /// The operation's own error is surfaced unchanged after the lock is
    /// released; lock bookkeeping never masks it.
    ///
    /// # Errors
    /// Returns [`Error::LockTimeout`] if the key could not be acquired
    /// within the bounded wait, or the operation's error.
    pub async fn with_lock<T, F, Fut>(self: &Arc<Self>, key: &str, operation: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let _guard = self.acquire(key).await?;
        operation().await
    }

    /// Acquires the lock for `key`, returning a guard that releases on drop.
    ///
    /// Used where the critical section spans a scope rather than a single
    /// closure (the workspace sync path). Prefer [`with_lock`](Self::with_lock)
    /// elsewhere.
    ///
    /// # Errors
    /// Returns [`Error::LockTimeout`] if the key could not be acquired
    /// within the bounded wait.
    pub async fn acquire(self: &Arc<Self>, key: &str) -> Result<OperationGuard> {
        let entry = {
            let mut entries = self.entries.lock().await;
            Arc::clone(entries.entry(key.to_owned()).or_default())
        };

        let started = Instant::now();
        match timeout(self.wait_limit, Arc::clone(&entry).lock_owned()).await {
            Ok(permit) => Ok(OperationGuard {
                manager: Arc::clone(self),
                key: key.to_owned(),
                entry,
                permit: Some(permit),
            }),
            Err(_) => {
                // The timed-out waiter left the queue when its future
                // dropped; release our handle so the entry can be reaped.
                self.release_entry(key, &entry).await;
                Err(Error::LockTimeout {
                    key: key.to_owned(),
                    waited_ms: started.elapsed().as_millis() as u64,
                })
            }
        }
    }

    /// Number of keys currently tracked in the lock table.
    pub async fn entry_count(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// Removes the entry for `key` iff `handle` is still the registered
    /// entry and no other contender holds a clone of it.
    async fn release_entry(&self, key: &str, handle: &Arc<Mutex<()>>) {
        let mut entries = self.entries.lock().await;
        if let Some(current) = entries.get(key)
            && Arc::ptr_eq(current, handle)
            && Arc::strong_count(handle) == 2
        {
            entries.remove(key);
        }
    }
}

/// RAII guard for an acquired operation lock - released on drop
pub struct OperationGuard {
    manager: Arc<OperationLock>,
    key: String,
    entry: Arc<Mutex<()>>,
    permit: Option<OwnedMutexGuard<()>>,
}

impl Drop for OperationGuard {
    fn drop(&mut self) {
        drop(self.permit.take());

        let manager = Arc::clone(&self.manager);
        let key = std::mem::take(&mut self.key);
        let entry = Arc::clone(&self.entry);

        spawn(async move {
            manager.release_entry(&key, &entry).await;
        });
    }
}
