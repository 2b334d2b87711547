//! Cross-process advisory lock for the synced workspace.
//!
//! The in-process [`OperationLock`](crate::op_lock::OperationLock) only
//! serializes callers inside one process; separate CLI invocations racing on
//! the same workspace are fenced by a lock file holding the owner identifier
//! and acquisition timestamp. A claim older than the staleness TTL counts as
//! abandoned (the owning process crashed) and is broken rather than waited
//! on forever.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use cairn_core::{Error, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use uuid::Uuid;

/// Contents of the lock file.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct LockClaim {
    owner: String,
    pid: u32,
    acquired_at: i64,
}

/// File-based advisory lock with TTL staleness detection.
pub struct AdvisoryLock {
    path: PathBuf,
    owner: String,
    ttl: Duration,
    poll_interval: Duration,
    wait_limit: Duration,
    held: bool,
}

impl AdvisoryLock {
    /// Creates an unheld lock handle for the file at `path`.
    #[must_use]
    pub fn new(path: PathBuf, ttl: Duration, poll_interval: Duration, wait_limit: Duration) -> Self {
        Self {
            path,
            owner: Uuid::new_v4().to_string(),
            ttl,
            poll_interval,
            wait_limit,
            held: false,
        }
    }

    /// Acquires the lock, polling until it is free or the wait limit runs
    /// out. Stale claims are broken with a warning.
    ///
    /// # Errors
    /// Returns [`Error::LockTimeout`] when a live claim outlasts the wait
    /// limit, or an I/O error from the lock file itself.
    pub async fn acquire(&mut self) -> Result<()> {
        let started = Instant::now();

        loop {
            match self.try_claim() {
                Ok(true) => {
                    self.held = true;
                    return Ok(());
                }
                Ok(false) => {}
                Err(error) => return Err(error),
            }

            if self.break_if_stale()? {
                continue;
            }

            if started.elapsed() >= self.wait_limit {
                return Err(Error::LockTimeout {
                    key: self.path.display().to_string(),
                    waited_ms: started.elapsed().as_millis() as u64,
                });
            }

            sleep(self.poll_interval).await;
        }
    }

    /// Releases the lock if this handle still owns it.
    ///
    /// Best effort: a claim stolen after TTL expiry belongs to someone else
    /// and is left in place.
    pub fn release(&mut self) {
        if !self.held {
            return;
        }
        self.held = false;

        match self.read_claim() {
            Some(claim) if claim.owner == self.owner => {
                if let Err(error) = fs::remove_file(&self.path) {
                    tracing::warn!(
                        "Failed to remove workspace lock {}: {error}",
                        self.path.display()
                    );
                }
            }
            Some(claim) => {
                tracing::warn!(
                    "Workspace lock {} was taken over by pid {}; leaving it",
                    self.path.display(),
                    claim.pid
                );
            }
            None => {}
        }
    }

    /// Creates the lock file with our claim. Returns `false` when another
    /// process already holds it.
    fn try_claim(&self) -> Result<bool> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let claim = LockClaim {
            owner: self.owner.clone(),
            pid: std::process::id(),
            acquired_at: Utc::now().timestamp(),
        };

        match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
        {
            Ok(file) => {
                serde_json::to_writer(&file, &claim)?;
                file.sync_all()?;
                Ok(true)
            }
            Err(error) if error.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(error) => Err(error.into()),
        }
    }

    /// Removes the lock file if its claim is older than the TTL. Returns
    /// `true` when a stale claim was broken.
    fn break_if_stale(&self) -> Result<bool> {
        let Some(age_secs) = self.claim_age_secs() else {
            return Ok(false);
        };

        if age_secs < self.ttl.as_secs() as i64 {
            return Ok(false);
        }

        let holder = self
            .read_claim()
            .map_or_else(|| "unknown".to_owned(), |claim| claim.pid.to_string());
        tracing::warn!(
            "Breaking stale workspace lock {} held by pid {holder} ({age_secs}s old)",
            self.path.display()
        );

        match fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            // Someone else broke it first.
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(true),
            Err(error) => Err(error.into()),
        }
    }

    /// Age of the current claim in seconds, falling back to the lock file's
    /// mtime when the claim is unreadable (a writer killed mid-claim).
    fn claim_age_secs(&self) -> Option<i64> {
        let now = Utc::now().timestamp();

        if let Some(claim) = self.read_claim() {
            return Some(now - claim.acquired_at);
        }

        let modified = fs::metadata(&self.path).ok()?.modified().ok()?;
        let modified_secs = modified
            .duration_since(std::time::UNIX_EPOCH)
            .ok()?
            .as_secs() as i64;
        Some(now - modified_secs)
    }

    fn read_claim(&self) -> Option<LockClaim> {
        let contents = fs::read_to_string(&self.path).ok()?;
        serde_json::from_str(&contents).ok()
    }

    /// Path of the lock file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for AdvisoryLock {
    fn drop(&mut self) {
        self.release();
    }
}
