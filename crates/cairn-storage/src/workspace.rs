//! Persistent git-synchronized workspace for task-file mutation.
//!
//! One shallow, sparse checkout is shared by every in-tree backend no matter
//! which directory the caller runs from, so a session working copy and the
//! main working copy never diverge. Every mutation syncs against the remote
//! first, commits only the task-data subtree, and rolls back to the
//! pre-operation commit when any later step fails.

use std::ffi::OsString;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use cairn_core::{CairnConfig, Error, Result};
use tokio::sync::Mutex;

use crate::advisory::AdvisoryLock;
use crate::git::GitRunner;
use crate::op_lock::OperationLock;

/// Boxed future returned by workspace operation closures.
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// Health of the synced checkout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkspaceHealth {
    /// Checkout exists and its git metadata is readable.
    Healthy,
    /// Checkout directory is absent; the next use will clone it.
    Uninitialized,
    /// Checkout exists but failed a git metadata probe.
    Corrupted,
}

impl WorkspaceHealth {
    /// Short lowercase name for display.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Uninitialized => "uninitialized",
            Self::Corrupted => "corrupted",
        }
    }
}

/// Result of a mutation closure run under [`SyncedWorkspace::with_sync`]:
/// the caller's value plus the commit message for the change.
pub struct SyncOutcome<T> {
    /// Value handed back to the caller after the sync completes.
    pub value: T,
    /// Commit message recorded for the mutation.
    pub message: String,
}

impl<T> SyncOutcome<T> {
    /// Pairs a return value with its commit message.
    pub fn new(value: T, message: impl Into<String>) -> Self {
        Self {
            value,
            message: message.into(),
        }
    }
}

/// Snapshot of workspace state for operator commands.
#[derive(Debug, Clone)]
pub struct WorkspaceStatus {
    /// Workspace root path.
    pub root: PathBuf,
    /// Result of the health probe.
    pub health: WorkspaceHealth,
    /// Current local HEAD, when resolvable.
    pub head: Option<String>,
    /// HEAD recorded at the last successful sync.
    pub last_synced: Option<String>,
    /// Remote branch HEAD, when reachable.
    pub remote_head: Option<String>,
}

/// The persistent git-synchronized checkout all in-tree backends write
/// through.
///
/// Construct once and share; the checkout itself persists across processes
/// and is torn down only by [`repair`](Self::repair).
#[derive(Debug)]
pub struct SyncedWorkspace {
    root: PathBuf,
    data_dir: String,
    remote_url: String,
    branch: String,
    push_retries: u32,
    locks: Arc<OperationLock>,
    git: GitRunner,
    advisory_ttl: Duration,
    advisory_poll: Duration,
    lock_timeout: Duration,
    last_synced: Mutex<Option<String>>,
}

impl SyncedWorkspace {
    /// Builds the workspace described by `config`, sharing `locks` with the
    /// rest of the process.
    ///
    /// # Errors
    /// Returns an error if `git.remote_url` is unset or the state root
    /// cannot be determined.
    pub fn from_config(config: &CairnConfig, locks: Arc<OperationLock>) -> Result<Self> {
        let remote_url = config
            .git
            .remote_url
            .clone()
            .ok_or_else(|| Error::Other("git.remote_url is not configured".to_owned()))?;
        let root = config.state_root()?;
        let git = GitRunner::new(
            root.clone(),
            Duration::from_secs(config.git.command_timeout_secs),
        );

        Ok(Self {
            root,
            data_dir: config.workspace.data_dir.clone(),
            remote_url,
            branch: config.git.branch.clone(),
            push_retries: config.git.push_retries,
            locks,
            git,
            advisory_ttl: Duration::from_secs(config.locking.advisory_ttl_secs),
            advisory_poll: Duration::from_millis(config.locking.advisory_poll_ms),
            lock_timeout: Duration::from_secs(config.locking.operation_timeout_secs),
            last_synced: Mutex::new(None),
        })
    }

    /// Workspace root path.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute path of the task-data subtree inside the checkout.
    #[must_use]
    pub fn data_path(&self) -> PathBuf {
        self.root.join(&self.data_dir)
    }

    /// Runs a mutation against the synced checkout.
    ///
    /// The critical section holds the in-process lock for the workspace key
    /// and the cross-process advisory lock. It then syncs to the remote and
    /// runs `operation` against the data path before committing and pushing
    /// its message. A push rejected by a concurrent writer re-syncs and
    /// re-applies the operation up to the configured retry count; any other
    /// failure after the sync rolls the checkout back to the pre-operation
    /// commit.
    ///
    /// `operation` must be re-invocable: it is called once per push attempt
    /// against a freshly synced tree.
    ///
    /// # Errors
    /// Returns [`Error::LockTimeout`], [`Error::GitSync`],
    /// [`Error::WorkspaceCorrupted`], or the operation's own error.
    pub async fn with_sync<T, F>(&self, operation: F) -> Result<T>
    where
        F: Fn(PathBuf) -> BoxFuture<Result<SyncOutcome<T>>> + Send,
        T: Send,
    {
        let _guard = self.locks.acquire(&self.lock_key()).await?;

        let mut advisory = self.advisory();
        advisory.acquire().await?;

        let result = self.run_synced(&operation).await;

        advisory.release();
        result
    }

    /// Runs a read against the checkout's current on-disk state.
    ///
    /// Reads skip fetching, accepting bounded staleness. The workspace locks
    /// are taken only when the checkout must first be cloned or repaired.
    ///
    /// # Errors
    /// Returns an initialization error or the operation's own error.
    pub async fn with_view<T, F>(&self, operation: F) -> Result<T>
    where
        F: FnOnce(PathBuf) -> BoxFuture<Result<T>> + Send,
        T: Send,
    {
        if self.health_check().await != WorkspaceHealth::Healthy {
            self.initialize_locked().await?;
        }
        operation(self.data_path()).await
    }

    /// Makes sure a usable checkout exists, cloning or repairing as needed.
    ///
    /// Idempotent; the sync and view paths call this under the workspace
    /// locks before touching the checkout. A corrupted checkout is repaired
    /// automatically once, and a failed repair is fatal.
    ///
    /// # Errors
    /// Returns [`Error::GitSync`] if the clone fails, or
    /// [`Error::WorkspaceCorrupted`] if the automatic repair fails.
    pub async fn ensure_initialized(&self) -> Result<()> {
        match self.health_check().await {
            WorkspaceHealth::Healthy => Ok(()),
            WorkspaceHealth::Uninitialized => {
                tracing::info!("Initializing synced workspace at {}", self.root.display());
                self.git
                    .clone_shallow_sparse(&self.remote_url, &self.branch, &self.data_dir)
                    .await
            }
            WorkspaceHealth::Corrupted => {
                tracing::warn!(
                    "Workspace at {} failed its health check; repairing",
                    self.root.display()
                );
                self.force_repair()
                    .await
                    .map_err(|error| Error::WorkspaceCorrupted {
                        path: self.root.clone(),
                        reason: format!("automatic repair failed: {error}"),
                    })
            }
        }
    }

    /// Fetches the tracked branch and hard-resets the checkout to it,
    /// discarding local changes. Write path only.
    ///
    /// # Errors
    /// Returns [`Error::GitSync`] on fetch or reset failure; the working
    /// copy is left as it was on a fetch failure.
    pub async fn ensure_up_to_date(&self) -> Result<()> {
        self.git.fetch(&self.branch).await?;
        self.git.reset_hard("FETCH_HEAD").await?;
        let head = self.git.head_commit().await?;
        *self.last_synced.lock().await = Some(head);
        Ok(())
    }

    /// Stages the task-data subtree, commits with `message`, and pushes.
    ///
    /// A clean index (the mutation produced no byte changes) is a success
    /// without a commit.
    ///
    /// # Errors
    /// Returns [`Error::GitSync`] if staging, the commit, or the push fails.
    pub async fn commit_and_push(&self, message: &str) -> Result<()> {
        self.git.stage(&self.data_dir).await?;
        if !self.git.has_staged_changes().await? {
            tracing::debug!("No changes under {}; skipping commit", self.data_dir);
            return Ok(());
        }
        self.git.commit(message).await?;
        self.git.push(&self.branch).await?;
        let head = self.git.head_commit().await?;
        *self.last_synced.lock().await = Some(head);
        Ok(())
    }

    /// Hard-resets the checkout to `commit`.
    ///
    /// # Errors
    /// Returns [`Error::GitSync`] if the reset fails.
    pub async fn rollback_to(&self, commit: &str) -> Result<()> {
        tracing::warn!("Rolling back workspace to {commit}");
        self.git.reset_hard(commit).await
    }

    /// Destructive recovery: deletes the checkout and clones it again.
    ///
    /// Takes the same locks as a mutation, so an in-flight sync finishes
    /// before the checkout disappears. The automatic variant invoked by a
    /// failed health check runs on paths that already hold the locks.
    ///
    /// # Errors
    /// Returns an error if a lock cannot be acquired, the old checkout
    /// cannot be removed, or the fresh clone fails.
    pub async fn repair(&self) -> Result<()> {
        let _guard = self.locks.acquire(&self.lock_key()).await?;

        let mut advisory = self.advisory();
        advisory.acquire().await?;

        let result = self.force_repair().await;

        advisory.release();
        result
    }

    async fn force_repair(&self) -> Result<()> {
        if self.root.exists() {
            tracing::info!("Discarding checkout at {}", self.root.display());
            tokio::fs::remove_dir_all(&self.root).await?;
        }
        self.git
            .clone_shallow_sparse(&self.remote_url, &self.branch, &self.data_dir)
            .await
    }

    /// First-use initialization for the read path, under the same locks as
    /// a mutation.
    async fn initialize_locked(&self) -> Result<()> {
        let _guard = self.locks.acquire(&self.lock_key()).await?;

        let mut advisory = self.advisory();
        advisory.acquire().await?;

        let result = self.ensure_initialized().await;

        advisory.release();
        result
    }

    /// Probes the checkout without mutating anything.
    pub async fn health_check(&self) -> WorkspaceHealth {
        if !self.root.exists() {
            return WorkspaceHealth::Uninitialized;
        }
        if !self.root.join(".git").exists() {
            return WorkspaceHealth::Corrupted;
        }
        if self.git.verify_checkout().await.is_err() {
            return WorkspaceHealth::Corrupted;
        }
        WorkspaceHealth::Healthy
    }

    /// Collects the operator-facing status snapshot.
    pub async fn status(&self) -> WorkspaceStatus {
        let health = self.health_check().await;
        let (head, remote_head) = if health == WorkspaceHealth::Healthy {
            (
                self.git.head_commit().await.ok(),
                self.git.remote_head(&self.branch).await.ok(),
            )
        } else {
            (None, None)
        };

        WorkspaceStatus {
            root: self.root.clone(),
            health,
            head,
            last_synced: self.last_synced.lock().await.clone(),
            remote_head,
        }
    }

    async fn run_synced<T, F>(&self, operation: &F) -> Result<T>
    where
        F: Fn(PathBuf) -> BoxFuture<Result<SyncOutcome<T>>> + Send,
        T: Send,
    {
        self.ensure_initialized().await?;
        let recorded = self.git.head_commit().await?;

        let mut attempt = 0u32;
        loop {
            if let Err(error) = self.ensure_up_to_date().await {
                if attempt == 0 {
                    // Nothing mutated yet; abort clean.
                    return Err(error);
                }
                return Err(self.abort_with_rollback(&recorded, error).await);
            }

            let outcome = match operation(self.data_path()).await {
                Ok(outcome) => outcome,
                Err(error) => return Err(self.abort_with_rollback(&recorded, error).await),
            };

            match self.commit_and_push(&outcome.message).await {
                Ok(()) => return Ok(outcome.value),
                Err(error) if is_push_race(&error) && attempt < self.push_retries => {
                    attempt += 1;
                    tracing::warn!(
                        "Push rejected by a concurrent writer; resyncing (attempt {attempt} of {})",
                        self.push_retries
                    );
                }
                Err(error) => return Err(self.abort_with_rollback(&recorded, error).await),
            }
        }
    }

    /// Rolls back to `recorded` and hands the original error back.
    async fn abort_with_rollback(&self, recorded: &str, error: Error) -> Error {
        if let Err(rollback_error) = self.rollback_to(recorded).await {
            tracing::warn!("Rollback after a failed operation also failed: {rollback_error}");
        }
        error
    }

    /// In-process lock key for the whole workspace, distinct from any
    /// individual state file's key.
    fn lock_key(&self) -> String {
        self.root.to_string_lossy().into_owned()
    }

    fn advisory(&self) -> AdvisoryLock {
        AdvisoryLock::new(
            self.lock_path(),
            self.advisory_ttl,
            self.advisory_poll,
            self.lock_timeout,
        )
    }

    /// Lock file path: a sibling of the checkout, so [`repair`](Self::repair)
    /// can delete the checkout while the lock is held.
    fn lock_path(&self) -> PathBuf {
        let mut name = self
            .root
            .file_name()
            .map_or_else(|| OsString::from("workspace"), ToOwned::to_owned);
        name.push(".lock");
        self.root.with_file_name(name)
    }
}

/// Whether `error` is a push rejected by a concurrent fast-forward update,
/// the one failure worth re-syncing and re-applying for.
fn is_push_race(error: &Error) -> bool {
    match error {
        Error::GitSync { op: "push", detail } => {
            detail.contains("non-fast-forward")
                || detail.contains("fetch first")
                || detail.contains("[rejected]")
        }
        _ => false,
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, reason = "Test code is allowed to use expect")]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn workspace_at(root: PathBuf) -> SyncedWorkspace {
        let mut config = CairnConfig::default();
        config.git.remote_url = Some("file:///nonexistent/remote.git".to_owned());
        config.workspace.state_dir = Some(root);
        SyncedWorkspace::from_config(&config, OperationLock::new(Duration::from_secs(5)))
            .expect("build workspace")
    }

    #[test]
    fn test_from_config_requires_remote_url() {
        let config = CairnConfig::default();
        let locks = OperationLock::new(Duration::from_secs(5));
        match SyncedWorkspace::from_config(&config, locks) {
            Err(Error::Other(message)) => assert!(message.contains("remote_url")),
            other => panic!("expected missing-remote error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_health_check_on_missing_directory() {
        let dir = TempDir::new().expect("create temp dir");
        let workspace = workspace_at(dir.path().join("absent"));
        assert_eq!(
            workspace.health_check().await,
            WorkspaceHealth::Uninitialized
        );
    }

    #[tokio::test]
    async fn test_health_check_without_git_metadata() {
        let dir = TempDir::new().expect("create temp dir");
        let root = dir.path().join("ws");
        std::fs::create_dir_all(&root).expect("create root");

        let workspace = workspace_at(root);
        assert_eq!(workspace.health_check().await, WorkspaceHealth::Corrupted);
    }

    #[test]
    fn test_lock_path_is_sibling_of_root() {
        let dir = TempDir::new().expect("create temp dir");
        let root = dir.path().join("workspace");
        let workspace = workspace_at(root.clone());

        let lock = workspace.lock_path();
        assert_eq!(lock.parent(), root.parent());
        assert_eq!(
            lock.file_name().and_then(|name| name.to_str()),
            Some("workspace.lock")
        );
    }

    #[test]
    fn test_push_race_classification() {
        let race = Error::GitSync {
            op: "push",
            detail: "! [rejected] main -> main (non-fast-forward)".to_owned(),
        };
        assert!(is_push_race(&race));

        let auth = Error::GitSync {
            op: "push",
            detail: "fatal: Authentication failed".to_owned(),
        };
        assert!(!is_push_race(&auth));

        let fetch = Error::GitSync {
            op: "fetch",
            detail: "non-fast-forward".to_owned(),
        };
        assert!(!is_push_race(&fetch));
    }
}
