//! The contract every task backend implements.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use cairn_core::{Result, Task, TaskDraft, TaskId, TaskStatus};

/// Where a backend's task data lives.
///
/// In-tree backends write files inside the managed synced checkout; external
/// backends talk to a remote system and have no local synchronization need.
/// Every backend declares its kind explicitly instead of being probed for it
/// at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkspaceKind {
    /// Data is files inside the managed git checkout.
    InTree,
    /// Data lives in an external system reached from the caller's directory.
    External,
}

/// Trait for task backends consumed through the service boundary.
///
/// Methods take the resolved root directory rather than storing one, so the
/// same backend instance serves whichever root the router picks per call.
/// All methods return typed errors; none panic across this boundary.
#[async_trait]
pub trait TaskBackend: Send + Sync {
    /// Backend name, also the prefix of the task identifiers it mints.
    fn name(&self) -> &'static str;

    /// Declares whether this backend needs the managed synced workspace.
    fn workspace_kind(&self) -> WorkspaceKind;

    /// Primary file this backend mutates under `root`; mutating calls are
    /// serialized on this path's operation-lock key.
    fn state_file(&self, root: &Path) -> PathBuf;

    /// Lists every task in the store under `root`.
    ///
    /// # Errors
    /// Returns an error if the store cannot be read.
    async fn list_tasks(&self, root: &Path) -> Result<Vec<Task>>;

    /// Fetches one task by identifier.
    ///
    /// # Errors
    /// Returns [`cairn_core::Error::NotFound`] if no such task exists.
    async fn get_task(&self, root: &Path, id: &TaskId) -> Result<Task>;

    /// Creates a task from `draft`, minting the next free identifier.
    ///
    /// # Errors
    /// Returns an error if the store cannot be read or written.
    async fn create_task(&self, root: &Path, draft: TaskDraft) -> Result<Task>;

    /// Sets the status of an existing task, returning the updated task.
    ///
    /// # Errors
    /// Returns [`cairn_core::Error::NotFound`] if no such task exists.
    async fn set_task_status(&self, root: &Path, id: &TaskId, status: TaskStatus) -> Result<Task>;

    /// Removes a task, returning the removed entry.
    ///
    /// # Errors
    /// Returns [`cairn_core::Error::NotFound`] if no such task exists.
    async fn delete_task(&self, root: &Path, id: &TaskId) -> Result<Task>;
}
