//! Storage primitives for the cairn task store.
//!
//! This crate provides the keyed operation lock, crash-safe state-file
//! persistence, the cross-process advisory lock, the git subprocess runner,
//! and the synchronized workspace that composes them.

/// Cross-process advisory lock with staleness detection.
pub mod advisory;
/// Crash-safe read and write of task state files.
pub mod file_store;
/// Git subprocess execution with timeouts.
pub mod git;
/// Keyed in-process operation lock with FIFO ordering.
pub mod op_lock;
/// Persistent git-synchronized workspace.
pub mod workspace;

pub use advisory::AdvisoryLock;
pub use file_store::{
    RelationshipSet, TaskCollection, read_relationships, read_tasks, write_relationships,
    write_tasks,
};
pub use git::GitRunner;
pub use op_lock::{OperationGuard, OperationLock};
pub use workspace::{
    BoxFuture, SyncOutcome, SyncedWorkspace, WorkspaceHealth, WorkspaceStatus,
};
