use core::result::Result as CoreResult;
use std::io::Error as IoError;
use std::path::PathBuf;

use serde_json::Error as SerdeJsonError;
use thiserror::Error;
use toml::de::Error as TomlError;

use crate::task::TaskId;

/// Result type for task-store operations.
pub type Result<T> = CoreResult<T, Error>;

/// Errors that can occur across the task store.
#[derive(Debug, Error)]
pub enum Error {
    /// An I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON serialization or deserialization failed.
    #[error("JSON serialization error: {0}")]
    Json(#[from] SerdeJsonError),

    /// TOML deserialization failed.
    #[error("TOML deserialization error: {0}")]
    Toml(#[from] TomlError),

    /// A resource lock could not be acquired within the bounded wait.
    #[error("Lock timeout on {key} after {waited_ms}ms")]
    LockTimeout {
        /// Resource key the caller was waiting on.
        key: String,
        /// Total time spent waiting before giving up.
        waited_ms: u64,
    },

    /// The synchronized workspace failed a health check.
    #[error("Workspace corrupted at {path}: {reason}")]
    WorkspaceCorrupted {
        /// Root of the workspace that failed the check.
        path: PathBuf,
        /// What the health check found.
        reason: String,
    },

    /// A git synchronization step failed.
    #[error("Git {op} failed: {detail}")]
    GitSync {
        /// The git operation that failed (clone, fetch, push, ...).
        op: &'static str,
        /// Stderr or timeout detail from the subprocess.
        detail: String,
    },

    /// A persisted state file could not be parsed.
    #[error("Failed to parse {path}: {detail}")]
    Serialization {
        /// Location of the malformed file.
        path: PathBuf,
        /// Parser error text.
        detail: String,
    },

    /// A parent relationship edge would close a cycle.
    #[error("Relationship cycle detected through task {task_id}")]
    CycleDetected {
        /// A task on the offending cycle.
        task_id: TaskId,
    },

    /// The requested task does not exist.
    #[error("Task not found: {0}")]
    NotFound(TaskId),

    /// A task identifier string did not match `<backend>#<number>`.
    #[error("Invalid task identifier: {0}")]
    InvalidTaskId(String),

    /// No backend is registered under the given name.
    #[error("Unknown backend: {0}")]
    UnknownBackend(String),

    /// A general error not covered by other variants.
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Determines whether this error may succeed if retried.
    ///
    /// Returns `true` for transient failures like remote git errors or
    /// lock contention; the failed operation was rolled back and can be
    /// resubmitted as-is.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::GitSync { .. } | Self::LockTimeout { .. })
    }

    /// Short corrective action to show at the command boundary.
    ///
    /// Consumers print this alongside the error message instead of a
    /// stack trace.
    #[must_use]
    pub fn remediation(&self) -> Option<&'static str> {
        match self {
            Self::WorkspaceCorrupted { .. } => {
                Some("run `cairn workspace repair` to rebuild the synced checkout")
            }
            Self::GitSync { .. } => {
                Some("check connectivity to the task remote and retry; no partial state was kept")
            }
            Self::LockTimeout { .. } => {
                Some("another operation holds this resource; retry once it finishes")
            }
            Self::Serialization { .. } => {
                Some("inspect the named file for manual edits, or disable strict parsing")
            }
            _ => None,
        }
    }
}
