//! Task identity and lifecycle types.
//!
//! Identifiers are backend-qualified (`json#12`, `gh#45`) so tasks owned by
//! different backends can share collections without collision.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::Error;

/// Backend-qualified task identifier.
///
/// Rendered and parsed as `<backend>#<number>`; the numeric part is unique
/// within its backend. The derived ordering sorts by backend name, then by
/// number, so map-backed collections iterate deterministically.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId {
    backend: String,
    local: u64,
}

impl TaskId {
    /// Creates an identifier from a backend name and backend-local number.
    #[must_use]
    pub fn new(backend: impl Into<String>, local: u64) -> Self {
        Self {
            backend: backend.into(),
            local,
        }
    }

    /// Backend segment of the identifier.
    #[must_use]
    pub fn backend(&self) -> &str {
        &self.backend
    }

    /// Backend-local numeric segment of the identifier.
    #[must_use]
    pub const fn local(&self) -> u64 {
        self.local
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.backend, self.local)
    }
}

impl FromStr for TaskId {
    type Err = Error;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let (backend, local) = raw
            .split_once('#')
            .ok_or_else(|| Error::InvalidTaskId(raw.to_owned()))?;
        if backend.is_empty() || backend.contains(char::is_whitespace) {
            return Err(Error::InvalidTaskId(raw.to_owned()));
        }
        let local = local
            .parse::<u64>()
            .map_err(|_| Error::InvalidTaskId(raw.to_owned()))?;
        Ok(Self {
            backend: backend.to_owned(),
            local,
        })
    }
}

impl Serialize for TaskId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TaskId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(DeError::custom)
    }
}

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// Not started yet.
    #[default]
    Todo,
    /// Actively being worked.
    InProgress,
    /// Finished successfully.
    Done,
    /// Closed without completion.
    Closed,
}

impl TaskStatus {
    /// Checkbox marker used in task-text renderings of this status.
    #[must_use]
    pub const fn checkbox(self) -> char {
        match self {
            Self::Todo => ' ',
            Self::InProgress => '+',
            Self::Done => 'x',
            Self::Closed => '-',
        }
    }

    /// Human-readable label for this status.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Todo => "todo",
            Self::InProgress => "in progress",
            Self::Done => "done",
            Self::Closed => "closed",
        }
    }

    /// Inverse of [`checkbox`](Self::checkbox).
    #[must_use]
    pub const fn from_checkbox(marker: char) -> Option<Self> {
        match marker {
            ' ' => Some(Self::Todo),
            '+' => Some(Self::InProgress),
            'x' => Some(Self::Done),
            '-' => Some(Self::Closed),
            _ => None,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// A stored task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Backend-qualified identifier.
    pub id: TaskId,
    /// One-line summary.
    pub title: String,
    /// Lifecycle state.
    pub status: TaskStatus,
    /// Path or URL of the document this task tracks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spec_ref: Option<String>,
    /// When the task was created.
    pub created_at: DateTime<Utc>,
    /// When the task last changed.
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Materializes a draft under a freshly assigned identifier.
    #[must_use]
    pub fn from_draft(id: TaskId, draft: TaskDraft) -> Self {
        let now = Utc::now();
        Self {
            id,
            title: draft.title,
            status: draft.status,
            spec_ref: draft.spec_ref,
            created_at: now,
            updated_at: now,
        }
    }

    /// Applies a status change, refreshing the update timestamp.
    pub fn set_status(&mut self, status: TaskStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }
}

/// Input for creating a task; the owning backend assigns the identifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDraft {
    /// One-line summary.
    pub title: String,
    /// Path or URL of the document the new task tracks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spec_ref: Option<String>,
    /// Initial state; defaults to [`TaskStatus::Todo`].
    #[serde(default)]
    pub status: TaskStatus,
}

impl TaskDraft {
    /// Creates a draft with only a title; everything else defaulted.
    #[must_use]
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            spec_ref: None,
            status: TaskStatus::default(),
        }
    }
}
