//! Relationship edges between tasks.
//!
//! Edges are directed and typed; a set never holds two edges with the same
//! `(from, kind, to)` triple, and parent edges must not form a cycle.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::task::TaskId;

/// Kind of a directed relationship edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RelationshipKind {
    /// `from` is the parent of `to`.
    Parent,
    /// `from` blocks progress on `to`.
    Blocks,
    /// `from` depends on `to`.
    DependsOn,
    /// Loose association between the two tasks.
    RelatesTo,
    /// `from` duplicates `to`.
    Duplicates,
    /// `from` supersedes `to`.
    Supersedes,
}

impl fmt::Display for RelationshipKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Parent => "parent",
            Self::Blocks => "blocks",
            Self::DependsOn => "depends-on",
            Self::RelatesTo => "relates-to",
            Self::Duplicates => "duplicates",
            Self::Supersedes => "supersedes",
        };
        write!(f, "{name}")
    }
}

/// A directed, typed edge between two tasks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relationship {
    /// Source of the edge.
    pub from: TaskId,
    /// Target of the edge.
    pub to: TaskId,
    /// Edge kind.
    pub kind: RelationshipKind,
    /// Free-form key/value annotations.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl Relationship {
    /// Creates an edge with empty metadata.
    #[must_use]
    pub fn new(from: TaskId, to: TaskId, kind: RelationshipKind) -> Self {
        Self {
            from,
            to,
            kind,
            metadata: BTreeMap::new(),
        }
    }

    /// Canonical `(from, kind, to)` key.
    ///
    /// Edge sets are keyed by this string, which both deduplicates repeat
    /// adds and keeps on-disk iteration order stable.
    #[must_use]
    pub fn key(&self) -> String {
        format!("{} {} {}", self.from, self.kind, self.to)
    }

    /// Whether this edge participates in the parent hierarchy.
    #[must_use]
    pub fn is_parent(&self) -> bool {
        matches!(self.kind, RelationshipKind::Parent)
    }

    /// Whether the edge touches the given task on either end.
    #[must_use]
    pub fn touches(&self, id: &TaskId) -> bool {
        self.from == *id || self.to == *id
    }
}
