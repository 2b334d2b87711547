//! Task backends, routing, and the service facade.
//!
//! This crate decides where a backend's data lives (the managed synced
//! workspace or an external system), persists tasks and relationship edges
//! through the storage layer, and exposes the whole system as a single
//! [`TaskService`] the CLI and other consumers call.

/// Backend trait and workspace capability.
pub mod backend;
/// Relationship store and cycle-checked hierarchy graph.
pub mod graph;
/// In-tree backend persisting tasks as a JSON document.
pub mod json_file;
/// Backend registry keyed by name.
pub mod registry;
/// Workspace-root resolution per backend capability.
pub mod router;
/// Service facade wiring locks, workspace, and backends together.
pub mod service;

pub use backend::{TaskBackend, WorkspaceKind};
pub use graph::{RelationshipGraph, RelationshipStore, TaskTree};
pub use json_file::JsonFileBackend;
pub use registry::BackendRegistry;
pub use router::BackendRouter;
pub use service::{TaskService, TreeNode};

// Workspace state types returned by the service boundary.
pub use cairn_storage::{WorkspaceHealth, WorkspaceStatus};
