//! Core types for the cairn task store.
//!
//! This crate provides task identity, status, relationship, error, and
//! configuration types shared by the storage and backend layers.

/// Configuration types and file loading.
pub mod config;
/// Error types and result definitions.
pub mod error;
/// Relationship kinds and edges between tasks.
pub mod relationship;
/// Task identity and lifecycle types.
pub mod task;

pub use config::CairnConfig;
pub use error::{Error, Result};
pub use relationship::{Relationship, RelationshipKind};
pub use task::{Task, TaskDraft, TaskId, TaskStatus};
