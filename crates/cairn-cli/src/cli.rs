//! Command-line argument definitions

use std::path::PathBuf;

use cairn_core::{RelationshipKind, TaskId, TaskStatus};
use clap::{Parser, Subcommand, ValueEnum};

/// Task storage synchronized through a git remote
#[derive(Debug, Parser)]
#[command(name = "cairn", version)]
pub struct Cli {
    /// Override the git remote URL for the synced workspace
    #[arg(long, global = true, value_name = "URL")]
    pub remote: Option<String>,

    /// Override the directory holding the managed checkout
    #[arg(long, global = true, value_name = "PATH")]
    pub state_dir: Option<PathBuf>,

    /// Operate on this directory instead of the routed backend root
    #[arg(long, global = true, value_name = "PATH")]
    pub root: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Create, inspect, and update tasks
    #[command(subcommand)]
    Task(TaskCommands),

    /// Manage relationships between tasks
    #[command(subcommand)]
    Rel(RelCommands),

    /// Print the parent hierarchy rooted at a task
    Tree {
        /// Task identifier in `backend#number` form
        id: TaskId,
    },

    /// Inspect and repair the synced workspace
    #[command(subcommand)]
    Workspace(WorkspaceCommands),
}

#[derive(Debug, Subcommand)]
pub enum TaskCommands {
    /// Create a new task
    Create {
        /// One-line task title
        title: String,
        /// Backend to create the task on (defaults to the configured backend)
        #[arg(long)]
        backend: Option<String>,
        /// Path or URL of the document this task tracks
        #[arg(long)]
        spec_ref: Option<String>,
    },
    /// List all tasks on a backend
    List {
        /// Backend to list (defaults to the configured backend)
        #[arg(long)]
        backend: Option<String>,
    },
    /// Show a single task
    Get {
        /// Task identifier in `backend#number` form
        id: TaskId,
    },
    /// Set the status of a task
    Status {
        /// Task identifier in `backend#number` form
        id: TaskId,
        /// New status
        status: StatusArg,
    },
    /// Delete a task
    Delete {
        /// Task identifier in `backend#number` form
        id: TaskId,
    },
}

#[derive(Debug, Subcommand)]
pub enum RelCommands {
    /// Add a relationship edge between two tasks
    Add {
        /// Source task identifier
        from: TaskId,
        /// Relationship kind
        kind: KindArg,
        /// Target task identifier
        to: TaskId,
    },
    /// List every relationship touching the given tasks
    List {
        /// Task identifiers to query
        #[arg(required = true, num_args = 1..)]
        ids: Vec<TaskId>,
    },
}

#[derive(Debug, Subcommand)]
pub enum WorkspaceCommands {
    /// Show workspace health and sync state
    Status,
    /// Discard the managed checkout and re-clone it from the remote
    Repair,
}

/// Task status accepted on the command line
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum StatusArg {
    Todo,
    InProgress,
    Done,
    Closed,
}

impl From<StatusArg> for TaskStatus {
    fn from(value: StatusArg) -> Self {
        match value {
            StatusArg::Todo => Self::Todo,
            StatusArg::InProgress => Self::InProgress,
            StatusArg::Done => Self::Done,
            StatusArg::Closed => Self::Closed,
        }
    }
}

/// Relationship kind accepted on the command line
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum KindArg {
    Parent,
    Blocks,
    DependsOn,
    RelatesTo,
    Duplicates,
    Supersedes,
}

impl From<KindArg> for RelationshipKind {
    fn from(value: KindArg) -> Self {
        match value {
            KindArg::Parent => Self::Parent,
            KindArg::Blocks => Self::Blocks,
            KindArg::DependsOn => Self::DependsOn,
            KindArg::RelatesTo => Self::RelatesTo,
            KindArg::Duplicates => Self::Duplicates,
            KindArg::Supersedes => Self::Supersedes,
        }
    }
}
