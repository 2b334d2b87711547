//! Command handlers for CLI operations

use cairn_backends::{TaskService, TreeNode};
use cairn_core::{CairnConfig, Relationship, Result, Task, TaskDraft, TaskId};

use crate::cli::{Cli, Commands, RelCommands, TaskCommands, WorkspaceCommands};

/// Builds the task service from config plus CLI overrides and runs the
/// requested command.
///
/// # Errors
/// Returns an error when the service cannot be constructed or the command
/// itself fails.
pub async fn dispatch(cli: Cli) -> Result<()> {
    // Load or create configuration from ~/.cairn/config.toml
    let mut config = CairnConfig::load_or_create().unwrap_or_else(|error| {
        tracing::warn!("Failed to load config: {error}");
        tracing::warn!("Using default configuration");
        CairnConfig::default()
    });

    if let Some(remote) = cli.remote {
        config.git.remote_url = Some(remote);
    }
    if let Some(state_dir) = cli.state_dir {
        config.workspace.state_dir = Some(state_dir);
    }

    let mut service = TaskService::new(config)?;
    if let Some(root) = cli.root {
        service = service.with_root_override(root);
    }

    match cli.command {
        Commands::Task(command) => handle_task(&service, command).await,
        Commands::Rel(command) => handle_rel(&service, command).await,
        Commands::Tree { id } => handle_tree(&service, &id).await,
        Commands::Workspace(command) => handle_workspace(&service, command).await,
    }
}

async fn handle_task(service: &TaskService, command: TaskCommands) -> Result<()> {
    match command {
        TaskCommands::Create {
            title,
            backend,
            spec_ref,
        } => {
            let mut draft = TaskDraft::new(title);
            draft.spec_ref = spec_ref;
            let task = service.create_task(backend.as_deref(), draft).await?;
            print_task_line(&task);
        }
        TaskCommands::List { backend } => {
            let tasks = service.list_tasks(backend.as_deref()).await?;
            if tasks.is_empty() {
                print_line("no tasks");
            }
            for task in &tasks {
                print_task_line(task);
            }
        }
        TaskCommands::Get { id } => {
            let task = service.get_task(&id).await?;
            print_task_detail(&task);
        }
        TaskCommands::Status { id, status } => {
            let task = service.set_task_status(&id, status.into()).await?;
            print_task_line(&task);
        }
        TaskCommands::Delete { id } => {
            let task = service.delete_task(&id).await?;
            print_line(&format!("deleted {}", task.id));
        }
    }
    Ok(())
}

async fn handle_rel(service: &TaskService, command: RelCommands) -> Result<()> {
    match command {
        RelCommands::Add { from, kind, to } => {
            let relationship = Relationship::new(from, to, kind.into());
            let key = relationship.key();
            if service.add_relationship(relationship).await? {
                print_line(&format!("added {key}"));
            } else {
                print_line(&format!("already present: {key}"));
            }
        }
        RelCommands::List { ids } => {
            let edges = service.relationships_for(&ids).await?;
            if edges.is_empty() {
                print_line("no relationships");
            }
            for edge in &edges {
                print_line(&edge.key());
            }
        }
    }
    Ok(())
}

async fn handle_tree(service: &TaskService, id: &TaskId) -> Result<()> {
    let tree = service.task_tree(id).await?;
    print_tree(&tree, 0);
    Ok(())
}

async fn handle_workspace(service: &TaskService, command: WorkspaceCommands) -> Result<()> {
    match command {
        WorkspaceCommands::Status => {
            let status = service.workspace_status().await;
            print_line(&format!("root:        {}", status.root.display()));
            print_line(&format!("health:      {}", status.health.label()));
            print_line(&format!(
                "local head:  {}",
                status.head.as_deref().unwrap_or("(none)")
            ));
            print_line(&format!(
                "last synced: {}",
                status.last_synced.as_deref().unwrap_or("(never this run)")
            ));
            print_line(&format!(
                "remote head: {}",
                status.remote_head.as_deref().unwrap_or("(unreachable)")
            ));
        }
        WorkspaceCommands::Repair => {
            service.repair_workspace().await?;
            print_line("workspace repaired");
        }
    }
    Ok(())
}

#[allow(clippy::print_stdout, reason = "User-facing command output")]
fn print_line(line: &str) {
    println!("{line}");
}

fn print_task_line(task: &Task) {
    print_line(&format!(
        "[{}] {} {} ({})",
        task.status.checkbox(),
        task.id,
        task.title,
        task.status.label()
    ));
}

fn print_task_detail(task: &Task) {
    print_task_line(task);
    if let Some(spec_ref) = &task.spec_ref {
        print_line(&format!("  spec:    {spec_ref}"));
    }
    print_line(&format!("  created: {}", task.created_at.to_rfc3339()));
    print_line(&format!("  updated: {}", task.updated_at.to_rfc3339()));
}

fn print_tree(node: &TreeNode, depth: usize) {
    let indent = "  ".repeat(depth);
    match &node.task {
        Some(task) => print_line(&format!(
            "{indent}[{}] {} {}",
            task.status.checkbox(),
            node.id,
            task.title
        )),
        None => print_line(&format!("{indent}{} (external)", node.id)),
    }
    for child in &node.children {
        print_tree(child, depth + 1);
    }
}
