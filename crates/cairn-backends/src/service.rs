//! The task service: the one object consumers construct and call.
//!
//! Everything the system needs (configuration, the keyed operation lock,
//! the synced workspace, the backend registry, and the router) is built
//! here and passed by value, never reached through ambient globals. A
//! mutation on an in-tree backend flows: router → synced workspace →
//! per-file operation lock → backend read-modify-write → commit and push.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use cairn_core::{
    CairnConfig, Error, Relationship, Result, Task, TaskDraft, TaskId, TaskStatus,
};
use cairn_storage::{
    OperationLock, SyncOutcome, SyncedWorkspace, TaskCollection, WorkspaceStatus, read_tasks,
};

use crate::backend::{TaskBackend, WorkspaceKind};
use crate::graph::{RelationshipGraph, RelationshipStore, TaskTree};
use crate::json_file::JsonFileBackend;
use crate::registry::BackendRegistry;
use crate::router::BackendRouter;

/// Parent-hierarchy node with task data attached where the store has it.
///
/// `task` is `None` for edges that reference an identifier no in-tree store
/// can resolve, such as a task owned by an external system.
#[derive(Debug, Clone)]
pub struct TreeNode {
    /// Task at this node.
    pub id: TaskId,
    /// Stored task data, when resolvable.
    pub task: Option<Task>,
    /// Direct children, ordered by identifier.
    pub children: Vec<TreeNode>,
}

/// Service facade over backends, routing, locking, and the synced workspace.
pub struct TaskService {
    config: CairnConfig,
    locks: Arc<OperationLock>,
    workspace: Arc<SyncedWorkspace>,
    registry: BackendRegistry,
    router: BackendRouter,
    root_override: Option<PathBuf>,
}

impl TaskService {
    /// Builds the service described by `config`, registering the built-in
    /// JSON backend.
    ///
    /// # Errors
    /// Returns an error if the workspace configuration is incomplete.
    pub fn new(config: CairnConfig) -> Result<Self> {
        let locks = OperationLock::new(Duration::from_secs(
            config.locking.operation_timeout_secs,
        ));
        let workspace = Arc::new(SyncedWorkspace::from_config(&config, Arc::clone(&locks))?);
        let registry = BackendRegistry::default().with_backend(Arc::new(JsonFileBackend::new(
            config.storage.strict_parse,
        )));
        let router = BackendRouter::new(workspace.data_path(), workspace.data_path());

        Ok(Self {
            config,
            locks,
            workspace,
            registry,
            router,
            root_override: None,
        })
    }

    /// Registers an additional backend.
    #[must_use]
    pub fn with_backend(mut self, backend: Arc<dyn TaskBackend>) -> Self {
        self.registry = self.registry.with_backend(backend);
        self
    }

    /// Forces every call to operate against `root` instead of the routed
    /// path.
    #[must_use]
    pub fn with_root_override(mut self, root: PathBuf) -> Self {
        self.root_override = Some(root);
        self
    }

    /// The configuration this service was built from.
    #[must_use]
    pub fn config(&self) -> &CairnConfig {
        &self.config
    }

    /// Task-data path inside the managed workspace.
    #[must_use]
    pub fn data_path(&self) -> PathBuf {
        self.workspace.data_path()
    }

    /// Lists tasks of one backend (the configured default when `None`).
    ///
    /// # Errors
    /// Returns [`Error::UnknownBackend`] or a store read error.
    pub async fn list_tasks(&self, backend: Option<&str>) -> Result<Vec<Task>> {
        let backend = self.backend_for(backend)?;
        match backend.workspace_kind() {
            WorkspaceKind::InTree => {
                self.workspace
                    .with_view(move |data_root| {
                        Box::pin(async move { backend.list_tasks(&data_root).await })
                    })
                    .await
            }
            WorkspaceKind::External => {
                let root = self.resolved_root(backend.as_ref());
                backend.list_tasks(&root).await
            }
        }
    }

    /// Fetches one task; the identifier's backend segment picks the backend.
    ///
    /// # Errors
    /// Returns [`Error::UnknownBackend`], [`Error::NotFound`], or a store
    /// read error.
    pub async fn get_task(&self, id: &TaskId) -> Result<Task> {
        let backend = self.backend_named(id.backend())?;
        match backend.workspace_kind() {
            WorkspaceKind::InTree => {
                let id = id.clone();
                self.workspace
                    .with_view(move |data_root| {
                        Box::pin(async move { backend.get_task(&data_root, &id).await })
                    })
                    .await
            }
            WorkspaceKind::External => {
                let root = self.resolved_root(backend.as_ref());
                backend.get_task(&root, id).await
            }
        }
    }

    /// Creates a task on one backend (the configured default when `None`).
    ///
    /// On an in-tree backend the mutation runs inside the synced critical
    /// section and is committed as `tasks: create <id>`.
    ///
    /// # Errors
    /// Returns [`Error::UnknownBackend`], a lock, sync, or store error.
    pub async fn create_task(&self, backend: Option<&str>, draft: TaskDraft) -> Result<Task> {
        let backend = self.backend_for(backend)?;
        match backend.workspace_kind() {
            WorkspaceKind::InTree => {
                let locks = Arc::clone(&self.locks);
                self.workspace
                    .with_sync(move |data_root| {
                        let backend = Arc::clone(&backend);
                        let locks = Arc::clone(&locks);
                        let draft = draft.clone();
                        Box::pin(async move {
                            let key = lock_key_for(&backend.state_file(&data_root));
                            let task = locks
                                .with_lock(&key, move || async move {
                                    backend.create_task(&data_root, draft).await
                                })
                                .await?;
                            let message = format!("tasks: create {}", task.id);
                            Ok(SyncOutcome::new(task, message))
                        })
                    })
                    .await
            }
            WorkspaceKind::External => {
                let root = self.resolved_root(backend.as_ref());
                backend.create_task(&root, draft).await
            }
        }
    }

    /// Sets the status of an existing task.
    ///
    /// # Errors
    /// Returns [`Error::UnknownBackend`], [`Error::NotFound`], a lock,
    /// sync, or store error.
    pub async fn set_task_status(&self, id: &TaskId, status: TaskStatus) -> Result<Task> {
        let backend = self.backend_named(id.backend())?;
        match backend.workspace_kind() {
            WorkspaceKind::InTree => {
                let locks = Arc::clone(&self.locks);
                let id = id.clone();
                self.workspace
                    .with_sync(move |data_root| {
                        let backend = Arc::clone(&backend);
                        let locks = Arc::clone(&locks);
                        let id = id.clone();
                        Box::pin(async move {
                            let key = lock_key_for(&backend.state_file(&data_root));
                            let task = locks
                                .with_lock(&key, move || async move {
                                    backend.set_task_status(&data_root, &id, status).await
                                })
                                .await?;
                            let message =
                                format!("tasks: set {} to {}", task.id, task.status.label());
                            Ok(SyncOutcome::new(task, message))
                        })
                    })
                    .await
            }
            WorkspaceKind::External => {
                let root = self.resolved_root(backend.as_ref());
                backend.set_task_status(&root, id, status).await
            }
        }
    }

    /// Deletes a task, returning the removed entry.
    ///
    /// # Errors
    /// Returns [`Error::UnknownBackend`], [`Error::NotFound`], a lock,
    /// sync, or store error.
    pub async fn delete_task(&self, id: &TaskId) -> Result<Task> {
        let backend = self.backend_named(id.backend())?;
        match backend.workspace_kind() {
            WorkspaceKind::InTree => {
                let locks = Arc::clone(&self.locks);
                let id = id.clone();
                self.workspace
                    .with_sync(move |data_root| {
                        let backend = Arc::clone(&backend);
                        let locks = Arc::clone(&locks);
                        let id = id.clone();
                        Box::pin(async move {
                            let key = lock_key_for(&backend.state_file(&data_root));
                            let task = locks
                                .with_lock(&key, move || async move {
                                    backend.delete_task(&data_root, &id).await
                                })
                                .await?;
                            let message = format!("tasks: delete {}", task.id);
                            Ok(SyncOutcome::new(task, message))
                        })
                    })
                    .await
            }
            WorkspaceKind::External => {
                let root = self.resolved_root(backend.as_ref());
                backend.delete_task(&root, id).await
            }
        }
    }

    /// Adds a relationship edge; `false` means the edge already existed.
    ///
    /// Endpoints that resolve to a registered in-tree backend must exist;
    /// identifiers owned by external systems are accepted as-is. Committed
    /// as `tasks: relate <from> <kind> <to>`.
    ///
    /// # Errors
    /// Returns [`Error::CycleDetected`], [`Error::NotFound`] for a missing
    /// in-tree endpoint, or a lock, sync, or store error.
    pub async fn add_relationship(&self, relationship: Relationship) -> Result<bool> {
        let locks = Arc::clone(&self.locks);
        let registry = self.registry.clone();
        let strict = self.config.storage.strict_parse;
        self.workspace
            .with_sync(move |data_root| {
                let locks = Arc::clone(&locks);
                let registry = registry.clone();
                let relationship = relationship.clone();
                Box::pin(async move {
                    let message = format!("tasks: relate {}", relationship.key());
                    let path = RelationshipStore::edges_path(&data_root);
                    let key = lock_key_for(&path);
                    let added = locks
                        .with_lock(&key, move || async move {
                            ensure_endpoints_exist(&registry, &data_root, &relationship).await?;
                            RelationshipStore::new(path, strict).add_edge(&relationship)
                        })
                        .await?;
                    Ok(SyncOutcome::new(added, message))
                })
            })
            .await
    }

    /// All edges touching any of `ids`, loaded in one pass.
    ///
    /// # Errors
    /// Returns a store read error.
    pub async fn relationships_for(&self, ids: &[TaskId]) -> Result<Vec<Relationship>> {
        let ids = ids.to_vec();
        let strict = self.config.storage.strict_parse;
        self.workspace
            .with_view(move |data_root| {
                Box::pin(async move {
                    let store =
                        RelationshipStore::new(RelationshipStore::edges_path(&data_root), strict);
                    store.edges_for_tasks(&ids)
                })
            })
            .await
    }

    /// Parent-hierarchy subtree rooted at `id`, cycle-checked first.
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] if the root task does not exist,
    /// [`Error::CycleDetected`], or a store read error.
    pub async fn task_tree(&self, id: &TaskId) -> Result<TreeNode> {
        let id = id.clone();
        let strict = self.config.storage.strict_parse;
        self.workspace
            .with_view(move |data_root| {
                Box::pin(async move {
                    let collection =
                        read_tasks(&JsonFileBackend::tasks_path(&data_root), strict)?;
                    if collection.get(&id).is_none() {
                        return Err(Error::NotFound(id));
                    }

                    let store =
                        RelationshipStore::new(RelationshipStore::edges_path(&data_root), strict);
                    let graph = RelationshipGraph::from_edges(&store.all_edges()?);
                    let tree = graph.tree_of(&id)?;
                    Ok(attach_tasks(&tree, &collection))
                })
            })
            .await
    }

    /// Operator-facing workspace snapshot; never mutates.
    pub async fn workspace_status(&self) -> WorkspaceStatus {
        self.workspace.status().await
    }

    /// Destroys and re-clones the managed checkout.
    ///
    /// # Errors
    /// Returns a lock or git error.
    pub async fn repair_workspace(&self) -> Result<()> {
        self.workspace.repair().await
    }

    fn backend_named(&self, name: &str) -> Result<Arc<dyn TaskBackend>> {
        self.registry
            .get(name)
            .ok_or_else(|| Error::UnknownBackend(name.to_owned()))
    }

    fn backend_for(&self, name: Option<&str>) -> Result<Arc<dyn TaskBackend>> {
        match name {
            Some(name) => self.backend_named(name),
            None => self.backend_named(&self.config.workspace.default_backend),
        }
    }

    fn resolved_root(&self, backend: &dyn TaskBackend) -> PathBuf {
        self.router
            .resolve_root(backend, self.root_override.as_deref())
    }
}

/// Operation-lock key for a state file.
fn lock_key_for(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Rejects edges whose in-tree endpoints do not exist in their store.
async fn ensure_endpoints_exist(
    registry: &BackendRegistry,
    data_root: &Path,
    relationship: &Relationship,
) -> Result<()> {
    for endpoint in [&relationship.from, &relationship.to] {
        let Some(backend) = registry.get(endpoint.backend()) else {
            continue;
        };
        if backend.workspace_kind() == WorkspaceKind::InTree {
            backend.get_task(data_root, endpoint).await?;
        }
    }
    Ok(())
}

fn attach_tasks(tree: &TaskTree, collection: &TaskCollection) -> TreeNode {
    TreeNode {
        id: tree.id.clone(),
        task: collection.get(&tree.id).cloned(),
        children: tree
            .children
            .iter()
            .map(|child| attach_tasks(child, collection))
            .collect(),
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, reason = "Test code is allowed to use expect")]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct RecordingBackend {
        seen: StdMutex<Vec<PathBuf>>,
    }

    impl RecordingBackend {
        fn record(&self, root: &Path) {
            self.seen
                .lock()
                .expect("mutex poisoned")
                .push(root.to_owned());
        }

        fn roots(&self) -> Vec<PathBuf> {
            self.seen.lock().expect("mutex poisoned").clone()
        }
    }

    #[async_trait]
    impl TaskBackend for RecordingBackend {
        fn name(&self) -> &'static str {
            "ext"
        }

        fn workspace_kind(&self) -> WorkspaceKind {
            WorkspaceKind::External
        }

        fn state_file(&self, root: &Path) -> PathBuf {
            root.join("ext.json")
        }

        async fn list_tasks(&self, root: &Path) -> Result<Vec<Task>> {
            self.record(root);
            Ok(Vec::new())
        }

        async fn get_task(&self, root: &Path, id: &TaskId) -> Result<Task> {
            self.record(root);
            Err(Error::NotFound(id.clone()))
        }

        async fn create_task(&self, root: &Path, draft: TaskDraft) -> Result<Task> {
            self.record(root);
            Ok(Task::from_draft(TaskId::new("ext", 1), draft))
        }

        async fn set_task_status(
            &self,
            root: &Path,
            id: &TaskId,
            _status: TaskStatus,
        ) -> Result<Task> {
            self.record(root);
            Err(Error::NotFound(id.clone()))
        }

        async fn delete_task(&self, root: &Path, id: &TaskId) -> Result<Task> {
            self.record(root);
            Err(Error::NotFound(id.clone()))
        }
    }

    fn test_config(state_root: &Path) -> CairnConfig {
        let mut config = CairnConfig::default();
        config.git.remote_url = Some("file:///nonexistent/remote.git".to_owned());
        config.workspace.state_dir = Some(state_root.to_owned());
        config
    }

    #[test]
    fn test_construction_requires_remote_url() {
        let config = CairnConfig::default();
        assert!(matches!(TaskService::new(config), Err(Error::Other(_))));
    }

    #[tokio::test]
    async fn test_unknown_backend_is_typed() {
        let dir = TempDir::new().expect("create temp dir");
        let service =
            TaskService::new(test_config(&dir.path().join("ws"))).expect("build service");

        match service.list_tasks(Some("bogus")).await {
            Err(Error::UnknownBackend(name)) => assert_eq!(name, "bogus"),
            other => panic!("expected UnknownBackend, got {other:?}"),
        }
        match service.get_task(&TaskId::new("gone", 1)).await {
            Err(Error::UnknownBackend(name)) => assert_eq!(name, "gone"),
            other => panic!("expected UnknownBackend, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_external_backend_skips_workspace() {
        let dir = TempDir::new().expect("create temp dir");
        let ambient = dir.path().join("ambient");
        std::fs::create_dir_all(&ambient).expect("create ambient dir");

        let recorder = Arc::new(RecordingBackend::default());
        let service = TaskService::new(test_config(&dir.path().join("ws")))
            .expect("build service")
            .with_backend(Arc::clone(&recorder) as Arc<dyn TaskBackend>)
            .with_root_override(ambient.clone());

        let task = service
            .create_task(Some("ext"), TaskDraft::new("Remote issue"))
            .await
            .expect("external create");
        assert_eq!(task.id, TaskId::new("ext", 1));

        // The external call operated on the override root; the managed
        // checkout was never created.
        assert_eq!(recorder.roots(), vec![ambient]);
        assert!(!dir.path().join("ws").exists());
    }
}
