//! In-tree backend storing tasks as a single JSON document.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use cairn_core::{Error, Result, Task, TaskDraft, TaskId, TaskStatus};
use cairn_storage::{read_tasks, write_tasks};

use crate::backend::{TaskBackend, WorkspaceKind};

/// File name of the task document inside a store root.
pub const TASKS_FILE: &str = "tasks.json";

/// Backend persisting tasks in `tasks.json` under the resolved root.
///
/// Read and write primitives are lock-free; the service serializes calls
/// through the operation lock before they reach this type.
#[derive(Debug, Clone)]
pub struct JsonFileBackend {
    strict_parse: bool,
}

impl JsonFileBackend {
    /// Creates the backend; `strict_parse` controls whether a malformed
    /// document fails the read or degrades to an empty collection.
    #[must_use]
    pub fn new(strict_parse: bool) -> Self {
        Self { strict_parse }
    }

    /// Path of the task document under `root`.
    #[must_use]
    pub fn tasks_path(root: &Path) -> PathBuf {
        root.join(TASKS_FILE)
    }
}

#[async_trait]
impl TaskBackend for JsonFileBackend {
    fn name(&self) -> &'static str {
        "json"
    }

    fn workspace_kind(&self) -> WorkspaceKind {
        WorkspaceKind::InTree
    }

    fn state_file(&self, root: &Path) -> PathBuf {
        Self::tasks_path(root)
    }

    async fn list_tasks(&self, root: &Path) -> Result<Vec<Task>> {
        let collection = read_tasks(&Self::tasks_path(root), self.strict_parse)?;
        Ok(collection.tasks.into_values().collect())
    }

    async fn get_task(&self, root: &Path, id: &TaskId) -> Result<Task> {
        let collection = read_tasks(&Self::tasks_path(root), self.strict_parse)?;
        collection
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(id.clone()))
    }

    async fn create_task(&self, root: &Path, draft: TaskDraft) -> Result<Task> {
        let path = Self::tasks_path(root);
        let mut collection = read_tasks(&path, self.strict_parse)?;

        let id = TaskId::new(self.name(), collection.next_local_id(self.name()));
        let task = Task::from_draft(id, draft);
        collection.insert(task.clone());
        write_tasks(&path, &collection)?;

        tracing::debug!("Created task {}", task.id);
        Ok(task)
    }

    async fn set_task_status(&self, root: &Path, id: &TaskId, status: TaskStatus) -> Result<Task> {
        let path = Self::tasks_path(root);
        let mut collection = read_tasks(&path, self.strict_parse)?;

        let task = collection
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(id.clone()))?;
        task.set_status(status);
        let updated = task.clone();
        write_tasks(&path, &collection)?;

        Ok(updated)
    }

    async fn delete_task(&self, root: &Path, id: &TaskId) -> Result<Task> {
        let path = Self::tasks_path(root);
        let mut collection = read_tasks(&path, self.strict_parse)?;

        let removed = collection
            .remove(id)
            .ok_or_else(|| Error::NotFound(id.clone()))?;
        write_tasks(&path, &collection)?;

        tracing::debug!("Deleted task {}", removed.id);
        Ok(removed)
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, reason = "Test code is allowed to use expect")]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_create_assigns_sequential_ids() {
        let dir = TempDir::new().expect("create temp dir");
        let backend = JsonFileBackend::new(false);

        let first = backend
            .create_task(dir.path(), TaskDraft::new("First"))
            .await
            .expect("create first");
        let second = backend
            .create_task(dir.path(), TaskDraft::new("Second"))
            .await
            .expect("create second");

        assert_eq!(first.id, TaskId::new("json", 1));
        assert_eq!(second.id, TaskId::new("json", 2));
        assert_eq!(first.status, TaskStatus::Todo);
    }

    #[tokio::test]
    async fn test_get_and_list_round_trip() {
        let dir = TempDir::new().expect("create temp dir");
        let backend = JsonFileBackend::new(false);

        let created = backend
            .create_task(dir.path(), TaskDraft::new("Fix bug"))
            .await
            .expect("create");

        let fetched = backend
            .get_task(dir.path(), &created.id)
            .await
            .expect("get");
        assert_eq!(fetched, created);

        let listed = backend.list_tasks(dir.path()).await.expect("list");
        assert_eq!(listed, vec![created]);
    }

    #[tokio::test]
    async fn test_set_status_persists() {
        let dir = TempDir::new().expect("create temp dir");
        let backend = JsonFileBackend::new(false);

        let created = backend
            .create_task(dir.path(), TaskDraft::new("Fix bug"))
            .await
            .expect("create");
        let updated = backend
            .set_task_status(dir.path(), &created.id, TaskStatus::Done)
            .await
            .expect("set status");
        assert_eq!(updated.status, TaskStatus::Done);

        let fetched = backend
            .get_task(dir.path(), &created.id)
            .await
            .expect("get");
        assert_eq!(fetched.status, TaskStatus::Done);
    }

    #[tokio::test]
    async fn test_delete_then_get_is_not_found() {
        let dir = TempDir::new().expect("create temp dir");
        let backend = JsonFileBackend::new(false);

        let created = backend
            .create_task(dir.path(), TaskDraft::new("Fix bug"))
            .await
            .expect("create");
        let removed = backend
            .delete_task(dir.path(), &created.id)
            .await
            .expect("delete");
        assert_eq!(removed.id, created.id);

        match backend.get_task(dir.path(), &created.id).await {
            Err(Error::NotFound(id)) => assert_eq!(id, created.id),
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_missing_task_operations_are_not_found() {
        let dir = TempDir::new().expect("create temp dir");
        let backend = JsonFileBackend::new(false);
        let id = TaskId::new("json", 42);

        assert!(matches!(
            backend.get_task(dir.path(), &id).await,
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            backend
                .set_task_status(dir.path(), &id, TaskStatus::Done)
                .await,
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            backend.delete_task(dir.path(), &id).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_id_numbering_skips_deleted_high_water_mark() {
        let dir = TempDir::new().expect("create temp dir");
        let backend = JsonFileBackend::new(false);

        let first = backend
            .create_task(dir.path(), TaskDraft::new("First"))
            .await
            .expect("create first");
        let second = backend
            .create_task(dir.path(), TaskDraft::new("Second"))
            .await
            .expect("create second");
        backend
            .delete_task(dir.path(), &first.id)
            .await
            .expect("delete first");

        let third = backend
            .create_task(dir.path(), TaskDraft::new("Third"))
            .await
            .expect("create third");
        assert_eq!(second.id, TaskId::new("json", 2));
        assert_eq!(third.id, TaskId::new("json", 3));
    }
}
