//! Crash-safe persistence of task state files.
//!
//! Reads and writes are lock-free: callers hold the
//! [`OperationLock`](crate::op_lock::OperationLock) for the file's key before
//! calling in here, and these functions never take it themselves. Writes go
//! through a temp file in the destination directory followed by an atomic
//! rename, so a kill mid-write leaves the original file untouched and a kill
//! after the rename leaves the new content fully intact.

use std::collections::BTreeMap;
use std::fs;
use std::io::{ErrorKind, Write as _};
use std::path::Path;

use cairn_core::{Error, Relationship, Result, Task, TaskId};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

/// Schema version written into new state files.
const SCHEMA_VERSION: u32 = 1;

/// On-disk task document: all tasks of a store file, keyed by identifier.
///
/// The map keeps serialization deterministic; writing the same logical
/// collection twice produces byte-identical output.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskCollection {
    /// Schema version of the document.
    pub version: u32,
    /// Tasks keyed by their qualified identifier.
    pub tasks: BTreeMap<TaskId, Task>,
}

impl Default for TaskCollection {
    fn default() -> Self {
        Self {
            version: SCHEMA_VERSION,
            tasks: BTreeMap::new(),
        }
    }
}

impl TaskCollection {
    /// Next unused backend-local number for `backend`, starting at 1.
    #[must_use]
    pub fn next_local_id(&self, backend: &str) -> u64 {
        self.tasks
            .keys()
            .filter(|id| id.backend() == backend)
            .map(TaskId::local)
            .max()
            .map_or(1, |highest| highest + 1)
    }

    /// Inserts a task, returning the previous entry under the same id.
    pub fn insert(&mut self, task: Task) -> Option<Task> {
        self.tasks.insert(task.id.clone(), task)
    }

    /// Looks up a task by identifier.
    #[must_use]
    pub fn get(&self, id: &TaskId) -> Option<&Task> {
        self.tasks.get(id)
    }

    /// Mutable lookup by identifier.
    pub fn get_mut(&mut self, id: &TaskId) -> Option<&mut Task> {
        self.tasks.get_mut(id)
    }

    /// Removes a task, returning it if present.
    pub fn remove(&mut self, id: &TaskId) -> Option<Task> {
        self.tasks.remove(id)
    }
}

/// On-disk relationship document, keyed by the canonical edge key.
///
/// Keying by [`Relationship::key`] deduplicates repeat adds of the same
/// `(from, kind, to)` triple and keeps iteration order stable.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelationshipSet {
    /// Schema version of the document.
    pub version: u32,
    /// Edges keyed by their canonical `(from, kind, to)` string.
    pub edges: BTreeMap<String, Relationship>,
}

impl Default for RelationshipSet {
    fn default() -> Self {
        Self {
            version: SCHEMA_VERSION,
            edges: BTreeMap::new(),
        }
    }
}

impl RelationshipSet {
    /// Inserts an edge; returns `false` if the same triple already existed.
    pub fn insert(&mut self, edge: Relationship) -> bool {
        self.edges.insert(edge.key(), edge).is_none()
    }

    /// Removes an edge by its canonical key, returning it if present.
    pub fn remove(&mut self, key: &str) -> Option<Relationship> {
        self.edges.remove(key)
    }

    /// Iterates all edges in canonical order.
    pub fn iter(&self) -> impl Iterator<Item = &Relationship> {
        self.edges.values()
    }

    /// All edges touching any of the given tasks, in canonical order.
    #[must_use]
    pub fn edges_touching(&self, ids: &[TaskId]) -> Vec<Relationship> {
        self.edges
            .values()
            .filter(|edge| ids.iter().any(|id| edge.touches(id)))
            .cloned()
            .collect()
    }
}

/// Reads the task document at `path`.
///
/// A missing file is an empty collection, not an error. A file that fails to
/// parse is surfaced as [`Error::Serialization`] when `strict` is set;
/// otherwise it is logged and treated as empty.
///
/// # Errors
/// Returns an error if the file exists but cannot be read, or fails to parse
/// in strict mode.
pub fn read_tasks(path: &Path, strict: bool) -> Result<TaskCollection> {
    read_document(path, strict)
}

/// Writes the task document at `path` atomically.
///
/// # Errors
/// Returns an error if the temp file cannot be created, written, or renamed
/// over the target.
pub fn write_tasks(path: &Path, collection: &TaskCollection) -> Result<()> {
    write_document(path, collection)
}

/// Reads the relationship document at `path`. Same contract as
/// [`read_tasks`].
///
/// # Errors
/// Returns an error if the file exists but cannot be read, or fails to parse
/// in strict mode.
pub fn read_relationships(path: &Path, strict: bool) -> Result<RelationshipSet> {
    read_document(path, strict)
}

/// Writes the relationship document at `path` atomically.
///
/// # Errors
/// Returns an error if the temp file cannot be created, written, or renamed
/// over the target.
pub fn write_relationships(path: &Path, set: &RelationshipSet) -> Result<()> {
    write_document(path, set)
}

fn read_document<T>(path: &Path, strict: bool) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(error) if error.kind() == ErrorKind::NotFound => return Ok(T::default()),
        Err(error) => return Err(error.into()),
    };

    match serde_json::from_str(&contents) {
        Ok(value) => Ok(value),
        Err(error) if strict => Err(Error::Serialization {
            path: path.to_path_buf(),
            detail: error.to_string(),
        }),
        Err(error) => {
            tracing::warn!(
                "Treating malformed state file {} as empty: {error}",
                path.display()
            );
            Ok(T::default())
        }
    }
}

fn write_document<T>(path: &Path, value: &T) -> Result<()>
where
    T: Serialize,
{
    let parent = path.parent().ok_or_else(|| {
        Error::Other(format!(
            "State path {} has no parent directory",
            path.display()
        ))
    })?;
    fs::create_dir_all(parent)?;

    let mut contents = serde_json::to_string_pretty(value)?;
    contents.push('\n');

    let mut temp = NamedTempFile::new_in(parent)?;
    temp.write_all(contents.as_bytes())?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|error| Error::Io(error.error))?;
    Ok(())
}

#[cfg(test)]
#[allow(clippy::expect_used, reason = "Test code is allowed to use expect")]
mod tests {
    use super::*;
    use cairn_core::{RelationshipKind, TaskDraft};
    use tempfile::TempDir;

    fn sample_task(local: u64, title: &str) -> Task {
        Task::from_draft(TaskId::new("json", local), TaskDraft::new(title))
    }

    #[test]
    fn test_read_missing_file_is_empty() {
        let dir = TempDir::new().expect("create temp dir");
        let collection =
            read_tasks(&dir.path().join("tasks.json"), true).expect("missing file reads empty");
        assert!(collection.tasks.is_empty());
        assert_eq!(collection.version, SCHEMA_VERSION);
    }

    #[test]
    fn test_write_then_read_round_trip() {
        let dir = TempDir::new().expect("create temp dir");
        let path = dir.path().join("tasks.json");

        let mut collection = TaskCollection::default();
        collection.insert(sample_task(1, "First"));
        collection.insert(sample_task(2, "Second"));
        write_tasks(&path, &collection).expect("write tasks");

        let loaded = read_tasks(&path, true).expect("read tasks");
        assert_eq!(loaded.tasks.len(), 2);
        let first = loaded
            .get(&TaskId::new("json", 1))
            .expect("first task present");
        assert_eq!(first.title, "First");
    }

    #[test]
    fn test_serialization_is_byte_identical() {
        let dir = TempDir::new().expect("create temp dir");
        let path_a = dir.path().join("a.json");
        let path_b = dir.path().join("b.json");

        // Same logical content inserted in different orders.
        let task_one = sample_task(1, "One");
        let task_two = sample_task(2, "Two");

        let mut forward = TaskCollection::default();
        forward.insert(task_one.clone());
        forward.insert(task_two.clone());

        let mut backward = TaskCollection::default();
        backward.insert(task_two);
        backward.insert(task_one);

        write_tasks(&path_a, &forward).expect("write a");
        write_tasks(&path_b, &backward).expect("write b");

        let bytes_a = fs::read(&path_a).expect("read a");
        let bytes_b = fs::read(&path_b).expect("read b");
        assert_eq!(bytes_a, bytes_b);

        // Rewriting the same collection must not churn the file.
        write_tasks(&path_a, &forward).expect("rewrite a");
        assert_eq!(fs::read(&path_a).expect("reread a"), bytes_a);
    }

    #[test]
    fn test_malformed_file_lenient_vs_strict() {
        let dir = TempDir::new().expect("create temp dir");
        let path = dir.path().join("tasks.json");
        fs::write(&path, "{ not json").expect("write garbage");

        let lenient = read_tasks(&path, false).expect("lenient read");
        assert!(lenient.tasks.is_empty());

        match read_tasks(&path, true) {
            Err(Error::Serialization { path: bad, .. }) => assert_eq!(bad, path),
            other => panic!("expected Serialization error, got {other:?}"),
        }
    }

    #[test]
    fn test_abandoned_temp_file_does_not_affect_reads() {
        let dir = TempDir::new().expect("create temp dir");
        let path = dir.path().join("tasks.json");

        let mut collection = TaskCollection::default();
        collection.insert(sample_task(1, "Original"));
        write_tasks(&path, &collection).expect("write tasks");
        let original = fs::read(&path).expect("read original");

        // A writer killed between temp creation and rename leaves a stray
        // temp file behind; the canonical path is untouched.
        fs::write(dir.path().join(".tmpXYZ"), "partial garbage").expect("write stray temp");

        assert_eq!(fs::read(&path).expect("reread"), original);
        let loaded = read_tasks(&path, true).expect("read after stray temp");
        assert_eq!(loaded.tasks.len(), 1);
    }

    #[test]
    fn test_write_leaves_no_temp_files() {
        let dir = TempDir::new().expect("create temp dir");
        let path = dir.path().join("tasks.json");

        write_tasks(&path, &TaskCollection::default()).expect("write tasks");

        let entries: Vec<_> = fs::read_dir(dir.path())
            .expect("read dir")
            .map(|entry| entry.expect("dir entry").file_name())
            .collect();
        assert_eq!(entries, vec!["tasks.json"]);
    }

    #[test]
    fn test_next_local_id_counts_per_backend() {
        let mut collection = TaskCollection::default();
        assert_eq!(collection.next_local_id("json"), 1);

        collection.insert(sample_task(3, "Three"));
        collection.insert(sample_task(7, "Seven"));
        collection.insert(Task::from_draft(TaskId::new("gh", 9), TaskDraft::new("Issue")));

        assert_eq!(collection.next_local_id("json"), 8);
        assert_eq!(collection.next_local_id("gh"), 10);
        assert_eq!(collection.next_local_id("md"), 1);
    }

    #[test]
    fn test_relationship_set_deduplicates() {
        let edge = Relationship::new(
            TaskId::new("json", 1),
            TaskId::new("json", 2),
            RelationshipKind::Blocks,
        );

        let mut set = RelationshipSet::default();
        assert!(set.insert(edge.clone()));
        assert!(!set.insert(edge));
        assert_eq!(set.iter().count(), 1);
    }

    #[test]
    fn test_edges_touching_filters_both_ends() {
        let mut set = RelationshipSet::default();
        set.insert(Relationship::new(
            TaskId::new("json", 1),
            TaskId::new("json", 2),
            RelationshipKind::Parent,
        ));
        set.insert(Relationship::new(
            TaskId::new("json", 3),
            TaskId::new("json", 1),
            RelationshipKind::Blocks,
        ));
        set.insert(Relationship::new(
            TaskId::new("json", 4),
            TaskId::new("json", 5),
            RelationshipKind::RelatesTo,
        ));

        let touching = set.edges_touching(&[TaskId::new("json", 1)]);
        assert_eq!(touching.len(), 2);

        let touching = set.edges_touching(&[TaskId::new("json", 5), TaskId::new("json", 2)]);
        assert_eq!(touching.len(), 2);

        let touching = set.edges_touching(&[TaskId::new("json", 99)]);
        assert!(touching.is_empty());
    }
}
