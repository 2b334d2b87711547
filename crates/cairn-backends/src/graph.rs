//! Bulk relationship loading and the cycle-checked hierarchy graph.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use cairn_core::{Error, Relationship, RelationshipKind, Result, TaskId};
use cairn_storage::{RelationshipSet, read_relationships, write_relationships};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef as _;
use petgraph::{Direction, algo};

/// File name of the relationship document inside a store root.
pub const RELATIONSHIPS_FILE: &str = "relationships.json";

/// Edge store over one relationship document.
///
/// Every query loads the document exactly once no matter how many tasks are
/// asked about; the load counter exists so that property stays observable.
/// Like the task file store, this type is lock-free and relies on the caller
/// holding the document's operation lock for mutation.
pub struct RelationshipStore {
    path: PathBuf,
    strict_parse: bool,
    load_count: AtomicU64,
}

impl RelationshipStore {
    /// Creates a store over the document at `path`.
    #[must_use]
    pub fn new(path: PathBuf, strict_parse: bool) -> Self {
        Self {
            path,
            strict_parse,
            load_count: AtomicU64::new(0),
        }
    }

    /// Path of the relationship document under `root`.
    #[must_use]
    pub fn edges_path(root: &Path) -> PathBuf {
        root.join(RELATIONSHIPS_FILE)
    }

    /// All edges touching any of `ids`, loaded in a single pass.
    ///
    /// # Errors
    /// Returns an error if the document cannot be read.
    pub fn edges_for_tasks(&self, ids: &[TaskId]) -> Result<Vec<Relationship>> {
        Ok(self.load()?.edges_touching(ids))
    }

    /// Every edge in the document, in canonical order.
    ///
    /// # Errors
    /// Returns an error if the document cannot be read.
    pub fn all_edges(&self) -> Result<Vec<Relationship>> {
        Ok(self.load()?.iter().cloned().collect())
    }

    /// Adds an edge. Returns `false` if the same `(from, kind, to)` triple
    /// was already present; the document is untouched in that case.
    ///
    /// A parent edge is checked against the existing hierarchy first and
    /// rejected with [`Error::CycleDetected`] if it would close a cycle.
    ///
    /// # Errors
    /// Returns [`Error::CycleDetected`] or a document read/write error.
    pub fn add_edge(&self, relationship: &Relationship) -> Result<bool> {
        let mut set = self.load()?;
        if set.edges.contains_key(&relationship.key()) {
            tracing::debug!("Edge {} already present", relationship.key());
            return Ok(false);
        }

        if relationship.is_parent() {
            let mut edges: Vec<Relationship> = set.iter().cloned().collect();
            edges.push(relationship.clone());
            RelationshipGraph::from_edges(&edges).ensure_parents_acyclic()?;
        }

        set.insert(relationship.clone());
        write_relationships(&self.path, &set)?;
        Ok(true)
    }

    /// How many times the document has been loaded by this store.
    #[must_use]
    pub fn load_count(&self) -> u64 {
        self.load_count.load(Ordering::Relaxed)
    }

    fn load(&self) -> Result<RelationshipSet> {
        self.load_count.fetch_add(1, Ordering::Relaxed);
        read_relationships(&self.path, self.strict_parse)
    }
}

/// Parent-hierarchy subtree rooted at one task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskTree {
    /// Task at this node.
    pub id: TaskId,
    /// Direct children, ordered by identifier.
    pub children: Vec<TaskTree>,
}

/// In-memory relationship graph indexed by qualified task id.
#[derive(Debug, Clone)]
pub struct RelationshipGraph {
    graph: DiGraph<TaskId, RelationshipKind>,
    nodes: HashMap<TaskId, NodeIndex>,
}

impl RelationshipGraph {
    /// Builds the graph from a flat edge list.
    #[must_use]
    pub fn from_edges(edges: &[Relationship]) -> Self {
        let mut graph = DiGraph::new();
        let mut nodes = HashMap::new();

        for edge in edges {
            let from = intern(&mut graph, &mut nodes, &edge.from);
            let to = intern(&mut graph, &mut nodes, &edge.to);
            graph.add_edge(from, to, edge.kind);
        }

        Self { graph, nodes }
    }

    /// Verifies the parent hierarchy is a forest, naming a task on the
    /// cycle otherwise.
    ///
    /// Runs before any hierarchy view is exposed and before a new parent
    /// edge is persisted. Cycles through non-parent kinds are legal.
    ///
    /// # Errors
    /// Returns [`Error::CycleDetected`] if parent edges form a cycle.
    pub fn ensure_parents_acyclic(&self) -> Result<()> {
        let mut parents = DiGraph::<TaskId, ()>::new();
        let mut nodes = HashMap::new();

        for edge in self.graph.edge_references() {
            if *edge.weight() != RelationshipKind::Parent {
                continue;
            }
            let from = intern(&mut parents, &mut nodes, &self.graph[edge.source()]);
            let to = intern(&mut parents, &mut nodes, &self.graph[edge.target()]);
            parents.add_edge(from, to, ());
        }

        match algo::toposort(&parents, None) {
            Ok(_) => Ok(()),
            Err(cycle) => Err(Error::CycleDetected {
                task_id: parents[cycle.node_id()].clone(),
            }),
        }
    }

    /// Direct children of `id` in the parent hierarchy, sorted.
    #[must_use]
    pub fn children_of(&self, id: &TaskId) -> Vec<TaskId> {
        self.parent_neighbors(id, Direction::Outgoing)
    }

    /// Direct parents of `id`, sorted. More than one parent is legal.
    #[must_use]
    pub fn parents_of(&self, id: &TaskId) -> Vec<TaskId> {
        self.parent_neighbors(id, Direction::Incoming)
    }

    /// Hierarchy subtree rooted at `root`.
    ///
    /// # Errors
    /// Returns [`Error::CycleDetected`] if parent edges form a cycle; the
    /// check runs first so the recursion below it terminates.
    pub fn tree_of(&self, root: &TaskId) -> Result<TaskTree> {
        self.ensure_parents_acyclic()?;
        Ok(self.subtree(root))
    }

    fn subtree(&self, id: &TaskId) -> TaskTree {
        let children = self
            .children_of(id)
            .iter()
            .map(|child| self.subtree(child))
            .collect();
        TaskTree {
            id: id.clone(),
            children,
        }
    }

    fn parent_neighbors(&self, id: &TaskId, direction: Direction) -> Vec<TaskId> {
        let Some(&node) = self.nodes.get(id) else {
            return Vec::new();
        };
        let mut found: Vec<TaskId> = self
            .graph
            .edges_directed(node, direction)
            .filter(|edge| *edge.weight() == RelationshipKind::Parent)
            .map(|edge| match direction {
                Direction::Outgoing => self.graph[edge.target()].clone(),
                Direction::Incoming => self.graph[edge.source()].clone(),
            })
            .collect();
        found.sort();
        found
    }
}

fn intern<E>(
    graph: &mut DiGraph<TaskId, E>,
    nodes: &mut HashMap<TaskId, NodeIndex>,
    id: &TaskId,
) -> NodeIndex {
    if let Some(&node) = nodes.get(id) {
        return node;
    }
    let node = graph.add_node(id.clone());
    nodes.insert(id.clone(), node);
    node
}

#[cfg(test)]
#[allow(clippy::expect_used, reason = "Test code is allowed to use expect")]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn id(local: u64) -> TaskId {
        TaskId::new("json", local)
    }

    fn parent(from: u64, to: u64) -> Relationship {
        Relationship::new(id(from), id(to), RelationshipKind::Parent)
    }

    #[test]
    fn test_parent_chain_is_acyclic() {
        let graph = RelationshipGraph::from_edges(&[parent(1, 2), parent(2, 3)]);
        graph.ensure_parents_acyclic().expect("chain has no cycle");
    }

    #[test]
    fn test_parent_cycle_is_detected() {
        let graph = RelationshipGraph::from_edges(&[parent(1, 2), parent(2, 3), parent(3, 1)]);
        match graph.ensure_parents_acyclic() {
            Err(Error::CycleDetected { task_id }) => {
                assert_eq!(task_id.backend(), "json");
                assert!((1..=3).contains(&task_id.local()));
            }
            other => panic!("expected CycleDetected, got {other:?}"),
        }
    }

    #[test]
    fn test_non_parent_cycles_are_legal() {
        let blocks = |from: u64, to: u64| {
            Relationship::new(id(from), id(to), RelationshipKind::Blocks)
        };
        let graph = RelationshipGraph::from_edges(&[blocks(1, 2), blocks(2, 1)]);
        graph
            .ensure_parents_acyclic()
            .expect("non-parent cycles do not count");
    }

    #[test]
    fn test_children_sorted_numerically() {
        let graph = RelationshipGraph::from_edges(&[parent(1, 10), parent(1, 2)]);
        assert_eq!(graph.children_of(&id(1)), vec![id(2), id(10)]);
        assert_eq!(graph.parents_of(&id(10)), vec![id(1)]);
        assert!(graph.children_of(&id(99)).is_empty());
    }

    #[test]
    fn test_tree_of_nests_grandchildren() {
        let graph = RelationshipGraph::from_edges(&[parent(1, 2), parent(1, 3), parent(2, 4)]);
        let tree = graph.tree_of(&id(1)).expect("acyclic");

        assert_eq!(tree.id, id(1));
        assert_eq!(tree.children.len(), 2);
        assert_eq!(tree.children[0].id, id(2));
        assert_eq!(tree.children[1].id, id(3));

        let grandchildren = &tree.children[0].children;
        assert_eq!(grandchildren.len(), 1);
        assert_eq!(grandchildren[0].id, id(4));
        assert!(grandchildren[0].children.is_empty());
    }

    #[test]
    fn test_store_single_load_for_many_tasks() {
        let dir = TempDir::new().expect("create temp dir");
        let store = RelationshipStore::new(RelationshipStore::edges_path(dir.path()), false);
        store.add_edge(&parent(1, 2)).expect("add edge");
        store
            .add_edge(&Relationship::new(id(2), id(3), RelationshipKind::Blocks))
            .expect("add edge");

        let before = store.load_count();
        let edges = store
            .edges_for_tasks(&[id(1), id(2), id(3)])
            .expect("bulk query");
        assert_eq!(edges.len(), 2);
        assert_eq!(store.load_count(), before + 1);
    }

    #[test]
    fn test_store_add_edge_is_idempotent() {
        let dir = TempDir::new().expect("create temp dir");
        let store = RelationshipStore::new(RelationshipStore::edges_path(dir.path()), false);

        assert!(store.add_edge(&parent(1, 2)).expect("first add"));
        assert!(!store.add_edge(&parent(1, 2)).expect("repeat add"));
        assert_eq!(store.all_edges().expect("read back").len(), 1);
    }

    #[test]
    fn test_store_rejects_parent_cycle_without_writing() {
        let dir = TempDir::new().expect("create temp dir");
        let store = RelationshipStore::new(RelationshipStore::edges_path(dir.path()), false);
        store.add_edge(&parent(1, 2)).expect("add edge");
        store.add_edge(&parent(2, 3)).expect("add edge");

        match store.add_edge(&parent(3, 1)) {
            Err(Error::CycleDetected { .. }) => {}
            other => panic!("expected CycleDetected, got {other:?}"),
        }
        assert_eq!(store.all_edges().expect("read back").len(), 2);
    }

    #[test]
    fn test_store_missing_file_is_empty() {
        let dir = TempDir::new().expect("create temp dir");
        let store = RelationshipStore::new(RelationshipStore::edges_path(dir.path()), false);
        assert!(store.edges_for_tasks(&[id(1)]).expect("query").is_empty());
    }
}
