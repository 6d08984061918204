// Persisted model: builds and their test trees.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use time::PrimitiveDateTime;

use crate::domain::call::CallRecord;
use crate::domain::stats::{DurationStats, InterfaceData};

/// Tag under which a leaf's ordered call list is stored.
pub const TRACE_KEY: &str = "trace";

/// Identity of a build: one import per (project, revision).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BuildKey {
    pub project: String,
    pub revision: String,
}

impl BuildKey {
    pub fn new(project: impl Into<String>, revision: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            revision: revision.into(),
        }
    }

    /// `project \0 revision`, so all builds of a project share a key prefix.
    pub fn storage_key(&self) -> Vec<u8> {
        let mut key = Self::project_prefix(&self.project);
        key.extend_from_slice(self.revision.as_bytes());
        key
    }

    pub fn project_prefix(project: &str) -> Vec<u8> {
        let mut key = Vec::with_capacity(project.len() + 1);
        key.extend_from_slice(project.as_bytes());
        key.push(0);
        key
    }

    /// Key of a leaf's trace: `project \0 revision \0 label \0 trace`.
    pub fn trace_key(&self, label: &str) -> Vec<u8> {
        let mut key = self.storage_key();
        key.push(0);
        key.extend_from_slice(label.as_bytes());
        key.push(0);
        key.extend_from_slice(TRACE_KEY.as_bytes());
        key
    }
}

impl fmt::Display for BuildKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.project, self.revision)
    }
}

/// One import run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Build {
    pub key: BuildKey,
    pub datetime: PrimitiveDateTime,
    pub tags: Vec<String>,
    /// Number of leaves.
    pub num_tests: usize,
    /// Sum of leaf durations, seconds.
    pub total_duration: f64,
}

/// Index of a node inside its [`TestTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeKind {
    /// Came straight from a test record and owns a trace.
    Leaf,
    /// Synthesized dotted-prefix grouping with aggregated statistics.
    Branch,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestNode {
    pub label: String,
    pub description: String,
    pub kind: NodeKind,
    /// Descendant leaves; 0 for a leaf.
    pub num_tests: usize,
    pub duration: DurationStats,
    pub data: InterfaceData,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
}

impl TestNode {
    pub fn is_leaf(&self) -> bool {
        self.kind == NodeKind::Leaf
    }

    /// Leaves a node stands for: itself for a leaf.
    pub fn leaf_count(&self) -> usize {
        match self.kind {
            NodeKind::Leaf => 1,
            NodeKind::Branch => self.num_tests,
        }
    }

    /// Calls recorded against `interface`, 0 when the node never touched it.
    pub fn calls(&self, interface: &str) -> u64 {
        self.data.get(interface).map(|s| s.mean_calls).unwrap_or(0)
    }
}

/// Arena of test nodes, ordered by label, with explicit parent/child links.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TestTree {
    nodes: Vec<TestNode>,
    by_label: BTreeMap<String, NodeId>,
}

impl TestTree {
    pub(crate) fn from_nodes(nodes: Vec<TestNode>) -> Self {
        let by_label = nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.label.clone(), NodeId(i)))
            .collect();
        Self { nodes, by_label }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> &[TestNode] {
        &self.nodes
    }

    pub fn node(&self, id: NodeId) -> &TestNode {
        &self.nodes[id.0]
    }

    pub fn id_of(&self, label: &str) -> Option<NodeId> {
        self.by_label.get(label).copied()
    }

    pub fn get(&self, label: &str) -> Option<&TestNode> {
        self.id_of(label).map(|id| self.node(id))
    }

    pub fn parent(&self, node: &TestNode) -> Option<&TestNode> {
        node.parent.map(|id| self.node(id))
    }

    pub fn children<'a>(&'a self, node: &'a TestNode) -> impl Iterator<Item = &'a TestNode> + 'a {
        node.children.iter().map(move |id| self.node(*id))
    }

    pub fn roots(&self) -> impl Iterator<Item = &TestNode> {
        self.nodes.iter().filter(|n| n.parent.is_none())
    }

    pub fn leaves(&self) -> impl Iterator<Item = &TestNode> {
        self.nodes.iter().filter(|n| n.is_leaf())
    }

    /// Walk parent links from `label` (exclusive) up to its root.
    pub fn ancestors<'a>(&'a self, label: &str) -> impl Iterator<Item = &'a TestNode> + 'a {
        let mut next = self.get(label).and_then(|n| n.parent);
        std::iter::from_fn(move || {
            let node = self.node(next?);
            next = node.parent;
            Some(node)
        })
    }
}

/// Everything one import writes, replaced as a unit.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildSnapshot {
    pub build: Build,
    pub tree: TestTree,
    /// Leaf label -> ordered trace.
    pub traces: BTreeMap<String, Vec<CallRecord>>,
}
