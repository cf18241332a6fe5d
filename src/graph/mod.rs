pub mod edge;
pub mod node;

use std::collections::{HashMap, HashSet, VecDeque};

use petgraph::Directed;
use petgraph::stable_graph::{NodeIndex, StableGraph};
use petgraph::visit::{EdgeRef, IntoEdgeReferences};

use edge::{DepKind, Dependency};
use node::{Node, NodeKind};

/// The merged dependency graph: a directed petgraph StableGraph keyed by canonical path.
///
/// Stages take a `DepGraph` by value and hand back a new one; no stage keeps a reference to a
/// graph it has already passed on. `StableGraph` keeps indices valid across node removal, so a
/// `NodeIndex` is a stable node id for the lifetime of a run.
#[derive(Debug, Clone, Default)]
pub struct DepGraph {
    pub graph: StableGraph<Node, Dependency, Directed>,
    /// Maps canonical paths to node indices for O(1) lookup.
    pub path_index: HashMap<String, NodeIndex>,
}

impl DepGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node and index it by its canonical path.
    ///
    /// Callers are responsible for path uniqueness; the canonicalizer checks it before insertion.
    pub fn add_node(&mut self, node: Node) -> NodeIndex {
        let path = node.path.clone();
        let idx = self.graph.add_node(node);
        self.path_index.insert(path, idx);
        idx
    }

    pub fn node(&self, idx: NodeIndex) -> &Node {
        &self.graph[idx]
    }

    pub fn find(&self, path: &str) -> Option<NodeIndex> {
        self.path_index.get(path).copied()
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn add_dependency(&mut self, source: NodeIndex, target: NodeIndex, dep: Dependency) {
        self.graph.add_edge(source, target, dep);
    }

    /// True if at least one `kind` edge runs from `source` to `target`.
    pub fn has_dependency(&self, source: NodeIndex, target: NodeIndex, kind: DepKind) -> bool {
        self.graph
            .edges_connecting(source, target)
            .any(|e| e.weight().kind == kind)
    }

    /// Nearest ancestor `Class` of `idx` (excluding `idx` itself).
    pub fn enclosing_class(&self, idx: NodeIndex) -> Option<NodeIndex> {
        let mut current = self.graph[idx].parent;
        while let Some(p) = current {
            let node = &self.graph[p];
            if node.kind == NodeKind::Class {
                return Some(p);
            }
            current = node.parent;
        }
        None
    }

    /// All nodes of `kind`, sorted by canonical path.
    pub fn nodes_of_kind(&self, kind: NodeKind) -> Vec<NodeIndex> {
        let mut out: Vec<NodeIndex> = self
            .graph
            .node_indices()
            .filter(|&i| self.graph[i].kind == kind)
            .collect();
        out.sort_by(|a, b| self.graph[*a].path.cmp(&self.graph[*b].path));
        out
    }

    /// Rebuild `path_index` from the live nodes (after paths were rewritten or nodes removed).
    pub fn reindex(&mut self) {
        self.path_index = self
            .graph
            .node_indices()
            .map(|i| (self.graph[i].path.clone(), i))
            .collect();
    }

    /// Class inheritance derived from the graph's `Extend` edges.
    pub fn inheritance(&self) -> Inheritance {
        let pairs = self
            .graph
            .edge_references()
            .filter(|e| e.weight().kind == DepKind::Extend)
            .map(|e| (e.source(), e.target()));
        Inheritance::from_pairs(self, pairs)
    }
}

/// Class -> direct base classes, with deterministic (path-sorted) traversal.
#[derive(Debug, Clone, Default)]
pub struct Inheritance {
    bases: HashMap<NodeIndex, Vec<NodeIndex>>,
}

impl Inheritance {
    /// Build from `(derived, base)` pairs. Base lists are deduplicated and sorted by path.
    pub fn from_pairs(
        graph: &DepGraph,
        pairs: impl IntoIterator<Item = (NodeIndex, NodeIndex)>,
    ) -> Self {
        let mut bases: HashMap<NodeIndex, Vec<NodeIndex>> = HashMap::new();
        for (derived, base) in pairs {
            if derived != base {
                bases.entry(derived).or_default().push(base);
            }
        }
        for list in bases.values_mut() {
            list.sort_by(|a, b| graph.node(*a).path.cmp(&graph.node(*b).path));
            list.dedup();
        }
        Self { bases }
    }

    /// `class` followed by its ancestors in breadth-first order. Cycles are tolerated.
    pub fn ancestors_or_self(&self, class: NodeIndex) -> Vec<NodeIndex> {
        let mut seen: HashSet<NodeIndex> = HashSet::new();
        let mut order = Vec::new();
        let mut queue = VecDeque::from([class]);
        while let Some(current) = queue.pop_front() {
            if !seen.insert(current) {
                continue;
            }
            order.push(current);
            if let Some(bases) = self.bases.get(&current) {
                queue.extend(bases.iter().copied());
            }
        }
        order
    }

    /// True if `ancestor` is `class` or one of its (transitive) bases.
    pub fn is_ancestor_or_self(&self, ancestor: NodeIndex, class: NodeIndex) -> bool {
        self.ancestors_or_self(class).contains(&ancestor)
    }

    /// True if the two classes are the same or one inherits from the other.
    pub fn related(&self, a: NodeIndex, b: NodeIndex) -> bool {
        self.is_ancestor_or_self(a, b) || self.is_ancestor_or_self(b, a)
    }
}
