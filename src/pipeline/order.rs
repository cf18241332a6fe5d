use std::collections::{BTreeSet, HashMap};

use petgraph::stable_graph::NodeIndex;
use petgraph::visit::{EdgeRef, IntoEdgeReferences};
use serde::Serialize;

use crate::graph::DepGraph;
use crate::graph::edge::DepKind;
use crate::graph::node::NodeKind;

/// A node in final order. Its position in [`OrderedGraph::nodes`] is its id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderedNode {
    pub path: String,
    pub kind: NodeKind,
    pub file: String,
    pub parent: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct OrderedEdge {
    pub source: usize,
    pub target: usize,
    pub kind: DepKind,
}

/// The deduplicated, totally ordered result of the pipeline.
///
/// Nodes are sorted by canonical path; edges by `(source, target, kind)` over node positions.
/// Nothing here depends on hash or insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderedGraph {
    pub nodes: Vec<OrderedNode>,
    pub edges: Vec<OrderedEdge>,
}

impl OrderedGraph {
    /// Position of every `File` node keyed by file path.
    pub fn file_positions(&self) -> HashMap<&str, usize> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.kind == NodeKind::File)
            .map(|(i, n)| (n.path.as_str(), i))
            .collect()
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct OrderStats {
    pub nodes: usize,
    pub edges: usize,
    pub duplicate_edges: usize,
}

/// Collapse repeated `(source, target, kind)` triples and fix the output order.
pub fn dedup_and_order(graph: DepGraph) -> (OrderedGraph, OrderStats) {
    let mut indices: Vec<NodeIndex> = graph.graph.node_indices().collect();
    indices.sort_by(|a, b| graph.node(*a).path.cmp(&graph.node(*b).path));

    let position: HashMap<NodeIndex, usize> = indices
        .iter()
        .enumerate()
        .map(|(pos, &idx)| (idx, pos))
        .collect();

    let nodes: Vec<OrderedNode> = indices
        .iter()
        .map(|&idx| {
            let node = graph.node(idx);
            OrderedNode {
                path: node.path.clone(),
                kind: node.kind,
                file: node.file.clone(),
                parent: node.parent.and_then(|p| position.get(&p).copied()),
            }
        })
        .collect();

    let unique: BTreeSet<OrderedEdge> = graph
        .graph
        .edge_references()
        .map(|e| OrderedEdge {
            source: position[&e.source()],
            target: position[&e.target()],
            kind: e.weight().kind,
        })
        .collect();

    let stats = OrderStats {
        nodes: nodes.len(),
        edges: unique.len(),
        duplicate_edges: graph.edge_count() - unique.len(),
    };
    (
        OrderedGraph {
            nodes,
            edges: unique.into_iter().collect(),
        },
        stats,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::test_support::GraphBuilder;

    #[test]
    fn test_dedup_and_order() {
        let mut b = GraphBuilder::new();
        let z = b.file("z.py");
        let a = b.file("a.py");
        let c = b.class(a, "C");
        let m = b.method(c, "m");
        b.edge_at(m, c, DepKind::Create, Some(3));
        b.edge_at(m, c, DepKind::Create, Some(9));
        b.edge(z, a, DepKind::Import);
        b.edge(a, z, DepKind::Import);

        let (ordered, stats) = dedup_and_order(b.graph);
        let paths: Vec<&str> = ordered.nodes.iter().map(|n| n.path.as_str()).collect();
        assert_eq!(paths, vec!["a.py", "a.py/CLASSES/C", "a.py/CLASSES/C/METHODS/m", "z.py"]);
        assert_eq!(stats.duplicate_edges, 1, "call-site multiplicity collapses");
        assert_eq!(
            ordered.edges,
            vec![
                OrderedEdge { source: 0, target: 3, kind: DepKind::Import },
                OrderedEdge { source: 2, target: 1, kind: DepKind::Create },
                OrderedEdge { source: 3, target: 0, kind: DepKind::Import },
            ]
        );
        assert_eq!(ordered.nodes[2].parent, Some(1));
        assert_eq!(ordered.file_positions().get("z.py"), Some(&3));
    }
}
