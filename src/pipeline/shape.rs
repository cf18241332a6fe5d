use std::collections::BTreeMap;

use serde::Serialize;
use tracing::debug;

use super::canonical::CanonicalEdge;
use crate::graph::edge::{DepKind, Dependency};
use crate::graph::{DepGraph, Inheritance};

/// Classification counts. Every input edge lands in exactly one bucket.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ShapeStats {
    pub input: usize,
    pub kept: BTreeMap<String, usize>,
    /// Keyed by the raw kind string.
    pub non_core_kind: BTreeMap<String, usize>,
    pub shape_violation: BTreeMap<String, usize>,
    /// `Use` edges that are not self-field accesses.
    pub not_self_field: usize,
}

impl ShapeStats {
    pub fn kept_total(&self) -> usize {
        self.kept.values().sum()
    }

    pub fn dropped_total(&self) -> usize {
        self.non_core_kind.values().sum::<usize>()
            + self.shape_violation.values().sum::<usize>()
            + self.not_self_field
    }
}

/// Keep only core-kind edges whose endpoints match the shape table, inserting them into `graph`.
///
/// `Use` edges must additionally target a field owned by the source's class or one of its
/// ancestors. Ancestry comes from the `Extend` edges that pass the shape check themselves.
pub fn filter_kinds_and_shapes(mut graph: DepGraph, edges: Vec<CanonicalEdge>) -> (DepGraph, ShapeStats) {
    let mut stats = ShapeStats {
        input: edges.len(),
        ..ShapeStats::default()
    };

    let mut shaped = Vec::with_capacity(edges.len());
    for edge in edges {
        let Some(kind) = DepKind::parse(&edge.kind) else {
            *stats.non_core_kind.entry(edge.kind).or_default() += 1;
            continue;
        };
        let source = graph.node(edge.source).kind;
        let target = graph.node(edge.target).kind;
        if !kind.accepts(source, target) {
            debug!(
                "shape violation: {kind} {} -> {}",
                graph.node(edge.source).path,
                graph.node(edge.target).path
            );
            *stats.shape_violation.entry(kind.to_string()).or_default() += 1;
            continue;
        }
        shaped.push((edge, kind));
    }

    let inheritance = Inheritance::from_pairs(
        &graph,
        shaped
            .iter()
            .filter(|(_, kind)| *kind == DepKind::Extend)
            .map(|(e, _)| (e.source, e.target)),
    );

    for (edge, kind) in shaped {
        if kind == DepKind::Use && !is_self_field_access(&graph, &inheritance, &edge) {
            stats.not_self_field += 1;
            continue;
        }
        graph.add_dependency(
            edge.source,
            edge.target,
            Dependency {
                kind,
                line: edge.line,
            },
        );
        *stats.kept.entry(kind.to_string()).or_default() += 1;
    }

    (graph, stats)
}

fn is_self_field_access(graph: &DepGraph, inheritance: &Inheritance, edge: &CanonicalEdge) -> bool {
    match (graph.enclosing_class(edge.source), graph.enclosing_class(edge.target)) {
        (Some(accessor), Some(owner)) => inheritance.is_ancestor_or_self(owner, accessor),
        _ => false,
    }
}
