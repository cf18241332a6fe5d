//! The post-extraction pipeline.
//!
//! Stages run strictly in order, each taking the graph by value and handing back the next one:
//! canonicalize, filter kinds and shapes, drop resolver false positives, repair field ownership,
//! restrict to internal files, deduplicate and order.

pub mod canonical;
pub mod false_positive;
pub mod fields;
pub mod order;
pub mod scope;
pub mod shape;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::Result;
use crate::extract::RawGraph;
use crate::output::Diagnostics;
use crate::source::SourceFacts;

use canonical::canonicalize;
use false_positive::filter_false_positives;
use fields::enhance_field_ownership;
use order::{OrderedGraph, dedup_and_order};
use scope::{ScopeRules, restrict_to_internal};
use shape::filter_kinds_and_shapes;

/// How the extractor resolved names. Decides which false-positive rules apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum ResolverKind {
    /// Resolution backed by type information; its edges are trusted as-is.
    #[default]
    #[serde(alias = "depends")]
    #[value(alias = "depends")]
    TypeInformed,
    /// Name-binding resolution without receiver types (stack-graphs style).
    #[serde(alias = "stackgraphs")]
    #[value(alias = "stackgraphs")]
    NameBindingOnly,
}

#[derive(Debug, Clone, Default)]
pub struct PipelineOptions {
    pub resolver: ResolverKind,
    pub filter_false_positives: bool,
    pub scope: ScopeRules,
}

/// Run every stage over `raw`.
///
/// Per-file problems are recorded in the returned diagnostics. Naming collisions and duplicate
/// entity ids abort the run.
pub fn run_pipeline(
    raw: RawGraph,
    facts: &SourceFacts,
    options: &PipelineOptions,
) -> Result<(OrderedGraph, Diagnostics)> {
    let mut diagnostics = Diagnostics {
        resolver: options.resolver,
        raw_documents: raw.documents,
        raw_entities: raw.entity_count(),
        raw_dependencies: raw.dependency_count(),
        extraction_failures: raw.failures.clone(),
        scanned_scopes: facts.scope_count(),
        ..Diagnostics::default()
    };

    let canonical = canonicalize(raw)?;
    info!(
        nodes = canonical.stats.nodes,
        edges = canonical.edges.len(),
        failed_units = canonical.stats.failed_units,
        dangling = canonical.stats.dangling_edges,
        "canonicalized"
    );
    diagnostics.extraction_failures.extend(canonical.failures);
    diagnostics.canonical = canonical.stats;

    let (graph, shape) = filter_kinds_and_shapes(canonical.graph, canonical.edges);
    info!(kept = shape.kept_total(), dropped = shape.dropped_total(), "filtered kinds and shapes");
    diagnostics.shape = shape;

    let (graph, false_positives) =
        filter_false_positives(graph, facts, options.resolver, options.filter_false_positives);
    if false_positives.active {
        info!(dropped = false_positives.dropped_total(), "filtered resolver false positives");
    }
    diagnostics.false_positives = false_positives;

    let (graph, fields) = enhance_field_ownership(graph, facts);
    info!(
        reparented = fields.reparented,
        merged = fields.merged,
        unresolved = fields.unresolved.len(),
        synthesized = fields.synthesized_uses,
        "repaired field ownership"
    );
    diagnostics.fields = fields;

    let (graph, scope) = restrict_to_internal(graph, &options.scope);
    info!(
        external_nodes = scope.external_nodes,
        external_targets = scope.external_targets,
        "restricted to internal scope"
    );
    diagnostics.scope = scope;

    let (ordered, order) = dedup_and_order(graph);
    info!(nodes = order.nodes, edges = order.edges, duplicates = order.duplicate_edges, "ordered");
    diagnostics.order = order;

    Ok((ordered, diagnostics))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::RawDocument;
    use crate::graph::edge::DepKind;
    use crate::graph::node::NodeKind;
    use crate::source::{CallSite, Receiver, ScopeFacts};
    use std::collections::{BTreeSet, HashSet};
    use std::path::Path;

    const MIXED: &str = r#"{
      "entities": [
        {"id": "fa", "kind": "File", "qualifiedName": "app.a", "filePath": "/proj/app/a.py"},
        {"id": "fb", "kind": "File", "qualifiedName": "app.b", "filePath": "app/b.py"},
        {"id": "fos", "kind": "File", "qualifiedName": "os", "filePath": "/usr/lib/python3/os.py"},
        {"id": "cb", "kind": "Class", "qualifiedName": "app.b.Base", "filePath": "app/b.py", "enclosingId": "fb"},
        {"id": "bn", "kind": "Field", "qualifiedName": "app.b.Base.name", "filePath": "app/b.py", "enclosingId": "cb"},
        {"id": "bh", "kind": "Method", "qualifiedName": "app.b.Base.helper", "filePath": "app/b.py", "enclosingId": "cb"},
        {"id": "cx", "kind": "Class", "qualifiedName": "app.b.X", "filePath": "app/b.py", "enclosingId": "fb"},
        {"id": "xh", "kind": "Method", "qualifiedName": "app.b.X.helper", "filePath": "app/b.py", "enclosingId": "cx"},
        {"id": "cc", "kind": "Class", "qualifiedName": "app.a.C", "filePath": "app/a.py", "enclosingId": "fa"},
        {"id": "ci", "kind": "Method", "qualifiedName": "app.a.C.__init__", "filePath": "app/a.py", "enclosingId": "cc", "startLine": 2, "endLine": 3},
        {"id": "fv", "kind": "Field", "qualifiedName": "app.a.C.__init__.value", "filePath": "app/a.py", "enclosingId": "ci"},
        {"id": "cg", "kind": "Method", "qualifiedName": "app.a.C.get", "filePath": "app/a.py", "enclosingId": "cc", "startLine": 5, "endLine": 8}
      ],
      "dependencies": [
        {"sourceId": "fa", "targetId": "fb", "kind": "Import", "lineNumber": 1},
        {"sourceId": "fa", "targetId": "fos", "kind": "Import", "lineNumber": 1},
        {"sourceId": "cc", "targetId": "cb", "kind": "Extend", "lineNumber": 1},
        {"sourceId": "ci", "targetId": "fv", "kind": "Use", "lineNumber": 3},
        {"sourceId": "cg", "targetId": "cc", "kind": "Use", "lineNumber": 6},
        {"sourceId": "cg", "targetId": "bh", "kind": "Call", "lineNumber": 7},
        {"sourceId": "cg", "targetId": "xh", "kind": "Call", "lineNumber": 7},
        {"sourceId": "cg", "targetId": "cb", "kind": "Create", "lineNumber": 6},
        {"sourceId": "cg", "targetId": "cb", "kind": "Create", "lineNumber": 8},
        {"sourceId": "ci", "targetId": "fos", "kind": "Call", "lineNumber": 3},
        {"sourceId": "ci", "targetId": "fa", "kind": "Contain"},
        {"sourceId": "ghost", "targetId": "fa", "kind": "Import"}
      ]
    }"#;

    fn mixed_raw(reverse: bool) -> RawGraph {
        let mut doc: RawDocument = serde_json::from_str(MIXED).expect("fixture parses");
        if reverse {
            doc.entities.reverse();
            doc.dependencies.reverse();
        }
        RawGraph::from_documents(Path::new("/proj"), vec![doc])
    }

    fn mixed_facts() -> SourceFacts {
        let mut facts = SourceFacts::new();
        facts.insert(
            "app/a.py/CLASSES/C/CONSTRUCTORS/__init__",
            ScopeFacts {
                receiver: Some("self".into()),
                self_attributes: ["value".to_string()].into(),
                ..ScopeFacts::default()
            },
        );
        facts.insert(
            "app/a.py/CLASSES/C/METHODS/get",
            ScopeFacts {
                receiver: Some("self".into()),
                self_attributes: ["name".to_string(), "value".to_string()].into(),
                call_sites: vec![CallSite {
                    line: 7,
                    receiver: Receiver::Named("self".into()),
                    callee: "helper".into(),
                }],
                ..ScopeFacts::default()
            },
        );
        facts
    }

    fn options(filter: bool) -> PipelineOptions {
        PipelineOptions {
            resolver: ResolverKind::NameBindingOnly,
            filter_false_positives: filter,
            scope: ScopeRules::default(),
        }
    }

    fn edge_set(graph: &OrderedGraph) -> BTreeSet<(String, String, DepKind)> {
        graph
            .edges
            .iter()
            .map(|e| {
                (
                    graph.nodes[e.source].path.clone(),
                    graph.nodes[e.target].path.clone(),
                    e.kind,
                )
            })
            .collect()
    }

    fn owner_class(graph: &OrderedGraph, mut idx: usize) -> Option<usize> {
        while let Some(p) = graph.nodes[idx].parent {
            if graph.nodes[p].kind == NodeKind::Class {
                return Some(p);
            }
            idx = p;
        }
        None
    }

    #[test]
    fn test_mixed_fixture_output() {
        let (graph, diagnostics) = run_pipeline(mixed_raw(false), &mixed_facts(), &options(true)).unwrap();
        let expected: BTreeSet<(String, String, DepKind)> = [
            ("app/a.py", "app/b.py", DepKind::Import),
            ("app/a.py/CLASSES/C", "app/b.py/CLASSES/Base", DepKind::Extend),
            ("app/a.py/CLASSES/C/CONSTRUCTORS/__init__", "app/a.py/CLASSES/C/FIELDS/value", DepKind::Use),
            ("app/a.py/CLASSES/C/METHODS/get", "app/a.py/CLASSES/C/FIELDS/value", DepKind::Use),
            ("app/a.py/CLASSES/C/METHODS/get", "app/b.py/CLASSES/Base/FIELDS/name", DepKind::Use),
            ("app/a.py/CLASSES/C/METHODS/get", "app/b.py/CLASSES/Base/METHODS/helper", DepKind::Call),
            ("app/a.py/CLASSES/C/METHODS/get", "app/b.py/CLASSES/Base", DepKind::Create),
        ]
        .into_iter()
        .map(|(s, t, k)| (s.to_string(), t.to_string(), k))
        .collect();
        assert_eq!(edge_set(&graph), expected);
        assert_eq!(diagnostics.false_positives.receiver_mismatch, 1);
        assert_eq!(diagnostics.canonical.dangling_edges, 1);
        assert_eq!(diagnostics.shape.non_core_kind.get("Contain"), Some(&1));
        assert_eq!(diagnostics.order.duplicate_edges, 1);
    }

    #[test]
    fn test_output_invariants() {
        let (graph, _) = run_pipeline(mixed_raw(false), &mixed_facts(), &options(false)).unwrap();
        let rules = ScopeRules::default();
        let mut seen = HashSet::new();

        for e in &graph.edges {
            let source = &graph.nodes[e.source];
            let target = &graph.nodes[e.target];
            assert!(e.kind.accepts(source.kind, target.kind), "shape: {} {} -> {}", e.kind, source.path, target.path);
            assert!(rules.is_internal(&target.file), "internality: {}", target.path);
            assert!(seen.insert((e.source, e.target, e.kind)), "duplicate edge {e:?}");
            if e.kind == DepKind::Use {
                let accessor = owner_class(&graph, e.source).expect("Use source has a class");
                let owner = owner_class(&graph, e.target).expect("field has a class");
                let related = accessor == owner
                    || graph.edges.iter().any(|x| {
                        x.kind == DepKind::Extend && x.source == accessor && x.target == owner
                    });
                assert!(related, "self-field: {} -> {}", source.path, target.path);
            }
        }
        assert!(graph.nodes.iter().all(|n| rules.is_internal(&n.file)));
        assert!(graph.nodes.windows(2).all(|w| w[0].path < w[1].path), "nodes sorted and unique");
        assert!(graph.edges.windows(2).all(|w| w[0] < w[1]), "edges sorted");
    }

    #[test]
    fn test_disabled_filter_keeps_false_positive() {
        let (graph, diagnostics) = run_pipeline(mixed_raw(false), &mixed_facts(), &options(false)).unwrap();
        assert!(edge_set(&graph).contains(&(
            "app/a.py/CLASSES/C/METHODS/get".to_string(),
            "app/b.py/CLASSES/X/METHODS/helper".to_string(),
            DepKind::Call
        )));
        assert!(!diagnostics.false_positives.active);
    }

    #[test]
    fn test_input_order_does_not_change_output() {
        let (forward, _) = run_pipeline(mixed_raw(false), &mixed_facts(), &options(true)).unwrap();
        let (reversed, _) = run_pipeline(mixed_raw(true), &mixed_facts(), &options(true)).unwrap();
        assert_eq!(forward, reversed);
    }

    #[test]
    fn test_resolver_kind_names() {
        let parsed: ResolverKind = serde_json::from_str("\"stackgraphs\"").unwrap();
        assert_eq!(parsed, ResolverKind::NameBindingOnly);
        assert_eq!(
            ResolverKind::from_str("depends", true).unwrap(),
            ResolverKind::TypeInformed
        );
    }
}
