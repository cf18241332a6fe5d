//! Canonical naming: raw extractor entities become [`Node`]s keyed by a hierarchical path.
//!
//! Units (one per source file) are validated and named in parallel; the merge into a single
//! [`DepGraph`] is sequential and is where cross-file failures (duplicate ids, path collisions)
//! are detected.

use std::collections::HashMap;

use petgraph::stable_graph::NodeIndex;
use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{ExtractionFailure, PipelineError, Result};
use crate::extract::{FileExtract, RawEntityKind, RawGraph};
use crate::graph::DepGraph;
use crate::graph::node::{LineSpan, Node, NodeKind};

// ---------------------------------------------------------------------------
// Naming scheme
// ---------------------------------------------------------------------------

/// Python's constructor hooks.
pub fn is_constructor_name(name: &str) -> bool {
    matches!(name, "__init__" | "__new__")
}

/// Kind of a `def` found directly inside a container.
pub fn callable_kind(in_class: bool, name: &str) -> NodeKind {
    match (in_class, is_constructor_name(name)) {
        (true, true) => NodeKind::Constructor,
        (true, false) => NodeKind::Method,
        (false, _) => NodeKind::Function,
    }
}

/// Path of a `kind` entity named `name` whose nearest container path is `container`.
///
/// `container` is the file path for top-level entities (files and modules add no segment).
pub fn child_path(container: &str, kind: NodeKind, name: &str) -> String {
    let segment = match kind {
        NodeKind::File => return container.to_owned(),
        NodeKind::Module => return format!("{container}/module"),
        NodeKind::Function => "FUNCTIONS",
        NodeKind::Class => "CLASSES",
        NodeKind::Constructor => "CONSTRUCTORS",
        NodeKind::Method => "METHODS",
        NodeKind::Field => "FIELDS",
    };
    format!("{container}/{segment}/{name}")
}

// ---------------------------------------------------------------------------
// Stage output
// ---------------------------------------------------------------------------

/// A raw dependency whose endpoints were both canonicalized. Its kind is still unvetted.
#[derive(Debug, Clone)]
pub struct CanonicalEdge {
    pub source: NodeIndex,
    pub target: NodeIndex,
    pub kind: String,
    pub line: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CanonicalStats {
    pub units: usize,
    pub failed_units: usize,
    pub nodes: usize,
    /// Entities of kinds outside the model, folded into their container.
    pub transparent_entities: usize,
    /// Dependencies with an endpoint that did not survive canonicalization.
    pub dangling_edges: usize,
}

#[derive(Debug)]
pub struct Canonicalized {
    pub graph: DepGraph,
    pub edges: Vec<CanonicalEdge>,
    pub failures: Vec<ExtractionFailure>,
    pub stats: CanonicalStats,
}

// ---------------------------------------------------------------------------
// Per-file naming
// ---------------------------------------------------------------------------

struct UnitNode {
    raw_id: String,
    kind: NodeKind,
    name: String,
    path: String,
    /// Index into the unit's node list.
    parent: Option<usize>,
    span: Option<LineSpan>,
}

struct CanonicalUnit {
    nodes: Vec<UnitNode>,
    transparent: usize,
}

#[derive(Clone, Copy)]
enum Slot {
    Pending,
    Node(usize),
    /// Folded entity; children attach to this container instead.
    Transparent(Option<usize>),
}

fn canonicalize_unit(unit: &FileExtract) -> std::result::Result<CanonicalUnit, ExtractionFailure> {
    let fail = |reason: String| ExtractionFailure::new(&unit.file, reason);
    let entities = &unit.entities;

    let file_entities: Vec<usize> = entities
        .iter()
        .enumerate()
        .filter(|(_, e)| e.kind == RawEntityKind::File)
        .map(|(i, _)| i)
        .collect();
    let &[file_idx] = file_entities.as_slice() else {
        return Err(fail(format!(
            "expected exactly one File entity, found {}",
            file_entities.len()
        )));
    };

    let mut by_id: HashMap<&str, usize> = HashMap::new();
    for (i, e) in entities.iter().enumerate() {
        by_id.entry(e.id.as_str()).or_insert(i);
    }

    let mut parent_of = Vec::with_capacity(entities.len());
    for (i, e) in entities.iter().enumerate() {
        let parent = if i == file_idx {
            None
        } else {
            match e.enclosing_id.as_deref() {
                None => Some(file_idx),
                Some(id) => match by_id.get(id) {
                    Some(&p) => Some(p),
                    None => {
                        return Err(fail(format!(
                            "enclosing entity {id} of {} is not in this file",
                            e.id
                        )));
                    }
                },
            }
        };
        parent_of.push(parent);
    }

    // Depth doubles as the cycle check: a chain longer than the entity count must loop.
    let mut depth = vec![0usize; entities.len()];
    for (i, d) in depth.iter_mut().enumerate() {
        let mut current = parent_of[i];
        while let Some(p) = current {
            *d += 1;
            if *d > entities.len() {
                return Err(fail(format!("containment cycle through {}", entities[i].id)));
            }
            current = parent_of[p];
        }
    }
    let mut order: Vec<usize> = (0..entities.len()).collect();
    order.sort_by_key(|&i| (depth[i], i));

    let mut slots = vec![Slot::Pending; entities.len()];
    let mut nodes: Vec<UnitNode> = Vec::new();
    let mut transparent = 0;

    for i in order {
        let raw = &entities[i];
        let container = match parent_of[i].map(|p| slots[p]) {
            None | Some(Slot::Pending) => None,
            Some(Slot::Node(n)) => Some(n),
            Some(Slot::Transparent(c)) => c,
        };
        let container_node = container.map(|n| &nodes[n]);
        let in_class = container_node.is_some_and(|c| c.kind == NodeKind::Class);
        let name = raw.leaf_name();

        let kind = match raw.kind {
            RawEntityKind::File => NodeKind::File,
            RawEntityKind::Module => NodeKind::Module,
            RawEntityKind::Class => NodeKind::Class,
            RawEntityKind::Field => NodeKind::Field,
            RawEntityKind::Constructor if in_class => NodeKind::Constructor,
            RawEntityKind::Function | RawEntityKind::Method | RawEntityKind::Constructor => {
                callable_kind(in_class, name)
            }
            RawEntityKind::Other => {
                slots[i] = Slot::Transparent(container);
                transparent += 1;
                continue;
            }
        };

        let base = match container_node {
            Some(c) if !c.kind.is_transparent_container() => c.path.as_str(),
            _ => unit.file.as_str(),
        };
        let (path, name) = match kind {
            NodeKind::File => (unit.file.clone(), unit.file.clone()),
            NodeKind::Module => (child_path(&unit.file, kind, name), "module".to_owned()),
            _ => (child_path(base, kind, name), name.to_owned()),
        };

        let span = raw.start_line.map(|start| LineSpan {
            start,
            end: raw.end_line.unwrap_or(start).max(start),
        });

        slots[i] = Slot::Node(nodes.len());
        nodes.push(UnitNode {
            raw_id: raw.id.clone(),
            kind,
            name,
            path,
            parent: container,
            span,
        });
    }

    Ok(CanonicalUnit { nodes, transparent })
}

// ---------------------------------------------------------------------------
// Merge
// ---------------------------------------------------------------------------

/// Canonicalize every unit of `raw` and merge them into one graph.
///
/// A unit that fails validation is dropped and reported; raw ids defined twice and distinct
/// entities sharing a path abort the run.
pub fn canonicalize(raw: RawGraph) -> Result<Canonicalized> {
    let RawGraph {
        files,
        orphan_dependencies,
        ..
    } = raw;

    let results: Vec<_> = files.par_iter().map(canonicalize_unit).collect();

    let mut graph = DepGraph::new();
    let mut by_raw_id: HashMap<String, NodeIndex> = HashMap::new();
    let mut failures = Vec::new();
    let mut stats = CanonicalStats {
        units: files.len(),
        ..CanonicalStats::default()
    };
    let mut dependencies = Vec::new();

    for (unit, result) in files.into_iter().zip(results) {
        let canonical = match result {
            Ok(c) => c,
            Err(failure) => {
                warn!("dropping {failure}");
                failures.push(failure);
                stats.failed_units += 1;
                dependencies.extend(unit.dependencies);
                continue;
            }
        };

        stats.transparent_entities += canonical.transparent;
        let mut local: Vec<NodeIndex> = Vec::with_capacity(canonical.nodes.len());
        for n in canonical.nodes {
            if let Some(&prev) = by_raw_id.get(&n.raw_id) {
                return Err(PipelineError::DuplicateEntityId {
                    id: n.raw_id,
                    first_file: graph.node(prev).file.clone(),
                    second_file: unit.file.clone(),
                });
            }
            if let Some(existing) = graph.find(&n.path) {
                return Err(PipelineError::NamingCollision {
                    path: n.path,
                    first: graph.node(existing).raw_id.clone(),
                    second: n.raw_id,
                });
            }
            let idx = graph.add_node(Node {
                kind: n.kind,
                name: n.name,
                path: n.path,
                file: unit.file.clone(),
                parent: n.parent.map(|p| local[p]),
                span: n.span,
                raw_id: n.raw_id.clone(),
            });
            by_raw_id.insert(n.raw_id, idx);
            local.push(idx);
        }
        dependencies.extend(unit.dependencies);
    }

    let mut edges = Vec::with_capacity(dependencies.len());
    for dep in dependencies.into_iter().chain(orphan_dependencies) {
        match (by_raw_id.get(&dep.source_id), by_raw_id.get(&dep.target_id)) {
            (Some(&source), Some(&target)) => edges.push(CanonicalEdge {
                source,
                target,
                kind: dep.kind,
                line: dep.line_number,
            }),
            _ => {
                debug!("dangling {} edge {} -> {}", dep.kind, dep.source_id, dep.target_id);
                stats.dangling_edges += 1;
            }
        }
    }

    stats.nodes = graph.node_count();
    Ok(Canonicalized {
        graph,
        edges,
        failures,
        stats,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::RawDocument;
    use std::path::Path;

    fn raw(json: &str) -> RawGraph {
        let doc: RawDocument = serde_json::from_str(json).expect("valid raw document");
        RawGraph::from_documents(Path::new("/proj"), vec![doc])
    }

    fn paths(c: &Canonicalized) -> Vec<String> {
        let mut out: Vec<String> = c.graph.path_index.keys().cloned().collect();
        out.sort();
        out
    }

    #[test]
    fn test_child_path_segments() {
        assert_eq!(child_path("a.py", NodeKind::Class, "C"), "a.py/CLASSES/C");
        assert_eq!(
            child_path("a.py/CLASSES/C", NodeKind::Constructor, "__init__"),
            "a.py/CLASSES/C/CONSTRUCTORS/__init__"
        );
        assert_eq!(child_path("a.py", NodeKind::Module, "a"), "a.py/module");
    }

    #[test]
    fn test_canonical_paths_and_kind_normalization() {
        let c = canonicalize(raw(
            r#"{"entities": [
                {"id": "f", "kind": "File", "qualifiedName": "a", "filePath": "a.py"},
                {"id": "m", "kind": "Module", "qualifiedName": "a", "filePath": "a.py"},
                {"id": "c", "kind": "Class", "qualifiedName": "a.C", "filePath": "a.py", "enclosingId": "m"},
                {"id": "i", "kind": "Method", "qualifiedName": "a.C.__init__", "filePath": "a.py", "enclosingId": "c"},
                {"id": "g", "kind": "Function", "qualifiedName": "a.C.get", "filePath": "a.py", "enclosingId": "c"},
                {"id": "v", "kind": "Field", "qualifiedName": "a.C.__init__.value", "filePath": "a.py", "enclosingId": "i"},
                {"id": "h", "kind": "Method", "qualifiedName": "a.helper", "filePath": "a.py", "enclosingId": "m"}
            ]}"#,
        ))
        .unwrap();
        assert_eq!(
            paths(&c),
            vec![
                "a.py",
                "a.py/CLASSES/C",
                "a.py/CLASSES/C/CONSTRUCTORS/__init__",
                "a.py/CLASSES/C/CONSTRUCTORS/__init__/FIELDS/value",
                "a.py/CLASSES/C/METHODS/get",
                "a.py/FUNCTIONS/helper",
                "a.py/module",
            ]
        );
        let helper = c.graph.find("a.py/FUNCTIONS/helper").unwrap();
        assert_eq!(c.graph.node(helper).kind, NodeKind::Function, "method outside a class is a function");
    }

    #[test]
    fn test_unknown_kinds_are_transparent() {
        let c = canonicalize(raw(
            r#"{"entities": [
                {"id": "f", "kind": "File", "qualifiedName": "a", "filePath": "a.py"},
                {"id": "b", "kind": "Block", "qualifiedName": "a.block", "filePath": "a.py"},
                {"id": "k", "kind": "Class", "qualifiedName": "a.K", "filePath": "a.py", "enclosingId": "b"}
            ]}"#,
        ))
        .unwrap();
        assert!(c.graph.find("a.py/CLASSES/K").is_some(), "paths: {:?}", paths(&c));
        assert_eq!(c.stats.transparent_entities, 1);
    }

    #[test]
    fn test_invalid_unit_is_isolated() {
        let c = canonicalize(raw(
            r#"{"entities": [
                {"id": "fa", "kind": "File", "qualifiedName": "a", "filePath": "a.py"},
                {"id": "x", "kind": "Class", "qualifiedName": "a.X", "filePath": "a.py", "enclosingId": "nowhere"},
                {"id": "fb", "kind": "File", "qualifiedName": "b", "filePath": "b.py"}
            ],
            "dependencies": [{"sourceId": "fb", "targetId": "fa", "kind": "Import"}]}"#,
        ))
        .unwrap();
        assert_eq!(c.failures.len(), 1);
        assert_eq!(c.failures[0].origin, "a.py");
        assert_eq!(paths(&c), vec!["b.py"]);
        assert_eq!(c.stats.dangling_edges, 1, "edge into the dropped unit dangles");
    }

    #[test]
    fn test_containment_cycle_is_a_failure() {
        let c = canonicalize(raw(
            r#"{"entities": [
                {"id": "f", "kind": "File", "qualifiedName": "a", "filePath": "a.py"},
                {"id": "p", "kind": "Class", "qualifiedName": "a.P", "filePath": "a.py", "enclosingId": "q"},
                {"id": "q", "kind": "Class", "qualifiedName": "a.Q", "filePath": "a.py", "enclosingId": "p"}
            ]}"#,
        ))
        .unwrap();
        assert_eq!(c.failures.len(), 1);
        assert!(c.failures[0].reason.contains("cycle"), "{}", c.failures[0].reason);
    }

    #[test]
    fn test_naming_collision_is_fatal() {
        let err = canonicalize(raw(
            r#"{"entities": [
                {"id": "f", "kind": "File", "qualifiedName": "a", "filePath": "a.py"},
                {"id": "c1", "kind": "Class", "qualifiedName": "a.C", "filePath": "a.py"},
                {"id": "c2", "kind": "Class", "qualifiedName": "a.C", "filePath": "a.py"}
            ]}"#,
        ))
        .unwrap_err();
        match err {
            PipelineError::NamingCollision { path, first, second } => {
                assert_eq!(path, "a.py/CLASSES/C");
                assert_eq!((first.as_str(), second.as_str()), ("c1", "c2"));
            }
            other => panic!("expected NamingCollision, got {other:?}"),
        }
    }

    #[test]
    fn test_duplicate_id_across_files_is_fatal() {
        let err = canonicalize(raw(
            r#"{"entities": [
                {"id": "f", "kind": "File", "qualifiedName": "a", "filePath": "a.py"},
                {"id": "f", "kind": "File", "qualifiedName": "b", "filePath": "b.py"}
            ]}"#,
        ))
        .unwrap_err();
        assert!(matches!(err, PipelineError::DuplicateEntityId { .. }), "{err}");
    }
}
