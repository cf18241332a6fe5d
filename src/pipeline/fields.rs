//! Field ownership repair.
//!
//! Fields that only exist through `self.x = ...` assignments tend to be reported as children of
//! the method doing the assignment, and reads of them from other methods tend to be missing.
//! Two passes fix that, both heuristic: `self.x` is assumed to mean the class's own field `x`.
//!
//! 1. [`reparent_fields`] moves every field to its nearest enclosing class.
//! 2. [`synthesize_field_uses`] adds `Use` edges from methods whose body mentions
//!    `<receiver>.<name>` to an existing field `name` of their class or an ancestor.
//!
//! Neither pass creates a field node.

use std::collections::{BTreeMap, HashMap};

use petgraph::Direction;
use petgraph::stable_graph::NodeIndex;
use petgraph::visit::EdgeRef;
use serde::Serialize;
use tracing::debug;

use super::canonical::child_path;
use crate::graph::DepGraph;
use crate::graph::edge::{DepKind, Dependency};
use crate::graph::node::NodeKind;
use crate::source::SourceFacts;

#[derive(Debug, Clone, Default, Serialize)]
pub struct FieldStats {
    pub reparented: usize,
    /// Fields folded into another field with the same reparented path.
    pub merged: usize,
    /// Paths of fields without an owning class, removed with their edges.
    pub unresolved: Vec<String>,
    pub synthesized_uses: usize,
}

/// Run both passes.
pub fn enhance_field_ownership(graph: DepGraph, facts: &SourceFacts) -> (DepGraph, FieldStats) {
    let mut stats = FieldStats::default();
    let graph = reparent_fields(graph, &mut stats);
    let graph = synthesize_field_uses(graph, facts, &mut stats);
    (graph, stats)
}

/// Move fields recorded under a callable to their nearest enclosing class.
///
/// Fields landing on the same path merge into one survivor: the field already declared in the
/// class body if there is one, otherwise the one with the smallest original path. Idempotent.
pub fn reparent_fields(mut graph: DepGraph, stats: &mut FieldStats) -> DepGraph {
    let mut moves: BTreeMap<String, (NodeIndex, Vec<NodeIndex>)> = BTreeMap::new();
    let mut unresolved = Vec::new();

    for field in graph.nodes_of_kind(NodeKind::Field) {
        let node = graph.node(field);
        let parent_is_class = node
            .parent
            .is_some_and(|p| graph.node(p).kind == NodeKind::Class);
        if parent_is_class {
            continue;
        }
        match graph.enclosing_class(field) {
            Some(class) => {
                let path = child_path(&graph.node(class).path, NodeKind::Field, &node.name);
                // nodes_of_kind is path-sorted, so the first entry has the smallest path
                moves.entry(path).or_insert((class, Vec::new())).1.push(field);
            }
            None => unresolved.push(field),
        }
    }

    for field in unresolved {
        let path = graph.node(field).path.clone();
        debug!("unresolved field ownership: {path}");
        graph.graph.remove_node(field);
        graph.path_index.remove(&path);
        stats.unresolved.push(path);
    }

    for (path, (class, fields)) in moves {
        let (survivor, merged) = match graph.find(&path) {
            Some(declared) => (declared, fields.as_slice()),
            None => match fields.split_first() {
                Some((&first, rest)) => (first, rest),
                None => continue,
            },
        };
        for &field in merged {
            redirect_edges(&mut graph, field, survivor);
            graph.graph.remove_node(field);
            stats.merged += 1;
        }
        if graph.node(survivor).parent != Some(class) {
            let node = &mut graph.graph[survivor];
            debug!("reparent field {} -> {path}", node.path);
            node.parent = Some(class);
            node.path = path;
            stats.reparented += 1;
        }
    }

    graph.reindex();
    graph
}

fn redirect_edges(graph: &mut DepGraph, from: NodeIndex, to: NodeIndex) {
    let incoming: Vec<(NodeIndex, Dependency)> = graph
        .graph
        .edges_directed(from, Direction::Incoming)
        .map(|e| (e.source(), *e.weight()))
        .collect();
    let outgoing: Vec<(NodeIndex, Dependency)> = graph
        .graph
        .edges_directed(from, Direction::Outgoing)
        .map(|e| (e.target(), *e.weight()))
        .collect();
    for (source, dep) in incoming {
        graph.add_dependency(source, to, dep);
    }
    for (target, dep) in outgoing {
        graph.add_dependency(to, target, dep);
    }
}

/// Add `Use` edges for `<receiver>.<name>` accesses the extractor missed.
///
/// Names are looked up in the method's class first, then its ancestors breadth-first.
pub fn synthesize_field_uses(mut graph: DepGraph, facts: &SourceFacts, stats: &mut FieldStats) -> DepGraph {
    let inheritance = graph.inheritance();

    let mut fields_by_class: HashMap<NodeIndex, HashMap<&str, NodeIndex>> = HashMap::new();
    for field in graph.nodes_of_kind(NodeKind::Field) {
        let node = graph.node(field);
        if let Some(class) = node.parent {
            fields_by_class
                .entry(class)
                .or_default()
                .insert(node.name.as_str(), field);
        }
    }

    let mut callables = graph.nodes_of_kind(NodeKind::Method);
    callables.extend(graph.nodes_of_kind(NodeKind::Constructor));
    callables.sort_by(|a, b| graph.node(*a).path.cmp(&graph.node(*b).path));

    let mut additions = Vec::new();
    for callable in callables {
        let Some(scope) = facts.scope(&graph.node(callable).path) else {
            continue;
        };
        if scope.receiver.is_none() {
            continue;
        }
        let Some(class) = graph.enclosing_class(callable) else {
            continue;
        };
        let lineage = inheritance.ancestors_or_self(class);
        for attr in &scope.self_attributes {
            let field = lineage
                .iter()
                .find_map(|c| fields_by_class.get(c).and_then(|f| f.get(attr.as_str())));
            if let Some(&field) = field
                && !graph.has_dependency(callable, field, DepKind::Use)
            {
                additions.push((callable, field));
            }
        }
    }

    for (callable, field) in additions {
        debug!(
            "synthesized Use {} -> {}",
            graph.node(callable).path,
            graph.node(field).path
        );
        graph.add_dependency(
            callable,
            field,
            Dependency {
                kind: DepKind::Use,
                line: None,
            },
        );
        stats.synthesized_uses += 1;
    }
    graph
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::test_support::GraphBuilder;
    use crate::source::ScopeFacts;

    fn attrs(names: &[&str]) -> ScopeFacts {
        ScopeFacts {
            receiver: Some("self".into()),
            self_attributes: names.iter().map(|n| n.to_string()).collect(),
            ..ScopeFacts::default()
        }
    }

    fn field_paths(graph: &DepGraph) -> Vec<String> {
        graph
            .nodes_of_kind(NodeKind::Field)
            .into_iter()
            .map(|f| graph.node(f).path.clone())
            .collect()
    }

    #[test]
    fn test_reparent_and_synthesize() {
        let mut b = GraphBuilder::new();
        let f = b.file("A.py");
        let c = b.class(f, "C");
        let init = b.constructor(c, "init");
        let get = b.method(c, "get");
        let value = b.field(init, "value");

        let mut facts = SourceFacts::new();
        facts.insert(b.graph.node(init).path.clone(), attrs(&["value"]));
        facts.insert(b.graph.node(get).path.clone(), attrs(&["value"]));

        let (graph, stats) = enhance_field_ownership(b.graph, &facts);
        assert_eq!(field_paths(&graph), vec!["A.py/CLASSES/C/FIELDS/value"]);
        assert_eq!(graph.node(value).parent, Some(c));
        assert!(graph.has_dependency(init, value, DepKind::Use));
        assert!(graph.has_dependency(get, value, DepKind::Use));
        assert_eq!(stats.reparented, 1);
        assert_eq!(stats.synthesized_uses, 2);
    }

    #[test]
    fn test_reparent_merges_onto_declared_field() {
        let mut b = GraphBuilder::new();
        let f = b.file("a.py");
        let c = b.class(f, "C");
        let declared = b.field(c, "x");
        let init = b.constructor(c, "__init__");
        let reset = b.method(c, "reset");
        let from_init = b.field(init, "x");
        let from_reset = b.field(reset, "x");
        let get = b.method(c, "get");
        b.edge(get, from_reset, DepKind::Use);

        let mut stats = FieldStats::default();
        let graph = reparent_fields(b.graph, &mut stats);
        assert_eq!(field_paths(&graph), vec!["a.py/CLASSES/C/FIELDS/x"]);
        assert_eq!(graph.find("a.py/CLASSES/C/FIELDS/x"), Some(declared));
        assert!(!graph.graph.contains_node(from_init));
        assert!(!graph.graph.contains_node(from_reset));
        assert!(graph.has_dependency(get, declared, DepKind::Use), "edges follow the survivor");
        assert_eq!(stats.merged, 2);
    }

    #[test]
    fn test_reparent_survivor_is_smallest_path() {
        let mut b = GraphBuilder::new();
        let f = b.file("a.py");
        let c = b.class(f, "C");
        let reset = b.method(c, "reset");
        let init = b.constructor(c, "__init__");
        let from_reset = b.field(reset, "x");
        let from_init = b.field(init, "x");

        let mut stats = FieldStats::default();
        let graph = reparent_fields(b.graph, &mut stats);
        // CONSTRUCTORS sorts before METHODS
        assert_eq!(graph.find("a.py/CLASSES/C/FIELDS/x"), Some(from_init));
        assert!(!graph.graph.contains_node(from_reset));
    }

    #[test]
    fn test_reparent_is_idempotent() {
        let mut b = GraphBuilder::new();
        let f = b.file("a.py");
        let c = b.class(f, "C");
        let init = b.constructor(c, "__init__");
        b.field(init, "x");

        let mut stats = FieldStats::default();
        let once = reparent_fields(b.graph, &mut stats);
        let paths_once = field_paths(&once);
        let mut again = FieldStats::default();
        let twice = reparent_fields(once, &mut again);
        assert_eq!(field_paths(&twice), paths_once);
        assert_eq!(again.reparented + again.merged, 0, "second pass must change nothing");
    }

    #[test]
    fn test_module_level_field_is_unresolved() {
        let mut b = GraphBuilder::new();
        let f = b.file("a.py");
        let helper = b.function(f, "setup");
        let stray = b.field(helper, "x");
        let c = b.class(f, "C");
        let m = b.method(c, "m");
        b.edge(m, stray, DepKind::Use);

        let (graph, stats) = enhance_field_ownership(b.graph, &SourceFacts::new());
        assert_eq!(stats.unresolved, vec!["a.py/FUNCTIONS/setup/FIELDS/x".to_string()]);
        assert!(!graph.graph.contains_node(stray));
        assert_eq!(graph.edge_count(), 0);
    }

    #[test]
    fn test_synthesis_prefers_own_class_then_ancestors() {
        let mut b = GraphBuilder::new();
        let f = b.file("a.py");
        let base = b.class(f, "Base");
        let derived = b.class(f, "Derived");
        let base_name = b.field(base, "name");
        let base_size = b.field(base, "size");
        let own_size = b.field(derived, "size");
        let m = b.method(derived, "describe");
        b.edge(derived, base, DepKind::Extend);

        let mut facts = SourceFacts::new();
        facts.insert(b.graph.node(m).path.clone(), attrs(&["name", "size", "missing"]));
        let (graph, stats) = enhance_field_ownership(b.graph, &facts);
        assert!(graph.has_dependency(m, base_name, DepKind::Use));
        assert!(graph.has_dependency(m, own_size, DepKind::Use));
        assert!(!graph.has_dependency(m, base_size, DepKind::Use), "own field shadows the base field");
        assert_eq!(stats.synthesized_uses, 2, "no field is invented for `missing`");
        assert_eq!(graph.nodes_of_kind(NodeKind::Field).len(), 3);
    }

    #[test]
    fn test_static_method_gets_no_synthesized_edges() {
        let mut b = GraphBuilder::new();
        let f = b.file("a.py");
        let c = b.class(f, "C");
        b.field(c, "x");
        let s = b.method(c, "make");
        let mut facts = SourceFacts::new();
        facts.insert(b.graph.node(s).path.clone(), ScopeFacts::default());
        let (graph, stats) = enhance_field_ownership(b.graph, &facts);
        assert_eq!(stats.synthesized_uses, 0);
        assert_eq!(graph.edge_count(), 0);
    }
}
