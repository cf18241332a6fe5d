//! Removal of edges that name-binding resolvers are known to get wrong.
//!
//! A name-binding resolver binds `recv.helper()` to every visible `helper` it can reach, without
//! knowing the type of `recv`. It also attributes references on a `def` line (decorators,
//! signature annotations) to the function being defined. The rules here drop such edges only when
//! the scanned source gives a concrete reason to; an edge without a signal is kept.

use std::collections::HashMap;

use petgraph::stable_graph::{EdgeIndex, NodeIndex};
use petgraph::visit::{EdgeRef, IntoEdgeReferences};
use serde::Serialize;
use tracing::debug;

use super::ResolverKind;
use crate::graph::edge::DepKind;
use crate::graph::node::NodeKind;
use crate::graph::{DepGraph, Inheritance};
use crate::source::{Receiver, SourceFacts, StaticType};

#[derive(Debug, Clone, Default, Serialize)]
pub struct FalsePositiveStats {
    pub active: bool,
    pub receiver_mismatch: usize,
    pub definition_line_call: usize,
    pub definition_line_create: usize,
}

impl FalsePositiveStats {
    pub fn dropped_total(&self) -> usize {
        self.receiver_mismatch + self.definition_line_call + self.definition_line_create
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Reason {
    ReceiverMismatch,
    DefinitionLineCall,
    DefinitionLineCreate,
}

struct Context<'a> {
    graph: &'a DepGraph,
    facts: &'a SourceFacts,
    inheritance: Inheritance,
    classes_by_name: HashMap<&'a str, Vec<NodeIndex>>,
}

/// Drop resolver false positives. A no-op unless the resolver is name-binding only and the
/// filter is enabled.
pub fn filter_false_positives(
    mut graph: DepGraph,
    facts: &SourceFacts,
    resolver: ResolverKind,
    enabled: bool,
) -> (DepGraph, FalsePositiveStats) {
    let mut stats = FalsePositiveStats::default();
    if resolver != ResolverKind::NameBindingOnly || !enabled {
        return (graph, stats);
    }
    stats.active = true;

    let doomed: Vec<(EdgeIndex, Reason)> = {
        let mut classes_by_name: HashMap<&str, Vec<NodeIndex>> = HashMap::new();
        for class in graph.nodes_of_kind(NodeKind::Class) {
            classes_by_name
                .entry(graph.node(class).name.as_str())
                .or_default()
                .push(class);
        }
        let ctx = Context {
            graph: &graph,
            facts,
            inheritance: graph.inheritance(),
            classes_by_name,
        };
        graph
            .graph
            .edge_references()
            .filter_map(|e| {
                let dep = e.weight();
                ctx.judge(e.source(), e.target(), dep.kind, dep.line)
                    .map(|r| (e.id(), r))
            })
            .collect()
    };

    for (edge, reason) in doomed {
        if let Some((source, target)) = graph.graph.edge_endpoints(edge) {
            debug!(
                "false positive ({reason:?}): {} -> {}",
                graph.node(source).path,
                graph.node(target).path
            );
        }
        graph.graph.remove_edge(edge);
        match reason {
            Reason::ReceiverMismatch => stats.receiver_mismatch += 1,
            Reason::DefinitionLineCall => stats.definition_line_call += 1,
            Reason::DefinitionLineCreate => stats.definition_line_create += 1,
        }
    }

    (graph, stats)
}

impl Context<'_> {
    fn judge(&self, source: NodeIndex, target: NodeIndex, kind: DepKind, line: Option<u32>) -> Option<Reason> {
        match kind {
            DepKind::Call => {
                if self.is_definition_line_call(source, target, line) {
                    Some(Reason::DefinitionLineCall)
                } else if self.is_receiver_mismatch(source, target, line) {
                    Some(Reason::ReceiverMismatch)
                } else {
                    None
                }
            }
            DepKind::Create if self.is_definition_line_create(source, target, line) => {
                Some(Reason::DefinitionLineCreate)
            }
            _ => None,
        }
    }

    /// A call between two methods of one class, reported on the caller's `def` line, where the
    /// source has no such call on that line.
    fn is_definition_line_call(&self, source: NodeIndex, target: NodeIndex, line: Option<u32>) -> bool {
        let (Some(line), Some(span)) = (line, self.graph.node(source).span) else {
            return false;
        };
        if !span.is_boundary(line) {
            return false;
        }
        let class = self.graph.enclosing_class(source);
        if class.is_none() || class != self.graph.enclosing_class(target) {
            return false;
        }
        let Some(scope) = self.facts.scope(&self.graph.node(source).path) else {
            return false;
        };
        scope
            .calls_to(&self.graph.node(target).name, Some(line))
            .next()
            .is_none()
    }

    /// A method creating its own class on its `def` line without a constructor call there.
    fn is_definition_line_create(&self, source: NodeIndex, target: NodeIndex, line: Option<u32>) -> bool {
        let (Some(line), Some(span)) = (line, self.graph.node(source).span) else {
            return false;
        };
        if !span.is_boundary(line) || self.graph.enclosing_class(source) != Some(target) {
            return false;
        }
        let Some(scope) = self.facts.scope(&self.graph.node(source).path) else {
            return false;
        };
        scope
            .calls_to(&self.graph.node(target).name, Some(line))
            .next()
            .is_none()
    }

    /// Every call site matching the edge has a known receiver type, and none of those types is
    /// related by inheritance to the class owning the resolved target.
    fn is_receiver_mismatch(&self, source: NodeIndex, target: NodeIndex, line: Option<u32>) -> bool {
        let Some(scope) = self.facts.scope(&self.graph.node(source).path) else {
            return false;
        };
        let Some(target_class) = self.graph.enclosing_class(target) else {
            return false;
        };
        let sites: Vec<_> = scope.calls_to(&self.graph.node(target).name, line).collect();
        if sites.is_empty() {
            return false;
        }

        sites.iter().all(|site| {
            let Receiver::Named(receiver) = &site.receiver else {
                return false;
            };
            let candidates: Vec<NodeIndex> = match scope.receiver_type(receiver, site.line) {
                None => return false,
                Some(StaticType::EnclosingClass) => match self.graph.enclosing_class(source) {
                    Some(class) => vec![class],
                    None => return false,
                },
                Some(StaticType::Named(name)) => match self.classes_by_name.get(name) {
                    Some(classes) => classes.clone(),
                    None => return false,
                },
            };
            !candidates
                .iter()
                .any(|&c| self.inheritance.related(c, target_class))
        })
    }
}
