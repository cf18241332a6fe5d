use std::collections::HashSet;
use std::path::{Component, Path};

use petgraph::stable_graph::NodeIndex;
use serde::Serialize;
use tracing::debug;

use crate::config::DsmConfig;
use crate::graph::DepGraph;
use crate::walker::{matches_any_pattern, path_in_third_party_dir};

/// Which normalized file paths belong to the analyzed project.
#[derive(Debug, Clone, Default)]
pub struct ScopeRules {
    pub exclude: Vec<String>,
    pub focus: Option<String>,
}

impl ScopeRules {
    pub fn from_config(config: &DsmConfig) -> Self {
        Self {
            exclude: config.exclude.clone().unwrap_or_default(),
            focus: config
                .focus
                .as_deref()
                .map(|f| f.trim_start_matches("./").to_owned())
                .filter(|f| !f.is_empty()),
        }
    }

    /// A file is internal when its path is root-relative, never leaves the root, is not under a
    /// third-party directory, is not excluded, and lies under the focus directory if one is set.
    pub fn is_internal(&self, file: &str) -> bool {
        let path = Path::new(file);
        if path.is_absolute() || path.components().any(|c| c == Component::ParentDir) {
            return false;
        }
        if path_in_third_party_dir(path) || matches_any_pattern(path, &self.exclude) {
            return false;
        }
        self.focus.as_deref().is_none_or(|f| path.starts_with(f))
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ScopeStats {
    pub external_nodes: usize,
    pub external_targets: usize,
    /// Internal targets reached only from an external source.
    pub external_sources: usize,
}

/// Remove external nodes and every edge touching one.
pub fn restrict_to_internal(mut graph: DepGraph, rules: &ScopeRules) -> (DepGraph, ScopeStats) {
    let mut stats = ScopeStats::default();
    let external: HashSet<NodeIndex> = graph
        .graph
        .node_indices()
        .filter(|&idx| !rules.is_internal(&graph.node(idx).file))
        .collect();

    for edge in graph.graph.edge_indices() {
        let Some((source, target)) = graph.graph.edge_endpoints(edge) else {
            continue;
        };
        if external.contains(&target) {
            stats.external_targets += 1;
        } else if external.contains(&source) {
            stats.external_sources += 1;
        }
    }

    let mut doomed: Vec<NodeIndex> = external.into_iter().collect();
    doomed.sort();
    for idx in doomed {
        if graph.node(idx).parent.is_none() {
            debug!("external file {}", graph.node(idx).file);
        }
        graph.graph.remove_node(idx);
        stats.external_nodes += 1;
    }
    graph.reindex();
    (graph, stats)
}
