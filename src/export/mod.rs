pub mod model;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;
use tracing::{debug, info};

use crate::error::{PipelineError, Result};
use crate::graph::node::NodeKind;
use crate::pipeline::order::OrderedGraph;

use model::{
    Cell, DsmDocument, ExportOptions, ExportStats, FILE_LEVEL_DSM_FILE, FULL_DSM_FILE, PER_FILE_DIR,
    PER_FILE_SUFFIX, RenderedDocument, Variable,
};

/// Render every DSM document for `graph` and write them under `options.output_dir`.
///
/// Steps:
/// 1. Build the full, file-level, and per-file documents in memory.
/// 2. Serialize all of them; a sanitized name collision fails here, before any write.
/// 3. Write each document atomically.
pub fn export_dsm(graph: &OrderedGraph, options: &ExportOptions) -> Result<ExportStats> {
    let full = build_full(graph, &options.project_name);
    let file_level = build_file_level(graph, &options.project_name, options.include_self_edges);
    let per_file = build_per_file(graph);

    let mut stats = ExportStats {
        full_variables: full.variables.len(),
        full_cells: full.cells.len(),
        file_level_cells: file_level.cells.len(),
        per_file_documents: per_file.len(),
        ..ExportStats::default()
    };

    let mut rendered = vec![
        render(&options.output_dir, PathBuf::from(FULL_DSM_FILE), &full)?,
        render(&options.output_dir, PathBuf::from(FILE_LEVEL_DSM_FILE), &file_level)?,
    ];
    let mut claimed: HashMap<String, &str> = HashMap::new();
    for (file, doc) in &per_file {
        let name = format!("{}{PER_FILE_SUFFIX}", sanitize_file_name(file));
        let relative = Path::new(PER_FILE_DIR).join(&name);
        if let Some(previous) = claimed.insert(name, file) {
            return Err(PipelineError::Serialization {
                path: options.output_dir.join(relative),
                source: std::io::Error::new(
                    std::io::ErrorKind::AlreadyExists,
                    format!("per-file fragments of {previous} and {file} share a name"),
                ),
            });
        }
        rendered.push(render(&options.output_dir, relative, doc)?);
    }

    for doc in &rendered {
        write_atomic(&options.output_dir.join(&doc.relative_path), doc.contents.as_bytes())?;
    }
    stats.documents = rendered.len();
    info!(
        documents = stats.documents,
        dir = %options.output_dir.display(),
        "wrote DSM documents"
    );
    Ok(stats)
}

// ---------------------------------------------------------------------------
// Document builders
// ---------------------------------------------------------------------------

/// Every node as a variable, every edge as a weight-1 cell.
pub fn build_full(graph: &OrderedGraph, name: &str) -> DsmDocument {
    let mut doc = DsmDocument::new(name);
    doc.variables = graph
        .nodes
        .iter()
        .enumerate()
        .map(|(id, n)| Variable {
            id,
            name: n.path.clone(),
            kind: n.kind,
            parent: n.parent,
        })
        .collect();
    doc.cells = graph
        .edges
        .iter()
        .map(|e| Cell {
            src: e.source,
            dst: e.target,
            kind: e.kind,
            weight: 1,
        })
        .collect();
    doc
}

/// Files only. A cell's weight counts the entity-level edges collapsed onto it.
pub fn build_file_level(graph: &OrderedGraph, name: &str, include_self_edges: bool) -> DsmDocument {
    let files: Vec<&str> = graph
        .nodes
        .iter()
        .filter(|n| n.kind == NodeKind::File)
        .map(|n| n.path.as_str())
        .collect();
    let local: HashMap<&str, usize> = files.iter().enumerate().map(|(i, f)| (*f, i)).collect();

    let mut weights = BTreeMap::new();
    for e in &graph.edges {
        let (Some(&src), Some(&dst)) = (
            local.get(graph.nodes[e.source].file.as_str()),
            local.get(graph.nodes[e.target].file.as_str()),
        ) else {
            continue;
        };
        if src == dst && !include_self_edges {
            continue;
        }
        *weights.entry((src, dst, e.kind)).or_insert(0usize) += 1;
    }

    let mut doc = DsmDocument::new(name);
    doc.variables = files
        .iter()
        .enumerate()
        .map(|(id, f)| Variable {
            id,
            name: (*f).to_owned(),
            kind: NodeKind::File,
            parent: None,
        })
        .collect();
    doc.cells = weights
        .into_iter()
        .map(|((src, dst, kind), weight)| Cell { src, dst, kind, weight })
        .collect();
    doc
}

/// One fragment per file: edges touching the file, their endpoints, and every ancestor of those.
pub fn build_per_file(graph: &OrderedGraph) -> Vec<(String, DsmDocument)> {
    graph
        .file_positions()
        .into_iter()
        .collect::<BTreeMap<_, _>>()
        .into_iter()
        .map(|(file, file_pos)| {
            let edges: Vec<_> = graph
                .edges
                .iter()
                .filter(|e| graph.nodes[e.source].file == file || graph.nodes[e.target].file == file)
                .collect();

            let mut members = BTreeSet::from([file_pos]);
            for e in &edges {
                for mut pos in [e.source, e.target] {
                    while members.insert(pos) {
                        match graph.nodes[pos].parent {
                            Some(parent) => pos = parent,
                            None => break,
                        }
                    }
                }
            }
            let local: HashMap<usize, usize> =
                members.iter().enumerate().map(|(id, &pos)| (pos, id)).collect();

            let mut doc = DsmDocument::new(file);
            doc.variables = members
                .iter()
                .map(|&pos| {
                    let n = &graph.nodes[pos];
                    Variable {
                        id: local[&pos],
                        name: n.path.clone(),
                        kind: n.kind,
                        parent: n.parent.and_then(|p| local.get(&p).copied()),
                    }
                })
                .collect();
            doc.cells = edges
                .iter()
                .map(|e| Cell {
                    src: local[&e.source],
                    dst: local[&e.target],
                    kind: e.kind,
                    weight: 1,
                })
                .collect();
            (file.to_owned(), doc)
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Serialization
// ---------------------------------------------------------------------------

/// Flatten a file path into a single file name: anything outside `[A-Za-z0-9._-]` becomes `_`.
pub fn sanitize_file_name(file: &str) -> String {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"[^A-Za-z0-9._-]").unwrap());
    re.replace_all(file, "_").into_owned()
}

fn render(output_dir: &Path, relative_path: PathBuf, value: &impl Serialize) -> Result<RenderedDocument> {
    let mut contents = serde_json::to_string_pretty(value).map_err(|e| PipelineError::Serialization {
        path: output_dir.join(&relative_path),
        source: std::io::Error::other(e),
    })?;
    contents.push('\n');
    Ok(RenderedDocument {
        relative_path,
        contents,
    })
}

/// Write `bytes` to `target` via a temp file in the same directory and a rename.
///
/// A failure never leaves a partial file at `target`.
pub fn write_atomic(target: &Path, bytes: &[u8]) -> Result<()> {
    let fail = |source: std::io::Error| PipelineError::Serialization {
        path: target.to_path_buf(),
        source,
    };
    let dir = target.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir).map_err(fail)?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(fail)?;
    tmp.write_all(bytes).map_err(fail)?;
    tmp.as_file().flush().map_err(fail)?;
    tmp.persist(target).map_err(|e| fail(e.error))?;
    debug!("wrote {}", target.display());
    Ok(())
}
