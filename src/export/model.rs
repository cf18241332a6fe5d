use std::path::PathBuf;

use serde::Serialize;

use crate::graph::edge::DepKind;
use crate::graph::node::NodeKind;

/// DSM wire format version written as `@schemaVersion`.
pub const SCHEMA_VERSION: &str = "1.0";

pub const FULL_DSM_FILE: &str = "dependencies.full.dsm.json";
pub const FILE_LEVEL_DSM_FILE: &str = "dependencies.file-level.dsm.json";
/// Directory (under the output dir) holding one fragment per source file.
pub const PER_FILE_DIR: &str = "per_file";
pub const PER_FILE_SUFFIX: &str = ".dsm.json";
pub const RUN_SUMMARY_FILE: &str = "run_summary.json";

/// One DSM document. Ids are dense and local to the document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DsmDocument {
    #[serde(rename = "@schemaVersion")]
    pub schema_version: &'static str,
    pub name: String,
    pub variables: Vec<Variable>,
    pub cells: Vec<Cell>,
}

impl DsmDocument {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            name: name.into(),
            variables: Vec::new(),
            cells: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Variable {
    pub id: usize,
    /// Canonical path.
    pub name: String,
    pub kind: NodeKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Cell {
    pub src: usize,
    pub dst: usize,
    pub kind: DepKind,
    pub weight: usize,
}

/// Parameters controlling DSM export.
#[derive(Debug, Clone)]
pub struct ExportOptions {
    pub output_dir: PathBuf,
    /// Value of every document's `name`.
    pub project_name: String,
    /// Keep intra-file pairs in the file-level document.
    pub include_self_edges: bool,
}

/// A document serialized and ready to be written.
#[derive(Debug, Clone)]
pub struct RenderedDocument {
    /// Path relative to the output directory.
    pub relative_path: PathBuf,
    pub contents: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ExportStats {
    pub documents: usize,
    pub per_file_documents: usize,
    pub full_variables: usize,
    pub full_cells: usize,
    pub file_level_cells: usize,
}
