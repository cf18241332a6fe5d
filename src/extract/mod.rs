//! Raw extractor output: record types and the loader that merges documents into a [`RawGraph`].

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use rayon::prelude::*;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{ExtractionFailure, PipelineError, Result};
use crate::walker::walk_raw_documents;

/// Entity kinds the extractor may report. Anything else deserializes to `Other`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum RawEntityKind {
    File,
    Module,
    Function,
    Class,
    Constructor,
    Method,
    Field,
    #[serde(other)]
    Other,
}

/// One entity record as emitted by the extractor.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawEntity {
    pub id: String,
    pub kind: RawEntityKind,
    /// Dotted name; only the last segment is used for naming.
    pub qualified_name: String,
    pub file_path: String,
    #[serde(default)]
    pub enclosing_id: Option<String>,
    #[serde(default)]
    pub start_line: Option<u32>,
    #[serde(default)]
    pub end_line: Option<u32>,
}

impl RawEntity {
    /// Last segment of the qualified name.
    pub fn leaf_name(&self) -> &str {
        self.qualified_name
            .rsplit(['.', ':'])
            .find(|s| !s.is_empty())
            .unwrap_or(&self.qualified_name)
    }
}

/// One dependency record as emitted by the extractor. `kind` is kept verbatim; the
/// kind/shape filter decides what survives.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawDependency {
    pub source_id: String,
    pub target_id: String,
    pub kind: String,
    #[serde(default)]
    pub line_number: Option<u32>,
}

/// A single extractor output document.
#[derive(Debug, Default, Deserialize)]
pub struct RawDocument {
    #[serde(default)]
    pub entities: Vec<RawEntity>,
    #[serde(default)]
    pub dependencies: Vec<RawDependency>,
}

/// All records belonging to one source file.
#[derive(Debug, Clone, Default)]
pub struct FileExtract {
    /// Normalized file path (see [`normalize_file_path`]).
    pub file: String,
    pub entities: Vec<RawEntity>,
    /// Dependencies whose source entity lives in this file.
    pub dependencies: Vec<RawDependency>,
}

/// The merged extractor output for a run. Immutable once built.
#[derive(Debug, Default)]
pub struct RawGraph {
    /// Per-file units, sorted by file path.
    pub files: Vec<FileExtract>,
    /// Dependencies whose source id matches no entity.
    pub orphan_dependencies: Vec<RawDependency>,
    /// Documents that could not be read or parsed.
    pub failures: Vec<ExtractionFailure>,
    /// Number of documents successfully merged.
    pub documents: usize,
}

impl RawGraph {
    /// Merge parsed documents into per-file units.
    ///
    /// Entities are grouped by normalized `filePath`; dependencies follow their source entity.
    pub fn from_documents(root: &Path, documents: Vec<RawDocument>) -> Self {
        let mut units: BTreeMap<String, FileExtract> = BTreeMap::new();
        let mut owner_of: HashMap<String, String> = HashMap::new();
        let mut dependencies = Vec::new();
        let count = documents.len();

        for doc in documents {
            for entity in doc.entities {
                let file = normalize_file_path(root, &entity.file_path);
                owner_of.entry(entity.id.clone()).or_insert_with(|| file.clone());
                units
                    .entry(file.clone())
                    .or_insert_with(|| FileExtract {
                        file,
                        ..FileExtract::default()
                    })
                    .entities
                    .push(entity);
            }
            dependencies.extend(doc.dependencies);
        }

        let mut orphan_dependencies = Vec::new();
        for dep in dependencies {
            match owner_of.get(&dep.source_id).and_then(|f| units.get_mut(f)) {
                Some(unit) => unit.dependencies.push(dep),
                None => orphan_dependencies.push(dep),
            }
        }

        Self {
            files: units.into_values().collect(),
            orphan_dependencies,
            failures: Vec::new(),
            documents: count,
        }
    }

    pub fn entity_count(&self) -> usize {
        self.files.iter().map(|f| f.entities.len()).sum()
    }

    pub fn dependency_count(&self) -> usize {
        self.files.iter().map(|f| f.dependencies.len()).sum::<usize>() + self.orphan_dependencies.len()
    }
}

/// Load extractor output from a single JSON document or a directory of them.
///
/// Documents are parsed in parallel. A document that cannot be read or parsed is recorded as an
/// [`ExtractionFailure`] and skipped. Fails with [`PipelineError::NoInput`] only when nothing at
/// all could be loaded.
pub fn load_raw_graph(input: &Path, root: &Path) -> Result<RawGraph> {
    let paths = if input.is_dir() {
        walk_raw_documents(input)
    } else {
        vec![input.to_path_buf()]
    };

    let parsed: Vec<std::result::Result<RawDocument, ExtractionFailure>> = paths
        .par_iter()
        .map(|path| parse_document(path))
        .collect();

    let mut documents = Vec::new();
    let mut failures = Vec::new();
    for result in parsed {
        match result {
            Ok(doc) => documents.push(doc),
            Err(failure) => {
                warn!("skipping raw document: {failure}");
                failures.push(failure);
            }
        }
    }

    if documents.is_empty() {
        return Err(PipelineError::NoInput(input.to_path_buf()));
    }

    let mut graph = RawGraph::from_documents(root, documents);
    graph.failures = failures;
    debug!(
        documents = graph.documents,
        files = graph.files.len(),
        entities = graph.entity_count(),
        dependencies = graph.dependency_count(),
        "merged raw extractor output"
    );
    Ok(graph)
}

fn parse_document(path: &Path) -> std::result::Result<RawDocument, ExtractionFailure> {
    let origin = path.display().to_string();
    let bytes = std::fs::read(path).map_err(|e| ExtractionFailure::new(&origin, e.to_string()))?;
    serde_json::from_slice(&bytes).map_err(|e| ExtractionFailure::new(&origin, e.to_string()))
}

/// Normalize an extractor file path against the analyzed root.
///
/// Backslashes become `/`, a leading `./` is dropped, and absolute paths under `root` are made
/// relative. Absolute paths outside `root` are kept absolute so they are recognizably external.
pub fn normalize_file_path(root: &Path, raw: &str) -> String {
    let unified = raw.replace('\\', "/");
    let as_path = Path::new(&unified);
    let relative = if as_path.is_absolute() {
        match as_path.strip_prefix(root) {
            Ok(rel) => rel.to_string_lossy().replace('\\', "/"),
            Err(_) => unified.clone(),
        }
    } else {
        unified.clone()
    };

    let mut trimmed = relative.as_str();
    while let Some(rest) = trimmed.strip_prefix("./") {
        trimmed = rest;
    }
    trimmed.trim_end_matches('/').to_owned()
}
