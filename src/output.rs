use std::path::Path;

use serde::Serialize;

use crate::error::{ExtractionFailure, PipelineError, Result};
use crate::export::model::{ExportStats, RUN_SUMMARY_FILE};
use crate::export::write_atomic;
use crate::pipeline::ResolverKind;
use crate::pipeline::canonical::CanonicalStats;
use crate::pipeline::false_positive::FalsePositiveStats;
use crate::pipeline::fields::FieldStats;
use crate::pipeline::order::OrderStats;
use crate::pipeline::scope::ScopeStats;
use crate::pipeline::shape::ShapeStats;

/// Counters from every stage of a run. Written to `run_summary.json`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Diagnostics {
    pub resolver: ResolverKind,
    pub raw_documents: usize,
    pub raw_entities: usize,
    pub raw_dependencies: usize,
    /// Raw documents, extractor units, and source files that were skipped.
    pub extraction_failures: Vec<ExtractionFailure>,
    pub scanned_scopes: usize,
    pub canonical: CanonicalStats,
    pub shape: ShapeStats,
    pub false_positives: FalsePositiveStats,
    pub fields: FieldStats,
    pub scope: ScopeStats,
    pub order: OrderStats,
    pub export: ExportStats,
}

#[derive(Serialize)]
struct Summary<'a> {
    #[serde(flatten)]
    diagnostics: &'a Diagnostics,
    /// Wall-clock time for the run in seconds.
    elapsed_secs: f64,
}

/// Write `run_summary.json` into `output_dir`.
///
/// Timing is left out so identical inputs give identical summaries.
pub fn write_run_summary(output_dir: &Path, diagnostics: &Diagnostics) -> Result<()> {
    let target = output_dir.join(RUN_SUMMARY_FILE);
    let mut json =
        serde_json::to_string_pretty(diagnostics).map_err(|e| PipelineError::Serialization {
            path: target.clone(),
            source: std::io::Error::other(e),
        })?;
    json.push('\n');
    write_atomic(&target, json.as_bytes())
}

/// Print a summary of the run.
///
/// - `json = true`: emit a pretty-printed JSON object to stdout.
/// - `json = false`: emit a cargo-style human-readable summary to stdout.
///
/// Skipped inputs are reported on **stderr** so that stdout stays clean for JSON consumers.
pub fn print_summary(diagnostics: &Diagnostics, json: bool, elapsed_secs: f64) {
    if json {
        let summary = Summary {
            diagnostics,
            elapsed_secs,
        };
        match serde_json::to_string_pretty(&summary) {
            Ok(s) => println!("{}", s),
            Err(e) => eprintln!("error serialising summary: {}", e),
        }
        return;
    }

    let d = diagnostics;
    println!(
        "Built DSM from {} raw entities and {} dependencies in {:.2}s",
        d.raw_entities, d.raw_dependencies, elapsed_secs
    );
    println!(
        "  {} nodes, {} edges ({} duplicates collapsed)",
        d.order.nodes, d.order.edges, d.order.duplicate_edges
    );
    println!(
        "  {} edges kept by kind/shape, {} dropped ({} not self-field)",
        d.shape.kept_total(),
        d.shape.dropped_total(),
        d.shape.not_self_field
    );
    if d.false_positives.active {
        println!(
            "  {} false positives removed ({} receiver mismatch, {} def-line call, {} def-line create)",
            d.false_positives.dropped_total(),
            d.false_positives.receiver_mismatch,
            d.false_positives.definition_line_call,
            d.false_positives.definition_line_create,
        );
    }
    println!(
        "  {} fields reparented, {} merged, {} Use edges synthesized",
        d.fields.reparented, d.fields.merged, d.fields.synthesized_uses
    );
    println!(
        "  {} external nodes dropped, {} dangling edges",
        d.scope.external_nodes, d.canonical.dangling_edges
    );
    println!(
        "  Wrote {} documents ({} per-file)",
        d.export.documents, d.export.per_file_documents
    );

    if !d.fields.unresolved.is_empty() {
        eprintln!("  {} fields without an owning class dropped", d.fields.unresolved.len());
    }
    if !d.extraction_failures.is_empty() {
        eprintln!("  {} inputs skipped (read or parse errors)", d.extraction_failures.len());
    }
}
