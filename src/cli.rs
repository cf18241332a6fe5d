use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::pipeline::ResolverKind;

/// Turn raw code-dependency facts into a deterministic architecture DSM.
///
/// arch-dsm reads extractor output for a Python project, cleans it up (canonical names,
/// kind/shape filtering, field ownership repair, resolver false-positive removal, internal
/// scoping), and writes versioned DSM documents.
#[derive(Parser, Debug)]
#[command(
    name = "arch-dsm",
    version,
    about,
    long_about = None,
    propagate_version = true,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the pipeline and write full, file-level, and per-file DSM documents.
    Run {
        /// Extractor output: a JSON document or a directory of them.
        #[arg(long)]
        raw: PathBuf,

        /// Root of the analyzed project. Sources are scanned here and `arch-dsm.toml` is read
        /// from here.
        #[arg(long)]
        root: PathBuf,

        /// Directory the DSM documents are written to.
        #[arg(short, long)]
        output: PathBuf,

        /// Resolver that produced the raw output (overrides the config file).
        #[arg(long, value_enum)]
        resolver: Option<ResolverKind>,

        /// Keep resolver false positives (for side-by-side comparison).
        #[arg(long)]
        no_false_positive_filter: bool,

        /// Keep intra-file pairs in the file-level DSM.
        #[arg(long)]
        include_self_edges: bool,

        /// Print the run summary as JSON instead of human-readable text.
        #[arg(long)]
        json: bool,

        /// Log individual drops and repairs.
        #[arg(short, long)]
        verbose: bool,
    },
}
