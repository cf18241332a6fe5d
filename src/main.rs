mod cli;
mod config;
mod error;
mod export;
mod extract;
mod graph;
mod output;
mod pipeline;
mod source;
mod walker;

use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt};

use cli::{Cli, Commands};
use config::DsmConfig;
use export::export_dsm;
use export::model::ExportOptions;
use extract::load_raw_graph;
use output::{print_summary, write_run_summary};
use pipeline::scope::ScopeRules;
use pipeline::{PipelineOptions, run_pipeline};
use source::SourceFacts;

/// Log to stderr so stdout stays clean for `--json`. `RUST_LOG` wins over `--verbose`.
fn init_logging(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "info" }));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            raw,
            root,
            output,
            resolver,
            no_false_positive_filter,
            include_self_edges,
            json,
            verbose,
        } => {
            init_logging(verbose);
            let start = Instant::now();

            let root = root
                .canonicalize()
                .with_context(|| format!("cannot open project root {}", root.display()))?;
            let config = DsmConfig::load(&root);
            let options = PipelineOptions {
                resolver: resolver.or(config.resolver).unwrap_or_default(),
                filter_false_positives: !no_false_positive_filter
                    && config.filter_false_positives.unwrap_or(true),
                scope: ScopeRules::from_config(&config),
            };

            let raw_graph = load_raw_graph(&raw, &root)?;
            let (facts, scan_failures) = SourceFacts::scan(&root, &config);
            let (graph, mut diagnostics) = run_pipeline(raw_graph, &facts, &options)?;
            diagnostics.extraction_failures.extend(scan_failures);

            let project_name = root
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "project".to_owned());
            let export_options = ExportOptions {
                output_dir: output.clone(),
                project_name,
                include_self_edges: include_self_edges
                    || config.include_self_edges.unwrap_or(false),
            };
            diagnostics.export = export_dsm(&graph, &export_options)?;
            write_run_summary(&output, &diagnostics)?;

            print_summary(&diagnostics, json, start.elapsed().as_secs_f64());
        }
    }

    Ok(())
}
