//! Event-list correlator for `dump_historic_ops` JSON documents.

pub mod correlate;
pub mod report;
pub mod schema;

pub use correlate::{HistoricAnalysis, analyze};

use crate::Result;
use crate::config::{HistoricConfig, OutputFormat};
use crate::diagnostics;

use anyhow::Context;
use serde_json::Value;
use std::fs;
use std::io::Write;

/// Analyze the dump at `path` and write the surviving ops.
pub fn run<W: Write>(
    path: &str,
    config: &HistoricConfig,
    format: OutputFormat,
    out: &mut W,
) -> Result<HistoricAnalysis> {
    let text = fs::read_to_string(path)
        .with_context(|| diagnostics::error_message(format!("read historic ops file {}", path)))?;
    let doc: Value = serde_json::from_str(&text)
        .with_context(|| diagnostics::error_message(format!("parse JSON in {}", path)))?;

    let analysis = analyze(&doc, config)
        .with_context(|| diagnostics::error_message(format!("analyze {}", path)))?;
    tracing::info!(
        total = analysis.total,
        reported = analysis.reported.len(),
        slow = analysis.slow,
        filtered = analysis.filtered,
        without_steps = analysis.without_steps,
        "historic analysis complete"
    );

    match format {
        OutputFormat::Text => report::write_text(out, &analysis.reported)?,
        OutputFormat::Json => report::write_json(out, &analysis.reported)?,
    }
    Ok(analysis)
}
