//! Line-stream correlator for filestore debug logs.

pub mod correlate;
pub mod marker;
pub mod partial;
pub mod report;

pub use correlate::{CompletedOp, Correlator, TraceSummary};

use crate::Result;
use crate::config::{OutputFormat, TraceConfig};
use crate::input;

use std::io::Write;

#[derive(Debug, Clone, Default)]
pub struct TraceOptions {
    pub format: OutputFormat,
    /// Also report partial writes that were not slow.
    pub show_partial: bool,
    /// Append the partial remainder histogram.
    pub histogram: bool,
}

/// Correlate every line of `files` (stdin when empty) and write the report.
pub fn run<W: Write>(
    files: &[String],
    config: &TraceConfig,
    opts: &TraceOptions,
    out: &mut W,
) -> Result<TraceSummary> {
    let mut correlator = Correlator::new(config.clone());
    let mut flagged: Vec<CompletedOp> = Vec::new();

    input::for_each_line(files, |line| {
        let Some(op) = correlator.feed(line) else {
            return Ok(());
        };
        let slow = op.flags.slow;
        let partial_only = !slow && opts.show_partial && op.flags.partial;
        match opts.format {
            OutputFormat::Text if slow => report::write_detail(out, &op)?,
            OutputFormat::Text if partial_only => report::write_partial(out, &op)?,
            OutputFormat::Json if slow || partial_only => flagged.push(op),
            _ => {}
        }
        Ok(())
    })?;

    let summary = correlator.finish();
    tracing::info!(
        lines = summary.lines,
        skipped = summary.skipped_lines,
        unfinished = summary.unfinished,
        "trace complete"
    );

    match opts.format {
        OutputFormat::Text => report::write_summary(out, &summary, opts.histogram)?,
        OutputFormat::Json => report::write_json(out, &summary, &flagged, opts.histogram)?,
    }
    Ok(summary)
}
