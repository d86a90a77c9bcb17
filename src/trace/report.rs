//! Text and JSON rendering of trace results.
//!
//! Detail blocks are one line per phase:
//!
//! 1  F  0.050000 0.000000 0.300000 <start line>
//! 2  F  0.050000 0.000000 0.300000 <write line>
//! 3  F  0.050000 0.000000 0.300000 <finish line>
//!
//! The leading digit is the phase (0 marks a partial-only op), then the
//! `WSFP` flag columns and the write, write-start and finish deltas.

use crate::classify::{AggregateCounters, PartialHistogram};
use crate::trace::correlate::{CompletedOp, TraceSummary};

use serde::Serialize;
use std::io::{self, Write};

fn write_phase_line<W: Write>(out: &mut W, digit: u8, op: &CompletedOp, line: &str) -> io::Result<()> {
    writeln!(
        out,
        "{}{} {:.6} {:.6} {:.6} {}",
        digit, op.flags, op.deltas.write, op.deltas.write_start, op.deltas.finish, line
    )
}

/// Three-line block for a slow operation, followed by a blank line.
pub fn write_detail<W: Write>(out: &mut W, op: &CompletedOp) -> io::Result<()> {
    write_phase_line(out, 1, op, &op.start.line)?;
    write_phase_line(out, 2, op, &op.write.phase.line)?;
    write_phase_line(out, 3, op, &op.finish.line)?;
    writeln!(out)
}

/// Single line for a partial operation that was not slow.
pub fn write_partial<W: Write>(out: &mut W, op: &CompletedOp) -> io::Result<()> {
    write_phase_line(out, 0, op, &op.start.line)
}

pub fn write_summary<W: Write>(out: &mut W, summary: &TraceSummary, histogram: bool) -> io::Result<()> {
    let c = &summary.counters;
    writeln!(out, "{:>8}: {}", "Slow Ops", c.slow_ops)?;
    writeln!(out, "{:>8}: {}", "Partial Ops", c.partial_ops)?;
    writeln!(out, "{:>8}: {}", "Slow & Partial Ops", c.slow_partial_ops)?;
    writeln!(out, "{:>8}: {}", "Total Ops", c.total_ops)?;
    writeln!(out, "{:>8}: {:.6}", "Slow Ops Time", c.slow_ops_time)?;

    if histogram {
        write_histogram(out, &summary.histogram)?;
    }
    Ok(())
}

fn write_histogram<W: Write>(out: &mut W, histogram: &PartialHistogram) -> io::Result<()> {
    writeln!(out)?;
    writeln!(out, "Partial remainders (bytes: writes):")?;
    if histogram.is_empty() {
        writeln!(out, "  (none)")?;
    }
    for (remainder, count) in &histogram.0 {
        writeln!(out, "  {:>6}: {}", remainder, count)?;
    }
    Ok(())
}

#[derive(Serialize)]
struct JsonReport<'a> {
    summary: &'a AggregateCounters,
    lines: u64,
    skipped_lines: u64,
    unfinished: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    histogram: Option<&'a PartialHistogram>,
    flagged: &'a [CompletedOp],
}

pub fn write_json<W: Write>(
    out: &mut W,
    summary: &TraceSummary,
    flagged: &[CompletedOp],
    histogram: bool,
) -> crate::Result<()> {
    let report = JsonReport {
        summary: &summary.counters,
        lines: summary.lines,
        skipped_lines: summary.skipped_lines,
        unfinished: summary.unfinished,
        histogram: histogram.then_some(&summary.histogram),
        flagged,
    };
    serde_json::to_writer_pretty(&mut *out, &report)?;
    writeln!(out)?;
    Ok(())
}
