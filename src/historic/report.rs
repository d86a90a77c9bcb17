//! Text and JSON rendering of reported historic ops.

use crate::Result;
use crate::historic::correlate::OperationOutcome;

use serde::Serialize;
use serde_json::Value;
use std::io::Write;

/// Separator, pretty-printed op, then its deltas longest first.
pub fn write_text<W: Write>(out: &mut W, outcomes: &[OperationOutcome]) -> Result<()> {
    for outcome in outcomes {
        writeln!(out, "-----")?;
        writeln!(out, "{}", serde_json::to_string_pretty(&outcome.op)?)?;
        for (label, secs) in outcome.sorted_deltas() {
            writeln!(out, "  {:>12.6}  {}", secs, label)?;
        }
    }
    Ok(())
}

#[derive(Serialize)]
struct DeltaView<'a> {
    transition: &'a str,
    seconds: f64,
}

#[derive(Serialize)]
struct OutcomeView<'a> {
    description: &'a str,
    op: &'a Value,
    deltas: Vec<DeltaView<'a>>,
    exceeded: &'a [String],
}

pub fn write_json<W: Write>(out: &mut W, outcomes: &[OperationOutcome]) -> Result<()> {
    let views: Vec<OutcomeView<'_>> = outcomes
        .iter()
        .map(|o| OutcomeView {
            description: &o.description,
            op: &o.op,
            deltas: o
                .sorted_deltas()
                .into_iter()
                .map(|(transition, seconds)| DeltaView { transition, seconds })
                .collect(),
            exceeded: &o.verdict.exceeded,
        })
        .collect();
    serde_json::to_writer_pretty(&mut *out, &views)?;
    writeln!(out)?;
    Ok(())
}
