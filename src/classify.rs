//! Threshold classification and run-wide aggregation shared by the trace and
//! historic pipelines.

use serde::Serialize;
use std::collections::BTreeMap;

/// Named phase-transition durations (seconds) for one operation.
pub type DeltaSet = BTreeMap<String, f64>;

/// Which named deltas exceeded a threshold.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Verdict {
    pub exceeded: Vec<String>,
}

impl Verdict {
    pub fn any_exceeded(&self) -> bool {
        !self.exceeded.is_empty()
    }

    pub fn exceeded(&self, label: &str) -> bool {
        self.exceeded.iter().any(|l| l == label)
    }
}

/// Classify `deltas` against `threshold`. A delta is slow when it is strictly
/// greater than the threshold.
pub fn classify<'a, I>(deltas: I, threshold: f64) -> Verdict
where
    I: IntoIterator<Item = (&'a str, f64)>,
{
    let exceeded = deltas
        .into_iter()
        .filter(|(_, secs)| *secs > threshold)
        .map(|(label, _)| label.to_string())
        .collect();
    Verdict { exceeded }
}

/// Run-lifetime counters of the trace pipeline.
///
/// `slow_partial_ops <= slow_ops` and `slow_partial_ops <= partial_ops` hold by
/// construction: the only mutator is [`AggregateCounters::record`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AggregateCounters {
    pub total_ops: u64,
    pub slow_ops: u64,
    pub partial_ops: u64,
    pub slow_partial_ops: u64,
    pub slow_ops_time: f64,
}

impl AggregateCounters {
    /// Absorb one completed operation. `busy_secs` is added to the slow time
    /// only when the operation is slow.
    pub fn record(&mut self, slow: bool, partial: bool, busy_secs: f64) {
        self.total_ops += 1;
        if partial {
            self.partial_ops += 1;
        }
        if slow {
            self.slow_ops += 1;
            self.slow_ops_time += busy_secs;
            if partial {
                self.slow_partial_ops += 1;
            }
        }
    }
}

/// Occurrence count per nonzero partial remainder, in bytes.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct PartialHistogram(pub BTreeMap<u64, u64>);

impl PartialHistogram {
    pub fn observe(&mut self, remainder: u64) {
        if remainder > 0 {
            *self.0.entry(remainder).or_insert(0) += 1;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
