//! Phase deltas and the interest filter for historic ops.

use crate::classify::{self, DeltaSet, Verdict};
use crate::config::HistoricConfig;
use crate::historic::schema::{HistoricError, OpView, TimedStep, ops_array};
use crate::timestamp::seconds_between;

use chrono::NaiveDateTime;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};

/// Event name of the synthetic first step anchored at `initiated_at`.
pub const SYNTHETIC_START: &str = "start";

/// An op that passed the interest filter.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationOutcome {
    pub description: String,
    pub op: Value,
    pub deltas: DeltaSet,
    /// Deltas strictly above the minimum duration.
    pub verdict: Verdict,
}

impl OperationOutcome {
    /// Deltas ordered longest first; equal durations by label.
    pub fn sorted_deltas(&self) -> Vec<(&str, f64)> {
        let mut v: Vec<(&str, f64)> = self.deltas.iter().map(|(k, v)| (k.as_str(), *v)).collect();
        v.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.0.cmp(b.0))
        });
        v
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistoricAnalysis {
    pub reported: Vec<OperationOutcome>,
    pub total: usize,
    /// Reported ops with at least one delta above the minimum duration.
    pub slow: usize,
    pub without_steps: usize,
    pub filtered: usize,
}

/// Consecutive-step deltas plus the configured named pairs.
///
/// Consecutive labels are `"<prev>-<event>"` starting from a synthetic
/// `start` step at `initiated_at`; a repeated label keeps its first value.
/// Named pairs use the last time each event was seen and overwrite.
pub fn compute_deltas(
    initiated_at: NaiveDateTime,
    steps: &[TimedStep],
    measure_between: &BTreeMap<String, Vec<String>>,
) -> DeltaSet {
    let mut deltas = DeltaSet::new();
    let mut event_time: HashMap<&str, NaiveDateTime> = HashMap::new();

    let mut last_event = SYNTHETIC_START;
    let mut last_time = initiated_at;
    for step in steps {
        event_time.insert(step.event.as_str(), step.time);
        deltas
            .entry(format!("{}-{}", last_event, step.event))
            .or_insert_with(|| seconds_between(last_time, step.time));
        last_event = step.event.as_str();
        last_time = step.time;
    }

    for (start_name, end_names) in measure_between {
        let Some(&start) = event_time.get(start_name.as_str()) else {
            continue;
        };
        for end_name in end_names {
            if let Some(&end) = event_time.get(end_name.as_str()) {
                deltas.insert(format!("{}-{}", start_name, end_name), seconds_between(start, end));
            }
        }
    }
    deltas
}

/// An op is interesting when its gate delta, if recorded, reaches the minimum
/// and none of the excluded transitions were recorded.
pub fn is_interesting(deltas: &DeltaSet, cfg: &HistoricConfig) -> bool {
    if let Some(&gate) = deltas.get(&cfg.gate) {
        if gate < cfg.min_duration {
            return false;
        }
    }
    !cfg.exclude.iter().any(|label| deltas.contains_key(label))
}

/// Analyze a whole document. Any fatal condition fails the whole analysis.
pub fn analyze(doc: &Value, cfg: &HistoricConfig) -> Result<HistoricAnalysis, HistoricError> {
    let ops = ops_array(doc)?;
    let mut seen: HashSet<&str> = HashSet::with_capacity(ops.len());
    let mut analysis = HistoricAnalysis {
        total: ops.len(),
        ..Default::default()
    };

    for (index, raw) in ops.iter().enumerate() {
        let description = OpView::description_of(raw, index)?;
        if !seen.insert(description) {
            return Err(HistoricError::DuplicateDescription(description.to_string()));
        }

        let view = OpView::parse(raw, index)?;
        let Some(steps) = view.steps else {
            tracing::debug!(description = view.description, "no step list, skipped");
            analysis.without_steps += 1;
            continue;
        };

        let deltas = compute_deltas(view.initiated_at, &steps, &cfg.measure_between);
        if !is_interesting(&deltas, cfg) {
            tracing::trace!(description = view.description, "filtered out");
            analysis.filtered += 1;
            continue;
        }

        let verdict = classify::classify(deltas.iter().map(|(k, v)| (k.as_str(), *v)), cfg.min_duration);
        if verdict.any_exceeded() {
            analysis.slow += 1;
        }
        analysis.reported.push(OperationOutcome {
            description: view.description.to_string(),
            op: raw.clone(),
            deltas,
            verdict,
        });
    }
    Ok(analysis)
}
