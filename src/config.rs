//! Analysis configuration.
//!
//! Every knob has a built-in default. An optional JSON file may override any
//! subset of them, and command-line flags override the file:
//!
//! {
//!   "trace":     { "threshold": 0.2, "block_size": 4096 },
//!   "historic":  {
//!     "measure_between": { "initiated": ["op_commit"] },
//!     "gate": "initiated-op_commit",
//!     "min_duration": 0.3,
//!     "exclude": ["waiting for rw locks-reached_pg"]
//!   },
//!   "alignment": { "units": [512, 4096], "record_lines": true }
//! }

use crate::Result;
use crate::diagnostics;

use anyhow::{Context, bail};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;

pub const DEFAULT_THRESHOLD_SECS: f64 = 0.2;
pub const DEFAULT_BLOCK_SIZE: u64 = 4096;
pub const DEFAULT_MIN_DURATION_SECS: f64 = 0.3;
pub const DEFAULT_GATE: &str = "initiated-op_commit";
pub const DEFAULT_EXCLUDED: &str = "waiting for rw locks-reached_pg";

/// Report rendering for the `trace` and `historic` commands.
#[derive(clap::ValueEnum, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable text.
    #[default]
    Text,
    /// One JSON document.
    Json,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct AnalysisConfig {
    pub trace: TraceConfig,
    pub historic: HistoricConfig,
    pub alignment: AlignmentConfig,
}

/// Line-stream correlator settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct TraceConfig {
    /// Seconds; a phase strictly longer than this marks the op slow.
    pub threshold: f64,
    /// Bytes; writes not aligned to this are partial.
    pub block_size: u64,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD_SECS,
            block_size: DEFAULT_BLOCK_SIZE,
        }
    }
}

/// Event-list correlator settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct HistoricConfig {
    /// Start event name -> end event names to measure between.
    pub measure_between: BTreeMap<String, Vec<String>>,
    /// Delta label that must reach `min_duration` when present.
    pub gate: String,
    pub min_duration: f64,
    /// Delta labels whose presence drops an operation.
    pub exclude: Vec<String>,
}

impl Default for HistoricConfig {
    fn default() -> Self {
        Self {
            measure_between: default_measure_between(),
            gate: DEFAULT_GATE.to_string(),
            min_duration: DEFAULT_MIN_DURATION_SECS,
            exclude: vec![DEFAULT_EXCLUDED.to_string()],
        }
    }
}

fn default_measure_between() -> BTreeMap<String, Vec<String>> {
    let pairs: [(&str, &[&str]); 4] = [
        ("reached_pg", &["journaled_completion_queued"]),
        (
            "initiated",
            &[
                "commit_sent",
                "journaled_completion_queued",
                "reached_pg",
                "op_commit",
            ],
        ),
        ("started", &["commit_queued_for_journal_write"]),
        (
            "commit_queued_for_journal_write",
            &["journaled_completion_queued", "op_commit"],
        ),
    ];
    pairs
        .iter()
        .map(|(start, ends)| {
            (
                start.to_string(),
                ends.iter().map(|e| e.to_string()).collect(),
            )
        })
        .collect()
}

/// BlueStore alignment scanner settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct AlignmentConfig {
    /// Alignment units in bytes, each reported separately.
    pub units: Vec<u64>,
    /// Attach each thread's raw lines to its emitted op.
    pub record_lines: bool,
}

impl Default for AlignmentConfig {
    fn default() -> Self {
        Self {
            units: vec![512, 4096],
            record_lines: true,
        }
    }
}

impl AnalysisConfig {
    /// Load the config file at `path`, or the defaults when `path` is None.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = fs::read_to_string(path)
            .with_context(|| diagnostics::error_message(format!("read config file {}", path)))?;
        let cfg: Self = serde_json::from_str(&text)
            .with_context(|| diagnostics::error_message(format!("parse config file {}", path)))?;
        tracing::debug!(config = %path, "loaded config file");
        Ok(cfg)
    }

    /// Reject values that would make the analysis meaningless.
    pub fn validate(&self) -> Result<()> {
        let t = &self.trace;
        if !t.threshold.is_finite() || t.threshold < 0.0 {
            bail!(
                "{}",
                diagnostics::error_message(format!(
                    "trace threshold must be a non-negative number of seconds, got {}",
                    t.threshold
                ))
            );
        }
        if t.block_size == 0 {
            bail!("{}", diagnostics::error_message("trace block_size must be positive"));
        }

        let h = &self.historic;
        if !h.min_duration.is_finite() || h.min_duration < 0.0 {
            bail!(
                "{}",
                diagnostics::error_message(format!(
                    "historic min_duration must be a non-negative number of seconds, got {}",
                    h.min_duration
                ))
            );
        }
        for (start, ends) in &h.measure_between {
            if start.trim().is_empty() {
                bail!("{}", diagnostics::error_message("measure_between has an empty start event"));
            }
            if ends.is_empty() {
                bail!(
                    "{}",
                    diagnostics::error_message(format!(
                        "measure_between entry '{}' lists no end events",
                        start
                    ))
                );
            }
        }

        if self.alignment.units.is_empty() {
            bail!("{}", diagnostics::error_message("alignment units must not be empty"));
        }
        if self.alignment.units.contains(&0) {
            bail!("{}", diagnostics::error_message("alignment units must be positive"));
        }
        Ok(())
    }
}
