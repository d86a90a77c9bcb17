//! Shape of a `dump_historic_ops` document.
//!
//! {
//!   "ops": [                                   // or "Ops"
//!     {
//!       "description": "osd_op(client.4123.0:1 ...)",
//!       "initiated_at": "2017-03-23 10:45:22.129218",
//!       "type_data": [
//!         "commit sent; apply or cleanup",     // state
//!         { "client": "client.4123", "tid": 1 },
//!         [ { "time": "...", "event": "initiated" }, ... ]
//!       ]
//!     }
//!   ]
//! }
//!
//! Newer daemons write `type_data` as an object with the step list under
//! `"events"`; both shapes are accepted. Ops stay raw JSON values for the
//! report.

use crate::timestamp::parse_timestamp;

use chrono::NaiveDateTime;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

/// Fatal conditions of the historic-op analysis.
#[derive(Debug, Error, PartialEq)]
pub enum HistoricError {
    #[error("document has no \"ops\" or \"Ops\" array")]
    MissingOpsArray,

    #[error("operation #{index} has no string \"description\"")]
    MissingDescription { index: usize },

    #[error("duplicate operation description {0:?}")]
    DuplicateDescription(String),

    #[error("operation {description:?}: cannot parse {field} timestamp {value:?}")]
    BadTimestamp {
        description: String,
        field: &'static str,
        value: String,
    },

    #[error("operation {description:?}: step #{index} is not a {{time, event}} record")]
    BadStep { description: String, index: usize },
}

/// The op array of a document.
pub fn ops_array(doc: &Value) -> Result<&[Value], HistoricError> {
    ["ops", "Ops"]
        .iter()
        .find_map(|key| doc.get(*key).and_then(Value::as_array))
        .map(Vec::as_slice)
        .ok_or(HistoricError::MissingOpsArray)
}

#[derive(Debug, Deserialize)]
struct RawStep {
    time: String,
    event: String,
}

/// One named, timed step of an operation.
#[derive(Debug, Clone, PartialEq)]
pub struct TimedStep {
    pub time: NaiveDateTime,
    pub event: String,
}

/// The fields of an op the correlator needs, borrowed from the raw value.
#[derive(Debug)]
pub struct OpView<'a> {
    pub description: &'a str,
    pub initiated_at: NaiveDateTime,
    /// None when the op has no step list.
    pub steps: Option<Vec<TimedStep>>,
}

impl<'a> OpView<'a> {
    pub fn description_of(op: &'a Value, index: usize) -> Result<&'a str, HistoricError> {
        op.get("description")
            .and_then(Value::as_str)
            .ok_or(HistoricError::MissingDescription { index })
    }

    pub fn parse(op: &'a Value, index: usize) -> Result<Self, HistoricError> {
        let description = Self::description_of(op, index)?;

        let raw_initiated = op.get("initiated_at").and_then(Value::as_str).unwrap_or("");
        let initiated_at = parse_timestamp(raw_initiated).ok_or_else(|| HistoricError::BadTimestamp {
            description: description.to_string(),
            field: "initiated_at",
            value: raw_initiated.to_string(),
        })?;

        let steps = match step_list(op) {
            None => None,
            Some(raw_steps) => Some(
                raw_steps
                    .iter()
                    .enumerate()
                    .map(|(i, v)| parse_step(description, i, v))
                    .collect::<Result<Vec<_>, _>>()?,
            ),
        };

        Ok(Self {
            description,
            initiated_at,
            steps,
        })
    }
}

/// Third element of the `type_data` array, or `type_data.events`.
fn step_list(op: &Value) -> Option<&Vec<Value>> {
    match op.get("type_data")? {
        Value::Array(items) => items.get(2)?.as_array(),
        Value::Object(map) => map.get("events")?.as_array(),
        _ => None,
    }
}

fn parse_step(description: &str, index: usize, v: &Value) -> Result<TimedStep, HistoricError> {
    let raw = RawStep::deserialize(v).map_err(|_| HistoricError::BadStep {
        description: description.to_string(),
        index,
    })?;
    let time = parse_timestamp(&raw.time).ok_or_else(|| HistoricError::BadTimestamp {
        description: description.to_string(),
        field: "step",
        value: raw.time.clone(),
    })?;
    Ok(TimedStep {
        time,
        event: raw.event,
    })
}
