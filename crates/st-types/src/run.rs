//! Outcome of a single simulation run.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::params::ParameterSet;
use crate::record::{self, RawRecord};

/// Why a run produced no usable metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunErrorKind {
    /// The simulation exceeded its time budget and was killed.
    Timeout,
    /// The simulation exited with a nonzero status or could not be launched.
    ProcessError,
    /// The simulation exited cleanly but left no artifact.
    NoLog,
    /// An artifact was present but could not be parsed.
    ReadError,
}

impl RunErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::ProcessError => "process_error",
            Self::NoLog => "no_log",
            Self::ReadError => "read_error",
        }
    }
}

impl fmt::Display for RunErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one run; also the on-disk artifact format.
///
/// Created once by the executor and never mutated afterwards. Fields the
/// simulation emitted beyond the known metrics are kept in `extra` so a
/// rewrite of the artifact loses nothing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub seed: u64,
    #[serde(default)]
    pub params: ParameterSet,
    #[serde(default)]
    pub duration_seconds: Option<f64>,
    #[serde(default)]
    pub enemy_hits_taken: Option<u64>,
    /// Undefined when no powerup was picked up.
    #[serde(default)]
    pub powerup_pickup_latency_avg: Option<f64>,
    #[serde(default)]
    pub powerups_collected: Option<u64>,
    #[serde(default)]
    pub objective: Option<f64>,
    #[serde(default)]
    pub error: Option<RunErrorKind>,
    /// File name of the artifact the metrics were read from.
    #[serde(default)]
    pub artifact: Option<String>,
    #[serde(flatten)]
    pub extra: RawRecord,
}

impl RunResult {
    /// A run that yielded no metrics.
    pub fn failed(seed: u64, params: ParameterSet, kind: RunErrorKind) -> Self {
        Self {
            seed,
            params,
            duration_seconds: None,
            enemy_hits_taken: None,
            powerup_pickup_latency_avg: None,
            powerups_collected: None,
            objective: None,
            error: Some(kind),
            artifact: None,
            extra: RawRecord::new(),
        }
    }

    /// Build a successful result from a raw simulation record.
    ///
    /// `seed` and `params` are authoritative: whatever the record claims for
    /// them is discarded. Unknown fields are carried over into `extra`.
    pub fn from_record(
        seed: u64,
        params: ParameterSet,
        raw: &RawRecord,
        objective: Option<f64>,
    ) -> Self {
        const KNOWN: [&str; 9] = [
            record::FIELD_SEED,
            record::FIELD_PARAMS,
            record::FIELD_DURATION,
            record::FIELD_ENEMY_HITS,
            record::FIELD_PICKUP_LATENCY,
            record::FIELD_POWERUPS,
            record::FIELD_OBJECTIVE,
            record::FIELD_ERROR,
            record::FIELD_ARTIFACT,
        ];

        let extra = raw
            .iter()
            .filter(|(k, _)| !KNOWN.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        Self {
            seed,
            params,
            duration_seconds: record::number(raw, record::FIELD_DURATION),
            enemy_hits_taken: record::count(raw, record::FIELD_ENEMY_HITS),
            powerup_pickup_latency_avg: record::number(raw, record::FIELD_PICKUP_LATENCY),
            powerups_collected: record::count(raw, record::FIELD_POWERUPS),
            objective,
            error: None,
            artifact: None,
            extra,
        }
    }

    pub fn with_artifact(mut self, name: impl Into<String>) -> Self {
        self.artifact = Some(name.into());
        self
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Serialize into the loosely typed record shape.
    pub fn to_record(&self) -> RawRecord {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => RawRecord::new(),
        }
    }
}
