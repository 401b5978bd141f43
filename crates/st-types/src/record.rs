//! Loosely typed run records as written by the simulation.
//!
//! The simulation's log schema is not under our control: numbers may arrive
//! as integers, floats or strings and any field may be missing. Accessors
//! here coerce where possible and return `None` otherwise; they never fail.

use serde_json::{Map, Value};

use crate::params::ParameterSet;

/// A raw structured record read from a run artifact.
pub type RawRecord = Map<String, Value>;

pub const FIELD_SEED: &str = "seed";
pub const FIELD_PARAMS: &str = "params";
pub const FIELD_DURATION: &str = "duration_seconds";
pub const FIELD_ENEMY_HITS: &str = "enemy_hits_taken";
pub const FIELD_PICKUP_LATENCY: &str = "powerup_pickup_latency_avg";
pub const FIELD_POWERUPS: &str = "powerups_collected";
pub const FIELD_OBJECTIVE: &str = "objective";
pub const FIELD_ERROR: &str = "error";
pub const FIELD_ARTIFACT: &str = "artifact";

/// Read a numeric field, accepting numbers and numeric strings.
pub fn number(record: &RawRecord, key: &str) -> Option<f64> {
    let value = match record.get(key)? {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    value.is_finite().then_some(value)
}

/// Read a non-negative count. Fractional values are rounded.
pub fn count(record: &RawRecord, key: &str) -> Option<u64> {
    number(record, key)
        .filter(|v| *v >= 0.0)
        .map(|v| v.round() as u64)
}

/// Read the `params` object, keeping only entries with numeric values.
pub fn parameters(record: &RawRecord) -> Option<ParameterSet> {
    let Value::Object(map) = record.get(FIELD_PARAMS)? else {
        return None;
    };
    Some(
        map.iter()
            .filter_map(|(k, v)| {
                let value = match v {
                    Value::Number(n) => n.as_f64(),
                    Value::String(s) => s.trim().parse::<f64>().ok(),
                    _ => None,
                }?;
                Some((k.clone(), value))
            })
            .collect(),
    )
}
