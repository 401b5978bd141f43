//! Fixed weighted objective. Lower is better.
//!
//! ```text
//! objective = duration_seconds
//!           + enemy_hits_taken * 8.0
//!           + powerup_pickup_latency_avg * 0.5
//!           - powerups_collected * 6.0
//! ```
//!
//! Missing or non-numeric fields count as `0.0` here so every run that
//! produced a record gets a number. Cross-run summaries do not zero-fill;
//! they leave absent values out of their means.

use st_types::{record, RawRecord};

pub const ENEMY_HIT_WEIGHT: f64 = 8.0;
pub const PICKUP_LATENCY_WEIGHT: f64 = 0.5;
pub const POWERUP_REWARD: f64 = 6.0;

/// Stateless calculator for the run objective.
pub struct ObjectiveComputer;

impl ObjectiveComputer {
    pub fn compute(raw: &RawRecord) -> f64 {
        let field = |key| record::number(raw, key).unwrap_or(0.0);
        Self::from_parts(
            field(record::FIELD_DURATION),
            field(record::FIELD_ENEMY_HITS),
            field(record::FIELD_PICKUP_LATENCY),
            field(record::FIELD_POWERUPS),
        )
    }

    pub fn from_parts(duration: f64, enemy_hits: f64, pickup_latency: f64, powerups: f64) -> f64 {
        duration + enemy_hits * ENEMY_HIT_WEIGHT + pickup_latency * PICKUP_LATENCY_WEIGHT
            - powerups * POWERUP_REWARD
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn raw(value: Value) -> RawRecord {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn matches_formula_with_all_fields() {
        let r = raw(json!({
            "duration_seconds": 42.5,
            "enemy_hits_taken": 3,
            "powerup_pickup_latency_avg": 1.5,
            "powerups_collected": 2,
        }));
        assert_eq!(ObjectiveComputer::compute(&r), 42.5 + 24.0 + 0.75 - 12.0);
    }

    #[test]
    fn reference_run_scores_four() {
        let r = raw(json!({
            "duration_seconds": 10,
            "enemy_hits_taken": 0,
            "powerup_pickup_latency_avg": 2.0,
            "powerups_collected": 1,
        }));
        assert_eq!(ObjectiveComputer::compute(&r), 4.0);
    }

    #[test]
    fn missing_and_malformed_fields_are_zero() {
        assert_eq!(ObjectiveComputer::compute(&RawRecord::new()), 0.0);

        let r = raw(json!({
            "duration_seconds": "12",
            "enemy_hits_taken": "lots",
            "powerup_pickup_latency_avg": null,
            "powerups_collected": [1],
        }));
        assert_eq!(ObjectiveComputer::compute(&r), 12.0);
    }
}
