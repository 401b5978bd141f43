//! Grouping the artifact corpus by parameter signature.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::cmp::Ordering;
use std::fmt;
use std::fmt::Write as _;
use std::path::Path;
use tracing::warn;

use st_runner::{ArtifactStore, LogCollector};
use st_types::{record, RawRecord, TuneResult};

use crate::stats::{mean, sample_stdev};

/// Group identity: the sorted parameter signature, or the shared bucket for
/// artifacts that carry no `params` object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupKey {
    Ungrouped,
    Params(Vec<(String, String)>),
}

impl GroupKey {
    pub fn from_record(raw: &RawRecord) -> Self {
        let Some(Value::Object(params)) = raw.get(record::FIELD_PARAMS) else {
            return Self::Ungrouped;
        };
        let mut items: Vec<(String, String)> = params
            .iter()
            .map(|(k, v)| (k.clone(), canonical_value(v)))
            .collect();
        items.sort();
        Self::Params(items)
    }
}

/// Numbers compare by value (`5` and `5.0` are the same setting).
fn canonical_value(value: &Value) -> String {
    match value.as_f64() {
        Some(n) => n.to_string(),
        None => value.to_string(),
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ungrouped => f.write_str("NO_PARAMS (baseline / older runs)"),
            Self::Params(items) => {
                let parts: Vec<String> = items.iter().map(|(k, v)| format!("{k}={v}")).collect();
                f.write_str(&parts.join(","))
            }
        }
    }
}

/// The metrics of one artifact that the aggregation cares about.
#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactEntry {
    pub file: String,
    pub seed: Option<u64>,
    pub key: GroupKey,
    pub latency: Option<f64>,
    pub powerups: Option<f64>,
    pub duration: Option<f64>,
    pub objective: Option<f64>,
}

impl ArtifactEntry {
    pub fn from_record(file: impl Into<String>, raw: &RawRecord) -> Self {
        Self {
            file: file.into(),
            seed: record::count(raw, record::FIELD_SEED),
            key: GroupKey::from_record(raw),
            latency: record::number(raw, record::FIELD_PICKUP_LATENCY),
            powerups: record::number(raw, record::FIELD_POWERUPS),
            duration: record::number(raw, record::FIELD_DURATION),
            objective: record::number(raw, record::FIELD_OBJECTIVE),
        }
    }
}

/// Statistics for one parameter signature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterGroupSummary {
    pub key: GroupKey,
    pub count: usize,
    pub latency_mean: Option<f64>,
    /// Only defined with two or more latency samples.
    pub latency_std: Option<f64>,
    pub powerups_mean: Option<f64>,
    pub objective_mean: Option<f64>,
    /// Contributing artifact file names.
    pub samples: Vec<String>,
}

/// Metric groups are ordered by. Latency and objective rank lowest first,
/// powerups highest first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortMetric {
    #[default]
    Latency,
    Objective,
    Powerups,
}

impl SortMetric {
    fn value(&self, summary: &ParameterGroupSummary) -> Option<f64> {
        match self {
            Self::Latency => summary.latency_mean,
            Self::Objective => summary.objective_mean,
            Self::Powerups => summary.powerups_mean,
        }
    }

    fn compare(&self, x: f64, y: f64) -> Ordering {
        let ord = x.partial_cmp(&y).unwrap_or(Ordering::Equal);
        match self {
            Self::Powerups => ord.reverse(),
            _ => ord,
        }
    }
}

/// Group entries by signature and order the groups by `metric`.
///
/// Every entry lands in exactly one group. Groups are sorted stably, so
/// ties keep first-appearance order; groups without the metric go last.
pub fn summarize(entries: &[ArtifactEntry], metric: SortMetric) -> Vec<ParameterGroupSummary> {
    let mut order: Vec<GroupKey> = Vec::new();
    let mut groups: HashMap<GroupKey, Vec<&ArtifactEntry>> = HashMap::new();
    for entry in entries {
        groups
            .entry(entry.key.clone())
            .or_insert_with(|| {
                order.push(entry.key.clone());
                Vec::new()
            })
            .push(entry);
    }

    let mut summaries: Vec<ParameterGroupSummary> = order
        .into_iter()
        .map(|key| {
            let members = groups.remove(&key).unwrap_or_default();
            let latencies: Vec<f64> = members.iter().filter_map(|e| e.latency).collect();
            let powerups: Vec<f64> = members.iter().filter_map(|e| e.powerups).collect();
            let objectives: Vec<f64> = members.iter().filter_map(|e| e.objective).collect();
            ParameterGroupSummary {
                key,
                count: members.len(),
                latency_mean: mean(&latencies),
                latency_std: sample_stdev(&latencies),
                powerups_mean: mean(&powerups),
                objective_mean: mean(&objectives),
                samples: members.iter().map(|e| e.file.clone()).collect(),
            }
        })
        .collect();

    summaries.sort_by(|a, b| match (metric.value(a), metric.value(b)) {
        (Some(x), Some(y)) => metric.compare(x, y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    });
    summaries
}

/// Artifacts read from a logs directory.
#[derive(Debug, Clone, Default)]
pub struct LoadedArtifacts {
    pub entries: Vec<ArtifactEntry>,
    /// `(file, reason)` for artifacts that could not be parsed.
    pub skipped: Vec<(String, String)>,
}

/// Read every `run_*.json` in `dir`, in file-name order.
///
/// Unreadable artifacts are skipped with a warning. A missing directory is
/// an error and is never created.
pub fn load_artifacts(dir: &Path) -> TuneResult<LoadedArtifacts> {
    let store = ArtifactStore::open(dir)?;
    let mut loaded = LoadedArtifacts::default();
    for path in store.list()? {
        let file = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        match LogCollector::read(&path) {
            Ok(raw) => loaded.entries.push(ArtifactEntry::from_record(file, &raw)),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "skipping unreadable artifact");
                loaded.skipped.push((file, e.to_string()));
            }
        }
    }
    Ok(loaded)
}

/// Human-readable listing of the first `top` groups.
pub fn render_report(summaries: &[ParameterGroupSummary], top: usize) -> String {
    let fmt_opt = |v: Option<f64>| v.map_or_else(|| "n/a".to_string(), |v| format!("{v:.3}"));
    let mut out = String::new();
    for s in summaries.iter().take(top) {
        let _ = writeln!(out, "- {}", s.key);
        let _ = writeln!(
            out,
            "  samples={}, latency_mean={}, latency_std={}, powerups_mean={}, objective_mean={}",
            s.count,
            fmt_opt(s.latency_mean),
            fmt_opt(s.latency_std),
            fmt_opt(s.powerups_mean),
            fmt_opt(s.objective_mean),
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;

    fn entry(file: &str, value: Value) -> ArtifactEntry {
        match value {
            Value::Object(map) => ArtifactEntry::from_record(file, &map),
            _ => unreachable!(),
        }
    }

    fn corpus() -> Vec<ArtifactEntry> {
        vec![
            entry("run_1.json", json!({"params": {"enemy_w": 40.0, "enemy_h": 25.0}, "powerup_pickup_latency_avg": 1.0, "powerups_collected": 2, "objective": 4.0})),
            entry("run_2.json", json!({"duration_seconds": 30, "powerup_pickup_latency_avg": 0.5})),
            entry("run_3.json", json!({"params": {"enemy_h": 25, "enemy_w": 40}, "powerup_pickup_latency_avg": 3.0, "powerups_collected": 4})),
            entry("run_4.json", json!({"params": {"enemy_w": 60.0, "enemy_h": 25.0}, "error": "timeout", "objective": null})),
            entry("run_5.json", json!({"params": "legacy", "powerup_pickup_latency_avg": 0.25})),
        ]
    }

    #[test]
    fn grouping_is_a_partition() {
        let entries = corpus();
        let summaries = summarize(&entries, SortMetric::Latency);
        assert_eq!(summaries.len(), 3);
        assert_eq!(summaries.iter().map(|s| s.count).sum::<usize>(), entries.len());

        let mut files: Vec<&String> = summaries.iter().flat_map(|s| &s.samples).collect();
        files.sort();
        assert_eq!(files.len(), entries.len());
        files.dedup();
        assert_eq!(files.len(), entries.len());
    }

    #[test]
    fn equal_signatures_share_a_group() {
        let summaries = summarize(&corpus(), SortMetric::Latency);
        let group = summaries
            .iter()
            .find(|s| s.samples.contains(&"run_1.json".to_string()))
            .unwrap();
        assert_eq!(group.samples, vec!["run_1.json", "run_3.json"]);
        assert_eq!(group.latency_mean, Some(2.0));
        assert_eq!(group.latency_std, Some(2f64.sqrt()));
        assert_eq!(group.powerups_mean, Some(3.0));
        // Absent objectives are excluded, not zero-filled.
        assert_eq!(group.objective_mean, Some(4.0));
        assert_eq!(group.key.to_string(), "enemy_h=25,enemy_w=40");
    }

    #[test]
    fn missing_params_share_the_ungrouped_bucket() {
        let summaries = summarize(&corpus(), SortMetric::Latency);
        let ungrouped = &summaries[0];
        assert_eq!(ungrouped.key, GroupKey::Ungrouped);
        assert_eq!(ungrouped.samples, vec!["run_2.json", "run_5.json"]);
        assert_eq!(ungrouped.latency_mean, Some(0.375));
        assert!(ungrouped.key.to_string().starts_with("NO_PARAMS"));
    }

    #[test]
    fn single_sample_has_no_stdev() {
        let entries = vec![entry("run_9.json", json!({"params": {"x": 1}, "powerup_pickup_latency_avg": 2.0}))];
        let summaries = summarize(&entries, SortMetric::Latency);
        assert_eq!(summaries[0].latency_mean, Some(2.0));
        assert_eq!(summaries[0].latency_std, None);
    }

    #[test]
    fn groups_without_metric_sort_last_and_ties_are_stable() {
        let entries = vec![
            entry("run_1.json", json!({"params": {"x": 1}, "objective": 5.0})),
            entry("run_2.json", json!({"params": {"x": 2}})),
            entry("run_3.json", json!({"params": {"x": 3}, "objective": 1.0})),
            entry("run_4.json", json!({"params": {"x": 4}, "objective": 5.0})),
        ];
        let order: Vec<String> = summarize(&entries, SortMetric::Objective)
            .iter()
            .map(|s| s.samples[0].clone())
            .collect();
        assert_eq!(order, vec!["run_3.json", "run_1.json", "run_4.json", "run_2.json"]);
    }

    #[test]
    fn powerups_rank_highest_first() {
        let entries = vec![
            entry("run_1.json", json!({"params": {"x": 1}, "powerups_collected": 1})),
            entry("run_2.json", json!({"params": {"x": 2}, "powerups_collected": 6})),
            entry("run_3.json", json!({"params": {"x": 3}})),
        ];
        let order: Vec<String> = summarize(&entries, SortMetric::Powerups)
            .iter()
            .map(|s| s.samples[0].clone())
            .collect();
        assert_eq!(order, vec!["run_2.json", "run_1.json", "run_3.json"]);
    }

    #[test]
    fn load_from_missing_dir_fails_without_creating_it() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("no_logs_here");
        assert!(load_artifacts(&missing).is_err());
        assert!(!missing.exists());
    }

    #[test]
    fn load_skips_corrupt_files() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("run_1.json"), r#"{"params": {"x": 1}, "powerup_pickup_latency_avg": 1.0}"#).unwrap();
        fs::write(dir.path().join("run_2.json"), "{ truncated").unwrap();
        fs::write(dir.path().join("validation_best.json"), "{}").unwrap();

        let loaded = load_artifacts(dir.path()).unwrap();
        assert_eq!(loaded.entries.len(), 1);
        assert_eq!(loaded.skipped.len(), 1);
        assert_eq!(loaded.skipped[0].0, "run_2.json");

        let report = render_report(&summarize(&loaded.entries, SortMetric::Latency), 10);
        assert!(report.contains("x=1"));
        assert!(report.contains("latency_std=n/a"));
    }
}
