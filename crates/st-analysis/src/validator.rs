//! Re-running one parameter set across many seeds.

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use st_runner::{ArtifactStore, RunExecutor};
use st_types::{ParameterSet, RunErrorKind, RunResult, TuneResult};

use crate::stats::{mean, sample_stdev};

pub const VALIDATION_SUMMARY_FILE: &str = "validation_best.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationConfig {
    pub runs: usize,
    pub timeout_seconds: u64,
    /// Seeds are `seed_start, seed_start + 1, ...` when set, random otherwise.
    pub seed_start: Option<u64>,
    /// Upper bound for random seeds (lower bound is 1).
    pub seed_high: u64,
    pub rng_seed: Option<u64>,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            runs: 30,
            timeout_seconds: 120,
            seed_start: None,
            seed_high: (1 << 31) - 1,
            rng_seed: None,
        }
    }
}

/// One validation run as reported in the summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationSample {
    pub seed: u64,
    pub latency: Option<f64>,
    pub powerups: Option<u64>,
    pub objective: Option<f64>,
    /// Artifact the metrics were read from.
    pub artifact: Option<String>,
    pub error: Option<RunErrorKind>,
}

impl From<&RunResult> for ValidationSample {
    fn from(run: &RunResult) -> Self {
        Self {
            seed: run.seed,
            latency: run.powerup_pickup_latency_avg,
            powerups: run.powerups_collected,
            objective: run.objective,
            artifact: run.artifact.clone(),
            error: run.error,
        }
    }
}

/// Persisted result of a validation session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationSummary {
    pub params: ParameterSet,
    pub runs_requested: usize,
    /// Runs that finished without an error tag and reported a pickup
    /// latency. An error-free run with no pickups still feeds the powerups
    /// and objective means, but is not counted here.
    pub runs_completed: usize,
    pub latency_mean: Option<f64>,
    pub latency_std: Option<f64>,
    pub powerups_mean: Option<f64>,
    pub objective_mean: Option<f64>,
    /// Failed runs per error tag.
    pub failures: BTreeMap<RunErrorKind, usize>,
    pub samples: Vec<ValidationSample>,
    pub generated_at: DateTime<Utc>,
}

impl ValidationSummary {
    pub fn from_runs(params: ParameterSet, runs_requested: usize, runs: &[RunResult]) -> Self {
        let ok: Vec<&RunResult> = runs.iter().filter(|r| r.is_success()).collect();
        let latencies: Vec<f64> = ok.iter().filter_map(|r| r.powerup_pickup_latency_avg).collect();
        let powerups: Vec<f64> = ok
            .iter()
            .filter_map(|r| r.powerups_collected.map(|p| p as f64))
            .collect();
        let objectives: Vec<f64> = ok.iter().filter_map(|r| r.objective).collect();

        let mut failures = BTreeMap::new();
        for kind in runs.iter().filter_map(|r| r.error) {
            *failures.entry(kind).or_insert(0) += 1;
        }

        Self {
            params,
            runs_requested,
            runs_completed: ok
                .iter()
                .filter(|r| r.powerup_pickup_latency_avg.is_some())
                .count(),
            latency_mean: mean(&latencies),
            latency_std: sample_stdev(&latencies),
            powerups_mean: mean(&powerups),
            objective_mean: mean(&objectives),
            failures,
            samples: runs.iter().map(ValidationSample::from).collect(),
            generated_at: Utc::now(),
        }
    }

    /// Write to `validation_best.json` in the artifact directory.
    pub fn persist(&self, store: &ArtifactStore) -> TuneResult<PathBuf> {
        store.write_document(VALIDATION_SUMMARY_FILE, self)
    }
}

/// Runs a fixed parameter set for many seeds, one at a time.
pub struct Validator<E: RunExecutor + 'static> {
    executor: Arc<E>,
    config: ValidationConfig,
}

impl<E: RunExecutor + 'static> Validator<E> {
    pub fn new(executor: Arc<E>, config: ValidationConfig) -> Self {
        Self { executor, config }
    }

    /// Seeds for this session, distinct.
    pub fn seeds(&self) -> Vec<u64> {
        let n = self.config.runs;
        if let Some(start) = self.config.seed_start {
            return (0..n as u64).map(|i| start + i).collect();
        }
        let mut rng = match self.config.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let high = self.config.seed_high.max(n as u64);
        let mut seen = HashSet::with_capacity(n);
        let mut seeds = Vec::with_capacity(n);
        while seeds.len() < n {
            let seed = rng.gen_range(1..=high);
            if seen.insert(seed) {
                seeds.push(seed);
            }
        }
        seeds
    }

    pub async fn validate(&self, params: &ParameterSet) -> ValidationSummary {
        let seeds = self.seeds();
        let timeout = Duration::from_secs(self.config.timeout_seconds);
        let total = seeds.len();
        let mut runs = Vec::with_capacity(total);

        for (i, seed) in seeds.into_iter().enumerate() {
            info!(run = i + 1, total, seed, "validation run");
            let run = self.executor.execute(params, seed, timeout).await;
            if let Some(kind) = run.error {
                warn!(seed, error = %kind, "validation run failed");
            }
            runs.push(run);
        }

        let summary = ValidationSummary::from_runs(params.clone(), self.config.runs, &runs);
        info!(
            requested = summary.runs_requested,
            completed = summary.runs_completed,
            latency_mean = ?summary.latency_mean,
            latency_std = ?summary.latency_std,
            powerups_mean = ?summary.powerups_mean,
            "validation finished"
        );
        summary
    }
}
