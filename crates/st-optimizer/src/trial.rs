//! Trial records and study history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use st_types::{ParameterSet, RunResult};

use crate::search::SearchSpace;

/// Unique study identifier.
pub type StudyId = Uuid;

/// How each trial's replicate runs are executed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialSettings {
    /// Replicate runs (distinct seeds) per trial.
    pub seeds_per_trial: usize,
    /// Per-run timeout.
    pub timeout_seconds: u64,
    /// Replicates run at once. 1 = sequential.
    pub concurrency: usize,
    /// Value substituted for a replicate with no objective.
    pub failure_penalty: f64,
    /// Inclusive range random seeds are drawn from.
    pub seed_low: u64,
    pub seed_high: u64,
}

impl Default for TrialSettings {
    fn default() -> Self {
        Self {
            seeds_per_trial: 3,
            timeout_seconds: 180,
            concurrency: 1,
            failure_penalty: 1.0e6,
            seed_low: 1,
            seed_high: 1_000_000,
        }
    }
}

impl TrialSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

/// Top-level configuration for a tuning study.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudyConfig {
    pub name: String,

    /// Storage location for the study document (directory, optionally
    /// `file://`-prefixed).
    pub storage: String,

    /// The parameter search space.
    pub search_space: SearchSpace,

    /// Which search strategy to use: "grid", "random", or "bayesian".
    pub strategy: String,

    /// Number of trials to run in this session.
    pub max_trials: usize,

    pub trials: TrialSettings,

    /// Exploration weight for Bayesian search (ignored for grid/random).
    pub exploration_weight: f64,

    /// Number of steps per continuous dimension for grid search.
    pub grid_steps: usize,

    /// Seed for the strategy and seed generator; `None` draws from entropy.
    pub rng_seed: Option<u64>,
}

impl StudyConfig {
    pub fn new(name: impl Into<String>, search_space: SearchSpace, strategy: &str) -> Self {
        Self {
            name: name.into(),
            storage: String::new(),
            search_space,
            strategy: strategy.to_string(),
            max_trials: 30,
            trials: TrialSettings::default(),
            exploration_weight: 0.3,
            grid_steps: 5,
            rng_seed: None,
        }
    }

    pub fn with_storage(mut self, storage: impl Into<String>) -> Self {
        self.storage = storage.into();
        self
    }

    pub fn with_max_trials(mut self, n: usize) -> Self {
        self.max_trials = n;
        self
    }

    pub fn with_seeds_per_trial(mut self, n: usize) -> Self {
        self.trials.seeds_per_trial = n;
        self
    }

    pub fn with_timeout_seconds(mut self, secs: u64) -> Self {
        self.trials.timeout_seconds = secs;
        self
    }

    pub fn with_concurrency(mut self, n: usize) -> Self {
        self.trials.concurrency = n;
        self
    }

    pub fn with_failure_penalty(mut self, penalty: f64) -> Self {
        self.trials.failure_penalty = penalty;
        self
    }

    pub fn with_rng_seed(mut self, seed: Option<u64>) -> Self {
        self.rng_seed = seed;
        self
    }
}

// ---------------------------------------------------------------------------
// Individual trial
// ---------------------------------------------------------------------------

/// One proposed parameter set, its replicate runs and the reported score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialRecord {
    pub id: Uuid,
    pub number: usize,
    pub params: ParameterSet,
    pub runs: Vec<RunResult>,
    /// Mean over replicates with failures replaced by the penalty. This is
    /// what the proposer sees.
    pub score: f64,
    /// Replicates that produced an objective.
    pub successful: usize,
    /// Mean objective of successful replicates only.
    pub mean_successful: Option<f64>,
    /// No replicate succeeded; `score` is the penalty.
    pub penalized: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl TrialRecord {
    pub fn from_runs(
        number: usize,
        params: ParameterSet,
        runs: Vec<RunResult>,
        failure_penalty: f64,
        started_at: DateTime<Utc>,
    ) -> Self {
        let objectives: Vec<f64> = runs.iter().filter_map(usable_objective).collect();
        let successful = objectives.len();
        let mean_successful =
            (successful > 0).then(|| objectives.iter().sum::<f64>() / successful as f64);

        Self {
            id: Uuid::new_v4(),
            number,
            params,
            score: trial_score(&runs, failure_penalty),
            successful,
            mean_successful,
            penalized: successful == 0,
            runs,
            started_at,
            finished_at: Utc::now(),
        }
    }

    pub fn seeds(&self) -> impl Iterator<Item = u64> + '_ {
        self.runs.iter().map(|r| r.seed)
    }

    pub fn failures(&self) -> usize {
        self.runs.len() - self.successful
    }
}

/// Arithmetic mean of per-replicate objectives, substituting
/// `failure_penalty` for replicates without one.
pub fn trial_score(runs: &[RunResult], failure_penalty: f64) -> f64 {
    if runs.is_empty() {
        return failure_penalty;
    }
    let total: f64 = runs
        .iter()
        .map(|r| usable_objective(r).unwrap_or(failure_penalty))
        .sum();
    total / runs.len() as f64
}

fn usable_objective(run: &RunResult) -> Option<f64> {
    run.objective.filter(|o| o.is_finite())
}

// ---------------------------------------------------------------------------
// Study history
// ---------------------------------------------------------------------------

/// Durable history of one named study.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudyState {
    pub id: StudyId,
    pub name: String,
    pub strategy: String,
    pub search_space: SearchSpace,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub trials: Vec<TrialRecord>,
}

impl StudyState {
    pub fn new(config: &StudyConfig) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: config.name.clone(),
            strategy: config.strategy.clone(),
            search_space: config.search_space.clone(),
            created_at: now,
            updated_at: now,
            trials: Vec::new(),
        }
    }

    /// Lowest-scoring trial so far; earlier trials win ties.
    pub fn best(&self) -> Option<&TrialRecord> {
        self.trials.iter().fold(None, |best: Option<&TrialRecord>, trial| match best {
            Some(b) if trial.score >= b.score => Some(b),
            _ => Some(trial),
        })
    }

    pub fn next_number(&self) -> usize {
        self.trials.iter().map(|t| t.number + 1).max().unwrap_or(0)
    }

    pub fn push(&mut self, trial: TrialRecord) {
        self.updated_at = Utc::now();
        self.trials.push(trial);
    }
}
