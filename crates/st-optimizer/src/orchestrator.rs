//! The tuning loop: propose, run replicates, score, report.

use chrono::Utc;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};

use st_runner::RunExecutor;
use st_types::{validation_error, ParameterSet, RunErrorKind, RunResult, TuneResult};

use crate::study::Study;
use crate::trial::{TrialRecord, TrialSettings};

/// Outcome of an [`TrialOrchestrator::optimize`] session.
#[derive(Debug, Clone, PartialEq)]
pub struct OptimizeSummary {
    pub trials_run: usize,
    pub trials_penalized: usize,
    /// Stopped by the shutdown signal before `n_trials` completed.
    pub interrupted: bool,
    /// The strategy ran out of candidates.
    pub exhausted: bool,
    pub best: Option<TrialRecord>,
}

/// Drives trials against a [`RunExecutor`].
pub struct TrialOrchestrator<E: RunExecutor + 'static> {
    executor: Arc<E>,
    settings: TrialSettings,
    rng: Mutex<StdRng>,
}

impl<E: RunExecutor + 'static> TrialOrchestrator<E> {
    pub fn new(executor: Arc<E>, settings: TrialSettings, rng_seed: Option<u64>) -> Self {
        let rng = match rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            executor,
            settings,
            rng: Mutex::new(rng),
        }
    }

    pub fn settings(&self) -> &TrialSettings {
        &self.settings
    }

    /// Draw `count` distinct seeds from the configured range.
    pub fn generate_seeds(&self, count: usize) -> TuneResult<Vec<u64>> {
        let (low, high) = (self.settings.seed_low, self.settings.seed_high);
        if low > high || (high - low).saturating_add(1) < count as u64 {
            return Err(validation_error!(
                "cannot draw {count} distinct seeds from [{low}, {high}]"
            ));
        }
        let mut rng = self.rng.lock();
        let mut seen = HashSet::with_capacity(count);
        let mut seeds = Vec::with_capacity(count);
        while seeds.len() < count {
            let seed = rng.gen_range(low..=high);
            if seen.insert(seed) {
                seeds.push(seed);
            }
        }
        Ok(seeds)
    }

    /// Run one trial: every seed once, then score.
    ///
    /// `seeds` defaults to `seeds_per_trial` fresh random seeds. Supplied
    /// seeds must be distinct.
    pub async fn run_trial(
        &self,
        number: usize,
        params: ParameterSet,
        seeds: Option<Vec<u64>>,
    ) -> TuneResult<TrialRecord> {
        let seeds = match seeds {
            Some(seeds) => seeds,
            None => self.generate_seeds(self.settings.seeds_per_trial)?,
        };
        if seeds.is_empty() {
            return Err(validation_error!("a trial needs at least one seed"));
        }
        let mut unique = HashSet::with_capacity(seeds.len());
        if let Some(dup) = seeds.iter().find(|s| !unique.insert(**s)) {
            return Err(validation_error!("seed {dup} repeated within trial {number}"));
        }

        let started_at = Utc::now();
        info!(trial = number, %params, seeds = ?seeds, "starting trial");
        let runs = self.execute_all(&params, &seeds).await;

        for run in runs.iter().filter(|r| r.objective.is_none()) {
            warn!(
                trial = number,
                seed = run.seed,
                error = %run.error.unwrap_or(RunErrorKind::ProcessError),
                penalty = self.settings.failure_penalty,
                "replicate failed, substituting penalty"
            );
        }

        let record = TrialRecord::from_runs(
            number,
            params,
            runs,
            self.settings.failure_penalty,
            started_at,
        );
        info!(
            trial = number,
            score = record.score,
            successful = record.successful,
            requested = record.runs.len(),
            "trial finished"
        );
        Ok(record)
    }

    /// Execute each seed, sequentially or with bounded concurrency.
    /// Results come back in seed order.
    async fn execute_all(&self, params: &ParameterSet, seeds: &[u64]) -> Vec<RunResult> {
        let timeout = self.settings.timeout();
        if self.settings.concurrency <= 1 || seeds.len() == 1 {
            let mut runs = Vec::with_capacity(seeds.len());
            for &seed in seeds {
                runs.push(self.executor.execute(params, seed, timeout).await);
            }
            return runs;
        }

        let permits = Arc::new(Semaphore::new(self.settings.concurrency));
        let mut tasks = JoinSet::new();
        for (index, &seed) in seeds.iter().enumerate() {
            let executor = Arc::clone(&self.executor);
            let permits = Arc::clone(&permits);
            let params = params.clone();
            tasks.spawn(async move {
                let _permit = permits.acquire_owned().await;
                (index, executor.execute(&params, seed, timeout).await)
            });
        }

        let mut slots: Vec<Option<RunResult>> = vec![None; seeds.len()];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, run)) => slots[index] = Some(run),
                Err(e) => warn!(error = %e, "replicate task aborted"),
            }
        }
        slots
            .into_iter()
            .zip(seeds)
            .map(|(slot, &seed)| {
                slot.unwrap_or_else(|| {
                    RunResult::failed(seed, params.clone(), RunErrorKind::ProcessError)
                })
            })
            .collect()
    }

    /// Run up to `n_trials` trials against `study`, persisting each one.
    ///
    /// When `shutdown` resolves, the in-flight trial is abandoned (its child
    /// processes are killed) and nothing is recorded for it; completed
    /// trials are already on disk.
    pub async fn optimize<F>(
        &self,
        study: &mut Study,
        n_trials: usize,
        shutdown: F,
    ) -> TuneResult<OptimizeSummary>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut summary = OptimizeSummary {
            trials_run: 0,
            trials_penalized: 0,
            interrupted: false,
            exhausted: false,
            best: None,
        };

        while summary.trials_run < n_trials {
            let Some(params) = study.suggest() else {
                info!(study = study.name(), "search space exhausted");
                summary.exhausted = true;
                break;
            };
            let number = study.state().next_number();

            let record = tokio::select! {
                biased;
                _ = &mut shutdown => {
                    warn!(study = study.name(), trial = number, "interrupted, discarding in-flight trial");
                    summary.interrupted = true;
                    break;
                }
                record = self.run_trial(number, params, None) => record?,
            };

            summary.trials_run += 1;
            if record.penalized {
                summary.trials_penalized += 1;
            }
            study.tell(record)?;

            if let Some(best) = study.best() {
                info!(
                    study = study.name(),
                    best_trial = best.number,
                    best_score = best.score,
                    "best so far"
                );
            }
        }

        summary.best = study.best().cloned();
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::time::Duration;

    /// Executor answering from a table of per-seed objectives.
    struct TableExecutor {
        objectives: HashMap<u64, Option<f64>>,
        calls: Mutex<Vec<u64>>,
    }

    #[async_trait]
    impl RunExecutor for TableExecutor {
        async fn execute(&self, params: &ParameterSet, seed: u64, _timeout: Duration) -> RunResult {
            self.calls.lock().push(seed);
            match self.objectives.get(&seed).copied().flatten() {
                Some(objective) => {
                    let mut run = RunResult::failed(seed, params.clone(), RunErrorKind::NoLog);
                    run.error = None;
                    run.objective = Some(objective);
                    run
                }
                None => RunResult::failed(seed, params.clone(), RunErrorKind::Timeout),
            }
        }
    }

    fn orchestrator(
        table: &[(u64, Option<f64>)],
        concurrency: usize,
    ) -> TrialOrchestrator<TableExecutor> {
        let executor = TableExecutor {
            objectives: table.iter().copied().collect(),
            calls: Mutex::new(Vec::new()),
        };
        let settings = TrialSettings {
            concurrency,
            failure_penalty: 1000.0,
            ..TrialSettings::default()
        };
        TrialOrchestrator::new(Arc::new(executor), settings, Some(5))
    }

    fn params() -> ParameterSet {
        ParameterSet::new()
            .with("occlusion_penalty", 5.0)
            .with("enemy_w", 40.0)
            .with("enemy_h", 25.0)
    }

    #[test]
    fn generated_seeds_are_distinct_and_in_range() {
        let orch = orchestrator(&[], 1);
        let seeds = orch.generate_seeds(50).unwrap();
        let unique: HashSet<_> = seeds.iter().collect();
        assert_eq!(unique.len(), 50);
        assert!(seeds.iter().all(|s| (1..=1_000_000).contains(s)));
    }

    #[test]
    fn seed_range_too_small_is_rejected() {
        let mut orch = orchestrator(&[], 1);
        orch.settings.seed_low = 10;
        orch.settings.seed_high = 12;
        assert!(orch.generate_seeds(3).is_ok());
        assert!(orch.generate_seeds(4).is_err());
    }

    #[tokio::test]
    async fn trial_score_averages_replicates() {
        let orch = orchestrator(&[(1, Some(2.0)), (2, Some(4.0)), (3, Some(6.0))], 1);
        let record = orch.run_trial(0, params(), Some(vec![1, 2, 3])).await.unwrap();
        assert_eq!(record.score, 4.0);
        assert_eq!(record.seeds().collect::<Vec<_>>(), vec![1, 2, 3]);
        assert_eq!(*orch.executor.calls.lock(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn all_failures_score_the_penalty() {
        let orch = orchestrator(&[(1, None), (2, None), (3, None)], 1);
        let record = orch.run_trial(4, params(), Some(vec![1, 2, 3])).await.unwrap();
        assert_eq!(record.score, 1000.0);
        assert!(record.penalized);
        assert_eq!(record.runs.len(), 3);
        assert!(record.runs.iter().all(|r| r.error == Some(RunErrorKind::Timeout)));
    }

    #[tokio::test]
    async fn partial_failure_is_penalized_in_mean() {
        let orch = orchestrator(&[(1, Some(10.0)), (2, None)], 1);
        let record = orch.run_trial(0, params(), Some(vec![1, 2])).await.unwrap();
        assert_eq!(record.score, 505.0);
        assert_eq!(record.mean_successful, Some(10.0));
    }

    #[tokio::test]
    async fn duplicate_or_empty_seeds_are_rejected() {
        let orch = orchestrator(&[], 1);
        assert!(orch.run_trial(0, params(), Some(vec![1, 1])).await.is_err());
        assert!(orch.run_trial(0, params(), Some(vec![])).await.is_err());
        assert!(orch.executor.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn parallel_replicates_keep_seed_order() {
        let table: Vec<(u64, Option<f64>)> = (1..=8).map(|s| (s, Some(s as f64))).collect();
        let orch = orchestrator(&table, 3);
        let record = orch
            .run_trial(0, params(), Some((1..=8).rev().collect()))
            .await
            .unwrap();
        let seeds: Vec<u64> = record.seeds().collect();
        assert_eq!(seeds, (1..=8).rev().collect::<Vec<_>>());
        assert_eq!(record.score, 4.5);
        assert_eq!(orch.executor.calls.lock().len(), 8);
    }

    #[tokio::test]
    async fn random_seeds_use_configured_count() {
        let orch = orchestrator(&[], 1);
        let record = orch.run_trial(0, params(), None).await.unwrap();
        assert_eq!(record.runs.len(), 3);
        assert!(record.penalized);
    }
}
