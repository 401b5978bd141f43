use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use st_optimizer::{SearchSpace, Study, StudyConfig, TrialOrchestrator, TrialSettings};
use st_runner::RunExecutor;
use st_types::{ParameterSet, RunErrorKind, RunResult};

fn reference_params() -> ParameterSet {
    ParameterSet::new()
        .with("occlusion_penalty", 5.0)
        .with("enemy_w", 40.0)
        .with("enemy_h", 25.0)
}

#[cfg(unix)]
#[tokio::test]
async fn scripted_game_scores_reference_trial() {
    use st_runner::{ProcessExecutor, SimulationConfig};

    let dir = TempDir::new().unwrap();
    let logs = dir.path().join("logs");
    let script = dir.path().join("game.sh");
    std::fs::write(
        &script,
        format!(
            r#"while [ $# -gt 0 ]; do if [ "$1" = "--seed" ]; then seed="$2"; fi; shift; done
[ "$AI_ENEMY_W" = "40" ] || exit 2
printf '{{"duration_seconds": 10, "enemy_hits_taken": 0, "powerup_pickup_latency_avg": 2.0, "powerups_collected": 1}}' > "{}/run_$seed.json"
"#,
            logs.display()
        ),
    )
    .unwrap();

    let config = SimulationConfig::new("/bin/sh", &logs)
        .with_leading_args(vec![script.to_string_lossy().into_owned()]);
    let executor = Arc::new(ProcessExecutor::new(config).unwrap());
    let orch = TrialOrchestrator::new(executor, TrialSettings::default(), None);

    let record = orch
        .run_trial(0, reference_params(), Some(vec![1, 2, 3]))
        .await
        .unwrap();

    assert_eq!(record.score, 4.0);
    assert_eq!(record.successful, 3);
    for run in &record.runs {
        assert_eq!(run.objective, Some(4.0));
        assert!(logs.join(format!("run_{}.json", run.seed)).exists());
    }
}

/// Scores a parameter set by its distance to a target, failing one seed in
/// five.
struct DistanceExecutor {
    calls: AtomicUsize,
}

#[async_trait]
impl RunExecutor for DistanceExecutor {
    async fn execute(&self, params: &ParameterSet, seed: u64, _timeout: Duration) -> RunResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if seed % 5 == 0 {
            return RunResult::failed(seed, params.clone(), RunErrorKind::Timeout);
        }
        let target = reference_params();
        let distance: f64 = params
            .iter()
            .map(|(name, v)| (v - target.get(name).unwrap_or(0.0)).abs())
            .sum();
        let mut run = RunResult::failed(seed, params.clone(), RunErrorKind::NoLog);
        run.error = None;
        run.objective = Some(distance);
        run
    }
}

fn study_config(dir: &TempDir) -> StudyConfig {
    StudyConfig::new("space_inv", SearchSpace::standard(), "bayesian")
        .with_storage(dir.path().to_string_lossy().into_owned())
        .with_seeds_per_trial(2)
        .with_rng_seed(Some(11))
}

#[tokio::test]
async fn optimize_persists_every_trial_and_resumes() {
    let dir = TempDir::new().unwrap();
    let config = study_config(&dir);
    let executor = Arc::new(DistanceExecutor {
        calls: AtomicUsize::new(0),
    });
    let orch = TrialOrchestrator::new(Arc::clone(&executor), config.trials.clone(), Some(1));

    let mut study = Study::open(&config).unwrap();
    let summary = orch
        .optimize(&mut study, 6, std::future::pending())
        .await
        .unwrap();
    assert_eq!(summary.trials_run, 6);
    assert!(!summary.interrupted);
    assert_eq!(executor.calls.load(Ordering::SeqCst), 12);

    let best = summary.best.clone().unwrap();
    for trial in &study.state().trials {
        assert!(best.score <= trial.score);
        assert!(config.search_space.contains(&trial.params));
    }
    drop(study);

    let stored = Study::load_existing(&config.storage, "space_inv").unwrap();
    assert_eq!(stored.trials.len(), 6);

    let mut resumed = Study::open(&config).unwrap();
    let summary = orch
        .optimize(&mut resumed, 2, std::future::pending())
        .await
        .unwrap();
    assert_eq!(summary.trials_run, 2);
    let numbers: Vec<usize> = resumed.state().trials.iter().map(|t| t.number).collect();
    assert_eq!(numbers, (0..8).collect::<Vec<_>>());
    assert!(summary.best.unwrap().score <= best.score);
}

#[tokio::test]
async fn interrupt_leaves_history_intact() {
    let dir = TempDir::new().unwrap();
    let config = study_config(&dir);
    let executor = Arc::new(DistanceExecutor {
        calls: AtomicUsize::new(0),
    });
    let orch = TrialOrchestrator::new(executor, config.trials.clone(), Some(2));

    let mut study = Study::open(&config).unwrap();
    orch.optimize(&mut study, 2, std::future::pending())
        .await
        .unwrap();

    let summary = orch
        .optimize(&mut study, 5, std::future::ready(()))
        .await
        .unwrap();
    assert!(summary.interrupted);
    assert_eq!(summary.trials_run, 0);
    drop(study);

    let stored = Study::load_existing(&config.storage, "space_inv").unwrap();
    assert_eq!(stored.trials.len(), 2);
}
