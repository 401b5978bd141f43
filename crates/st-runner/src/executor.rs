//! Launching one simulation run under a timeout.

use async_trait::async_trait;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{debug, info, warn};

use st_types::{ParameterSet, RunErrorKind, RunResult, TuneResult};

use crate::artifacts::ArtifactStore;
use crate::collector::{CollectError, LogCollector};
use crate::config::SimulationConfig;
use crate::objective::ObjectiveComputer;

/// Executes a single seeded run of the simulation.
///
/// Implementations never fail: every problem is folded into the returned
/// [`RunResult`]'s error tag.
#[async_trait]
pub trait RunExecutor: Send + Sync {
    async fn execute(&self, params: &ParameterSet, seed: u64, timeout: Duration) -> RunResult;
}

/// Runs the real simulation as a child process.
///
/// After `execute` returns, exactly one artifact exists for the seed: the
/// collected record enriched with params, seed and objective, or a minimal
/// failure record.
#[derive(Debug, Clone)]
pub struct ProcessExecutor {
    config: SimulationConfig,
    collector: LogCollector,
}

impl ProcessExecutor {
    pub fn new(config: SimulationConfig) -> TuneResult<Self> {
        let store = ArtifactStore::new(&config.logs_dir)?;
        let collector = LogCollector::new(store, config.collect_mode);
        Ok(Self { config, collector })
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn store(&self) -> &ArtifactStore {
        self.collector.store()
    }

    fn command(&self, params: &ParameterSet, seed: u64) -> TuneResult<Command> {
        let mut cmd = Command::new(&self.config.program);
        cmd.args(self.config.command_args(seed))
            .envs(self.config.env.render(params)?)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.config.working_dir {
            cmd.current_dir(dir);
        }
        Ok(cmd)
    }

    /// Persist the artifact for a finished run and hand the result back.
    fn finish(&self, result: RunResult) -> RunResult {
        if let Err(e) = self.store().write(&result) {
            warn!(
                seed = result.seed,
                path = %self.store().path_for(result.seed).display(),
                error = %e,
                "failed to write run artifact"
            );
        }
        result
    }

    fn fail(&self, params: &ParameterSet, seed: u64, kind: RunErrorKind) -> RunResult {
        self.finish(RunResult::failed(seed, params.clone(), kind))
    }
}

#[async_trait]
impl RunExecutor for ProcessExecutor {
    async fn execute(&self, params: &ParameterSet, seed: u64, timeout: Duration) -> RunResult {
        let path = self.store().path_for(seed);

        // A leftover artifact must never be read as this run's output.
        if let Err(e) = self.store().remove(seed) {
            warn!(seed, path = %path.display(), error = %e, "cannot remove stale artifact");
            return self.fail(params, seed, RunErrorKind::ProcessError);
        }

        let mut cmd = match self.command(params, seed) {
            Ok(cmd) => cmd,
            Err(e) => {
                warn!(seed, error = %e, "cannot build simulation command");
                return self.fail(params, seed, RunErrorKind::ProcessError);
            }
        };

        let baseline = self.collector.baseline(seed);
        debug!(seed, %params, program = %self.config.program.display(), "launching simulation");
        let started = Instant::now();

        let output = match tokio::time::timeout(timeout, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                warn!(seed, error = %e, "failed to launch simulation");
                return self.fail(params, seed, RunErrorKind::ProcessError);
            }
            Err(_) => {
                // Dropping the output future kills the child.
                warn!(
                    seed,
                    timeout_secs = timeout.as_secs_f64(),
                    path = %path.display(),
                    "run timed out"
                );
                return self.fail(params, seed, RunErrorKind::Timeout);
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(
                seed,
                status = %output.status,
                stderr = %stderr.trim_end(),
                path = %path.display(),
                "simulation exited with failure"
            );
            return self.fail(params, seed, RunErrorKind::ProcessError);
        }

        let collected = match self.collector.collect(seed, baseline.as_ref()) {
            Ok(c) => Ok((c.file_name(), c.record)),
            Err(CollectError::NoLog { path }) => {
                let stdout = String::from_utf8_lossy(&output.stdout);
                match LogCollector::parse_stdout(&stdout) {
                    Some(record) => {
                        debug!(seed, "artifact missing, using record from stdout");
                        Ok((ArtifactStore::file_name(seed), record))
                    }
                    None => Err(CollectError::NoLog { path }),
                }
            }
            Err(e) => Err(e),
        };

        match collected {
            Ok((artifact, record)) => {
                let objective = ObjectiveComputer::compute(&record);
                info!(
                    seed,
                    objective,
                    elapsed_secs = started.elapsed().as_secs_f64(),
                    "run completed"
                );
                let result = RunResult::from_record(seed, params.clone(), &record, Some(objective))
                    .with_artifact(artifact);
                self.finish(result)
            }
            Err(e) => {
                warn!(seed, path = %e.path().display(), error = %e, "run left no usable record");
                self.fail(params, seed, e.kind())
            }
        }
    }
}
