use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use st_analysis::{load_artifacts, render_report, summarize, SortMetric, ValidationConfig, Validator};
use st_optimizer::{SearchSpace, Study, StudyConfig, StudyState, TrialOrchestrator};
use st_runner::{CollectMode, EnvMapping, ProcessExecutor, SimulationConfig};
use st_types::TuneError;

#[derive(Parser, Debug)]
#[command(name = "spacetune")]
#[command(about = "Black-box parameter tuning for the space game autopilot")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug, Clone)]
struct StudyArgs {
    /// Study name
    #[arg(long, env = "TUNE_STUDY_NAME", default_value = "space_inv")]
    study: String,
    /// Study storage directory (or file:// URL); defaults to the user data dir
    #[arg(long, env = "TUNE_STORAGE", default_value = "")]
    storage: String,
}

#[derive(Args, Debug, Clone)]
struct GameArgs {
    /// Game executable
    #[arg(long, env = "SPACETUNE_GAME_EXE")]
    game: PathBuf,
    /// Arguments placed before the game flags (e.g. a script path for an interpreter)
    #[arg(long = "game-arg", allow_hyphen_values = true)]
    game_args: Vec<String>,
    /// Working directory for the game process
    #[arg(long)]
    workdir: Option<PathBuf>,
    /// Directory the game writes run_<seed>.json into
    #[arg(long, env = "SPACETUNE_LOGS_DIR", default_value = "logs")]
    logs_dir: PathBuf,
}

impl GameArgs {
    fn simulation(&self, headless: bool) -> SimulationConfig {
        let mut config = SimulationConfig::new(&self.game, &self.logs_dir)
            .with_leading_args(self.game_args.clone())
            .with_headless(headless);
        if let Some(dir) = &self.workdir {
            config = config.with_working_dir(dir);
        }
        config
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run optimization trials against a named study
    Tune {
        #[command(flatten)]
        study: StudyArgs,
        #[command(flatten)]
        game: GameArgs,
        #[arg(long, env = "N_TRIALS", default_value_t = 30)]
        trials: usize,
        #[arg(long, env = "SEEDS_PER_TRIAL", default_value_t = 3)]
        seeds_per_trial: usize,
        /// Per-run timeout in seconds
        #[arg(long, env = "RUN_TIMEOUT", default_value_t = 180)]
        timeout: u64,
        /// Replicates run at once
        #[arg(long, default_value_t = 1)]
        jobs: usize,
        #[arg(long, value_enum, default_value_t = CliStrategy::Bayesian)]
        strategy: CliStrategy,
        /// Pass --headless to the game
        #[arg(long, default_value_t = false)]
        headless: bool,
        /// Seed for the search strategy and seed generator
        #[arg(long)]
        rng_seed: Option<u64>,
    },
    /// Summarize run artifacts grouped by parameter set
    Aggregate {
        #[arg(long, env = "SPACETUNE_LOGS_DIR", default_value = "logs")]
        logs_dir: PathBuf,
        #[arg(long, value_enum, default_value_t = CliSortMetric::Latency)]
        sort: CliSortMetric,
        #[arg(long, default_value_t = 10)]
        top: usize,
        #[command(flatten)]
        study: StudyArgs,
    },
    /// Re-run the study's best parameters across many seeds
    Validate {
        #[command(flatten)]
        study: StudyArgs,
        #[command(flatten)]
        game: GameArgs,
        #[arg(long, default_value_t = 30)]
        runs: usize,
        /// Per-run timeout in seconds
        #[arg(long, default_value_t = 120)]
        timeout: u64,
        /// First seed; consecutive seeds follow. Random when omitted.
        #[arg(long)]
        seed_start: Option<u64>,
        #[arg(long)]
        rng_seed: Option<u64>,
        /// Fall back to the newest artifact when no seed-keyed one exists
        #[arg(long, default_value_t = false)]
        fallback: bool,
    },
    /// Print the best trial recorded in a study
    Best {
        #[command(flatten)]
        study: StudyArgs,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum CliStrategy {
    Grid,
    Random,
    Bayesian,
}

impl CliStrategy {
    fn as_str(self) -> &'static str {
        match self {
            Self::Grid => "grid",
            Self::Random => "random",
            Self::Bayesian => "bayesian",
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum CliSortMetric {
    Latency,
    Objective,
    Powerups,
}

impl From<CliSortMetric> for SortMetric {
    fn from(metric: CliSortMetric) -> Self {
        match metric {
            CliSortMetric::Latency => SortMetric::Latency,
            CliSortMetric::Objective => SortMetric::Objective,
            CliSortMetric::Powerups => SortMetric::Powerups,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Tune {
            study,
            game,
            trials,
            seeds_per_trial,
            timeout,
            jobs,
            strategy,
            headless,
            rng_seed,
        } => {
            let space = SearchSpace::standard();
            EnvMapping::standard().check_covers(space.names())?;

            let config = StudyConfig::new(&study.study, space, strategy.as_str())
                .with_storage(&study.storage)
                .with_max_trials(trials)
                .with_seeds_per_trial(seeds_per_trial)
                .with_timeout_seconds(timeout)
                .with_concurrency(jobs)
                .with_rng_seed(rng_seed);
            cmd_tune(config, game.simulation(headless)).await
        }
        Commands::Aggregate {
            logs_dir,
            sort,
            top,
            study,
        } => cmd_aggregate(&logs_dir, sort.into(), top, &study),
        Commands::Validate {
            study,
            game,
            runs,
            timeout,
            seed_start,
            rng_seed,
            fallback,
        } => {
            let mode = if fallback {
                CollectMode::NewestFallback
            } else {
                CollectMode::SeedKeyed
            };
            let validation = ValidationConfig {
                runs,
                timeout_seconds: timeout,
                seed_start,
                rng_seed,
                ..ValidationConfig::default()
            };
            cmd_validate(&study, game.simulation(true).with_collect_mode(mode), validation).await
        }
        Commands::Best { study } => {
            let state = Study::load_existing(&study.storage, &study.study)?;
            print_best(&state)
        }
    }
}

async fn cmd_tune(config: StudyConfig, simulation: SimulationConfig) -> Result<()> {
    let mut study = Study::open(&config).context("failed to open study")?;
    let executor = Arc::new(ProcessExecutor::new(simulation)?);
    let orchestrator = TrialOrchestrator::new(executor, config.trials.clone(), config.rng_seed);

    info!(
        study = study.name(),
        strategy = study.strategy_name(),
        trials = config.max_trials,
        seeds_per_trial = config.trials.seeds_per_trial,
        "starting tuning session"
    );

    let shutdown = async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };
    let summary = orchestrator
        .optimize(&mut study, config.max_trials, shutdown)
        .await?;

    info!(
        trials_run = summary.trials_run,
        trials_penalized = summary.trials_penalized,
        interrupted = summary.interrupted,
        exhausted = summary.exhausted,
        "tuning session finished"
    );
    print_best(study.state())
}

fn cmd_aggregate(logs_dir: &Path, metric: SortMetric, top: usize, study: &StudyArgs) -> Result<()> {
    let loaded = load_artifacts(logs_dir)
        .with_context(|| format!("failed to read artifacts in {}", logs_dir.display()))?;
    if loaded.entries.is_empty() {
        println!("no run artifacts found in {}", logs_dir.display());
    } else {
        let summaries = summarize(&loaded.entries, metric);
        println!(
            "{} artifacts in {} groups ({} skipped)",
            loaded.entries.len(),
            summaries.len(),
            loaded.skipped.len()
        );
        print!("{}", render_report(&summaries, top));
    }

    match Study::load_existing(&study.storage, &study.study) {
        Ok(state) => print_best(&state)?,
        Err(e) => println!("study best unavailable: {e}"),
    }
    Ok(())
}

async fn cmd_validate(
    study: &StudyArgs,
    simulation: SimulationConfig,
    config: ValidationConfig,
) -> Result<()> {
    let state = Study::load_existing(&study.storage, &study.study)?;
    let Some(best) = state.best() else {
        return Err(TuneError::study_unavailable(&state.name, "no completed trials").into());
    };
    let params = best.params.clone();
    info!(study = %state.name, trial = best.number, score = best.score, %params, "validating best parameters");

    let executor = Arc::new(ProcessExecutor::new(simulation)?);
    let store = executor.store().clone();
    let summary = Validator::new(executor, config).validate(&params).await;
    let path = summary.persist(&store)?;

    println!("{}", serde_json::to_string_pretty(&summary)?);
    println!("summary written to {}", path.display());
    if summary.samples.iter().all(|s| s.error.is_some()) {
        warn!(requested = summary.runs_requested, "no validation run completed");
        bail!("all {} validation runs failed", summary.runs_requested);
    }
    Ok(())
}

fn print_best(state: &StudyState) -> Result<()> {
    match state.best() {
        Some(best) => {
            println!(
                "study '{}': best trial #{} score={:.3} ({} of {} runs failed)",
                state.name,
                best.number,
                best.score,
                best.failures(),
                best.runs.len()
            );
            println!("{}", serde_json::to_string_pretty(&best.params)?);
        }
        None => println!("study '{}' has no completed trials", state.name),
    }
    Ok(())
}
