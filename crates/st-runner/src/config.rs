//! How to launch the simulation.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use st_types::{config_error, ParameterSet, TuneResult};

use crate::collector::CollectMode;

/// Fixed mapping from parameter name to the environment variable the
/// simulation reads it from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvMapping {
    /// `(parameter, env var)` pairs.
    pub entries: Vec<(String, String)>,
}

impl Default for EnvMapping {
    fn default() -> Self {
        Self::standard()
    }
}

impl EnvMapping {
    /// The mapping the game's AI controller understands.
    pub fn standard() -> Self {
        Self {
            entries: vec![
                ("occlusion_penalty".into(), "AI_OCCLUSION_PENALTY".into()),
                ("enemy_w".into(), "AI_ENEMY_W".into()),
                ("enemy_h".into(), "AI_ENEMY_H".into()),
            ],
        }
    }

    /// Environment variables for a parameter set.
    pub fn render(&self, params: &ParameterSet) -> TuneResult<Vec<(String, String)>> {
        self.entries
            .iter()
            .map(|(param, var)| {
                let value = params
                    .get(param)
                    .ok_or_else(|| config_error!("parameter '{param}' missing for {var}"))?;
                Ok((var.clone(), value.to_string()))
            })
            .collect()
    }

    /// Fail unless the mapping covers exactly the given parameter names.
    pub fn check_covers<'a>(&self, names: impl IntoIterator<Item = &'a str>) -> TuneResult<()> {
        let declared: Vec<&str> = names.into_iter().collect();
        for name in &declared {
            if !self.entries.iter().any(|(p, _)| p == name) {
                return Err(config_error!("no environment variable mapped for parameter '{name}'"));
            }
        }
        for (param, var) in &self.entries {
            if !declared.contains(&param.as_str()) {
                return Err(config_error!(
                    "{var} expects parameter '{param}' which is not in the search space"
                ));
            }
        }
        Ok(())
    }
}

/// Launch configuration for the external simulation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Executable to run.
    pub program: PathBuf,
    /// Arguments placed before the autoplay/seed flags (e.g. a script path
    /// when `program` is an interpreter).
    pub leading_args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    /// Where the simulation writes `run_<seed>.json`.
    pub logs_dir: PathBuf,
    /// Pass `--headless` in addition to `--autoplay`.
    pub headless: bool,
    pub env: EnvMapping,
    pub collect_mode: CollectMode,
}

impl SimulationConfig {
    pub fn new(program: impl Into<PathBuf>, logs_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            leading_args: Vec::new(),
            working_dir: None,
            logs_dir: logs_dir.into(),
            headless: false,
            env: EnvMapping::standard(),
            collect_mode: CollectMode::SeedKeyed,
        }
    }

    pub fn with_leading_args(mut self, args: Vec<String>) -> Self {
        self.leading_args = args;
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_headless(mut self, headless: bool) -> Self {
        self.headless = headless;
        self
    }

    pub fn with_collect_mode(mut self, mode: CollectMode) -> Self {
        self.collect_mode = mode;
        self
    }

    /// Full argument list for one run.
    pub fn command_args(&self, seed: u64) -> Vec<String> {
        let mut args = self.leading_args.clone();
        args.push("--autoplay".into());
        if self.headless {
            args.push("--headless".into());
        }
        args.push("--seed".into());
        args.push(seed.to_string());
        args
    }
}
