//! Durable, named studies.
//!
//! A study is one JSON document per name under a storage directory. Only
//! one process should drive a given study at a time; every write replaces
//! the document atomically so an interrupted session leaves the last
//! completed trial intact.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use st_types::{config_error, validation_error, ParameterSet, TuneError, TuneResult};

use crate::search::{build_strategy, SearchStrategy};
use crate::trial::{StudyConfig, StudyState, TrialRecord};

/// Where study documents live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StudyStore {
    root: PathBuf,
}

impl StudyStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Resolve a storage location string.
    ///
    /// Accepts a plain directory or a `file://` URL. An empty string means
    /// the per-user data directory.
    pub fn from_location(location: &str) -> TuneResult<Self> {
        let location = location.trim();
        if location.is_empty() {
            return Ok(Self::new(Self::default_root()));
        }
        if let Some(path) = location.strip_prefix("file://") {
            return Ok(Self::new(path));
        }
        if let Some((scheme, _)) = location.split_once("://") {
            return Err(config_error!("unsupported study storage scheme '{scheme}'"));
        }
        Ok(Self::new(location))
    }

    pub fn default_root() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("spacetune")
            .join("studies")
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, name: &str) -> TuneResult<PathBuf> {
        let valid = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
            && !name.starts_with('.');
        if !valid {
            return Err(validation_error!("invalid study name '{name}'"));
        }
        Ok(self.root.join(format!("{name}.json")))
    }

    pub fn exists(&self, name: &str) -> TuneResult<bool> {
        Ok(self.path_for(name)?.is_file())
    }

    pub fn load(&self, name: &str) -> TuneResult<StudyState> {
        let path = self.path_for(name)?;
        let text = fs::read_to_string(&path).map_err(|e| {
            let reason = match e.kind() {
                io::ErrorKind::NotFound => format!("no study at {}", path.display()),
                _ => format!("cannot read {}: {e}", path.display()),
            };
            TuneError::study_unavailable(name, reason)
        })?;
        serde_json::from_str(&text).map_err(|e| {
            TuneError::study_unavailable(name, format!("corrupt study {}: {e}", path.display()))
        })
    }

    pub fn save(&self, state: &StudyState) -> TuneResult<()> {
        let path = self.path_for(&state.name)?;
        fs::create_dir_all(&self.root)?;
        let tmp = self.root.join(format!(".{}.json.tmp", state.name));
        fs::write(&tmp, serde_json::to_vec_pretty(state)?)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }
}

/// An open study: persisted history plus the strategy proposing candidates.
pub struct Study {
    store: StudyStore,
    state: StudyState,
    strategy: Box<dyn SearchStrategy>,
}

impl Study {
    /// Create the study if absent, otherwise resume it.
    ///
    /// Resuming replays every recorded trial into the strategy so the
    /// search continues from history instead of starting over.
    pub fn open(config: &StudyConfig) -> TuneResult<Self> {
        let store = StudyStore::from_location(&config.storage)
            .map_err(|e| TuneError::study_unavailable(&config.name, e))?;
        let mut strategy = build_strategy(
            &config.strategy,
            config.search_space.clone(),
            config.exploration_weight,
            config.grid_steps,
            config.rng_seed,
        )?;

        let state = if store.exists(&config.name)? {
            let state = store.load(&config.name)?;
            if state.search_space != config.search_space {
                warn!(study = %config.name, "search space differs from stored study; new suggestions use the configured space");
            }
            for trial in &state.trials {
                strategy.report(&trial.params, trial.score);
            }
            info!(
                study = %config.name,
                trials = state.trials.len(),
                best = ?state.best().map(|t| t.score),
                "resumed study"
            );
            state
        } else {
            let state = StudyState::new(config);
            store
                .save(&state)
                .map_err(|e| TuneError::study_unavailable(&config.name, e))?;
            info!(study = %config.name, root = %store.root().display(), "created study");
            state
        };

        Ok(Self {
            store,
            state,
            strategy,
        })
    }

    /// Load an existing study's history without opening it for search.
    pub fn load_existing(storage: &str, name: &str) -> TuneResult<StudyState> {
        let store =
            StudyStore::from_location(storage).map_err(|e| TuneError::study_unavailable(name, e))?;
        store.load(name)
    }

    pub fn name(&self) -> &str {
        &self.state.name
    }

    pub fn state(&self) -> &StudyState {
        &self.state
    }

    pub fn strategy_name(&self) -> &str {
        self.strategy.name()
    }

    /// Next candidate, or `None` once the strategy is exhausted.
    pub fn suggest(&mut self) -> Option<ParameterSet> {
        self.strategy.suggest(1).pop()
    }

    /// Record a finished trial: report it to the strategy and persist.
    pub fn tell(&mut self, trial: TrialRecord) -> TuneResult<()> {
        self.strategy.report(&trial.params, trial.score);
        self.state.push(trial);
        self.store.save(&self.state)
    }

    pub fn best(&self) -> Option<&TrialRecord> {
        self.state.best()
    }
}
