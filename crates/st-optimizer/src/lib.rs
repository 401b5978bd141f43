//! # st-optimizer
//!
//! Parameter search and trial orchestration for spacetune.
//!
//! Provides search space definitions, proposer strategies (grid, random,
//! Bayesian-style), durable resumable studies, and the orchestrator that
//! runs seeded replicates for each candidate and reports their mean score.

mod orchestrator;
mod search;
mod study;
mod trial;

pub use orchestrator::{OptimizeSummary, TrialOrchestrator};
pub use search::{
    build_strategy, BayesianSearch, GridSearch, ParameterDef, RandomSearch, SearchSpace,
    SearchStrategy,
};
pub use study::{Study, StudyStore};
pub use trial::{trial_score, StudyConfig, StudyId, StudyState, TrialRecord, TrialSettings};
