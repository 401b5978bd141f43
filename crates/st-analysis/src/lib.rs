//! # st-analysis
//!
//! Offline analysis of the run-log corpus: grouping artifacts by parameter
//! signature, and re-running a chosen parameter set across many seeds to
//! estimate its true performance.

mod aggregator;
mod stats;
mod validator;

pub use aggregator::{
    load_artifacts, render_report, summarize, ArtifactEntry, GroupKey, LoadedArtifacts,
    ParameterGroupSummary, SortMetric,
};
pub use stats::{mean, sample_stdev};
pub use validator::{
    ValidationConfig, ValidationSample, ValidationSummary, Validator, VALIDATION_SUMMARY_FILE,
};
