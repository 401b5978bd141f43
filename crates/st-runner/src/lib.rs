//! # st-runner
//!
//! Runs the external simulation once per seed and turns whatever it leaves
//! behind into a [`RunResult`](st_types::RunResult).
//!
//! Provides the seed-keyed artifact store, the log collector (with its
//! best-effort newest-file fallback), the fixed objective formula and the
//! process executor that ties them together under a timeout.

mod artifacts;
mod collector;
mod config;
mod executor;
mod objective;

pub use artifacts::{ArtifactSnapshot, ArtifactStore, ARTIFACT_PREFIX, ARTIFACT_SUFFIX};
pub use collector::{CollectError, CollectMode, Collected, LogCollector};
pub use config::{EnvMapping, SimulationConfig};
pub use executor::{ProcessExecutor, RunExecutor};
pub use objective::ObjectiveComputer;
