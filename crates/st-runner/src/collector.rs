//! Locating and parsing the record a run left behind.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io;
use std::path::{Path, PathBuf};
use tracing::warn;

use st_types::{RawRecord, RunErrorKind, FIELD_ERROR};

use crate::artifacts::{ArtifactSnapshot, ArtifactStore};

/// How the collector finds a run's artifact.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectMode {
    /// Only the artifact named after the seed counts.
    #[default]
    SeedKeyed,
    /// When the seed-keyed artifact is missing, take the most recently
    /// modified artifact written during the run.
    ///
    /// Artifacts already present when the run started are ignored, and so
    /// is any record carrying an error tag. Best effort only: under
    /// concurrent runs the newest file may belong to another seed, so
    /// callers that execute replicates in parallel must not enable this.
    NewestFallback,
}

/// Why a record could not be collected.
#[derive(Debug, thiserror::Error)]
pub enum CollectError {
    #[error("no artifact at {}", path.display())]
    NoLog { path: PathBuf },
    #[error("unreadable artifact {}: {message}", path.display())]
    ReadError { path: PathBuf, message: String },
}

impl CollectError {
    pub fn kind(&self) -> RunErrorKind {
        match self {
            Self::NoLog { .. } => RunErrorKind::NoLog,
            Self::ReadError { .. } => RunErrorKind::ReadError,
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            Self::NoLog { path } | Self::ReadError { path, .. } => path,
        }
    }
}

/// A successfully parsed record and where it came from.
#[derive(Debug, Clone)]
pub struct Collected {
    pub record: RawRecord,
    pub path: PathBuf,
    /// True when the record came from the newest-file fallback.
    pub fallback: bool,
}

impl Collected {
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone)]
pub struct LogCollector {
    store: ArtifactStore,
    mode: CollectMode,
}

impl LogCollector {
    pub fn new(store: ArtifactStore, mode: CollectMode) -> Self {
        Self { store, mode }
    }

    pub fn mode(&self) -> CollectMode {
        self.mode
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// Directory state to compare against after the run, when the
    /// fallback is enabled. `None` disables the fallback for this run.
    pub fn baseline(&self, seed: u64) -> Option<ArtifactSnapshot> {
        if self.mode != CollectMode::NewestFallback {
            return None;
        }
        match self.store.snapshot() {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                warn!(seed, dir = %self.store.dir().display(), error = %e, "cannot scan artifacts, fallback disabled");
                None
            }
        }
    }

    /// Collect the record for `seed`.
    ///
    /// `baseline` comes from [`LogCollector::baseline`], taken before the run
    /// was launched.
    pub fn collect(
        &self,
        seed: u64,
        baseline: Option<&ArtifactSnapshot>,
    ) -> Result<Collected, CollectError> {
        let path = self.store.path_for(seed);
        match Self::read(&path) {
            Ok(record) => Ok(Collected {
                record,
                path,
                fallback: false,
            }),
            Err(CollectError::NoLog { path }) => match baseline {
                Some(before) if self.mode == CollectMode::NewestFallback => {
                    self.collect_newest(seed, path, before)
                }
                _ => Err(CollectError::NoLog { path }),
            },
            Err(e) => Err(e),
        }
    }

    fn collect_newest(
        &self,
        seed: u64,
        expected: PathBuf,
        before: &ArtifactSnapshot,
    ) -> Result<Collected, CollectError> {
        let newest = match self.store.newest_changed(before) {
            Ok(Some(p)) => p,
            Ok(None) => return Err(CollectError::NoLog { path: expected }),
            Err(e) => {
                return Err(CollectError::ReadError {
                    path: self.store.dir().to_path_buf(),
                    message: e.to_string(),
                })
            }
        };
        warn!(
            seed,
            expected = %expected.display(),
            using = %newest.display(),
            "seed artifact missing, falling back to newest artifact"
        );
        let record = Self::read(&newest)?;
        if record.get(FIELD_ERROR).map_or(false, |v| !v.is_null()) {
            warn!(seed, path = %newest.display(), "newest artifact is a failed run, not using it");
            return Err(CollectError::NoLog { path: expected });
        }
        Ok(Collected {
            record,
            path: newest,
            fallback: true,
        })
    }

    /// Read and parse one artifact file.
    pub fn read(path: &Path) -> Result<RawRecord, CollectError> {
        let text = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => CollectError::NoLog {
                path: path.to_path_buf(),
            },
            _ => CollectError::ReadError {
                path: path.to_path_buf(),
                message: e.to_string(),
            },
        })?;
        match serde_json::from_str::<Value>(&text) {
            Ok(Value::Object(record)) => Ok(record),
            Ok(other) => Err(CollectError::ReadError {
                path: path.to_path_buf(),
                message: format!("expected a JSON object, found {}", json_kind(&other)),
            }),
            Err(e) => Err(CollectError::ReadError {
                path: path.to_path_buf(),
                message: e.to_string(),
            }),
        }
    }

    /// Parse the last non-empty stdout line as a record, if it is one.
    pub fn parse_stdout(stdout: &str) -> Option<RawRecord> {
        let line = stdout.lines().rev().find(|l| !l.trim().is_empty())?;
        match serde_json::from_str::<Value>(line.trim()) {
            Ok(Value::Object(record)) => Some(record),
            _ => None,
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
