//! Seed-keyed artifact storage.

use serde::Serialize;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use st_types::{RunResult, TuneResult};

pub const ARTIFACT_PREFIX: &str = "run_";
pub const ARTIFACT_SUFFIX: &str = ".json";

/// Directory of run artifacts, one `run_<seed>.json` per seed.
///
/// Writes go through a hidden temp file and a rename, so a reader sees
/// either the previous artifact or the complete new one.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    /// Open the store, creating the directory if needed.
    pub fn new<P: AsRef<Path>>(dir: P) -> TuneResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Open an existing directory for reading; never creates it.
    pub fn open<P: AsRef<Path>>(dir: P) -> TuneResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        if !dir.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("artifact directory {} does not exist", dir.display()),
            )
            .into());
        }
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn file_name(seed: u64) -> String {
        format!("{ARTIFACT_PREFIX}{seed}{ARTIFACT_SUFFIX}")
    }

    /// Whether a file name follows the artifact naming convention.
    pub fn is_artifact_name(name: &str) -> bool {
        name.starts_with(ARTIFACT_PREFIX) && name.ends_with(ARTIFACT_SUFFIX)
    }

    pub fn path_for(&self, seed: u64) -> PathBuf {
        self.dir.join(Self::file_name(seed))
    }

    /// Remove the artifact for `seed`. Returns whether one existed.
    pub fn remove(&self, seed: u64) -> io::Result<bool> {
        match fs::remove_file(self.path_for(seed)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Write (or replace) the artifact for a run.
    pub fn write(&self, result: &RunResult) -> TuneResult<PathBuf> {
        self.write_document(&Self::file_name(result.seed), result)
    }

    /// Atomically write any serializable document into the store directory.
    pub fn write_document<T: Serialize>(&self, name: &str, value: &T) -> TuneResult<PathBuf> {
        let target = self.dir.join(name);
        let tmp = self.dir.join(format!(".{name}.tmp"));
        let body = serde_json::to_vec_pretty(value)?;
        fs::write(&tmp, body)?;
        fs::rename(&tmp, &target)?;
        Ok(target)
    }

    /// All artifact paths, sorted by file name.
    pub fn list(&self) -> io::Result<Vec<PathBuf>> {
        let mut paths: Vec<PathBuf> = fs::read_dir(&self.dir)?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
            .filter(|entry| {
                entry
                    .file_name()
                    .to_str()
                    .map(Self::is_artifact_name)
                    .unwrap_or(false)
            })
            .map(|entry| entry.path())
            .collect();
        paths.sort();
        Ok(paths)
    }

    /// Record which artifacts exist right now and when each was last written.
    pub fn snapshot(&self) -> io::Result<ArtifactSnapshot> {
        let mut seen = HashMap::new();
        for path in self.list()? {
            if let Ok(modified) = fs::metadata(&path).and_then(|m| m.modified()) {
                seen.insert(path, modified);
            }
        }
        Ok(ArtifactSnapshot { seen })
    }

    /// The most recently modified artifact that was created or rewritten
    /// after `before` was taken. An empty snapshot matches every artifact.
    pub fn newest_changed(&self, before: &ArtifactSnapshot) -> io::Result<Option<PathBuf>> {
        let mut newest: Option<(SystemTime, PathBuf)> = None;
        for path in self.list()? {
            let modified = match fs::metadata(&path).and_then(|m| m.modified()) {
                Ok(t) => t,
                Err(_) => continue,
            };
            if before.is_unchanged(&path, modified) {
                continue;
            }
            if newest.as_ref().map_or(true, |(t, _)| modified >= *t) {
                newest = Some((modified, path));
            }
        }
        Ok(newest.map(|(_, path)| path))
    }
}

/// Artifact modification times at one moment, taken before a run starts.
#[derive(Debug, Clone, Default)]
pub struct ArtifactSnapshot {
    seen: HashMap<PathBuf, SystemTime>,
}

impl ArtifactSnapshot {
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    fn is_unchanged(&self, path: &Path, modified: SystemTime) -> bool {
        self.seen.get(path) == Some(&modified)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use st_types::{ParameterSet, RunErrorKind};
    use tempfile::TempDir;

    #[test]
    fn write_replaces_and_remove_reports_presence() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path()).unwrap();

        assert!(!store.remove(5).unwrap());

        let first = RunResult::failed(5, ParameterSet::new(), RunErrorKind::Timeout);
        let path = store.write(&first).unwrap();
        assert_eq!(path, dir.path().join("run_5.json"));

        let second = RunResult::failed(5, ParameterSet::new(), RunErrorKind::NoLog);
        store.write(&second).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert!(text.contains("no_log"));
        assert!(!text.contains("timeout"));

        assert!(store.remove(5).unwrap());
        assert!(!path.exists());
    }

    #[test]
    fn list_ignores_temp_and_foreign_files() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path()).unwrap();
        fs::write(dir.path().join("run_2.json"), "{}").unwrap();
        fs::write(dir.path().join("run_1.json"), "{}").unwrap();
        fs::write(dir.path().join(".run_3.json.tmp"), "{}").unwrap();
        fs::write(dir.path().join("validation_best.json"), "{}").unwrap();

        let names: Vec<String> = store
            .list()
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["run_1.json", "run_2.json"]);
    }

    #[test]
    fn newest_on_empty_dir_is_none() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path()).unwrap();
        let empty = ArtifactSnapshot::default();
        assert!(store.newest_changed(&empty).unwrap().is_none());
    }

    #[test]
    fn open_never_creates_the_directory() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope");
        assert!(ArtifactStore::open(&missing).is_err());
        assert!(!missing.exists());
        assert!(ArtifactStore::open(dir.path()).is_ok());
    }

    #[test]
    fn newest_changed_skips_files_present_in_snapshot() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path()).unwrap();
        fs::write(dir.path().join("run_1.json"), "{}").unwrap();
        let before = store.snapshot().unwrap();
        assert_eq!(before.len(), 1);

        assert!(store.newest_changed(&before).unwrap().is_none());
        assert_eq!(
            store.newest_changed(&ArtifactSnapshot::default()).unwrap(),
            Some(dir.path().join("run_1.json"))
        );

        fs::write(dir.path().join("run_2.json"), "{}").unwrap();
        assert_eq!(
            store.newest_changed(&before).unwrap(),
            Some(dir.path().join("run_2.json"))
        );
    }
}
