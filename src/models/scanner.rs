//! Artifact discovery in the model directory
//!
//! Precedence, highest first:
//! 1. tuned bundle (`ensemble_tuned_*`)
//! 2. generic bundle (`ensemble_*`)
//! 3. one `{algorithm}_*` file per supported algorithm, plus an optional
//!    shared `preprocessor_*` scaler
//!
//! Within a pattern the most recently modified file wins; equal timestamps
//! go to the lexicographically greatest path.

use crate::error::{EnsembleError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::debug;

pub const TUNED_BUNDLE_PREFIX: &str = "ensemble_tuned_";
pub const BUNDLE_PREFIX: &str = "ensemble_";
pub const PREPROCESSOR_PREFIX: &str = "preprocessor_";

/// A file on disk with its modification time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactFile {
    pub path: PathBuf,
    pub modified: SystemTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    TunedBundle,
    Bundle,
    PerAlgorithm,
}

/// The artifact (or artifact set) chosen to back the next generation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactSelection {
    TunedBundle(ArtifactFile),
    Bundle(ArtifactFile),
    PerAlgorithm {
        dir: PathBuf,
        models: Vec<(String, ArtifactFile)>,
        preprocessor: Option<ArtifactFile>,
    },
}

impl ArtifactSelection {
    pub fn kind(&self) -> ArtifactKind {
        match self {
            ArtifactSelection::TunedBundle(_) => ArtifactKind::TunedBundle,
            ArtifactSelection::Bundle(_) => ArtifactKind::Bundle,
            ArtifactSelection::PerAlgorithm { .. } => ArtifactKind::PerAlgorithm,
        }
    }

    /// Newest modification time among the files that make up the selection
    pub fn modified(&self) -> SystemTime {
        match self {
            ArtifactSelection::TunedBundle(file) | ArtifactSelection::Bundle(file) => file.modified,
            ArtifactSelection::PerAlgorithm {
                models,
                preprocessor,
                ..
            } => models
                .iter()
                .map(|(_, f)| f.modified)
                .chain(preprocessor.iter().map(|f| f.modified))
                .max()
                .unwrap_or(SystemTime::UNIX_EPOCH),
        }
    }

    /// Bundle file, or the directory for a per-algorithm set
    pub fn primary_path(&self) -> &Path {
        match self {
            ArtifactSelection::TunedBundle(file) | ArtifactSelection::Bundle(file) => &file.path,
            ArtifactSelection::PerAlgorithm { dir, .. } => dir,
        }
    }

    /// Every file the selection reads
    pub fn files(&self) -> Vec<&Path> {
        match self {
            ArtifactSelection::TunedBundle(file) | ArtifactSelection::Bundle(file) => {
                vec![file.path.as_path()]
            }
            ArtifactSelection::PerAlgorithm {
                models,
                preprocessor,
                ..
            } => models
                .iter()
                .map(|(_, f)| f.path.as_path())
                .chain(preprocessor.iter().map(|f| f.path.as_path()))
                .collect(),
        }
    }
}

/// Read-only view of the artifact directory
#[derive(Debug, Clone)]
pub struct ArtifactScanner {
    dir: PathBuf,
    algorithms: Vec<String>,
}

impl ArtifactScanner {
    pub fn new<P: AsRef<Path>>(dir: P, algorithms: Vec<String>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            algorithms,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn algorithms(&self) -> &[String] {
        &self.algorithms
    }

    /// Find the artifact that should back the next generation.
    ///
    /// A missing directory is `Ok(None)`, not an error.
    pub fn scan(&self) -> Result<Option<ArtifactSelection>> {
        let files = self.list_files()?;

        if let Some(file) = newest(&files, |name| name.starts_with(TUNED_BUNDLE_PREFIX)) {
            return Ok(Some(ArtifactSelection::TunedBundle(file)));
        }

        if let Some(file) = newest(&files, |name| {
            name.starts_with(BUNDLE_PREFIX) && !name.starts_with(TUNED_BUNDLE_PREFIX)
        }) {
            return Ok(Some(ArtifactSelection::Bundle(file)));
        }

        let models: Vec<(String, ArtifactFile)> = self
            .algorithms
            .iter()
            .filter_map(|algorithm| {
                let prefix = format!("{}_", algorithm);
                newest(&files, |name| name.starts_with(&prefix)).map(|f| (algorithm.clone(), f))
            })
            .collect();

        if models.is_empty() {
            return Ok(None);
        }

        Ok(Some(ArtifactSelection::PerAlgorithm {
            dir: self.dir.clone(),
            models,
            preprocessor: newest(&files, |name| name.starts_with(PREPROCESSOR_PREFIX)),
        }))
    }

    fn list_files(&self) -> Result<Vec<(String, ArtifactFile)>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(dir = %self.dir.display(), "Artifact directory does not exist");
                return Ok(Vec::new());
            }
            Err(source) => {
                return Err(EnsembleError::Scan {
                    dir: self.dir.clone(),
                    source,
                })
            }
        };

        let mut files = Vec::new();
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    debug!(dir = %self.dir.display(), error = %e, "Skipping unreadable entry");
                    continue;
                }
            };

            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
                continue;
            };

            // follow symlinks so a `latest` link can point at a bundle
            let modified = match fs::metadata(&path) {
                Ok(meta) if meta.is_file() => meta.modified(),
                Ok(_) => continue,
                Err(e) => Err(e),
            };

            match modified {
                Ok(modified) => files.push((name, ArtifactFile { path, modified })),
                Err(e) => debug!(path = %path.display(), error = %e, "Skipping file without mtime"),
            }
        }

        Ok(files)
    }
}

fn newest<F>(files: &[(String, ArtifactFile)], matches: F) -> Option<ArtifactFile>
where
    F: Fn(&str) -> bool,
{
    files
        .iter()
        .filter(|(name, _)| matches(name))
        .map(|(_, file)| file)
        .max_by(|a, b| {
            a.modified
                .cmp(&b.modified)
                .then_with(|| a.path.cmp(&b.path))
        })
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::time::Duration;
    use tempfile::tempdir;

    fn touch(dir: &Path, name: &str, secs: u64) -> PathBuf {
        let path = dir.join(name);
        let file = File::create(&path).unwrap();
        file.set_modified(SystemTime::UNIX_EPOCH + Duration::from_secs(secs))
            .unwrap();
        path
    }

    fn algorithms() -> Vec<String> {
        vec!["random_forest".to_string(), "ridge".to_string()]
    }

    #[test]
    fn test_missing_directory_is_none() {
        let dir = tempdir().unwrap();
        let scanner = ArtifactScanner::new(dir.path().join("nope"), algorithms());
        assert_eq!(scanner.scan().unwrap(), None);
    }

    #[test]
    fn test_empty_directory_is_none() {
        let dir = tempdir().unwrap();
        let scanner = ArtifactScanner::new(dir.path(), algorithms());
        assert_eq!(scanner.scan().unwrap(), None);
    }

    #[test]
    fn test_tuned_beats_newer_generic() {
        let dir = tempdir().unwrap();
        let tuned = touch(dir.path(), "ensemble_tuned_20260101.json", 1_000);
        touch(dir.path(), "ensemble_20260301.json", 5_000);
        touch(dir.path(), "ridge_20260401.json", 9_000);

        let scanner = ArtifactScanner::new(dir.path(), algorithms());
        match scanner.scan().unwrap() {
            Some(ArtifactSelection::TunedBundle(file)) => assert_eq!(file.path, tuned),
            other => panic!("unexpected selection {:?}", other),
        }
    }

    #[test]
    fn test_latest_generic_bundle() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "ensemble_a.json", 1_000);
        let newer = touch(dir.path(), "ensemble_b.json", 2_000);

        let scanner = ArtifactScanner::new(dir.path(), algorithms());
        let selection = scanner.scan().unwrap().unwrap();
        assert_eq!(selection.kind(), ArtifactKind::Bundle);
        assert_eq!(selection.primary_path(), newer.as_path());
    }

    #[test]
    fn test_equal_mtime_picks_greatest_path() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "ensemble_a.json", 1_000);
        let last = touch(dir.path(), "ensemble_z.json", 1_000);

        let scanner = ArtifactScanner::new(dir.path(), algorithms());
        let selection = scanner.scan().unwrap().unwrap();
        assert_eq!(selection.primary_path(), last.as_path());
    }

    #[test]
    fn test_per_algorithm_set_with_preprocessor() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "random_forest_1.json", 1_000);
        let rf = touch(dir.path(), "random_forest_2.json", 3_000);
        let ridge = touch(dir.path(), "ridge_1.json", 2_000);
        let pre = touch(dir.path(), "preprocessor_1.json", 4_000);
        touch(dir.path(), "svr_1.json", 8_000);
        fs::create_dir(dir.path().join("ensemble_dir")).unwrap();

        let scanner = ArtifactScanner::new(dir.path(), algorithms());
        let selection = scanner.scan().unwrap().unwrap();

        match &selection {
            ArtifactSelection::PerAlgorithm {
                models,
                preprocessor,
                ..
            } => {
                assert_eq!(models.len(), 2);
                assert_eq!(models[0].0, "random_forest");
                assert_eq!(models[0].1.path, rf);
                assert_eq!(models[1].1.path, ridge);
                assert_eq!(preprocessor.as_ref().map(|f| f.path.clone()), Some(pre));
            }
            other => panic!("unexpected selection {:?}", other),
        }
        assert_eq!(
            selection.modified(),
            SystemTime::UNIX_EPOCH + Duration::from_secs(4_000)
        );
        assert_eq!(selection.files().len(), 3);
    }

    #[test]
    fn test_preprocessor_alone_is_none() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "preprocessor_1.json", 1_000);
        let scanner = ArtifactScanner::new(dir.path(), algorithms());
        assert_eq!(scanner.scan().unwrap(), None);
    }
}
