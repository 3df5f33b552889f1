//! Engine filesystem settings.

use std::path::{Path, PathBuf};

/// Where engines stage intermediate files and deliver results.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Scratch directory for intermediate files
    pub work_dir: PathBuf,
    /// Root of the per-owner result directories
    pub results_dir: PathBuf,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("/tmp/mcraft"),
            results_dir: PathBuf::from("data/results"),
        }
    }
}

impl EngineSettings {
    /// Create settings from environment variables.
    pub fn from_env() -> Self {
        Self {
            work_dir: std::env::var("MCRAFT_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("/tmp/mcraft")),
            results_dir: std::env::var("MCRAFT_RESULTS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("data/results")),
        }
    }

    pub fn new(work_dir: impl Into<PathBuf>, results_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
            results_dir: results_dir.into(),
        }
    }

    /// Result directory for an owner; naming/retention is managed by the
    /// storage collaborator, engines only write into it.
    pub fn owner_result_dir(&self, owner: &str) -> PathBuf {
        self.results_dir.join(owner)
    }

    /// Scratch path for a task-scoped intermediate file.
    pub fn scratch_path(&self, name: impl AsRef<Path>) -> PathBuf {
        self.work_dir.join(name)
    }
}
