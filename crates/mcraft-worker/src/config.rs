//! Worker configuration.

use std::path::PathBuf;

/// Worker configuration: where task state and media live.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Directory holding the task store
    pub data_dir: PathBuf,
    /// Root of the per-owner result directories
    pub results_dir: PathBuf,
    /// Scratch directory for intermediate files
    pub work_dir: PathBuf,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            results_dir: PathBuf::from("data/results"),
            work_dir: PathBuf::from("/tmp/mcraft"),
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let data_dir = std::env::var("MCRAFT_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("data"));
        Self {
            results_dir: std::env::var("MCRAFT_RESULTS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| data_dir.join("results")),
            work_dir: std::env::var("MCRAFT_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("/tmp/mcraft")),
            data_dir,
        }
    }
}
