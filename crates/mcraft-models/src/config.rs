//! Type-specific task configuration.

use std::path::PathBuf;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::region::Region;
use crate::task::TaskKind;

/// Configuration validation errors.
///
/// Always fatal to the task; detected before the engine is invoked,
/// never retried.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no watermark regions specified in task configuration")]
    NoRegions,

    #[error("video merge requires at least 2 input files, got {0}")]
    TooFewInputs(usize),

    #[error("invalid trim window for input {index}: start {start} >= end {end}")]
    InvalidTrimWindow { index: usize, start: f64, end: f64 },

    #[error("negative trim offset for input {index}")]
    NegativeTrimOffset { index: usize },
}

/// Trim window applied to a merge input, in seconds from the start of the
/// file. `end = None` means until the end of the file.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema, Default)]
pub struct TrimWindow {
    /// Start offset in seconds
    #[serde(default)]
    pub start: f64,
    /// End offset in seconds (exclusive); full file when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<f64>,
}

impl TrimWindow {
    /// Window covering a span `[start, end)`.
    pub fn new(start: f64, end: f64) -> Self {
        Self {
            start,
            end: Some(end),
        }
    }

    /// Whether this window selects the entire file of the given duration.
    pub fn is_full_file(&self, file_duration: f64) -> bool {
        self.start <= 0.0 && self.end.map_or(true, |e| e >= file_duration)
    }

    /// Duration selected from a file of the given total duration.
    pub fn effective_duration(&self, file_duration: f64) -> f64 {
        let end = self.end.unwrap_or(file_duration).min(file_duration);
        (end - self.start).max(0.0)
    }
}

/// One source video in a merge task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct MergeInput {
    /// Path to the source file
    pub path: PathBuf,
    /// Optional trim window; full file when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trim: Option<TrimWindow>,
}

impl MergeInput {
    /// Input covering the whole file.
    pub fn full(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            trim: None,
        }
    }

    /// Input trimmed to `[start, end)` seconds.
    pub fn trimmed(path: impl Into<PathBuf>, start: f64, end: f64) -> Self {
        Self {
            path: path.into(),
            trim: Some(TrimWindow::new(start, end)),
        }
    }
}

/// Watermark-removal parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct WatermarkRemovalConfig {
    /// Path to the source video
    pub input: PathBuf,
    /// Watermark regions in pixel coordinates of the source frame
    pub regions: Vec<Region>,
}

impl WatermarkRemovalConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.regions.is_empty() {
            return Err(ConfigError::NoRegions);
        }
        Ok(())
    }
}

/// Video-merge parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct VideoMergeConfig {
    /// Ordered list of source videos
    pub inputs: Vec<MergeInput>,
}

impl VideoMergeConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.inputs.len() < 2 {
            return Err(ConfigError::TooFewInputs(self.inputs.len()));
        }
        for (index, input) in self.inputs.iter().enumerate() {
            if let Some(trim) = input.trim {
                if trim.start < 0.0 {
                    return Err(ConfigError::NegativeTrimOffset { index });
                }
                if let Some(end) = trim.end {
                    if end <= trim.start {
                        return Err(ConfigError::InvalidTrimWindow {
                            index,
                            start: trim.start,
                            end,
                        });
                    }
                }
            }
        }
        Ok(())
    }
}

/// Type-specific task parameters; the tag selects the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskConfig {
    WatermarkRemoval(WatermarkRemovalConfig),
    VideoMerge(VideoMergeConfig),
}

impl TaskConfig {
    /// The task kind this configuration belongs to.
    pub fn kind(&self) -> TaskKind {
        match self {
            TaskConfig::WatermarkRemoval(_) => TaskKind::WatermarkRemoval,
            TaskConfig::VideoMerge(_) => TaskKind::VideoMerge,
        }
    }

    /// Validate before execution. Not called at admission time; malformed
    /// tasks are accepted into the queue and fail when dispatched.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self {
            TaskConfig::WatermarkRemoval(c) => c.validate(),
            TaskConfig::VideoMerge(c) => c.validate(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_watermark_config_requires_regions() {
        let config = WatermarkRemovalConfig {
            input: PathBuf::from("/data/uploads/a.mp4"),
            regions: Vec::new(),
        };
        assert!(matches!(config.validate(), Err(ConfigError::NoRegions)));
    }

    #[test]
    fn test_merge_config_requires_two_inputs() {
        let config = VideoMergeConfig {
            inputs: vec![MergeInput::full("/data/uploads/a.mp4")],
        };
        assert!(matches!(config.validate(), Err(ConfigError::TooFewInputs(1))));
    }

    #[test]
    fn test_merge_config_rejects_inverted_trim() {
        let config = VideoMergeConfig {
            inputs: vec![
                MergeInput::trimmed("/data/uploads/a.mp4", 6.0, 2.0),
                MergeInput::full("/data/uploads/b.mp4"),
            ],
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidTrimWindow { index: 0, .. })
        ));
    }

    #[test]
    fn test_trim_window_full_file() {
        assert!(TrimWindow::default().is_full_file(10.0));
        assert!(TrimWindow { start: 0.0, end: Some(12.0) }.is_full_file(10.0));
        assert!(!TrimWindow::new(2.0, 6.0).is_full_file(10.0));
    }

    #[test]
    fn test_trim_window_effective_duration() {
        assert!((TrimWindow::new(2.0, 6.0).effective_duration(10.0) - 4.0).abs() < 1e-9);
        assert!((TrimWindow::default().effective_duration(8.0) - 8.0).abs() < 1e-9);
        // End past the file is cut at the file's real length
        assert!((TrimWindow::new(0.0, 15.0).effective_duration(12.0) - 12.0).abs() < 1e-9);
    }

    #[test]
    fn test_config_tag_selects_kind() {
        let config = TaskConfig::VideoMerge(VideoMergeConfig {
            inputs: vec![
                MergeInput::full("/data/uploads/a.mp4"),
                MergeInput::full("/data/uploads/b.mp4"),
            ],
        });
        assert_eq!(config.kind(), TaskKind::VideoMerge);

        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"type\":\"video_merge\""));
    }
}
