//! FFmpeg CLI wrappers for the MediaCraft task system.
//!
//! This crate provides:
//! - A multi-input FFmpeg command builder and runner with cancellation,
//!   timeout and progress parsing
//! - FFprobe-based media inspection
//! - Filesystem helpers for segment handling and output verification

pub mod command;
pub mod error;
pub mod fs_utils;
pub mod probe;
pub mod progress;

pub use command::{check_ffmpeg, check_ffprobe, FfmpegCommand, FfmpegRunner};
pub use error::{MediaError, MediaResult};
pub use fs_utils::{link_or_copy, move_file, verify_non_empty};
pub use probe::{probe_video, VideoInfo};
pub use progress::FfmpegProgress;
