//! Video merge engine.
//!
//! Probes every input, picks a single target format by majority vote,
//! cuts/converts inputs into uniform segments, then concatenates them.
//! Trimmed segments are always re-encoded so their timestamps are exact;
//! untouched inputs are linked (or copied) as-is.
//!
//! Concatenation fallback chain:
//! 1. concat demuxer with re-encode and forced audio resampling
//! 2. filter-graph concat with per-stream scale/fps/format normalization
//! 3. minimal concat with tolerant settings (`-crf 23`, async resample)

use std::collections::HashMap;
use std::hash::Hash;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{info, warn};

use mcraft_media::{
    link_or_copy, move_file, probe_video, verify_non_empty, FfmpegCommand, FfmpegRunner,
    MediaError, MediaResult, VideoInfo,
};
use mcraft_models::{TaskConfig, TaskRecord, TrimWindow};
use mcraft_scheduler::{EngineContext, EngineError, EngineOutput, ProgressReporter, TaskEngine};

use crate::media_err;
use crate::settings::EngineSettings;

/// Per-segment transcode timeout in seconds.
const SEGMENT_TIMEOUT_SECS: u64 = 600;
/// Concatenation timeout in seconds.
const CONCAT_TIMEOUT_SECS: u64 = 1800;

/// Video merge engine.
pub struct MergeEngine {
    settings: EngineSettings,
}

impl MergeEngine {
    pub fn new(settings: EngineSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl TaskEngine for MergeEngine {
    async fn process(
        &self,
        task: &TaskRecord,
        ctx: EngineContext,
    ) -> Result<EngineOutput, EngineError> {
        let TaskConfig::VideoMerge(config) = &task.config else {
            return Err(EngineError::Validation(
                "merge engine invoked with a non-merge task".to_string(),
            ));
        };

        ctx.progress.report(5, "Validating merge inputs");
        for input in &config.inputs {
            if !input.path.exists() {
                return Err(EngineError::Validation(format!(
                    "Input file not found: {}",
                    input.path.display()
                )));
            }
        }

        // Probe every input for resolution, frame rate and audio presence.
        let total = config.inputs.len();
        let mut probed = Vec::with_capacity(total);
        for (i, input) in config.inputs.iter().enumerate() {
            if ctx.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
            let info = probe_video(&input.path).await.map_err(media_err)?;
            if info.duration <= 0.0 {
                return Err(EngineError::failed(format!(
                    "Could not determine duration of {}",
                    input.path.display()
                )));
            }
            ctx.progress.report(
                5 + (((i + 1) * 5) / total) as u8,
                format!("Analyzed video {}/{}", i + 1, total),
            );
            probed.push(ProbedInput {
                path: input.path.clone(),
                trim: input.trim,
                info,
            });
        }

        let plan = MergePlan::build(&probed);
        info!(
            task_id = %task.id,
            target = %format!("{}x{}@{:.2}", plan.target.width, plan.target.height, plan.target.fps),
            segments = plan.segments.len(),
            total_duration = plan.total_duration,
            "Merge plan ready"
        );
        ctx.progress.report(10, "Preparing video segments");

        let task_dir = self.settings.scratch_path(format!("merge_{}", task.id));
        let segments_dir = task_dir.join("segments");
        tokio::fs::create_dir_all(&segments_dir)
            .await
            .map_err(|e| EngineError::Failed(e.into()))?;

        let result = self.run_pipeline(task, &plan, &task_dir, &ctx).await;

        // Scratch space goes away regardless of outcome.
        let _ = tokio::fs::remove_dir_all(&task_dir).await;

        result
    }
}

impl MergeEngine {
    async fn run_pipeline(
        &self,
        task: &TaskRecord,
        plan: &MergePlan,
        task_dir: &Path,
        ctx: &EngineContext,
    ) -> Result<EngineOutput, EngineError> {
        let segments_dir = task_dir.join("segments");
        let total = plan.segments.len();
        let mut segment_files = Vec::with_capacity(total);

        for segment in &plan.segments {
            if ctx.is_cancelled() {
                return Err(EngineError::Cancelled);
            }

            let pct = 10 + ((segment.index as f64 / total as f64) * 40.0) as u8;
            ctx.progress.report(
                pct,
                format!("Preparing segment {}/{}", segment.index + 1, total),
            );

            let segment_path = segments_dir.join(format!("segment_{:03}.mp4", segment.index));
            if segment.is_passthrough() {
                link_or_copy(&segment.source, &segment_path)
                    .await
                    .map_err(media_err)?;
            } else {
                cut_segment(segment, &plan.target, &segment_path, ctx.cancel.clone())
                    .await
                    .map_err(media_err)?;
            }
            segment_files.push(segment_path);
        }

        ctx.progress.report(50, "Concatenating segments");
        let merged_path = task_dir.join(format!("merged_{}.mp4", task.id));
        let all_audio = plan.segments.iter().all(|s| s.has_audio);
        let total_ms = (plan.total_duration * 1000.0) as i64;

        concat_with_fallbacks(
            &segment_files,
            &merged_path,
            &plan.target,
            all_audio,
            total_ms,
            &ctx.progress,
            ctx.cancel.clone(),
        )
        .await?;

        verify_non_empty(&merged_path).await.map_err(media_err)?;

        let output_path = self
            .settings
            .owner_result_dir(&task.owner)
            .join(format!("merged_{}.mp4", task.id));
        move_file(&merged_path, &output_path)
            .await
            .map_err(media_err)?;
        verify_non_empty(&output_path).await.map_err(media_err)?;

        ctx.progress.report(100, "Merge complete");
        Ok(EngineOutput {
            output_location: output_path,
        })
    }
}

// =============================================================================
// Planning
// =============================================================================

/// An input together with its probe result.
#[derive(Debug, Clone)]
pub struct ProbedInput {
    pub path: PathBuf,
    pub trim: Option<TrimWindow>,
    pub info: VideoInfo,
}

/// The single output format every segment is normalized to.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetFormat {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub video_bitrate: u64,
}

/// What has to happen to one input before concatenation.
#[derive(Debug, Clone)]
pub struct SegmentPlan {
    pub index: usize,
    pub source: PathBuf,
    /// `(start, duration)` in seconds when the input needs cutting
    pub cut: Option<(f64, f64)>,
    /// Resolution or frame rate differs from the target
    pub needs_convert: bool,
    pub has_audio: bool,
    /// Duration this segment contributes to the output
    pub expected_duration: f64,
}

impl SegmentPlan {
    /// No cutting and no conversion: the input is used as-is.
    pub fn is_passthrough(&self) -> bool {
        self.cut.is_none() && !self.needs_convert
    }
}

/// Full merge plan: pure function of the probe results, so it can be
/// exercised without touching FFmpeg.
#[derive(Debug, Clone)]
pub struct MergePlan {
    pub target: TargetFormat,
    pub segments: Vec<SegmentPlan>,
    pub total_duration: f64,
}

impl MergePlan {
    pub fn build(inputs: &[ProbedInput]) -> MergePlan {
        let target = vote_target(inputs);

        let segments: Vec<SegmentPlan> = inputs
            .iter()
            .enumerate()
            .map(|(index, input)| {
                let duration = input.info.duration;
                let needs_cut = input
                    .trim
                    .map(|t| !t.is_full_file(duration))
                    .unwrap_or(false);
                let expected_duration = input
                    .trim
                    .map(|t| t.effective_duration(duration))
                    .unwrap_or(duration);
                let cut = if needs_cut {
                    let start = input.trim.map(|t| t.start).unwrap_or(0.0);
                    Some((start, expected_duration))
                } else {
                    None
                };
                let needs_convert = input.info.width != target.width
                    || input.info.height != target.height
                    || (input.info.fps - target.fps).abs() > 1.0;

                SegmentPlan {
                    index,
                    source: input.path.clone(),
                    cut,
                    needs_convert,
                    has_audio: input.info.has_audio,
                    expected_duration,
                }
            })
            .collect();

        let total_duration = segments.iter().map(|s| s.expected_duration).sum();

        MergePlan {
            target,
            segments,
            total_duration,
        }
    }
}

/// Majority vote for resolution and frame rate; ties go to the first
/// encountered value. Bitrate is the highest input bitrate capped by the
/// resolution class.
fn vote_target(inputs: &[ProbedInput]) -> TargetFormat {
    let (width, height) = majority_by(inputs, |i| (i.info.width, i.info.height));

    let fps_key = majority_by(inputs, |i| i.info.fps.round() as i64);
    let fps = inputs
        .iter()
        .find(|i| i.info.fps.round() as i64 == fps_key)
        .map(|i| i.info.fps)
        .unwrap_or(30.0);

    TargetFormat {
        width,
        height,
        fps,
        video_bitrate: pick_bitrate(inputs, width),
    }
}

/// Most common key over the inputs, first-encountered wins ties.
fn majority_by<K, F>(inputs: &[ProbedInput], key_fn: F) -> K
where
    K: Eq + Hash + Copy,
    F: Fn(&ProbedInput) -> K,
{
    let mut counts: HashMap<K, usize> = HashMap::new();
    let mut order: Vec<K> = Vec::new();

    for input in inputs {
        let key = key_fn(input);
        if !counts.contains_key(&key) {
            order.push(key);
        }
        *counts.entry(key).or_insert(0) += 1;
    }

    let mut best = order[0];
    for key in &order[1..] {
        if counts[key] > counts[&best] {
            best = *key;
        }
    }
    best
}

/// Highest input bitrate, floored at 2 Mbps and capped by resolution.
fn pick_bitrate(inputs: &[ProbedInput], target_width: u32) -> u64 {
    let highest = inputs.iter().map(|i| i.info.bitrate).max().unwrap_or(0);
    let base = highest.max(2_000_000);

    let cap = if target_width >= 3840 {
        20_000_000
    } else if target_width >= 1920 {
        8_000_000
    } else if target_width >= 1280 {
        5_000_000
    } else {
        2_500_000
    };

    base.min(cap)
}

/// Frame rate formatted for FFmpeg arguments.
fn format_fps(fps: f64) -> String {
    if (fps - fps.round()).abs() < 0.001 {
        format!("{}", fps.round() as i64)
    } else {
        format!("{fps:.3}")
    }
}

// =============================================================================
// Segment transcoding
// =============================================================================

/// Cut and/or convert one input into a uniform segment, always
/// re-encoding so segment timestamps are exact.
async fn cut_segment(
    segment: &SegmentPlan,
    target: &TargetFormat,
    output: &Path,
    cancel: watch::Receiver<bool>,
) -> MediaResult<()> {
    let mut cmd = FfmpegCommand::new(&segment.source, output);
    if let Some((start, duration)) = segment.cut {
        cmd = cmd.seek(start).duration(duration);
    }
    cmd = cmd
        .video_codec("libx264")
        .video_bitrate(target.video_bitrate)
        .preset("medium")
        .video_filter(format!(
            "scale={}:{},fps={}",
            target.width,
            target.height,
            format_fps(target.fps)
        ));
    cmd = if segment.has_audio {
        cmd.audio_codec("aac").audio_bitrate("192k")
    } else {
        cmd.no_audio()
    };

    FfmpegRunner::new()
        .with_cancel(cancel)
        .with_timeout(SEGMENT_TIMEOUT_SECS)
        .run(&cmd)
        .await
}

// =============================================================================
// Concatenation
// =============================================================================

async fn concat_with_fallbacks(
    segments: &[PathBuf],
    output: &Path,
    target: &TargetFormat,
    with_audio: bool,
    total_ms: i64,
    progress: &ProgressReporter,
    cancel: watch::Receiver<bool>,
) -> Result<(), EngineError> {
    match concat_demuxer(segments, output, target, with_audio, total_ms, progress, cancel.clone())
        .await
    {
        Ok(()) => return Ok(()),
        Err(MediaError::Cancelled) => return Err(EngineError::Cancelled),
        Err(e) => warn!("Primary concatenation failed, trying filter graph: {}", e),
    }

    match concat_filter_graph(segments, output, target, with_audio, cancel.clone()).await {
        Ok(()) => return Ok(()),
        Err(MediaError::Cancelled) => return Err(EngineError::Cancelled),
        Err(e) => warn!("Filter-graph concatenation failed, trying minimal settings: {}", e),
    }

    concat_minimal(segments, output, with_audio, cancel)
        .await
        .map_err(media_err)
}

/// Concat list file contents for the demuxer, with quotes escaped.
fn build_concat_list(segments: &[PathBuf]) -> String {
    let mut list = String::new();
    for path in segments {
        let escaped = path.to_string_lossy().replace('\'', "'\\''");
        list.push_str(&format!("file '{escaped}'\n"));
    }
    list
}

async fn write_concat_list(segments: &[PathBuf], dir: &Path) -> MediaResult<PathBuf> {
    let list_path = dir.join("concat.txt");
    tokio::fs::write(&list_path, build_concat_list(segments)).await?;
    Ok(list_path)
}

/// Primary strategy: concat demuxer with forced re-encoding and audio
/// resampled to a fixed rate and channel count so segments from different
/// sources cannot drift.
async fn concat_demuxer(
    segments: &[PathBuf],
    output: &Path,
    target: &TargetFormat,
    with_audio: bool,
    total_ms: i64,
    progress: &ProgressReporter,
    cancel: watch::Receiver<bool>,
) -> MediaResult<()> {
    let dir = output
        .parent()
        .ok_or_else(|| MediaError::InvalidVideo("output path has no parent".to_string()))?;
    let list_path = write_concat_list(segments, dir).await?;

    let mut cmd = FfmpegCommand::new(&list_path, output)
        .input_args(["-f", "concat", "-safe", "0"])
        .video_codec("libx264")
        .video_bitrate(target.video_bitrate)
        .output_arg("-r")
        .output_arg(format_fps(target.fps))
        .output_args(["-pix_fmt", "yuv420p"]);
    cmd = if with_audio {
        cmd.audio_codec("aac")
            .output_args(["-ar", "44100", "-ac", "2"])
            .audio_bitrate("192k")
    } else {
        cmd.no_audio()
    };

    let progress = progress.clone();
    FfmpegRunner::new()
        .with_cancel(cancel)
        .with_timeout(CONCAT_TIMEOUT_SECS)
        .run_with_progress(&cmd, move |p| {
            let pct = 50.0 + p.percentage(total_ms) * 0.45;
            progress.report_percent((pct as u8).min(95));
        })
        .await
}

/// Filter-graph contents for the fallback strategy: every stream scaled,
/// rate-matched and format-normalized before the concat filter.
fn build_concat_filter(n: usize, target: &TargetFormat, with_audio: bool) -> String {
    let mut chains: Vec<String> = Vec::new();
    for i in 0..n {
        chains.push(format!(
            "[{i}:v]scale={}:{},fps={},format=yuv420p[v{i}]",
            target.width,
            target.height,
            format_fps(target.fps)
        ));
        if with_audio {
            chains.push(format!(
                "[{i}:a]aformat=sample_rates=44100:channel_layouts=stereo[a{i}]"
            ));
        }
    }

    let mut concat_inputs = String::new();
    for i in 0..n {
        concat_inputs.push_str(&format!("[v{i}]"));
        if with_audio {
            concat_inputs.push_str(&format!("[a{i}]"));
        }
    }

    let concat = if with_audio {
        format!("{concat_inputs}concat=n={n}:v=1:a=1[outv][outa]")
    } else {
        format!("{concat_inputs}concat=n={n}:v=1:a=0[outv]")
    };
    chains.push(concat);
    chains.join(";")
}

/// Fallback strategy: explicit filter graph, one input per segment.
async fn concat_filter_graph(
    segments: &[PathBuf],
    output: &Path,
    target: &TargetFormat,
    with_audio: bool,
    cancel: watch::Receiver<bool>,
) -> MediaResult<()> {
    let mut cmd = FfmpegCommand::new(&segments[0], output);
    for segment in &segments[1..] {
        cmd = cmd.add_input(segment);
    }

    cmd = cmd
        .filter_complex(build_concat_filter(segments.len(), target, with_audio))
        .output_args(["-map", "[outv]"]);
    if with_audio {
        cmd = cmd
            .output_args(["-map", "[outa]"])
            .audio_codec("aac")
            .audio_bitrate("192k");
    }
    cmd = cmd
        .video_codec("libx264")
        .video_bitrate(target.video_bitrate)
        .output_args(["-pix_fmt", "yuv420p"]);

    FfmpegRunner::new()
        .with_cancel(cancel)
        .with_timeout(CONCAT_TIMEOUT_SECS)
        .run(&cmd)
        .await
}

/// Last resort: coarse but tolerant settings with async audio resampling.
async fn concat_minimal(
    segments: &[PathBuf],
    output: &Path,
    with_audio: bool,
    cancel: watch::Receiver<bool>,
) -> MediaResult<()> {
    let dir = output
        .parent()
        .ok_or_else(|| MediaError::InvalidVideo("output path has no parent".to_string()))?;
    let list_path = write_concat_list(segments, dir).await?;

    let mut cmd = FfmpegCommand::new(&list_path, output)
        .input_args(["-f", "concat", "-safe", "0"])
        .video_codec("libx264")
        .preset("medium")
        .crf(23)
        .output_args(["-pix_fmt", "yuv420p"]);
    cmd = if with_audio {
        cmd.audio_codec("aac")
            .output_args(["-ar", "44100", "-ac", "2"])
            .audio_bitrate("128k")
            .output_args(["-af", "aresample=async=1000"])
    } else {
        cmd.no_audio()
    };

    FfmpegRunner::new()
        .with_cancel(cancel)
        .with_timeout(CONCAT_TIMEOUT_SECS)
        .run(&cmd)
        .await
}
