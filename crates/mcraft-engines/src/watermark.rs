//! Watermark removal engine.
//!
//! Streams the source video frame by frame and reconstructs the pixels
//! under the configured regions with structural inpainting. One binary
//! mask covers every region and is reused for all frames: watermarks are
//! assumed stationary, there is no motion tracking.
//!
//! Fallback chain per frame: Navier-Stokes inpainting, then Telea, then a
//! Gaussian blur copied through the mask. The processed stream is written
//! without audio; a final FFmpeg pass copies the original audio track back
//! on. A failed audio remux downgrades to delivering the silent stream
//! and is not a task failure.

use std::path::Path;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{info, warn};

use mcraft_media::{move_file, verify_non_empty, FfmpegCommand, FfmpegRunner, MediaResult};
use mcraft_models::{clamp_regions, Region, TaskConfig, TaskRecord};
use mcraft_scheduler::{EngineContext, EngineError, EngineOutput, ProgressReporter, TaskEngine};

use crate::media_err;
use crate::settings::EngineSettings;

/// Audio remux timeout in seconds.
const REMUX_TIMEOUT_SECS: u64 = 300;

/// Watermark removal engine.
pub struct WatermarkEngine {
    settings: EngineSettings,
}

impl WatermarkEngine {
    pub fn new(settings: EngineSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl TaskEngine for WatermarkEngine {
    async fn process(
        &self,
        task: &TaskRecord,
        ctx: EngineContext,
    ) -> Result<EngineOutput, EngineError> {
        let TaskConfig::WatermarkRemoval(config) = &task.config else {
            return Err(EngineError::Validation(
                "watermark engine invoked with a non-watermark task".to_string(),
            ));
        };

        let input = config.input.clone();
        if !input.exists() {
            return Err(EngineError::Validation(format!(
                "Input file not found: {}",
                input.display()
            )));
        }

        ctx.progress.report(10, "Starting video processing");

        let output_path = self
            .settings
            .owner_result_dir(&task.owner)
            .join(output_file_name(&input));
        let temp_video = self
            .settings
            .scratch_path(format!("wm_{}.mp4", task.id));

        tokio::fs::create_dir_all(&self.settings.work_dir)
            .await
            .map_err(|e| EngineError::Failed(e.into()))?;

        // Frame loop is CPU-bound OpenCV work; run it off the async runtime.
        let frame_input = input.clone();
        let frame_output = temp_video.clone();
        let regions = config.regions.clone();
        let progress = ctx.progress.clone();
        let cancel = ctx.cancel.clone();
        let frame_result = tokio::task::spawn_blocking(move || {
            process_video_frames(&frame_input, &frame_output, &regions, &progress, &cancel)
        })
        .await
        .map_err(|e| EngineError::Failed(anyhow::anyhow!("frame pipeline crashed: {e}")))?;

        let frames = match frame_result {
            Ok(frames) => frames,
            Err(e) => {
                remove_if_exists(&temp_video).await;
                return Err(e);
            }
        };

        info!(task_id = %task.id, frames, "Frame processing finished");
        ctx.progress.report(80, "Merging audio track");

        match remux_audio(&temp_video, &input, &output_path, ctx.cancel.clone()).await {
            Ok(()) => {
                remove_if_exists(&temp_video).await;
            }
            Err(mcraft_media::MediaError::Cancelled) => {
                remove_if_exists(&temp_video).await;
                return Err(EngineError::Cancelled);
            }
            Err(e) => {
                // Degraded delivery: the visual-only stream is the result.
                warn!(
                    task_id = %task.id,
                    "Audio remux failed, delivering video-only stream: {}", e
                );
                move_file(&temp_video, &output_path)
                    .await
                    .map_err(media_err)?;
            }
        }

        ctx.progress.report(95, "Verifying output");
        if let Err(e) = verify_non_empty(&output_path).await {
            return Err(media_err(e));
        }

        ctx.progress.report(100, "Watermark removal complete");
        Ok(EngineOutput {
            output_location: output_path,
        })
    }
}

/// `<stem>_watermark_removed.<ext>` next to nothing; the caller picks the
/// directory.
fn output_file_name(input: &Path) -> String {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "video".to_string());
    let ext = input
        .extension()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "mp4".to_string());
    format!("{stem}_watermark_removed.{ext}")
}

/// Copy the original audio track onto the processed visual stream.
/// `-shortest` truncates to the shorter of the two streams.
async fn remux_audio(
    processed: &Path,
    original: &Path,
    output: &Path,
    cancel: watch::Receiver<bool>,
) -> MediaResult<()> {
    if let Some(parent) = output.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let cmd = FfmpegCommand::new(processed, output)
        .add_input(original)
        .output_args([
            "-c:v", "copy", "-c:a", "aac", "-map", "0:v:0", "-map", "1:a:0?", "-shortest",
        ]);

    FfmpegRunner::new()
        .with_cancel(cancel)
        .with_timeout(REMUX_TIMEOUT_SECS)
        .run(&cmd)
        .await
}

async fn remove_if_exists(path: &Path) {
    if path.exists() {
        let _ = tokio::fs::remove_file(path).await;
    }
}

/// Decode, inpaint and re-encode every frame. Returns the frame count.
///
/// Blocking; must run on a blocking thread. Checks the cancellation watch
/// once per frame.
fn process_video_frames(
    input: &Path,
    output: &Path,
    regions: &[Region],
    progress: &ProgressReporter,
    cancel: &watch::Receiver<bool>,
) -> Result<u64, EngineError> {
    use opencv::core::{Mat, Size};
    use opencv::prelude::*;
    use opencv::videoio;

    let input_str = input
        .to_str()
        .ok_or_else(|| EngineError::Validation("input path is not valid UTF-8".to_string()))?;
    let output_str = output
        .to_str()
        .ok_or_else(|| EngineError::Validation("output path is not valid UTF-8".to_string()))?;

    let mut cap = videoio::VideoCapture::from_file(input_str, videoio::CAP_ANY)
        .map_err(|e| EngineError::failed(format!("Cannot open video file: {e}")))?;
    if !cap.is_opened().unwrap_or(false) {
        return Err(EngineError::failed("Cannot open video file"));
    }

    let fps = cap.get(videoio::CAP_PROP_FPS).unwrap_or(30.0);
    let fps = if fps > 0.0 { fps } else { 30.0 };
    let width = cap.get(videoio::CAP_PROP_FRAME_WIDTH).unwrap_or(0.0) as i32;
    let height = cap.get(videoio::CAP_PROP_FRAME_HEIGHT).unwrap_or(0.0) as i32;
    let total_frames = cap.get(videoio::CAP_PROP_FRAME_COUNT).unwrap_or(0.0).max(0.0) as u64;

    if width <= 0 || height <= 0 {
        return Err(EngineError::failed("Video reports a zero frame size"));
    }

    progress.report(
        20,
        format!("Video info: {width}x{height}, {fps:.1} fps, {total_frames} frames"),
    );

    let clamped = clamp_regions(regions, width as u32, height as u32);
    if clamped.is_empty() {
        return Err(EngineError::Validation(
            "all watermark regions fall outside the video frame".to_string(),
        ));
    }

    // One mask for the whole stream.
    let mask = build_mask(width, height, &clamped)?;

    let fourcc = videoio::VideoWriter::fourcc('m', 'p', '4', 'v')
        .map_err(|e| EngineError::failed(format!("Failed to resolve codec: {e}")))?;
    let mut writer = videoio::VideoWriter::new(
        output_str,
        fourcc,
        fps,
        Size::new(width, height),
        true,
    )
    .map_err(|e| EngineError::failed(format!("Cannot create output video file: {e}")))?;
    if !writer.is_opened().unwrap_or(false) {
        return Err(EngineError::failed("Cannot create output video file"));
    }

    let mut frame = Mat::default();
    let mut frame_count: u64 = 0;

    loop {
        if *cancel.borrow() {
            return Err(EngineError::Cancelled);
        }

        let read = cap
            .read(&mut frame)
            .map_err(|e| EngineError::failed(format!("Failed to read frame: {e}")))?;
        if !read || frame.empty() {
            break;
        }

        let restored = restore_frame(&frame, &mask)?;
        writer
            .write(&restored)
            .map_err(|e| EngineError::failed(format!("Failed to write frame: {e}")))?;

        frame_count += 1;
        if frame_count % 30 == 0 && total_frames > 0 {
            let pct = 20 + ((frame_count as f64 / total_frames as f64) * 50.0) as u8;
            progress.report(
                pct.min(70),
                format!("Processed {frame_count}/{total_frames} frames"),
            );
        }
    }

    writer
        .release()
        .map_err(|e| EngineError::failed(format!("Failed to finalize output video: {e}")))?;

    if frame_count == 0 {
        return Err(EngineError::failed("No frames decoded from input video"));
    }

    progress.report(70, "Frame processing complete");
    Ok(frame_count)
}

/// Build the binary region mask: 8-bit single channel, regions filled 255.
fn build_mask(
    width: i32,
    height: i32,
    regions: &[Region],
) -> Result<opencv::core::Mat, EngineError> {
    use opencv::core::{Mat, Rect, Scalar, CV_8UC1};
    use opencv::imgproc;

    let mut mask = Mat::new_rows_cols_with_default(height, width, CV_8UC1, Scalar::all(0.0))
        .map_err(|e| EngineError::failed(format!("Failed to allocate mask: {e}")))?;

    for region in regions {
        let rect = Rect::new(
            region.x as i32,
            region.y as i32,
            region.width as i32,
            region.height as i32,
        );
        imgproc::rectangle(
            &mut mask,
            rect,
            Scalar::all(255.0),
            imgproc::FILLED,
            imgproc::LINE_8,
            0,
        )
        .map_err(|e| EngineError::failed(format!("Failed to fill mask region: {e}")))?;
    }

    Ok(mask)
}

/// Reconstruct the masked area of one frame.
///
/// Navier-Stokes inpainting first, Telea second, masked Gaussian blur as
/// the last resort.
fn restore_frame(
    frame: &opencv::core::Mat,
    mask: &opencv::core::Mat,
) -> Result<opencv::core::Mat, EngineError> {
    use opencv::core::Mat;
    use opencv::photo;

    let mut restored = Mat::default();
    if photo::inpaint(frame, mask, &mut restored, 3.0, photo::INPAINT_NS).is_ok() {
        return Ok(restored);
    }

    let mut restored = Mat::default();
    if photo::inpaint(frame, mask, &mut restored, 3.0, photo::INPAINT_TELEA).is_ok() {
        return Ok(restored);
    }

    blur_masked(frame, mask)
}

/// Gaussian-blur the whole frame and copy the blurred pixels back through
/// the mask, leaving everything outside the regions untouched.
fn blur_masked(
    frame: &opencv::core::Mat,
    mask: &opencv::core::Mat,
) -> Result<opencv::core::Mat, EngineError> {
    use opencv::core::{Mat, Size};
    use opencv::imgproc;
    use opencv::prelude::*;

    let mut blurred = Mat::default();
    imgproc::gaussian_blur_def(frame, &mut blurred, Size::new(15, 15), 0.0)
        .map_err(|e| EngineError::failed(format!("Gaussian blur fallback failed: {e}")))?;

    let mut result = frame.clone();
    blurred
        .copy_to_masked(&mut result, mask)
        .map_err(|e| EngineError::failed(format!("Masked copy failed: {e}")))?;
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_file_name() {
        assert_eq!(
            output_file_name(Path::new("/data/uploads/clip.mp4")),
            "clip_watermark_removed.mp4"
        );
        assert_eq!(
            output_file_name(Path::new("/data/uploads/movie.mkv")),
            "movie_watermark_removed.mkv"
        );
        assert_eq!(
            output_file_name(Path::new("/data/uploads/noext")),
            "noext_watermark_removed.mp4"
        );
    }

    #[test]
    fn test_mask_covers_exactly_the_clamped_regions() {
        // Disjoint regions, one overhanging the frame edge
        let regions = clamp_regions(
            &[Region::new(10, 10, 20, 10), Region::new(300, 230, 40, 40)],
            320,
            240,
        );
        let mask = build_mask(320, 240, &regions).unwrap();

        let covered = opencv::core::count_non_zero(&mask).unwrap() as u64;
        let expected: u64 = regions.iter().map(|r| r.area()).sum();
        assert_eq!(covered, expected);
    }

    #[test]
    fn test_mask_construction_is_deterministic() {
        use opencv::prelude::*;

        let regions = clamp_regions(
            &[Region::new(5, 5, 50, 20), Region::new(100, 150, 64, 32)],
            320,
            240,
        );
        let a = build_mask(320, 240, &regions).unwrap();
        let b = build_mask(320, 240, &regions).unwrap();

        // Identical pixel sets: XOR of the two masks is empty
        let mut diff = opencv::core::Mat::default();
        opencv::core::bitwise_xor_def(&a, &b, &mut diff).unwrap();
        assert_eq!(opencv::core::count_non_zero(&diff).unwrap(), 0);
        assert_eq!(a.size().unwrap(), b.size().unwrap());
    }

    #[test]
    fn test_remux_command_maps_both_streams() {
        let cmd = FfmpegCommand::new("/tmp/wm_x.mp4", "/out/final.mp4")
            .add_input("/in/original.mp4")
            .output_args([
                "-c:v", "copy", "-c:a", "aac", "-map", "0:v:0", "-map", "1:a:0?", "-shortest",
            ]);
        let args = cmd.build_args();
        assert_eq!(args.iter().filter(|a| *a == "-i").count(), 2);
        assert!(args.contains(&"-shortest".to_string()));
        assert!(args.contains(&"1:a:0?".to_string()));
    }
}
