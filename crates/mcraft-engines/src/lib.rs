//! Processing engines for the MediaCraft task system.
//!
//! Two engines implement the scheduler's `TaskEngine` contract:
//! - `WatermarkEngine`: frame-level inpainting behind a static region mask,
//!   with the original audio track remuxed onto the processed stream
//! - `MergeEngine`: trim/convert/concatenate over the external transcoder
//!
//! Engines are opaque units of work to the scheduler: they validate their
//! own configuration, report progress through the engine context, honor
//! the cancellation watch between units of work, and never retry.

pub mod merge;
pub mod settings;
pub mod watermark;

pub use merge::MergeEngine;
pub use settings::EngineSettings;
pub use watermark::WatermarkEngine;

use mcraft_media::MediaError;
use mcraft_scheduler::EngineError;

/// Map a media error onto the engine contract, preserving cancellation.
pub(crate) fn media_err(e: MediaError) -> EngineError {
    match e {
        MediaError::Cancelled => EngineError::Cancelled,
        other => EngineError::Failed(other.into()),
    }
}
