//! Pixel-space rectangles marking watermark areas.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// An axis-aligned rectangle in pixel coordinates, top-left origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct Region {
    /// X coordinate of the top-left corner
    pub x: u32,
    /// Y coordinate of the top-left corner
    pub y: u32,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
}

impl Region {
    /// Create a new region.
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Area in pixels.
    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Whether the region covers no pixels.
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Clamp the region to a frame of the given dimensions.
    ///
    /// Coordinates outside the frame are pulled back inside and the
    /// extent is truncated at the frame edge. Returns `None` when nothing
    /// of the region survives (zero-area after clamping).
    pub fn clamped_to(&self, frame_width: u32, frame_height: u32) -> Option<Region> {
        let x = self.x.min(frame_width);
        let y = self.y.min(frame_height);
        let width = self.width.min(frame_width - x);
        let height = self.height.min(frame_height - y);

        let clamped = Region {
            x,
            y,
            width,
            height,
        };
        if clamped.is_empty() {
            None
        } else {
            Some(clamped)
        }
    }
}

/// Clamp a list of regions to frame bounds, dropping degenerate ones.
///
/// The result is deterministic for a given input list and frame size, and
/// preserves input order.
pub fn clamp_regions(regions: &[Region], frame_width: u32, frame_height: u32) -> Vec<Region> {
    regions
        .iter()
        .filter_map(|r| r.clamped_to(frame_width, frame_height))
        .collect()
}
