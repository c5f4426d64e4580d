/*!
Screen detection.

- `capture`: frame-grabber and template-loader capabilities (xcap, filesystem, in-memory)
- `cache`: decoded templates keyed by image id, invalidated by file modification time
- `matcher`: normalized cross-correlation, safe downscaling, pixel scan
- `detector`: `ScreenDetector`, composing the above into find and wait operations
*/

use std::path::PathBuf;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{Rect, Rgb};
use crate::utils::Halted;

pub mod cache;
pub mod capture;
pub mod detector;
pub mod matcher;

pub use cache::{TemplateCache, TemplateCacheEntry};
pub use capture::{
    Frame, FrameGrabber, FsTemplateLoader, MemoryTemplateLoader, StaticFrameGrabber,
    TemplateLoader, XcapGrabber,
};
pub use detector::{ImageQuery, PixelQuery, PollOptions, ScreenDetector, WaitOutcome};

/// Detection errors.
#[derive(Debug, Error)]
pub enum DetectError {
    #[error("Screen capture failed: {0}")]
    Capture(String),

    #[error("Failed to load template '{}': {message}", path.display())]
    TemplateLoad { path: PathBuf, message: String },

    #[error("Detection halted by emergency stop")]
    Halted,
}

impl From<Halted> for DetectError {
    fn from(_: Halted) -> Self {
        DetectError::Halted
    }
}

/// Edges of a match; `right` and `bottom` are exclusive.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Bounds {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

/// A template match in screen coordinates. `x`/`y` is the center.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct DetectionResult {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
    pub confidence: f64,
    pub bounds: Bounds,
}

impl DetectionResult {
    pub fn from_box(left: i32, top: i32, width: u32, height: u32, confidence: f64) -> Self {
        Self {
            x: left + (width / 2) as i32,
            y: top + (height / 2) as i32,
            width,
            height,
            confidence,
            bounds: Bounds {
                left,
                top,
                right: left + width as i32,
                bottom: top + height as i32,
            },
        }
    }
}

/// A matching pixel in screen coordinates.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct PixelMatch {
    pub x: i32,
    pub y: i32,
    pub color: Rgb,
}

/// The most recent detection, kept for moves and clicks relative to it.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Detection {
    Image(DetectionResult),
    Pixel(PixelMatch),
}

impl Detection {
    /// Area a relative move may land in.
    pub fn area(&self) -> Rect {
        match self {
            Detection::Image(r) => Rect::new(
                r.bounds.left,
                r.bounds.top,
                r.width as i32,
                r.height as i32,
            ),
            Detection::Pixel(p) => Rect::new(p.x, p.y, 1, 1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_center_and_area() {
        let r = DetectionResult::from_box(10, 20, 30, 41, 0.9);
        assert_eq!((r.x, r.y), (25, 40));
        assert_eq!(r.bounds.right, 40);
        assert_eq!(Detection::Image(r).area(), Rect::new(10, 20, 30, 41));
        let p = PixelMatch {
            x: 3,
            y: 4,
            color: Rgb::new(1, 2, 3),
        };
        assert_eq!(Detection::Pixel(p).area(), Rect::new(3, 4, 1, 1));
    }
}
