//! Frame-grabber and template-loader capabilities.
//!
//! Real implementations capture through xcap and decode through `image`; the static and
//! in-memory variants serve headless runs and tests.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use image::RgbaImage;
use image::imageops;
use tracing::trace;

use super::DetectError;
use crate::config::Rect;
use crate::utils::lock;

/// Captured pixels plus the screen position of their top-left corner.
#[derive(Debug, Clone)]
pub struct Frame {
    pub image: RgbaImage,
    pub origin: (i32, i32),
}

impl Frame {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// Screen capture.
pub trait FrameGrabber: Send {
    /// Capture `region` (screen coordinates), or the whole screen.
    fn capture(&mut self, region: Option<Rect>) -> Result<Frame, DetectError>;
}

/// Template image source.
pub trait TemplateLoader: Send {
    fn load(&self, path: &Path) -> Result<RgbaImage, DetectError>;
    fn modified(&self, path: &Path) -> Result<SystemTime, DetectError>;
}

/// Crop `region` (screen coordinates) out of a screen image whose top-left is at
/// `screen_origin`. Parts of the region outside the image are dropped.
pub fn crop_region(screen: &RgbaImage, screen_origin: (i32, i32), region: Option<Rect>) -> Frame {
    let Some(r) = region else {
        return Frame {
            image: screen.clone(),
            origin: screen_origin,
        };
    };
    // Workflow files can carry extreme bounds; keep the arithmetic saturating.
    let (sw, sh) = (screen.width() as i32, screen.height() as i32);
    let left = r.x.saturating_sub(screen_origin.0).clamp(0, sw);
    let top = r.y.saturating_sub(screen_origin.1).clamp(0, sh);
    let right = r
        .x
        .saturating_add(r.width)
        .saturating_sub(screen_origin.0)
        .min(sw);
    let bottom = r
        .y
        .saturating_add(r.height)
        .saturating_sub(screen_origin.1)
        .min(sh);
    let (w, h) = (
        right.saturating_sub(left).max(0) as u32,
        bottom.saturating_sub(top).max(0) as u32,
    );
    let image = imageops::crop_imm(screen, left as u32, top as u32, w, h).to_image();
    Frame {
        image,
        origin: (screen_origin.0 + left, screen_origin.1 + top),
    }
}

// --- xcap ---

/// Captures from the monitor containing the region (or the primary monitor).
#[derive(Debug, Default, Clone, Copy)]
pub struct XcapGrabber;

impl XcapGrabber {
    pub fn new() -> Self {
        Self
    }
}

impl FrameGrabber for XcapGrabber {
    fn capture(&mut self, region: Option<Rect>) -> Result<Frame, DetectError> {
        let monitors = xcap::Monitor::all().map_err(|e| failed("Failed to enumerate monitors", e))?;

        let mut chosen = None;
        for monitor in monitors {
            let x = monitor.x().map_err(|e| failed("Failed to get monitor x", e))?;
            let y = monitor.y().map_err(|e| failed("Failed to get monitor y", e))?;
            let w = monitor.width().map_err(|e| failed("Failed to get monitor width", e))? as i32;
            let h = monitor.height().map_err(|e| failed("Failed to get monitor height", e))? as i32;
            let contains = region
                .map(|r| Rect::new(x, y, w, h).contains(r.x, r.y))
                .unwrap_or(false);
            let primary = monitor.is_primary().unwrap_or(false);
            if contains || (region.is_none() && primary) {
                chosen = Some((monitor, (x, y)));
                break;
            }
            if chosen.is_none() {
                chosen = Some((monitor, (x, y)));
            }
        }
        let (monitor, origin) =
            chosen.ok_or_else(|| DetectError::Capture("No monitor found".into()))?;

        let screen = monitor
            .capture_image()
            .map_err(|e| failed("Failed to capture monitor", e))?;
        trace!(
            target: "tactile::detect",
            width = screen.width(), height = screen.height(), "Captured monitor"
        );
        Ok(crop_region(&screen, origin, region))
    }
}

fn failed(what: &str, e: impl std::fmt::Display) -> DetectError {
    DetectError::Capture(format!("{what}: {e}"))
}

// --- filesystem ---

/// Decodes templates from disk with `image`.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsTemplateLoader;

impl TemplateLoader for FsTemplateLoader {
    fn load(&self, path: &Path) -> Result<RgbaImage, DetectError> {
        image::open(path)
            .map(|img| img.to_rgba8())
            .map_err(|e| DetectError::TemplateLoad {
                path: path.to_path_buf(),
                message: e.to_string(),
            })
    }

    fn modified(&self, path: &Path) -> Result<SystemTime, DetectError> {
        std::fs::metadata(path)
            .and_then(|m| m.modified())
            .map_err(|e| DetectError::TemplateLoad {
                path: path.to_path_buf(),
                message: e.to_string(),
            })
    }
}

// --- in-memory ---

/// Serves a fixed screen image. Clones share the screen, so it can be swapped mid-run.
#[derive(Debug, Clone)]
pub struct StaticFrameGrabber {
    screen: Arc<Mutex<RgbaImage>>,
    captures: Arc<Mutex<usize>>,
}

impl StaticFrameGrabber {
    pub fn new(screen: RgbaImage) -> Self {
        Self {
            screen: Arc::new(Mutex::new(screen)),
            captures: Arc::new(Mutex::new(0)),
        }
    }

    pub fn set_screen(&self, screen: RgbaImage) {
        *lock(&self.screen) = screen;
    }

    /// Number of captures served so far.
    pub fn captures(&self) -> usize {
        *lock(&self.captures)
    }
}

impl FrameGrabber for StaticFrameGrabber {
    fn capture(&mut self, region: Option<Rect>) -> Result<Frame, DetectError> {
        *lock(&self.captures) += 1;
        let screen = lock(&self.screen);
        Ok(crop_region(&screen, (0, 0), region))
    }
}

#[derive(Debug, Default)]
struct StoredTemplates {
    images: HashMap<PathBuf, (RgbaImage, SystemTime)>,
    loads: usize,
}

/// Template loader backed by a map. `touch` bumps a file's modification time.
#[derive(Debug, Clone, Default)]
pub struct MemoryTemplateLoader {
    inner: Arc<Mutex<StoredTemplates>>,
}

impl MemoryTemplateLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, path: impl Into<PathBuf>, image: RgbaImage) {
        lock(&self.inner)
            .images
            .insert(path.into(), (image, SystemTime::UNIX_EPOCH));
    }

    /// Advance the stored modification time by one second.
    pub fn touch(&self, path: &Path) {
        if let Some((_, mtime)) = lock(&self.inner).images.get_mut(path) {
            *mtime += Duration::from_secs(1);
        }
    }

    /// Number of successful decodes so far.
    pub fn loads(&self) -> usize {
        lock(&self.inner).loads
    }
}

impl TemplateLoader for MemoryTemplateLoader {
    fn load(&self, path: &Path) -> Result<RgbaImage, DetectError> {
        let mut inner = lock(&self.inner);
        let image = inner
            .images
            .get(path)
            .map(|(img, _)| img.clone())
            .ok_or_else(|| DetectError::TemplateLoad {
                path: path.to_path_buf(),
                message: "no such template".into(),
            })?;
        inner.loads += 1;
        Ok(image)
    }

    fn modified(&self, path: &Path) -> Result<SystemTime, DetectError> {
        lock(&self.inner)
            .images
            .get(path)
            .map(|(_, mtime)| *mtime)
            .ok_or_else(|| DetectError::TemplateLoad {
                path: path.to_path_buf(),
                message: "no such template".into(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn crop_clamps_to_screen_and_reports_origin() {
        let screen = RgbaImage::from_pixel(100, 50, Rgba([1, 2, 3, 255]));
        let frame = crop_region(&screen, (0, 0), Some(Rect::new(90, 40, 20, 20)));
        assert_eq!((frame.width(), frame.height()), (10, 10));
        assert_eq!(frame.origin, (90, 40));

        let outside = crop_region(&screen, (0, 0), Some(Rect::new(200, 200, 5, 5)));
        assert_eq!((outside.width(), outside.height()), (0, 0));
    }

    #[test]
    fn crop_survives_extreme_bounds() {
        let screen = RgbaImage::from_pixel(100, 50, Rgba([1, 2, 3, 255]));
        let far = crop_region(
            &screen,
            (0, 0),
            Some(Rect::new(i32::MAX - 1, i32::MAX - 1, i32::MAX, i32::MAX)),
        );
        assert_eq!((far.width(), far.height()), (0, 0));

        let before = crop_region(
            &screen,
            (0, 0),
            Some(Rect::new(i32::MIN, i32::MIN, i32::MAX, i32::MAX)),
        );
        assert_eq!((before.width(), before.height()), (0, 0));

        let huge = crop_region(&screen, (5, 5), Some(Rect::new(-10, -10, i32::MAX, i32::MAX)));
        assert_eq!((huge.width(), huge.height()), (100, 50));
        assert_eq!(huge.origin, (5, 5));
    }

    #[test]
    fn memory_loader_tracks_loads_and_mtime() {
        let loader = MemoryTemplateLoader::new();
        let path = Path::new("images/ok.png");
        loader.insert(path, RgbaImage::new(2, 2));
        let before = loader.modified(path).unwrap();
        loader.touch(path);
        assert!(loader.modified(path).unwrap() > before);
        loader.load(path).unwrap();
        assert_eq!(loader.loads(), 1);
        assert!(loader.load(Path::new("missing.png")).is_err());
    }
}
