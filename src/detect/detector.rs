use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, trace};

use super::cache::TemplateCache;
use super::capture::{FrameGrabber, TemplateLoader};
use super::matcher::{MatchScore, Plane, downscale, find_pixel, match_template, safe_scale_factor};
use super::{DetectError, DetectionResult, PixelMatch};
use crate::config::{DetectionSettings, Rect, Rgb};
use crate::utils::Gate;

/// Per-call overrides for image search; unset fields fall back to settings.
#[derive(Debug, Copy, Clone, Default, PartialEq)]
pub struct ImageQuery {
    pub confidence: Option<f64>,
    pub region: Option<Rect>,
    pub scale_down: Option<bool>,
}

/// Per-call overrides for pixel search.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct PixelQuery {
    pub tolerance: Option<u8>,
    pub region: Option<Rect>,
}

/// Polling cadence for the wait variants.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct PollOptions {
    pub interval: Option<Duration>,
    pub timeout: Option<Duration>,
}

/// How a polling wait ended.
#[derive(Debug, Clone, PartialEq)]
pub enum WaitOutcome<T> {
    Found(T),
    TimedOut,
    /// Cut short by a stop request.
    Stopped,
}

impl<T> WaitOutcome<T> {
    pub fn found(self) -> Option<T> {
        match self {
            WaitOutcome::Found(v) => Some(v),
            _ => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> WaitOutcome<U> {
        match self {
            WaitOutcome::Found(v) => WaitOutcome::Found(f(v)),
            WaitOutcome::TimedOut => WaitOutcome::TimedOut,
            WaitOutcome::Stopped => WaitOutcome::Stopped,
        }
    }
}

/// Template and pixel search over captured frames.
pub struct ScreenDetector {
    grabber: Box<dyn FrameGrabber>,
    loader: Box<dyn TemplateLoader>,
    cache: TemplateCache,
    settings: DetectionSettings,
    gate: Gate,
}

impl ScreenDetector {
    pub fn new(
        grabber: Box<dyn FrameGrabber>,
        loader: Box<dyn TemplateLoader>,
        settings: &DetectionSettings,
        gate: Gate,
    ) -> Self {
        Self {
            grabber,
            loader,
            cache: TemplateCache::new(),
            settings: settings.clone(),
            gate,
        }
    }

    pub fn update_settings(&mut self, settings: &DetectionSettings) {
        if settings.images_dir != self.settings.images_dir {
            self.cache.clear();
        }
        self.settings = settings.clone();
    }

    pub fn cache(&self) -> &TemplateCache {
        &self.cache
    }

    /// Drop a cached template so the next lookup decodes it again.
    pub fn evict_template(&mut self, image_id: &str) -> bool {
        self.cache.evict(image_id)
    }

    /// `<imagesDir>/<imageId>`, with `.png` appended when the id has no extension.
    pub fn template_path(&self, image_id: &str) -> PathBuf {
        let mut path = self.settings.images_dir.join(image_id);
        if Path::new(image_id).extension().is_none() {
            path.set_extension("png");
        }
        path
    }

    /// Locate `image_id` on screen. `Ok(None)` when the best score is below the
    /// confidence threshold or the captured area is smaller than the template.
    pub fn find_image(
        &mut self,
        image_id: &str,
        query: ImageQuery,
    ) -> Result<Option<DetectionResult>, DetectError> {
        let path = self.template_path(image_id);
        let template = self.cache.get_or_load(image_id, &path, &*self.loader)?;
        let frame = self.grabber.capture(query.region)?;
        let confidence = query.confidence.unwrap_or(self.settings.confidence);
        let (tw, th) = template.dimensions();

        if frame.width() < tw || frame.height() < th {
            debug!(
                target: "tactile::detect",
                image_id, frame = ?(frame.width(), frame.height()), template = ?(tw, th),
                "Capture smaller than template"
            );
            return Ok(None);
        }

        let factor = if query.scale_down.unwrap_or(self.settings.scale_down) {
            safe_scale_factor((frame.width(), frame.height()), (tw, th))
        } else {
            None
        };
        let best = match factor {
            Some(f) => {
                let small_frame = downscale(&frame.image, f);
                let small_tpl = downscale(&template, f);
                trace!(target: "tactile::detect", image_id, factor = f, "Matching downscaled");
                match_template(&Plane::from_rgba(&small_frame), &Plane::from_rgba(&small_tpl)).map(
                    |m| MatchScore {
                        x: ((m.x as f64 / f).round() as u32).min(frame.width() - tw),
                        y: ((m.y as f64 / f).round() as u32).min(frame.height() - th),
                        score: m.score,
                    },
                )
            }
            None => match_template(&Plane::from_rgba(&frame.image), &Plane::from_rgba(&template)),
        };

        let Some(best) = best else {
            return Ok(None);
        };
        if best.score < confidence {
            debug!(
                target: "tactile::detect",
                image_id, score = best.score, confidence, "Best match below threshold"
            );
            return Ok(None);
        }

        let result = DetectionResult::from_box(
            frame.origin.0 + best.x as i32,
            frame.origin.1 + best.y as i32,
            tw,
            th,
            best.score,
        );
        debug!(
            target: "tactile::detect",
            image_id, x = result.x, y = result.y, confidence = result.confidence, "Image found"
        );
        Ok(Some(result))
    }

    /// First pixel (row-major) in the captured area within tolerance of `color`.
    pub fn find_pixel(
        &mut self,
        color: Rgb,
        query: PixelQuery,
    ) -> Result<Option<PixelMatch>, DetectError> {
        let frame = self.grabber.capture(query.region)?;
        let tolerance = query.tolerance.unwrap_or(self.settings.pixel_tolerance);
        let found = find_pixel(&frame.image, color, tolerance).map(|(x, y, color)| PixelMatch {
            x: frame.origin.0 + x as i32,
            y: frame.origin.1 + y as i32,
            color,
        });
        trace!(target: "tactile::detect", ?color, tolerance, found = found.is_some(), "Pixel scan");
        Ok(found)
    }

    pub async fn wait_for_image(
        &mut self,
        image_id: &str,
        query: ImageQuery,
        poll: PollOptions,
    ) -> Result<WaitOutcome<DetectionResult>, DetectError> {
        self.poll(poll, |d| d.find_image(image_id, query)).await
    }

    pub async fn wait_for_image_gone(
        &mut self,
        image_id: &str,
        query: ImageQuery,
        poll: PollOptions,
    ) -> Result<WaitOutcome<()>, DetectError> {
        self.poll(poll, |d| Ok(d.find_image(image_id, query)?.is_none().then_some(())))
            .await
    }

    pub async fn wait_for_pixel(
        &mut self,
        color: Rgb,
        query: PixelQuery,
        poll: PollOptions,
    ) -> Result<WaitOutcome<PixelMatch>, DetectError> {
        self.poll(poll, |d| d.find_pixel(color, query)).await
    }

    pub async fn wait_for_pixel_gone(
        &mut self,
        color: Rgb,
        query: PixelQuery,
        poll: PollOptions,
    ) -> Result<WaitOutcome<()>, DetectError> {
        self.poll(poll, |d| Ok(d.find_pixel(color, query)?.is_none().then_some(())))
            .await
    }

    /// Probe, then sleep `interval`, until the probe succeeds or `timeout` has elapsed.
    /// Capture and matching time count against the timeout; time spent paused does not.
    async fn poll<T>(
        &mut self,
        opts: PollOptions,
        mut probe: impl FnMut(&mut Self) -> Result<Option<T>, DetectError>,
    ) -> Result<WaitOutcome<T>, DetectError> {
        let interval = opts
            .interval
            .unwrap_or(Duration::from_millis(self.settings.poll_interval_ms))
            .max(Duration::from_millis(1));
        let timeout = opts
            .timeout
            .unwrap_or(Duration::from_millis(self.settings.timeout_ms));
        let mut waited = Duration::ZERO;

        loop {
            let started = Instant::now();
            let found = probe(self)?;
            waited += started.elapsed();
            if let Some(found) = found {
                return Ok(WaitOutcome::Found(found));
            }
            if waited >= timeout {
                debug!(target: "tactile::detect", ?timeout, "Poll timed out");
                return Ok(WaitOutcome::TimedOut);
            }
            let step = interval.min(timeout - waited);
            if !self.gate.delay(step).await? {
                return Ok(WaitOutcome::Stopped);
            }
            waited += step;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::capture::{Frame, MemoryTemplateLoader, StaticFrameGrabber};
    use crate::utils::RunSignal;
    use image::{Rgba, RgbaImage, imageops};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use tokio::sync::watch;

    fn noise(w: u32, h: u32, seed: u64) -> RgbaImage {
        let mut rng = StdRng::seed_from_u64(seed);
        RgbaImage::from_fn(w, h, |_, _| {
            let v: u8 = rng.random();
            Rgba([v, v.wrapping_mul(3), v.wrapping_add(40), 255])
        })
    }

    struct Fixture {
        screen: StaticFrameGrabber,
        loader: MemoryTemplateLoader,
        detector: ScreenDetector,
    }

    fn fixture(screen: RgbaImage, gate: Gate) -> Fixture {
        let grabber = StaticFrameGrabber::new(screen);
        let loader = MemoryTemplateLoader::new();
        let detector = ScreenDetector::new(
            Box::new(grabber.clone()),
            Box::new(loader.clone()),
            &DetectionSettings::default(),
            gate,
        );
        Fixture {
            screen: grabber,
            loader,
            detector,
        }
    }

    #[test]
    fn resolves_template_paths() {
        let fx = fixture(RgbaImage::new(1, 1), Gate::open());
        assert_eq!(fx.detector.template_path("ok"), Path::new("images/ok.png"));
        assert_eq!(fx.detector.template_path("ok.jpg"), Path::new("images/ok.jpg"));
    }

    #[test]
    fn finds_template_and_reports_center_and_bounds() {
        let screen = noise(120, 80, 7);
        let template = imageops::crop_imm(&screen, 40, 30, 16, 12).to_image();
        let mut fx = fixture(screen, Gate::open());
        fx.loader.insert("images/btn.png", template);

        let found = fx
            .detector
            .find_image("btn", ImageQuery::default())
            .unwrap()
            .unwrap();
        assert_eq!((found.x, found.y), (48, 36));
        assert_eq!((found.width, found.height), (16, 12));
        assert_eq!(found.bounds.left, 40);
        assert_eq!(found.bounds.bottom, 42);
        assert!(found.confidence > 0.99);

        // Second lookup reuses the decoded template.
        fx.detector.find_image("btn", ImageQuery::default()).unwrap();
        assert_eq!(fx.loader.loads(), 1);
    }

    #[test]
    fn region_results_are_in_screen_coordinates() {
        let screen = noise(120, 80, 3);
        let template = imageops::crop_imm(&screen, 70, 50, 10, 10).to_image();
        let mut fx = fixture(screen, Gate::open());
        fx.loader.insert("images/t.png", template);

        let query = ImageQuery {
            region: Some(Rect::new(60, 40, 40, 30)),
            ..ImageQuery::default()
        };
        let found = fx.detector.find_image("t", query).unwrap().unwrap();
        assert_eq!((found.bounds.left, found.bounds.top), (70, 50));
    }

    #[test]
    fn capture_smaller_than_template_is_not_found() {
        let screen = noise(50, 50, 1);
        let mut fx = fixture(screen, Gate::open());
        fx.loader.insert("images/big.png", noise(30, 30, 2));
        let query = ImageQuery {
            region: Some(Rect::new(0, 0, 20, 20)),
            ..ImageQuery::default()
        };
        assert!(fx.detector.find_image("big", query).unwrap().is_none());
    }

    #[test]
    fn below_confidence_is_not_found() {
        let mut fx = fixture(noise(60, 60, 11), Gate::open());
        fx.loader.insert("images/other.png", noise(10, 10, 12));
        let query = ImageQuery {
            confidence: Some(0.95),
            ..ImageQuery::default()
        };
        assert!(fx.detector.find_image("other", query).unwrap().is_none());
    }

    #[test]
    fn downscaled_match_maps_back_to_full_resolution() {
        // Blocky content survives resampling; 480x320 against 48x40 scales by exactly 1/4.
        let mut rng = StdRng::seed_from_u64(21);
        let blocks: Vec<u8> = (0..60 * 40).map(|_| rng.random()).collect();
        let screen = RgbaImage::from_fn(480, 320, |x, y| {
            let v = blocks[(y / 8 * 60 + x / 8) as usize];
            Rgba([v, v, v, 255])
        });
        let template = imageops::crop_imm(&screen, 192, 160, 48, 40).to_image();
        let mut fx = fixture(screen, Gate::open());
        fx.loader.insert("images/blk.png", template);

        let query = ImageQuery {
            scale_down: Some(true),
            confidence: Some(0.7),
            ..ImageQuery::default()
        };
        let found = fx.detector.find_image("blk", query).unwrap().unwrap();
        assert!((found.bounds.left - 192).abs() <= 4, "{found:?}");
        assert!((found.bounds.top - 160).abs() <= 4, "{found:?}");
        assert_eq!((found.width, found.height), (48, 40));
    }

    #[test]
    fn missing_template_is_an_error() {
        let mut fx = fixture(noise(10, 10, 1), Gate::open());
        let err = fx.detector.find_image("ghost", ImageQuery::default());
        assert!(matches!(err, Err(DetectError::TemplateLoad { .. })));
    }

    #[test]
    fn pixel_search_offsets_by_region() {
        let mut screen = RgbaImage::from_pixel(50, 50, Rgba([0, 0, 0, 255]));
        screen.put_pixel(30, 25, Rgba([10, 200, 10, 255]));
        let mut fx = fixture(screen, Gate::open());
        let query = PixelQuery {
            tolerance: Some(5),
            region: Some(Rect::new(20, 20, 20, 20)),
        };
        let hit = fx
            .detector
            .find_pixel(Rgb::new(12, 198, 12), query)
            .unwrap()
            .unwrap();
        assert_eq!((hit.x, hit.y), (30, 25));
    }

    #[tokio::test(start_paused = true)]
    async fn wait_for_pixel_times_out() {
        let mut fx = fixture(RgbaImage::new(8, 8), Gate::open());
        let poll = PollOptions {
            interval: Some(Duration::from_millis(100)),
            timeout: Some(Duration::from_millis(450)),
        };
        let started = tokio::time::Instant::now();
        let outcome = fx
            .detector
            .wait_for_pixel(Rgb::new(255, 0, 0), PixelQuery::default(), poll)
            .await
            .unwrap();
        assert_eq!(outcome, WaitOutcome::TimedOut);
        assert_eq!(started.elapsed(), Duration::from_millis(450));
        assert_eq!(fx.screen.captures(), 6);
    }

    /// Grabber whose every capture blocks for `cost` of wall-clock time.
    struct SlowGrabber {
        inner: StaticFrameGrabber,
        cost: Duration,
    }

    impl FrameGrabber for SlowGrabber {
        fn capture(&mut self, region: Option<Rect>) -> Result<Frame, DetectError> {
            std::thread::sleep(self.cost);
            self.inner.capture(region)
        }
    }

    #[tokio::test]
    async fn slow_captures_count_against_the_timeout() {
        let screen = StaticFrameGrabber::new(RgbaImage::new(8, 8));
        let mut detector = ScreenDetector::new(
            Box::new(SlowGrabber {
                inner: screen.clone(),
                cost: Duration::from_millis(50),
            }),
            Box::new(MemoryTemplateLoader::new()),
            &DetectionSettings::default(),
            Gate::open(),
        );
        let poll = PollOptions {
            interval: Some(Duration::from_millis(10)),
            timeout: Some(Duration::from_millis(100)),
        };
        let started = std::time::Instant::now();
        let outcome = detector
            .wait_for_pixel(Rgb::new(255, 0, 0), PixelQuery::default(), poll)
            .await
            .unwrap();
        assert_eq!(outcome, WaitOutcome::TimedOut);
        // Timeout, plus one interval, plus the capture in flight when it ran out.
        assert!(started.elapsed() < Duration::from_millis(250), "{:?}", started.elapsed());
        assert!(screen.captures() <= 3, "{} captures", screen.captures());
    }

    #[tokio::test(start_paused = true)]
    async fn wait_for_pixel_sees_screen_change() {
        let fx = fixture(RgbaImage::new(8, 8), Gate::open());
        let screen = fx.screen.clone();
        let mut detector = fx.detector;
        let task = tokio::spawn(async move {
            detector
                .wait_for_pixel(
                    Rgb::new(255, 0, 0),
                    PixelQuery::default(),
                    PollOptions {
                        interval: Some(Duration::from_millis(50)),
                        timeout: Some(Duration::from_secs(5)),
                    },
                )
                .await
        });
        tokio::time::sleep(Duration::from_millis(120)).await;
        screen.set_screen(RgbaImage::from_pixel(8, 8, Rgba([255, 0, 0, 255])));
        let hit = task.await.unwrap().unwrap().found().unwrap();
        assert_eq!((hit.x, hit.y), (0, 0));
    }

    #[tokio::test(start_paused = true)]
    async fn wait_for_image_gone_and_stop() {
        let screen = noise(40, 40, 5);
        let template = imageops::crop_imm(&screen, 5, 5, 8, 8).to_image();
        let (tx, rx) = watch::channel(RunSignal::Run);
        let fx = fixture(screen, Gate::new(rx));
        fx.loader.insert("images/x.png", template);

        let poll = PollOptions {
            interval: Some(Duration::from_millis(10)),
            timeout: Some(Duration::from_secs(60)),
        };
        let screen = fx.screen.clone();
        let mut detector = fx.detector;
        let task = tokio::spawn(async move {
            let still_there = detector
                .wait_for_image_gone("x", ImageQuery::default(), poll)
                .await;
            (detector, still_there)
        });
        tokio::time::sleep(Duration::from_millis(35)).await;
        tx.send(RunSignal::Stop).unwrap();
        let (mut detector, outcome) = task.await.unwrap();
        assert_eq!(outcome.unwrap(), WaitOutcome::Stopped);

        tx.send(RunSignal::Run).unwrap();
        screen.set_screen(noise(40, 40, 6));
        let gone = detector
            .wait_for_image_gone("x", ImageQuery::default(), poll)
            .await
            .unwrap();
        assert_eq!(gone, WaitOutcome::Found(()));
    }
}
