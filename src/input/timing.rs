//! Randomized delays and offsets: Gaussian sampling, click jitter and the typing model.
//!
//! Everything here is a pure function of its inputs and the supplied RNG, so a seeded
//! generator reproduces the exact same sequence.

use std::f64::consts::TAU;
use std::time::Duration;

use rand::Rng;

use crate::config::{DelayRange, JitterMode, TypingSettings};

/// Standard normal sample via the Box–Muller transform.
pub fn standard_normal<R: Rng + ?Sized>(rng: &mut R) -> f64 {
    // u1 in (0, 1] keeps ln() finite.
    let u1 = 1.0 - rng.random::<f64>();
    let u2 = rng.random::<f64>();
    (-2.0 * u1.ln()).sqrt() * (TAU * u2).cos()
}

pub fn gaussian<R: Rng + ?Sized>(rng: &mut R, mean: f64, std_dev: f64) -> f64 {
    mean + std_dev * standard_normal(rng)
}

pub fn gaussian_clamped<R: Rng + ?Sized>(
    rng: &mut R,
    mean: f64,
    std_dev: f64,
    min: f64,
    max: f64,
) -> f64 {
    gaussian(rng, mean, std_dev).clamp(min, max)
}

/// Uniform millisecond sample from an inclusive range.
pub fn uniform_ms<R: Rng + ?Sized>(rng: &mut R, range: DelayRange) -> u64 {
    let (lo, hi) = range.ordered();
    if lo == hi { lo } else { rng.random_range(lo..=hi) }
}

pub fn uniform_delay<R: Rng + ?Sized>(rng: &mut R, range: DelayRange) -> Duration {
    Duration::from_millis(uniform_ms(rng, range))
}

pub fn uniform_f64<R: Rng + ?Sized>(rng: &mut R, lo: f64, hi: f64) -> f64 {
    if hi <= lo { lo } else { rng.random_range(lo..hi) }
}

/// Integer pixel offset to add to an intended click point.
///
/// Gaussian mode samples each axis with `sigma` (default `radius / 3`) and rescales the
/// vector onto the circle when it lands outside it. Uniform mode samples the disc.
/// The rounded offset never lies farther than `radius` from the origin.
pub fn click_jitter<R: Rng + ?Sized>(
    rng: &mut R,
    radius: f64,
    sigma: Option<f64>,
    mode: JitterMode,
) -> (i32, i32) {
    if radius <= 0.0 {
        return (0, 0);
    }
    let (dx, dy) = match mode {
        JitterMode::Gaussian => {
            let sigma = sigma.unwrap_or(radius / 3.0).max(0.0);
            let dx = gaussian(rng, 0.0, sigma);
            let dy = gaussian(rng, 0.0, sigma);
            let mag = dx.hypot(dy);
            if mag > radius {
                (dx * radius / mag, dy * radius / mag)
            } else {
                (dx, dy)
            }
        }
        JitterMode::Uniform => {
            let r = radius * rng.random::<f64>().sqrt();
            let theta = TAU * rng.random::<f64>();
            (r * theta.cos(), r * theta.sin())
        }
    };

    let rounded = (dx.round(), dy.round());
    let (fx, fy) = if rounded.0.hypot(rounded.1) <= radius {
        rounded
    } else {
        // Rounding away from zero can leave the disc; truncation cannot.
        (dx.trunc(), dy.trunc())
    };
    (fx as i32, fy as i32)
}

/// Delay components for one keystroke.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct KeystrokeDelay {
    /// Gaussian base delay, clamped to `[min_delay, max_delay]`, then burst-scaled.
    pub base: Duration,
    /// Punctuation/capital pause plus any hesitation.
    pub extra: Duration,
    pub in_burst: bool,
}

impl KeystrokeDelay {
    pub fn total(&self) -> Duration {
        self.base + self.extra
    }
}

/// Stateful inter-keystroke delay model.
///
/// Bursts are runs of consecutive keystrokes typed faster than usual; the model remembers
/// how many keystrokes of the current burst remain.
#[derive(Debug, Clone, Default)]
pub struct TypingModel {
    burst_remaining: u32,
}

impl TypingModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Gaussian base delay clamped to the configured range, in milliseconds.
    pub fn base_delay_ms<R: Rng + ?Sized>(rng: &mut R, settings: &TypingSettings) -> f64 {
        let (lo, hi) = DelayRange::new(settings.min_delay, settings.max_delay).ordered();
        let (lo, hi) = (lo as f64, hi as f64);
        let mean = (lo + hi) / 2.0;
        let std_dev = settings.std_dev.unwrap_or((hi - lo) / 4.0).max(0.0);
        gaussian_clamped(rng, mean, std_dev, lo, hi)
    }

    /// Delay to wait after typing `ch`.
    pub fn next_delay<R: Rng + ?Sized>(
        &mut self,
        rng: &mut R,
        settings: &TypingSettings,
        ch: char,
    ) -> KeystrokeDelay {
        let mut base = Self::base_delay_ms(rng, settings);

        if self.burst_remaining == 0
            && settings.burst_length_max > 0
            && rng.random_bool(settings.burst_probability.clamp(0.0, 1.0))
        {
            self.burst_remaining = rng.random_range(2..=settings.burst_length_max.max(2));
        }
        let in_burst = self.burst_remaining > 0;
        if in_burst {
            self.burst_remaining -= 1;
            base *= settings.burst_factor;
        }

        let mut extra = 0;
        if ch.is_ascii_punctuation() || ch.is_uppercase() {
            extra += uniform_ms(rng, settings.extra_pause);
        }
        if rng.random_bool(settings.hesitation_probability.clamp(0.0, 1.0)) {
            extra += uniform_ms(rng, settings.hesitation);
        }

        KeystrokeDelay {
            base: Duration::from_secs_f64(base.max(0.0) / 1000.0),
            extra: Duration::from_millis(extra),
            in_burst,
        }
    }

    /// Reset burst state (e.g. between separate `type` actions).
    pub fn reset(&mut self) {
        self.burst_remaining = 0;
    }
}
