//! Wind/gravity pointer paths.
//!
//! A path is integrated step by step from a randomized lateral force (wind) and a pull
//! toward the target (gravity). The result is post-processed with an accelerate/cruise/
//! decelerate speed curve, can be fitted to a requested total duration, and can overshoot
//! the target before correcting back.

use rand::Rng;

use super::timing::{uniform_f64, uniform_ms};
use crate::config::{MouseSettings, Rect};

/// Hard cap on the number of points in one generated path.
pub const MAX_PATH_POINTS: usize = 10_000;

/// Overhead budget share when fitting a path to a duration.
const OVERHEAD_BUDGET_SHARE: f64 = 0.8;

/// One pointer position and the delay to observe after moving there.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct PathPoint {
    pub x: i32,
    pub y: i32,
    pub delay_ms: f64,
}

/// Integration parameters, usually derived from [`MouseSettings`].
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct WindParams {
    pub gravity: f64,
    pub wind: f64,
    pub min_wait: f64,
    pub max_wait: f64,
    pub max_step: f64,
    pub target_area: f64,
}

impl WindParams {
    pub fn from_settings(settings: &MouseSettings) -> Self {
        Self {
            gravity: settings.gravity,
            wind: settings.wind,
            min_wait: settings.min_wait,
            max_wait: settings.max_wait,
            max_step: settings.max_step,
            target_area: settings.target_area,
        }
    }

    /// Weaker wind and shorter steps, for corrective movements.
    pub fn scaled(&self, factor: f64) -> Self {
        Self {
            wind: self.wind * factor,
            max_step: (self.max_step * factor).max(1.0),
            target_area: self.target_area * factor,
            ..*self
        }
    }
}

impl Default for WindParams {
    fn default() -> Self {
        Self::from_settings(&MouseSettings::default())
    }
}

/// Generate a path from `(x0, y0)` to `(x1, y1)`.
///
/// The last point is always exactly the target, and the path never exceeds
/// [`MAX_PATH_POINTS`] points. The start point itself is not included.
pub fn generate_path<R: Rng + ?Sized>(
    rng: &mut R,
    params: &WindParams,
    (x0, y0): (f64, f64),
    (x1, y1): (f64, f64),
) -> Vec<PathPoint> {
    let sqrt3 = 3f64.sqrt();
    let sqrt5 = 5f64.sqrt();

    let (mut x, mut y) = (x0, y0);
    let (mut vx, mut vy) = (0.0f64, 0.0f64);
    let (mut wx, mut wy) = (0.0f64, 0.0f64);
    let mut step_cap = params.max_step.max(1.0);
    let wait_span = (params.max_wait - params.min_wait).max(0.0);

    let mut points: Vec<PathPoint> = Vec::new();
    let mut pending_delay = 0.0;
    let mut steps = 0usize;

    loop {
        let dist = (x1 - x).hypot(y1 - y);
        if dist < 1.0 || steps >= MAX_PATH_POINTS || points.len() >= MAX_PATH_POINTS - 1 {
            break;
        }
        steps += 1;

        let wind_mag = params.wind.min(dist);
        if dist >= params.target_area {
            wx = wx / sqrt3 + (rng.random::<f64>() * 2.0 - 1.0) * wind_mag / sqrt5;
            wy = wy / sqrt3 + (rng.random::<f64>() * 2.0 - 1.0) * wind_mag / sqrt5;
        } else {
            wx /= sqrt3;
            wy /= sqrt3;
            if step_cap < 3.0 {
                step_cap = rng.random::<f64>() * 3.0 + 3.0;
            } else {
                step_cap /= sqrt5;
            }
        }

        let pull = params.gravity.min(dist);
        vx += wx + pull * (x1 - x) / dist;
        vy += wy + pull * (y1 - y) / dist;

        let v_mag = vx.hypot(vy);
        if v_mag > step_cap {
            let clip = step_cap * uniform_f64(rng, 0.5, 1.0);
            vx = vx / v_mag * clip;
            vy = vy / v_mag * clip;
        }

        x += vx;
        y += vy;

        let step = vx.hypot(vy);
        let ratio = (step / step_cap).min(1.0);
        pending_delay += params.min_wait + rng.random::<f64>() * wait_span * ratio;

        let (rx, ry) = (x.round() as i32, y.round() as i32);
        match points.last_mut() {
            // Sub-pixel steps fold their delay into the previous point.
            Some(last) if last.x == rx && last.y == ry => last.delay_ms += pending_delay,
            _ => points.push(PathPoint {
                x: rx,
                y: ry,
                delay_ms: pending_delay,
            }),
        }
        pending_delay = 0.0;
    }

    let target = (x1.round() as i32, y1.round() as i32);
    match points.last_mut() {
        Some(last) if (last.x, last.y) == target => {}
        _ => points.push(PathPoint {
            x: target.0,
            y: target.1,
            delay_ms: params.min_wait,
        }),
    }

    apply_speed_curve(&mut points);
    points
}

/// Speed multiplier for a point at relative position `t` in `[0, 1]`.
///
/// Accelerates from 0.5x to 1x over the first 20%, cruises, then decelerates from 1x to
/// 0.4x over the last 20%. Never below 0.3.
pub fn speed_multiplier(t: f64) -> f64 {
    let m = if t < 0.2 {
        0.5 + (t / 0.2) * 0.5
    } else if t > 0.8 {
        1.0 - ((t - 0.8) / 0.2) * 0.6
    } else {
        1.0
    };
    m.max(0.3)
}

/// Divide each point's delay by the speed multiplier of its position in the path.
pub fn apply_speed_curve(points: &mut [PathPoint]) {
    let n = points.len();
    if n < 2 {
        return;
    }
    let last = (n - 1) as f64;
    for (i, p) in points.iter_mut().enumerate() {
        p.delay_ms /= speed_multiplier(i as f64 / last);
    }
}

/// Divide all delays by a speed factor (`> 1` is faster).
pub fn scale_speed(points: &mut [PathPoint], speed: f64) {
    if speed > 0.0 && (speed - 1.0).abs() > f64::EPSILON {
        for p in points {
            p.delay_ms /= speed;
        }
    }
}

/// Fit a path to a total duration.
///
/// The path is subsampled so that the estimated per-point write overhead stays within 80%
/// of the budget (the final point is always kept), then delays are rescaled so that they
/// sum to `target_ms - overhead`. When all delays are zero the remaining budget is spread
/// evenly.
pub fn fit_to_duration(points: Vec<PathPoint>, target_ms: f64, overhead_ms: f64) -> Vec<PathPoint> {
    if points.is_empty() || target_ms <= 0.0 {
        return points;
    }

    let max_points = if overhead_ms > 0.0 {
        ((target_ms * OVERHEAD_BUDGET_SHARE / overhead_ms).floor() as usize).max(1)
    } else {
        points.len()
    };
    let mut points = subsample(points, max_points);

    let n = points.len() as f64;
    let budget = (target_ms - overhead_ms * n).max(0.0);
    let sum: f64 = points.iter().map(|p| p.delay_ms).sum();
    if sum <= 0.0 {
        let each = budget / n;
        for p in &mut points {
            p.delay_ms = each;
        }
    } else {
        let k = budget / sum;
        for p in &mut points {
            p.delay_ms *= k;
        }
    }
    points
}

/// Keep at most `max` points, evenly spaced, always ending with the last one. Delays of
/// dropped points are carried into the next kept point.
fn subsample(points: Vec<PathPoint>, max: usize) -> Vec<PathPoint> {
    let n = points.len();
    if n <= max {
        return points;
    }
    let mut out = Vec::with_capacity(max);
    let mut carried = 0.0;
    let mut next_slot = 1usize;
    for (i, p) in points.iter().enumerate() {
        carried += p.delay_ms;
        // Index of the point that closes slot `next_slot` of `max`.
        let keep_at = (next_slot * n).div_ceil(max) - 1;
        if i == keep_at || i == n - 1 {
            out.push(PathPoint {
                delay_ms: carried,
                ..*p
            });
            carried = 0.0;
            next_slot += 1;
            if out.len() == max {
                break;
            }
        }
    }
    if let (Some(last_kept), Some(last)) = (out.last_mut(), points.last()) {
        last_kept.x = last.x;
        last_kept.y = last.y;
    }
    out
}

/// Where to overshoot to, if this movement should overshoot at all.
///
/// The probability grows linearly with distance up to `reference_distance`; movements
/// shorter than `min_distance` never overshoot. The point lies beyond the target along
/// the travel vector, clamped to `bounds` when given.
pub fn overshoot_point<R: Rng + ?Sized>(
    rng: &mut R,
    settings: &MouseSettings,
    from: (f64, f64),
    to: (f64, f64),
    bounds: Option<Rect>,
) -> Option<(f64, f64)> {
    let cfg = &settings.overshoot;
    let (dx, dy) = (to.0 - from.0, to.1 - from.1);
    let distance = dx.hypot(dy);
    if !cfg.enabled || distance < cfg.min_distance.max(1.0) {
        return None;
    }
    let p = (cfg.probability * distance / cfg.reference_distance).clamp(0.0, 1.0);
    if !rng.random_bool(p) {
        return None;
    }

    let offset = distance * uniform_f64(rng, cfg.multiplier_min, cfg.multiplier_max);
    let (ux, uy) = (dx / distance, dy / distance);
    let (mut ox, mut oy) = (to.0 + ux * offset, to.1 + uy * offset);
    if let Some(b) = bounds {
        ox = ox.clamp(b.x as f64, (b.x + b.width - 1) as f64);
        oy = oy.clamp(b.y as f64, (b.y + b.height - 1) as f64);
    }
    Some((ox, oy))
}

/// Full humanized movement: an optional overshoot leg with a short pause, then the
/// (possibly corrective) path to the true target.
pub fn humanized_path<R: Rng + ?Sized>(
    rng: &mut R,
    settings: &MouseSettings,
    from: (f64, f64),
    to: (f64, f64),
    allow_overshoot: bool,
) -> Vec<PathPoint> {
    let params = WindParams::from_settings(settings);
    let overshoot = if allow_overshoot {
        overshoot_point(rng, settings, from, to, settings.screen_bounds)
    } else {
        None
    };

    let mut points = match overshoot {
        Some(beyond) => {
            let mut first = generate_path(rng, &params, from, beyond);
            if let Some(last) = first.last_mut() {
                last.delay_ms += uniform_ms(rng, settings.overshoot.pause) as f64;
            }
            let corrective = params.scaled(settings.overshoot.correction_scale);
            let start = first
                .last()
                .map(|p| (p.x as f64, p.y as f64))
                .unwrap_or(beyond);
            let second = generate_path(rng, &corrective, start, to);
            let room = MAX_PATH_POINTS.saturating_sub(second.len());
            first.truncate(room);
            first.extend(second);
            first
        }
        None => generate_path(rng, &params, from, to),
    };
    scale_speed(&mut points, settings.speed);
    points
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn path_ends_exactly_on_target() {
        let mut rng = StdRng::seed_from_u64(42);
        let params = WindParams::default();
        let cases = [
            ((0.0, 0.0), (500.0, 300.0)),
            ((1919.0, 1079.0), (3.0, 4.0)),
            ((100.0, 100.0), (100.4, 100.2)),
            ((10.0, 10.0), (10.0, 10.0)),
            ((0.0, 0.0), (-250.0, 40.0)),
        ];
        for (from, to) in cases {
            let path = generate_path(&mut rng, &params, from, to);
            let last = path.last().unwrap();
            assert_eq!((last.x, last.y), (to.0.round() as i32, to.1.round() as i32));
            assert!(path.len() <= MAX_PATH_POINTS);
        }
    }

    #[test]
    fn step_cap_is_respected_mid_path() {
        let mut rng = StdRng::seed_from_u64(1);
        let params = WindParams::default();
        let path = generate_path(&mut rng, &params, (0.0, 0.0), (800.0, 0.0));
        for w in path.windows(2) {
            let d = ((w[1].x - w[0].x) as f64).hypot((w[1].y - w[0].y) as f64);
            // Rounding can add at most one pixel per axis.
            assert!(d <= params.max_step + 2.0, "step of {d}px");
        }
    }

    #[test]
    fn degenerate_params_still_terminate() {
        let mut rng = StdRng::seed_from_u64(2);
        let params = WindParams {
            gravity: 0.0,
            wind: 0.0,
            ..WindParams::default()
        };
        let path = generate_path(&mut rng, &params, (0.0, 0.0), (1000.0, 1000.0));
        assert!(path.len() <= MAX_PATH_POINTS);
        assert_eq!(path.last().map(|p| (p.x, p.y)), Some((1000, 1000)));
    }

    #[test]
    fn speed_curve_shape() {
        assert!((speed_multiplier(0.0) - 0.5).abs() < 1e-9);
        assert!((speed_multiplier(0.5) - 1.0).abs() < 1e-9);
        assert!((speed_multiplier(1.0) - 0.4).abs() < 1e-9);
        for i in 0..=100 {
            assert!(speed_multiplier(i as f64 / 100.0) >= 0.3);
        }
    }

    #[test]
    fn fitting_hits_requested_duration() {
        let mut rng = StdRng::seed_from_u64(3);
        let path = generate_path(&mut rng, &WindParams::default(), (0.0, 0.0), (900.0, 500.0));
        let overhead = 2.0;
        let fitted = fit_to_duration(path, 400.0, overhead);
        let total: f64 = fitted.iter().map(|p| p.delay_ms).sum::<f64>() + overhead * fitted.len() as f64;
        assert!((total - 400.0).abs() < 1e-6, "total {total}");
        assert!(fitted.len() as f64 * overhead <= 400.0 * 0.8 + 1e-9);
    }

    #[test]
    fn fitting_keeps_final_point_when_subsampling() {
        let points: Vec<PathPoint> = (1..=500)
            .map(|i| PathPoint {
                x: i,
                y: 2 * i,
                delay_ms: 1.0,
            })
            .collect();
        let fitted = fit_to_duration(points, 100.0, 1.0);
        assert_eq!(fitted.len(), 80);
        assert_eq!(fitted.last().map(|p| (p.x, p.y)), Some((500, 1000)));
    }

    #[test]
    fn fitting_zero_delays_spreads_budget_evenly() {
        let points = vec![
            PathPoint {
                x: 1,
                y: 1,
                delay_ms: 0.0,
            };
            4
        ];
        let fitted = fit_to_duration(points, 100.0, 5.0);
        for p in &fitted {
            assert!((p.delay_ms - 20.0).abs() < 1e-9);
        }
    }

    #[test]
    fn overshoot_lands_beyond_target_and_corrects() {
        let mut rng = StdRng::seed_from_u64(4);
        let mut settings = MouseSettings::default();
        settings.overshoot.probability = 1.0;
        settings.overshoot.reference_distance = 1.0;
        let beyond = overshoot_point(&mut rng, &settings, (0.0, 0.0), (1000.0, 0.0), None).unwrap();
        assert!(beyond.0 > 1000.0);

        let path = humanized_path(&mut rng, &settings, (0.0, 0.0), (1000.0, 0.0), true);
        assert_eq!(path.last().map(|p| (p.x, p.y)), Some((1000, 0)));
        assert!(path.iter().any(|p| p.x > 1000));
    }

    #[test]
    fn overshoot_respects_bounds_and_short_moves() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut settings = MouseSettings::default();
        settings.overshoot.probability = 1.0;
        settings.overshoot.reference_distance = 1.0;
        let bounds = Rect::new(0, 0, 1010, 100);
        let beyond =
            overshoot_point(&mut rng, &settings, (0.0, 0.0), (1000.0, 0.0), Some(bounds)).unwrap();
        assert!(beyond.0 <= 1009.0);

        assert!(overshoot_point(&mut rng, &settings, (0.0, 0.0), (10.0, 0.0), None).is_none());
    }
}
