//! Template matching and pixel scanning on captured frames.
//!
//! Matching is zero-mean normalized cross-correlation on luma, scored in `[0, 1]`.
//! Window sums come from integral images so only the numerator is computed per offset.

use image::imageops::{self, FilterType};
use image::{GrayImage, RgbaImage};

use crate::config::Rgb;

/// Skip downscaling when the safe factor would shrink less than this.
pub const MIN_USEFUL_SHRINK: f64 = 0.95;
/// The scaled frame must stay at least this many times the template size.
pub const FRAME_TO_TEMPLATE_RATIO: f64 = 2.0;
/// Scaled templates keep at least this many pixels on their shorter side.
pub const MIN_TEMPLATE_SIDE: f64 = 8.0;

const FLAT_EPSILON: f64 = 1e-6;
/// Per-pixel luma variance under which a window counts as flat.
const FLAT_WINDOW_VARIANCE: f64 = 1.0;

/// Luma plane in `f32`.
#[derive(Debug, Clone)]
pub struct Plane {
    pub width: usize,
    pub height: usize,
    data: Vec<f32>,
}

impl Plane {
    pub fn from_gray(img: &GrayImage) -> Self {
        Self {
            width: img.width() as usize,
            height: img.height() as usize,
            data: img.as_raw().iter().map(|&v| v as f32).collect(),
        }
    }

    pub fn from_rgba(img: &RgbaImage) -> Self {
        Self::from_gray(&imageops::grayscale(img))
    }

    fn row(&self, y: usize) -> &[f32] {
        &self.data[y * self.width..(y + 1) * self.width]
    }
}

/// Best match location (top-left, in plane coordinates) and its score.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct MatchScore {
    pub x: u32,
    pub y: u32,
    pub score: f64,
}

/// Summed-area tables for window mean and variance.
struct Integral {
    stride: usize,
    sum: Vec<f64>,
    sq: Vec<f64>,
}

impl Integral {
    fn new(p: &Plane) -> Self {
        let stride = p.width + 1;
        let mut sum = vec![0.0; stride * (p.height + 1)];
        let mut sq = vec![0.0; stride * (p.height + 1)];
        for y in 0..p.height {
            let (mut row_sum, mut row_sq) = (0.0, 0.0);
            for (x, &v) in p.row(y).iter().enumerate() {
                let v = v as f64;
                row_sum += v;
                row_sq += v * v;
                let i = (y + 1) * stride + x + 1;
                sum[i] = sum[i - stride] + row_sum;
                sq[i] = sq[i - stride] + row_sq;
            }
        }
        Self { stride, sum, sq }
    }

    fn window(&self, table: &[f64], x: usize, y: usize, w: usize, h: usize) -> f64 {
        let s = self.stride;
        table[(y + h) * s + x + w] - table[y * s + x + w] - table[(y + h) * s + x]
            + table[y * s + x]
    }
}

/// Global maximum of the normalized correlation of `tpl` over `frame`.
/// `None` when the frame is smaller than the template in either axis.
pub fn match_template(frame: &Plane, tpl: &Plane) -> Option<MatchScore> {
    let (tw, th) = (tpl.width, tpl.height);
    if tw == 0 || th == 0 || frame.width < tw || frame.height < th {
        return None;
    }
    let n = (tw * th) as f64;
    let t_mean = tpl.data.iter().map(|&v| v as f64).sum::<f64>() / n;
    let centered: Vec<f32> = tpl.data.iter().map(|&v| v - t_mean as f32).collect();
    let t_energy: f64 = centered.iter().map(|&v| (v as f64) * (v as f64)).sum();
    let flat_template = t_energy < FLAT_EPSILON;

    let integral = Integral::new(frame);
    let mut best = MatchScore {
        x: 0,
        y: 0,
        score: f64::NEG_INFINITY,
    };

    for y in 0..=frame.height - th {
        for x in 0..=frame.width - tw {
            let s1 = integral.window(&integral.sum, x, y, tw, th);
            let s2 = integral.window(&integral.sq, x, y, tw, th);
            let w_energy = (s2 - s1 * s1 / n).max(0.0);

            let score = if flat_template {
                // Correlation is undefined; score by how close a flat window's level is.
                if w_energy / n < FLAT_WINDOW_VARIANCE {
                    1.0 - ((s1 / n) - t_mean).abs() / 255.0
                } else {
                    0.0
                }
            } else if w_energy < FLAT_EPSILON {
                0.0
            } else {
                let mut num = 0.0f64;
                for ty in 0..th {
                    let f_row = &frame.row(y + ty)[x..x + tw];
                    let t_row = &centered[ty * tw..(ty + 1) * tw];
                    num += f_row
                        .iter()
                        .zip(t_row)
                        .map(|(&a, &b)| (a * b) as f64)
                        .sum::<f64>();
                }
                num / (t_energy * w_energy).sqrt()
            };

            if score > best.score {
                best = MatchScore {
                    x: x as u32,
                    y: y as u32,
                    score,
                };
            }
        }
    }
    best.score = best.score.clamp(0.0, 1.0);
    Some(best)
}

/// Smallest factor that keeps the frame at least twice the template in each axis and the
/// template readable. `None` when it would not shrink meaningfully.
pub fn safe_scale_factor(frame: (u32, u32), template: (u32, u32)) -> Option<f64> {
    let (fw, fh) = (frame.0 as f64, frame.1 as f64);
    let (tw, th) = (template.0 as f64, template.1 as f64);
    if fw == 0.0 || fh == 0.0 || tw == 0.0 || th == 0.0 {
        return None;
    }
    let factor = (FRAME_TO_TEMPLATE_RATIO * tw / fw)
        .max(FRAME_TO_TEMPLATE_RATIO * th / fh)
        .max(MIN_TEMPLATE_SIDE / tw.min(th));
    (factor < MIN_USEFUL_SHRINK).then_some(factor)
}

pub fn downscale(img: &RgbaImage, factor: f64) -> RgbaImage {
    let w = ((img.width() as f64 * factor).round() as u32).max(1);
    let h = ((img.height() as f64 * factor).round() as u32).max(1);
    imageops::resize(img, w, h, FilterType::Triangle)
}

/// First pixel (row-major) within `tolerance` of `color` on every channel.
pub fn find_pixel(img: &RgbaImage, color: Rgb, tolerance: u8) -> Option<(u32, u32, Rgb)> {
    img.enumerate_pixels().find_map(|(x, y, p)| {
        let [r, g, b, _] = p.0;
        let close = r.abs_diff(color.r) <= tolerance
            && g.abs_diff(color.g) <= tolerance
            && b.abs_diff(color.b) <= tolerance;
        close.then_some((x, y, Rgb { r, g, b }))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Luma, Rgba};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn pattern(w: u32, h: u32, seed: u64) -> GrayImage {
        let mut rng = StdRng::seed_from_u64(seed);
        GrayImage::from_fn(w, h, |_, _| Luma([rng.random::<u8>()]))
    }

    #[test]
    fn finds_exact_subimage() {
        let frame = pattern(60, 40, 1);
        let tpl = imageops::crop_imm(&frame, 17, 9, 12, 10).to_image();
        let m = match_template(&Plane::from_gray(&frame), &Plane::from_gray(&tpl)).unwrap();
        assert_eq!((m.x, m.y), (17, 9));
        assert!(m.score > 0.999, "{}", m.score);
    }

    #[test]
    fn smaller_frame_has_no_match() {
        let frame = pattern(10, 10, 1);
        let tpl = pattern(12, 4, 2);
        assert!(match_template(&Plane::from_gray(&frame), &Plane::from_gray(&tpl)).is_none());
    }

    #[test]
    fn unrelated_template_scores_low() {
        let frame = GrayImage::from_fn(40, 40, |x, _| Luma([if x < 20 { 0 } else { 255 }]));
        let tpl = GrayImage::from_fn(8, 8, |_, y| Luma([if y < 4 { 0 } else { 255 }]));
        let m = match_template(&Plane::from_gray(&frame), &Plane::from_gray(&tpl)).unwrap();
        assert!(m.score < 0.5, "{}", m.score);
    }

    #[test]
    fn flat_template_matches_flat_area_of_same_level() {
        let frame = GrayImage::from_fn(30, 30, |x, y| {
            Luma([if x >= 10 && y >= 10 { 200 } else { ((x * 7 + y * 3) % 100) as u8 }])
        });
        let tpl = GrayImage::from_pixel(5, 5, Luma([200]));
        let m = match_template(&Plane::from_gray(&frame), &Plane::from_gray(&tpl)).unwrap();
        assert!(m.x >= 10 && m.y >= 10);
        assert!(m.score > 0.99);
    }

    #[test]
    fn scale_factor_respects_frame_ratio_and_threshold() {
        let f = safe_scale_factor((1000, 800), (50, 40)).unwrap();
        assert!((f - 0.2).abs() < 1e-9, "{f}");
        assert!(safe_scale_factor((100, 100), (50, 50)).is_none());
        // Template floor wins over the frame ratio.
        let f = safe_scale_factor((2000, 2000), (16, 16)).unwrap();
        assert!((f - 0.5).abs() < 1e-9, "{f}");
    }

    #[test]
    fn pixel_scan_is_row_major_with_tolerance() {
        let mut img = RgbaImage::from_pixel(10, 10, Rgba([0, 0, 0, 255]));
        img.put_pixel(7, 2, Rgba([250, 10, 10, 255]));
        img.put_pixel(1, 5, Rgba([255, 0, 0, 255]));
        let target = Rgb { r: 255, g: 0, b: 0 };

        let (x, y, c) = find_pixel(&img, target, 10).unwrap();
        assert_eq!((x, y), (7, 2));
        assert_eq!(c, Rgb { r: 250, g: 10, b: 10 });
        assert_eq!(find_pixel(&img, target, 0).map(|p| (p.0, p.1)), Some((1, 5)));
        assert!(find_pixel(&img, Rgb { r: 0, g: 255, b: 0 }, 5).is_none());
    }
}
