//! Camera-side spoof heuristics: sharpness and highlight clipping.
//!
//! Phone and tablet screens photographed by the capture camera tend to show
//! one of three artefacts: an overall soft image (low Laplacian variance),
//! moiré interference between pixel grids (very high Laplacian variance), or
//! blown-out highlights from the backlight. None of these prove liveness;
//! they are cheap filters on obvious replays.

use std::fmt;

use image::{DynamicImage, GrayImage};
use serde::{Deserialize, Serialize};

/// Tunable thresholds. Defaults were tuned on an OV5640-class sensor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpoofThresholds {
    /// Laplacian variance below which the frame is considered blurry.
    pub min_sharpness: f64,
    /// Laplacian variance above which the frame is considered moiré noise.
    pub max_sharpness: f64,
    /// Luminance at or above which a pixel counts as clipped.
    pub bright_level: u8,
    /// Maximum tolerated fraction of clipped pixels.
    pub max_bright_ratio: f64,
}

impl Default for SpoofThresholds {
    fn default() -> Self {
        Self {
            min_sharpness: 80.0,
            max_sharpness: 3000.0,
            bright_level: 250,
            max_bright_ratio: 0.10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpoofReason {
    Ok,
    TooBlurry,
    TooNoisy,
    Overexposed,
}

impl fmt::Display for SpoofReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SpoofReason::Ok => "OK",
            SpoofReason::TooBlurry => "too blurry (likely a screen)",
            SpoofReason::TooNoisy => "too noisy (likely screen moiré pattern)",
            SpoofReason::Overexposed => "overexposed (likely a self-lit screen)",
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpoofVerdict {
    pub is_live: bool,
    pub reason: SpoofReason,
    /// Variance of the Laplacian response over the luminance channel.
    pub sharpness: f64,
    /// Fraction of pixels at or above `bright_level`.
    pub bright_ratio: f64,
}

/// Score one decoded frame for signs of screen or print replay.
///
/// Checks run in order (blur, moiré, overexposure); the first failure wins.
pub fn check_spoofing(image: &DynamicImage, thresholds: &SpoofThresholds) -> SpoofVerdict {
    let gray = luminance(image);
    let sharpness = laplacian_variance(&gray);
    let bright_ratio = bright_ratio(&gray, thresholds.bright_level);

    let reason = if sharpness < thresholds.min_sharpness {
        SpoofReason::TooBlurry
    } else if sharpness > thresholds.max_sharpness {
        SpoofReason::TooNoisy
    } else if bright_ratio > thresholds.max_bright_ratio {
        SpoofReason::Overexposed
    } else {
        SpoofReason::Ok
    };

    SpoofVerdict {
        is_live: reason == SpoofReason::Ok,
        reason,
        sharpness,
        bright_ratio,
    }
}

/// BT.601 luma (0.299 R + 0.587 G + 0.114 B), rounded to nearest.
pub fn luminance(image: &DynamicImage) -> GrayImage {
    let rgb = image.to_rgb8();
    GrayImage::from_fn(rgb.width(), rgb.height(), |x, y| {
        let [r, g, b] = rgb.get_pixel(x, y).0;
        let luma = (299 * u32::from(r) + 587 * u32::from(g) + 114 * u32::from(b) + 500) / 1000;
        image::Luma([luma as u8])
    })
}

/// Population variance of the 4-neighbour Laplacian over the whole image.
///
/// Borders are handled by reflect-101 (`gfedcb|abcdefgh|gfedcba`).
pub fn laplacian_variance(gray: &GrayImage) -> f64 {
    let (w, h) = gray.dimensions();
    let count = u64::from(w) * u64::from(h);
    if count == 0 {
        return 0.0;
    }

    let px = |x: i64, y: i64| -> f64 {
        let x = reflect_101(x, w);
        let y = reflect_101(y, h);
        f64::from(gray.get_pixel(x, y).0[0])
    };

    let mut sum = 0.0f64;
    let mut sum_sq = 0.0f64;
    for y in 0..i64::from(h) {
        for x in 0..i64::from(w) {
            let lap = px(x - 1, y) + px(x + 1, y) + px(x, y - 1) + px(x, y + 1) - 4.0 * px(x, y);
            sum += lap;
            sum_sq += lap * lap;
        }
    }

    let n = count as f64;
    let mean = sum / n;
    (sum_sq / n - mean * mean).max(0.0)
}

fn reflect_101(i: i64, len: u32) -> u32 {
    let len = i64::from(len);
    if len == 1 {
        return 0;
    }
    let period = 2 * (len - 1);
    let mut i = i.rem_euclid(period);
    if i >= len {
        i = period - i;
    }
    i as u32
}

/// Fraction of pixels whose luminance is at least `level`.
pub fn bright_ratio(gray: &GrayImage, level: u8) -> f64 {
    let mut histogram = [0u64; 256];
    for p in gray.pixels() {
        histogram[usize::from(p.0[0])] += 1;
    }
    let total: u64 = histogram.iter().sum();
    if total == 0 {
        return 0.0;
    }
    let bright: u64 = histogram[usize::from(level)..].iter().sum();
    bright as f64 / total as f64
}
