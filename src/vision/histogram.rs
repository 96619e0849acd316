//! Color and texture histograms
//!
//! Color is binned on hue and saturation, which survive a global change in
//! illumination; brightness only decides the four achromatic bins. Texture
//! uses rotation-invariant uniform local binary patterns, which depend on
//! pixel ordering rather than absolute intensity.

use imageproc::local_binary_patterns::local_binary_pattern;

use super::features::Feature;
use super::WorkingImage;

const HUE_BINS: usize = 15;
const SAT_BINS: usize = 4;
const GRAY_BINS: usize = 4;
/// Total color bins
pub const COLOR_BINS: usize = HUE_BINS * SAT_BINS + GRAY_BINS;

/// Below this saturation a pixel has no reliable hue
const MIN_CHROMA: f32 = 0.15;
/// Below this value a pixel has no reliable hue
const MIN_VALUE: f32 = 0.2;
const GRAY_LEVELS: [f32; GRAY_BINS - 1] = [0.2, 0.45, 0.7];

/// Uniform patterns by bit count (0..=8) plus one bin for non-uniform
const LBP_BINS: usize = 10;
/// Total texture bins (one LBP histogram per quadrant)
pub const TEXTURE_BINS: usize = LBP_BINS * 4;

/// 64-bin hue/saturation histogram, normalized to sum 1
pub(crate) fn extract_color(work: &WorkingImage) -> Feature<Vec<f32>> {
    let mut hist = vec![0.0f32; COLOR_BINS];
    for pixel in work.rgb.pixels() {
        let [r, g, b] = pixel.0;
        let (h, s, v) = rgb_to_hsv(r, g, b);
        hist[color_bin(h, s, v)] += 1.0;
    }

    // Judged on the raw plane, flattening brightens everything
    let dark_level = (MIN_VALUE * 255.0) as u8;
    let dark = work.gray.pixels().filter(|p| p.0[0] < dark_level).count();

    let total = work.pixel_count().max(1) as f32;
    hist.iter_mut().for_each(|v| *v /= total);

    // Tiny or mostly unlit images give an unreliable distribution
    let mut confidence = if work.pixel_count() < 64 { 0.3 } else { 1.0 };
    if dark as f32 / total > 0.9 {
        confidence *= 0.4;
    }
    Feature::new(hist, confidence)
}

fn color_bin(h: f32, s: f32, v: f32) -> usize {
    if s < MIN_CHROMA || v < MIN_VALUE {
        let level = GRAY_LEVELS.iter().filter(|&&t| v >= t).count();
        return HUE_BINS * SAT_BINS + level;
    }
    let hue_bin = ((h / 360.0 * HUE_BINS as f32) as usize).min(HUE_BINS - 1);
    let sat_bin = ((s * SAT_BINS as f32) as usize).min(SAT_BINS - 1);
    hue_bin * SAT_BINS + sat_bin
}

/// Hue in degrees, saturation and value in 0.0 - 1.0
fn rgb_to_hsv(r: u8, g: u8, b: u8) -> (f32, f32, f32) {
    let r = r as f32 / 255.0;
    let g = g as f32 / 255.0;
    let b = b as f32 / 255.0;
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;

    let s = if max > 0.0 { delta / max } else { 0.0 };
    let h = if delta <= f32::EPSILON {
        0.0
    } else if max == r {
        60.0 * ((g - b) / delta).rem_euclid(6.0)
    } else if max == g {
        60.0 * ((b - r) / delta + 2.0)
    } else {
        60.0 * ((r - g) / delta + 4.0)
    };

    (h, s, max)
}

/// LBP histogram per image quadrant, each quadrant weighted 1/4
pub(crate) fn extract_texture(work: &WorkingImage) -> Feature<Vec<f32>> {
    let (width, height) = work.dimensions();
    let mut hist = vec![0.0f32; TEXTURE_BINS];
    if width < 3 || height < 3 {
        return Feature::new(hist, 0.0);
    }

    let mut counts = [0usize; 4];
    for y in 1..height - 1 {
        for x in 1..width - 1 {
            let Some(code) = local_binary_pattern(&work.luma, x, y) else {
                continue;
            };
            let quadrant = (if y >= height / 2 { 2 } else { 0 }) + usize::from(x >= width / 2);
            hist[quadrant * LBP_BINS + lbp_bin(code)] += 1.0;
            counts[quadrant] += 1;
        }
    }

    for (quadrant, &count) in counts.iter().enumerate() {
        if count == 0 {
            continue;
        }
        let norm = count as f32 * 4.0;
        hist[quadrant * LBP_BINS..(quadrant + 1) * LBP_BINS]
            .iter_mut()
            .for_each(|v| *v /= norm);
    }

    let confidence = if width * height < 32 * 32 { 0.4 } else { 1.0 };
    Feature::new(hist, confidence)
}

/// Rotation-invariant uniform bin of an 8-neighbor pattern
fn lbp_bin(code: u8) -> usize {
    let transitions = (code ^ code.rotate_right(1)).count_ones();
    if transitions <= 2 {
        code.count_ones() as usize
    } else {
        LBP_BINS - 1
    }
}

/// Histogram intersection of two normalized histograms
pub fn histogram_intersection(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    a.iter()
        .zip(b)
        .map(|(x, y)| x.min(*y))
        .sum::<f32>()
        .clamp(0.0, 1.0)
}

/// `1 - chi^2 / 2` for two normalized histograms
pub fn chi_squared_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let sum_a: f32 = a.iter().sum();
    let sum_b: f32 = b.iter().sum();
    if sum_a <= 0.0 || sum_b <= 0.0 {
        return 0.0;
    }

    let chi: f32 = a
        .iter()
        .zip(b)
        .filter(|(x, y)| *x + *y > 0.0)
        .map(|(x, y)| (x - y) * (x - y) / (x + y))
        .sum();

    (1.0 - chi / 2.0).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vision::{test_images, QueryImage};

    fn work(image: image::RgbImage) -> WorkingImage {
        WorkingImage::prepare(&QueryImage::new(image), 256)
    }

    #[test]
    fn test_hsv_conversion() {
        let (h, s, v) = rgb_to_hsv(255, 0, 0);
        assert!(h.abs() < 0.01 && (s - 1.0).abs() < 0.01 && (v - 1.0).abs() < 0.01);
        let (h, _, _) = rgb_to_hsv(0, 0, 255);
        assert!((h - 240.0).abs() < 0.01);
        let (_, s, _) = rgb_to_hsv(128, 128, 128);
        assert_eq!(s, 0.0);
    }

    #[test]
    fn test_color_histogram_shape() {
        let hist = extract_color(&work(test_images::package()));
        assert_eq!(hist.value.len(), 64);
        let sum: f32 = hist.value.iter().sum();
        assert!((sum - 1.0).abs() < 0.001);
        assert_eq!(hist.confidence, 1.0);
    }

    #[test]
    fn test_color_survives_dimming() {
        let original = extract_color(&work(test_images::package()));
        let dimmed = extract_color(&work(test_images::dimmed(&test_images::package(), 0.8)));
        assert!(histogram_intersection(&original.value, &dimmed.value) > 0.95);
    }

    #[test]
    fn test_texture_histogram_normalized() {
        let hist = extract_texture(&work(test_images::package()));
        assert_eq!(hist.value.len(), TEXTURE_BINS);
        let sum: f32 = hist.value.iter().sum();
        assert!((sum - 1.0).abs() < 0.001);
    }

    #[test]
    fn test_lbp_bins() {
        assert_eq!(lbp_bin(0b0000_0000), 0);
        assert_eq!(lbp_bin(0b1111_1111), 8);
        assert_eq!(lbp_bin(0b0000_0111), 3);
        assert_eq!(lbp_bin(0b0101_0101), LBP_BINS - 1);
    }

    #[test]
    fn test_histogram_metrics() {
        let a = vec![0.5, 0.5, 0.0];
        let b = vec![0.0, 0.5, 0.5];
        assert!((histogram_intersection(&a, &a) - 1.0).abs() < 0.001);
        assert!((histogram_intersection(&a, &b) - 0.5).abs() < 0.001);
        assert!((chi_squared_similarity(&a, &a) - 1.0).abs() < 0.001);
        assert!((chi_squared_similarity(&a, &b) - 0.5).abs() < 0.001);
        assert_eq!(chi_squared_similarity(&a, &[0.0, 0.0, 0.0]), 0.0);
    }
}
