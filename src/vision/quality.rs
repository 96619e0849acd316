//! Reference image quality scoring

use serde::{Deserialize, Serialize};

use super::features::Feature;
use super::WorkingImage;
use crate::config::CatalogConfig;

/// Laplacian variance at which sharpness reaches one half
const SHARPNESS_KNEE: f32 = 300.0;
/// Intensity standard deviation that earns full contrast
const FULL_CONTRAST_STD: f32 = 64.0;
/// Share of the package covered by text that earns full coverage
const FULL_TEXT_COVERAGE: f32 = 0.2;
/// Lighting is measured on a grid of this many blocks per side
const LIGHTING_BLOCKS: u32 = 4;

/// Weighted quality of an image plus its components (all 0.0 - 1.0)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct QualityScore {
    pub overall: f32,
    pub resolution: f32,
    pub sharpness: f32,
    pub contrast: f32,
    pub text_coverage: f32,
    pub lighting: f32,
}

/// Score an image from its working planes and layout occupancy
pub(crate) fn assess_quality(
    work: &WorkingImage,
    layout: &Feature<Vec<f32>>,
    config: &CatalogConfig,
) -> QualityScore {
    let source_pixels = work.source_width as f32 * work.source_height as f32;
    let resolution = (source_pixels / config.target_pixels.max(1) as f32).min(1.0);
    let sharpness = sharpness(work);
    let contrast = (intensity_std(work) / FULL_CONTRAST_STD).min(1.0);
    let text_coverage = text_coverage(work, layout);
    let lighting = lighting_evenness(work);

    let w = &config.quality_weights;
    let total = w.resolution + w.sharpness + w.contrast + w.text_coverage + w.lighting;
    let overall = if total > 0.0 {
        (w.resolution * resolution
            + w.sharpness * sharpness
            + w.contrast * contrast
            + w.text_coverage * text_coverage
            + w.lighting * lighting)
            / total
    } else {
        0.0
    };

    QualityScore {
        overall: overall.clamp(0.0, 1.0),
        resolution,
        sharpness,
        contrast,
        text_coverage,
        lighting,
    }
}

/// Variance of the 4-neighbor Laplacian, squashed into 0.0 - 1.0
fn sharpness(work: &WorkingImage) -> f32 {
    let (width, height) = work.dimensions();
    if width < 3 || height < 3 {
        return 0.0;
    }

    let px = |x: u32, y: u32| work.gray.get_pixel(x, y).0[0] as f32;
    let mut sum = 0.0f64;
    let mut sum_sq = 0.0f64;
    let mut count = 0.0f64;

    for y in 1..height - 1 {
        for x in 1..width - 1 {
            let lap = 4.0 * px(x, y) - px(x - 1, y) - px(x + 1, y) - px(x, y - 1) - px(x, y + 1);
            sum += lap as f64;
            sum_sq += (lap * lap) as f64;
            count += 1.0;
        }
    }

    let mean = sum / count;
    let variance = (sum_sq / count - mean * mean).max(0.0) as f32;
    variance / (variance + SHARPNESS_KNEE)
}

fn intensity_std(work: &WorkingImage) -> f32 {
    let count = work.pixel_count().max(1) as f64;
    let (sum, sum_sq) = work.gray.pixels().fold((0.0f64, 0.0f64), |(s, sq), p| {
        let v = p.0[0] as f64;
        (s + v, sq + v * v)
    });
    let mean = sum / count;
    ((sum_sq / count - mean * mean).max(0.0)).sqrt() as f32
}

fn text_coverage(work: &WorkingImage, layout: &Feature<Vec<f32>>) -> f32 {
    if layout.value.is_empty() {
        return 0.0;
    }
    let covered = if work.text_regions.is_empty() {
        // Edge-density grid: count busy cells
        layout.value.iter().filter(|v| **v > 0.25).count() as f32 / layout.value.len() as f32
    } else {
        layout.value.iter().sum::<f32>() / layout.value.len() as f32
    };
    (covered / FULL_TEXT_COVERAGE).min(1.0)
}

/// One minus the coefficient of variation of block mean intensities
fn lighting_evenness(work: &WorkingImage) -> f32 {
    let (width, height) = work.dimensions();
    let blocks = LIGHTING_BLOCKS.min(width).min(height).max(1);
    let mut means = Vec::with_capacity((blocks * blocks) as usize);

    for by in 0..blocks {
        for bx in 0..blocks {
            let (x0, x1) = (bx * width / blocks, (bx + 1) * width / blocks);
            let (y0, y1) = (by * height / blocks, (by + 1) * height / blocks);
            let mut sum = 0.0f32;
            let mut count = 0.0f32;
            for y in y0..y1 {
                for x in x0..x1 {
                    sum += work.gray.get_pixel(x, y).0[0] as f32;
                    count += 1.0;
                }
            }
            if count > 0.0 {
                means.push(sum / count);
            }
        }
    }

    let n = means.len().max(1) as f32;
    let mean = means.iter().sum::<f32>() / n;
    if mean < 1.0 {
        return 0.0;
    }
    let std = (means.iter().map(|m| (m - mean) * (m - mean)).sum::<f32>() / n).sqrt();
    (1.0 - std / mean).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vision::layout::extract_layout;
    use crate::vision::{test_images, QueryImage};
    use image::RgbImage;

    fn quality_of(image: RgbImage) -> QualityScore {
        let work = WorkingImage::prepare(&QueryImage::new(image), 256);
        let layout = extract_layout(&work, 8);
        assess_quality(&work, &layout, &CatalogConfig::default())
    }

    #[test]
    fn test_package_passes_minimum() {
        let quality = quality_of(test_images::package());
        assert!(quality.overall >= CatalogConfig::default().min_quality, "{:?}", quality);
        assert!(quality.sharpness > 0.5);
        assert!((quality.resolution - 1.0).abs() < 0.001);
    }

    #[test]
    fn test_blank_fails_minimum() {
        let quality = quality_of(test_images::blank());
        assert!(quality.overall < CatalogConfig::default().min_quality, "{:?}", quality);
        assert_eq!(quality.sharpness, 0.0);
        assert_eq!(quality.contrast, 0.0);
    }

    #[test]
    fn test_small_image_low_resolution() {
        let small = image::imageops::resize(
            &test_images::package(),
            40,
            40,
            image::imageops::FilterType::Triangle,
        );
        let quality = quality_of(small);
        assert!(quality.resolution < 0.1);
    }
}
