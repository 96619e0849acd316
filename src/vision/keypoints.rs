//! Corner keypoints with local gradient descriptors

use imageproc::corners::{corners_fast9, Corner};
use std::cmp::Ordering;
use std::f32::consts::PI;

use super::features::{Feature, Keypoint};
use super::WorkingImage;
use crate::config::VisualConfig;

/// Side of the square patch described around each corner
const PATCH: u32 = 16;
/// Cells per patch side
const CELLS: u32 = 4;
/// Orientation bins per cell
const BINS: usize = 4;
/// Corners closer than this (pixels) to a stronger one are dropped
const MIN_SEPARATION: i64 = 3;
/// Keypoint count that earns full confidence
const FULL_CONFIDENCE_COUNT: f32 = 16.0;

/// Detect corners and describe their neighborhoods
pub(crate) fn extract_keypoints(
    work: &WorkingImage,
    config: &VisualConfig,
) -> Feature<Vec<Keypoint>> {
    let (width, height) = work.dimensions();
    if width < PATCH + 2 || height < PATCH + 2 {
        return Feature::new(Vec::new(), 0.0);
    }

    let mut corners = corners_fast9(&work.smoothed, config.fast_threshold);
    corners.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then(a.y.cmp(&b.y))
            .then(a.x.cmp(&b.x))
    });

    let half = PATCH / 2;
    let mut kept: Vec<&Corner> = Vec::new();
    let mut keypoints = Vec::new();

    for corner in &corners {
        if keypoints.len() >= config.max_keypoints {
            break;
        }
        if corner.x < half
            || corner.y < half
            || corner.x + half >= width
            || corner.y + half >= height
        {
            continue;
        }
        let crowded = kept.iter().any(|k| {
            (k.x as i64 - corner.x as i64).abs() < MIN_SEPARATION
                && (k.y as i64 - corner.y as i64).abs() < MIN_SEPARATION
        });
        if crowded {
            continue;
        }

        if let Some(descriptor) = describe(work, corner.x, corner.y) {
            kept.push(corner);
            keypoints.push(Keypoint {
                x: corner.x as f32 / width as f32,
                y: corner.y as f32 / height as f32,
                descriptor,
            });
        }
    }

    let confidence = (keypoints.len() as f32 / FULL_CONFIDENCE_COUNT).min(1.0);
    Feature::new(keypoints, confidence)
}

/// Magnitude-weighted orientation histograms over a grid of cells
fn describe(work: &WorkingImage, cx: u32, cy: u32) -> Option<Vec<f32>> {
    let cell = PATCH / CELLS;
    let x0 = cx - PATCH / 2;
    let y0 = cy - PATCH / 2;
    let mut descriptor = vec![0.0f32; (CELLS * CELLS) as usize * BINS];

    for py in 0..PATCH {
        for px in 0..PATCH {
            let (magnitude, orientation) = work.gradients.at(x0 + px, y0 + py);
            if magnitude <= 0.0 {
                continue;
            }
            let angle = orientation.rem_euclid(2.0 * PI);
            let bin = ((angle / (2.0 * PI) * BINS as f32) as usize).min(BINS - 1);
            let cell_idx = ((py / cell) * CELLS + px / cell) as usize;
            descriptor[cell_idx * BINS + bin] += magnitude;
        }
    }

    let norm = descriptor.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm < 1e-6 {
        return None;
    }
    descriptor.iter_mut().for_each(|v| *v /= norm);
    Some(descriptor)
}

/// Symmetric nearest-descriptor similarity between two keypoint sets
pub fn keypoint_similarity(a: &[Keypoint], b: &[Keypoint], max_distance: f32) -> f32 {
    if a.is_empty() || b.is_empty() || max_distance <= 0.0 {
        return 0.0;
    }
    let forward = directional_similarity(a, b, max_distance);
    let backward = directional_similarity(b, a, max_distance);
    ((forward + backward) / 2.0).clamp(0.0, 1.0)
}

fn directional_similarity(from: &[Keypoint], to: &[Keypoint], max_distance: f32) -> f32 {
    let total: f32 = from
        .iter()
        .map(|k| {
            let nearest = to
                .iter()
                .map(|other| descriptor_distance(&k.descriptor, &other.descriptor))
                .fold(f32::INFINITY, f32::min);
            (1.0 - nearest / max_distance).max(0.0)
        })
        .sum();
    total / from.len() as f32
}

fn descriptor_distance(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return f32::INFINITY;
    }
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vision::test_images;
    use crate::vision::QueryImage;

    fn keypoints_of(image: image::RgbImage) -> Feature<Vec<Keypoint>> {
        let config = VisualConfig::default();
        let work = WorkingImage::prepare(&QueryImage::new(image), config.working_size);
        extract_keypoints(&work, &config)
    }

    #[test]
    fn test_package_has_keypoints() {
        let features = keypoints_of(test_images::package());
        assert!(!features.value.is_empty());
        assert!(features.value.len() <= VisualConfig::default().max_keypoints);
        for k in &features.value {
            let norm: f32 = k.descriptor.iter().map(|v| v * v).sum::<f32>().sqrt();
            assert!((norm - 1.0).abs() < 0.01);
            assert!((0.0..=1.0).contains(&k.x) && (0.0..=1.0).contains(&k.y));
        }
    }

    #[test]
    fn test_blank_image_degrades() {
        let features = keypoints_of(test_images::blank());
        assert!(features.value.is_empty());
        assert_eq!(features.confidence, 0.0);
    }

    #[test]
    fn test_self_similarity() {
        let features = keypoints_of(test_images::package());
        let score = keypoint_similarity(&features.value, &features.value, 0.8);
        assert!((score - 1.0).abs() < 0.001);
        assert_eq!(keypoint_similarity(&features.value, &[], 0.8), 0.0);
    }
}
