//! Edge orientation histogram

use std::f32::consts::PI;

use super::features::Feature;
use super::WorkingImage;

/// Orientation bins over [0, pi)
pub const EDGE_BINS: usize = 18;
/// Gradient magnitude that counts as an edge pixel
pub(crate) const EDGE_MAGNITUDE: f32 = 80.0;
/// Edge pixel fraction that earns full confidence
const FULL_CONFIDENCE_DENSITY: f32 = 0.02;

/// Magnitude-weighted histogram of undirected gradient orientations
///
/// Directions are folded onto [0, pi) so a dark-on-light edge and a
/// light-on-dark edge land in the same bin.
pub(crate) fn extract_edges(work: &WorkingImage) -> Feature<Vec<f32>> {
    let field = &work.gradients;
    let mut hist = vec![0.0f32; EDGE_BINS];
    let mut edge_pixels = 0usize;

    for (&magnitude, &orientation) in field.magnitude.iter().zip(&field.orientation) {
        if magnitude < EDGE_MAGNITUDE {
            continue;
        }
        let folded = orientation.rem_euclid(PI);
        let bin = ((folded / PI * EDGE_BINS as f32) as usize).min(EDGE_BINS - 1);
        hist[bin] += magnitude;
        edge_pixels += 1;
    }

    let total: f32 = hist.iter().sum();
    if total > 0.0 {
        hist.iter_mut().for_each(|v| *v /= total);
    }

    let density = edge_pixels as f32 / work.pixel_count().max(1) as f32;
    Feature::new(hist, density / FULL_CONFIDENCE_DENSITY)
}

/// Cosine similarity, 0.0 when either vector is all zeros
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na = a.iter().map(|v| v * v).sum::<f32>().sqrt();
    let nb = b.iter().map(|v| v * v).sum::<f32>().sqrt();
    if na < 1e-9 || nb < 1e-9 {
        return 0.0;
    }
    (dot / (na * nb)).clamp(0.0, 1.0)
}
