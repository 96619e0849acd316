//! Feature set comparison

use serde::Serialize;

use super::edges::cosine_similarity;
use super::features::{FeatureKind, FeatureSet};
use super::histogram::{chi_squared_similarity, histogram_intersection};
use super::keypoints::keypoint_similarity;
use super::shape::shape_similarity;
use crate::config::VisualConfig;

/// Minimum per-feature confidence for the agreement bonus
const AGREEMENT_MIN_CONFIDENCE: f32 = 0.5;

/// Per-feature similarity (0.0 - 1.0)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct FeatureScores {
    pub keypoints: f32,
    pub color: f32,
    pub layout: f32,
    pub edges: f32,
    pub shape: f32,
    pub texture: f32,
}

impl FeatureScores {
    /// Score of a single feature
    pub fn get(&self, kind: FeatureKind) -> f32 {
        match kind {
            FeatureKind::Keypoints => self.keypoints,
            FeatureKind::Color => self.color,
            FeatureKind::Layout => self.layout,
            FeatureKind::Edges => self.edges,
            FeatureKind::Shape => self.shape,
            FeatureKind::Texture => self.texture,
        }
    }
}

/// Fused visual similarity of two feature sets
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct VisualScore {
    /// Fused score (0.0 - 1.0)
    pub score: f32,
    /// How much signal backed the score (0.0 - 1.0)
    pub confidence: f32,
    /// Per-feature breakdown
    pub features: FeatureScores,
}

/// Applies the per-feature metric and fuses the results
#[derive(Debug, Clone)]
pub struct VisualSimilarityScorer {
    config: VisualConfig,
}

impl VisualSimilarityScorer {
    /// Create a scorer with the given weights
    pub fn new(config: VisualConfig) -> Self {
        Self { config }
    }

    /// Compare two feature sets
    ///
    /// Each feature's weight is scaled by the lower of the two extractor
    /// confidences and the weights are renormalized, so a feature neither
    /// side could measure drops out instead of pulling the score down.
    pub fn compare(&self, a: &FeatureSet, b: &FeatureSet) -> VisualScore {
        let features = FeatureScores {
            keypoints: keypoint_similarity(
                &a.keypoints.value,
                &b.keypoints.value,
                self.config.max_descriptor_distance,
            ),
            color: histogram_intersection(&a.color.value, &b.color.value),
            layout: cosine_similarity(&a.layout.value, &b.layout.value),
            edges: cosine_similarity(&a.edges.value, &b.edges.value),
            shape: shape_similarity(&a.shape.value, &b.shape.value),
            texture: chi_squared_similarity(&a.texture.value, &b.texture.value),
        };

        let mut weighted = 0.0f32;
        let mut effective = 0.0f32;
        let mut nominal = 0.0f32;
        let mut agreeing = 0usize;

        for kind in FeatureKind::ALL {
            let weight = self.weight(kind);
            let confidence = a.confidence(kind).min(b.confidence(kind));
            let score = features.get(kind);

            weighted += weight * confidence * score;
            effective += weight * confidence;
            nominal += weight;

            if score >= self.config.agreement_threshold && confidence >= AGREEMENT_MIN_CONFIDENCE {
                agreeing += 1;
            }
        }

        if effective <= f32::EPSILON {
            return VisualScore {
                score: 0.0,
                confidence: 0.0,
                features,
            };
        }

        let mut score = weighted / effective;
        if agreeing >= 2 {
            score += self.config.agreement_bonus;
        }

        VisualScore {
            score: score.clamp(0.0, 1.0),
            confidence: (effective / nominal.max(f32::EPSILON)).clamp(0.0, 1.0),
            features,
        }
    }

    fn weight(&self, kind: FeatureKind) -> f32 {
        let w = &self.config.weights;
        let weight = match kind {
            FeatureKind::Keypoints => w.keypoints,
            FeatureKind::Color => w.color,
            FeatureKind::Layout => w.layout,
            FeatureKind::Edges => w.edges,
            FeatureKind::Shape => w.shape,
            FeatureKind::Texture => w.texture,
        };
        weight.max(0.0)
    }
}

impl Default for VisualSimilarityScorer {
    fn default() -> Self {
        Self::new(VisualConfig::default())
    }
}
