//! Match inputs

use serde::{Deserialize, Serialize};

use crate::recovery::RecoveryCandidate;
use crate::vision::FeatureSet;

/// Text from an external OCR step with its confidence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrReading {
    pub text: String,
    /// Whole-reading confidence (0.0 - 1.0)
    pub confidence: f32,
    /// Per-token confidences, when the recognizer reports them
    #[serde(default)]
    pub token_confidences: Vec<f32>,
}

impl OcrReading {
    /// A reading with full confidence
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            confidence: 1.0,
            token_confidences: Vec::new(),
        }
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = unit_interval(confidence);
        self
    }

    pub fn with_token_confidences(mut self, confidences: Vec<f32>) -> Self {
        self.token_confidences = confidences;
        self
    }

    /// Confidence used to weight the text signal: the mean token confidence
    /// when available, otherwise the reading confidence
    pub fn signal_confidence(&self) -> f32 {
        if self.token_confidences.is_empty() {
            return unit_interval(self.confidence);
        }
        let total: f32 = self.token_confidences.iter().copied().map(unit_interval).sum();
        total / self.token_confidences.len() as f32
    }
}

/// Clamp a recognizer confidence into [0, 1]; NaN counts as no confidence
pub(crate) fn unit_interval(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// One identification request
#[derive(Debug, Clone, Default)]
pub struct MatchQuery {
    pub reading: Option<OcrReading>,
    /// Pre-computed reconstructions; recovery runs on the reading when unset
    pub recovered: Option<Vec<RecoveryCandidate>>,
    /// Features of the query image
    pub features: Option<FeatureSet>,
}

impl MatchQuery {
    /// An empty query
    pub fn new() -> Self {
        Self::default()
    }

    /// A text-only query with full OCR confidence
    pub fn text(text: impl Into<String>) -> Self {
        Self::new().with_reading(OcrReading::new(text))
    }

    pub fn with_reading(mut self, reading: OcrReading) -> Self {
        self.reading = Some(reading);
        self
    }

    pub fn with_recovered(mut self, candidates: Vec<RecoveryCandidate>) -> Self {
        self.recovered = Some(candidates);
        self
    }

    pub fn with_features(mut self, features: FeatureSet) -> Self {
        self.features = Some(features);
        self
    }

    /// Whether the query carries any readable text
    pub fn has_text(&self) -> bool {
        self.reading
            .as_ref()
            .is_some_and(|r| r.text.chars().any(char::is_alphanumeric))
    }

    /// Neither text nor image
    pub fn is_empty(&self) -> bool {
        !self.has_text() && self.features.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_confidence() {
        assert_eq!(OcrReading::new("x").signal_confidence(), 1.0);
        assert_eq!(OcrReading::new("x").with_confidence(0.4).signal_confidence(), 0.4);
        let reading = OcrReading::new("a b").with_token_confidences(vec![0.2, 0.6]);
        assert!((reading.signal_confidence() - 0.4).abs() < 1e-6);
    }

    #[test]
    fn test_invalid_confidences_are_sanitized() {
        assert_eq!(OcrReading::new("x").with_confidence(f32::NAN).confidence, 0.0);
        assert_eq!(OcrReading::new("x").with_confidence(1.7).signal_confidence(), 1.0);
        assert_eq!(OcrReading::new("x").with_confidence(-0.3).signal_confidence(), 0.0);

        // Public fields bypass the builder
        let mut reading = OcrReading::new("x");
        reading.confidence = f32::NAN;
        assert_eq!(reading.signal_confidence(), 0.0);

        let reading = OcrReading::new("a b").with_token_confidences(vec![f32::NAN, 0.6]);
        assert!((reading.signal_confidence() - 0.3).abs() < 1e-6);
        let reading = OcrReading::new("a b").with_token_confidences(vec![2.0, 0.5]);
        assert!((reading.signal_confidence() - 0.75).abs() < 1e-6);
    }

    #[test]
    fn test_empty_queries() {
        assert!(MatchQuery::new().is_empty());
        assert!(MatchQuery::text("  -- ").is_empty());
        assert!(!MatchQuery::text("aspirin").is_empty());
        assert!(!MatchQuery::new().with_features(FeatureSet::empty(1)).is_empty());
    }
}
