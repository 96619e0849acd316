//! String similarity metrics
//!
//! Three independent, symmetric metrics over normalized strings. Each one
//! returns 0.0 when either side is empty and 1.0 for identical input.

use serde::Serialize;
use std::collections::HashSet;

use crate::config::TextConfig;

/// Independent text metrics for one pair of strings
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct TextScores {
    /// Shared tokens over the union of tokens
    pub token_set: f32,
    /// `1 - editDistance / max(len)`
    pub edit: f32,
    /// Longest-common-substring containment score
    pub partial: f32,
}

/// Computes and combines the text metrics
#[derive(Debug, Clone)]
pub struct TextSimilarityScorer {
    config: TextConfig,
}

impl TextSimilarityScorer {
    /// Create a scorer with the given metric weights
    pub fn new(config: TextConfig) -> Self {
        Self { config }
    }

    /// Compute all three metrics
    pub fn score(&self, a: &str, b: &str) -> TextScores {
        TextScores {
            token_set: token_set_overlap(a, b),
            edit: edit_similarity(a, b),
            partial: partial_similarity(a, b),
        }
    }

    /// Combine metrics into one text score
    ///
    /// The weighted mean is floored by the partial score times
    /// `partial_ceiling`, so a name contained in the other side (dosage
    /// suffix missing, for example) is not dragged down by the length gap.
    pub fn combine(&self, scores: &TextScores) -> f32 {
        let c = &self.config;
        let total = c.token_weight + c.edit_weight + c.partial_weight;
        if total <= 0.0 {
            return 0.0;
        }

        let weighted = (c.token_weight * scores.token_set
            + c.edit_weight * scores.edit
            + c.partial_weight * scores.partial)
            / total;

        weighted
            .max(scores.partial * c.partial_ceiling)
            .clamp(0.0, 1.0)
    }

    /// Combined similarity of two strings
    pub fn similarity(&self, a: &str, b: &str) -> f32 {
        if a.is_empty() || b.is_empty() {
            return 0.0;
        }
        if a == b {
            return 1.0;
        }
        self.combine(&self.score(a, b))
    }
}

impl Default for TextSimilarityScorer {
    fn default() -> Self {
        Self::new(TextConfig::default())
    }
}

/// Ratio of shared tokens to the union of tokens
pub fn token_set_overlap(a: &str, b: &str) -> f32 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    if a == b {
        return 1.0;
    }

    let ta: HashSet<&str> = a.split_whitespace().collect();
    let tb: HashSet<&str> = b.split_whitespace().collect();
    let union = ta.union(&tb).count();
    if union == 0 {
        return 0.0;
    }

    ta.intersection(&tb).count() as f32 / union as f32
}

/// Normalized Levenshtein similarity
pub fn edit_similarity(a: &str, b: &str) -> f32 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    if a == b {
        return 1.0;
    }

    let max_len = a.chars().count().max(b.chars().count()) as f32;
    let distance = strsim::levenshtein(a, b) as f32;

    (1.0 - distance / max_len).clamp(0.0, 1.0)
}

/// Containment score based on the longest common substring
///
/// `lcs / shorter_len`, scaled down when the shorter string covers less
/// than half of the longer one so that tiny fragments do not count as
/// containment.
pub fn partial_similarity(a: &str, b: &str) -> f32 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    if a == b {
        return 1.0;
    }

    let len_a = a.chars().count();
    let len_b = b.chars().count();
    let shorter = len_a.min(len_b) as f32;
    let longer = len_a.max(len_b) as f32;

    let lcs = longest_common_substring(a, b) as f32;
    let coverage = (2.0 * shorter / longer).min(1.0);

    (lcs / shorter * coverage).clamp(0.0, 1.0)
}

/// Length in chars of the longest common substring
pub fn longest_common_substring(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() || b.is_empty() {
        return 0;
    }

    let mut prev = vec![0usize; b.len() + 1];
    let mut curr = vec![0usize; b.len() + 1];
    let mut best = 0;

    for &ca in &a {
        for (j, &cb) in b.iter().enumerate() {
            curr[j + 1] = if ca == cb { prev[j] + 1 } else { 0 };
            best = best.max(curr[j + 1]);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    best
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLES: &[&str] = &[
        "metformin 500 mg",
        "glucophage",
        "glucofage 500 mg",
        "xyz unknown 9999",
        "amoxicillin",
        "a",
        "lisinopril 10 mg",
    ];

    #[test]
    fn test_identity() {
        let scorer = TextSimilarityScorer::default();
        for s in SAMPLES {
            let scores = scorer.score(s, s);
            assert_eq!(scores.token_set, 1.0);
            assert_eq!(scores.edit, 1.0);
            assert_eq!(scores.partial, 1.0);
            assert_eq!(scorer.similarity(s, s), 1.0);
        }
    }

    #[test]
    fn test_symmetry() {
        let scorer = TextSimilarityScorer::default();
        for a in SAMPLES {
            for b in SAMPLES {
                assert_eq!(scorer.score(a, b), scorer.score(b, a), "{} / {}", a, b);
                assert_eq!(scorer.similarity(a, b), scorer.similarity(b, a));
            }
        }
    }

    #[test]
    fn test_empty_input_scores_zero() {
        let scorer = TextSimilarityScorer::default();
        assert_eq!(scorer.score("", "metformin"), TextScores::default());
        assert_eq!(scorer.score("metformin", ""), TextScores::default());
        assert_eq!(scorer.score("", ""), TextScores::default());
        assert_eq!(scorer.similarity("", ""), 0.0);
    }

    #[test]
    fn test_token_set_overlap() {
        assert!((token_set_overlap("metformin 500 mg", "metformin 850 mg") - 0.5).abs() < 0.001);
        assert_eq!(token_set_overlap("aspirin", "ibuprofen"), 0.0);
        assert_eq!(token_set_overlap("500 mg metformin", "metformin 500 mg"), 1.0);
    }

    #[test]
    fn test_edit_similarity() {
        assert!((edit_similarity("hello", "hallo") - 0.8).abs() < 0.001);
        assert!((edit_similarity("glucofage", "glucophage") - 0.8).abs() < 0.001);
        assert!(edit_similarity("abc", "xyz") < 0.001);
    }

    #[test]
    fn test_partial_containment() {
        // Dosage suffix missing, base name intact
        assert!((partial_similarity("metformin", "metformin 500 mg") - 1.0).abs() < 0.001);
        // Tiny fragment does not count as containment
        assert!(partial_similarity("met", "metformin 500 mg") < 0.5);
        assert_eq!(longest_common_substring("glucofage", "glucophage"), 5);
    }

    #[test]
    fn test_combined_prefers_base_name_match() {
        let scorer = TextSimilarityScorer::default();
        let base = scorer.similarity("metformin", "metformin 500 mg");
        let other = scorer.similarity("metformin", "lisinopril 10 mg");
        assert!(base >= 0.8, "base name should score high, got {}", base);
        assert!(other < 0.4, "unrelated name should score low, got {}", other);
    }
}
