//! Match outputs

use serde::Serialize;

use crate::vision::FeatureKind;

/// Which signals produced a candidate's confidence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalMode {
    TextOnly,
    VisualOnly,
    Fused,
}

/// Per-signal sub-scores of a candidate
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct SignalScores {
    /// Best text score over name and aliases, phonetic bonus included
    pub text: f32,
    /// 1.0 when the best text pair also matched phonetically
    pub phonetic: f32,
    /// Bonus actually applied for an alias resolution
    pub alias_bonus: f32,
    /// Best visual score over the entry's reference images
    pub visual: Option<f32>,
}

/// One catalog entry scored against a query
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchCandidate {
    pub entry_id: String,
    pub display_name: String,
    pub category: String,
    pub scores: SignalScores,
    /// Confidence backing the visual score (0.0 when there is none)
    pub visual_confidence: f32,
    /// Fused confidence (0.0 - 1.0)
    pub confidence: f32,
    /// 1-based position in the ranking
    pub rank: usize,
    pub mode: SignalMode,
    /// Query text variant that produced the text score
    pub matched_text: Option<String>,
    #[serde(skip)]
    pub(crate) alias_count: usize,
}

/// Conditions worth surfacing to the caller; none of them is a failure
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MatchIssue {
    /// No text and no image
    EmptyInput,
    /// No catalog entries loaded
    EmptyCatalog,
    /// The runner-up is within the ambiguity delta of the accepted match
    AmbiguousMatch { runner_up: String, delta: f32 },
    /// A signal was weaker than the quality floor and was downweighted
    LowQualityInput {
        text_confidence: Option<f32>,
        weak_features: Vec<FeatureKind>,
    },
}

/// Ranked outcome of one query
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct MatchResult {
    pub accepted: Option<MatchCandidate>,
    pub alternates: Vec<MatchCandidate>,
    pub issues: Vec<MatchIssue>,
}

impl MatchResult {
    /// A result with no candidates
    pub fn empty(issues: Vec<MatchIssue>) -> Self {
        Self {
            accepted: None,
            alternates: Vec::new(),
            issues,
        }
    }

    /// Whether the caller should confirm the accepted match
    pub fn is_ambiguous(&self) -> bool {
        self.issues
            .iter()
            .any(|i| matches!(i, MatchIssue::AmbiguousMatch { .. }))
    }

    /// Accepted match followed by alternates
    pub fn candidates(&self) -> impl Iterator<Item = &MatchCandidate> {
        self.accepted.iter().chain(self.alternates.iter())
    }
}
