//! Per-entry signal scoring and fusion

use super::query::unit_interval;
use super::result::{MatchCandidate, SignalMode, SignalScores};
use super::MatchOrchestrator;
use crate::catalog::CatalogEntry;
use crate::config::FusionConfig;
use crate::vision::{FeatureSet, VisualScore};

/// Headroom kept below the acceptance threshold for bonus-only lifts
const ALIAS_CAP_MARGIN: f32 = 0.01;

/// One reading of the query text
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct TextVariant {
    pub text: String,
    /// 1.0 for the reading itself, the recovery confidence for reconstructions
    pub weight: f32,
    /// Produced by alias resolution
    pub resolved: bool,
}

/// Query signals prepared once and shared by every entry
#[derive(Debug)]
pub(crate) struct PreparedQuery<'a> {
    pub variants: Vec<TextVariant>,
    pub text_confidence: f32,
    pub features: Option<&'a FeatureSet>,
}

#[derive(Debug, Default)]
struct TextEvidence {
    score: f32,
    phonetic: bool,
    alias_hit: bool,
    matched: Option<usize>,
}

impl MatchOrchestrator {
    /// Score one entry; `None` when no signal applies to it
    pub(crate) fn score_entry(
        &self,
        entry: &CatalogEntry,
        name: &str,
        query: &PreparedQuery<'_>,
    ) -> Option<MatchCandidate> {
        let has_text = !query.variants.is_empty();
        let text = has_text.then(|| self.text_evidence(entry, name, query));
        let visual = query.features.and_then(|f| self.best_visual(entry, f));

        let fusion = &self.config.fusion;
        let (mode, base) = match (&text, &visual) {
            (Some(t), Some(v)) => (
                SignalMode::Fused,
                fuse(fusion, t.score, query.text_confidence, v),
            ),
            (Some(t), None) => (
                SignalMode::TextOnly,
                discount(fusion, t.score, query.text_confidence),
            ),
            (None, Some(v)) => (
                SignalMode::VisualOnly,
                discount(fusion, v.score, v.confidence),
            ),
            (None, None) => return None,
        };

        let alias_hit = text.as_ref().is_some_and(|t| t.alias_hit);
        let confidence = if alias_hit {
            apply_alias_bonus(fusion, base, fusion.threshold_for(&entry.category))
        } else {
            base
        };

        let evidence = text.unwrap_or_default();
        Some(MatchCandidate {
            entry_id: entry.id.clone(),
            display_name: entry.name.clone(),
            category: entry.category.clone(),
            scores: SignalScores {
                text: evidence.score,
                phonetic: if evidence.phonetic { 1.0 } else { 0.0 },
                alias_bonus: confidence - base,
                visual: visual.map(|v| v.score),
            },
            visual_confidence: visual.map(|v| v.confidence).unwrap_or(0.0),
            confidence: confidence.clamp(0.0, 1.0),
            rank: 0,
            mode,
            matched_text: evidence.matched.map(|i| query.variants[i].text.clone()),
            alias_count: entry.aliases().len(),
        })
    }

    /// Best weighted text score over the entry's name and aliases
    fn text_evidence(
        &self,
        entry: &CatalogEntry,
        name: &str,
        query: &PreparedQuery<'_>,
    ) -> TextEvidence {
        let bonus = self.config.phonetic.bonus;
        let floor = self.config.fusion.alias_match_floor;
        let mut best = TextEvidence::default();

        for (idx, variant) in query.variants.iter().enumerate() {
            if variant.resolved && self.scorer.similarity(&variant.text, name) >= floor {
                best.alias_hit = true;
            }

            let terms = std::iter::once(name).chain(entry.aliases().iter().map(String::as_str));
            for term in terms {
                let literal = self.scorer.similarity(&variant.text, term);
                let phonetic = self.phonetic.matches(&variant.text, term);
                let text = if phonetic {
                    (literal + bonus).min(1.0)
                } else {
                    literal
                };

                let score = text * variant.weight.clamp(0.0, 1.0);
                if score > best.score {
                    best.score = score;
                    best.phonetic = phonetic;
                    best.matched = Some(idx);
                }
            }
        }

        best
    }

    /// Best visual score over the entry's reference images
    fn best_visual(&self, entry: &CatalogEntry, features: &FeatureSet) -> Option<VisualScore> {
        entry
            .images()
            .iter()
            .map(|img| self.visual.compare(features, &img.features))
            .max_by(|a, b| {
                a.score
                    .total_cmp(&b.score)
                    .then(a.confidence.total_cmp(&b.confidence))
            })
    }
}

/// Weighted mean of text and visual scores, each weight scaled by the
/// confidence of its signal
fn fuse(config: &FusionConfig, text: f32, text_confidence: f32, visual: &VisualScore) -> f32 {
    let wt = config.text_weight.max(0.0) * unit_interval(text_confidence);
    let wv = config.visual_weight.max(0.0) * unit_interval(visual.confidence);
    if wt + wv <= f32::EPSILON {
        return 0.0;
    }
    ((wt * text + wv * visual.score) / (wt + wv)).clamp(0.0, 1.0)
}

/// Scale a lone signal by its confidence; at zero confidence only
/// `single_signal_floor` of the score survives
fn discount(config: &FusionConfig, score: f32, confidence: f32) -> f32 {
    let floor = config.single_signal_floor.clamp(0.0, 1.0);
    score * (floor + (1.0 - floor) * unit_interval(confidence))
}

/// Add the alias bonus; below the support floor it cannot reach `threshold`
fn apply_alias_bonus(config: &FusionConfig, base: f32, threshold: f32) -> f32 {
    let lifted = (base + config.alias_bonus.max(0.0)).min(1.0);
    if base >= config.alias_min_support {
        return lifted;
    }
    lifted.min(threshold - ALIAS_CAP_MARGIN).max(base)
}
