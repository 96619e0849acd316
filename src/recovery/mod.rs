//! Damaged Text Recovery
//!
//! Rebuilds plausible full names from partial or corrupted OCR readings.
//! A query moves through a fixed sequence of states and stops at the first
//! reconstruction confident enough to accept, or once every corrected
//! variant has been tried. Unrecoverable input ends in an empty ranking.

mod confusion;

use serde::Serialize;
use std::collections::VecDeque;
use tracing::debug;

use crate::config::{RecoveryConfig, TextConfig};
use crate::text::TextSimilarityScorer;
use confusion::{confusion_variants, Variant};

/// Weight of pattern completion in the candidate confidence
const COMPLETION_WEIGHT: f32 = 0.6;
/// Weight of whole-name context similarity in the candidate confidence
const CONTEXT_WEIGHT: f32 = 0.4;

/// How a reconstruction was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryStrategy {
    /// The reading already names a known term
    Verbatim,
    /// A glyph-confusion correction names a known term
    ConfusionCorrection,
    /// The reading is an exact part of a longer known term
    Completion,
    /// The reading is within a small edit budget of part of a known term
    FuzzyCompletion,
}

/// One reconstructed reading
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecoveryCandidate {
    /// Reconstructed normalized text
    pub text: String,
    /// Known term the reconstruction was completed from
    pub matched_name: String,
    pub strategy: RecoveryStrategy,
    /// Confidence (0.0 - 1.0)
    pub confidence: f32,
}

/// A fragment matched against a known term, before context scoring
#[derive(Debug, Clone)]
struct Completion {
    text: String,
    term: String,
    strategy: RecoveryStrategy,
    completion: f32,
}

enum RecoveryState {
    RawInput(String),
    Preprocessed {
        pending: VecDeque<Variant>,
        scored: Vec<RecoveryCandidate>,
    },
    PatternCompleted {
        pending: VecDeque<Variant>,
        scored: Vec<RecoveryCandidate>,
        completions: Vec<Completion>,
    },
    ContextScored {
        pending: VecDeque<Variant>,
        scored: Vec<RecoveryCandidate>,
        accepted: bool,
    },
    Ranked(Vec<RecoveryCandidate>),
}

/// Dictionary completion over the catalog's known names
#[derive(Debug, Clone)]
pub struct DamagedTextRecoverer {
    config: RecoveryConfig,
    scorer: TextSimilarityScorer,
}

impl DamagedTextRecoverer {
    /// Create a recoverer
    pub fn new(config: RecoveryConfig, text: TextConfig) -> Self {
        Self {
            config,
            scorer: TextSimilarityScorer::new(text),
        }
    }

    /// Recover candidates for a raw fragment against normalized known terms
    /// (canonical names and aliases)
    pub fn recover(&self, raw: &str, lexicon: &[String]) -> Vec<RecoveryCandidate> {
        let mut state = RecoveryState::RawInput(raw.to_string());

        loop {
            state = match state {
                RecoveryState::RawInput(raw) => {
                    if lexicon.is_empty() {
                        RecoveryState::Ranked(Vec::new())
                    } else {
                        RecoveryState::Preprocessed {
                            pending: confusion_variants(&raw, self.config.max_variants).into(),
                            scored: Vec::new(),
                        }
                    }
                }
                RecoveryState::Preprocessed { mut pending, scored } => match pending.pop_front() {
                    Some(variant) => RecoveryState::PatternCompleted {
                        completions: self.complete(&variant, lexicon),
                        pending,
                        scored,
                    },
                    None => RecoveryState::Ranked(scored),
                },
                RecoveryState::PatternCompleted {
                    pending,
                    mut scored,
                    completions,
                } => {
                    let before = scored.len();
                    scored.extend(completions.into_iter().map(|c| self.score_context(c)));
                    let accepted = scored[before..]
                        .iter()
                        .any(|c| c.confidence >= self.config.accept_confidence);
                    RecoveryState::ContextScored {
                        pending,
                        scored,
                        accepted,
                    }
                }
                RecoveryState::ContextScored {
                    pending,
                    scored,
                    accepted,
                } => {
                    if accepted || pending.is_empty() {
                        RecoveryState::Ranked(scored)
                    } else {
                        RecoveryState::Preprocessed { pending, scored }
                    }
                }
                RecoveryState::Ranked(scored) => {
                    let ranked = self.rank(scored);
                    debug!(
                        "Recovered {} candidate(s) for '{}'",
                        ranked.len(),
                        raw.trim()
                    );
                    return ranked;
                }
            };
        }
    }

    /// Find known terms that contain (or nearly contain) the variant's fragments
    fn complete(&self, variant: &Variant, lexicon: &[String]) -> Vec<Completion> {
        let tokens: Vec<&str> = variant.text.split(' ').collect();
        let mut completions = Vec::new();

        for term in lexicon {
            if term.is_empty() {
                continue;
            }

            if variant.text == *term {
                completions.push(Completion {
                    text: term.clone(),
                    term: term.clone(),
                    strategy: exact_strategy(variant),
                    completion: 1.0,
                });
                continue;
            }

            // Whole multi-token reading against the whole term
            if tokens.len() > 1 {
                if let Some((completion, distance)) = self.fragment_fit(&variant.text, term) {
                    completions.push(Completion {
                        text: term.clone(),
                        term: term.clone(),
                        strategy: completion_strategy(variant, distance, false),
                        completion,
                    });
                }
            }

            // Each informative token against each term token
            for (idx, token) in tokens.iter().enumerate() {
                if !token.chars().any(char::is_alphabetic) {
                    continue;
                }
                let best = term
                    .split(' ')
                    .filter(|t| t.chars().any(char::is_alphabetic))
                    .filter_map(|t| self.fragment_fit(token, t).map(|fit| (t, fit)))
                    .max_by(|a, b| a.1 .0.total_cmp(&b.1 .0));

                if let Some((term_token, (completion, distance))) = best {
                    let mut rebuilt: Vec<&str> = tokens.clone();
                    rebuilt[idx] = term_token;
                    completions.push(Completion {
                        text: rebuilt.join(" "),
                        term: term.clone(),
                        strategy: completion_strategy(variant, distance, *token == term_token),
                        completion,
                    });
                }
            }
        }

        completions
    }

    /// Completion ratio and edit distance of a fragment inside a target,
    /// when the fragment is informative and within the edit budget
    fn fragment_fit(&self, fragment: &str, target: &str) -> Option<(f32, usize)> {
        let frag_len = fragment.chars().count();
        if frag_len < self.config.min_fragment_len {
            return None;
        }

        let budget = self.config.max_edit_budget.min(frag_len / 4);
        let distance = substring_distance(fragment, target);
        if distance > budget {
            return None;
        }

        let target_len = target.chars().count();
        let completion = (frag_len - distance) as f32 / frag_len.max(target_len) as f32;
        Some((completion.clamp(0.0, 1.0), distance))
    }

    /// Blend completion with similarity of the reconstruction to the full term
    fn score_context(&self, completion: Completion) -> RecoveryCandidate {
        let context = self.scorer.similarity(&completion.text, &completion.term);
        let confidence = COMPLETION_WEIGHT * completion.completion + CONTEXT_WEIGHT * context;
        RecoveryCandidate {
            text: completion.text,
            matched_name: completion.term,
            strategy: completion.strategy,
            confidence: confidence.clamp(0.0, 1.0),
        }
    }

    /// Deduplicate by text and order by confidence
    fn rank(&self, mut scored: Vec<RecoveryCandidate>) -> Vec<RecoveryCandidate> {
        scored.sort_by(|a, b| {
            b.confidence
                .total_cmp(&a.confidence)
                .then_with(|| a.text.cmp(&b.text))
                .then_with(|| a.matched_name.cmp(&b.matched_name))
        });

        let mut ranked: Vec<RecoveryCandidate> = Vec::new();
        for candidate in scored {
            if ranked.iter().any(|c| c.text == candidate.text) {
                continue;
            }
            ranked.push(candidate);
            if ranked.len() >= self.config.max_candidates {
                break;
            }
        }
        ranked
    }
}

impl Default for DamagedTextRecoverer {
    fn default() -> Self {
        Self::new(RecoveryConfig::default(), TextConfig::default())
    }
}

fn exact_strategy(variant: &Variant) -> RecoveryStrategy {
    if variant.corrected {
        RecoveryStrategy::ConfusionCorrection
    } else {
        RecoveryStrategy::Verbatim
    }
}

fn completion_strategy(variant: &Variant, distance: usize, whole: bool) -> RecoveryStrategy {
    match (distance, whole) {
        (0, true) => exact_strategy(variant),
        (0, false) => RecoveryStrategy::Completion,
        _ => RecoveryStrategy::FuzzyCompletion,
    }
}

/// Fewest edits turning `fragment` into any substring of `target`
fn substring_distance(fragment: &str, target: &str) -> usize {
    let f: Vec<char> = fragment.chars().collect();
    let t: Vec<char> = target.chars().collect();
    if f.is_empty() {
        return 0;
    }

    // Rows over the fragment; starting anywhere in the target is free
    let mut prev = vec![0usize; t.len() + 1];
    let mut curr = vec![0usize; t.len() + 1];
    for (i, fc) in f.iter().enumerate() {
        curr[0] = i + 1;
        for (j, tc) in t.iter().enumerate() {
            let substitution = prev[j] + usize::from(fc != tc);
            curr[j + 1] = substitution.min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev.iter().copied().min().unwrap_or(f.len())
}
