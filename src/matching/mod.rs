//! Match Orchestration
//!
//! Scores a query against every entry of a catalog snapshot, fuses the
//! text, phonetic, alias and visual signals into one confidence per entry,
//! and ranks the result. Scoring is sharded over scoped worker threads;
//! the snapshot is immutable, so no locks are taken while matching.

mod fusion;
mod query;
mod result;

pub use query::{MatchQuery, OcrReading};
pub use result::{MatchCandidate, MatchIssue, MatchResult, SignalMode, SignalScores};

use crossbeam_channel::unbounded;
use std::cmp::Ordering;
use std::thread;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::catalog::CatalogSnapshot;
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::recovery::DamagedTextRecoverer;
use crate::text::{normalize_text, PhoneticMatcher, TextSimilarityScorer};
use crate::vision::{FeatureSet, QueryImage, VisualFeatureExtractor, VisualSimilarityScorer};
use fusion::{PreparedQuery, TextVariant};

/// Smallest shard worth handing to its own thread
const MIN_SHARD_SIZE: usize = 32;

/// Fuses every signal into a ranked [`MatchResult`]
pub struct MatchOrchestrator {
    config: EngineConfig,
    scorer: TextSimilarityScorer,
    phonetic: PhoneticMatcher,
    visual: VisualSimilarityScorer,
    extractor: VisualFeatureExtractor,
    recoverer: DamagedTextRecoverer,
}

impl MatchOrchestrator {
    /// Create an orchestrator with the given settings
    pub fn new(config: EngineConfig) -> Self {
        Self {
            scorer: TextSimilarityScorer::new(config.text.clone()),
            phonetic: PhoneticMatcher::new(config.phonetic.code_length),
            visual: VisualSimilarityScorer::new(config.visual.clone()),
            extractor: VisualFeatureExtractor::new(config.visual.clone()),
            recoverer: DamagedTextRecoverer::new(config.recovery.clone(), config.text.clone()),
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Extract query image features with this orchestrator's settings
    pub fn extract_features(&self, image: &QueryImage) -> FeatureSet {
        self.extractor.extract(image)
    }

    /// Cancellable variant of [`MatchOrchestrator::extract_features`]
    pub fn extract_features_cancellable(
        &self,
        image: &QueryImage,
        cancel: &CancellationToken,
    ) -> Result<FeatureSet, EngineError> {
        self.extractor.extract_cancellable(image, cancel)
    }

    /// Match a query against a catalog snapshot
    pub fn match_query(&self, snapshot: &CatalogSnapshot, query: &MatchQuery) -> MatchResult {
        // Without a token nothing can cancel
        self.run(snapshot, query, None).unwrap_or_default()
    }

    /// Match a query, discarding all work once `cancel` fires
    pub fn match_query_cancellable(
        &self,
        snapshot: &CatalogSnapshot,
        query: &MatchQuery,
        cancel: &CancellationToken,
    ) -> Result<MatchResult, EngineError> {
        self.run(snapshot, query, Some(cancel))
    }

    fn run(
        &self,
        snapshot: &CatalogSnapshot,
        query: &MatchQuery,
        cancel: Option<&CancellationToken>,
    ) -> Result<MatchResult, EngineError> {
        let start = Instant::now();
        check(cancel)?;

        let mut issues = Vec::new();
        if query.is_empty() {
            issues.push(MatchIssue::EmptyInput);
        }
        if snapshot.is_empty() {
            issues.push(MatchIssue::EmptyCatalog);
        }
        if !issues.is_empty() {
            debug!("Nothing to match: {:?}", issues);
            return Ok(MatchResult::empty(issues));
        }

        let prepared = self.prepare(snapshot, query);
        if let Some(issue) = self.quality_issue(query) {
            issues.push(issue);
        }
        check(cancel)?;

        let mut candidates = self.score_all(snapshot, &prepared, cancel)?;
        candidates.sort_by(rank_order);
        for (i, candidate) in candidates.iter_mut().enumerate() {
            candidate.rank = i + 1;
        }

        let result = self.select(candidates, issues);
        debug!(
            "Matched {} text variants against {} entries in {:?} (accepted: {:?})",
            prepared.variants.len(),
            snapshot.len(),
            start.elapsed(),
            result.accepted.as_ref().map(|c| c.entry_id.as_str())
        );
        Ok(result)
    }

    /// Build the text variants once per query
    ///
    /// The raw reading counts fully; reconstructions count with their
    /// recovery confidence. Each is also tried after alias resolution.
    fn prepare<'a>(&self, snapshot: &CatalogSnapshot, query: &'a MatchQuery) -> PreparedQuery<'a> {
        let mut variants: Vec<TextVariant> = Vec::new();
        let mut text_confidence = 0.0;

        if let Some(reading) = query.reading.as_ref().filter(|_| query.has_text()) {
            text_confidence = reading.signal_confidence();

            let raw = normalize_text(&reading.text);
            let recovered = match &query.recovered {
                Some(candidates) => candidates.clone(),
                None => self.recoverer.recover(&reading.text, snapshot.lexicon()),
            };

            let readings = std::iter::once((raw, 1.0))
                .chain(recovered.into_iter().map(|c| (c.text, c.confidence)));
            for (text, weight) in readings {
                let resolution = snapshot.aliases().resolve(&text);
                if resolution.changed {
                    add_variant(&mut variants, resolution.text, weight, true);
                }
                add_variant(&mut variants, text, weight, false);
            }
        }

        PreparedQuery {
            variants,
            text_confidence,
            features: query.features.as_ref(),
        }
    }

    fn quality_issue(&self, query: &MatchQuery) -> Option<MatchIssue> {
        let floor = self.config.fusion.low_quality_floor;
        let text_confidence = query
            .reading
            .as_ref()
            .filter(|_| query.has_text())
            .map(|r| r.signal_confidence())
            .filter(|c| *c < floor);
        let weak_features = query
            .features
            .as_ref()
            .map(|f| f.low_confidence(floor))
            .unwrap_or_default();

        if text_confidence.is_none() && weak_features.is_empty() {
            return None;
        }
        debug!(
            "Low quality input: text {:?}, weak features {:?}",
            text_confidence, weak_features
        );
        Some(MatchIssue::LowQualityInput {
            text_confidence,
            weak_features,
        })
    }

    /// Score every entry, sharded across workers
    fn score_all(
        &self,
        snapshot: &CatalogSnapshot,
        query: &PreparedQuery<'_>,
        cancel: Option<&CancellationToken>,
    ) -> Result<Vec<MatchCandidate>, EngineError> {
        let entries = snapshot.entries();
        let names = snapshot.normalized_names();
        let workers = self
            .config
            .worker_count()
            .min(entries.len().div_ceil(MIN_SHARD_SIZE))
            .max(1);

        if workers == 1 {
            let mut candidates = Vec::with_capacity(entries.len());
            for (entry, name) in entries.iter().zip(names) {
                check(cancel)?;
                candidates.extend(self.score_entry(entry, name, query));
            }
            return Ok(candidates);
        }

        let shard = entries.len().div_ceil(workers);
        let (tx, rx) = unbounded();

        thread::scope(|scope| {
            for (entries, names) in entries.chunks(shard).zip(names.chunks(shard)) {
                let tx = tx.clone();
                scope.spawn(move || {
                    for (entry, name) in entries.iter().zip(names) {
                        if let Err(e) = check(cancel) {
                            let _ = tx.send(Err(e));
                            return;
                        }
                        if let Some(candidate) = self.score_entry(entry, name, query) {
                            let _ = tx.send(Ok(candidate));
                        }
                    }
                });
            }
        });
        drop(tx);

        debug!("Scored {} entries on {} workers", entries.len(), workers);
        rx.into_iter().collect()
    }

    /// Split a ranked list into the accepted match and its alternates
    fn select(&self, candidates: Vec<MatchCandidate>, mut issues: Vec<MatchIssue>) -> MatchResult {
        let fusion = &self.config.fusion;
        let mut ranked = candidates.into_iter();

        let mut accepted = None;
        let mut pending = Vec::new();
        if let Some(top) = ranked.next() {
            if top.confidence >= fusion.threshold_for(&top.category) {
                accepted = Some(top);
            } else {
                pending.push(top);
            }
        }
        pending.extend(ranked);

        if let (Some(top), Some(runner_up)) = (&accepted, pending.first()) {
            let delta = top.confidence - runner_up.confidence;
            if delta <= fusion.ambiguity_delta {
                issues.push(MatchIssue::AmbiguousMatch {
                    runner_up: runner_up.entry_id.clone(),
                    delta,
                });
            }
        }

        let alternates = pending
            .into_iter()
            .filter(|c| c.confidence >= fusion.min_alternate_confidence)
            .take(fusion.max_alternates)
            .collect();

        MatchResult {
            accepted,
            alternates,
            issues,
        }
    }
}

/// Insert a variant, keeping the higher weight for repeated text
fn add_variant(variants: &mut Vec<TextVariant>, text: String, weight: f32, resolved: bool) {
    if text.is_empty() {
        return;
    }
    match variants.iter_mut().find(|v| v.text == text) {
        Some(existing) => {
            existing.weight = existing.weight.max(weight);
            existing.resolved |= resolved;
        }
        None => variants.push(TextVariant {
            text,
            weight,
            resolved,
        }),
    }
}

/// Highest confidence first, then higher visual confidence, then fewer
/// aliases, then entry id
fn rank_order(a: &MatchCandidate, b: &MatchCandidate) -> Ordering {
    b.confidence
        .total_cmp(&a.confidence)
        .then(b.visual_confidence.total_cmp(&a.visual_confidence))
        .then(a.alias_count.cmp(&b.alias_count))
        .then_with(|| a.entry_id.cmp(&b.entry_id))
}

fn check(cancel: Option<&CancellationToken>) -> Result<(), EngineError> {
    match cancel {
        Some(token) if token.is_cancelled() => Err(EngineError::Cancelled),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CatalogEntry, CatalogStore, IngestOptions};
    use crate::vision::test_images;
    use std::sync::Arc;

    fn catalog(config: &EngineConfig) -> Arc<CatalogSnapshot> {
        let store = CatalogStore::new(config);
        store.add_entry(
            CatalogEntry::new("met", "Metformin 500mg", "antidiabetic").with_alias("Glucophage"),
        );
        store.add_entry(
            CatalogEntry::new("ibu", "Ibuprofen 400mg", "analgesic").with_alias("Advil"),
        );
        store.add_entry(
            CatalogEntry::new("amox", "Amoxicillin 250mg", "antibiotic").with_alias("Amoxil"),
        );
        store.add_entry(CatalogEntry::new("oxy", "Oxycodone 5mg", "controlled"));
        store.snapshot()
    }

    fn visual_catalog(config: &EngineConfig) -> Arc<CatalogSnapshot> {
        let store = CatalogStore::new(config);
        store.add_entry(CatalogEntry::new("met", "Metformin 500mg", "antidiabetic"));
        store.add_entry(CatalogEntry::new("amox", "Amoxicillin 250mg", "antibiotic"));
        store
            .ingest_image("met", test_images::package(), &IngestOptions::default())
            .unwrap();
        store
            .ingest_image("amox", test_images::other_package(), &IngestOptions::default())
            .unwrap();
        store.snapshot()
    }

    fn dimmed_features(orchestrator: &MatchOrchestrator) -> FeatureSet {
        let image = QueryImage::new(test_images::dimmed(&test_images::package(), 0.8));
        orchestrator.extract_features(&image)
    }

    #[test]
    fn test_misspelled_brand_resolves_to_generic() {
        let config = EngineConfig::default();
        let snapshot = catalog(&config);
        let orchestrator = MatchOrchestrator::new(config);

        let result = orchestrator.match_query(&snapshot, &MatchQuery::text("Glucofage 500 mg"));
        let accepted = result.accepted.expect("metformin accepted");
        assert_eq!(accepted.entry_id, "met");
        assert!(accepted.confidence >= 0.6);
        assert!(accepted.scores.alias_bonus > 0.0);
        assert_eq!(accepted.rank, 1);
        assert_eq!(accepted.mode, SignalMode::TextOnly);
    }

    #[test]
    fn test_brand_alias_matches() {
        let config = EngineConfig::default();
        let snapshot = catalog(&config);
        let orchestrator = MatchOrchestrator::new(config);

        let result = orchestrator.match_query(&snapshot, &MatchQuery::text("ADVIL"));
        assert_eq!(result.accepted.unwrap().entry_id, "ibu");
    }

    #[test]
    fn test_exact_name_matches() {
        let config = EngineConfig::default();
        let snapshot = catalog(&config);
        let orchestrator = MatchOrchestrator::new(config);

        let result = orchestrator.match_query(&snapshot, &MatchQuery::text("Amoxicillin 250 mg"));
        let accepted = result.accepted.unwrap();
        assert_eq!(accepted.entry_id, "amox");
        assert!((accepted.confidence - 1.0).abs() < 1e-6);
        assert!(result.alternates.iter().all(|c| c.confidence < accepted.confidence));
        assert!(result.alternates.len() <= 5);
    }

    #[test]
    fn test_unknown_text_is_not_accepted() {
        let config = EngineConfig::default();
        let snapshot = catalog(&config);
        let orchestrator = MatchOrchestrator::new(config);

        let result = orchestrator.match_query(&snapshot, &MatchQuery::text("XYZ-unknown-9999"));
        assert!(result.accepted.is_none());
        assert!(result.alternates.iter().all(|c| c.confidence < 0.6));
    }

    #[test]
    fn test_empty_catalog() {
        let config = EngineConfig::default();
        let store = CatalogStore::new(&config);
        let orchestrator = MatchOrchestrator::new(config);

        let result = orchestrator.match_query(&store.snapshot(), &MatchQuery::text("aspirin"));
        assert!(result.accepted.is_none());
        assert!(result.alternates.is_empty());
        assert_eq!(result.issues, vec![MatchIssue::EmptyCatalog]);
    }

    #[test]
    fn test_empty_input() {
        let config = EngineConfig::default();
        let snapshot = catalog(&config);
        let orchestrator = MatchOrchestrator::new(config);

        let result = orchestrator.match_query(&snapshot, &MatchQuery::new());
        assert_eq!(result, MatchResult::empty(vec![MatchIssue::EmptyInput]));

        let result = orchestrator.match_query(&snapshot, &MatchQuery::text(" ... "));
        assert_eq!(result.issues, vec![MatchIssue::EmptyInput]);
    }

    #[test]
    fn test_deterministic_ranking() {
        let config = EngineConfig::default();
        let snapshot = catalog(&config);
        let orchestrator = MatchOrchestrator::new(config);

        let query = MatchQuery::text("ibuprofen");
        let first = orchestrator.match_query(&snapshot, &query);
        let second = orchestrator.match_query(&snapshot, &query);
        assert_eq!(first, second);
    }

    #[test]
    fn test_category_threshold() {
        let query = MatchQuery::text("Oxycodon");

        let config = EngineConfig::default();
        let snapshot = catalog(&config);
        let result = MatchOrchestrator::new(config).match_query(&snapshot, &query);
        assert_eq!(result.accepted.unwrap().entry_id, "oxy");

        let mut strict = EngineConfig::default();
        strict
            .fusion
            .category_thresholds
            .insert("controlled".to_string(), 0.99);
        let snapshot = catalog(&strict);
        let result = MatchOrchestrator::new(strict).match_query(&snapshot, &query);
        assert!(result.accepted.is_none());
        assert_eq!(result.alternates[0].entry_id, "oxy");
        assert_eq!(result.alternates[0].rank, 1);
    }

    #[test]
    fn test_ties_prefer_fewer_aliases() {
        let config = EngineConfig::default();
        let store = CatalogStore::new(&config);
        store.add_entry(
            CatalogEntry::new("a-generic", "Paracetamol 500mg", "analgesic")
                .with_alias("Tylenol")
                .with_alias("Panadol"),
        );
        store.add_entry(CatalogEntry::new("b-specific", "Paracetamol 500mg", "analgesic"));
        let orchestrator = MatchOrchestrator::new(config);

        let query = MatchQuery::text("Paracetamol 500mg");
        let result = orchestrator.match_query(&store.snapshot(), &query);
        assert_eq!(result.accepted.as_ref().unwrap().entry_id, "b-specific");
        assert_eq!(result.alternates[0].entry_id, "a-generic");
        assert!(result.is_ambiguous());
    }

    #[test]
    fn test_visual_only_query() {
        let config = EngineConfig::default();
        let snapshot = visual_catalog(&config);
        let orchestrator = MatchOrchestrator::new(config);

        let query = MatchQuery::new().with_features(dimmed_features(&orchestrator));
        let result = orchestrator.match_query(&snapshot, &query);
        let accepted = result.accepted.unwrap();
        assert_eq!(accepted.entry_id, "met");
        assert_eq!(accepted.mode, SignalMode::VisualOnly);
        assert!(accepted.scores.visual.unwrap() >= 0.85);
        assert!(result.alternates.iter().all(|c| c.confidence < accepted.confidence));
    }

    #[test]
    fn test_text_and_image_fuse() {
        let config = EngineConfig::default();
        let snapshot = visual_catalog(&config);
        let orchestrator = MatchOrchestrator::new(config);

        let query = MatchQuery::text("Metformin").with_features(dimmed_features(&orchestrator));
        let result = orchestrator.match_query(&snapshot, &query);
        let accepted = result.accepted.unwrap();
        assert_eq!(accepted.entry_id, "met");
        assert_eq!(accepted.mode, SignalMode::Fused);
        assert!(accepted.visual_confidence > 0.0);
        assert!(accepted.scores.visual.is_some());
    }

    #[test]
    fn test_low_quality_reading_is_reported() {
        let config = EngineConfig::default();
        let snapshot = catalog(&config);
        let orchestrator = MatchOrchestrator::new(config);

        let reading = OcrReading::new("Metformin 500mg").with_confidence(0.2);
        let result = orchestrator.match_query(&snapshot, &MatchQuery::new().with_reading(reading));

        // An exact name read at 20% confidence is listed but no longer accepted
        assert!(result.accepted.is_none());
        let top = &result.alternates[0];
        assert_eq!(top.entry_id, "met");
        assert_eq!(top.mode, SignalMode::TextOnly);
        assert!((top.scores.text - 1.0).abs() < 1e-6);
        assert!((top.confidence - 0.52).abs() < 1e-4, "{}", top.confidence);
        assert!(result.issues.iter().any(|i| matches!(
            i,
            MatchIssue::LowQualityInput { text_confidence: Some(c), .. } if (*c - 0.2).abs() < 1e-6
        )));
    }

    #[test]
    fn test_visual_only_scaled_by_visual_confidence() {
        let config = EngineConfig::default();
        let snapshot = visual_catalog(&config);
        let orchestrator = MatchOrchestrator::new(config);

        let query = MatchQuery::new().with_features(dimmed_features(&orchestrator));
        let result = orchestrator.match_query(&snapshot, &query);
        let accepted = result.accepted.unwrap();
        let visual = accepted.scores.visual.unwrap();
        let factor = 0.4 + 0.6 * accepted.visual_confidence;
        assert!((accepted.confidence - visual * factor).abs() < 1e-5);
    }

    #[test]
    fn test_nan_ocr_confidence_leaves_visual_match() {
        let config = EngineConfig::default();
        let snapshot = visual_catalog(&config);
        let orchestrator = MatchOrchestrator::new(config);

        let reading = OcrReading::new("Metformin 500mg").with_confidence(f32::NAN);
        let query = MatchQuery::new()
            .with_reading(reading)
            .with_features(dimmed_features(&orchestrator));
        let result = orchestrator.match_query(&snapshot, &query);

        let accepted = result.accepted.expect("visual evidence still accepted");
        assert_eq!(accepted.entry_id, "met");
        assert_eq!(accepted.mode, SignalMode::Fused);
        assert!(accepted.confidence.is_finite());
        assert!(result.issues.iter().any(|i| matches!(
            i,
            MatchIssue::LowQualityInput { text_confidence: Some(c), .. } if *c == 0.0
        )));
    }

    #[test]
    fn test_cancelled_match() {
        let config = EngineConfig::default();
        let snapshot = catalog(&config);
        let orchestrator = MatchOrchestrator::new(config);

        let token = CancellationToken::new();
        token.cancel();
        let query = MatchQuery::text("advil");
        let result = orchestrator.match_query_cancellable(&snapshot, &query, &token);
        assert_eq!(result, Err(EngineError::Cancelled));
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let mut config = EngineConfig::default();
        let store = CatalogStore::new(&config);
        for i in 0..100 {
            store.add_entry(CatalogEntry::new(
                format!("e{:03}", i),
                format!("Compound {} {}mg", i, (i % 7 + 1) * 50),
                "generic",
            ));
        }
        let snapshot = store.snapshot();
        let query = MatchQuery::text("Compound 42 50mg");

        config.workers = 1;
        let sequential = MatchOrchestrator::new(config.clone()).match_query(&snapshot, &query);
        config.workers = 4;
        let parallel = MatchOrchestrator::new(config).match_query(&snapshot, &query);

        assert_eq!(sequential, parallel);
        assert_eq!(sequential.accepted.unwrap().entry_id, "e042");
    }
}
