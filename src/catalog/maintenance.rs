//! Reference image ingestion, deduplication and optimization

use image::RgbImage;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{
    content_hash, CaptureMetadata, CatalogDraft, CatalogStore, ImageHandle, ReferenceImage,
};
use crate::error::IngestError;
use crate::vision::{ImageAnalysis, QueryImage, EXTRACTOR_VERSION};

/// Per-image ingestion settings
#[derive(Debug, Clone, Default)]
pub struct IngestOptions {
    /// Store even if a near-duplicate exists; the image is pinned
    pub allow_duplicate: bool,
    pub metadata: CaptureMetadata,
    /// Abandons feature extraction when cancelled
    pub cancel: Option<CancellationToken>,
}

/// What happened to an ingested image
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum IngestOutcome {
    Stored {
        handle: ImageHandle,
    },
    /// Stored in place of a lower-quality near-duplicate
    Replaced {
        handle: ImageHandle,
        replaced: ImageHandle,
    },
    /// A near-duplicate of equal or higher quality already exists
    DuplicateRejected {
        existing: ImageHandle,
        similarity: f32,
    },
}

/// One encoded image for batch ingestion
#[derive(Debug, Clone)]
pub struct IngestItem {
    pub entry_id: String,
    /// Encoded image bytes (PNG, JPEG, ...)
    pub data: Vec<u8>,
    pub options: IngestOptions,
}

/// A batch item that could not be ingested
#[derive(Debug, Clone, Serialize)]
pub struct IngestFailure {
    pub index: usize,
    pub entry_id: String,
    pub message: String,
    #[serde(skip)]
    pub error: IngestError,
}

/// Summary of a batch ingestion
#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestReport {
    pub stored: usize,
    pub replaced: usize,
    pub duplicates_rejected: usize,
    pub failures: Vec<IngestFailure>,
}

impl IngestReport {
    /// Count one item's result
    pub fn record(
        &mut self,
        index: usize,
        entry_id: &str,
        result: Result<IngestOutcome, IngestError>,
    ) {
        match result {
            Ok(IngestOutcome::Stored { .. }) => self.stored += 1,
            Ok(IngestOutcome::Replaced { .. }) => self.replaced += 1,
            Ok(IngestOutcome::DuplicateRejected { .. }) => self.duplicates_rejected += 1,
            Err(error) => {
                warn!("Failed to ingest image {} for '{}': {}", index, entry_id, error);
                self.failures.push(IngestFailure {
                    index,
                    entry_id: entry_id.to_string(),
                    message: error.to_string(),
                    error,
                });
            }
        }
    }
}

/// Summary of an optimization pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OptimizationReport {
    /// Feature sets re-extracted after an extractor version change
    pub features_recomputed: usize,
    /// Reference images dropped because their raw buffer was missing
    pub unreadable_removed: usize,
    /// Raw buffers no reference image pointed at
    pub orphans_removed: usize,
    /// Near-duplicate images removed in favor of a better copy
    pub duplicates_pruned: usize,
    /// Entries whose image lists were rewritten
    pub entries_compacted: usize,
}

impl OptimizationReport {
    fn changed(&self) -> bool {
        self.features_recomputed
            + self.unreadable_removed
            + self.orphans_removed
            + self.duplicates_pruned
            > 0
    }
}

/// A decoded image waiting for ingestion
pub(super) struct PendingImage {
    pub entry_id: String,
    pub image: Result<RgbImage, IngestError>,
    pub options: IngestOptions,
}

/// An image analyzed outside the writer lock, ready to commit
struct PreparedImage {
    image: RgbImage,
    hash: String,
    analysis: ImageAnalysis,
}

enum Staged {
    /// Byte-identical to a stored image; nothing was analyzed
    Duplicate(IngestOutcome),
    Ready(PreparedImage),
}

impl CatalogStore {
    /// Ingest a decoded reference image into an entry
    ///
    /// Features and quality are computed before the writer lock is taken;
    /// deduplication and the commit happen under it.
    pub fn ingest_image(
        &self,
        entry_id: &str,
        image: RgbImage,
        options: &IngestOptions,
    ) -> Result<IngestOutcome, IngestError> {
        let prepared = match self.stage(entry_id, image, options)? {
            Staged::Duplicate(outcome) => return Ok(outcome),
            Staged::Ready(prepared) => prepared,
        };

        let _guard = self.writer.lock();
        let mut draft = self.snapshot().draft();
        let outcome = self.commit(&mut draft, entry_id, prepared, options)?;
        if !matches!(outcome, IngestOutcome::DuplicateRejected { .. }) {
            self.publish(draft);
        }
        Ok(outcome)
    }

    /// Decode and ingest an encoded image buffer
    pub fn ingest_encoded(
        &self,
        entry_id: &str,
        data: &[u8],
        options: &IngestOptions,
    ) -> Result<IngestOutcome, IngestError> {
        let image = image::load_from_memory(data)?.to_rgb8();
        self.ingest_image(entry_id, image, options)
    }

    /// Ingest many images under one snapshot publish; failures are reported
    /// per item
    pub fn ingest_batch(&self, items: &[IngestItem]) -> IngestReport {
        let pending = items.iter().map(|item| PendingImage {
            entry_id: item.entry_id.clone(),
            image: image::load_from_memory(&item.data)
                .map(|decoded| decoded.to_rgb8())
                .map_err(IngestError::from),
            options: item.options.clone(),
        });
        let report = self.ingest_pending(pending);

        info!(
            "Batch ingestion: {} stored, {} replaced, {} duplicates, {} failed",
            report.stored,
            report.replaced,
            report.duplicates_rejected,
            report.failures.len()
        );
        report
    }

    /// Analyze every image first, then commit them all to one draft
    pub(super) fn ingest_pending(
        &self,
        items: impl IntoIterator<Item = PendingImage>,
    ) -> IngestReport {
        let mut report = IngestReport::default();
        let mut ready = Vec::new();

        for (index, item) in items.into_iter().enumerate() {
            let PendingImage {
                entry_id,
                image,
                options,
            } = item;
            match image.and_then(|image| self.stage(&entry_id, image, &options)) {
                Ok(Staged::Ready(prepared)) => ready.push((index, entry_id, options, prepared)),
                Ok(Staged::Duplicate(outcome)) => report.record(index, &entry_id, Ok(outcome)),
                Err(error) => report.record(index, &entry_id, Err(error)),
            }
        }

        if !ready.is_empty() {
            let _guard = self.writer.lock();
            let mut draft = self.snapshot().draft();
            let mut changed = false;
            for (index, entry_id, options, prepared) in ready {
                let result = self.commit(&mut draft, &entry_id, prepared, &options);
                changed |= matches!(
                    result,
                    Ok(IngestOutcome::Stored { .. } | IngestOutcome::Replaced { .. })
                );
                report.record(index, &entry_id, result);
            }
            if changed {
                self.publish(draft);
            }
        }

        report.failures.sort_by_key(|f| f.index);
        report
    }

    /// Reject exact copies and analyze the image, without the writer lock
    fn stage(
        &self,
        entry_id: &str,
        image: RgbImage,
        options: &IngestOptions,
    ) -> Result<Staged, IngestError> {
        if image.width() == 0 || image.height() == 0 {
            return Err(IngestError::CorruptImage("image has no pixels".into()));
        }

        let hash = content_hash(&image);
        {
            let snapshot = self.snapshot();
            let entry = snapshot
                .get(entry_id)
                .ok_or_else(|| IngestError::UnknownEntry(entry_id.to_string()))?;
            if !options.allow_duplicate {
                if let Some(existing) = entry.images.iter().find(|img| img.content_hash == hash) {
                    debug!("Exact duplicate of {} rejected for '{}'", existing.handle, entry_id);
                    return Ok(Staged::Duplicate(IngestOutcome::DuplicateRejected {
                        existing: existing.handle,
                        similarity: 1.0,
                    }));
                }
            }
        }

        let start = Instant::now();
        let query = QueryImage::new(image);
        let analysis = self
            .extractor
            .analyze(&query, &self.config, options.cancel.as_ref())?;

        if analysis.quality.overall < self.config.min_quality {
            debug!(
                "Rejected image for '{}': quality {:.2} < {:.2}",
                entry_id, analysis.quality.overall, self.config.min_quality
            );
            return Err(IngestError::LowQuality {
                score: analysis.quality.overall,
                minimum: self.config.min_quality,
            });
        }
        debug!("Analyzed image for '{}' in {:?}", entry_id, start.elapsed());

        Ok(Staged::Ready(PreparedImage {
            image: query.image,
            hash,
            analysis,
        }))
    }

    /// Deduplicate against the draft and store the image in it
    fn commit(
        &self,
        draft: &mut CatalogDraft,
        entry_id: &str,
        prepared: PreparedImage,
        options: &IngestOptions,
    ) -> Result<IngestOutcome, IngestError> {
        if options.cancel.as_ref().is_some_and(|c| c.is_cancelled()) {
            return Err(IngestError::Cancelled);
        }

        let PreparedImage {
            image,
            hash,
            analysis,
        } = prepared;
        let entry = draft.entry_mut(entry_id)?;

        let mut replaced = None;
        if !options.allow_duplicate {
            let nearest = entry
                .images
                .iter()
                .map(|img| {
                    let similarity = if img.content_hash == hash {
                        1.0
                    } else {
                        self.scorer.compare(&img.features, &analysis.features).score
                    };
                    (img, similarity)
                })
                .filter(|(_, similarity)| *similarity >= self.config.dedup_threshold)
                .max_by(|a, b| a.1.total_cmp(&b.1));

            if let Some((existing, similarity)) = nearest {
                if existing.pinned || analysis.quality.overall <= existing.quality.overall {
                    debug!(
                        "Near-duplicate of {} rejected for '{}' (similarity {:.3})",
                        existing.handle, entry_id, similarity
                    );
                    return Ok(IngestOutcome::DuplicateRejected {
                        existing: existing.handle,
                        similarity,
                    });
                }
                replaced = Some(existing.handle);
            }
        }

        if let Some(old) = replaced {
            entry.images.retain(|img| img.handle != old);
        }

        let handle = ImageHandle::generate();
        let quality = analysis.quality.overall;
        entry.images.push(ReferenceImage {
            handle,
            entry_id: entry_id.to_string(),
            features: analysis.features,
            quality: analysis.quality,
            metadata: options.metadata,
            content_hash: hash,
            pinned: options.allow_duplicate,
        });

        if let Some(old) = replaced {
            draft.raw.remove(&old);
        }
        draft.raw.insert(handle, Arc::new(image));
        debug!("Ingested image {} for '{}' (quality {:.2})", handle, entry_id, quality);

        Ok(match replaced {
            Some(replaced) => IngestOutcome::Replaced { handle, replaced },
            None => IngestOutcome::Stored { handle },
        })
    }

    /// Recompute stale features, prune duplicates and drop orphaned buffers
    pub fn optimize(&self) -> OptimizationReport {
        let start = Instant::now();
        let _guard = self.writer.lock();
        let mut draft = self.snapshot().draft();
        let mut report = OptimizationReport::default();

        let ids: Vec<String> = draft.entries.keys().cloned().collect();
        for id in ids {
            let Some(current) = draft.entries.get(&id) else {
                continue;
            };
            let needs_work = current.images.len() > 1
                || current
                    .images
                    .iter()
                    .any(|img| img.features.extractor_version != EXTRACTOR_VERSION);
            if !needs_work {
                continue;
            }

            let mut images = current.images.clone();
            let before = images.len();
            let mut recomputed = 0;

            // Re-extract stale feature sets from the raw pool
            let mut refreshed = Vec::with_capacity(images.len());
            for mut img in images.drain(..) {
                if img.features.extractor_version != EXTRACTOR_VERSION {
                    let Some(raw) = draft.raw.get(&img.handle) else {
                        warn!("Reference image {} of '{}' has no raw data", img.handle, id);
                        report.unreadable_removed += 1;
                        continue;
                    };
                    let query = QueryImage::new(RgbImage::clone(raw));
                    match self.extractor.analyze(&query, &self.config, None) {
                        Ok(analysis) => {
                            img.features = analysis.features;
                            img.quality = analysis.quality;
                            recomputed += 1;
                        }
                        Err(err) => {
                            warn!("Failed to refresh features of {}: {}", img.handle, err);
                            continue;
                        }
                    }
                }
                refreshed.push(img);
            }

            let kept = self.prune_duplicates(&refreshed);
            report.features_recomputed += recomputed;
            report.duplicates_pruned += refreshed.len() - kept.len();
            images = kept;

            if images.len() != before || recomputed > 0 {
                images.shrink_to_fit();
                if let Some(entry) = draft.entries.get_mut(&id) {
                    let entry = Arc::make_mut(entry);
                    if entry.images != images {
                        entry.images = images;
                        report.entries_compacted += 1;
                    }
                }
            }
        }

        let referenced: HashSet<ImageHandle> = draft
            .entries
            .values()
            .flat_map(|e| e.images.iter().map(|img| img.handle))
            .collect();
        let pooled = draft.raw.len();
        draft.raw.retain(|handle, _| referenced.contains(handle));
        draft.raw.shrink_to_fit();
        report.orphans_removed = pooled - draft.raw.len();

        if report.changed() {
            self.publish(draft);
        }

        info!(
            "Catalog optimized in {:?}: {} recomputed, {} duplicates pruned, {} orphans removed",
            start.elapsed(),
            report.features_recomputed,
            report.duplicates_pruned,
            report.orphans_removed
        );
        report
    }

    /// Keep the best copy of each near-duplicate group; pinned images stay
    fn prune_duplicates(&self, images: &[ReferenceImage]) -> Vec<ReferenceImage> {
        let mut order: Vec<usize> = (0..images.len()).collect();
        // Best quality first; ties keep the older image
        order.sort_by(|&a, &b| {
            images[b]
                .quality
                .overall
                .total_cmp(&images[a].quality.overall)
                .then(a.cmp(&b))
        });

        let mut keep = vec![false; images.len()];
        for &i in &order {
            let candidate = &images[i];
            let duplicate = !candidate.pinned
                && (0..images.len()).filter(|&k| keep[k]).any(|k| {
                    let kept = &images[k];
                    kept.content_hash == candidate.content_hash
                        || self.scorer.compare(&kept.features, &candidate.features).score
                            >= self.config.dedup_threshold
                });
            if duplicate {
                debug!("Pruning duplicate reference image {}", candidate.handle);
            } else {
                keep[i] = true;
            }
        }

        images
            .iter()
            .zip(keep)
            .filter(|(_, keep)| *keep)
            .map(|(img, _)| img.clone())
            .collect()
    }
}
