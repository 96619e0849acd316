//! Visual feature extraction pipeline

use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::edges::extract_edges;
use super::features::FeatureSet;
use super::histogram::{extract_color, extract_texture};
use super::keypoints::extract_keypoints;
use super::layout::extract_layout;
use super::quality::{assess_quality, QualityScore};
use super::shape::extract_shape;
use super::{QueryImage, WorkingImage};
use crate::config::{CatalogConfig, VisualConfig};
use crate::error::EngineError;

/// Bumped whenever an extractor changes output; stored feature sets with an
/// older version are recomputed by catalog optimization
pub const EXTRACTOR_VERSION: u32 = 1;

/// Features plus quality for one image
#[derive(Debug, Clone)]
pub struct ImageAnalysis {
    pub features: FeatureSet,
    pub quality: QualityScore,
}

/// Runs the six extractors over one image
///
/// Every extractor degrades to a low-confidence vector instead of failing,
/// so extraction itself cannot error; only cancellation interrupts it.
#[derive(Debug, Clone)]
pub struct VisualFeatureExtractor {
    config: VisualConfig,
}

impl VisualFeatureExtractor {
    /// Create an extractor with the given settings
    pub fn new(config: VisualConfig) -> Self {
        Self { config }
    }

    /// Get the extractor settings
    pub fn config(&self) -> &VisualConfig {
        &self.config
    }

    /// Extract a feature set
    pub fn extract(&self, image: &QueryImage) -> FeatureSet {
        let work = WorkingImage::prepare(image, self.config.working_size);
        self.run(&work, || Ok(()))
            .unwrap_or_else(|_| FeatureSet::empty(EXTRACTOR_VERSION))
    }

    /// Extract a feature set, giving up as soon as `cancel` fires
    pub fn extract_cancellable(
        &self,
        image: &QueryImage,
        cancel: &CancellationToken,
    ) -> Result<FeatureSet, EngineError> {
        checkpoint(cancel)?;
        let work = WorkingImage::prepare(image, self.config.working_size);
        self.run(&work, || checkpoint(cancel))
    }

    /// Extract features and score image quality in one pass
    pub fn analyze(
        &self,
        image: &QueryImage,
        catalog: &CatalogConfig,
        cancel: Option<&CancellationToken>,
    ) -> Result<ImageAnalysis, EngineError> {
        let check = || cancel.map(checkpoint).unwrap_or(Ok(()));
        check()?;

        let work = WorkingImage::prepare(image, self.config.working_size);
        let features = self.run(&work, check)?;
        let quality = assess_quality(&work, &features.layout, catalog);

        Ok(ImageAnalysis { features, quality })
    }

    fn run<F>(&self, work: &WorkingImage, check: F) -> Result<FeatureSet, EngineError>
    where
        F: Fn() -> Result<(), EngineError>,
    {
        let start = Instant::now();

        let keypoints = extract_keypoints(work, &self.config);
        check()?;
        let color = extract_color(work);
        check()?;
        let layout = extract_layout(work, self.config.layout_grid);
        check()?;
        let edges = extract_edges(work);
        check()?;
        let shape = extract_shape(work);
        check()?;
        let texture = extract_texture(work);

        let features = FeatureSet {
            keypoints,
            color,
            layout,
            edges,
            shape,
            texture,
            extractor_version: EXTRACTOR_VERSION,
        };

        debug!(
            "Feature extraction completed in {:?}: {} keypoints, confidence {:.2}",
            start.elapsed(),
            features.keypoints.value.len(),
            features.overall_confidence()
        );

        Ok(features)
    }
}

impl Default for VisualFeatureExtractor {
    fn default() -> Self {
        Self::new(VisualConfig::default())
    }
}

fn checkpoint(cancel: &CancellationToken) -> Result<(), EngineError> {
    if cancel.is_cancelled() {
        debug!("Feature extraction cancelled");
        return Err(EngineError::Cancelled);
    }
    Ok(())
}
