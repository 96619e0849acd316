//! Error types
//!
//! Matching itself never fails on bad data: empty input, empty catalog and
//! ambiguous results are reported on the result as [`crate::MatchIssue`]s.
//! These errors cover cancellation and per-item catalog ingestion.

use thiserror::Error;

use crate::catalog::ImageHandle;

/// Errors from cancellable engine operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// The caller cancelled the computation; partial work was discarded
    #[error("operation cancelled")]
    Cancelled,
}

/// Per-item ingestion failure; never aborts a batch
#[derive(Debug, Error, Clone, PartialEq)]
pub enum IngestError {
    #[error("unknown catalog entry '{0}'")]
    UnknownEntry(String),

    #[error("corrupt image data: {0}")]
    CorruptImage(String),

    #[error("image quality {score:.2} below minimum {minimum:.2}")]
    LowQuality { score: f32, minimum: f32 },

    #[error("reference image {0} not found")]
    UnknownImage(ImageHandle),

    #[error("ingestion cancelled")]
    Cancelled,
}

impl From<EngineError> for IngestError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Cancelled => IngestError::Cancelled,
        }
    }
}

impl From<image::ImageError> for IngestError {
    fn from(err: image::ImageError) -> Self {
        IngestError::CorruptImage(err.to_string())
    }
}
