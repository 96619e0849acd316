//! RxMatch - fuzzy identity resolution for medication packages
//!
//! Resolves noisy OCR readings and package photos to canonical catalog
//! entries. OCR, capture and detection happen outside this crate; it only
//! consumes their text, confidences and image buffers.

pub mod catalog;
pub mod config;
pub mod error;
pub mod matching;
pub mod recovery;
pub mod text;
pub mod vision;

pub use catalog::{
    load_catalog, save_catalog, CatalogEntry, CatalogSnapshot, CatalogStore, IngestOptions,
    IngestOutcome, IngestReport, OptimizationReport,
};
pub use config::EngineConfig;
pub use error::{EngineError, IngestError};
pub use matching::{
    MatchCandidate, MatchIssue, MatchOrchestrator, MatchQuery, MatchResult, OcrReading, SignalMode,
};
pub use recovery::{DamagedTextRecoverer, RecoveryCandidate, RecoveryStrategy};
pub use vision::{FeatureSet, QueryImage, Region, VisualFeatureExtractor};
