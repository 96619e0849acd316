//! Text Layer
//!
//! Canonicalization and comparison of OCR readings against catalog names.
//! Everything here is a pure function over already-normalized strings,
//! safe to call from any scoring worker.

pub mod alias;
pub mod normalize;
pub mod phonetic;
pub mod similarity;

pub use alias::{AliasResolver, Resolution};
pub use normalize::{normalize_text, TextNormalizer};
pub use phonetic::{PhoneticCode, PhoneticMatcher};
pub use similarity::{TextScores, TextSimilarityScorer};
