//! Engine Configuration
//!
//! Tunable weights and thresholds stored in TOML format. Every section
//! falls back to its defaults, so a config file only needs to name the
//! values it overrides.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Matching engine settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Worker threads for parallel scoring (0 = available parallelism)
    pub workers: usize,
    /// Text metric settings
    pub text: TextConfig,
    /// Phonetic matching settings
    pub phonetic: PhoneticConfig,
    /// Score fusion and acceptance settings
    pub fusion: FusionConfig,
    /// Visual feature extraction and scoring settings
    pub visual: VisualConfig,
    /// Damaged text recovery settings
    pub recovery: RecoveryConfig,
    /// Catalog ingestion and maintenance settings
    pub catalog: CatalogConfig,
    /// Extra brand -> generic mappings on top of the catalog aliases
    pub aliases: HashMap<String, String>,
}

impl EngineConfig {
    /// Number of scoring workers to use
    pub fn worker_count(&self) -> usize {
        if self.workers > 0 {
            return self.workers;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }
}

/// Weights for combining the three text metrics
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TextConfig {
    /// Weight of token-set overlap
    pub token_weight: f32,
    /// Weight of normalized edit similarity
    pub edit_weight: f32,
    /// Weight of the longest-common-substring partial score
    pub partial_weight: f32,
    /// A full substring containment is worth at most this much on its own
    pub partial_ceiling: f32,
}

impl Default for TextConfig {
    fn default() -> Self {
        Self {
            token_weight: 0.3,
            edit_weight: 0.4,
            partial_weight: 0.3,
            partial_ceiling: 0.85,
        }
    }
}

/// Phonetic code settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PhoneticConfig {
    /// Fixed code length (first letter + digits)
    pub code_length: usize,
    /// Added to the text score on a phonetic hit
    pub bonus: f32,
}

impl Default for PhoneticConfig {
    fn default() -> Self {
        Self {
            code_length: 6,
            bonus: 0.1,
        }
    }
}

/// Fusion weights and acceptance policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    /// Text weight when an image is present
    pub text_weight: f32,
    /// Visual weight when an image is present
    pub visual_weight: f32,
    /// Bonus for an alias resolution that lands on a canonical name
    pub alias_bonus: f32,
    /// Below this pre-bonus score the alias bonus cannot cross the threshold
    pub alias_min_support: f32,
    /// Resolved text must score at least this against a canonical name to count as a match
    pub alias_match_floor: f32,
    /// Default acceptance threshold
    pub default_threshold: f32,
    /// Top two candidates closer than this are flagged ambiguous
    pub ambiguity_delta: f32,
    /// Number of alternates returned (N)
    pub max_alternates: usize,
    /// Candidates below this are never listed as alternates
    pub min_alternate_confidence: f32,
    /// Signal confidence below this is reported as low quality input
    pub low_quality_floor: f32,
    /// Share of a lone signal's score kept when that signal has zero confidence
    pub single_signal_floor: f32,
    /// Per-category acceptance thresholds
    pub category_thresholds: HashMap<String, f32>,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            text_weight: 0.55,
            visual_weight: 0.45,
            alias_bonus: 0.1,
            alias_min_support: 0.5,
            alias_match_floor: 0.8,
            default_threshold: 0.6,
            ambiguity_delta: 0.05,
            max_alternates: 5,
            min_alternate_confidence: 0.05,
            low_quality_floor: 0.35,
            single_signal_floor: 0.4,
            category_thresholds: HashMap::new(),
        }
    }
}

impl FusionConfig {
    /// Acceptance threshold for a catalog category
    pub fn threshold_for(&self, category: &str) -> f32 {
        self.category_thresholds
            .get(category)
            .copied()
            .unwrap_or(self.default_threshold)
    }
}

/// Per-feature weights for the visual score
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VisualWeights {
    pub keypoints: f32,
    pub color: f32,
    pub layout: f32,
    pub edges: f32,
    pub shape: f32,
    pub texture: f32,
}

impl Default for VisualWeights {
    fn default() -> Self {
        Self {
            keypoints: 0.2,
            color: 0.2,
            layout: 0.15,
            edges: 0.15,
            shape: 0.1,
            texture: 0.2,
        }
    }
}

/// Visual extraction and comparison settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VisualConfig {
    /// Two features above this count as strongly agreeing
    pub agreement_threshold: f32,
    /// Bonus added when at least two features strongly agree
    pub agreement_bonus: f32,
    /// Longest side of the working image in pixels
    pub working_size: u32,
    /// Maximum keypoint descriptors kept per image
    pub max_keypoints: usize,
    /// FAST corner intensity threshold
    pub fast_threshold: u8,
    /// Cells per side of the text layout grid
    pub layout_grid: u32,
    /// Descriptor distance at which a keypoint match is worth nothing
    pub max_descriptor_distance: f32,
    /// Per-feature fusion weights
    pub weights: VisualWeights,
}

impl Default for VisualConfig {
    fn default() -> Self {
        Self {
            agreement_threshold: 0.9,
            agreement_bonus: 0.05,
            working_size: 256,
            max_keypoints: 128,
            fast_threshold: 30,
            layout_grid: 8,
            max_descriptor_distance: 0.8,
            weights: VisualWeights::default(),
        }
    }
}

/// Damaged text recovery settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Fragments shorter than this carry too little evidence
    pub min_fragment_len: usize,
    /// Maximum edit distance allowed for near-superstring completion
    pub max_edit_budget: usize,
    /// Maximum OCR-corrected variants per fragment
    pub max_variants: usize,
    /// Maximum candidates returned
    pub max_candidates: usize,
    /// A candidate at or above this ends recovery early
    pub accept_confidence: f32,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            min_fragment_len: 4,
            max_edit_budget: 2,
            max_variants: 8,
            max_candidates: 5,
            accept_confidence: 0.95,
        }
    }
}

/// Weights of the reference image quality score
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityWeights {
    pub resolution: f32,
    pub sharpness: f32,
    pub contrast: f32,
    pub text_coverage: f32,
    pub lighting: f32,
}

impl Default for QualityWeights {
    fn default() -> Self {
        Self {
            resolution: 0.2,
            sharpness: 0.3,
            contrast: 0.2,
            text_coverage: 0.15,
            lighting: 0.15,
        }
    }
}

/// Catalog ingestion and maintenance settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// Visual score at or above which two images of one entry are duplicates
    pub dedup_threshold: f32,
    /// Images below this quality are rejected at ingestion
    pub min_quality: f32,
    /// Pixel count that earns a full resolution score
    pub target_pixels: u32,
    /// Quality score weights
    pub quality_weights: QualityWeights,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            dedup_threshold: 0.9,
            min_quality: 0.4,
            target_pixels: 160 * 160,
            quality_weights: QualityWeights::default(),
        }
    }
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<EngineConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config: {:?}", path))?;
    let config: EngineConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config: {:?}", path))?;
    Ok(config)
}

/// Save configuration to file
pub fn save_config(config: &EngineConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}

/// Default config file location in the platform config directory
pub fn default_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("com", "rxmatch", "RxMatch")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_engine_config() {
        let config = EngineConfig::default();

        assert!((config.fusion.default_threshold - 0.6).abs() < 0.001);
        assert_eq!(config.fusion.max_alternates, 5);
        assert!((config.catalog.dedup_threshold - 0.9).abs() < 0.001);
        assert_eq!(config.recovery.min_fragment_len, 4);

        let w = &config.visual.weights;
        let total = w.keypoints + w.color + w.layout + w.edges + w.shape + w.texture;
        assert!((total - 1.0).abs() < 0.001);
    }

    #[test]
    fn test_category_threshold_fallback() {
        let mut fusion = FusionConfig::default();
        fusion.category_thresholds.insert("controlled".to_string(), 0.8);

        assert!((fusion.threshold_for("controlled") - 0.8).abs() < 0.001);
        assert!((fusion.threshold_for("otc") - 0.6).abs() < 0.001);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let parsed: EngineConfig = toml::from_str(
            r#"
            workers = 2

            [fusion]
            default_threshold = 0.7

            [fusion.category_thresholds]
            controlled = 0.85
            "#,
        )
        .unwrap();

        assert_eq!(parsed.workers, 2);
        assert_eq!(parsed.worker_count(), 2);
        assert!((parsed.fusion.default_threshold - 0.7).abs() < 0.001);
        assert!((parsed.fusion.alias_bonus - 0.1).abs() < 0.001);
        assert!((parsed.fusion.threshold_for("controlled") - 0.85).abs() < 0.001);
        assert_eq!(parsed.visual.layout_grid, 8);
    }

    #[test]
    fn test_save_and_load_config() {
        let mut config = EngineConfig::default();
        config.aliases.insert("panadol".to_string(), "paracetamol".to_string());
        config.visual.max_keypoints = 64;

        let temp_file = NamedTempFile::new().unwrap();
        save_config(&config, temp_file.path()).unwrap();
        let loaded = load_config(temp_file.path()).unwrap();

        assert_eq!(loaded.visual.max_keypoints, 64);
        assert_eq!(loaded.aliases.get("panadol").map(String::as_str), Some("paracetamol"));
    }

    #[test]
    fn test_load_config_file_not_found() {
        let result = load_config(Path::new("/nonexistent/path/config.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn test_load_config_invalid_toml() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, "this is not valid toml {{{{").unwrap();

        let result = load_config(temp_file.path());
        assert!(result.is_err());
    }
}
