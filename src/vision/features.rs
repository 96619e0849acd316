//! Feature vectors derived from one package image

use serde::{Deserialize, Serialize};

/// The six independent visual signals
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureKind {
    Keypoints,
    Color,
    Layout,
    Edges,
    Shape,
    Texture,
}

impl FeatureKind {
    /// All feature kinds in extraction order
    pub const ALL: [FeatureKind; 6] = [
        FeatureKind::Keypoints,
        FeatureKind::Color,
        FeatureKind::Layout,
        FeatureKind::Edges,
        FeatureKind::Shape,
        FeatureKind::Texture,
    ];

    /// Display name
    pub fn name(&self) -> &'static str {
        match self {
            FeatureKind::Keypoints => "keypoints",
            FeatureKind::Color => "color",
            FeatureKind::Layout => "layout",
            FeatureKind::Edges => "edges",
            FeatureKind::Shape => "shape",
            FeatureKind::Texture => "texture",
        }
    }
}

/// A feature value with the extractor's confidence in it (0.0 - 1.0)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature<T> {
    pub value: T,
    pub confidence: f32,
}

impl<T> Feature<T> {
    pub fn new(value: T, confidence: f32) -> Self {
        Self {
            value,
            confidence: confidence.clamp(0.0, 1.0),
        }
    }
}

/// Local descriptor around a detected corner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Keypoint {
    /// Position normalized to the working image (0.0 - 1.0)
    pub x: f32,
    pub y: f32,
    /// Unit-length gradient orientation descriptor
    pub descriptor: Vec<f32>,
}

/// Contour-derived scalars of the dominant shape
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ShapeDescriptor {
    /// Contour area over image area
    pub area: f32,
    /// Contour perimeter over image perimeter
    pub perimeter: f32,
    /// 4*pi*A / P^2 (1.0 for a circle)
    pub circularity: f32,
    /// Bounding box short side over long side
    pub aspect_ratio: f32,
}

/// One vector per extractor, derived once per image and never mutated
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSet {
    pub keypoints: Feature<Vec<Keypoint>>,
    /// 64-bin hue/saturation histogram
    pub color: Feature<Vec<f32>>,
    /// Text occupancy grid, row-major
    pub layout: Feature<Vec<f32>>,
    /// Gradient orientation histogram
    pub edges: Feature<Vec<f32>>,
    pub shape: Feature<ShapeDescriptor>,
    /// Local binary pattern histogram per quadrant
    pub texture: Feature<Vec<f32>>,
    /// Version of the extractor that produced this set
    pub extractor_version: u32,
}

impl FeatureSet {
    /// A set carrying no signal (all confidences zero)
    pub fn empty(extractor_version: u32) -> Self {
        Self {
            keypoints: Feature::new(Vec::new(), 0.0),
            color: Feature::new(Vec::new(), 0.0),
            layout: Feature::new(Vec::new(), 0.0),
            edges: Feature::new(Vec::new(), 0.0),
            shape: Feature::new(ShapeDescriptor::default(), 0.0),
            texture: Feature::new(Vec::new(), 0.0),
            extractor_version,
        }
    }

    /// Confidence of a single feature
    pub fn confidence(&self, kind: FeatureKind) -> f32 {
        match kind {
            FeatureKind::Keypoints => self.keypoints.confidence,
            FeatureKind::Color => self.color.confidence,
            FeatureKind::Layout => self.layout.confidence,
            FeatureKind::Edges => self.edges.confidence,
            FeatureKind::Shape => self.shape.confidence,
            FeatureKind::Texture => self.texture.confidence,
        }
    }

    /// Mean confidence over all features
    pub fn overall_confidence(&self) -> f32 {
        FeatureKind::ALL
            .iter()
            .map(|k| self.confidence(*k))
            .sum::<f32>()
            / FeatureKind::ALL.len() as f32
    }

    /// Features whose confidence is below `floor`
    pub fn low_confidence(&self, floor: f32) -> Vec<FeatureKind> {
        FeatureKind::ALL
            .iter()
            .copied()
            .filter(|k| self.confidence(*k) < floor)
            .collect()
    }
}
