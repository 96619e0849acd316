//! Vision Layer
//!
//! Derives independent feature vectors from a package image and compares
//! them. Images arrive from an external capture/detection step; this layer
//! only crops, rescales and measures them.
//!
//! Every extractor except quality scoring works on an illumination-flattened
//! copy: the image divided by a coarse estimate of its own lighting, so a
//! smooth lighting falloff across the package cancels out.

pub mod edges;
pub mod extractor;
pub mod features;
pub mod histogram;
pub mod keypoints;
pub mod layout;
pub mod quality;
pub mod shape;
pub mod similarity;

pub use extractor::{ImageAnalysis, VisualFeatureExtractor, EXTRACTOR_VERSION};
pub use features::{Feature, FeatureKind, FeatureSet, Keypoint, ShapeDescriptor};
pub use quality::QualityScore;
pub use similarity::{FeatureScores, VisualScore, VisualSimilarityScorer};

use image::imageops::{self, FilterType};
use image::{GrayImage, Rgb, RgbImage};
use imageproc::contrast::equalize_histogram;
use imageproc::filter::gaussian_blur_f32;
use imageproc::gradients::{horizontal_sobel, vertical_sobel};
use serde::{Deserialize, Serialize};

/// Rectangle in pixel coordinates (x, y, width, height)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    /// Create a new region
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// Area in pixels
    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Intersection with another region, if any
    pub fn intersect(&self, other: &Region) -> Option<Region> {
        let x0 = self.x.max(other.x);
        let y0 = self.y.max(other.y);
        let x1 = self.right().min(other.right());
        let y1 = self.bottom().min(other.bottom());

        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some(Region::new(x0, y0, x1 - x0, y1 - y0))
    }

    // Detector output is untrusted; clamp instead of overflowing
    fn right(&self) -> u32 {
        self.x.saturating_add(self.width)
    }

    fn bottom(&self) -> u32 {
        self.y.saturating_add(self.height)
    }
}

/// A package image handed to the engine, with optional detector output
#[derive(Debug, Clone)]
pub struct QueryImage {
    /// Full captured image
    pub image: RgbImage,
    /// Sub-region containing the package (from an external detector)
    pub region: Option<Region>,
    /// Text regions found by an external OCR step, in image coordinates
    pub text_regions: Vec<Region>,
}

impl QueryImage {
    /// Wrap an RGB image
    pub fn new(image: RgbImage) -> Self {
        Self {
            image,
            region: None,
            text_regions: Vec::new(),
        }
    }

    /// Decode an encoded image buffer (PNG, JPEG, ...)
    pub fn from_bytes(data: &[u8]) -> Result<Self, image::ImageError> {
        let img = image::load_from_memory(data)?;
        Ok(Self::new(img.to_rgb8()))
    }

    /// Restrict extraction to a sub-region
    pub fn with_region(mut self, region: Region) -> Self {
        self.region = Some(region);
        self
    }

    /// Attach externally detected text regions
    pub fn with_text_regions(mut self, regions: Vec<Region>) -> Self {
        self.text_regions = regions;
        self
    }

    /// Get image dimensions as (width, height)
    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }
}

/// Per-pixel gradient magnitude and direction
pub(crate) struct GradientField {
    pub width: u32,
    pub magnitude: Vec<f32>,
    pub orientation: Vec<f32>,
}

impl GradientField {
    fn from_gray(gray: &GrayImage) -> Self {
        let (width, height) = gray.dimensions();
        let gx = horizontal_sobel(gray);
        let gy = vertical_sobel(gray);

        let len = (width * height) as usize;
        let mut magnitude = Vec::with_capacity(len);
        let mut orientation = Vec::with_capacity(len);

        for (px, py) in gx.pixels().zip(gy.pixels()) {
            let dx = px.0[0] as f32;
            let dy = py.0[0] as f32;
            magnitude.push((dx * dx + dy * dy).sqrt());
            orientation.push(dy.atan2(dx));
        }

        Self {
            width,
            magnitude,
            orientation,
        }
    }

    /// (magnitude, orientation in radians) at a pixel
    pub fn at(&self, x: u32, y: u32) -> (f32, f32) {
        let idx = (y * self.width + x) as usize;
        (self.magnitude[idx], self.orientation[idx])
    }
}

/// Coarse grid the lighting is estimated on
const ILLUMINATION_GRID: u32 = 8;
/// Brightness the flattened image is scaled to
const FLAT_TARGET: f32 = 160.0;
const MAX_GAIN: f32 = 4.0;

/// Cropped, rescaled image with derived planes shared by all extractors
pub(crate) struct WorkingImage {
    /// Illumination-flattened color
    pub rgb: RgbImage,
    /// Raw luminance, before flattening
    pub gray: GrayImage,
    /// Luminance of the flattened color
    pub luma: GrayImage,
    pub equalized: GrayImage,
    pub smoothed: GrayImage,
    pub gradients: GradientField,
    /// Text regions in working coordinates
    pub text_regions: Vec<Region>,
    /// Size of the crop before rescaling
    pub source_width: u32,
    pub source_height: u32,
}

impl WorkingImage {
    /// Crop to the package region and scale so the longest side fits `working_size`
    pub fn prepare(query: &QueryImage, working_size: u32) -> Self {
        let (img_w, img_h) = query.image.dimensions();
        let full = Region::new(0, 0, img_w, img_h);
        let crop = query
            .region
            .and_then(|r| r.intersect(&full))
            .unwrap_or(full);

        let cropped = if crop.width == 0 || crop.height == 0 {
            RgbImage::new(1, 1)
        } else if crop == full {
            query.image.clone()
        } else {
            imageops::crop_imm(&query.image, crop.x, crop.y, crop.width, crop.height).to_image()
        };

        let (cw, ch) = cropped.dimensions();
        let longest = cw.max(ch).max(1);
        let scale = if longest > working_size && working_size > 0 {
            working_size as f32 / longest as f32
        } else {
            1.0
        };

        let rgb = if scale < 1.0 {
            let nw = ((cw as f32 * scale).round() as u32).max(1);
            let nh = ((ch as f32 * scale).round() as u32).max(1);
            imageops::resize(&cropped, nw, nh, FilterType::Triangle)
        } else {
            cropped
        };

        let text_regions = query
            .text_regions
            .iter()
            .filter_map(|r| r.intersect(&crop))
            .map(|r| {
                Region::new(
                    ((r.x - crop.x) as f32 * scale) as u32,
                    ((r.y - crop.y) as f32 * scale) as u32,
                    ((r.width as f32 * scale).round() as u32).max(1),
                    ((r.height as f32 * scale).round() as u32).max(1),
                )
            })
            .collect();

        let gray = imageops::grayscale(&rgb);
        let rgb = flatten_illumination(&rgb, &gray);
        let luma = imageops::grayscale(&rgb);
        let equalized = equalize_histogram(&luma);
        let smoothed = gaussian_blur_f32(&equalized, 1.0);
        let gradients = GradientField::from_gray(&smoothed);

        Self {
            rgb,
            gray,
            luma,
            equalized,
            smoothed,
            gradients,
            text_regions,
            source_width: crop.width,
            source_height: crop.height,
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.gray.dimensions()
    }

    pub fn pixel_count(&self) -> usize {
        let (w, h) = self.dimensions();
        (w * h) as usize
    }
}

/// Divide out a smooth lighting estimate and rescale to a fixed brightness
///
/// The estimate is the luminance averaged onto a coarse grid and bilinearly
/// upsampled. A multiplicative lighting field that varies slowly across the
/// grid cancels, as does a global exposure change.
fn flatten_illumination(rgb: &RgbImage, gray: &GrayImage) -> RgbImage {
    let (width, height) = gray.dimensions();
    let coarse = imageops::resize(
        gray,
        ILLUMINATION_GRID.min(width).max(1),
        ILLUMINATION_GRID.min(height).max(1),
        FilterType::Triangle,
    );
    let coarse = gaussian_blur_f32(&coarse, 1.0);
    let illumination = imageops::resize(&coarse, width, height, FilterType::Triangle);

    RgbImage::from_fn(width, height, |x, y| {
        let light = illumination.get_pixel(x, y).0[0].max(1) as f32;
        let gain = (FLAT_TARGET / light).clamp(1.0 / MAX_GAIN, MAX_GAIN);
        let [r, g, b] = rgb.get_pixel(x, y).0;
        let scale = |c: u8| (c as f32 * gain).round().min(255.0) as u8;
        Rgb([scale(r), scale(g), scale(b)])
    })
}
