//! Contour shape descriptors

use image::{GrayImage, Luma};
use imageproc::contours::{find_contours, BorderType};
use imageproc::contrast::otsu_level;
use imageproc::point::Point;
use std::f32::consts::PI;

use super::features::{Feature, ShapeDescriptor};
use super::WorkingImage;

/// Contours smaller than this share of the image are noise
const MIN_AREA_RATIO: f32 = 0.01;

/// Describe the largest outer contour of the Otsu-binarized image
pub(crate) fn extract_shape(work: &WorkingImage) -> Feature<ShapeDescriptor> {
    let (width, height) = work.dimensions();
    if width < 4 || height < 4 {
        return Feature::new(ShapeDescriptor::default(), 0.0);
    }

    // Flat image: nothing to segment
    let (lo, hi) = work
        .equalized
        .pixels()
        .fold((u8::MAX, u8::MIN), |(lo, hi), p| (lo.min(p.0[0]), hi.max(p.0[0])));
    if hi.saturating_sub(lo) < 8 {
        return Feature::new(ShapeDescriptor::default(), 0.0);
    }

    let level = otsu_level(&work.equalized);
    let binary = GrayImage::from_fn(width, height, |x, y| {
        if work.equalized.get_pixel(x, y).0[0] > level {
            Luma([255])
        } else {
            Luma([0])
        }
    });

    let contours = find_contours::<i32>(&binary);
    let largest = contours
        .iter()
        .filter(|c| c.border_type == BorderType::Outer && c.points.len() >= 3)
        .map(|c| (polygon_area(&c.points), c))
        .max_by(|a, b| a.0.total_cmp(&b.0));

    let image_area = (width * height) as f32;
    let Some((area, contour)) = largest else {
        return Feature::new(ShapeDescriptor::default(), 0.1);
    };
    if area / image_area < MIN_AREA_RATIO {
        return Feature::new(ShapeDescriptor::default(), 0.2);
    }

    let perimeter = polygon_perimeter(&contour.points);
    let (min_x, max_x) = contour.points.iter().fold((i32::MAX, i32::MIN), |(lo, hi), p| {
        (lo.min(p.x), hi.max(p.x))
    });
    let (min_y, max_y) = contour.points.iter().fold((i32::MAX, i32::MIN), |(lo, hi), p| {
        (lo.min(p.y), hi.max(p.y))
    });
    let box_w = (max_x - min_x + 1) as f32;
    let box_h = (max_y - min_y + 1) as f32;

    let circularity = if perimeter > 0.0 {
        (4.0 * PI * area / (perimeter * perimeter)).clamp(0.0, 1.0)
    } else {
        0.0
    };

    let descriptor = ShapeDescriptor {
        area: (area / image_area).clamp(0.0, 1.0),
        perimeter: (perimeter / (2.0 * (width + height) as f32)).clamp(0.0, 1.0),
        circularity,
        aspect_ratio: box_w.min(box_h) / box_w.max(box_h),
    };
    Feature::new(descriptor, 1.0)
}

/// Shoelace area of a closed polygon
fn polygon_area(points: &[Point<i32>]) -> f32 {
    let n = points.len();
    let twice: i64 = (0..n)
        .map(|i| {
            let p = points[i];
            let q = points[(i + 1) % n];
            p.x as i64 * q.y as i64 - q.x as i64 * p.y as i64
        })
        .sum();
    (twice.abs() as f32) / 2.0
}

fn polygon_perimeter(points: &[Point<i32>]) -> f32 {
    let n = points.len();
    (0..n)
        .map(|i| {
            let p = points[i];
            let q = points[(i + 1) % n];
            (((p.x - q.x).pow(2) + (p.y - q.y).pow(2)) as f32).sqrt()
        })
        .sum()
}

/// Mean normalized difference of the shape scalars
pub fn shape_similarity(a: &ShapeDescriptor, b: &ShapeDescriptor) -> f32 {
    let pairs = [
        (a.area, b.area),
        (a.perimeter, b.perimeter),
        (a.circularity, b.circularity),
        (a.aspect_ratio, b.aspect_ratio),
    ];
    let total: f32 = pairs
        .iter()
        .map(|&(x, y)| {
            let scale = x.abs().max(y.abs());
            if scale < 1e-6 {
                1.0
            } else {
                1.0 - (x - y).abs() / scale
            }
        })
        .sum();
    (total / pairs.len() as f32).clamp(0.0, 1.0)
}
