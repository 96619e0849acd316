//! Coarse spatial layout of text on the package

use super::edges::EDGE_MAGNITUDE;
use super::features::Feature;
use super::WorkingImage;

/// Grid occupancy of text regions, row-major, each cell in 0.0 - 1.0
///
/// Uses the externally detected text regions when present. Without them the
/// grid falls back to edge density, which tracks printed text but also picks
/// up artwork, so it is reported at half confidence.
pub(crate) fn extract_layout(work: &WorkingImage, grid: u32) -> Feature<Vec<f32>> {
    let grid = grid.max(1);
    let (width, height) = work.dimensions();
    let cells = (grid * grid) as usize;

    if !work.text_regions.is_empty() {
        let mut occupancy = vec![0.0f32; cells];
        for (idx, cell) in occupancy.iter_mut().enumerate() {
            let (x0, y0, x1, y1) = cell_bounds(idx as u32, grid, width, height);
            let cell_area = ((x1 - x0) * (y1 - y0)).max(1) as f32;
            let covered: u32 = work
                .text_regions
                .iter()
                .map(|r| {
                    let ix = (r.x + r.width).min(x1).saturating_sub(r.x.max(x0));
                    let iy = (r.y + r.height).min(y1).saturating_sub(r.y.max(y0));
                    ix * iy
                })
                .sum();
            *cell = (covered as f32 / cell_area).min(1.0);
        }
        return Feature::new(occupancy, 1.0);
    }

    let mut density = vec![0.0f32; cells];
    for (idx, cell) in density.iter_mut().enumerate() {
        let (x0, y0, x1, y1) = cell_bounds(idx as u32, grid, width, height);
        let mut strong = 0u32;
        let mut total = 0u32;
        for y in y0..y1 {
            for x in x0..x1 {
                total += 1;
                if work.gradients.at(x, y).0 >= EDGE_MAGNITUDE {
                    strong += 1;
                }
            }
        }
        if total > 0 {
            *cell = strong as f32 / total as f32;
        }
    }

    let max = density.iter().cloned().fold(0.0f32, f32::max);
    if max <= 0.0 {
        return Feature::new(density, 0.1);
    }
    density.iter_mut().for_each(|v| *v /= max);
    Feature::new(density, 0.5)
}

/// Pixel bounds (x0, y0, x1, y1) of a grid cell
fn cell_bounds(idx: u32, grid: u32, width: u32, height: u32) -> (u32, u32, u32, u32) {
    let (col, row) = (idx % grid, idx / grid);
    (
        col * width / grid,
        row * height / grid,
        (col + 1) * width / grid,
        (row + 1) * height / grid,
    )
}
