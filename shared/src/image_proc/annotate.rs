//! Overlays drawn on frames headed for the display.

use super::segmentation::BoundingBox;
use ndarray::Array2;

/// Draw a hollow rectangle `thickness` pixels wide just inside `bbox`.
pub fn draw_rectangle(image: &mut Array2<u8>, bbox: &BoundingBox, value: u8, thickness: usize) {
    let (height, width) = image.dim();
    if height == 0 || width == 0 {
        return;
    }
    let max_row = bbox.max_row.min(height - 1);
    let max_col = bbox.max_col.min(width - 1);
    for row in bbox.min_row..=max_row {
        for col in bbox.min_col..=max_col {
            let edge = row < bbox.min_row + thickness
                || row + thickness > max_row
                || col < bbox.min_col + thickness
                || col + thickness > max_col;
            if edge {
                image[[row, col]] = value;
            }
        }
    }
}

/// Draw a filled disc of `radius` pixels around `(row, col)`, clipped to the frame.
pub fn draw_disc(image: &mut Array2<u8>, center: (usize, usize), radius: usize, value: u8) {
    let (height, width) = image.dim();
    let (cy, cx) = (center.0 as isize, center.1 as isize);
    let r = radius as isize;
    for row in (cy - r).max(0)..=(cy + r).min(height as isize - 1) {
        for col in (cx - r).max(0)..=(cx + r).min(width as isize - 1) {
            let (dy, dx) = (row - cy, col - cx);
            if dy * dy + dx * dx <= r * r {
                image[[row as usize, col as usize]] = value;
            }
        }
    }
}

/// Dark ring with a bright core, visible on any background.
pub fn draw_center_marker(image: &mut Array2<u8>, center: (usize, usize)) {
    draw_disc(image, center, 3, 0);
    draw_disc(image, center, 2, 255);
}
