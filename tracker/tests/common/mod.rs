//! Frame builders for tracker tests

use ndarray::Array2;

pub const BACKGROUND: u8 = 200;
pub const OBJECT: u8 = 20;

/// Bright frame with dark rectangles `(row, col, height, width)`.
pub fn blob_frame(size: usize, blobs: &[(usize, usize, usize, usize)]) -> Array2<u8> {
    let mut frame = Array2::from_elem((size, size), BACKGROUND);
    for &(r0, c0, h, w) in blobs {
        for r in r0..r0 + h {
            for c in c0..c0 + w {
                frame[[r, c]] = OBJECT;
            }
        }
    }
    frame
}

/// Frame with nothing trackable: a speck too small to survive segmentation.
pub fn miss_frame(size: usize) -> Array2<u8> {
    blob_frame(size, &[(5, 5, 3, 3)])
}

/// 20x20 object whose tracking box is centered on `(row, col)`.
pub fn object_at(size: usize, row: usize, col: usize) -> Array2<u8> {
    blob_frame(size, &[(row - 9, col - 9, 20, 20)])
}
