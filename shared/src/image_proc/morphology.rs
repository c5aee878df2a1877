//! Box filtering and binary morphology with rectangular kernels.
//!
//! Kernels are anchored at their center. Blur mirrors the image at the border
//! (`dcb|abcd|cba`); erosion and dilation ignore pixels outside the frame.

use ndarray::{Array2, ArrayView2, Axis};

fn reflect_101(i: isize, n: usize) -> usize {
    let n = n as isize;
    if n == 1 {
        return 0;
    }
    let period = 2 * (n - 1);
    let mut i = i.rem_euclid(period);
    if i >= n {
        i = period - i;
    }
    i as usize
}

fn kernel_span(size: usize) -> (isize, isize) {
    let before = (size / 2) as isize;
    let after = size as isize - 1 - before;
    (before, after)
}

/// Normalized box blur of an 8-bit image, rounded to nearest.
pub fn box_blur(image: &ArrayView2<u8>, size: usize) -> Array2<u8> {
    if size <= 1 {
        return image.to_owned();
    }
    let (height, width) = image.dim();
    let (before, after) = kernel_span(size);

    let mut rows = Array2::<u32>::zeros((height, width));
    for i in 0..height {
        for j in 0..width {
            let mut acc = 0u32;
            for dj in -before..=after {
                acc += image[[i, reflect_101(j as isize + dj, width)]] as u32;
            }
            rows[[i, j]] = acc;
        }
    }

    let area = (size * size) as u32;
    let mut out = Array2::<u8>::zeros((height, width));
    for i in 0..height {
        for j in 0..width {
            let mut acc = 0u32;
            for di in -before..=after {
                acc += rows[[reflect_101(i as isize + di, height), j]];
            }
            out[[i, j]] = ((acc + area / 2) / area).min(255) as u8;
        }
    }
    out
}

fn sweep(mask: &ArrayView2<bool>, size: usize, axis: Axis, grow: bool) -> Array2<bool> {
    let (before, after) = kernel_span(size);
    let n = mask.len_of(axis) as isize;
    Array2::from_shape_fn(mask.dim(), |(i, j)| {
        let pos = (if axis == Axis(0) { i } else { j }) as isize;
        let lo = (pos - before).max(0);
        let hi = (pos + after).min(n - 1);
        let mut window = (lo..=hi).map(|k| {
            let k = k as usize;
            if axis == Axis(0) {
                mask[[k, j]]
            } else {
                mask[[i, k]]
            }
        });
        if grow {
            window.any(|v| v)
        } else {
            window.all(|v| v)
        }
    })
}

/// Binary erosion with a `size x size` rectangle.
pub fn erode(mask: &ArrayView2<bool>, size: usize) -> Array2<bool> {
    if size <= 1 {
        return mask.to_owned();
    }
    let rows = sweep(mask, size, Axis(1), false);
    sweep(&rows.view(), size, Axis(0), false)
}

/// Binary dilation with a `size x size` rectangle.
pub fn dilate(mask: &ArrayView2<bool>, size: usize) -> Array2<bool> {
    if size <= 1 {
        return mask.to_owned();
    }
    let rows = sweep(mask, size, Axis(1), true);
    sweep(&rows.view(), size, Axis(0), true)
}

/// Erosion followed by dilation; removes specks smaller than the erode kernel.
pub fn open(mask: &ArrayView2<bool>, erode_size: usize, dilate_size: usize) -> Array2<bool> {
    let eroded = erode(mask, erode_size);
    dilate(&eroded.view(), dilate_size)
}
