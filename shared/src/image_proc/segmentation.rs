//! Foreground segmentation for 8-bit frames.
//!
//! # Key Algorithms
//!
//! ## Otsu Thresholding
//! Picks the histogram split that maximizes between-class variance.
//!
//! ## Connected Components
//! Two-pass labeling with union-find. Uses 8-connectivity, so diagonal
//! neighbours belong to the same object.

use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};

/// Compute the Otsu threshold of an 8-bit image.
///
/// Returns the highest intensity of the background class; pixels `<=` the
/// threshold fall on one side of the split. A flat image returns its value.
pub fn otsu_threshold(image: &ArrayView2<u8>) -> u8 {
    let mut histogram = [0u64; 256];
    for &pixel in image.iter() {
        histogram[pixel as usize] += 1;
    }
    let total = image.len() as f64;

    let sum: f64 = histogram
        .iter()
        .enumerate()
        .map(|(i, &count)| i as f64 * count as f64)
        .sum();

    let mut sum_b = 0.0;
    let mut weight_b = 0.0;
    let mut max_variance = -1.0;
    let mut threshold = 0u8;

    for (i, &count) in histogram.iter().enumerate() {
        weight_b += count as f64;
        if weight_b == 0.0 {
            continue;
        }
        let weight_f = total - weight_b;
        if weight_f == 0.0 {
            if max_variance < 0.0 {
                threshold = i as u8;
            }
            break;
        }

        sum_b += i as f64 * count as f64;
        let mean_b = sum_b / weight_b;
        let mean_f = (sum - sum_b) / weight_f;
        let variance = weight_b * weight_f * (mean_b - mean_f).powi(2);

        if variance > max_variance {
            max_variance = variance;
            threshold = i as u8;
        }
    }

    threshold
}

/// Mask of pixels strictly darker than `threshold`.
pub fn threshold_below(image: &ArrayView2<u8>, threshold: f64) -> Array2<bool> {
    image.mapv(|p| (p as f64) < threshold)
}

fn find_root(labels: &mut [usize], label: usize) -> usize {
    let mut current = label;
    while current != labels[current] {
        // Path halving
        labels[current] = labels[labels[current]];
        current = labels[current];
    }
    current
}

fn union_labels(labels: &mut [usize], a: usize, b: usize) {
    let root_a = find_root(labels, a);
    let root_b = find_root(labels, b);
    if root_a < root_b {
        labels[root_b] = root_a;
    } else if root_b < root_a {
        labels[root_a] = root_b;
    }
}

/// Label 8-connected foreground regions.
///
/// Background is 0 and objects get consecutive labels starting at 1 in raster
/// order of their first pixel. Returns the label image and the object count.
pub fn connected_components(mask: &ArrayView2<bool>) -> (Array2<usize>, usize) {
    let (height, width) = mask.dim();
    let mut labels = Array2::<usize>::zeros((height, width));
    let mut parent = vec![0usize];

    for i in 0..height {
        for j in 0..width {
            if !mask[[i, j]] {
                continue;
            }
            // Already visited neighbours: W, NW, N, NE
            let mut neighbours = [0usize; 4];
            if j > 0 {
                neighbours[0] = labels[[i, j - 1]];
            }
            if i > 0 {
                if j > 0 {
                    neighbours[1] = labels[[i - 1, j - 1]];
                }
                neighbours[2] = labels[[i - 1, j]];
                if j + 1 < width {
                    neighbours[3] = labels[[i - 1, j + 1]];
                }
            }

            match neighbours.iter().copied().filter(|&l| l > 0).min() {
                None => {
                    let label = parent.len();
                    parent.push(label);
                    labels[[i, j]] = label;
                }
                Some(min_label) => {
                    labels[[i, j]] = min_label;
                    for &n in neighbours.iter().filter(|&&l| l > 0 && l != min_label) {
                        union_labels(&mut parent, min_label, n);
                    }
                }
            }
        }
    }

    let mut relabel = vec![0usize; parent.len()];
    let mut next = 0;
    for label in 1..parent.len() {
        let root = find_root(&mut parent, label);
        if relabel[root] == 0 {
            next += 1;
            relabel[root] = next;
        }
        relabel[label] = relabel[root];
    }

    labels.mapv_inplace(|l| relabel[l]);
    (labels, next)
}

/// Inclusive pixel bounds of a region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_row: usize,
    pub min_col: usize,
    pub max_row: usize,
    pub max_col: usize,
}

impl BoundingBox {
    fn at(row: usize, col: usize) -> Self {
        Self {
            min_row: row,
            min_col: col,
            max_row: row,
            max_col: col,
        }
    }

    fn include(&mut self, row: usize, col: usize) {
        self.min_row = self.min_row.min(row);
        self.min_col = self.min_col.min(col);
        self.max_row = self.max_row.max(row);
        self.max_col = self.max_col.max(col);
    }

    /// Integer midpoint `(row, col)`, rounded down.
    pub fn center(&self) -> (usize, usize) {
        (
            (self.min_row + self.max_row) / 2,
            (self.min_col + self.max_col) / 2,
        )
    }

    pub fn height(&self) -> usize {
        self.max_row - self.min_row + 1
    }

    pub fn width(&self) -> usize {
        self.max_col - self.min_col + 1
    }
}

/// Per-object statistics from a label image.
#[derive(Debug, Clone, PartialEq)]
pub struct Component {
    pub label: usize,
    pub area: usize,
    /// Mean `(row, col)` of the object's pixels.
    pub centroid: (f64, f64),
    pub bbox: BoundingBox,
}

/// Area, centroid and bounds of every labeled object, ordered by label.
pub fn component_stats(labels: &ArrayView2<usize>, count: usize) -> Vec<Component> {
    let mut sums = vec![(0usize, 0.0f64, 0.0f64); count + 1];
    let mut boxes: Vec<Option<BoundingBox>> = vec![None; count + 1];

    for ((row, col), &label) in labels.indexed_iter() {
        if label == 0 || label > count {
            continue;
        }
        let entry = &mut sums[label];
        entry.0 += 1;
        entry.1 += row as f64;
        entry.2 += col as f64;
        match &mut boxes[label] {
            Some(bbox) => bbox.include(row, col),
            None => boxes[label] = Some(BoundingBox::at(row, col)),
        }
    }

    (1..=count)
        .filter_map(|label| {
            let (area, rows, cols) = sums[label];
            let bbox = boxes[label]?;
            Some(Component {
                label,
                area,
                centroid: (rows / area as f64, cols / area as f64),
                bbox,
            })
        })
        .collect()
}

/// Bounds of every set pixel in `mask`, or `None` if it is empty.
pub fn mask_bounds(mask: &ArrayView2<bool>) -> Option<BoundingBox> {
    let mut bounds: Option<BoundingBox> = None;
    for ((row, col), &set) in mask.indexed_iter() {
        if !set {
            continue;
        }
        match &mut bounds {
            Some(b) => b.include(row, col),
            None => bounds = Some(BoundingBox::at(row, col)),
        }
    }
    bounds
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Creates a mask from a 2D array of 1s and 0s
    /// The formatting of the array makes it easy to see the pattern visually
    fn create_test_mask(pattern: &[&[i32]]) -> Array2<bool> {
        let height = pattern.len();
        let width = pattern[0].len();
        Array2::from_shape_fn((height, width), |(i, j)| pattern[i][j] != 0)
    }

    fn assert_labels_match(labeled: &Array2<usize>, expected: &[&[i32]]) {
        for (i, row) in expected.iter().enumerate() {
            for (j, &value) in row.iter().enumerate() {
                assert_eq!(
                    labeled[[i, j]],
                    value as usize,
                    "Mismatch at position [{}, {}]",
                    i,
                    j
                );
            }
        }
    }

    #[test]
    fn test_empty_mask() {
        let mask = Array2::from_elem((4, 4), false);
        let (labels, count) = connected_components(&mask.view());
        assert_eq!(count, 0);
        assert!(labels.iter().all(|&l| l == 0));
    }

    #[test]
    fn test_two_components() {
        // fmt-ignore
        let pattern: &[&[i32]] = &[
            &[0, 0, 0, 0, 0],
            &[0, 1, 1, 0, 0],
            &[0, 1, 1, 0, 0],
            &[0, 0, 0, 0, 1],
            &[0, 0, 0, 0, 1],
        ];
        let (labels, count) = connected_components(&create_test_mask(pattern).view());
        assert_eq!(count, 2);
        // fmt-ignore
        let expected: &[&[i32]] = &[
            &[0, 0, 0, 0, 0],
            &[0, 1, 1, 0, 0],
            &[0, 1, 1, 0, 0],
            &[0, 0, 0, 0, 2],
            &[0, 0, 0, 0, 2],
        ];
        assert_labels_match(&labels, expected);
    }

    /// Diagonal neighbours are connected with 8-connectivity
    #[test]
    fn test_diagonal_is_connected() {
        // fmt-ignore
        let pattern: &[&[i32]] = &[
            &[1, 0, 0, 0],
            &[0, 1, 0, 0],
            &[0, 0, 1, 0],
            &[0, 0, 0, 1],
        ];
        let (_, count) = connected_components(&create_test_mask(pattern).view());
        assert_eq!(count, 1);
    }

    /// Anti-diagonal joins through the NE neighbour
    #[test]
    fn test_anti_diagonal_merge() {
        // fmt-ignore
        let pattern: &[&[i32]] = &[
            &[0, 0, 0, 1, 0],
            &[0, 0, 1, 0, 0],
            &[1, 1, 0, 0, 0],
        ];
        let (labels, count) = connected_components(&create_test_mask(pattern).view());
        assert_eq!(count, 1);
        assert_eq!(labels[[2, 0]], 1);
        assert_eq!(labels[[0, 3]], 1);
    }

    #[test]
    fn test_u_shape_equivalence() {
        // fmt-ignore
        let pattern: &[&[i32]] = &[
            &[0, 0, 0, 0, 0, 0, 0],
            &[0, 1, 0, 0, 0, 1, 0],
            &[0, 1, 0, 0, 0, 1, 0],
            &[0, 1, 1, 1, 1, 1, 0],
            &[0, 0, 0, 0, 0, 0, 0],
        ];
        let (labels, count) = connected_components(&create_test_mask(pattern).view());
        assert_eq!(count, 1);
        // fmt-ignore
        let expected: &[&[i32]] = &[
            &[0, 0, 0, 0, 0, 0, 0],
            &[0, 1, 0, 0, 0, 1, 0],
            &[0, 1, 0, 0, 0, 1, 0],
            &[0, 1, 1, 1, 1, 1, 0],
            &[0, 0, 0, 0, 0, 0, 0],
        ];
        assert_labels_match(&labels, expected);
    }

    #[test]
    fn test_component_stats() {
        // fmt-ignore
        let pattern: &[&[i32]] = &[
            &[1, 1, 0, 0, 0, 0],
            &[1, 1, 0, 0, 0, 0],
            &[0, 0, 0, 0, 0, 0],
            &[0, 0, 0, 1, 1, 1],
        ];
        let mask = create_test_mask(pattern);
        let (labels, count) = connected_components(&mask.view());
        let stats = component_stats(&labels.view(), count);

        assert_eq!(stats.len(), 2);
        assert_eq!(stats[0].area, 4);
        assert_eq!(stats[0].centroid, (0.5, 0.5));
        assert_eq!(stats[1].area, 3);
        assert_eq!(stats[1].centroid, (3.0, 4.0));
        assert_eq!(
            stats[1].bbox,
            BoundingBox {
                min_row: 3,
                min_col: 3,
                max_row: 3,
                max_col: 5
            }
        );
        assert_eq!(stats[1].bbox.center(), (3, 4));
        assert_eq!(stats[1].bbox.width(), 3);
    }

    #[test]
    fn test_otsu_bimodal() {
        let mut image = Array2::<u8>::from_elem((10, 10), 200);
        for i in 0..10 {
            for j in 0..4 {
                image[[i, j]] = 20;
            }
        }
        let t = otsu_threshold(&image.view());
        assert!((20..200).contains(&t), "threshold {}", t);

        let mask = threshold_below(&image.view(), t as f64 + 0.5);
        assert_eq!(mask.iter().filter(|&&m| m).count(), 40);
    }

    #[test]
    fn test_otsu_flat_image() {
        let image = Array2::<u8>::from_elem((5, 5), 77);
        assert_eq!(otsu_threshold(&image.view()), 77);
    }

    #[test]
    fn test_mask_bounds() {
        let mut mask = Array2::from_elem((6, 6), false);
        assert_eq!(mask_bounds(&mask.view()), None);
        mask[[1, 4]] = true;
        mask[[3, 2]] = true;
        let b = mask_bounds(&mask.view()).unwrap();
        assert_eq!((b.min_row, b.min_col, b.max_row, b.max_col), (1, 2, 3, 4));
    }
}
