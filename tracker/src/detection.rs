//! Dark-object segmentation for threshold tracking.
//!
//! The specimen is darker than the illuminated background. Each frame is
//! blurred, thresholded below an adaptive level, cleaned with an erosion and
//! a larger dilation, and split into connected components. Components at or
//! below the minimum area are dropped.

use crate::config::SegmentationConfig;
use ndarray::{Array2, ArrayView2};
use shared::image_proc::{
    box_blur, component_stats, connected_components, dilate, mask_bounds, open, otsu_threshold,
    threshold_below, BoundingBox,
};
use tracing::debug;

/// One segmented object.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub label: usize,
    pub area: usize,
    /// `(row, col)` centroid
    pub centroid: (f64, f64),
    pub bbox: BoundingBox,
}

/// Candidates found in a frame, plus the label image needed to recover masks.
#[derive(Debug, Clone)]
pub struct Segmentation {
    pub threshold: f64,
    pub labels: Array2<usize>,
    pub candidates: Vec<Candidate>,
}

impl Segmentation {
    /// Pixel mask of one candidate.
    pub fn mask_of(&self, candidate: &Candidate) -> Array2<bool> {
        self.labels.mapv(|l| l == candidate.label)
    }

    /// Tracking box for a candidate: the bounds of its mask grown by
    /// `grow` pixels, clipped to the frame.
    pub fn tracking_box(&self, candidate: &Candidate, grow: usize) -> Option<BoundingBox> {
        let mask = self.mask_of(candidate);
        if grow > 1 {
            mask_bounds(&dilate(&mask.view(), grow).view())
        } else {
            mask_bounds(&mask.view())
        }
    }
}

/// Threshold separating the object from the background.
///
/// A scaled Otsu level when Otsu is confident, otherwise a fixed fallback
/// for nearly uniform frames.
pub fn adaptive_threshold(image: &ArrayView2<u8>, config: &SegmentationConfig) -> f64 {
    let otsu = otsu_threshold(image) as f64;
    if otsu > config.otsu_floor {
        config.otsu_scale * otsu
    } else {
        config.fallback_threshold
    }
}

/// Foreground mask after blur, threshold and speckle removal.
pub fn object_mask(image: &ArrayView2<u8>, threshold: f64, config: &SegmentationConfig) -> Array2<bool> {
    let blurred = box_blur(image, config.blur_size);
    let mask = threshold_below(&blurred.view(), threshold);
    open(&mask.view(), config.erode_size, config.dilate_size)
}

/// Segment a frame into candidate objects larger than the minimum area.
pub fn segment(image: &ArrayView2<u8>, config: &SegmentationConfig) -> Segmentation {
    let threshold = adaptive_threshold(image, config);
    let mask = object_mask(image, threshold, config);
    let (labels, count) = connected_components(&mask.view());

    let candidates: Vec<Candidate> = component_stats(&labels.view(), count)
        .into_iter()
        .filter(|c| c.area > config.min_object_area)
        .map(|c| Candidate {
            label: c.label,
            area: c.area,
            centroid: c.centroid,
            bbox: c.bbox,
        })
        .collect();

    debug!(
        "segmentation: threshold {:.1}, {} components, {} candidates",
        threshold,
        count,
        candidates.len()
    );

    Segmentation {
        threshold,
        labels,
        candidates,
    }
}
