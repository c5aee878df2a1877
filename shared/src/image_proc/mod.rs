//! Image processing used by the threshold tracker and the display path.
//!
//! - **segmentation**: Otsu thresholding, connected components and region statistics
//! - **morphology**: box blur, erosion and dilation with rectangular kernels
//! - **annotate**: rectangles and markers drawn onto display frames

pub mod annotate;
pub mod morphology;
pub mod segmentation;

pub use morphology::{box_blur, dilate, erode, open};
pub use segmentation::{
    component_stats, connected_components, mask_bounds, otsu_threshold, threshold_below,
    BoundingBox, Component,
};
