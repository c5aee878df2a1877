//! Frame-to-frame continuity filtering of segmentation candidates.

use crate::config::ContinuityConfig;
use crate::detection::Candidate;

/// Reference the candidates of the current frame are compared against.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Continuity {
    /// `(row, col)` centroid of the previous accepted object, or the frame center
    pub previous_center: (f64, f64),
    /// Area of the previous accepted object, when one is being tracked
    pub previous_size: Option<usize>,
}

/// Per-axis (Chebyshev) displacement between two `(row, col)` points.
pub fn displacement(a: (f64, f64), b: (f64, f64)) -> f64 {
    (a.0 - b.0).abs().max((a.1 - b.1).abs())
}

impl Continuity {
    /// Does a candidate plausibly continue the previous object?
    pub fn admits(&self, candidate: &Candidate, config: &ContinuityConfig) -> bool {
        if displacement(candidate.centroid, self.previous_center) > config.center_speed {
            return false;
        }
        match self.previous_size {
            Some(size) if size > 0 => {
                let size = size as f64;
                let area = candidate.area as f64;
                let lower = size * (1.0 - config.size_fluctuation);
                let upper = size * (1.0 + config.size_fluctuation);
                (lower..=upper).contains(&area)
            }
            _ => true,
        }
    }

    /// The admitted candidate nearest the previous center. Ties keep the
    /// earlier candidate.
    pub fn select<'a>(
        &self,
        candidates: &'a [Candidate],
        config: &ContinuityConfig,
    ) -> Option<&'a Candidate> {
        let mut best: Option<(&Candidate, f64)> = None;
        for candidate in candidates.iter().filter(|c| self.admits(c, config)) {
            let d = displacement(candidate.centroid, self.previous_center);
            if best.map_or(true, |(_, best_d)| d < best_d) {
                best = Some((candidate, d));
            }
        }
        best.map(|(c, _)| c)
    }
}
