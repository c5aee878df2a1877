//! Model-based position and focus estimates.
//!
//! A model either runs in-process behind [`InferenceModel`] or in a separate
//! model device that replies over the bus (`set_xy_worm`, `set_z_worm_focus`).
//! Remote replies are held in [`PendingReports`] until the next frame consumes
//! them, so each reply is used exactly once.

use ndarray::ArrayView2;

/// An in-process inference capability.
pub trait InferenceModel: Send {
    /// Object position `(x, y)` in pixels, or `None` if the model sees no object.
    fn locate(&mut self, frame: &ArrayView2<u8>) -> Option<(f64, f64)>;

    /// Signed focus error, or `None` if the model cannot judge focus.
    fn focus(&mut self, frame: &ArrayView2<u8>) -> Option<f64>;
}

/// What a model said about the current frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Report<T> {
    /// Nothing new since the last frame.
    Stale,
    /// The model explicitly reported no value.
    Missing,
    Value(T),
}

impl<T> Report<T> {
    pub fn from_option(value: Option<T>) -> Self {
        match value {
            Some(v) => Report::Value(v),
            None => Report::Missing,
        }
    }
}

/// Latest remote replies not yet consumed by a frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PendingReports {
    xy: Option<Option<(f64, f64)>>,
    focus: Option<Option<f64>>,
}

impl PendingReports {
    /// Record a position reply. Non-finite coordinates count as "no object".
    pub fn set_xy(&mut self, x: Option<f64>, y: Option<f64>) {
        let value = match (x, y) {
            (Some(x), Some(y)) if x.is_finite() && y.is_finite() => Some((x, y)),
            _ => None,
        };
        self.xy = Some(value);
    }

    pub fn set_focus(&mut self, focus: Option<f64>) {
        self.focus = Some(focus.filter(|f| f.is_finite()));
    }

    pub fn take_xy(&mut self) -> Report<(f64, f64)> {
        match self.xy.take() {
            None => Report::Stale,
            Some(value) => Report::from_option(value),
        }
    }

    pub fn take_focus(&mut self) -> Report<f64> {
        match self.focus.take() {
            None => Report::Stale,
            Some(value) => Report::from_option(value),
        }
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}
