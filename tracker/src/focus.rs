//! Conversion of model focus estimates into Z velocity.

/// Z velocity for a focus estimate (already offset by the operator bias).
///
/// Linear in the estimate, saturating at `+-2 * vz_max`, and zero inside the
/// dead band so the stage does not hunt around best focus.
pub fn autofocus_velocity(focus: f64, vz_max: f64, dead_band: f64) -> i32 {
    if !focus.is_finite() || focus.abs() < dead_band {
        return 0;
    }
    let limit = 2.0 * vz_max;
    (focus * limit).clamp(-limit, limit) as i32
}

/// Geometric decay of a stale focus estimate.
pub fn decay_focus(focus: Option<f64>, factor: f64) -> Option<f64> {
    focus.filter(|f| !f.is_nan()).map(|f| f * factor)
}
