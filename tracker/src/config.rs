use crate::controllers::PidGains;
use crate::error::TrackerError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Threshold segmentation parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentationConfig {
    /// Box blur applied before thresholding (pixels)
    pub blur_size: usize,
    /// Erosion kernel that removes speckle (pixels)
    pub erode_size: usize,
    /// Dilation kernel that restores object bodies (pixels)
    pub dilate_size: usize,
    /// Components at or below this area are discarded (pixels)
    pub min_object_area: usize,
    /// Blur applied to the chosen object's mask before taking its bounds
    pub mask_blur_size: usize,
    /// Otsu values above this are trusted
    pub otsu_floor: f64,
    /// Multiplier applied to a trusted Otsu value
    pub otsu_scale: f64,
    /// Threshold used when Otsu falls at or below the floor
    pub fallback_threshold: f64,
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        Self {
            blur_size: 5,
            erode_size: 7,
            dilate_size: 13,
            min_object_area: 200,
            mask_blur_size: 5,
            otsu_floor: 50.0,
            otsu_scale: 1.2,
            fallback_threshold: 110.0,
        }
    }
}

/// Frame-to-frame continuity limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContinuityConfig {
    /// Allowed fractional change of object area between frames
    pub size_fluctuation: f64,
    /// Largest per-frame centroid displacement, per axis (pixels)
    pub center_speed: f64,
}

impl Default for ContinuityConfig {
    fn default() -> Self {
        Self {
            size_fluctuation: 0.25,
            center_speed: 100.0,
        }
    }
}

/// Configuration for the tracker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Consecutive misses before the stage is stopped
    pub miss_tolerance: usize,
    /// Z velocity scale; commands saturate at twice this
    pub vz_max: f64,
    /// Per-frame pull of a lost position toward the frame center
    pub xy_retraction: f64,
    /// Per-frame decay of a stale focus estimate
    pub z_retraction: f64,
    /// Model focus values closer than this to zero command no motion
    pub focus_dead_band: f64,
    pub pid_x: PidGains,
    pub pid_y: PidGains,
    /// `(y, x)` PID setpoint; the frame center when unset
    pub setpoint: Option<(f64, f64)>,
    pub segmentation: SegmentationConfig,
    pub continuity: ContinuityConfig,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            miss_tolerance: 45,
            vz_max: 16.0,
            xy_retraction: 0.87,
            z_retraction: 0.93,
            focus_dead_band: 0.05,
            pid_x: PidGains::default(),
            pid_y: PidGains::default(),
            setpoint: None,
            segmentation: SegmentationConfig::default(),
            continuity: ContinuityConfig::default(),
        }
    }
}

impl TrackerConfig {
    /// Load from a JSON file. Missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self, TrackerError> {
        let text = std::fs::read_to_string(path)?;
        let config: TrackerConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), TrackerError> {
        if self.miss_tolerance == 0 {
            return Err(TrackerError::InvalidConfig(
                "miss_tolerance must be at least 1".into(),
            ));
        }
        for (name, factor) in [
            ("xy_retraction", self.xy_retraction),
            ("z_retraction", self.z_retraction),
        ] {
            if !(0.0..1.0).contains(&factor) {
                return Err(TrackerError::InvalidConfig(format!(
                    "{name} must be in [0, 1), got {factor}"
                )));
            }
        }
        if !(self.vz_max > 0.0) {
            return Err(TrackerError::InvalidConfig(format!(
                "vz_max must be positive, got {}",
                self.vz_max
            )));
        }
        if !(0.0..1.0).contains(&self.continuity.size_fluctuation) {
            return Err(TrackerError::InvalidConfig(format!(
                "size_fluctuation must be in [0, 1), got {}",
                self.continuity.size_fluctuation
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = TrackerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.miss_tolerance, 45);
        assert_eq!(config.segmentation.dilate_size, 13);
    }

    #[test]
    fn test_partial_json_override() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"miss_tolerance": 10, "continuity": {{"center_speed": 40.0}}}}"#
        )
        .unwrap();
        let config = TrackerConfig::load(file.path()).unwrap();
        assert_eq!(config.miss_tolerance, 10);
        assert_eq!(config.continuity.center_speed, 40.0);
        assert_eq!(config.continuity.size_fluctuation, 0.25);
        assert_eq!(config.vz_max, 16.0);
    }

    #[test]
    fn test_rejects_bad_retraction() {
        let config = TrackerConfig {
            xy_retraction: 1.0,
            ..TrackerConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(TrackerError::InvalidConfig(_))
        ));
    }
}
