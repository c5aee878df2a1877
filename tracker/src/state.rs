use crate::error::TrackerError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How the XY position is found each frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrackingMode {
    Off,
    /// Dark-object threshold segmentation
    Threshold,
    /// Positions reported by a named external model
    Model(String),
}

impl TrackingMode {
    pub fn is_model(&self) -> bool {
        matches!(self, TrackingMode::Model(_))
    }
}

fn is_off(name: &str) -> bool {
    matches!(name.to_ascii_lowercase().as_str(), "off" | "none")
}

impl FromStr for TrackingMode {
    type Err = TrackerError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        match name.trim() {
            "" => Err(TrackerError::UnknownMode(name.to_string())),
            n if is_off(n) => Ok(TrackingMode::Off),
            "xy_threshold" => Ok(TrackingMode::Threshold),
            n => Ok(TrackingMode::Model(n.to_string())),
        }
    }
}

impl fmt::Display for TrackingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackingMode::Off => f.write_str("None"),
            TrackingMode::Threshold => f.write_str("xy_threshold"),
            TrackingMode::Model(name) => f.write_str(name),
        }
    }
}

/// How the focus scalar is found each frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FocusMode {
    Off,
    Model(String),
}

impl FromStr for FocusMode {
    type Err = TrackerError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        match name.trim() {
            "" => Err(TrackerError::UnknownMode(name.to_string())),
            n if is_off(n) => Ok(FocusMode::Off),
            n => Ok(FocusMode::Model(n.to_string())),
        }
    }
}

impl fmt::Display for FocusMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FocusMode::Off => f.write_str("None"),
            FocusMode::Model(name) => f.write_str(name),
        }
    }
}

/// Command for one stage axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AxisCommand {
    /// Leave the axis at its current velocity.
    #[default]
    Keep,
    SetTo(i32),
}

impl AxisCommand {
    pub fn value(self) -> Option<i32> {
        match self {
            AxisCommand::Keep => None,
            AxisCommand::SetTo(v) => Some(v),
        }
    }
}

impl fmt::Display for AxisCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AxisCommand::Keep => f.write_str("None"),
            AxisCommand::SetTo(v) => write!(f, "{v}"),
        }
    }
}

/// Velocity triple sent to the stage after each frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VelocityCommand {
    pub vx: AxisCommand,
    pub vy: AxisCommand,
    pub vz: AxisCommand,
}

impl VelocityCommand {
    pub const KEEP: VelocityCommand = VelocityCommand {
        vx: AxisCommand::Keep,
        vy: AxisCommand::Keep,
        vz: AxisCommand::Keep,
    };

    pub const STOP: VelocityCommand = VelocityCommand {
        vx: AxisCommand::SetTo(0),
        vy: AxisCommand::SetTo(0),
        vz: AxisCommand::SetTo(0),
    };

    /// Non-`Keep` components as `(axis, value)` pairs, in x, y, z order.
    pub fn commands(&self) -> impl Iterator<Item = (char, i32)> {
        [('x', self.vx), ('y', self.vy), ('z', self.vz)]
            .into_iter()
            .filter_map(|(axis, cmd)| cmd.value().map(|v| (axis, v)))
    }
}

/// Transient per-session tracking memory.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackingState {
    pub tracking_enabled: bool,
    /// Last known `(x, y)` object position in pixels
    pub position: Option<(f64, f64)>,
    /// Last known focus estimate
    pub focus: Option<f64>,
    /// Object found on the most recent frame
    pub found: bool,
    /// Area of the tracked object on the last accepted frame
    pub tracked_size: Option<usize>,
    /// `(y, x)` centroid of the tracked object on the last accepted frame
    pub tracked_center: Option<(f64, f64)>,
    /// Consecutive frames without a detection while tracking
    pub missed_frames: usize,
}

impl TrackingState {
    /// Clear what a new session must not inherit.
    pub fn reset_session(&mut self) {
        self.missed_frames = 0;
        self.tracked_size = None;
        self.tracked_center = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_parsing() {
        assert_eq!("None".parse::<TrackingMode>().unwrap(), TrackingMode::Off);
        assert_eq!("off".parse::<TrackingMode>().unwrap(), TrackingMode::Off);
        assert_eq!(
            "xy_threshold".parse::<TrackingMode>().unwrap(),
            TrackingMode::Threshold
        );
        assert_eq!(
            "xy_unet".parse::<TrackingMode>().unwrap(),
            TrackingMode::Model("xy_unet".into())
        );
        assert!("".parse::<TrackingMode>().is_err());
        assert_eq!("none".parse::<FocusMode>().unwrap(), FocusMode::Off);
        assert_eq!(FocusMode::Model("z_cnn".into()).to_string(), "z_cnn");
    }

    #[test]
    fn test_keep_and_zero_are_distinct() {
        assert_ne!(AxisCommand::Keep, AxisCommand::SetTo(0));
        assert_eq!(VelocityCommand::KEEP.commands().count(), 0);
        let stop: Vec<_> = VelocityCommand::STOP.commands().collect();
        assert_eq!(stop, vec![('x', 0), ('y', 0), ('z', 0)]);

        let partial = VelocityCommand {
            vz: AxisCommand::SetTo(-26),
            ..VelocityCommand::KEEP
        };
        assert_eq!(partial.commands().collect::<Vec<_>>(), vec![('z', -26)]);
    }
}
