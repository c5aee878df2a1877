//! Per-frame specimen tracking.
//!
//! [`Tracker`] turns each new frame into a [`VelocityCommand`] for the stage:
//! it finds the specimen (threshold segmentation or an external model),
//! filters candidates for frame-to-frame continuity, estimates focus (model
//! or calibration plane), runs the XY PID loop and applies the loss/recovery
//! rules. The tracker owns no sockets; the tracker device feeds it frames and
//! forwards its commands.

use ndarray::{Array2, ArrayView2};
use tracing::{debug, info, warn};

pub mod calibration;
pub mod config;
pub mod controllers;
pub mod detection;
pub mod error;
pub mod focus;
pub mod inference;
pub mod selection;
pub mod state;

use crate::calibration::{CalibrationPlane, Point3};
use crate::controllers::PidController;
use crate::inference::{InferenceModel, PendingReports, Report};
use crate::selection::Continuity;
use shared::image_proc::annotate::{draw_center_marker, draw_disc, draw_rectangle};

pub use crate::config::TrackerConfig;
pub use crate::error::TrackerError;
pub use crate::state::{AxisCommand, FocusMode, TrackingMode, TrackingState, VelocityCommand};

/// Result of processing one frame.
#[derive(Debug, Clone)]
pub struct TrackerOutput {
    /// Velocities to send to the stage; `Keep` axes are not sent.
    pub command: VelocityCommand,
    /// Copy of the frame with tracking overlays, for the display.
    pub annotated: Array2<u8>,
    /// Object found (or trusted, in model mode) on this frame
    pub found: bool,
    /// `(x, y)` position used for control, after any decay
    pub position: Option<(f64, f64)>,
    pub focus: Option<f64>,
}

/// Closed-loop tracker state machine.
pub struct Tracker {
    config: TrackerConfig,
    frame_shape: (usize, usize),
    tracking_mode: TrackingMode,
    focus_mode: FocusMode,
    interpolate_z: bool,
    z_autofocus: bool,
    z_autofocus_offset: f64,
    offset_z: f64,
    curr_pos: Point3,
    state: TrackingState,
    pid: PidController,
    calibration: CalibrationPlane,
    pending: PendingReports,
    model: Option<Box<dyn InferenceModel>>,
}

fn frame_center(shape: (usize, usize)) -> (f64, f64) {
    ((shape.0 / 2) as f64, (shape.1 / 2) as f64)
}

impl Tracker {
    /// Create a tracker for frames of `(height, width)` pixels.
    pub fn new(config: TrackerConfig, frame_shape: (usize, usize)) -> Result<Self, TrackerError> {
        config.validate()?;
        let setpoint = config.setpoint.unwrap_or_else(|| frame_center(frame_shape));
        let pid = PidController::new(config.pid_y, config.pid_x, setpoint);
        Ok(Self {
            config,
            frame_shape,
            tracking_mode: TrackingMode::Off,
            focus_mode: FocusMode::Off,
            interpolate_z: false,
            z_autofocus: false,
            z_autofocus_offset: 0.0,
            offset_z: 0.0,
            curr_pos: Point3::zeros(),
            state: TrackingState::default(),
            pid,
            calibration: CalibrationPlane::new(),
            pending: PendingReports::default(),
            model: None,
        })
    }

    /// Run model modes through an in-process model instead of waiting for
    /// remote replies.
    pub fn with_model(mut self, model: Box<dyn InferenceModel>) -> Self {
        self.model = Some(model);
        self
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn state(&self) -> &TrackingState {
        &self.state
    }

    pub fn calibration(&self) -> &CalibrationPlane {
        &self.calibration
    }

    pub fn tracking_mode(&self) -> &TrackingMode {
        &self.tracking_mode
    }

    pub fn focus_mode(&self) -> &FocusMode {
        &self.focus_mode
    }

    pub fn is_tracking(&self) -> bool {
        self.state.tracking_enabled
    }

    /// Frames must be forwarded to an external model device.
    pub fn wants_model_frames(&self) -> bool {
        self.tracking_mode.is_model() || matches!(self.focus_mode, FocusMode::Model(_))
    }

    /// `(y, x)` center of the current frame shape.
    pub fn center(&self) -> (f64, f64) {
        frame_center(self.frame_shape)
    }

    /// Enable tracking. Returns `false` if it was already enabled.
    pub fn start(&mut self) -> bool {
        if self.state.tracking_enabled {
            return false;
        }
        info!("starting tracking");
        self.state.reset_session();
        self.state.tracking_enabled = true;
        self.pid.reset();
        true
    }

    /// Disable tracking. Returns the stop command to send if tracking was enabled.
    pub fn stop(&mut self) -> Option<VelocityCommand> {
        if !self.state.tracking_enabled {
            return None;
        }
        info!("stopping tracking");
        self.state.reset_session();
        self.state.tracking_enabled = false;
        self.pid.reset();
        Some(VelocityCommand::STOP)
    }

    pub fn set_tracking_mode(&mut self, mode: TrackingMode) {
        info!("tracking mode {} -> {}", self.tracking_mode, mode);
        match &mode {
            TrackingMode::Off => self.state.position = None,
            TrackingMode::Threshold => self.state.found = false,
            TrackingMode::Model(_) => self.state.found = true,
        }
        self.pending.clear();
        self.tracking_mode = mode;
    }

    pub fn set_focus_mode(&mut self, mode: FocusMode) {
        info!("focus mode {} -> {}", self.focus_mode, mode);
        if mode == FocusMode::Off {
            self.state.focus = None;
        }
        self.focus_mode = mode;
    }

    /// Toggle plane-interpolated Z. Turning it off discards the calibration.
    pub fn set_interpolate_z(&mut self, enabled: bool) {
        self.interpolate_z = enabled;
        if !enabled {
            self.calibration.clear();
        }
    }

    pub fn interpolate_z(&self) -> bool {
        self.interpolate_z
    }

    pub fn set_z_autofocus(&mut self, enabled: bool) {
        self.z_autofocus = enabled;
        if enabled && self.focus_mode == FocusMode::Off {
            warn!("z autofocus enabled without a focus model, z will not move");
        }
    }

    pub fn set_z_autofocus_offset(&mut self, offset: f64) {
        self.z_autofocus_offset = offset;
    }

    pub fn set_offset_z(&mut self, offset_z: f64) {
        self.offset_z = offset_z;
    }

    /// Store a calibration point in stage coordinates.
    pub fn set_point(&mut self, index: i64, point: Point3) {
        self.calibration.set_point(index, point);
    }

    /// Latest stage position read back from the stage.
    pub fn set_curr_pos(&mut self, position: Point3) {
        self.curr_pos = position;
    }

    pub fn curr_pos(&self) -> Point3 {
        self.curr_pos
    }

    /// Remote model position reply.
    pub fn report_xy(&mut self, x: Option<f64>, y: Option<f64>) {
        self.pending.set_xy(x, y);
    }

    /// Remote model focus reply.
    pub fn report_focus(&mut self, focus: Option<f64>) {
        self.pending.set_focus(focus);
    }

    fn set_frame_shape(&mut self, shape: (usize, usize)) {
        info!(
            "frame shape {:?} -> {:?}, recentering",
            self.frame_shape, shape
        );
        self.frame_shape = shape;
        if self.config.setpoint.is_none() {
            self.pid.set_setpoint(frame_center(shape));
        }
        self.state.tracked_center = None;
        self.state.tracked_size = None;
    }

    /// Pull a stale `(x, y)` position toward the frame center.
    fn decay_position(&self, position: Option<(f64, f64)>) -> Option<(f64, f64)> {
        let (cy, cx) = self.center();
        let k = self.config.xy_retraction;
        match position {
            Some((x, y)) => Some(((1.0 - k) * cx + k * x, (1.0 - k) * cy + k * y)),
            None if self.tracking_mode != TrackingMode::Off => Some((cx, cy)),
            None => None,
        }
    }

    /// Threshold segmentation and continuity selection. Returns whether an
    /// object was found.
    fn track_threshold(&mut self, frame: &ArrayView2<u8>, annotated: &mut Array2<u8>) -> bool {
        let segmentation = detection::segment(frame, &self.config.segmentation);
        let tracking = self.state.tracking_enabled;
        let continuity = Continuity {
            previous_center: self
                .state
                .tracked_center
                .filter(|_| tracking)
                .unwrap_or_else(|| self.center()),
            previous_size: self.state.tracked_size.filter(|_| tracking),
        };

        let Some(chosen) = continuity.select(&segmentation.candidates, &self.config.continuity)
        else {
            return false;
        };
        if tracking {
            self.state.tracked_size = Some(chosen.area);
            self.state.tracked_center = Some(chosen.centroid);
        }
        match segmentation.tracking_box(chosen, self.config.segmentation.mask_blur_size) {
            Some(bbox) => {
                let (row, col) = bbox.center();
                self.state.position = Some((col as f64, row as f64));
                draw_rectangle(annotated, &bbox, 255, 2);
                true
            }
            None => false,
        }
    }

    /// Model position. Returns whether a fresh position arrived this frame.
    fn track_model(&mut self, frame: &ArrayView2<u8>) -> bool {
        let report = match self.model.as_mut() {
            Some(model) => Report::from_option(model.locate(frame)),
            None => self.pending.take_xy(),
        };
        match report {
            Report::Value(position) => {
                self.state.position = Some(position);
                self.state.found = true;
                true
            }
            Report::Missing => {
                self.state.position = None;
                self.state.found = false;
                false
            }
            Report::Stale => false,
        }
    }

    fn update_focus(&mut self, frame: &ArrayView2<u8>) {
        if self.focus_mode == FocusMode::Off {
            self.state.focus = None;
            return;
        }
        let report = match self.model.as_mut() {
            Some(model) => Report::from_option(model.focus(frame)),
            None => self.pending.take_focus(),
        };
        self.state.focus = match report {
            Report::Value(focus) => Some(focus),
            Report::Missing => None,
            Report::Stale => focus::decay_focus(self.state.focus, self.config.z_retraction),
        };
    }

    fn z_command(&self) -> AxisCommand {
        let autofocus = self.z_autofocus && matches!(self.focus_mode, FocusMode::Model(_));
        if autofocus {
            match self.state.focus {
                Some(focus) => AxisCommand::SetTo(focus::autofocus_velocity(
                    focus + self.z_autofocus_offset,
                    self.config.vz_max,
                    self.config.focus_dead_band,
                )),
                None => AxisCommand::Keep,
            }
        } else if self.interpolate_z {
            AxisCommand::SetTo(self.calibration.velocity(
                self.curr_pos,
                self.offset_z,
                self.config.vz_max,
            ))
        } else {
            AxisCommand::Keep
        }
    }

    /// Loss/recovery rules for the XY axes.
    fn xy_command(&mut self) -> (AxisCommand, AxisCommand) {
        if self.tracking_mode == TrackingMode::Off {
            return (AxisCommand::Keep, AxisCommand::Keep);
        }
        let tolerance = self.config.miss_tolerance;
        if !self.state.found {
            self.state.missed_frames += 1;
            if self.state.missed_frames >= tolerance {
                if self.state.missed_frames == tolerance {
                    warn!("target lost for {} frames, stopping stage", tolerance);
                }
                return (AxisCommand::SetTo(0), AxisCommand::SetTo(0));
            }
            return (AxisCommand::Keep, AxisCommand::Keep);
        }

        if self.state.missed_frames >= tolerance {
            info!(
                "target reacquired after {} missed frames",
                self.state.missed_frames
            );
            self.pid.reset();
        }
        self.state.missed_frames = 0;
        let (x, y) = match self.state.position {
            Some((x, y)) => (Some(x), Some(y)),
            None => (None, None),
        };
        // Image rows grow downward while stage y grows upward, hence the
        // negated y from the controller.
        let (vy, vx) = self.pid.velocity(y, x);
        (AxisCommand::SetTo(vx), AxisCommand::SetTo(vy))
    }

    /// Process the newest frame and produce the stage command for it.
    pub fn process_frame(&mut self, frame: &ArrayView2<u8>) -> TrackerOutput {
        if frame.dim() != self.frame_shape {
            self.set_frame_shape(frame.dim());
        }
        let mut annotated = frame.to_owned();

        let fresh = match self.tracking_mode.clone() {
            TrackingMode::Off => {
                self.state.position = None;
                self.state.found = false;
                false
            }
            TrackingMode::Threshold => {
                let found = self.track_threshold(frame, &mut annotated);
                self.state.found = found;
                found
            }
            TrackingMode::Model(_) => self.track_model(frame),
        };
        if !fresh {
            self.state.position = self.decay_position(self.state.position);
        }
        self.update_focus(frame);

        if self.tracking_mode != TrackingMode::Off {
            if self.tracking_mode.is_model() {
                if let Some((x, y)) = self.state.position {
                    if x >= 0.0 && y >= 0.0 {
                        draw_disc(&mut annotated, (y as usize, x as usize), 4, 255);
                    }
                }
            }
            let (cy, cx) = self.center();
            draw_center_marker(&mut annotated, (cy as usize, cx as usize));
        }

        let command = if self.state.tracking_enabled {
            let vz = self.z_command();
            let (vx, vy) = self.xy_command();
            VelocityCommand { vx, vy, vz }
        } else {
            VelocityCommand::KEEP
        };
        debug!(
            "frame: found {} position {:?} focus {:?} -> vx {} vy {} vz {}",
            self.state.found,
            self.state.position,
            self.state.focus,
            command.vx,
            command.vy,
            command.vz
        );

        TrackerOutput {
            command,
            annotated,
            found: self.state.found,
            position: self.state.position,
            focus: self.state.focus,
        }
    }
}
