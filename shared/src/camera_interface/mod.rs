//! Camera abstraction for frame-producing devices.
//!
//! A [`FrameSource`] is anything that yields `(frame, timestamp)` pairs on
//! demand: real hardware behind a vendor SDK, or the [`SyntheticSource`] used
//! on the bench and in tests.

pub mod mock;
pub mod synthetic;

pub use mock::ScriptedSource;
pub use synthetic::SyntheticSource;

use crate::frame::{Frame, FrameFormat, PixelType};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Error type for camera operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CameraError {
    #[error("hardware error: {0}")]
    Hardware(String),
    #[error("invalid region: {0}")]
    InvalidRegion(String),
    #[error("invalid exposure/frame rate: {0}")]
    InvalidTiming(String),
    #[error("capture error: {0}")]
    Capture(String),
}

pub type CameraResult<T> = Result<T, CameraError>;

/// Readout region on the sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    /// Planes per volume; 1 for ordinary 2-D frames.
    pub depth: usize,
    pub height: usize,
    pub width: usize,
    pub binning: usize,
    pub offset_y: usize,
    pub offset_x: usize,
}

impl Region {
    pub fn full(height: usize, width: usize) -> Self {
        Self {
            depth: 1,
            height,
            width,
            binning: 1,
            offset_y: 0,
            offset_x: 0,
        }
    }

    /// Shape of the frames this region produces after binning.
    pub fn output_shape(&self) -> (usize, usize) {
        (self.height / self.binning, self.width / self.binning)
    }

    /// Validate against a sensor of `sensor_height x sensor_width` pixels.
    pub fn validate(&self, sensor_height: usize, sensor_width: usize) -> CameraResult<()> {
        if self.depth != 1 {
            return Err(CameraError::InvalidRegion(format!(
                "only single-plane readout is supported, got depth {}",
                self.depth
            )));
        }
        if self.binning == 0 {
            return Err(CameraError::InvalidRegion("binning must be at least 1".into()));
        }
        let (out_h, out_w) = self.output_shape();
        if out_h == 0 || out_w == 0 {
            return Err(CameraError::InvalidRegion(format!(
                "{}x{} binned by {} is empty",
                self.height, self.width, self.binning
            )));
        }
        if self.offset_y + self.height > sensor_height || self.offset_x + self.width > sensor_width
        {
            return Err(CameraError::InvalidRegion(format!(
                "region {}x{}+{}+{} exceeds sensor {}x{}",
                self.height, self.width, self.offset_y, self.offset_x, sensor_height, sensor_width
            )));
        }
        Ok(())
    }
}

/// Exposure and frame pacing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Timing {
    pub exposure: Duration,
    pub frame_rate: f64,
}

impl Timing {
    pub fn validate(&self) -> CameraResult<()> {
        if !(self.frame_rate.is_finite() && self.frame_rate > 0.0) {
            return Err(CameraError::InvalidTiming(format!(
                "frame rate must be positive, got {}",
                self.frame_rate
            )));
        }
        if self.exposure.is_zero() {
            return Err(CameraError::InvalidTiming("exposure must be non-zero".into()));
        }
        Ok(())
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.frame_rate)
    }
}

/// Snapshot published to the hub and logger whenever the camera changes state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraStatus {
    pub shape: [usize; 3],
    pub exposure_us: u64,
    pub rate: f64,
    pub running: bool,
}

/// A source of frames.
///
/// Every blocking call takes an explicit timeout so the owning device can
/// always get back to its command socket.
pub trait FrameSource: Send {
    /// Begin acquisition.
    fn start(&mut self) -> CameraResult<()>;

    /// Stop acquisition. Idempotent.
    fn stop(&mut self) -> CameraResult<()>;

    fn is_running(&self) -> bool;

    /// Wait up to `timeout` for the next frame.
    ///
    /// Returns `Ok(None)` if no frame became ready in time or the source is stopped.
    fn grab(&mut self, timeout: Duration) -> CameraResult<Option<(Frame, f64)>>;

    fn set_region(&mut self, region: Region) -> CameraResult<()>;

    fn region(&self) -> Region;

    fn set_timing(&mut self, timing: Timing) -> CameraResult<()>;

    fn timing(&self) -> Timing;

    fn pixel_type(&self) -> PixelType;

    /// Format of the frames [`FrameSource::grab`] returns.
    fn format(&self) -> FrameFormat {
        let (height, width) = self.region().output_shape();
        FrameFormat::new(self.pixel_type(), height, width)
    }

    fn status(&self) -> CameraStatus {
        let region = self.region();
        let (height, width) = region.output_shape();
        let timing = self.timing();
        CameraStatus {
            shape: [region.depth, height, width],
            exposure_us: timing.exposure.as_micros() as u64,
            rate: timing.frame_rate,
            running: self.is_running(),
        }
    }
}

impl FrameSource for Box<dyn FrameSource> {
    fn start(&mut self) -> CameraResult<()> {
        (**self).start()
    }

    fn stop(&mut self) -> CameraResult<()> {
        (**self).stop()
    }

    fn is_running(&self) -> bool {
        (**self).is_running()
    }

    fn grab(&mut self, timeout: Duration) -> CameraResult<Option<(Frame, f64)>> {
        (**self).grab(timeout)
    }

    fn set_region(&mut self, region: Region) -> CameraResult<()> {
        (**self).set_region(region)
    }

    fn region(&self) -> Region {
        (**self).region()
    }

    fn set_timing(&mut self, timing: Timing) -> CameraResult<()> {
        (**self).set_timing(timing)
    }

    fn timing(&self) -> Timing {
        (**self).timing()
    }

    fn pixel_type(&self) -> PixelType {
        (**self).pixel_type()
    }
}
