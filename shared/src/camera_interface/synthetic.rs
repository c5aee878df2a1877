//! Deterministic synthetic specimen for bench runs and tests.
//!
//! Renders a dark elongated blob on a bright, noisy background. The blob
//! follows a slow circle around the sensor center so a closed tracking loop
//! has something to chase.

use super::{CameraError, CameraResult, FrameSource, Region, Timing};
use crate::frame::{Frame, PixelType};
use crate::frame_channel::now_timestamp;
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::f64::consts::TAU;
use std::thread;
use std::time::{Duration, Instant};

pub const BACKGROUND_LEVEL: f64 = 180.0;
pub const BLOB_LEVEL: f64 = 40.0;

pub struct SyntheticSource {
    sensor_height: usize,
    sensor_width: usize,
    region: Region,
    timing: Timing,
    rng: StdRng,
    noise: f64,
    path_radius: f64,
    path_period: f64,
    blob_axes: (f64, f64),
    frame_index: u64,
    running: bool,
    next_frame_at: Option<Instant>,
}

impl SyntheticSource {
    pub fn new(sensor_height: usize, sensor_width: usize, seed: u64) -> Self {
        Self {
            sensor_height,
            sensor_width,
            region: Region::full(sensor_height, sensor_width),
            timing: Timing {
                exposure: Duration::from_millis(18),
                frame_rate: 20.0,
            },
            rng: StdRng::seed_from_u64(seed),
            noise: 8.0,
            path_radius: sensor_height.min(sensor_width) as f64 / 6.0,
            path_period: 600.0,
            blob_axes: (30.0, 8.0),
            frame_index: 0,
            running: false,
            next_frame_at: None,
        }
    }

    /// Circle radius in pixels and frames per revolution. A zero radius parks
    /// the blob at the sensor center.
    pub fn with_path(mut self, radius: f64, period_frames: f64) -> Self {
        self.path_radius = radius;
        self.path_period = period_frames.max(1.0);
        self
    }

    /// Semi-axes of the blob in pixels.
    pub fn with_blob(mut self, semi_major: f64, semi_minor: f64) -> Self {
        self.blob_axes = (semi_major, semi_minor);
        self
    }

    /// Peak amplitude of the uniform background noise.
    pub fn with_noise(mut self, amplitude: f64) -> Self {
        self.noise = amplitude.max(0.0);
        self
    }

    /// Blob center `(y, x)` in sensor coordinates for a given frame.
    pub fn blob_center(&self, frame_index: u64) -> (f64, f64) {
        let phase = TAU * frame_index as f64 / self.path_period;
        let cy = self.sensor_height as f64 / 2.0 + self.path_radius * phase.sin();
        let cx = self.sensor_width as f64 / 2.0 + self.path_radius * phase.cos();
        (cy, cx)
    }

    pub fn frames_rendered(&self) -> u64 {
        self.frame_index
    }

    /// Render the next frame regardless of pacing.
    pub fn render(&mut self) -> Array2<u8> {
        let (cy, cx) = self.blob_center(self.frame_index);
        self.frame_index += 1;

        // Blob oriented along the direction of travel
        let heading = TAU * self.frame_index as f64 / self.path_period;
        let (sin_h, cos_h) = heading.sin_cos();
        let (a, b) = self.blob_axes;

        let sensor = Array2::from_shape_fn((self.sensor_height, self.sensor_width), |(y, x)| {
            let dy = y as f64 - cy;
            let dx = x as f64 - cx;
            let u = dx * cos_h + dy * sin_h;
            let v = -dx * sin_h + dy * cos_h;
            let inside = (u / a).powi(2) + (v / b).powi(2) <= 1.0;
            if inside {
                BLOB_LEVEL
            } else {
                BACKGROUND_LEVEL
            }
        });

        let noisy = if self.noise > 0.0 {
            let noise = self.noise;
            let rng = &mut self.rng;
            sensor.mapv(|v| v + rng.gen_range(-noise..=noise))
        } else {
            sensor
        };

        self.read_out(&noisy)
    }

    fn read_out(&self, sensor: &Array2<f64>) -> Array2<u8> {
        let r = self.region;
        let bin = r.binning;
        let (out_h, out_w) = r.output_shape();
        let norm = (bin * bin) as f64;
        Array2::from_shape_fn((out_h, out_w), |(i, j)| {
            let mut acc = 0.0;
            for di in 0..bin {
                for dj in 0..bin {
                    acc += sensor[[r.offset_y + i * bin + di, r.offset_x + j * bin + dj]];
                }
            }
            (acc / norm).round().clamp(0.0, 255.0) as u8
        })
    }
}

impl FrameSource for SyntheticSource {
    fn start(&mut self) -> CameraResult<()> {
        self.running = true;
        self.next_frame_at = Some(Instant::now());
        Ok(())
    }

    fn stop(&mut self) -> CameraResult<()> {
        self.running = false;
        self.next_frame_at = None;
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running
    }

    fn grab(&mut self, timeout: Duration) -> CameraResult<Option<(Frame, f64)>> {
        if !self.running {
            return Ok(None);
        }
        let now = Instant::now();
        let due = self.next_frame_at.unwrap_or(now);
        if due > now {
            let wait = due - now;
            if wait > timeout {
                thread::sleep(timeout);
                return Ok(None);
            }
            thread::sleep(wait);
        }
        self.next_frame_at = Some(due.max(now) + self.timing.frame_interval());
        let frame = self.render();
        Ok(Some((Frame::U8(frame), now_timestamp())))
    }

    fn set_region(&mut self, region: Region) -> CameraResult<()> {
        region.validate(self.sensor_height, self.sensor_width)?;
        self.region = region;
        Ok(())
    }

    fn region(&self) -> Region {
        self.region
    }

    fn set_timing(&mut self, timing: Timing) -> CameraResult<()> {
        timing.validate()?;
        if timing.exposure > timing.frame_interval() {
            return Err(CameraError::InvalidTiming(format!(
                "exposure {:?} longer than frame interval {:?}",
                timing.exposure,
                timing.frame_interval()
            )));
        }
        self.timing = timing;
        Ok(())
    }

    fn timing(&self) -> Timing {
        self.timing
    }

    fn pixel_type(&self) -> PixelType {
        PixelType::U8
    }
}
