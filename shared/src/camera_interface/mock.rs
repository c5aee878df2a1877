use super::{CameraError, CameraResult, FrameSource, Region, Timing};
use crate::frame::{Frame, PixelType};
use std::collections::VecDeque;
use std::time::Duration;

/// Replays a fixed list of frames, for tests.
///
/// Timestamps count up by the frame interval from zero.
pub struct ScriptedSource {
    frames: VecDeque<Frame>,
    pixel: PixelType,
    region: Region,
    timing: Timing,
    running: bool,
    emitted: u64,
    fail_next: Option<String>,
}

impl ScriptedSource {
    pub fn new(frames: Vec<Frame>) -> Self {
        let (height, width) = frames.first().map(Frame::dim).unwrap_or((0, 0));
        let pixel = frames.first().map(Frame::pixel).unwrap_or(PixelType::U8);
        Self {
            frames: frames.into(),
            pixel,
            region: Region::full(height, width),
            timing: Timing {
                exposure: Duration::from_millis(1),
                frame_rate: 100.0,
            },
            running: false,
            emitted: 0,
            fail_next: None,
        }
    }

    /// Make the next `grab` report a hardware fault.
    pub fn fail_next_grab(&mut self, reason: impl Into<String>) {
        self.fail_next = Some(reason.into());
    }

    pub fn remaining(&self) -> usize {
        self.frames.len()
    }
}

impl FrameSource for ScriptedSource {
    fn start(&mut self) -> CameraResult<()> {
        self.running = true;
        Ok(())
    }

    fn stop(&mut self) -> CameraResult<()> {
        self.running = false;
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running
    }

    fn grab(&mut self, _timeout: Duration) -> CameraResult<Option<(Frame, f64)>> {
        if let Some(reason) = self.fail_next.take() {
            return Err(CameraError::Capture(reason));
        }
        if !self.running {
            return Ok(None);
        }
        Ok(self.frames.pop_front().map(|frame| {
            let ts = self.emitted as f64 / self.timing.frame_rate;
            self.emitted += 1;
            (frame, ts)
        }))
    }

    fn set_region(&mut self, region: Region) -> CameraResult<()> {
        if region.output_shape() != (self.region.height, self.region.width) {
            return Err(CameraError::InvalidRegion(
                "scripted frames have a fixed shape".into(),
            ));
        }
        self.region = region;
        Ok(())
    }

    fn region(&self) -> Region {
        self.region
    }

    fn set_timing(&mut self, timing: Timing) -> CameraResult<()> {
        timing.validate()?;
        self.timing = timing;
        Ok(())
    }

    fn timing(&self) -> Timing {
        self.timing
    }

    fn pixel_type(&self) -> PixelType {
        self.pixel
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    #[test]
    fn test_replays_in_order_then_runs_dry() {
        let frames = (0..3u8)
            .map(|i| Frame::U8(Array2::from_elem((2, 2), i)))
            .collect();
        let mut source = ScriptedSource::new(frames);
        source.start().unwrap();

        for i in 0..3u8 {
            let (frame, ts) = source.grab(Duration::ZERO).unwrap().unwrap();
            assert_eq!(frame, Frame::U8(Array2::from_elem((2, 2), i)));
            assert_eq!(ts, i as f64 / 100.0);
        }
        assert!(source.grab(Duration::ZERO).unwrap().is_none());
    }

    #[test]
    fn test_injected_fault() {
        let mut source = ScriptedSource::new(vec![Frame::U8(Array2::zeros((2, 2)))]);
        source.start().unwrap();
        source.fail_next_grab("usb reset");
        assert_eq!(
            source.grab(Duration::ZERO),
            Err(CameraError::Capture("usb reset".into()))
        );
        assert!(source.grab(Duration::ZERO).unwrap().is_some());
    }
}
