//! Tracker device: runs the closed loop on the newest frame and steers the
//! stage through the hub.

use crate::bus_log::BusLog;
use crate::dispatch_pending;
use crate::error::DeviceError;
use shared::frame::{Frame, FrameFormat, PixelType};
use shared::frame_channel::{TimestampedPublisher, TimestampedSubscriber};
use shared::reactor::{CancelHandle, Reactor, Wake};
use shared::rpc::{ArgKind, Args, DispatchTable, ProtocolError};
use shared::zmq::{Publisher, Subscriber};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use tracker::calibration::Point3;
use tracker::{FocusMode, Tracker, TrackingMode, VelocityCommand};

/// Name of the routing device stage commands go through.
pub const HUB: &str = "hub";

/// Frame outputs of one tracker.
pub struct TrackerOutputs {
    /// Raw frames for the writer.
    pub writer: TimestampedPublisher,
    /// Annotated 8-bit frames for the display.
    pub display: TimestampedPublisher,
    /// 8-bit frames for an external model device, if one is attached.
    pub model: Option<TimestampedPublisher>,
}

/// Tracker device state.
pub struct TrackerCore {
    tracker: Tracker,
    outputs: TrackerOutputs,
    publisher: Arc<Publisher>,
    log: BusLog,
    cancel: Option<CancelHandle>,
    running: bool,
    /// Secondary channels only forward frames.
    passthrough: bool,
    flip: bool,
    model_device: Option<String>,
    frames: u64,
}

impl TrackerCore {
    pub fn new(
        name: impl Into<String>,
        tracker: Tracker,
        outputs: TrackerOutputs,
        publisher: Arc<Publisher>,
    ) -> Self {
        Self {
            log: BusLog::new(name, publisher.clone()),
            tracker,
            outputs,
            publisher,
            cancel: None,
            running: true,
            passthrough: false,
            flip: false,
            model_device: None,
            frames: 0,
        }
    }

    pub fn with_passthrough(mut self, passthrough: bool) -> Self {
        self.passthrough = passthrough;
        self
    }

    pub fn with_flip(mut self, flip: bool) -> Self {
        self.flip = flip;
        self
    }

    /// Relay mode changes to `device` and feed it frames while a model mode
    /// is active.
    pub fn with_model_device(mut self, device: impl Into<String>) -> Self {
        self.model_device = Some(device.into());
        self
    }

    pub fn name(&self) -> &str {
        self.log.device()
    }

    pub fn tracker(&self) -> &Tracker {
        &self.tracker
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn frames_processed(&self) -> u64 {
        self.frames
    }

    fn to_hub(&self, body: String) {
        self.publisher.send(format!("{} {}", HUB, body));
    }

    fn send_velocity(&self, command: &VelocityCommand) {
        for (axis, velocity) in command.commands() {
            self.to_hub(format!("stage_move{} {}", axis, velocity));
        }
    }

    fn request_position(&self) {
        self.to_hub(format!("stage_get_curr_pos {}", self.name()));
    }

    fn relay_to_model(&self, body: String) {
        if let Some(model) = &self.model_device {
            self.publisher.send(format!("{} {}", model, body));
        }
    }

    fn stop(&mut self) {
        if let Some(command) = self.tracker.stop() {
            self.send_velocity(&command);
            self.log.send("tracking stopped");
        }
    }

    /// Run one frame through the loop and fan it out.
    pub fn handle_frame(&mut self, timestamp: f64, frame: Frame) -> Result<(), DeviceError> {
        let frame = if self.flip {
            frame.flip_horizontal()
        } else {
            frame
        };
        self.frames += 1;
        self.outputs.writer.send(&frame, Some(timestamp))?;

        let image = frame.to_u8();
        if self.passthrough {
            self.outputs
                .display
                .send(&Frame::U8(image), Some(timestamp))?;
            return Ok(());
        }

        if self.tracker.wants_model_frames() {
            if let Some(model) = &self.outputs.model {
                model.send(&Frame::U8(image.clone()), Some(timestamp))?;
            }
        }

        let output = self.tracker.process_frame(&image.view());
        self.outputs
            .display
            .send(&Frame::U8(output.annotated), Some(timestamp))?;

        if self.tracker.is_tracking() {
            self.send_velocity(&output.command);
        }
        // keeps curr_pos fresh for the first tracked frame after a start
        self.request_position();
        Ok(())
    }

    /// Point the output channels at a new frame shape.
    fn reformat(&mut self, format: &FrameFormat) {
        info!("{}: frame format now {}", self.name(), format);
        let (height, width) = format.shape();
        let display = FrameFormat::new(PixelType::U8, height, width);
        self.outputs.writer.set_format(format.clone());
        if let Some(model) = &mut self.outputs.model {
            model.set_format(display.clone());
        }
        self.outputs.display.set_format(display);
    }
}

fn mode_error(e: tracker::TrackerError) -> ProtocolError {
    ProtocolError::Handler(e.to_string())
}

fn start(core: &mut TrackerCore, _: &Args) -> Result<(), ProtocolError> {
    if core.tracker.start() {
        core.log.send("tracking started");
    }
    Ok(())
}

fn stop(core: &mut TrackerCore, _: &Args) -> Result<(), ProtocolError> {
    core.stop();
    Ok(())
}

fn shutdown(core: &mut TrackerCore, _: &Args) -> Result<(), ProtocolError> {
    core.stop();
    core.running = false;
    if let Some(cancel) = &core.cancel {
        cancel.cancel();
    }
    Ok(())
}

fn set_tracking_mode(core: &mut TrackerCore, args: &Args) -> Result<(), ProtocolError> {
    let mode: TrackingMode = args.text(0)?.parse().map_err(mode_error)?;
    core.log.send(format!("tracking mode {}", mode));
    core.relay_to_model(format!("set_tracking_mode {}", mode));
    core.tracker.set_tracking_mode(mode);
    Ok(())
}

fn set_focus_mode(core: &mut TrackerCore, args: &Args) -> Result<(), ProtocolError> {
    let mode: FocusMode = args.text(0)?.parse().map_err(mode_error)?;
    core.log.send(format!("focus mode {}", mode));
    core.relay_to_model(format!("set_focus_mode {}", mode));
    core.tracker.set_focus_mode(mode);
    Ok(())
}

fn interpolate_z_tracking(core: &mut TrackerCore, args: &Args) -> Result<(), ProtocolError> {
    core.tracker.set_interpolate_z(args.bool(0)?);
    Ok(())
}

fn set_z_autofocus_tracking(core: &mut TrackerCore, args: &Args) -> Result<(), ProtocolError> {
    core.tracker.set_z_autofocus(args.bool(0)?);
    Ok(())
}

fn set_z_autofocus_tracking_offset(
    core: &mut TrackerCore,
    args: &Args,
) -> Result<(), ProtocolError> {
    core.tracker.set_z_autofocus_offset(args.float(0)?);
    Ok(())
}

fn set_offset_z(core: &mut TrackerCore, args: &Args) -> Result<(), ProtocolError> {
    core.tracker.set_offset_z(args.float(0)?);
    Ok(())
}

/// Ask the stage, via the hub, for the position to store as point `i`.
fn set_point(core: &mut TrackerCore, args: &Args) -> Result<(), ProtocolError> {
    let index = args.int(0)?;
    core.to_hub(format!("stage_get_pos {} {}", core.name(), index));
    Ok(())
}

fn set_pos(core: &mut TrackerCore, args: &Args) -> Result<(), ProtocolError> {
    let index = args.int(0)?;
    let point = Point3::new(args.float(1)?, args.float(2)?, args.float(3)?);
    core.log.send(format!(
        "calibration point {} = ({}, {}, {})",
        index, point.x, point.y, point.z
    ));
    core.tracker.set_point(index, point);
    Ok(())
}

fn get_curr_pos(core: &mut TrackerCore, _: &Args) -> Result<(), ProtocolError> {
    core.request_position();
    Ok(())
}

fn set_curr_pos(core: &mut TrackerCore, args: &Args) -> Result<(), ProtocolError> {
    core.tracker
        .set_curr_pos(Point3::new(args.float(0)?, args.float(1)?, args.float(2)?));
    Ok(())
}

fn set_xy_worm(core: &mut TrackerCore, args: &Args) -> Result<(), ProtocolError> {
    core.tracker.report_xy(args.opt_float(0)?, args.opt_float(1)?);
    Ok(())
}

fn set_z_worm_focus(core: &mut TrackerCore, args: &Args) -> Result<(), ProtocolError> {
    core.tracker.report_focus(args.opt_float(0)?);
    Ok(())
}

pub fn command_table() -> Result<DispatchTable<TrackerCore>, ProtocolError> {
    use ArgKind::*;
    DispatchTable::addressed()
        .verb("start", &[], start)?
        .verb("stop", &[], stop)?
        .verb("shutdown", &[], shutdown)?
        .verb("set_tracking_mode", &[Text], set_tracking_mode)?
        .verb("set_focus_mode", &[Text], set_focus_mode)?
        .verb("interpolate_z_tracking", &[Bool], interpolate_z_tracking)?
        .verb("set_z_autofocus_tracking", &[Bool], set_z_autofocus_tracking)?
        .verb(
            "set_z_autofocus_tracking_offset",
            &[Float],
            set_z_autofocus_tracking_offset,
        )?
        .verb("set_offset_z", &[Float], set_offset_z)?
        .verb("set_point", &[Int], set_point)?
        .verb("set_pos", &[Int, Float, Float, Float], set_pos)?
        .verb("get_curr_pos", &[], get_curr_pos)?
        .verb("set_curr_pos", &[Float, Float, Float], set_curr_pos)?
        .verb("set_xy_worm", &[OptFloat, OptFloat], set_xy_worm)?
        .verb("set_z_worm_focus", &[OptFloat], set_z_worm_focus)
}

pub struct TrackerDevice {
    reactor: Reactor,
    commands: Subscriber,
    frames: TimestampedSubscriber,
    table: DispatchTable<TrackerCore>,
    core: TrackerCore,
}

impl TrackerDevice {
    pub fn new(
        reactor: Reactor,
        commands: Subscriber,
        frames: TimestampedSubscriber,
        mut core: TrackerCore,
    ) -> Result<Self, DeviceError> {
        core.cancel = Some(reactor.cancel_handle());
        core.reformat(frames.format());
        Ok(Self {
            reactor,
            commands,
            frames,
            table: command_table()?,
            core,
        })
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.reactor.cancel_handle()
    }

    pub fn run(mut self) -> Result<(), DeviceError> {
        info!("{} running", self.core.name());
        while self.core.running {
            let ready = match self.reactor.poll(
                &[self.commands.socket(), self.frames.socket()],
                Duration::from_secs(1),
            )? {
                Wake::Cancelled => break,
                Wake::Timeout => continue,
                Wake::Ready(ready) => ready,
            };
            if ready.contains(&0) {
                let log = self.core.log.clone();
                dispatch_pending(&self.commands, &self.table, &mut self.core, &log);
            }
            if ready.contains(&1) {
                let Some((timestamp, frame)) = self.frames.recv_last() else {
                    continue;
                };
                if let Err(e) = self.core.handle_frame(timestamp, frame) {
                    warn!("{}: frame dropped: {}", self.core.name(), e);
                }
            }
        }
        if self.core.tracker.is_tracking() {
            self.core.stop();
        }
        debug!("{} processed {} frames", self.core.name(), self.core.frames);
        info!("{} stopped", self.core.name());
        Ok(())
    }
}
