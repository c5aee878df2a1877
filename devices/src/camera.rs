//! Camera device: publishes timestamped frames from a [`FrameSource`].

use crate::bus_log::BusLog;
use crate::dispatch_pending;
use crate::error::DeviceError;
use crate::tracker_device::HUB;
use shared::camera_interface::{FrameSource, Region, Timing};
use shared::frame_channel::TimestampedPublisher;
use shared::reactor::{CancelHandle, Reactor, Wake};
use shared::rpc::{ArgKind, Args, DispatchTable, ProtocolError};
use shared::zmq::{Publisher, Subscriber};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Longest a single grab may block the command loop.
const MAX_GRAB_WAIT: Duration = Duration::from_millis(100);

pub struct CameraCore<S> {
    source: S,
    output: TimestampedPublisher,
    publisher: Arc<Publisher>,
    log: BusLog,
    cancel: Option<CancelHandle>,
    running: bool,
    published: u64,
}

impl<S: FrameSource> CameraCore<S> {
    pub fn new(
        name: impl Into<String>,
        source: S,
        output: TimestampedPublisher,
        publisher: Arc<Publisher>,
    ) -> Self {
        Self {
            log: BusLog::new(name, publisher.clone()),
            source,
            output,
            publisher,
            cancel: None,
            running: true,
            published: 0,
        }
    }

    pub fn name(&self) -> &str {
        self.log.device()
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn published(&self) -> u64 {
        self.published
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Report the current status to the hub and the logger.
    pub fn publish_status(&self) {
        match serde_json::to_string(&self.source.status()) {
            Ok(status) => {
                self.publisher
                    .send(format!("{} device_status {} {}", HUB, self.name(), status));
                self.log.send(status);
            }
            Err(e) => warn!("failed to encode camera status: {}", e),
        }
    }

    /// Wait up to `timeout` for one frame and publish it.
    ///
    /// Returns whether a frame went out.
    pub fn grab_and_publish(&mut self, timeout: Duration) -> Result<bool, DeviceError> {
        let Some((frame, timestamp)) = self.source.grab(timeout)? else {
            return Ok(false);
        };
        self.output.send(&frame, Some(timestamp))?;
        self.published += 1;
        Ok(true)
    }

    fn grab_timeout(&self) -> Duration {
        self.source.timing().frame_interval().min(MAX_GRAB_WAIT)
    }

    /// Apply a change that requires acquisition to be stopped.
    fn reconfigure(
        &mut self,
        apply: impl FnOnce(&mut S) -> Result<(), DeviceError>,
    ) -> Result<(), ProtocolError> {
        let was_running = self.source.is_running();
        if was_running {
            self.source.stop().map_err(handler)?;
        }
        let result = apply(&mut self.source);
        if was_running {
            self.source.start().map_err(handler)?;
        }
        result.map_err(handler)?;
        self.output.set_format(self.source.format());
        self.publish_status();
        Ok(())
    }
}

fn handler(e: impl Into<DeviceError>) -> ProtocolError {
    ProtocolError::Handler(e.into().to_string())
}

fn start<S: FrameSource>(camera: &mut CameraCore<S>, _: &Args) -> Result<(), ProtocolError> {
    if !camera.source.is_running() {
        camera.source.start().map_err(handler)?;
        info!("{} acquisition started", camera.name());
    }
    camera.publish_status();
    Ok(())
}

fn stop<S: FrameSource>(camera: &mut CameraCore<S>, _: &Args) -> Result<(), ProtocolError> {
    camera.source.stop().map_err(handler)?;
    camera.publish_status();
    Ok(())
}

fn shutdown<S: FrameSource>(camera: &mut CameraCore<S>, args: &Args) -> Result<(), ProtocolError> {
    stop(camera, args)?;
    camera.running = false;
    if let Some(cancel) = &camera.cancel {
        cancel.cancel();
    }
    Ok(())
}

fn usize_arg(args: &Args, index: usize) -> Result<usize, ProtocolError> {
    let value = args.int(index)?;
    usize::try_from(value)
        .map_err(|_| ProtocolError::Handler(format!("argument {} must be non-negative", index)))
}

fn set_region<S: FrameSource>(camera: &mut CameraCore<S>, args: &Args) -> Result<(), ProtocolError> {
    let region = Region {
        depth: usize_arg(args, 0)?,
        height: usize_arg(args, 1)?,
        width: usize_arg(args, 2)?,
        binning: usize_arg(args, 3)?,
        offset_y: usize_arg(args, 4)?,
        offset_x: usize_arg(args, 5)?,
    };
    camera.reconfigure(|source| Ok(source.set_region(region)?))
}

fn set_exposure_framerate<S: FrameSource>(
    camera: &mut CameraCore<S>,
    args: &Args,
) -> Result<(), ProtocolError> {
    let exposure_us = args.int(0)?;
    let frame_rate = args.float(1)?;
    let exposure = u64::try_from(exposure_us)
        .map(Duration::from_micros)
        .map_err(|_| ProtocolError::Handler(format!("negative exposure {}", exposure_us)))?;
    let timing = Timing {
        exposure,
        frame_rate,
    };
    camera.reconfigure(|source| Ok(source.set_timing(timing)?))
}

pub fn command_table<S: FrameSource>() -> Result<DispatchTable<CameraCore<S>>, ProtocolError> {
    use ArgKind::*;
    DispatchTable::addressed()
        .verb("start", &[], start)?
        .verb("stop", &[], stop)?
        .verb("shutdown", &[], shutdown)?
        .verb("set_region", &[Int, Int, Int, Int, Int, Int], set_region)?
        .verb("set_exposure_framerate", &[Int, Float], set_exposure_framerate)
}

pub struct CameraDevice<S> {
    reactor: Reactor,
    commands: Subscriber,
    table: DispatchTable<CameraCore<S>>,
    core: CameraCore<S>,
}

impl<S: FrameSource> CameraDevice<S> {
    pub fn new(
        reactor: Reactor,
        commands: Subscriber,
        mut core: CameraCore<S>,
    ) -> Result<Self, DeviceError> {
        core.cancel = Some(reactor.cancel_handle());
        let format = core.source.format();
        core.output.set_format(format);
        Ok(Self {
            reactor,
            commands,
            table: command_table()?,
            core,
        })
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.reactor.cancel_handle()
    }

    pub fn run(mut self) -> Result<(), DeviceError> {
        info!("{} running", self.core.name());
        self.core.publish_status();
        while self.core.running {
            let acquiring = self.core.source.is_running();
            let wait = if acquiring {
                Duration::ZERO
            } else {
                Duration::from_secs(1)
            };
            match self.reactor.poll(&[self.commands.socket()], wait)? {
                Wake::Cancelled => break,
                Wake::Ready(_) => {
                    let log = self.core.log.clone();
                    dispatch_pending(&self.commands, &self.table, &mut self.core, &log);
                }
                Wake::Timeout => {}
            }
            if self.core.running && self.core.source.is_running() {
                let timeout = self.core.grab_timeout();
                if let Err(e) = self.core.grab_and_publish(timeout) {
                    error!("{}: grab failed: {}", self.core.name(), e);
                    self.core.log.send(format!("grab failed: {}", e));
                }
            }
        }
        if let Err(e) = self.core.source.stop() {
            warn!("{}: failed to stop acquisition: {}", self.core.name(), e);
        }
        info!(
            "{} stopped after {} frames",
            self.core.name(),
            self.core.published
        );
        Ok(())
    }
}
