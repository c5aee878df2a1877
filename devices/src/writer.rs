//! Writer device: records a frame stream to chunk files while started.

use crate::bus_log::BusLog;
use crate::dispatch_pending;
use crate::error::DeviceError;
use shared::frame::{Frame, FrameFormat};
use shared::frame_channel::TimestampedSubscriber;
use shared::frame_writer::{
    timestamped_path, ChunkedFileWriter, FrameSink, FrameWriterHandle, WriterError,
};
use shared::reactor::{CancelHandle, Reactor, Wake};
use shared::rpc::{Arg, ArgKind, Args, DispatchTable, ProtocolError};
use shared::zmq::{Publisher, Subscriber};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Recording parameters.
#[derive(Debug, Clone)]
pub struct WriterSettings {
    pub directory: PathBuf,
    pub max_frames_per_file: usize,
    /// Frames the background worker may fall behind by.
    pub queue_size: usize,
}

struct Session {
    directory: PathBuf,
    handle: FrameWriterHandle,
}

pub struct WriterCore {
    settings: WriterSettings,
    format: FrameFormat,
    log: BusLog,
    cancel: Option<CancelHandle>,
    running: bool,
    session: Option<Session>,
    every_n: u64,
    received: u64,
    dropped: u64,
    led_states: BTreeMap<String, String>,
}

impl WriterCore {
    pub fn new(
        name: impl Into<String>,
        settings: WriterSettings,
        format: FrameFormat,
        publisher: Arc<Publisher>,
    ) -> Self {
        Self {
            log: BusLog::new(name, publisher),
            settings,
            format,
            cancel: None,
            running: true,
            session: None,
            every_n: 1,
            received: 0,
            dropped: 0,
            led_states: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        self.log.device()
    }

    pub fn directory(&self) -> &Path {
        &self.settings.directory
    }

    pub fn is_recording(&self) -> bool {
        self.session.is_some()
    }

    /// Directory of the session being recorded.
    pub fn session_directory(&self) -> Option<&Path> {
        self.session.as_ref().map(|s| s.directory.as_path())
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn every_n(&self) -> u64 {
        self.every_n
    }

    /// Open a new session directory. No-op while already recording.
    pub fn start(&mut self) -> Result<(), WriterError> {
        if self.session.is_some() {
            return Ok(());
        }
        let directory = timestamped_path(&self.settings.directory, self.log.device(), None);
        let mut sink = ChunkedFileWriter::create(
            &directory,
            self.format.clone(),
            self.settings.max_frames_per_file,
        )?;
        for (led, state) in &self.led_states {
            sink.annotate(led, state)?;
        }
        self.received = 0;
        self.dropped = 0;
        self.log
            .send(format!("recording to {}", directory.display()));
        self.session = Some(Session {
            directory,
            handle: FrameWriterHandle::spawn(sink, self.settings.queue_size),
        });
        Ok(())
    }

    /// Close the current session, waiting for queued frames to hit disk.
    pub fn stop(&mut self) -> Option<u64> {
        let session = self.session.take()?;
        let written = session.handle.wait_for_completion();
        info!(
            "{}: {} frames written to {}, {} dropped",
            self.log.device(),
            written,
            session.directory.display(),
            self.dropped
        );
        self.log.send(format!(
            "stopped recording: {} frames, {} dropped",
            written, self.dropped
        ));
        Some(written)
    }

    /// Store `frame` if recording and it falls on the `every_n` stride.
    pub fn handle_frame(&mut self, timestamp: f64, frame: Frame) {
        let Some(session) = &self.session else {
            return;
        };
        let index = self.received;
        self.received += 1;
        if index % self.every_n != 0 {
            return;
        }
        if let Err(e) = session.handle.write_frame(frame, timestamp) {
            self.dropped += 1;
            warn!("{}: frame dropped: {}", self.log.device(), e);
        }
    }
}

fn handler(e: WriterError) -> ProtocolError {
    ProtocolError::Handler(e.to_string())
}

fn start(writer: &mut WriterCore, _: &Args) -> Result<(), ProtocolError> {
    writer.start().map_err(handler)
}

fn stop(writer: &mut WriterCore, _: &Args) -> Result<(), ProtocolError> {
    writer.stop();
    Ok(())
}

fn shutdown(writer: &mut WriterCore, _: &Args) -> Result<(), ProtocolError> {
    writer.stop();
    writer.running = false;
    if let Some(cancel) = &writer.cancel {
        cancel.cancel();
    }
    Ok(())
}

fn set_directory(writer: &mut WriterCore, args: &Args) -> Result<(), ProtocolError> {
    writer.stop();
    writer.settings.directory = PathBuf::from(args.text(0)?);
    info!(
        "{}: directory now {}",
        writer.log.device(),
        writer.settings.directory.display()
    );
    Ok(())
}

fn apply_every_n(writer: &mut WriterCore, n: i64) -> Result<(), ProtocolError> {
    writer.every_n = u64::try_from(n)
        .ok()
        .filter(|n| *n > 0)
        .ok_or_else(|| ProtocolError::Handler(format!("every_n must be positive, got {}", n)))?;
    Ok(())
}

fn set_every_n(writer: &mut WriterCore, args: &Args) -> Result<(), ProtocolError> {
    apply_every_n(writer, args.int(0)?)
}

fn patch_every_n(writer: &mut WriterCore, value: Arg) -> Result<(), ProtocolError> {
    match value {
        Arg::Int(n) => apply_every_n(writer, n),
        other => Err(ProtocolError::Handler(format!("every_n: unexpected {:?}", other))),
    }
}

fn set_led_state(writer: &mut WriterCore, args: &Args) -> Result<(), ProtocolError> {
    let led = args.text(0)?.to_string();
    let state = args.text(1)?.to_string();
    if let Some(session) = &writer.session {
        session.handle.annotate(&led, &state).map_err(handler)?;
    }
    writer.led_states.insert(led, state);
    Ok(())
}

pub fn command_table() -> Result<DispatchTable<WriterCore>, ProtocolError> {
    use ArgKind::*;
    DispatchTable::addressed()
        .verb("start", &[], start)?
        .verb("stop", &[], stop)?
        .verb("shutdown", &[], shutdown)?
        .verb("set_directory", &[Rest], set_directory)?
        .verb("set_every_n", &[Int], set_every_n)?
        .verb("set_led_state", &[Text, Rest], set_led_state)?
        .property("every_n", Int, patch_every_n)
}

pub struct WriterDevice {
    reactor: Reactor,
    commands: Subscriber,
    frames: TimestampedSubscriber,
    table: DispatchTable<WriterCore>,
    core: WriterCore,
}

impl WriterDevice {
    pub fn new(
        reactor: Reactor,
        commands: Subscriber,
        frames: TimestampedSubscriber,
        mut core: WriterCore,
    ) -> Result<Self, DeviceError> {
        core.cancel = Some(reactor.cancel_handle());
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
                if let Some((timestamp, frame)) = self.frames.recv_last() {
                    self.core.handle_frame(timestamp, frame);
                }
            }
        }
        self.core.stop();
        info!("{} stopped", self.core.name());
        Ok(())
    }
}
