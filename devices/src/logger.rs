//! Logger device: appends every `logger ...` bus line to a text file.

use crate::bus_log::LOGGER;
use crate::error::DeviceError;
use shared::frame_channel::now_timestamp;
use shared::frame_writer::timestamped_path;
use shared::reactor::{CancelHandle, Reactor, Wake};
use shared::rpc::{ArgKind, Args, DispatchTable, ProtocolError};
use shared::zmq::Subscriber;
use std::fs::{self, File, OpenOptions};
use std::io::{LineWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// One open log file.
pub struct LogFile {
    path: PathBuf,
    writer: LineWriter<File>,
}

impl LogFile {
    /// Create a new timestamped log file under `directory`.
    pub fn create(directory: &Path) -> Result<Self, DeviceError> {
        fs::create_dir_all(directory)?;
        let path = timestamped_path(directory, "log", Some("txt"));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        info!("logging to {}", path.display());
        Ok(Self {
            path,
            writer: LineWriter::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append `text` prefixed with the receive time.
    pub fn append(&mut self, text: &str) -> Result<(), DeviceError> {
        writeln!(self.writer, "{:.6} {}", now_timestamp(), text)?;
        Ok(())
    }
}

pub struct LoggerCore {
    directory: PathBuf,
    file: LogFile,
    cancel: Option<CancelHandle>,
    running: bool,
    lines: u64,
}

impl LoggerCore {
    pub fn new(directory: impl Into<PathBuf>) -> Result<Self, DeviceError> {
        let directory = directory.into();
        Ok(Self {
            file: LogFile::create(&directory)?,
            directory,
            cancel: None,
            running: true,
            lines: 0,
        })
    }

    pub fn file(&self) -> &LogFile {
        &self.file
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn lines(&self) -> u64 {
        self.lines
    }

    fn record(&mut self, text: &str) {
        match self.file.append(text) {
            Ok(()) => self.lines += 1,
            Err(e) => warn!("failed to write log line: {}", e),
        }
    }
}

fn shutdown(logger: &mut LoggerCore, _: &Args) -> Result<(), ProtocolError> {
    logger.running = false;
    if let Some(cancel) = &logger.cancel {
        cancel.cancel();
    }
    Ok(())
}

fn set_directory(logger: &mut LoggerCore, args: &Args) -> Result<(), ProtocolError> {
    let directory = PathBuf::from(args.text(0)?);
    let file = LogFile::create(&directory).map_err(|e| ProtocolError::Handler(e.to_string()))?;
    logger.directory = directory;
    logger.file = file;
    Ok(())
}

pub fn command_table() -> Result<DispatchTable<LoggerCore>, ProtocolError> {
    DispatchTable::addressed()
        .verb("shutdown", &[], shutdown)?
        .verb("set_directory", &[ArgKind::Rest], set_directory)
}

/// Handle one raw bus message. Anything that is not a logger command is a
/// line to record.
pub fn handle_message(table: &DispatchTable<LoggerCore>, logger: &mut LoggerCore, raw: &str) {
    let body = raw
        .strip_prefix(LOGGER)
        .map(str::trim_start)
        .unwrap_or(raw);
    match table.dispatch(raw, logger) {
        Ok(()) => debug!("logger command: {}", body),
        Err(ProtocolError::UnknownVerb(_)) | Err(ProtocolError::MalformedPatch(_)) => {
            logger.record(body)
        }
        Err(e) => {
            warn!("logger command '{}' failed: {}", body, e);
            logger.record(body);
        }
    }
}

pub struct LoggerDevice {
    reactor: Reactor,
    commands: Subscriber,
    table: DispatchTable<LoggerCore>,
    core: LoggerCore,
}

impl LoggerDevice {
    pub fn new(
        reactor: Reactor,
        commands: Subscriber,
        mut core: LoggerCore,
    ) -> Result<Self, DeviceError> {
        core.cancel = Some(reactor.cancel_handle());
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
        info!("logger running");
        while self.core.running {
            match self.reactor.poll(&[self.commands.socket()], Duration::from_secs(1))? {
                Wake::Cancelled => break,
                Wake::Timeout => continue,
                Wake::Ready(_) => {
                    while let Some(raw) = self.commands.try_recv_string() {
                        handle_message(&self.table, &mut self.core, &raw);
                        if !self.core.running {
                            break;
                        }
                    }
                }
            }
        }
        info!("logger stopped after {} lines", self.core.lines);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(path: &Path) -> Vec<String> {
        fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn test_records_bus_lines() {
        let dir = tempfile::tempdir().unwrap();
        let mut core = LoggerCore::new(dir.path()).unwrap();
        let table = command_table().unwrap();
        handle_message(&table, &mut core, "logger 1700000000.250000 stage executing: sx12");
        handle_message(&table, &mut core, "logger 1700000000.500000 hub shutdown");

        let written = lines(core.file().path());
        assert_eq!(written.len(), 2);
        let (stamp, text) = written[0].split_once(' ').unwrap();
        assert!(stamp.parse::<f64>().unwrap() > 1.6e9);
        assert_eq!(text, "1700000000.250000 stage executing: sx12");
        assert!(written[1].ends_with("hub shutdown"));
        assert!(core.is_running());
    }

    #[test]
    fn test_set_directory_rotates() {
        let dir = tempfile::tempdir().unwrap();
        let mut core = LoggerCore::new(dir.path()).unwrap();
        let table = command_table().unwrap();
        let first = core.file().path().to_path_buf();
        handle_message(&table, &mut core, "logger 1.0 client DO camera_start");

        let next = dir.path().join("session");
        handle_message(
            &table,
            &mut core,
            &format!("logger set_directory {}", next.display()),
        );
        handle_message(&table, &mut core, "logger 2.0 client DO camera_stop");

        assert!(core.file().path().starts_with(&next));
        assert_eq!(lines(&first).len(), 1);
        assert_eq!(lines(core.file().path()).len(), 1);
    }

    #[test]
    fn test_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let mut core = LoggerCore::new(dir.path()).unwrap();
        let table = command_table().unwrap();
        handle_message(&table, &mut core, "logger shutdown");
        assert!(!core.is_running());
        assert_eq!(core.lines(), 0);
    }
}
