//! Frame persistence.
//!
//! [`ChunkedFileWriter`] appends timestamped frames to raw chunk files under a
//! per-session directory. [`FrameWriterHandle`] runs a writer on a worker
//! thread behind a bounded queue so the capture loop never blocks on disk.
//!
//! Layout of a session directory:
//! ```text
//! 2024_05_01_13_45_10_flircamera/
//!     session.json    format, chunk size, LED states
//!     000000.bin      records of [f64 timestamp][pixel bytes]
//!     000001.bin
//! ```

use crate::frame::{encode_timestamped, Frame, FrameError, FrameFormat};
use crossbeam_channel::{bounded, Sender, TrySendError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::mem;
use std::path::{Path, PathBuf};
use std::thread::JoinHandle;
use thiserror::Error;
use tracing::{debug, info, warn};

pub const DEFAULT_FRAMES_PER_FILE: usize = 3600;
pub const SESSION_FILE: &str = "session.json";

#[derive(Error, Debug)]
pub enum WriterError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error("failed to encode session metadata: {0}")]
    Metadata(#[from] serde_json::Error),
    #[error("frame writer queue full")]
    QueueFull,
    #[error("frame writer worker has shut down")]
    Disconnected,
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> WriterError + '_ {
    move |source| WriterError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// `<directory>/YYYY_MM_DD_HH_MM_SS_<stub>[.ext]` in local time.
pub fn timestamped_path(directory: &Path, stub: &str, ext: Option<&str>) -> PathBuf {
    let stamp = chrono::Local::now().format("%Y_%m_%d_%H_%M_%S");
    let name = match ext {
        Some(ext) => format!("{}_{}.{}", stamp, stub, ext),
        None => format!("{}_{}", stamp, stub),
    };
    directory.join(name)
}

/// Something that accepts frames for storage.
pub trait FrameSink: Send {
    fn append(&mut self, frame: &Frame, timestamp: f64) -> Result<(), WriterError>;

    /// Record an auxiliary state change, e.g. an LED switching on.
    fn annotate(&mut self, _key: &str, _value: &str) -> Result<(), WriterError> {
        Ok(())
    }

    /// Flush and close. Further appends are an error.
    fn close(&mut self) -> Result<(), WriterError>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub format: String,
    pub max_frames_per_file: usize,
    pub frames_written: u64,
    pub led_states: BTreeMap<String, String>,
}

/// Raw chunked writer. Rotates to a new chunk every `max_frames_per_file`.
pub struct ChunkedFileWriter {
    directory: PathBuf,
    format: FrameFormat,
    max_frames_per_file: usize,
    file: Option<BufWriter<File>>,
    file_index: usize,
    frames_in_file: usize,
    info: SessionInfo,
}

impl ChunkedFileWriter {
    /// Create `directory` (and parents) and write the session sidecar.
    pub fn create(
        directory: impl Into<PathBuf>,
        format: FrameFormat,
        max_frames_per_file: usize,
    ) -> Result<Self, WriterError> {
        let directory = directory.into();
        fs::create_dir_all(&directory).map_err(io_err(&directory))?;
        let max_frames_per_file = max_frames_per_file.max(1);
        let mut writer = Self {
            info: SessionInfo {
                format: format.to_string(),
                max_frames_per_file,
                frames_written: 0,
                led_states: BTreeMap::new(),
            },
            directory,
            format,
            max_frames_per_file,
            file: None,
            file_index: 0,
            frames_in_file: 0,
        };
        writer.write_session()?;
        info!("Recording to {}", writer.directory.display());
        Ok(writer)
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn chunk_path(&self, index: usize) -> PathBuf {
        self.directory.join(format!("{:06}.bin", index))
    }

    pub fn frames_written(&self) -> u64 {
        self.info.frames_written
    }

    fn write_session(&self) -> Result<(), WriterError> {
        let path = self.directory.join(SESSION_FILE);
        let json = serde_json::to_string_pretty(&self.info)?;
        fs::write(&path, json).map_err(io_err(&path))
    }

    fn current_file(&mut self) -> Result<&mut BufWriter<File>, WriterError> {
        if self.file.is_some() && self.frames_in_file >= self.max_frames_per_file {
            self.finish_chunk()?;
            self.file_index += 1;
        }
        if self.file.is_none() {
            let path = self.chunk_path(self.file_index);
            debug!("Opening chunk {}", path.display());
            let file = File::create(&path).map_err(io_err(&path))?;
            self.file = Some(BufWriter::new(file));
            self.frames_in_file = 0;
        }
        self.file.as_mut().ok_or(WriterError::Disconnected)
    }

    fn finish_chunk(&mut self) -> Result<(), WriterError> {
        if let Some(mut file) = self.file.take() {
            let path = self.chunk_path(self.file_index);
            file.flush().map_err(io_err(&path))?;
        }
        Ok(())
    }
}

impl FrameSink for ChunkedFileWriter {
    fn append(&mut self, frame: &Frame, timestamp: f64) -> Result<(), WriterError> {
        frame.check(&self.format)?;
        let record = encode_timestamped(timestamp, &frame.to_bytes());
        let path = self.chunk_path(self.file_index);
        self.current_file()?
            .write_all(&record)
            .map_err(io_err(&path))?;
        self.frames_in_file += 1;
        self.info.frames_written += 1;
        Ok(())
    }

    fn annotate(&mut self, key: &str, value: &str) -> Result<(), WriterError> {
        self.info.led_states.insert(key.to_string(), value.to_string());
        self.write_session()
    }

    fn close(&mut self) -> Result<(), WriterError> {
        self.finish_chunk()?;
        self.write_session()
    }
}

impl Drop for ChunkedFileWriter {
    fn drop(&mut self) {
        if let Err(e) = self.finish_chunk() {
            warn!("Failed to flush {}: {}", self.directory.display(), e);
        }
    }
}

/// Read every `(timestamp, frame)` record from one chunk file.
pub fn read_chunk(path: &Path, format: &FrameFormat) -> Result<Vec<(f64, Frame)>, WriterError> {
    let bytes = fs::read(path).map_err(io_err(path))?;
    let record_len = crate::frame::TIMESTAMP_BYTES + format.payload_len();
    if bytes.len() % record_len != 0 {
        return Err(FrameError::SizeMismatch {
            expected: record_len,
            actual: bytes.len() % record_len,
        }
        .into());
    }
    bytes
        .chunks_exact(record_len)
        .map(|record| {
            let (ts, payload) = crate::frame::decode_timestamped(record)?;
            Ok((ts, Frame::from_bytes(format, payload)?))
        })
        .collect()
}

enum WriteTask {
    Frame(Frame, f64),
    Annotate(String, String),
}

/// Runs a [`FrameSink`] on a background thread.
pub struct FrameWriterHandle {
    sender: Sender<WriteTask>,
    worker: Option<JoinHandle<u64>>,
}

impl FrameWriterHandle {
    pub fn spawn<S: FrameSink + 'static>(mut sink: S, buffer_size: usize) -> Self {
        let (sender, receiver) = bounded::<WriteTask>(buffer_size);

        let worker = std::thread::spawn(move || {
            debug!("Frame writer worker started");
            let mut written = 0u64;
            while let Ok(task) = receiver.recv() {
                let result = match task {
                    WriteTask::Frame(frame, ts) => {
                        sink.append(&frame, ts).map(|_| written += 1)
                    }
                    WriteTask::Annotate(key, value) => sink.annotate(&key, &value),
                };
                if let Err(e) = result {
                    warn!("Frame writer failed: {}", e);
                }
            }
            if let Err(e) = sink.close() {
                warn!("Frame writer failed to close: {}", e);
            }
            debug!("Frame writer worker shutting down after {} frames", written);
            written
        });

        Self {
            sender,
            worker: Some(worker),
        }
    }

    /// Queue a frame. Fails immediately if the queue is full.
    pub fn write_frame(&self, frame: Frame, timestamp: f64) -> Result<(), WriterError> {
        self.send_task(WriteTask::Frame(frame, timestamp))
    }

    pub fn annotate(&self, key: &str, value: &str) -> Result<(), WriterError> {
        self.send_task(WriteTask::Annotate(key.to_string(), value.to_string()))
    }

    fn send_task(&self, task: WriteTask) -> Result<(), WriterError> {
        match self.sender.try_send(task) {
            Ok(_) => Ok(()),
            Err(TrySendError::Full(_)) => Err(WriterError::QueueFull),
            Err(TrySendError::Disconnected(_)) => Err(WriterError::Disconnected),
        }
    }

    /// Drain the queue, close the sink and return how many frames were stored.
    pub fn wait_for_completion(mut self) -> u64 {
        let (sender, _) = bounded(0);
        mem::drop(mem::replace(&mut self.sender, sender));
        match self.worker.take().map(JoinHandle::join) {
            Some(Ok(written)) => written,
            Some(Err(e)) => {
                warn!("Frame writer worker panicked: {:?}", e);
                0
            }
            None => 0,
        }
    }
}

impl Drop for FrameWriterHandle {
    fn drop(&mut self) {
        if self.worker.is_some() {
            let (sender, _) = bounded(0);
            mem::drop(mem::replace(&mut self.sender, sender));
            if let Some(Err(e)) = self.worker.take().map(JoinHandle::join) {
                warn!("Frame writer worker panicked: {:?}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::PixelType;
    use ndarray::Array2;
    use tempfile::TempDir;

    fn format() -> FrameFormat {
        FrameFormat::new(PixelType::U8, 3, 4)
    }

    fn frame(value: u8) -> Frame {
        Frame::U8(Array2::from_elem((3, 4), value))
    }

    #[test]
    fn test_rotates_chunks() {
        let dir = TempDir::new().unwrap();
        let session = dir.path().join("session");
        let mut writer = ChunkedFileWriter::create(&session, format(), 2).unwrap();
        for i in 0..5u8 {
            writer.append(&frame(i), i as f64).unwrap();
        }
        writer.close().unwrap();

        assert_eq!(writer.frames_written(), 5);
        let first = read_chunk(&writer.chunk_path(0), &format()).unwrap();
        let last = read_chunk(&writer.chunk_path(2), &format()).unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first[1], (1.0, frame(1)));
        assert_eq!(last, vec![(4.0, frame(4))]);
        assert!(!writer.chunk_path(3).exists());
    }

    #[test]
    fn test_rejects_wrong_shape() {
        let dir = TempDir::new().unwrap();
        let mut writer = ChunkedFileWriter::create(dir.path(), format(), 10).unwrap();
        let wrong = Frame::U8(Array2::zeros((4, 3)));
        assert!(matches!(
            writer.append(&wrong, 0.0),
            Err(WriterError::Frame(_))
        ));
    }

    #[test]
    fn test_session_sidecar_records_leds() {
        let dir = TempDir::new().unwrap();
        let mut writer = ChunkedFileWriter::create(dir.path(), format(), 10).unwrap();
        writer.annotate("led_blue", "on").unwrap();
        writer.append(&frame(9), 1.5).unwrap();
        writer.close().unwrap();

        let text = fs::read_to_string(dir.path().join(SESSION_FILE)).unwrap();
        let info: SessionInfo = serde_json::from_str(&text).unwrap();
        assert_eq!(info.format, "UINT8_YX_3_4");
        assert_eq!(info.frames_written, 1);
        assert_eq!(info.led_states["led_blue"], "on");
    }

    #[test]
    fn test_background_handle_writes_everything() {
        let dir = TempDir::new().unwrap();
        let writer = ChunkedFileWriter::create(dir.path(), format(), 100).unwrap();
        let chunk = writer.chunk_path(0);
        let handle = FrameWriterHandle::spawn(writer, 16);

        for i in 0..10u8 {
            handle.write_frame(frame(i), i as f64).unwrap();
        }
        assert_eq!(handle.wait_for_completion(), 10);

        let records = read_chunk(&chunk, &format()).unwrap();
        assert_eq!(records.len(), 10);
        assert_eq!(records[9], (9.0, frame(9)));
    }

    #[test]
    fn test_timestamped_path_shape() {
        let path = timestamped_path(Path::new("/data"), "flircamera", Some("txt"));
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.ends_with("_flircamera.txt"));
        assert_eq!(name.split('_').count(), 7);
    }
}
