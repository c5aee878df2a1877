use shared::camera_interface::CameraError;
use shared::endpoint::EndpointError;
use shared::frame::FrameError;
use shared::frame_writer::WriterError;
use shared::rpc::ProtocolError;
use shared::zmq::TransportError;
use thiserror::Error;
use tracker::TrackerError;

/// Errors that stop a device from starting or running.
///
/// Per-command failures never surface here; they are logged and the device
/// keeps running.
#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("endpoint error: {0}")]
    Endpoint(#[from] EndpointError),

    #[error("command table error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("camera error: {0}")]
    Camera(#[from] CameraError),

    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("writer error: {0}")]
    Writer(#[from] WriterError),

    #[error("tracker error: {0}")]
    Tracker(#[from] TrackerError),

    #[error("stage error: {0}")]
    Stage(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl From<zmq::Error> for DeviceError {
    fn from(e: zmq::Error) -> Self {
        DeviceError::Transport(TransportError::Socket(e))
    }
}
