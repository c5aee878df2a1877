//! Shared components for the scope device processes.
//!
//! This crate contains the bus transport, the text command protocol, the
//! frame codec and the image processing primitives that the tracker and the
//! device binaries build on.

pub mod camera_interface;
pub mod endpoint;
pub mod frame;
pub mod frame_channel;
pub mod frame_writer;
pub mod image_proc;
pub mod reactor;
pub mod rpc;
pub mod zmq;
