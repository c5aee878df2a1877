//! Feedback controllers for stage velocity.
//!
//! The PID controller turns the tracked object's pixel offset from the frame
//! center into signed stage velocities for the X and Y axes.

mod pid_controller;

pub use pid_controller::{PidController, PidGains};
