//! Log lines published to the logger device.

use shared::frame_channel::now_timestamp;
use shared::zmq::Publisher;
use std::fmt::Display;
use std::sync::Arc;

/// Name the logger device subscribes under.
pub const LOGGER: &str = "logger";

/// Publishes `"logger <unix-time> <device> <text>"` lines on the bus.
#[derive(Clone)]
pub struct BusLog {
    device: String,
    publisher: Arc<Publisher>,
}

impl BusLog {
    pub fn new(device: impl Into<String>, publisher: Arc<Publisher>) -> Self {
        Self {
            device: device.into(),
            publisher,
        }
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn line(timestamp: f64, device: &str, text: &str) -> String {
        format!("{} {:.6} {} {}", LOGGER, timestamp, device, text)
    }

    pub fn send(&self, text: impl Display) {
        let line = Self::line(now_timestamp(), &self.device, &text.to_string());
        self.publisher.send(line);
    }

    /// Log a structured record as compact JSON.
    pub fn send_json(&self, value: &serde_json::Value) {
        self.send(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_format() {
        assert_eq!(
            BusLog::line(1700000000.5, "stage", "executing: sx12"),
            "logger 1700000000.500000 stage executing: sx12"
        );
    }
}
