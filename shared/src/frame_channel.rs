//! Timestamped frame streams layered on [`Publisher`] / [`Subscriber`].

use crate::endpoint::Endpoint;
use crate::frame::{decode_timestamped, encode_timestamped, Frame, FrameError, FrameFormat};
use crate::zmq::{Publisher, Subscriber, TransportError};
use tracing::warn;

/// Current Unix time in seconds.
pub fn now_timestamp() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1e6
}

/// Sends frames of one declared format, each prefixed with its capture time.
pub struct TimestampedPublisher {
    publisher: Publisher,
    format: FrameFormat,
}

impl TimestampedPublisher {
    pub fn new(publisher: Publisher, format: FrameFormat) -> Self {
        Self { publisher, format }
    }

    pub fn from_endpoint(
        ctx: &zmq::Context,
        endpoint: &Endpoint,
        format: FrameFormat,
    ) -> Result<Self, TransportError> {
        Ok(Self::new(Publisher::from_endpoint(ctx, endpoint)?, format))
    }

    pub fn format(&self) -> &FrameFormat {
        &self.format
    }

    /// Change the declared format, e.g. after a camera region change.
    pub fn set_format(&mut self, format: FrameFormat) {
        self.format = format;
    }

    /// Publish `frame`. A missing timestamp is stamped with the current time.
    pub fn send(&self, frame: &Frame, timestamp: Option<f64>) -> Result<(), FrameError> {
        frame.check(&self.format)?;
        let ts = timestamp.unwrap_or_else(now_timestamp);
        self.publisher.send(encode_timestamped(ts, &frame.to_bytes()));
        Ok(())
    }
}

/// Receives timestamped frames with "latest wins" semantics.
pub struct TimestampedSubscriber {
    subscriber: Subscriber,
    format: FrameFormat,
}

impl TimestampedSubscriber {
    pub fn new(subscriber: Subscriber, format: FrameFormat) -> Self {
        Self { subscriber, format }
    }

    pub fn from_endpoint(
        ctx: &zmq::Context,
        endpoint: &Endpoint,
        format: FrameFormat,
    ) -> Result<Self, TransportError> {
        Ok(Self::new(
            Subscriber::from_endpoint(ctx, endpoint, &[])?,
            format,
        ))
    }

    pub fn format(&self) -> &FrameFormat {
        &self.format
    }

    pub fn set_format(&mut self, format: FrameFormat) {
        self.format = format;
    }

    pub fn socket(&self) -> &zmq::Socket {
        self.subscriber.socket()
    }

    /// Newest queued frame, older ones are discarded.
    ///
    /// Malformed payloads are logged and reported as "no frame".
    pub fn recv_last(&self) -> Option<(f64, Frame)> {
        let msg = self.subscriber.recv_last()?;
        match self.decode(&msg) {
            Ok(decoded) => Some(decoded),
            Err(e) => {
                warn!("dropping malformed frame: {}", e);
                None
            }
        }
    }

    fn decode(&self, msg: &[u8]) -> Result<(f64, Frame), FrameError> {
        let (ts, payload) = decode_timestamped(msg)?;
        Ok((ts, Frame::from_bytes(&self.format, payload)?))
    }
}
