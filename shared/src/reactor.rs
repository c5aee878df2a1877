//! Single-threaded poll loop with an explicit cancellation signal.
//!
//! Every device waits on its sockets through [`Reactor::poll`]. Cancelling the
//! paired [`CancelHandle`] (from a `shutdown` verb, Ctrl-C, or another thread)
//! wakes the poll immediately instead of waiting for the next message.

use crate::zmq::TransportError;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};

static NEXT_REACTOR: AtomicUsize = AtomicUsize::new(0);

/// What woke the reactor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Wake {
    Cancelled,
    /// Indices (into the slice passed to `poll`) of sockets with input.
    Ready(Vec<usize>),
    Timeout,
}

/// Cloneable, thread-safe trigger for a [`Reactor`].
#[derive(Clone)]
pub struct CancelHandle {
    cancelled: Arc<AtomicBool>,
    signal: Arc<Mutex<zmq::Socket>>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        match self.signal.lock() {
            Ok(socket) => {
                if let Err(e) = socket.send("cancel", zmq::DONTWAIT) {
                    warn!("failed to wake reactor: {}", e);
                }
            }
            Err(_) => warn!("cancel socket mutex poisoned"),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

pub struct Reactor {
    wakeup: zmq::Socket,
    handle: CancelHandle,
}

impl Reactor {
    pub fn new(ctx: &zmq::Context) -> Result<Self, TransportError> {
        let address = format!(
            "inproc://reactor-cancel-{}",
            NEXT_REACTOR.fetch_add(1, Ordering::Relaxed)
        );
        let wakeup = ctx.socket(zmq::PULL)?;
        wakeup.set_linger(0)?;
        wakeup.bind(&address)?;

        let signal = ctx.socket(zmq::PUSH)?;
        signal.set_linger(0)?;
        signal.connect(&address)?;

        Ok(Self {
            wakeup,
            handle: CancelHandle {
                cancelled: Arc::new(AtomicBool::new(false)),
                signal: Arc::new(Mutex::new(signal)),
            },
        })
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.handle.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.handle.is_cancelled()
    }

    /// Wait until one of `sockets` is readable, the reactor is cancelled, or
    /// `timeout` passes.
    pub fn poll(&self, sockets: &[&zmq::Socket], timeout: Duration) -> Result<Wake, TransportError> {
        if self.is_cancelled() {
            return Ok(Wake::Cancelled);
        }

        let mut items: Vec<zmq::PollItem> = sockets
            .iter()
            .map(|s| s.as_poll_item(zmq::POLLIN))
            .collect();
        items.push(self.wakeup.as_poll_item(zmq::POLLIN));

        let timeout_ms = i64::try_from(timeout.as_millis()).unwrap_or(i64::MAX);
        match zmq::poll(&mut items, timeout_ms) {
            Ok(_) => {}
            Err(zmq::Error::EINTR) => {
                debug!("poll interrupted");
                return Ok(self.cancelled_or(Wake::Timeout));
            }
            Err(e) => return Err(e.into()),
        }

        if items[sockets.len()].is_readable() || self.is_cancelled() {
            // Drain so a stale signal never leaks into a later poll.
            while self.wakeup.recv_bytes(zmq::DONTWAIT).is_ok() {}
            return Ok(Wake::Cancelled);
        }

        let ready: Vec<usize> = items[..sockets.len()]
            .iter()
            .enumerate()
            .filter(|(_, item)| item.is_readable())
            .map(|(i, _)| i)
            .collect();
        if ready.is_empty() {
            Ok(Wake::Timeout)
        } else {
            Ok(Wake::Ready(ready))
        }
    }

    fn cancelled_or(&self, wake: Wake) -> Wake {
        if self.is_cancelled() {
            Wake::Cancelled
        } else {
            wake
        }
    }
}
