//! Device processes for the tracking microscope.
//!
//! Every device is a single-threaded reactor: it owns its sockets and an
//! explicit state struct, receives commands addressed to its name from the
//! bus, and talks to other devices only by publishing named commands. The
//! binaries in `src/bin` are thin wrappers that parse endpoints, build a
//! device and run it until shutdown.

pub mod bus_log;
pub mod camera;
pub mod cli;
pub mod client;
pub mod error;
pub mod forwarder;
pub mod hub;
pub mod logger;
pub mod stage;
pub mod tracker_device;
pub mod writer;

pub use bus_log::BusLog;
pub use error::DeviceError;

use shared::rpc::DispatchTable;
use shared::zmq::Subscriber;
use tracing::warn;

/// Dispatch every queued command on `commands` to `target`.
///
/// Malformed commands are logged locally and on the bus, then skipped.
/// Returns how many messages were consumed.
pub fn dispatch_pending<T>(
    commands: &Subscriber,
    table: &DispatchTable<T>,
    target: &mut T,
    log: &BusLog,
) -> usize {
    let mut handled = 0;
    while let Some(raw) = commands.try_recv_string() {
        handled += 1;
        if let Err(e) = table.dispatch(&raw, target) {
            warn!("{}: rejected '{}': {}", log.device(), raw, e);
            log.send(format!("rejected '{}': {}", raw, e));
        }
    }
    handled
}
