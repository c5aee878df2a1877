//! Steerable relay between every publisher and every subscriber on the bus.

use crate::error::DeviceError;
use shared::endpoint::Endpoint;
use tracing::info;

/// Control frames understood by the relay.
pub const PAUSE: &str = "PAUSE";
pub const RESUME: &str = "RESUME";
pub const TERMINATE: &str = "TERMINATE";

/// XSUB/XPUB relay with a SUB control socket.
///
/// No filtering happens here; subscribers filter by name prefix.
pub struct Forwarder {
    inbound: zmq::Socket,
    outbound: zmq::Socket,
    control: zmq::Socket,
}

impl Forwarder {
    /// Wrap already attached sockets. `control` must be a SUB socket.
    pub fn new(
        inbound: zmq::Socket,
        outbound: zmq::Socket,
        control: zmq::Socket,
    ) -> Result<Self, DeviceError> {
        control.set_subscribe(b"")?;
        Ok(Self {
            inbound,
            outbound,
            control,
        })
    }

    pub fn from_endpoints(
        ctx: &zmq::Context,
        inbound: &Endpoint,
        outbound: &Endpoint,
        control: &Endpoint,
    ) -> Result<Self, DeviceError> {
        let open = |kind, endpoint: &Endpoint| -> Result<zmq::Socket, DeviceError> {
            let socket = ctx.socket(kind)?;
            socket.set_linger(0)?;
            endpoint.attach(&socket)?;
            Ok(socket)
        };
        info!(
            "forwarder: inbound {} outbound {} control {}",
            inbound, outbound, control
        );
        Self::new(
            open(zmq::XSUB, inbound)?,
            open(zmq::XPUB, outbound)?,
            open(zmq::SUB, control)?,
        )
    }

    /// Relay until a `TERMINATE` frame arrives on the control socket.
    pub fn run(mut self) -> Result<(), DeviceError> {
        info!("forwarder running");
        zmq::proxy_steerable(&mut self.inbound, &mut self.outbound, &mut self.control)?;
        info!("forwarder terminated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::zmq::{Publisher, Subscriber};
    use std::thread;
    use std::time::Duration;

    fn socket(ctx: &zmq::Context, kind: zmq::SocketType, bind: Option<&str>) -> zmq::Socket {
        let s = ctx.socket(kind).unwrap();
        s.set_linger(0).unwrap();
        if let Some(address) = bind {
            s.bind(address).unwrap();
        }
        s
    }

    #[test]
    fn test_relays_and_terminates() {
        let ctx = zmq::Context::new();
        let control_pub = socket(&ctx, zmq::PUB, Some("inproc://fwd-control"));

        let inbound = socket(&ctx, zmq::XSUB, Some("inproc://fwd-in"));
        let outbound = socket(&ctx, zmq::XPUB, Some("inproc://fwd-out"));
        let control = socket(&ctx, zmq::SUB, None);
        control.connect("inproc://fwd-control").unwrap();
        let forwarder = Forwarder::new(inbound, outbound, control).unwrap();
        let relay = thread::spawn(move || forwarder.run());

        let sender = socket(&ctx, zmq::PUB, None);
        sender.connect("inproc://fwd-in").unwrap();
        let sender = Publisher::new(sender);
        let receiver = socket(&ctx, zmq::SUB, None);
        receiver.connect("inproc://fwd-out").unwrap();
        let receiver = Subscriber::new(receiver);
        receiver.subscribe("stage ").unwrap();
        thread::sleep(Duration::from_millis(200));

        sender.send("camera start");
        sender.send("stage movex 12");
        thread::sleep(Duration::from_millis(100));
        assert_eq!(receiver.try_recv_string().as_deref(), Some("stage movex 12"));
        assert_eq!(receiver.try_recv_string(), None);

        control_pub.send(TERMINATE, 0).unwrap();
        assert!(relay.join().unwrap().is_ok());
    }
}
