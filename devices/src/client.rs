//! Operator client: one synchronous hub request at a time.

use crate::bus_log::BusLog;
use crate::error::DeviceError;
use crate::forwarder::TERMINATE;
use shared::zmq::{Client, Publisher};
use std::io::BufRead;
use tracing::{info, warn};

pub const SHUTDOWN_REQUEST: &str = "DO shutdown";

pub struct OperatorClient {
    client: Client,
    control: Publisher,
    log: BusLog,
}

impl OperatorClient {
    /// `control` is the forwarder's control channel, `log` publishes to the bus.
    pub fn new(client: Client, control: Publisher, log: BusLog) -> Self {
        Self {
            client,
            control,
            log,
        }
    }

    /// Send one request to the hub and return its reply.
    ///
    /// After a `DO shutdown` reply the forwarder is told to terminate.
    pub fn process(&self, request: &str) -> Result<String, DeviceError> {
        let request = request.trim();
        self.log.send(format!("command sent: {}", request));
        let reply = self.client.request(request)?;
        self.log.send(format!("response received: {}", reply));
        if request == SHUTDOWN_REQUEST {
            info!("terminating forwarder");
            self.control.send(TERMINATE);
        }
        Ok(reply)
    }

    /// Forward operator lines until end of input or shutdown.
    pub fn run(&self, input: impl BufRead) -> Result<(), DeviceError> {
        for line in input.lines() {
            let line = line?;
            let request = line.trim();
            if request.is_empty() {
                continue;
            }
            match self.process(request) {
                Ok(reply) => println!("{}", reply),
                Err(e) => {
                    warn!("request '{}' failed: {}", request, e);
                    println!("error: {}", e);
                }
            }
            if request == SHUTDOWN_REQUEST {
                break;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::zmq::{Server, Subscriber};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_request_logged_and_shutdown_terminates() {
        let ctx = zmq::Context::new();
        let rep = ctx.socket(zmq::REP).unwrap();
        rep.bind("inproc://client-hub").unwrap();
        let server = Server::new(rep);
        let hub = thread::spawn(move || {
            for _ in 0..2 {
                let request = server.recv().unwrap().unwrap();
                server.send(&format!("ok: {}", request)).unwrap();
            }
        });

        let control_socket = ctx.socket(zmq::PUB).unwrap();
        control_socket.bind("inproc://client-control").unwrap();
        let bus_socket = ctx.socket(zmq::PUB).unwrap();
        bus_socket.bind("inproc://client-bus").unwrap();
        let control_tap = ctx.socket(zmq::SUB).unwrap();
        control_tap.connect("inproc://client-control").unwrap();
        let control_tap = Subscriber::new(control_tap);
        control_tap.subscribe("").unwrap();
        let bus_tap = ctx.socket(zmq::SUB).unwrap();
        bus_tap.connect("inproc://client-bus").unwrap();
        let bus_tap = Subscriber::new(bus_tap);
        bus_tap.subscribe("logger").unwrap();

        let req = ctx.socket(zmq::REQ).unwrap();
        req.connect("inproc://client-hub").unwrap();
        let client = Client::new(req);
        client.set_timeout(Duration::from_secs(2)).unwrap();
        let operator = OperatorClient::new(
            client,
            Publisher::new(control_socket),
            BusLog::new("client", Arc::new(Publisher::new(bus_socket))),
        );
        thread::sleep(Duration::from_millis(50));

        let input = "DO camera_start\n\nDO shutdown\nDO camera_stop\n";
        operator.run(input.as_bytes()).unwrap();
        hub.join().unwrap();
        thread::sleep(Duration::from_millis(50));

        assert_eq!(control_tap.recv_last_string().as_deref(), Some(TERMINATE));
        let mut logged = Vec::new();
        while let Some(line) = bus_tap.try_recv_string() {
            logged.push(line);
        }
        assert_eq!(logged.len(), 4);
        assert!(logged[0].ends_with("client command sent: DO camera_start"));
        assert!(logged[3].ends_with("client response received: ok: DO shutdown"));
    }

    #[test]
    fn test_next_request_after_timeout_gets_its_reply() {
        let ctx = zmq::Context::new();
        let rep = ctx.socket(zmq::REP).unwrap();
        rep.bind("inproc://client-slow-hub").unwrap();
        let server = Server::new(rep);
        let hub = thread::spawn(move || {
            let request = server.recv().unwrap().unwrap();
            thread::sleep(Duration::from_millis(300));
            server.send(&format!("ok: {}", request)).unwrap();
            let request = server.recv().unwrap().unwrap();
            server.send(&format!("ok: {}", request)).unwrap();
        });

        let control_socket = ctx.socket(zmq::PUB).unwrap();
        control_socket.bind("inproc://client-slow-control").unwrap();
        let bus_socket = ctx.socket(zmq::PUB).unwrap();
        bus_socket.bind("inproc://client-slow-bus").unwrap();
        let req = ctx.socket(zmq::REQ).unwrap();
        req.connect("inproc://client-slow-hub").unwrap();
        let client = Client::new(req);
        client.set_timeout(Duration::from_millis(100)).unwrap();
        let operator = OperatorClient::new(
            client,
            Publisher::new(control_socket),
            BusLog::new("client", Arc::new(Publisher::new(bus_socket))),
        );

        assert!(matches!(
            operator.process("DO stage_enable"),
            Err(DeviceError::Transport(shared::zmq::TransportError::Timeout(_)))
        ));
        thread::sleep(Duration::from_millis(300));
        assert_eq!(operator.process("GET name").unwrap(), "ok: GET name");
        hub.join().unwrap();
    }
}
