//! ZeroMQ socket wrappers for the device bus.
//!
//! Three channel shapes cover every link between devices:
//! - [`Publisher`]: fire-and-forget fan-out (PUB).
//! - [`Subscriber`]: topic-filtered receive with a "latest wins" drain (SUB).
//! - [`Server`] / [`Client`]: strict one-at-a-time request/reply (REP/REQ).
//!
//! Wrappers either take a pre-configured socket (handy for `inproc://` tests)
//! or build one from an [`Endpoint`].

use crate::endpoint::Endpoint;
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

/// Errors that can occur during bus I/O.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("ZMQ socket error: {0}")]
    Socket(#[from] zmq::Error),
    #[error("message was not valid UTF-8 ({0} bytes)")]
    NotUtf8(usize),
    #[error("no reply within {0:?}")]
    Timeout(Duration),
}

fn open(
    ctx: &zmq::Context,
    kind: zmq::SocketType,
    endpoint: &Endpoint,
) -> Result<zmq::Socket, TransportError> {
    let socket = ctx.socket(kind)?;
    socket.set_linger(0)?;
    endpoint.attach(&socket)?;
    Ok(socket)
}

/// Best-effort fan-out sender.
///
/// Thread-safe: the camera and writer devices share one publisher between the
/// reactor thread and a worker.
pub struct Publisher {
    socket: Mutex<zmq::Socket>,
}

impl Publisher {
    /// Wrap a socket that is already bound or connected.
    pub fn new(socket: zmq::Socket) -> Self {
        Self {
            socket: Mutex::new(socket),
        }
    }

    pub fn from_endpoint(ctx: &zmq::Context, endpoint: &Endpoint) -> Result<Self, TransportError> {
        Ok(Self::new(open(ctx, zmq::PUB, endpoint)?))
    }

    /// Send one message without blocking.
    ///
    /// Delivery is not guaranteed and nothing is reported back to the caller;
    /// socket faults are logged.
    pub fn send(&self, msg: impl AsRef<[u8]>) {
        let Ok(socket) = self.socket.lock() else {
            warn!("publisher mutex poisoned, message dropped");
            return;
        };
        if let Err(e) = socket.send(msg.as_ref(), zmq::DONTWAIT) {
            if e != zmq::Error::EAGAIN {
                warn!("publish failed: {}", e);
            }
        }
    }
}

/// Topic-filtered receiver.
pub struct Subscriber {
    socket: zmq::Socket,
}

impl Subscriber {
    /// Wrap a socket that is already connected. Subscriptions can be added later.
    pub fn new(socket: zmq::Socket) -> Self {
        Self { socket }
    }

    /// Open a SUB socket on `endpoint` subscribed to each of `topics`.
    ///
    /// An empty topic list subscribes to everything.
    pub fn from_endpoint(
        ctx: &zmq::Context,
        endpoint: &Endpoint,
        topics: &[&str],
    ) -> Result<Self, TransportError> {
        let sub = Self::new(open(ctx, zmq::SUB, endpoint)?);
        if topics.is_empty() {
            sub.subscribe("")?;
        }
        for topic in topics {
            sub.subscribe(topic)?;
        }
        Ok(sub)
    }

    pub fn subscribe(&self, topic: &str) -> Result<(), TransportError> {
        Ok(self.socket.set_subscribe(topic.as_bytes())?)
    }

    pub fn unsubscribe(&self, topic: &str) -> Result<(), TransportError> {
        Ok(self.socket.set_unsubscribe(topic.as_bytes())?)
    }

    /// Underlying socket, for registering with a poller.
    pub fn socket(&self) -> &zmq::Socket {
        &self.socket
    }

    /// Blocking receive of one message.
    ///
    /// Returns `None` on a receive timeout or socket fault (logged).
    pub fn recv(&self) -> Option<Vec<u8>> {
        match self.socket.recv_bytes(0) {
            Ok(bytes) => Some(bytes),
            Err(zmq::Error::EAGAIN) => None,
            Err(e) => {
                warn!("receive failed: {}", e);
                None
            }
        }
    }

    pub fn recv_string(&self) -> Option<String> {
        self.recv().and_then(into_utf8)
    }

    /// Receive one queued message without blocking.
    pub fn try_recv(&self) -> Option<Vec<u8>> {
        match self.socket.recv_bytes(zmq::DONTWAIT) {
            Ok(bytes) => Some(bytes),
            Err(zmq::Error::EAGAIN) => None,
            Err(e) => {
                warn!("receive failed: {}", e);
                None
            }
        }
    }

    pub fn try_recv_string(&self) -> Option<String> {
        self.try_recv().and_then(into_utf8)
    }

    /// Drain every queued message and return only the newest.
    ///
    /// Returns `None` when nothing arrived since the previous call.
    pub fn recv_last(&self) -> Option<Vec<u8>> {
        let mut last = None;
        while let Some(msg) = self.try_recv() {
            last = Some(msg);
        }
        last
    }

    pub fn recv_last_string(&self) -> Option<String> {
        self.recv_last().and_then(into_utf8)
    }

    /// Discard everything queued. Returns how many messages were dropped.
    pub fn flush(&self) -> usize {
        let mut dropped = 0;
        while self.try_recv().is_some() {
            dropped += 1;
        }
        dropped
    }
}

fn into_utf8(bytes: Vec<u8>) -> Option<String> {
    match String::from_utf8(bytes) {
        Ok(text) => Some(text),
        Err(e) => {
            warn!("dropping non UTF-8 message ({} bytes)", e.as_bytes().len());
            None
        }
    }
}

/// Reply side of the operator link (REP).
pub struct Server {
    socket: zmq::Socket,
}

impl Server {
    pub fn new(socket: zmq::Socket) -> Self {
        Self { socket }
    }

    pub fn from_endpoint(ctx: &zmq::Context, endpoint: &Endpoint) -> Result<Self, TransportError> {
        Ok(Self::new(open(ctx, zmq::REP, endpoint)?))
    }

    pub fn socket(&self) -> &zmq::Socket {
        &self.socket
    }

    /// Blocking receive of the next request. A non UTF-8 request is consumed
    /// and reported as [`TransportError::NotUtf8`]; it still needs a reply.
    pub fn recv(&self) -> Result<Option<String>, TransportError> {
        match self.socket.recv_string(0) {
            Ok(Ok(text)) => Ok(Some(text)),
            Ok(Err(bytes)) => Err(TransportError::NotUtf8(bytes.len())),
            Err(zmq::Error::EAGAIN) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Reply to the request most recently returned by [`Server::recv`].
    pub fn send(&self, reply: &str) -> Result<(), TransportError> {
        Ok(self.socket.send(reply, 0)?)
    }
}

/// Request side of the operator link (REQ). One request in flight at a time.
pub struct Client {
    socket: zmq::Socket,
}

impl Client {
    pub fn new(socket: zmq::Socket) -> Self {
        Self { socket }
    }

    pub fn from_endpoint(ctx: &zmq::Context, endpoint: &Endpoint) -> Result<Self, TransportError> {
        Ok(Self::new(open(ctx, zmq::REQ, endpoint)?))
    }

    /// Bound how long [`Client::request`] waits for a reply.
    ///
    /// The socket is switched to relaxed, correlated REQ so a request that
    /// timed out does not block the next one; its late reply is discarded.
    pub fn set_timeout(&self, timeout: Duration) -> Result<(), TransportError> {
        let ms = i32::try_from(timeout.as_millis()).unwrap_or(i32::MAX);
        self.socket.set_req_relaxed(true)?;
        self.socket.set_req_correlate(true)?;
        Ok(self.socket.set_rcvtimeo(ms)?)
    }

    /// Send `request` and block for the reply.
    pub fn request(&self, request: &str) -> Result<String, TransportError> {
        self.socket.send(request, 0)?;
        match self.socket.recv_string(0) {
            Ok(Ok(text)) => Ok(text),
            Ok(Err(bytes)) => Err(TransportError::NotUtf8(bytes.len())),
            Err(zmq::Error::EAGAIN) => {
                let ms = self.socket.get_rcvtimeo().unwrap_or(-1);
                Err(TransportError::Timeout(Duration::from_millis(
                    ms.max(0) as u64
                )))
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn pub_sub_pair(ctx: &zmq::Context, address: &str) -> (Publisher, Subscriber) {
        let pub_socket = ctx.socket(zmq::PUB).unwrap();
        pub_socket.bind(address).unwrap();
        let publisher = Publisher::new(pub_socket);

        let sub_socket = ctx.socket(zmq::SUB).unwrap();
        sub_socket.connect(address).unwrap();
        let subscriber = Subscriber::new(sub_socket);

        (publisher, subscriber)
    }

    fn settle() {
        // Slow joiner: the subscription has to reach the publisher first
        thread::sleep(Duration::from_millis(100));
    }

    #[test]
    fn test_recv_last_returns_newest_of_burst() {
        let ctx = zmq::Context::new();
        let (publisher, subscriber) = pub_sub_pair(&ctx, "inproc://recv-last-burst");
        subscriber.subscribe("").unwrap();
        settle();

        for i in 1..=5 {
            publisher.send(format!("msg {}", i));
        }
        thread::sleep(Duration::from_millis(50));

        assert_eq!(subscriber.recv_last_string().as_deref(), Some("msg 5"));
        assert_eq!(subscriber.recv_last(), None);
    }

    #[test]
    fn test_recv_last_empty() {
        let ctx = zmq::Context::new();
        let (_publisher, subscriber) = pub_sub_pair(&ctx, "inproc://recv-last-empty");
        subscriber.subscribe("").unwrap();
        assert_eq!(subscriber.recv_last(), None);
        assert_eq!(subscriber.recv_last(), None);
    }

    #[test]
    fn test_topic_filtering() {
        let ctx = zmq::Context::new();
        let (publisher, subscriber) = pub_sub_pair(&ctx, "inproc://topic-filter");
        subscriber.subscribe("tracker ").unwrap();
        settle();

        publisher.send("stage movex 10");
        publisher.send("tracker start");
        publisher.send("logger hello");
        thread::sleep(Duration::from_millis(50));

        assert_eq!(subscriber.recv_string().as_deref(), Some("tracker start"));
        assert_eq!(subscriber.flush(), 0);
    }

    #[test]
    fn test_flush_counts_dropped() {
        let ctx = zmq::Context::new();
        let (publisher, subscriber) = pub_sub_pair(&ctx, "inproc://flush");
        subscriber.subscribe("").unwrap();
        settle();

        publisher.send("a");
        publisher.send("b");
        publisher.send("c");
        thread::sleep(Duration::from_millis(50));

        assert_eq!(subscriber.flush(), 3);
        assert_eq!(subscriber.recv_last(), None);
    }

    #[test]
    fn test_request_reply() {
        let ctx = zmq::Context::new();
        let rep = ctx.socket(zmq::REP).unwrap();
        rep.bind("inproc://req-rep").unwrap();
        let server = Server::new(rep);

        let req = ctx.socket(zmq::REQ).unwrap();
        req.connect("inproc://req-rep").unwrap();
        let client = Client::new(req);

        let handle = thread::spawn(move || {
            let request = server.recv().unwrap().unwrap();
            server.send(&format!("echo {}", request)).unwrap();
        });

        assert_eq!(client.request("DO ping").unwrap(), "echo DO ping");
        handle.join().unwrap();
    }

    #[test]
    fn test_request_timeout() {
        let ctx = zmq::Context::new();
        let rep = ctx.socket(zmq::REP).unwrap();
        rep.bind("inproc://req-timeout").unwrap();

        let req = ctx.socket(zmq::REQ).unwrap();
        req.connect("inproc://req-timeout").unwrap();
        let client = Client::new(req);
        client.set_timeout(Duration::from_millis(20)).unwrap();

        assert!(matches!(
            client.request("GET name"),
            Err(TransportError::Timeout(_))
        ));
    }

    #[test]
    fn test_client_usable_after_timeout() {
        let ctx = zmq::Context::new();
        let rep = ctx.socket(zmq::REP).unwrap();
        rep.bind("inproc://req-late").unwrap();
        let server = Server::new(rep);

        let req = ctx.socket(zmq::REQ).unwrap();
        req.connect("inproc://req-late").unwrap();
        let client = Client::new(req);
        client.set_timeout(Duration::from_millis(50)).unwrap();

        let handle = thread::spawn(move || {
            for _ in 0..2 {
                let request = server.recv().unwrap().unwrap();
                thread::sleep(Duration::from_millis(200));
                server.send(&format!("echo {}", request)).unwrap();
            }
        });

        assert!(matches!(
            client.request("GET first"),
            Err(TransportError::Timeout(_))
        ));
        client.set_timeout(Duration::from_secs(2)).unwrap();
        // the late "echo GET first" is dropped by correlation
        assert_eq!(client.request("GET second").unwrap(), "echo GET second");
        handle.join().unwrap();
    }
}
