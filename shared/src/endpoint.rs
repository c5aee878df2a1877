//! Compact endpoint specs used on every device command line.
//!
//! | spec         | meaning                        |
//! |--------------|--------------------------------|
//! | `5000`       | bind all interfaces, port 5000 |
//! | `L5000`      | connect to `localhost:5000`    |
//! | `host:5000`  | connect to `host:5000`         |
//! | `*:5000`     | bind all interfaces, port 5000 |

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors produced while parsing an endpoint spec.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EndpointError {
    #[error("empty endpoint spec")]
    Empty,
    #[error("invalid port in endpoint spec '{0}'")]
    InvalidPort(String),
    #[error("missing host in endpoint spec '{0}'")]
    MissingHost(String),
}

/// Whether the socket owns the address or dials out to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Bind,
    Connect,
}

/// A resolved `(host, port, role)` triple.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub role: Role,
}

pub const WILDCARD: &str = "*";
pub const LOCALHOST: &str = "localhost";

impl Endpoint {
    pub fn bind(port: u16) -> Self {
        Self {
            host: WILDCARD.to_string(),
            port,
            role: Role::Bind,
        }
    }

    pub fn connect(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            role: Role::Connect,
        }
    }

    /// ZeroMQ address string, e.g. `tcp://*:5000` or `tcp://localhost:5000`.
    pub fn address(&self) -> String {
        format!("tcp://{}:{}", self.host, self.port)
    }

    /// Attach `socket` to this endpoint according to its role.
    pub fn attach(&self, socket: &zmq::Socket) -> Result<(), zmq::Error> {
        match self.role {
            Role::Bind => socket.bind(&self.address()),
            Role::Connect => socket.connect(&self.address()),
        }
    }
}

fn parse_port(text: &str, spec: &str) -> Result<u16, EndpointError> {
    text.parse::<u16>()
        .map_err(|_| EndpointError::InvalidPort(spec.to_string()))
}

impl FromStr for Endpoint {
    type Err = EndpointError;

    fn from_str(spec: &str) -> Result<Self, Self::Err> {
        let spec = spec.trim();
        if spec.is_empty() {
            return Err(EndpointError::Empty);
        }

        if let Some((host, port)) = spec.rsplit_once(':') {
            let port = parse_port(port, spec)?;
            return match host {
                "" => Err(EndpointError::MissingHost(spec.to_string())),
                WILDCARD => Ok(Endpoint::bind(port)),
                _ => Ok(Endpoint::connect(host, port)),
            };
        }

        if let Some(port) = spec.strip_prefix('L') {
            return Ok(Endpoint::connect(LOCALHOST, parse_port(port, spec)?));
        }

        Ok(Endpoint::bind(parse_port(spec, spec)?))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.role, self.host.as_str()) {
            (Role::Bind, _) => write!(f, "{}", self.port),
            (Role::Connect, LOCALHOST) => write!(f, "L{}", self.port),
            (Role::Connect, host) => write!(f, "{}:{}", host, self.port),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_port_binds_wildcard() {
        let ep: Endpoint = "5000".parse().unwrap();
        assert_eq!(ep, Endpoint::bind(5000));
        assert_eq!(ep.host, "*");
        assert_eq!(ep.address(), "tcp://*:5000");
    }

    #[test]
    fn test_l_prefix_connects_localhost() {
        let ep: Endpoint = "L5000".parse().unwrap();
        assert_eq!(ep.host, "localhost");
        assert_eq!(ep.port, 5000);
        assert_eq!(ep.role, Role::Connect);
        assert_eq!(ep.address(), "tcp://localhost:5000");
    }

    #[test]
    fn test_host_port_connects() {
        let ep: Endpoint = "host:5000".parse().unwrap();
        assert_eq!(ep, Endpoint::connect("host", 5000));
    }

    #[test]
    fn test_star_host_binds() {
        let ep: Endpoint = "*:5001".parse().unwrap();
        assert_eq!(ep, Endpoint::bind(5001));
    }

    #[test]
    fn test_invalid_specs() {
        assert_eq!("".parse::<Endpoint>(), Err(EndpointError::Empty));
        assert!(matches!(
            "Lxyz".parse::<Endpoint>(),
            Err(EndpointError::InvalidPort(_))
        ));
        assert!(matches!(
            "70000".parse::<Endpoint>(),
            Err(EndpointError::InvalidPort(_))
        ));
        assert!(matches!(
            ":5000".parse::<Endpoint>(),
            Err(EndpointError::MissingHost(_))
        ));
    }

    #[test]
    fn test_display_round_trips() {
        for spec in ["5000", "L5001", "camera-host:5002"] {
            let ep: Endpoint = spec.parse().unwrap();
            assert_eq!(ep.to_string(), spec);
        }
    }
}
