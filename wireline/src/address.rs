//! Host/port addressing with lazy name resolution.
//!
//! An [`Address`] keeps the host as the caller gave it, name or literal.
//! Resolution happens at connect/bind/flush time and may fail; for datagram
//! transports a failed resolution discards only the affected entry.

use std::fmt;
use std::net::{SocketAddr, ToSocketAddrs};

use crate::error::Error;

/// A host and port. The host may be an unresolved name.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Address {
    pub host: String,
    pub port: u16,
}

impl Address {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Address {
            host: host.into(),
            port,
        }
    }

    /// Resolve to the first socket address for this host/port.
    ///
    /// Blocking; callers on the reactor thread accept this as the one
    /// acknowledged blocking point of the connect path.
    pub fn resolve(&self) -> Result<SocketAddr, Error> {
        let mut candidates = (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|_| Error::Resolution(self.clone()))?;
        candidates.next().ok_or(Error::Resolution(self.clone()))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl From<SocketAddr> for Address {
    fn from(addr: SocketAddr) -> Self {
        Address {
            host: addr.ip().to_string(),
            port: addr.port(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_resolves_without_dns() {
        let addr = Address::new("127.0.0.1", 8080);
        let resolved = addr.resolve().unwrap();
        assert_eq!(resolved, "127.0.0.1:8080".parse().unwrap());
    }

    #[test]
    fn display_includes_port() {
        assert_eq!(Address::new("example.com", 443).to_string(), "example.com:443");
    }

    #[test]
    fn from_socket_addr_round_trips() {
        let sa: SocketAddr = "10.0.0.1:53".parse().unwrap();
        let addr = Address::from(sa);
        assert_eq!(addr, Address::new("10.0.0.1", 53));
    }
}
