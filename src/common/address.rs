//! Address type for outbound connections

use std::net::{IpAddr, SocketAddr, ToSocketAddrs};

use crate::error::{Error, Result};

/// Connect target: an already-resolved socket address or a hostname with port
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Address {
    /// IP socket address (IP + port)
    Socket(SocketAddr),
    /// Domain name with port
    Domain(String, u16),
}

impl Address {
    /// Create from domain and port
    pub fn domain(domain: impl Into<String>, port: u16) -> Self {
        Address::Domain(domain.into(), port)
    }

    /// Create from IP and port
    pub fn ip_port(ip: IpAddr, port: u16) -> Self {
        Address::Socket(SocketAddr::new(ip, port))
    }

    /// Resolve to one socket address.
    ///
    /// Hostnames are looked up and only the first IPv4 candidate is kept;
    /// IPv6 results are skipped. Socket addresses pass through unchanged.
    pub fn resolve(&self) -> Result<SocketAddr> {
        match self {
            Address::Socket(addr) => Ok(*addr),
            Address::Domain(domain, port) => {
                let mut candidates = (domain.as_str(), *port).to_socket_addrs().map_err(|e| {
                    Error::Connection(format!("DNS lookup failed for {}: {}", domain, e))
                })?;

                candidates.find(SocketAddr::is_ipv4).ok_or_else(|| {
                    Error::Connection(format!("No IPv4 address found for {}", domain))
                })
            }
        }
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Address::Socket(addr) => write!(f, "{}", addr),
            Address::Domain(domain, port) => write!(f, "{}:{}", domain, port),
        }
    }
}
