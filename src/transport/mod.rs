//! Transport Layer
//!
//! Responsibilities:
//! - One capability interface (`Client`) for outbound byte streams
//! - Two independent implementations: plain TCP and TLS
//! - NO protocol framing beyond stop-byte reads
//!
//! Every operation is synchronous and bounded by the configured I/O timeout,
//! or by a 10 second default wait when none was configured.

mod tcp;
mod tls;

pub use tcp::PlainClient;
pub use tls::{SecureClient, TrustState, VerifyFlags, DEFAULT_MIN_RSA_KEY_SIZE};

use std::net::IpAddr;
use std::time::Duration;

use crate::common::Result;

/// Receive chunk size used until `set_receiving_buffer_size` is called
pub const DEFAULT_RECV_BUFFER_SIZE: usize = 512;

/// Result of a stop-byte read
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Delimited {
    /// Bytes read before the stop byte (stop byte excluded)
    pub data: Vec<u8>,
    /// Whether the stop byte was seen
    pub found: bool,
}

/// Outbound stream client contract shared by the plain and secure variants
///
/// Failed operations leave the client in a well-defined state: a failed
/// connect always ends `Disconnected`, and a client can be reused for a new
/// connect after any failure.
pub trait Client {
    /// Resolve `host` (first IPv4 result) and connect.
    ///
    /// An existing connection is closed first.
    fn connect(&mut self, host: &str, port: u16) -> Result<()>;

    /// Connect to an already-resolved address
    fn connect_addr(&mut self, ip: IpAddr, port: u16) -> Result<()>;

    /// Close the connection. Safe to call when already disconnected.
    fn disconnect(&mut self);

    fn is_connected(&self) -> bool;

    /// Send the whole buffer
    fn write_data(&mut self, data: &[u8]) -> Result<()>;

    /// Read what the peer has sent.
    ///
    /// Stops on idle timeout, peer close or error and returns whatever was
    /// collected. With `one_chunk` at most one receive is performed.
    fn read_data(&mut self, one_chunk: bool) -> Vec<u8>;

    /// Read byte by byte until `stop` is seen or `limit` bytes are collected
    fn read_data_until(&mut self, stop: u8, limit: usize) -> Delimited;

    /// Bytes that can be read right now without blocking
    fn available_bytes(&mut self) -> usize;

    /// Connect and I/O timeouts; `Duration::ZERO` means not configured
    fn set_timeout(&mut self, connect: Duration, io: Duration);

    /// Per-receive chunk size, clamped to at least one byte
    fn set_receiving_buffer_size(&mut self, size: usize);

    fn set_verbose(&mut self, verbose: bool);

    /// Rename the client to `<Base>#<id>` in diagnostics
    fn set_id(&mut self, id: u32);

    fn name(&self) -> &str;
}
