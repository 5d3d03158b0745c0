//! Socket primitives shared by the plain and secure clients
//!
//! Connect with an optional deadline, default socket options, and the
//! bounded readiness wait used before every blocking receive.

use std::io::{self, ErrorKind};
use std::net::{SocketAddr, TcpStream};
use std::time::Duration;

use socket2::{Domain, Protocol, SockRef, Socket, Type};
use tracing::warn;

use super::Identity;

/// Readiness wait used when no I/O timeout was configured
pub const DEFAULT_WAIT: Duration = Duration::from_secs(10);

/// Treat a zero duration as "not configured"
pub fn configured(timeout: Duration) -> Option<Duration> {
    if timeout.is_zero() {
        None
    } else {
        Some(timeout)
    }
}

/// Allocate a stream socket matching the address family and connect it
pub fn open(addr: SocketAddr, connect_timeout: Option<Duration>) -> io::Result<TcpStream> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;

    match connect_timeout {
        Some(timeout) => socket.connect_timeout(&addr.into(), timeout)?,
        None => socket.connect(&addr.into())?,
    }

    Ok(socket.into())
}

/// Apply I/O timeouts (when configured), TCP no-delay and keep-alive.
///
/// Failures are logged and otherwise ignored; the connection stays usable.
pub fn apply_default_options(stream: &TcpStream, io_timeout: Option<Duration>, identity: &Identity) {
    if let Some(timeout) = io_timeout {
        if let Err(e) = stream.set_read_timeout(Some(timeout)) {
            warn!("[{}] Error on setting socket option read timeout: {}", identity.name(), e);
        }
        if let Err(e) = stream.set_write_timeout(Some(timeout)) {
            warn!("[{}] Error on setting socket option write timeout: {}", identity.name(), e);
        }
    }

    if let Err(e) = stream.set_nodelay(true) {
        warn!("[{}] Error on setting socket option tcp no delay: {}", identity.name(), e);
    }

    enable_keepalive(stream, identity);
}

/// Turn on TCP keep-alive, logging a failure
pub fn enable_keepalive(stream: &TcpStream, identity: &Identity) {
    if let Err(e) = SockRef::from(stream).set_keepalive(true) {
        warn!("[{}] Error on setting socket option keep-alive: {}", identity.name(), e);
    }
}

/// Wait up to `wait` for the stream to become readable.
///
/// Returns `Ok(true)` when data is queued or the peer closed, `Ok(false)` on
/// timeout. The read timeout is reset to `restore` before returning.
pub fn wait_readable(stream: &TcpStream, wait: Duration, restore: Option<Duration>) -> io::Result<bool> {
    stream.set_read_timeout(Some(wait))?;

    let mut byte = [0u8; 1];
    let ready = loop {
        match stream.peek(&mut byte) {
            Ok(_) => break Ok(true),
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                break Ok(false)
            }
            Err(e) => break Err(e),
        }
    };

    stream.set_read_timeout(restore)?;
    ready
}

/// Count bytes queued for reading without consuming them
#[cfg(unix)]
pub fn queued_bytes(stream: &TcpStream) -> io::Result<usize> {
    let queued = rustix::io::ioctl_fionread(stream).map_err(io::Error::from)?;
    Ok(usize::try_from(queued).unwrap_or(usize::MAX))
}

/// Count bytes queued for reading without consuming them.
///
/// Without FIONREAD the count is taken by peeking, so it never exceeds the
/// peek buffer.
#[cfg(not(unix))]
pub fn queued_bytes(stream: &TcpStream) -> io::Result<usize> {
    let mut window = vec![0u8; 64 * 1024];

    stream.set_nonblocking(true)?;

    let queued = loop {
        match stream.peek(&mut window) {
            Ok(n) => break Ok(n),
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) if e.kind() == ErrorKind::WouldBlock => break Ok(0),
            Err(e) => break Err(e),
        }
    };

    stream.set_nonblocking(false)?;
    queued
}
