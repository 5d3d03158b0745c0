//! Plain TCP client

use std::io::{ErrorKind, Read, Write};
use std::net::{IpAddr, Shutdown, TcpStream};
use std::time::Duration;

use tracing::{debug, warn};

use crate::common::socket::{self, DEFAULT_WAIT};
use crate::common::{verbose, Address, Identity, Result};
use crate::config::ClientOptions;
use crate::error::Error;

use super::{Client, Delimited, DEFAULT_RECV_BUFFER_SIZE};

/// Byte-stream client over a raw TCP socket
pub struct PlainClient {
    identity: Identity,
    connect_timeout: Option<Duration>,
    io_timeout: Option<Duration>,
    chunk: usize,
    stream: Option<TcpStream>,
}

impl PlainClient {
    pub fn new() -> Self {
        Self {
            identity: Identity::new("PlainClient"),
            connect_timeout: None,
            io_timeout: None,
            chunk: DEFAULT_RECV_BUFFER_SIZE,
            stream: None,
        }
    }

    /// Build a client from loaded options
    pub fn from_options(options: &ClientOptions) -> Self {
        let mut client = Self::new();
        if let Some(id) = options.id {
            client.set_id(id);
        }
        client.set_verbose(options.verbose);
        client.set_timeout(options.connect_timeout(), options.io_timeout());
        client.set_receiving_buffer_size(options.recv_buffer_size);
        client
    }

    /// Raw descriptor of the connected socket, for introspection only
    #[cfg(unix)]
    pub fn socket_descriptor(&self) -> Option<std::os::unix::io::RawFd> {
        use std::os::unix::io::AsRawFd;
        self.stream.as_ref().map(AsRawFd::as_raw_fd)
    }
}

impl Default for PlainClient {
    fn default() -> Self {
        Self::new()
    }
}

impl Client for PlainClient {
    fn connect(&mut self, host: &str, port: u16) -> Result<()> {
        self.disconnect();

        let addr = Address::domain(host, port).resolve().map_err(|e| {
            warn!("[{}] {}", self.identity.name(), e);
            e
        })?;
        verbose!(self.identity, "Resolved {} to {}", host, addr.ip());

        self.connect_addr(addr.ip(), port)
    }

    fn connect_addr(&mut self, ip: IpAddr, port: u16) -> Result<()> {
        self.disconnect();

        let target = Address::ip_port(ip, port);
        let addr = target.resolve()?;
        verbose!(self.identity, "Connecting to {}", target);

        let stream = socket::open(addr, self.connect_timeout).map_err(|e| {
            warn!("[{}] Connect to {} failed: {}", self.identity.name(), addr, e);
            Error::Connection(format!("Connect to {} failed: {}", addr, e))
        })?;

        socket::apply_default_options(&stream, self.io_timeout, &self.identity);
        self.stream = Some(stream);

        debug!("[{}] Connected to {}", self.identity.name(), addr);
        Ok(())
    }

    fn disconnect(&mut self) {
        if let Some(stream) = self.stream.take() {
            if let Err(e) = stream.shutdown(Shutdown::Both) {
                verbose!(self.identity, "Shutdown: {}", e);
            }
            debug!("[{}] Disconnected", self.identity.name());
        }
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    fn write_data(&mut self, data: &[u8]) -> Result<()> {
        let stream = self.stream.as_mut().ok_or(Error::NotConnected)?;
        if data.is_empty() {
            return Err(Error::InvalidInput("Nothing to write".into()));
        }

        // A failed send leaves the connection up; the caller decides
        stream.write_all(data).map_err(|e| {
            warn!("[{}] Write of {} bytes failed: {}", self.identity.name(), data.len(), e);
            Error::from_io(e)
        })?;

        verbose!(self.identity, "Wrote {} bytes", data.len());
        Ok(())
    }

    fn read_data(&mut self, one_chunk: bool) -> Vec<u8> {
        let mut data = Vec::new();
        let Some(stream) = self.stream.as_ref() else {
            return data;
        };

        let wait = self.io_timeout.unwrap_or(DEFAULT_WAIT);
        let mut buf = vec![0u8; self.chunk];
        let mut reader = stream;

        loop {
            match socket::wait_readable(stream, wait, self.io_timeout) {
                Ok(true) => {}
                Ok(false) => {
                    verbose!(self.identity, "No more data after {} bytes", data.len());
                    break;
                }
                Err(e) => {
                    warn!("[{}] Readiness wait failed: {}", self.identity.name(), e);
                    break;
                }
            }

            let queued = socket::queued_bytes(stream).unwrap_or(0);
            let size = if queued > 0 { queued.min(self.chunk) } else { self.chunk };

            match reader.read(&mut buf[..size]) {
                Ok(0) => {
                    verbose!(self.identity, "Peer closed after {} bytes", data.len());
                    break;
                }
                Ok(n) => {
                    data.extend_from_slice(&buf[..n]);
                    if one_chunk {
                        break;
                    }
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => break,
                Err(e) => {
                    warn!("[{}] Read failed: {}", self.identity.name(), e);
                    break;
                }
            }
        }

        verbose!(self.identity, "Read {} bytes", data.len());
        data
    }

    fn read_data_until(&mut self, stop: u8, limit: usize) -> Delimited {
        let mut result = Delimited::default();
        let Some(stream) = self.stream.as_ref() else {
            return result;
        };

        let wait = self.io_timeout.unwrap_or(DEFAULT_WAIT);
        let mut reader = stream;
        let mut byte = [0u8; 1];

        while result.data.len() < limit {
            match socket::wait_readable(stream, wait, self.io_timeout) {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) => {
                    warn!("[{}] Readiness wait failed: {}", self.identity.name(), e);
                    break;
                }
            }

            match reader.read(&mut byte) {
                Ok(0) => break,
                Ok(_) if byte[0] == stop => {
                    result.found = true;
                    break;
                }
                Ok(_) => result.data.push(byte[0]),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => break,
                Err(e) => {
                    warn!("[{}] Read failed: {}", self.identity.name(), e);
                    break;
                }
            }
        }

        verbose!(
            self.identity,
            "Read {} bytes, stop byte {}",
            result.data.len(),
            if result.found { "found" } else { "not found" }
        );
        result
    }

    fn available_bytes(&mut self) -> usize {
        let Some(stream) = self.stream.as_ref() else {
            return 0;
        };

        match socket::queued_bytes(stream) {
            Ok(n) => n,
            Err(e) => {
                warn!("[{}] Querying queued bytes failed: {}", self.identity.name(), e);
                0
            }
        }
    }

    fn set_timeout(&mut self, connect: Duration, io: Duration) {
        self.connect_timeout = socket::configured(connect);
        self.io_timeout = socket::configured(io);
    }

    fn set_receiving_buffer_size(&mut self, size: usize) {
        self.chunk = size.max(1);
    }

    fn set_verbose(&mut self, verbose: bool) {
        self.identity.set_verbose(verbose);
    }

    fn set_id(&mut self, id: u32) {
        self.identity.set_id(id);
    }

    fn name(&self) -> &str {
        self.identity.name()
    }
}

impl Drop for PlainClient {
    fn drop(&mut self) {
        self.disconnect();
    }
}
