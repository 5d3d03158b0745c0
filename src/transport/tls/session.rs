//! TLS session bound to its TCP stream

use std::io::{self, ErrorKind, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::time::Instant;

use rustls::ClientConnection;

pub(crate) struct TlsSession {
    conn: ClientConnection,
    stream: TcpStream,
}

fn invalid_data(err: rustls::Error) -> io::Error {
    io::Error::new(ErrorKind::InvalidData, err)
}

fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted
    )
}

impl TlsSession {
    pub fn new(conn: ClientConnection, stream: TcpStream) -> Self {
        Self { conn, stream }
    }

    pub fn connection(&self) -> &ClientConnection {
        &self.conn
    }

    pub fn stream(&self) -> &TcpStream {
        &self.stream
    }

    /// Drive the handshake to completion on the blocking stream
    pub fn handshake(&mut self) -> io::Result<()> {
        while self.conn.is_handshaking() {
            self.conn.complete_io(&mut self.stream)?;
        }
        Ok(())
    }

    /// Decrypt whatever records are queued on the socket without blocking
    /// and return the number of plaintext bytes ready to read
    pub fn buffered(&mut self) -> io::Result<usize> {
        self.stream.set_nonblocking(true)?;
        let pumped = self.pump();
        self.stream.set_nonblocking(false)?;
        pumped?;

        let state = self.conn.process_new_packets().map_err(invalid_data)?;
        Ok(state.plaintext_bytes_to_read())
    }

    fn pump(&mut self) -> io::Result<()> {
        while self.conn.wants_read() {
            match self.conn.read_tls(&mut self.stream) {
                Ok(0) => break,
                Ok(_) => {
                    self.conn.process_new_packets().map_err(invalid_data)?;
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Read plaintext, blocking on the socket read timeout when nothing is
    /// buffered.
    ///
    /// `Ok(0)` means the peer sent close_notify. A TCP close without
    /// close_notify surfaces as `UnexpectedEof`.
    pub fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            match self.conn.reader().read(buf) {
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == ErrorKind::WouldBlock => {}
                Err(e) => return Err(e),
            }

            self.conn.read_tls(&mut self.stream)?;
            self.conn.process_new_packets().map_err(invalid_data)?;

            // Post-handshake messages may need an answer
            while self.conn.wants_write() {
                self.conn.write_tls(&mut self.stream)?;
            }
        }
    }

    /// Encrypt and send all of `data`, retrying transient socket conditions
    /// until `deadline`
    pub fn write_all(&mut self, data: &[u8], deadline: Instant) -> io::Result<()> {
        let mut offset = 0;
        while offset < data.len() {
            offset += self.conn.writer().write(&data[offset..])?;
            self.flush(deadline)?;
        }
        Ok(())
    }

    fn flush(&mut self, deadline: Instant) -> io::Result<()> {
        while self.conn.wants_write() {
            match self.conn.write_tls(&mut self.stream) {
                Ok(_) => {}
                Err(e) if is_transient(&e) => {
                    if Instant::now() >= deadline {
                        return Err(io::Error::new(ErrorKind::TimedOut, "TLS write deadline expired"));
                    }
                }
                Err(e) => return Err(e),
            }
        }
        self.stream.flush()
    }

    /// Send close_notify and shut the socket down
    pub fn close(&mut self, deadline: Instant) -> io::Result<()> {
        self.conn.send_close_notify();
        let flushed = self.flush(deadline);
        let _ = self.stream.shutdown(Shutdown::Both);
        flushed
    }
}
