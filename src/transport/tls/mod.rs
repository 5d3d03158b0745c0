//! TLS client
//!
//! Owns a crypto context group (DRBG, provider, session) that is rebuilt on
//! every disconnect, and a trust policy that decides between verified and
//! unverified connects.

mod context;
mod session;
mod trust;
mod verifier;

pub use trust::TrustState;
pub use verifier::VerifyFlags;

use std::io::ErrorKind;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rustls::pki_types::ServerName;
use rustls::ClientConnection;
use tracing::{debug, warn};

use crate::common::socket::{self, DEFAULT_WAIT};
use crate::common::{verbose, Address, Identity, Result};
use crate::config::ClientOptions;
use crate::error::Error;

use self::context::{CryptoContext, Verification};
use self::session::TlsSession;
use self::trust::TrustPolicy;
use self::verifier::ChainVerifier;

use super::{Client, Delimited, DEFAULT_RECV_BUFFER_SIZE};

/// Default minimum RSA modulus accepted from a verified server
pub const DEFAULT_MIN_RSA_KEY_SIZE: u32 = 2048;

/// Byte-stream client over TLS
pub struct SecureClient {
    identity: Identity,
    connect_timeout: Option<Duration>,
    io_timeout: Option<Duration>,
    chunk: usize,
    min_rsa_key_size: u32,
    trust: TrustPolicy,
    context: Option<CryptoContext>,
    last_flags: VerifyFlags,
}

impl SecureClient {
    pub fn new() -> Self {
        let mut client = Self {
            identity: Identity::new("SecureClient"),
            connect_timeout: None,
            io_timeout: None,
            chunk: DEFAULT_RECV_BUFFER_SIZE,
            min_rsa_key_size: DEFAULT_MIN_RSA_KEY_SIZE,
            trust: TrustPolicy::default(),
            context: None,
            last_flags: VerifyFlags::empty(),
        };
        client.rebuild_context();
        client
    }

    /// Build a client from loaded options, loading the configured CA chain
    pub fn from_options(options: &ClientOptions) -> Result<Self> {
        let mut client = Self::new();
        if let Some(id) = options.id {
            client.set_id(id);
        }
        client.set_verbose(options.verbose);
        client.set_timeout(options.connect_timeout(), options.io_timeout());
        client.set_receiving_buffer_size(options.recv_buffer_size);

        if let Some(tls) = &options.tls {
            client.set_min_rsa_key_size(tls.min_rsa_key_size);

            if let Some(path) = &tls.ca_chain_file {
                let pem = std::fs::read_to_string(path).map_err(|e| {
                    Error::Config(format!("Failed to read {}: {}", path.display(), e))
                })?;
                client.set_ca_certificate_chain_pem(&pem)?;
            }

            for path in &tls.ca_chain_der_files {
                let der = std::fs::read(path).map_err(|e| {
                    Error::Config(format!("Failed to read {}: {}", path.display(), e))
                })?;
                client.add_ca_certificate_to_chain_der(&der)?;
            }
        }

        Ok(client)
    }

    /// Add the certificates of a PEM bundle to the trust chain.
    ///
    /// Returns how many certificates were accepted. On failure the trust
    /// state becomes [`TrustState::Rejected`] and connects are refused.
    pub fn set_ca_certificate_chain_pem(&mut self, pem: &str) -> Result<usize> {
        self.ensure_context()?;

        match self.trust.load_pem(pem) {
            Ok(count) => {
                debug!("[{}] Loaded {} CA certificate(s) from PEM", self.identity.name(), count);
                Ok(count)
            }
            Err(e) => {
                warn!("[{}] {}", self.identity.name(), e);
                Err(e)
            }
        }
    }

    /// Add one DER certificate to the trust chain
    pub fn add_ca_certificate_to_chain_der(&mut self, der: &[u8]) -> Result<()> {
        self.ensure_context()?;

        match self.trust.load_der(der) {
            Ok(()) => {
                debug!("[{}] Added DER CA certificate", self.identity.name());
                Ok(())
            }
            Err(e) => {
                warn!("[{}] {}", self.identity.name(), e);
                Err(e)
            }
        }
    }

    /// Forget every loaded CA certificate; later connects are unverified
    pub fn clear_ca_certificate_chain(&mut self) {
        self.trust.clear();
        verbose!(self.identity, "CA chain cleared");
    }

    pub fn set_min_rsa_key_size(&mut self, bits: u32) {
        self.min_rsa_key_size = bits;
    }

    pub fn trust_state(&self) -> TrustState {
        self.trust.state()
    }

    /// Verification flags of the last verified handshake
    pub fn verify_flags(&self) -> VerifyFlags {
        self.last_flags
    }

    /// Negotiated protocol version of the current session
    pub fn protocol_version(&self) -> Option<rustls::ProtocolVersion> {
        self.session()
            .and_then(|session| session.connection().protocol_version())
    }

    /// Raw descriptor of the connected socket, for introspection only
    #[cfg(unix)]
    pub fn socket_descriptor(&self) -> Option<std::os::unix::io::RawFd> {
        use std::os::unix::io::AsRawFd;
        self.session().map(|session| session.stream().as_raw_fd())
    }

    fn session(&self) -> Option<&TlsSession> {
        self.context.as_ref().and_then(|context| context.session.as_ref())
    }

    fn ensure_context(&mut self) -> Result<()> {
        if self.context.is_none() {
            self.context = Some(CryptoContext::setup()?);
            verbose!(self.identity, "Crypto context ready");
        }
        Ok(())
    }

    fn rebuild_context(&mut self) {
        self.context = None;
        match CryptoContext::setup() {
            Ok(context) => self.context = Some(context),
            Err(e) => warn!("[{}] Crypto context setup failed: {}", self.identity.name(), e),
        }
    }

    fn wait(&self) -> Duration {
        self.io_timeout.unwrap_or(DEFAULT_WAIT)
    }

    /// Close any connection, refuse on a rejected chain, and make sure the
    /// crypto context exists
    fn prepare(&mut self) -> Result<()> {
        if self.is_connected() {
            self.disconnect();
        }
        self.last_flags = VerifyFlags::empty();

        if self.trust.state() == TrustState::Rejected {
            warn!("[{}] CA chain failed to parse, refusing to connect", self.identity.name());
            return Err(Error::Trust("CA chain failed to parse".into()));
        }

        self.ensure_context()
    }

    fn establish(&mut self, addr: SocketAddr, server_name: ServerName<'static>) -> Result<()> {
        match self.handshake(addr, server_name) {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!("[{}] Connect to {} failed: {}", self.identity.name(), addr, e);
                self.rebuild_context();
                Err(e)
            }
        }
    }

    fn handshake(&mut self, addr: SocketAddr, server_name: ServerName<'static>) -> Result<()> {
        let wait = self.wait();
        let context = self
            .context
            .as_mut()
            .ok_or_else(|| Error::Crypto("Crypto context unavailable".into()))?;

        verbose!(self.identity, "Connecting to {}", addr);
        let stream = socket::open(addr, self.connect_timeout)
            .map_err(|e| Error::Connection(format!("Connect to {} failed: {}", addr, e)))?;
        stream.set_read_timeout(Some(wait))?;
        stream.set_write_timeout(Some(wait))?;
        stream.set_nodelay(true)?;
        socket::enable_keepalive(&stream, &self.identity);

        let verification = match self.trust.state() {
            TrustState::Loaded => Verification::Required(Arc::new(ChainVerifier::new(
                self.trust.store(),
                context.provider(),
                self.min_rsa_key_size,
            )?)),
            _ => Verification::None,
        };
        verbose!(
            self.identity,
            "Verification mode {}",
            match verification {
                Verification::Required(_) => "REQUIRED",
                Verification::None => "NONE",
            }
        );

        let config = Arc::new(context.client_config(&verification)?);

        let _scope = context.enter();
        let conn = ClientConnection::new(config, server_name)
            .map_err(|e| Error::Handshake(e.to_string()))?;
        let mut session = TlsSession::new(conn, stream);

        let handshake = session.handshake();

        if let Verification::Required(verifier) = &verification {
            let flags = verifier.flags();
            self.last_flags = flags;
            if !flags.is_empty() {
                return Err(Error::Trust(format!("Certificate verification failed: {}", flags)));
            }
        }

        handshake.map_err(|e| Error::Handshake(e.to_string()))?;

        debug!(
            "[{}] Connected to {} ({:?}, {:?})",
            self.identity.name(),
            addr,
            session.connection().protocol_version(),
            session.connection().negotiated_cipher_suite().map(|suite| suite.suite())
        );
        context.session = Some(session);
        Ok(())
    }

    /// Tear down the session after a fatal I/O error
    fn abort(&mut self, what: &str, err: &std::io::Error) {
        warn!("[{}] {} failed: {}", self.identity.name(), what, err);
        self.disconnect();
    }
}

impl Default for SecureClient {
    fn default() -> Self {
        Self::new()
    }
}

impl Client for SecureClient {
    fn connect(&mut self, host: &str, port: u16) -> Result<()> {
        self.prepare()?;

        let server_name = ServerName::try_from(host.to_string())
            .map_err(|e| Error::InvalidAddress(format!("{}: {}", host, e)))?;

        let addr = Address::domain(host, port).resolve().map_err(|e| {
            warn!("[{}] {}", self.identity.name(), e);
            e
        })?;
        verbose!(self.identity, "Resolved {} to {}", host, addr.ip());

        self.establish(addr, server_name)
    }

    fn connect_addr(&mut self, ip: IpAddr, port: u16) -> Result<()> {
        self.prepare()?;

        let addr = Address::ip_port(ip, port).resolve()?;
        self.establish(addr, ServerName::IpAddress(ip.into()))
    }

    fn disconnect(&mut self) {
        let deadline = Instant::now() + self.wait();
        if let Some(mut session) = self.context.as_mut().and_then(|context| context.session.take()) {
            if let Err(e) = session.close(deadline) {
                verbose!(self.identity, "close_notify: {}", e);
            }
            debug!("[{}] Disconnected", self.identity.name());
        }

        self.rebuild_context();
    }

    fn is_connected(&self) -> bool {
        self.session().is_some()
    }

    fn write_data(&mut self, data: &[u8]) -> Result<()> {
        let deadline = Instant::now() + self.wait();
        let session = self
            .context
            .as_mut()
            .and_then(|context| context.session.as_mut())
            .ok_or(Error::NotConnected)?;
        if data.is_empty() {
            return Err(Error::InvalidInput("Nothing to write".into()));
        }

        match session.write_all(data, deadline) {
            Ok(()) => {
                verbose!(self.identity, "Wrote {} bytes", data.len());
                Ok(())
            }
            Err(e) => {
                self.abort("Write", &e);
                Err(Error::from_io(e))
            }
        }
    }

    fn read_data(&mut self, one_chunk: bool) -> Vec<u8> {
        let mut data = Vec::new();
        let mut buf = vec![0u8; self.chunk];

        loop {
            if !self.is_connected() {
                break;
            }
            let observed = self.available_bytes();
            let size = if observed > 0 && observed < self.chunk { observed } else { self.chunk };

            let Some(session) = self.context.as_mut().and_then(|context| context.session.as_mut())
            else {
                break;
            };

            match session.read(&mut buf[..size]) {
                Ok(0) => {
                    verbose!(self.identity, "Peer sent close_notify");
                    break;
                }
                Ok(n) => {
                    data.extend_from_slice(&buf[..n]);
                    if observed > 0 && n >= observed && observed <= self.chunk {
                        break;
                    }
                    if one_chunk {
                        break;
                    }
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => break,
                Err(e) => {
                    self.abort("Read", &e);
                    break;
                }
            }
        }

        verbose!(self.identity, "Read {} bytes", data.len());
        data
    }

    fn read_data_until(&mut self, stop: u8, limit: usize) -> Delimited {
        let mut result = Delimited::default();
        let mut byte = [0u8; 1];

        while result.data.len() < limit {
            let Some(session) = self.context.as_mut().and_then(|context| context.session.as_mut())
            else {
                break;
            };

            match session.read(&mut byte) {
                Ok(0) => break,
                Ok(_) if byte[0] == stop => {
                    result.found = true;
                    break;
                }
                Ok(_) => result.data.push(byte[0]),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => break,
                Err(e) => {
                    self.abort("Read", &e);
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
        let Some(session) = self.context.as_mut().and_then(|context| context.session.as_mut())
        else {
            return 0;
        };

        match session.buffered() {
            Ok(n) => n,
            Err(e) => {
                self.abort("Querying buffered bytes", &e);
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

impl Drop for SecureClient {
    fn drop(&mut self) {
        let deadline = Instant::now() + self.wait();
        if let Some(mut session) = self.context.as_mut().and_then(|context| context.session.take()) {
            let _ = session.close(deadline);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::{Ipv4Addr, TcpListener, TcpStream};
    use std::thread::{self, JoinHandle};

    use rcgen::{BasicConstraints, CertificateParams, DnType, IsCa, KeyPair, SanType};
    use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
    use rustls::{ServerConfig, ServerConnection, StreamOwned};

    const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

    const RSA_CA_PEM: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/testdata/rsa_ca.pem"));
    const RSA_LEAF_PEM: &str =
        include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/testdata/rsa_leaf.pem"));
    const RSA_LEAF_KEY: &str =
        include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/testdata/rsa_leaf.key"));

    type ServerStream = StreamOwned<ServerConnection, TcpStream>;

    struct Fixture {
        ca_pem: String,
        ca_der: Vec<u8>,
        server: Arc<ServerConfig>,
    }

    fn server_config(chain: Vec<CertificateDer<'static>>, key: PrivateKeyDer<'static>) -> Arc<ServerConfig> {
        let config = ServerConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
            .with_safe_default_protocol_versions()
            .unwrap()
            .with_no_client_auth()
            .with_single_cert(chain, key)
            .unwrap();
        Arc::new(config)
    }

    fn fixture(ip_san: bool) -> Fixture {
        let ca_key = KeyPair::generate().unwrap();
        let mut ca_params = CertificateParams::new(Vec::<String>::new()).unwrap();
        ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        ca_params.distinguished_name.push(DnType::CommonName, "dualnet test ca");
        let ca = ca_params.self_signed(&ca_key).unwrap();

        let leaf_key = KeyPair::generate().unwrap();
        let mut leaf_params = CertificateParams::new(vec!["localhost".to_string()]).unwrap();
        if ip_san {
            leaf_params.subject_alt_names.push(SanType::IpAddress(LOCALHOST));
        }
        let leaf = leaf_params.signed_by(&leaf_key, &ca, &ca_key).unwrap();

        let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(leaf_key.serialize_der()));
        Fixture {
            ca_pem: ca.pem(),
            ca_der: ca.der().to_vec(),
            server: server_config(vec![leaf.der().clone(), ca.der().clone()], key),
        }
    }

    fn rsa_server() -> Arc<ServerConfig> {
        let chain = rustls_pemfile::certs(&mut RSA_LEAF_PEM.as_bytes())
            .collect::<std::result::Result<Vec<_>, _>>()
            .unwrap();
        let key = rustls_pemfile::private_key(&mut RSA_LEAF_KEY.as_bytes()).unwrap().unwrap();
        server_config(chain, key)
    }

    fn serve<F>(config: Arc<ServerConfig>, handler: F) -> (u16, JoinHandle<()>)
    where
        F: FnOnce(&mut ServerStream) + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
            let conn = ServerConnection::new(config).unwrap();
            let mut tls = StreamOwned::new(conn, stream);
            handler(&mut tls);
        });
        (port, handle)
    }

    /// Answer one request with `reply`, then close_notify
    fn respond(reply: &'static [u8]) -> impl FnOnce(&mut ServerStream) + Send + 'static {
        move |tls| {
            let mut buf = [0u8; 256];
            let n = tls.read(&mut buf).unwrap();
            assert!(n > 0);
            tls.write_all(reply).unwrap();
            tls.conn.send_close_notify();
            tls.flush().unwrap();
        }
    }

    /// Complete the handshake if the client lets it; ignore the outcome
    fn expect_refusal(tls: &mut ServerStream) {
        let mut buf = [0u8; 16];
        let _ = tls.read(&mut buf);
    }

    fn client() -> SecureClient {
        let mut client = SecureClient::new();
        client.set_timeout(Duration::from_secs(2), Duration::from_millis(300));
        client
    }

    /// Finish the server side of the handshake, then drop the connection
    fn hang_up(tls: &mut ServerStream) {
        while tls.conn.is_handshaking() {
            tls.conn.complete_io(&mut tls.sock).unwrap();
        }
        let _ = tls.sock.shutdown(std::net::Shutdown::Both);
    }

    /// Call `read_data` until it comes back empty
    fn drain(client: &mut SecureClient) -> Vec<u8> {
        let mut received = Vec::new();
        for _ in 0..256 {
            let chunk = client.read_data(false);
            if chunk.is_empty() {
                break;
            }
            received.extend_from_slice(&chunk);
        }
        received
    }

    #[test]
    fn test_insecure_request_response() {
        let fixture = fixture(true);
        let (port, handle) = serve(fixture.server, respond(b"HTTP/1.0 200 OK\r\n\r\nhello"));

        let mut client = client();
        assert_eq!(client.trust_state(), TrustState::NoChain);
        client.connect_addr(LOCALHOST, port).unwrap();
        assert!(client.is_connected());
        assert!(client.protocol_version().is_some());

        client.write_data(b"GET / HTTP/1.0\r\n\r\n").unwrap();
        assert_eq!(client.read_data(false), b"HTTP/1.0 200 OK\r\n\r\nhello");
        assert_eq!(client.available_bytes(), 0);
        assert!(client.read_data(false).is_empty());

        client.disconnect();
        handle.join().unwrap();
    }

    #[test]
    fn test_verified_connect_with_pem_chain() {
        let fixture = fixture(true);
        let (port, handle) = serve(fixture.server, respond(b"pong"));

        let mut client = client();
        assert_eq!(client.set_ca_certificate_chain_pem(&fixture.ca_pem).unwrap(), 1);
        assert_eq!(client.trust_state(), TrustState::Loaded);

        client.connect("127.0.0.1", port).unwrap();
        assert!(client.verify_flags().is_empty());
        client.write_data(b"ping").unwrap();
        assert_eq!(client.read_data(false), b"pong");

        handle.join().unwrap();
    }

    #[test]
    fn test_verified_connect_with_der_chain() {
        let fixture = fixture(true);
        let (port, handle) = serve(fixture.server, respond(b"pong"));

        let mut client = client();
        client.add_ca_certificate_to_chain_der(&fixture.ca_der).unwrap();
        assert_eq!(client.trust_state(), TrustState::Loaded);

        client.connect_addr(LOCALHOST, port).unwrap();
        client.write_data(b"ping").unwrap();
        assert_eq!(client.read_data(false), b"pong");

        handle.join().unwrap();
    }

    #[test]
    fn test_unknown_ca_is_refused() {
        let trusted = fixture(true);
        let presented = fixture(true);
        let (port, handle) = serve(presented.server, expect_refusal);

        let mut client = client();
        client.set_ca_certificate_chain_pem(&trusted.ca_pem).unwrap();

        let err = client.connect_addr(LOCALHOST, port).unwrap_err();
        assert!(matches!(err, Error::Trust(_)));
        assert!(client.verify_flags().contains(VerifyFlags::NOT_TRUSTED));
        assert!(!client.is_connected());

        handle.join().unwrap();
    }

    #[test]
    fn test_name_mismatch_is_refused() {
        let fixture = fixture(false);
        let (port, handle) = serve(fixture.server, expect_refusal);

        let mut client = client();
        client.set_ca_certificate_chain_pem(&fixture.ca_pem).unwrap();

        assert!(matches!(client.connect_addr(LOCALHOST, port), Err(Error::Trust(_))));
        assert!(client.verify_flags().contains(VerifyFlags::BAD_NAME));

        handle.join().unwrap();
    }

    #[test]
    fn test_rejected_chain_opens_no_socket() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let mut client = client();
        assert!(client.set_ca_certificate_chain_pem("no certificates here").is_err());
        assert_eq!(client.trust_state(), TrustState::Rejected);

        assert!(matches!(client.connect_addr(LOCALHOST, port), Err(Error::Trust(_))));
        assert!(matches!(client.connect("127.0.0.1", port), Err(Error::Trust(_))));
        assert!(!client.is_connected());

        listener.set_nonblocking(true).unwrap();
        let accepted = listener.accept();
        assert_eq!(accepted.unwrap_err().kind(), ErrorKind::WouldBlock);
    }

    #[test]
    fn test_rejected_chain_recovers_after_reload() {
        let fixture = fixture(true);
        let (port, handle) = serve(fixture.server, respond(b"ok"));

        let mut client = client();
        assert!(client.add_ca_certificate_to_chain_der(b"garbage").is_err());
        assert_eq!(client.trust_state(), TrustState::Rejected);

        client.set_ca_certificate_chain_pem(&fixture.ca_pem).unwrap();
        assert_eq!(client.trust_state(), TrustState::Loaded);

        client.connect_addr(LOCALHOST, port).unwrap();
        client.write_data(b"x").unwrap();
        assert_eq!(client.read_data(false), b"ok");

        handle.join().unwrap();
    }

    #[test]
    fn test_min_rsa_key_size() {
        let (port, handle) = serve(rsa_server(), expect_refusal);

        let mut client = client();
        client.set_ca_certificate_chain_pem(RSA_CA_PEM).unwrap();
        client.set_min_rsa_key_size(4096);

        assert!(matches!(client.connect_addr(LOCALHOST, port), Err(Error::Trust(_))));
        assert!(client.verify_flags().contains(VerifyFlags::KEY_TOO_SHORT));
        handle.join().unwrap();

        let (port, handle) = serve(rsa_server(), respond(b"rsa"));
        client.set_min_rsa_key_size(DEFAULT_MIN_RSA_KEY_SIZE);
        client.connect_addr(LOCALHOST, port).unwrap();
        client.write_data(b"x").unwrap();
        assert_eq!(client.read_data(false), b"rsa");
        handle.join().unwrap();
    }

    #[test]
    fn test_disconnect_idempotent_and_reusable() {
        let fixture = fixture(true);
        let server = fixture.server;

        let mut client = client();
        client.set_ca_certificate_chain_pem(&fixture.ca_pem).unwrap();
        client.disconnect();
        client.disconnect();
        assert!(!client.is_connected());

        for reply in [&b"first"[..], &b"second"[..]] {
            let (port, handle) = serve(Arc::clone(&server), move |tls| {
                let mut buf = [0u8; 16];
                let _ = tls.read(&mut buf).unwrap();
                tls.write_all(reply).unwrap();
                tls.conn.send_close_notify();
                tls.flush().unwrap();
            });

            let built = *client.context.as_ref().unwrap().personalization();
            client.connect_addr(LOCALHOST, port).unwrap();
            let connected = *client.context.as_ref().unwrap().personalization();
            assert_eq!(connected, built);
            client.write_data(b"x").unwrap();
            assert_eq!(client.read_data(false), reply);

            client.disconnect();
            assert!(!client.is_connected());
            assert_eq!(client.trust_state(), TrustState::Loaded);
            assert_ne!(*client.context.as_ref().unwrap().personalization(), connected);

            handle.join().unwrap();
        }
    }

    #[test]
    fn test_read_spanning_many_records() {
        let fixture = fixture(true);
        let payload: Vec<u8> = (0..40_000u32).map(|i| (i % 251) as u8).collect();
        let sent = payload.clone();
        let (port, handle) = serve(fixture.server, move |tls| {
            let mut buf = [0u8; 16];
            let _ = tls.read(&mut buf).unwrap();
            tls.write_all(&sent).unwrap();
            tls.conn.send_close_notify();
            tls.flush().unwrap();
        });

        let mut client = client();
        client.connect_addr(LOCALHOST, port).unwrap();
        client.write_data(b"x").unwrap();

        assert_eq!(drain(&mut client), payload);
        assert!(client.is_connected());

        client.disconnect();
        handle.join().unwrap();
    }

    #[test]
    fn test_close_without_notify_disconnects() {
        let fixture = fixture(true);
        let (port, handle) = serve(fixture.server, |tls| {
            let mut buf = [0u8; 16];
            let _ = tls.read(&mut buf).unwrap();
            tls.write_all(&[0x17u8; 50_000]).unwrap();
            tls.flush().unwrap();
        });

        let mut client = client();
        client.connect_addr(LOCALHOST, port).unwrap();
        client.write_data(b"x").unwrap();

        assert_eq!(drain(&mut client).len(), 50_000);
        assert!(!client.is_connected());
        assert!(client.context.is_some());

        handle.join().unwrap();
    }

    #[test]
    fn test_peer_without_tls_fails_handshake() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
            let mut hello = [0u8; 512];
            let _ = stream.read(&mut hello).unwrap();
            stream.write_all(b"HTTP/1.1 400 Bad Request\r\n\r\n").unwrap();
            let _ = stream.read(&mut hello);
        });

        let mut client = client();
        let err = client.connect_addr(LOCALHOST, port).unwrap_err();
        assert!(matches!(err, Error::Handshake(_)), "unexpected error: {err}");
        assert!(!client.is_connected());
        assert!(client.verify_flags().is_empty());
        assert!(client.context.is_some());

        handle.join().unwrap();
    }

    #[test]
    fn test_failed_write_disconnects() {
        let fixture = fixture(true);
        let (port, handle) = serve(fixture.server, hang_up);

        let mut client = client();
        client.connect_addr(LOCALHOST, port).unwrap();
        handle.join().unwrap();

        let chunk = vec![0u8; 4096];
        let failure = (0..50).find_map(|_| {
            let written = client.write_data(&chunk);
            thread::sleep(Duration::from_millis(20));
            written.err()
        });
        assert!(matches!(failure, Some(Error::Io(_))));
        assert!(!client.is_connected());
        assert!(matches!(client.write_data(&chunk), Err(Error::NotConnected)));
    }

    #[test]
    fn test_secure_socket_keeps_alive() {
        let fixture = fixture(true);
        let (port, handle) = serve(fixture.server, respond(b"ok"));

        let mut client = client();
        client.connect_addr(LOCALHOST, port).unwrap();
        let stream = client.session().unwrap().stream();
        assert!(socket2::SockRef::from(stream).keepalive().unwrap());
        assert!(stream.nodelay().unwrap());

        client.write_data(b"x").unwrap();
        assert_eq!(client.read_data(false), b"ok");
        handle.join().unwrap();
    }

    #[test]
    fn test_rejected_chain_survives_disconnect() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let mut client = client();
        assert!(client.set_ca_certificate_chain_pem("no certificates here").is_err());
        let before = *client.context.as_ref().unwrap().personalization();

        client.disconnect();
        assert_ne!(*client.context.as_ref().unwrap().personalization(), before);
        assert_eq!(client.trust_state(), TrustState::Rejected);
        assert!(matches!(client.connect_addr(LOCALHOST, port), Err(Error::Trust(_))));

        listener.set_nonblocking(true).unwrap();
        let accepted = listener.accept();
        assert_eq!(accepted.unwrap_err().kind(), ErrorKind::WouldBlock);
    }

    #[test]
    fn test_read_until_stop_byte() {
        let fixture = fixture(true);
        let (port, handle) = serve(fixture.server, respond(b"line one\nrest"));

        let mut client = client();
        client.connect_addr(LOCALHOST, port).unwrap();
        client.write_data(b"x").unwrap();

        let line = client.read_data_until(b'\n', 64);
        assert!(line.found);
        assert_eq!(line.data, b"line one");

        let partial = client.read_data_until(b'\n', 2);
        assert!(!partial.found);
        assert_eq!(partial.data, b"re");

        let rest = client.read_data_until(b'\n', 64);
        assert!(!rest.found);
        assert_eq!(rest.data, b"st");

        handle.join().unwrap();
    }

    #[test]
    fn test_one_chunk_read() {
        let fixture = fixture(true);
        let (port, handle) = serve(fixture.server, respond(b"abcdefgh"));

        let mut client = client();
        client.set_receiving_buffer_size(3);
        client.connect_addr(LOCALHOST, port).unwrap();
        client.write_data(b"x").unwrap();

        assert_eq!(client.read_data(true), b"abc");
        assert_eq!(client.read_data(false), b"defgh");

        handle.join().unwrap();
    }

    #[test]
    fn test_write_requires_connection() {
        let mut client = client();
        assert!(matches!(client.write_data(b"x"), Err(Error::NotConnected)));
        assert!(client.read_data(false).is_empty());
        assert_eq!(client.available_bytes(), 0);
        assert!(!client.read_data_until(b'\n', 8).found);
    }

    #[test]
    fn test_connect_refused_leaves_client_reusable() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let mut client = client();
        assert!(matches!(client.connect_addr(LOCALHOST, port), Err(Error::Connection(_))));
        assert!(!client.is_connected());
        assert!(client.context.is_some());
    }

    #[test]
    fn test_clear_chain() {
        let fixture = fixture(true);
        let mut client = client();
        client.add_ca_certificate_to_chain_der(&fixture.ca_der).unwrap();
        client.clear_ca_certificate_chain();
        assert_eq!(client.trust_state(), TrustState::NoChain);
    }

    #[test]
    fn test_from_options_loads_chain() {
        let fixture = fixture(true);
        let dir = std::env::temp_dir().join(format!("dualnet-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let pem_path = dir.join("ca.pem");
        let der_path = dir.join("ca.der");
        std::fs::write(&pem_path, &fixture.ca_pem).unwrap();
        std::fs::write(&der_path, &fixture.ca_der).unwrap();

        let json = serde_json::json!({
            "id": 9,
            "io_timeout_secs": 1,
            "tls": {
                "ca_chain_file": pem_path,
                "ca_chain_der_files": [der_path],
                "min_rsa_key_size": 3072
            }
        });
        let options = ClientOptions::from_json(&json.to_string()).unwrap();

        let client = SecureClient::from_options(&options).unwrap();
        assert_eq!(client.name(), "SecureClient#9");
        assert_eq!(client.trust_state(), TrustState::Loaded);
        assert_eq!(client.min_rsa_key_size, 3072);
        assert_eq!(client.io_timeout, Some(Duration::from_secs(1)));

        let missing = ClientOptions::from_json(r#"{ "tls": { "ca_chain_file": "/nonexistent/ca.pem" } }"#)
            .unwrap();
        assert!(matches!(SecureClient::from_options(&missing), Err(Error::Config(_))));

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
