//! Server certificate verifiers
//!
//! `ChainVerifier` checks the presented chain against the loaded CA store and
//! records the outcome as [`VerifyFlags`]. `InsecureVerifier` accepts any
//! chain but still checks handshake signatures.

use std::sync::Arc;

use parking_lot::Mutex;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::WebPkiServerVerifier;
use rustls::crypto::{CryptoProvider, WebPkiSupportedAlgorithms};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{CertificateError, DigitallySignedStruct, RootCertStore, SignatureScheme};
use x509_parser::public_key::PublicKey;

use crate::error::{Error, Result};

/// Certificate verification result, one bit per failure reason
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct VerifyFlags(u32);

impl VerifyFlags {
    pub const NOT_TRUSTED: Self = Self(1 << 0);
    pub const BAD_NAME: Self = Self(1 << 1);
    pub const EXPIRED: Self = Self(1 << 2);
    pub const REVOKED: Self = Self(1 << 3);
    pub const KEY_TOO_SHORT: Self = Self(1 << 4);
    pub const OTHER: Self = Self(1 << 5);

    const NAMES: [(Self, &'static str); 6] = [
        (Self::NOT_TRUSTED, "not-trusted"),
        (Self::BAD_NAME, "bad-name"),
        (Self::EXPIRED, "expired"),
        (Self::REVOKED, "revoked"),
        (Self::KEY_TOO_SHORT, "key-too-short"),
        (Self::OTHER, "other"),
    ];

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    fn from_certificate_error(err: &CertificateError) -> Self {
        match err {
            CertificateError::UnknownIssuer | CertificateError::BadSignature => Self::NOT_TRUSTED,
            CertificateError::NotValidForName | CertificateError::NotValidForNameContext { .. } => {
                Self::BAD_NAME
            }
            CertificateError::Expired
            | CertificateError::ExpiredContext { .. }
            | CertificateError::NotValidYet
            | CertificateError::NotValidYetContext { .. } => Self::EXPIRED,
            CertificateError::Revoked => Self::REVOKED,
            _ => Self::OTHER,
        }
    }
}

impl std::ops::BitOr for VerifyFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl std::fmt::Display for VerifyFlags {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_empty() {
            return write!(f, "ok");
        }

        let mut first = true;
        for (flag, name) in Self::NAMES {
            if self.contains(flag) {
                if !first {
                    write!(f, "|")?;
                }
                write!(f, "{}", name)?;
                first = false;
            }
        }
        Ok(())
    }
}

/// Bit length of an RSA public key modulus, `None` for other key types
pub(crate) fn rsa_modulus_bits(cert: &[u8]) -> Option<u32> {
    let (_, cert) = x509_parser::parse_x509_certificate(cert).ok()?;
    let PublicKey::RSA(rsa) = cert.public_key().parsed().ok()? else {
        return None;
    };

    let modulus = match rsa.modulus.iter().position(|&b| b != 0) {
        Some(start) => &rsa.modulus[start..],
        None => return Some(0),
    };

    let leading = modulus[0].leading_zeros();
    Some(modulus.len() as u32 * 8 - leading)
}

/// WebPKI verification against the loaded CA store, with flag recording
#[derive(Debug)]
pub(crate) struct ChainVerifier {
    inner: Arc<WebPkiServerVerifier>,
    min_rsa_bits: u32,
    flags: Mutex<VerifyFlags>,
}

impl ChainVerifier {
    pub fn new(roots: &RootCertStore, provider: Arc<CryptoProvider>, min_rsa_bits: u32) -> Result<Self> {
        let inner = WebPkiServerVerifier::builder_with_provider(Arc::new(roots.clone()), provider)
            .build()
            .map_err(|e| Error::Trust(format!("Cannot build certificate verifier: {}", e)))?;

        Ok(Self {
            inner,
            min_rsa_bits,
            flags: Mutex::new(VerifyFlags::empty()),
        })
    }

    /// Outcome of the last chain verification
    pub fn flags(&self) -> VerifyFlags {
        *self.flags.lock()
    }
}

impl ServerCertVerifier for ChainVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        let outcome = self
            .inner
            .verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now);

        let mut flags = match &outcome {
            Ok(_) => VerifyFlags::empty(),
            Err(rustls::Error::InvalidCertificate(err)) => VerifyFlags::from_certificate_error(err),
            Err(_) => VerifyFlags::OTHER,
        };

        if let Some(bits) = rsa_modulus_bits(end_entity) {
            if bits < self.min_rsa_bits {
                flags.insert(VerifyFlags::KEY_TOO_SHORT);
            }
        }

        *self.flags.lock() = flags;

        match outcome {
            Ok(verified) if flags.is_empty() => Ok(verified),
            Ok(_) => Err(rustls::Error::InvalidCertificate(
                CertificateError::ApplicationVerificationFailure,
            )),
            Err(e) => Err(e),
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}

/// Accepts any server certificate
#[derive(Debug)]
pub(crate) struct InsecureVerifier {
    algorithms: WebPkiSupportedAlgorithms,
}

impl InsecureVerifier {
    pub fn new(provider: &CryptoProvider) -> Self {
        Self {
            algorithms: provider.signature_verification_algorithms,
        }
    }
}

impl ServerCertVerifier for InsecureVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(message, cert, dss, &self.algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(message, cert, dss, &self.algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.algorithms.supported_schemes()
    }
}
