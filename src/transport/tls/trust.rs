//! CA trust policy of the secure client
//!
//! The policy outlives the crypto context: rebuilding the context on
//! disconnect keeps the loaded anchors and a rejected chain stays rejected.

use rustls::pki_types::CertificateDer;
use rustls::RootCertStore;

use crate::error::{Error, Result};

/// How the next connect verifies the server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrustState {
    /// No chain supplied; connects without verification
    NoChain,
    /// Chain accepted; verification is required
    Loaded,
    /// Last supplied chain failed to parse; connect is refused
    Rejected,
}

impl std::fmt::Display for TrustState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrustState::NoChain => write!(f, "no chain"),
            TrustState::Loaded => write!(f, "chain loaded"),
            TrustState::Rejected => write!(f, "chain rejected"),
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct TrustPolicy {
    store: RootCertStore,
    loaded: bool,
    failed: bool,
}

impl Default for TrustPolicy {
    fn default() -> Self {
        Self {
            store: RootCertStore::empty(),
            loaded: false,
            failed: false,
        }
    }
}

impl TrustPolicy {
    pub fn state(&self) -> TrustState {
        match (self.loaded, self.failed) {
            (false, _) => TrustState::NoChain,
            (true, false) => TrustState::Loaded,
            (true, true) => TrustState::Rejected,
        }
    }

    pub fn store(&self) -> &RootCertStore {
        &self.store
    }

    /// Add every certificate of a PEM bundle.
    ///
    /// Succeeds when at least one certificate was accepted; returns how many.
    pub fn load_pem(&mut self, pem: &str) -> Result<usize> {
        self.loaded = true;

        let mut reader = pem.as_bytes();
        let mut accepted = 0;
        let mut skipped = 0;

        for item in rustls_pemfile::certs(&mut reader) {
            let added = item
                .map_err(|e| e.to_string())
                .and_then(|der| self.store.add(der).map_err(|e| e.to_string()));

            match added {
                Ok(()) => accepted += 1,
                Err(e) => {
                    tracing::trace!("Skipping PEM certificate: {}", e);
                    skipped += 1;
                }
            }
        }

        if accepted == 0 {
            self.failed = true;
            return Err(Error::Trust(format!(
                "No CA certificate accepted from PEM chain ({} rejected)",
                skipped
            )));
        }

        self.failed = false;
        Ok(accepted)
    }

    /// Add exactly one DER certificate
    pub fn load_der(&mut self, der: &[u8]) -> Result<()> {
        self.loaded = true;

        match self.store.add(CertificateDer::from(der.to_vec())) {
            Ok(()) => {
                self.failed = false;
                Ok(())
            }
            Err(e) => {
                self.failed = true;
                Err(Error::Trust(format!("DER CA certificate rejected: {}", e)))
            }
        }
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}
