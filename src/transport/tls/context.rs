//! Crypto context group of a secure client
//!
//! Personalization, DRBG, crypto provider and the protocol session are built
//! together by [`CryptoContext::setup`] and dropped together. The TLS engine
//! takes randomness from a process-wide source; [`RandomScope`] routes it to
//! the owning instance's DRBG on the current thread.

use std::cell::RefCell;
use std::sync::Arc;

use parking_lot::Mutex;
use rand::rngs::OsRng;
use rand::RngCore;
use rustls::crypto::{CryptoProvider, GetRandomFailed, SecureRandom};
use rustls::ClientConfig;

use crate::crypto::{self, EntropySource, HmacDrbg, PERSONALIZATION_LEN};
use crate::error::{Error, Result};

use super::session::TlsSession;
use super::verifier::{ChainVerifier, InsecureVerifier};

type SharedDrbg = Arc<Mutex<HmacDrbg>>;

thread_local! {
    static ACTIVE: RefCell<Option<SharedDrbg>> = const { RefCell::new(None) };
}

#[derive(Debug)]
struct ScopedRandom;

impl SecureRandom for ScopedRandom {
    fn fill(&self, buf: &mut [u8]) -> std::result::Result<(), GetRandomFailed> {
        let active = ACTIVE.with(|slot| slot.borrow().clone());
        match active {
            Some(drbg) => drbg.lock().generate(buf).map_err(|_| GetRandomFailed),
            None => OsRng.try_fill_bytes(buf).map_err(|_| GetRandomFailed),
        }
    }
}

static SCOPED_RANDOM: ScopedRandom = ScopedRandom;

/// Routes TLS randomness to one DRBG until dropped
pub(crate) struct RandomScope {
    previous: Option<SharedDrbg>,
}

impl RandomScope {
    fn enter(drbg: &SharedDrbg) -> Self {
        let previous = ACTIVE.with(|slot| slot.replace(Some(Arc::clone(drbg))));
        Self { previous }
    }
}

impl Drop for RandomScope {
    fn drop(&mut self) {
        let previous = self.previous.take();
        ACTIVE.with(|slot| *slot.borrow_mut() = previous);
    }
}

/// Certificate verification used for one handshake
pub(crate) enum Verification {
    /// Chain must verify against the loaded CA store
    Required(Arc<ChainVerifier>),
    /// Any certificate is accepted
    None,
}

pub(crate) struct CryptoContext {
    personalization: [u8; PERSONALIZATION_LEN],
    drbg: SharedDrbg,
    provider: Arc<CryptoProvider>,
    pub session: Option<TlsSession>,
}

impl CryptoContext {
    pub fn setup() -> Result<Self> {
        let mut entropy = EntropySource::default();
        let personalization = crypto::personalization(&mut entropy)?;
        let drbg = HmacDrbg::instantiate(entropy, &personalization)?;

        let provider = CryptoProvider {
            secure_random: &SCOPED_RANDOM,
            ..rustls::crypto::ring::default_provider()
        };

        Ok(Self {
            personalization,
            drbg: Arc::new(Mutex::new(drbg)),
            provider: Arc::new(provider),
            session: None,
        })
    }

    pub fn personalization(&self) -> &[u8; PERSONALIZATION_LEN] {
        &self.personalization
    }

    pub fn provider(&self) -> Arc<CryptoProvider> {
        Arc::clone(&self.provider)
    }

    /// Install this context's DRBG as the TLS randomness source
    pub fn enter(&self) -> RandomScope {
        RandomScope::enter(&self.drbg)
    }

    /// Client-role configuration over a stream transport
    pub fn client_config(&self, verification: &Verification) -> Result<ClientConfig> {
        let builder = ClientConfig::builder_with_provider(self.provider())
            .with_safe_default_protocol_versions()
            .map_err(|e| Error::Crypto(format!("Protocol configuration failed: {}", e)))?;

        let config = match verification {
            Verification::Required(verifier) => builder
                .dangerous()
                .with_custom_certificate_verifier(verifier.clone())
                .with_no_client_auth(),
            Verification::None => builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(InsecureVerifier::new(&self.provider)))
                .with_no_client_auth(),
        };

        Ok(config)
    }
}
