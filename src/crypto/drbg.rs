//! HMAC-DRBG (SHA-256) seeded from the entropy source
//!
//! Follows the HMAC_DRBG construction of NIST SP 800-90A without
//! prediction resistance. Every instance mixes a caller-supplied
//! personalization value into its initial state.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::debug;

use crate::error::{Error, Result};

use super::EntropySource;

type HmacSha256 = Hmac<Sha256>;

/// Output block size of the underlying HMAC
const OUT_LEN: usize = 32;

/// Entropy bytes drawn at instantiate and reseed
pub const SEED_LEN: usize = 32;

/// Nonce bytes drawn at instantiate
pub const NONCE_LEN: usize = 16;

/// Generate calls allowed before an automatic reseed
pub const RESEED_INTERVAL: u64 = 1 << 16;

/// Deterministic random bit generator owned by one crypto context
pub struct HmacDrbg {
    key: [u8; OUT_LEN],
    v: [u8; OUT_LEN],
    reseed_counter: u64,
    entropy: EntropySource,
}

impl HmacDrbg {
    /// Seed a new generator from `entropy` and the personalization value
    pub fn instantiate(mut entropy: EntropySource, personalization: &[u8]) -> Result<Self> {
        let mut seed = [0u8; SEED_LEN + NONCE_LEN];
        entropy.fill(&mut seed)?;
        Self::from_seed(entropy, &seed, personalization)
    }

    /// Seed a new generator from explicit seed material
    pub(crate) fn from_seed(
        entropy: EntropySource,
        seed: &[u8],
        personalization: &[u8],
    ) -> Result<Self> {
        let mut drbg = Self {
            key: [0x00; OUT_LEN],
            v: [0x01; OUT_LEN],
            reseed_counter: 1,
            entropy,
        };
        drbg.update(&[seed, personalization])?;
        Ok(drbg)
    }

    /// Mix fresh entropy and optional additional input into the state
    pub fn reseed(&mut self, additional: &[u8]) -> Result<()> {
        let mut fresh = [0u8; SEED_LEN];
        self.entropy.fill(&mut fresh)?;
        self.update(&[&fresh, additional])?;
        self.reseed_counter = 1;
        debug!("DRBG reseeded, {} entropy bytes drawn", self.entropy.gathered());
        Ok(())
    }

    /// Fill `out` with pseudo-random bytes
    pub fn generate(&mut self, out: &mut [u8]) -> Result<()> {
        if self.reseed_counter > RESEED_INTERVAL {
            self.reseed(&[])?;
        }

        for block in out.chunks_mut(OUT_LEN) {
            self.v = mac(&self.key, &[&self.v])?;
            block.copy_from_slice(&self.v[..block.len()]);
        }

        self.update(&[])?;
        self.reseed_counter += 1;
        Ok(())
    }

    /// Generate calls since the last (re)seed
    pub fn reseed_counter(&self) -> u64 {
        self.reseed_counter
    }

    fn update(&mut self, provided: &[&[u8]]) -> Result<()> {
        let has_input = provided.iter().any(|part| !part.is_empty());

        for separator in [0x00u8, 0x01] {
            if separator == 0x01 && !has_input {
                break;
            }

            let mut parts: Vec<&[u8]> = Vec::with_capacity(provided.len() + 2);
            parts.push(&self.v);
            parts.push(std::slice::from_ref(&separator));
            parts.extend_from_slice(provided);

            let key = mac(&self.key, &parts)?;
            self.key = key;
            self.v = mac(&self.key, &[&self.v])?;
        }

        Ok(())
    }
}

impl std::fmt::Debug for HmacDrbg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HmacDrbg")
            .field("reseed_counter", &self.reseed_counter)
            .finish_non_exhaustive()
    }
}

fn mac(key: &[u8], parts: &[&[u8]]) -> Result<[u8; OUT_LEN]> {
    let mut hmac = HmacSha256::new_from_slice(key)
        .map_err(|e| Error::Crypto(format!("HMAC key rejected: {}", e)))?;
    for part in parts {
        hmac.update(part);
    }
    Ok(hmac.finalize().into_bytes().into())
}
