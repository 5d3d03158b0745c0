//! Randomness for the secure client
//!
//! - EntropySource: OS entropy, counted for diagnostics
//! - HmacDrbg: per-instance generator seeded from entropy + personalization

mod drbg;

pub use drbg::HmacDrbg;

use rand::rngs::OsRng;
use rand::RngCore;

use crate::error::{Error, Result};

/// Size of the per-instance personalization value
pub const PERSONALIZATION_LEN: usize = 16;

/// Entropy accumulator backed by the operating system
#[derive(Debug, Default)]
pub struct EntropySource {
    gathered: u64,
}

impl EntropySource {
    /// Fill `dest` with OS entropy
    pub fn fill(&mut self, dest: &mut [u8]) -> Result<()> {
        OsRng
            .try_fill_bytes(dest)
            .map_err(|e| Error::Crypto(format!("Entropy source failed: {}", e)))?;
        self.gathered += dest.len() as u64;
        Ok(())
    }

    /// Total bytes drawn so far
    pub fn gathered(&self) -> u64 {
        self.gathered
    }
}

/// Generate a fresh personalization value
pub fn personalization(entropy: &mut EntropySource) -> Result<[u8; PERSONALIZATION_LEN]> {
    let mut value = [0u8; PERSONALIZATION_LEN];
    entropy.fill(&mut value)?;
    Ok(value)
}
