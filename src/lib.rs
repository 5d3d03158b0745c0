//! dualnet - plain and TLS byte-stream clients behind one contract
//!
//! # Architecture
//!
//! ```text
//! Client trait (connect / write / read / available / disconnect)
//! ├── PlainClient   → TCP socket
//! └── SecureClient  → crypto context (DRBG, provider, session) → TCP socket
//! ```
//!
//! ## Core Principles
//!
//! - Upper-layer code is written once against `Client`
//! - Every call is synchronous and bounded by a timeout
//! - Every failure leaves the client disconnected and reusable
//!
//! ## Module Structure
//!
//! ```text
//! src/
//! ├── common/          # Address, client identity, socket glue
//! ├── transport/       # Client trait, PlainClient, SecureClient
//! ├── crypto/          # Entropy source and HMAC-DRBG
//! ├── config.rs        # JSON client options
//! └── error.rs         # Error types
//! ```

// Core types
pub mod common;
pub mod error;

// Clients
pub mod transport;

// Supporting modules
pub mod config;
pub mod crypto;

// Re-exports for convenience
pub use common::Address;
pub use config::ClientOptions;
pub use error::{Error, Result};
pub use transport::{Client, Delimited, PlainClient, SecureClient, TrustState, VerifyFlags};
