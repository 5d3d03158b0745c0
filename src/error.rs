//! Error types for dualnet

use thiserror::Error;

/// Main error type for dualnet
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    /// Resolution failure, socket allocation failure, refused connect
    #[error("Connection error: {0}")]
    Connection(String),

    /// Trust chain parse failure or certificate verification failure
    #[error("Trust error: {0}")]
    Trust(String),

    #[error("Handshake error: {0}")]
    Handshake(String),

    #[error("Crypto error: {0}")]
    Crypto(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not connected")]
    NotConnected,

    #[error("Timeout")]
    Timeout,
}

impl Error {
    /// Classify an I/O error, folding deadline expiry into [`Error::Timeout`]
    pub fn from_io(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut => Error::Timeout,
            _ => Error::Io(err),
        }
    }
}

/// Result type alias for dualnet
pub type Result<T> = std::result::Result<T, Error>;
