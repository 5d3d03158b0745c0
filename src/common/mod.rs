//! Common types and glue shared by both clients
//!
//! - Address: hostname or resolved socket address
//! - Identity: client name and verbosity for diagnostics
//! - socket: connect, default options and readiness waits
//! - Error: unified error types

mod address;
mod identity;
pub(crate) mod socket;

pub use address::Address;
pub use identity::Identity;

// Re-export error types from crate root
pub use crate::error::{Error, Result};

/// Step-by-step diagnostics, emitted only when the client is verbose
macro_rules! verbose {
    ($identity:expr, $($arg:tt)+) => {
        if $identity.is_verbose() {
            tracing::debug!("[{}] {}", $identity.name(), format_args!($($arg)+));
        }
    };
}

pub(crate) use verbose;
