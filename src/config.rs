//! Configuration module for dualnet
//!
//! Client options are read from JSON; every field is optional.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::transport::{DEFAULT_MIN_RSA_KEY_SIZE, DEFAULT_RECV_BUFFER_SIZE};

/// Options applied to a freshly constructed client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientOptions {
    /// Numeric id appended to the client name in diagnostics
    #[serde(default)]
    pub id: Option<u32>,

    /// Emit step-by-step diagnostics
    #[serde(default)]
    pub verbose: bool,

    /// Connect timeout in seconds, 0 = not configured
    #[serde(default)]
    pub connect_timeout_secs: u64,

    /// I/O timeout in seconds, 0 = not configured
    #[serde(default)]
    pub io_timeout_secs: u64,

    /// Receive chunk size in bytes
    #[serde(default = "default_recv_buffer_size")]
    pub recv_buffer_size: usize,

    /// Log configuration
    #[serde(default)]
    pub log: LogConfig,

    /// Secure client settings
    #[serde(default)]
    pub tls: Option<TlsOptions>,
}

fn default_recv_buffer_size() -> usize {
    DEFAULT_RECV_BUFFER_SIZE
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            id: None,
            verbose: false,
            connect_timeout_secs: 0,
            io_timeout_secs: 0,
            recv_buffer_size: default_recv_buffer_size(),
            log: LogConfig::default(),
            tls: None,
        }
    }
}

impl ClientOptions {
    /// Load options from a JSON file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;
        Self::from_json(&content)
    }

    /// Parse options from JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_secs(self.io_timeout_secs)
    }
}

/// Trust settings for the secure client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsOptions {
    /// PEM bundle of CA certificates
    #[serde(default)]
    pub ca_chain_file: Option<PathBuf>,

    /// DER certificates added one by one after the PEM bundle
    #[serde(default)]
    pub ca_chain_der_files: Vec<PathBuf>,

    /// Smallest accepted RSA modulus of the server certificate, in bits
    #[serde(default = "default_min_rsa_key_size")]
    pub min_rsa_key_size: u32,
}

fn default_min_rsa_key_size() -> u32 {
    DEFAULT_MIN_RSA_KEY_SIZE
}

impl Default for TlsOptions {
    fn default() -> Self {
        Self {
            ca_chain_file: None,
            ca_chain_der_files: Vec::new(),
            min_rsa_key_size: default_min_rsa_key_size(),
        }
    }
}

/// Log configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}
