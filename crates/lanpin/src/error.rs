//! Error types for the lanpin proxy, discovery and pairing front.

use std::net::SocketAddr;
use thiserror::Error;

/// Errors that can occur in lanpin operations.
#[derive(Error, Debug)]
pub enum LanpinError {
    /// Certificate chain build or inspection failed.
    #[error(transparent)]
    Ca(#[from] lanpin_ca::CaError),

    /// TLS listener failed to bind.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// TLS material could not be loaded or accepted by rustls.
    #[error("tls error: {0}")]
    Tls(String),

    /// Local-network advertisement failed.
    #[error("discovery error: {0}")]
    Discovery(String),

    /// Pairing code could not be rendered.
    #[error("pairing code error: {0}")]
    Pairing(String),

    /// Configuration is invalid or missing required fields.
    #[error("config error: {0}")]
    Config(String),

    /// Companion client request failed.
    #[error("client error: {0}")]
    Client(String),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<mdns_sd::Error> for LanpinError {
    fn from(e: mdns_sd::Error) -> Self {
        Self::Discovery(e.to_string())
    }
}

impl From<rustls::Error> for LanpinError {
    fn from(e: rustls::Error) -> Self {
        Self::Tls(e.to_string())
    }
}

impl From<reqwest::Error> for LanpinError {
    fn from(e: reqwest::Error) -> Self {
        Self::Client(e.to_string())
    }
}
