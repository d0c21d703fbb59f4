//! # lanpin
//!
//! Serve a local HTTP service over TLS under a name that pins its own
//! private root CA, then tell the local network about it.
//!
//! ```text
//! ChainBuilder ──► ProxyFront::bind ──► MdnsAnnouncer + pairing code ──► serve
//!   (lanpin-ca)        (fatal)               (best effort)
//! ```
//!
//! - [`server`]: TLS termination and reverse proxy to the backend
//! - [`discovery`]: `_https._tcp` advertisement carrying the identity
//! - [`pairing`]: QR code of `https://{identity}:{port}/`
//! - [`client`]: companion HTTPS client with client certificates
//! - [`startup`]: the ordered run above

pub mod cli;
pub mod client;
pub mod config;
pub mod discovery;
pub mod error;
pub mod pairing;
pub mod server;
pub mod startup;
pub mod tls;

pub use cli::run;
pub use config::Settings;
pub use error::LanpinError;

/// Result type for lanpin operations.
pub type Result<T> = std::result::Result<T, LanpinError>;
