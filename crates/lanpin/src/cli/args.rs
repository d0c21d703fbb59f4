//! Command-line argument definitions using clap.

use clap::{Args, Parser, Subcommand};
use lanpin_ca::KeyAlgorithm;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use crate::config::{ClientAuth, DEFAULT_CONFIG_FILE};

/// Pin a private CA to a LAN endpoint.
///
/// Builds a root and leaf certificate, terminates TLS in front of a local
/// HTTP backend, announces it over mDNS and prints a pairing QR code.
#[derive(Parser, Debug)]
#[command(name = "lanpin")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Config file (or set LANPIN_CONFIG env var)
    #[arg(short, long, env = "LANPIN_CONFIG", global = true, default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    /// Certificate store directory, overrides the config file
    #[arg(long, env = "LANPIN_CERT_DIR", global = true)]
    pub cert_dir: Option<PathBuf>,

    /// Increase verbosity
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build the chain, start the TLS front, announce and print the pairing code
    Serve(ServeArgs),

    /// Build a fresh root and leaf into the certificate store
    Build(BuildArgs),

    /// Derive the identity from a fingerprint or from the stored root
    Identity(IdentityArgs),

    /// Print and write the pairing code for the stored root
    Pair(PairArgs),

    /// Send one HTTPS request with the client certificate
    Call(CallArgs),
}

// ============================================================================
// Serve
// ============================================================================

#[derive(Args, Debug, Default)]
pub struct ServeArgs {
    /// Address the TLS front binds on
    #[arg(long)]
    pub bind: Option<IpAddr>,

    /// TLS front port
    #[arg(long)]
    pub front_port: Option<u16>,

    /// Plain HTTP backend port on localhost
    #[arg(long)]
    pub backend_port: Option<u16>,

    /// Client certificate policy
    #[arg(long, value_enum)]
    pub client_auth: Option<ClientAuth>,

    /// Key algorithm for root and leaf
    #[arg(long)]
    pub algorithm: Option<KeyAlgorithm>,

    /// Where to write the pairing SVG
    #[arg(long)]
    pub qr_path: Option<PathBuf>,

    /// Do not announce over mDNS
    #[arg(long)]
    pub no_announce: bool,

    /// Do not write or print the pairing code
    #[arg(long)]
    pub no_qr: bool,
}

// ============================================================================
// Build
// ============================================================================

#[derive(Args, Debug)]
pub struct BuildArgs {
    /// Key algorithm for root and leaf
    #[arg(long)]
    pub algorithm: Option<KeyAlgorithm>,

    /// Print the result as JSON
    #[arg(long)]
    pub json: bool,
}

// ============================================================================
// Identity
// ============================================================================

#[derive(Args, Debug)]
pub struct IdentityArgs {
    /// Fingerprint text, e.g. "SHA256 Fingerprint=AA:BB:..."; defaults to the stored root
    pub fingerprint: Option<String>,
}

// ============================================================================
// Pair
// ============================================================================

#[derive(Args, Debug)]
pub struct PairArgs {
    /// Port encoded in the code; defaults to the configured front port
    #[arg(short, long)]
    pub port: Option<u16>,

    /// SVG output path; defaults to the configured qr_path
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

// ============================================================================
// Call
// ============================================================================

#[derive(Args, Debug)]
pub struct CallArgs {
    /// Server hostname, usually the identity
    pub host: String,

    /// Server port
    pub port: u16,

    /// Request path
    pub path: String,

    /// Request body
    pub body: Option<String>,

    /// HTTP method
    #[arg(short = 'X', long, default_value = "POST")]
    pub method: String,

    /// Connect to this address instead of resolving the host
    #[arg(long)]
    pub connect_to: Option<SocketAddr>,

    /// Client private key (default: <cert-dir>/client/user.key)
    #[arg(long)]
    pub key: Option<PathBuf>,

    /// Client certificate (default: <cert-dir>/client/user.crt)
    #[arg(long)]
    pub cert: Option<PathBuf>,

    /// CA used to verify the server (default: <cert-dir>/client/ca.crt)
    #[arg(long)]
    pub ca: Option<PathBuf>,

    /// Skip server certificate verification
    #[arg(long)]
    pub insecure: bool,
}
