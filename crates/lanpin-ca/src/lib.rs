//! # lanpin-ca
//!
//! Private certificate authority bootstrap for lanpin.
//!
//! ## Chain
//!
//! ```text
//! ROOT (self-signed, pinned by clients, never publicly trusted)
//!   │
//!   └── LEAF  CN = <first 32 hex of sha256(root)>.self-signed
//!             served by the TLS proxy front
//! ```
//!
//! The leaf's common name is derived from the root's fingerprint, so the
//! name a phone scans from the pairing code is also a pin on the root that
//! signed the certificate it will be shown.
//!
//! ## Example
//!
//! ```rust,ignore
//! use lanpin_ca::{CertStore, ChainBuilder};
//!
//! let material = ChainBuilder::new(CertStore::new("certs")).build()?;
//! println!("serving as {}", material.identity);
//! ```

mod builder;
mod error;
mod identity;
mod leaf;
mod root;
mod store;
mod verify;

pub use builder::{BuildStep, ChainBuilder, ChainMaterial};
pub use error::{CaError, Result};
pub use identity::{derive_identity, Fingerprint, Identity, IDENTITY_HEX_LEN, IDENTITY_SUFFIX};
pub use leaf::{LeafCertificate, LeafCertificateRequest};
pub use root::RootAuthority;
pub use store::{write_atomic, CertStore};
pub use verify::{certificate_fingerprint, identity_of_root, leaf_common_name, verify_chain};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Certificate metadata for logging and the build result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertificateInfo {
    /// Unique identifier
    pub id: Uuid,
    /// Serial number (hex)
    pub serial: String,
    /// Subject common name
    pub subject: String,
    /// Issuer common name
    pub issuer: String,
    /// Not valid before
    pub not_before: DateTime<Utc>,
    /// Not valid after
    pub not_after: DateTime<Utc>,
    /// Certificate type
    pub cert_type: CertificateType,
}

/// Type of certificate in the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CertificateType {
    /// Self-signed root authority
    Root,
    /// Leaf certificate served by the proxy front
    Leaf,
}

/// Key algorithm choices.
///
/// RSA is not offered: `ring` cannot generate RSA keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum KeyAlgorithm {
    /// ECDSA with P-256 curve
    #[default]
    EcdsaP256,
    /// ECDSA with P-384 curve
    EcdsaP384,
    /// Ed25519
    Ed25519,
}

impl KeyAlgorithm {
    /// The rcgen signature algorithm backing this choice.
    pub fn signature_algorithm(self) -> &'static rcgen::SignatureAlgorithm {
        match self {
            Self::EcdsaP256 => &rcgen::PKCS_ECDSA_P256_SHA256,
            Self::EcdsaP384 => &rcgen::PKCS_ECDSA_P384_SHA384,
            Self::Ed25519 => &rcgen::PKCS_ED25519,
        }
    }

    /// Generate a fresh key pair.
    pub fn generate(self) -> Result<rcgen::KeyPair> {
        Ok(rcgen::KeyPair::generate_for(self.signature_algorithm())?)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::EcdsaP256 => "ecdsa-p256",
            Self::EcdsaP384 => "ecdsa-p384",
            Self::Ed25519 => "ed25519",
        }
    }
}

impl std::fmt::Display for KeyAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for KeyAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        [Self::EcdsaP256, Self::EcdsaP384, Self::Ed25519]
            .into_iter()
            .find(|alg| alg.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown key algorithm {s:?} (expected ecdsa-p256, ecdsa-p384 or ed25519)"))
    }
}

/// Validity period presets.
#[derive(Debug, Clone, Copy)]
pub enum ValidityPeriod {
    /// Pinned chain: effectively never expires
    Pinned,
    /// Custom duration in days
    Custom(u32),
}

impl ValidityPeriod {
    /// Get the number of days for this validity period.
    pub const fn days(&self) -> u32 {
        match self {
            Self::Pinned => 1_000_000,
            Self::Custom(d) => *d,
        }
    }
}

pub(crate) fn offset_to_chrono(t: time::OffsetDateTime) -> DateTime<Utc> {
    DateTime::from_timestamp(t.unix_timestamp(), 0).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Random 63-bit serial, shared by root and leaf generation.
pub(crate) fn random_serial() -> (rcgen::SerialNumber, String) {
    let bytes = Uuid::new_v4().into_bytes();
    let mut head = [0u8; 8];
    head.copy_from_slice(&bytes[..8]);
    // Top bit clear keeps the DER integer positive.
    let serial = u64::from_be_bytes(head) >> 1;
    (serial.into(), format!("{serial:016x}"))
}
