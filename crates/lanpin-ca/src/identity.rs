//! Fingerprint-derived identity.
//!
//! The identity is the one string that ties the trust chain to
//! discoverability: it is the leaf certificate's CN, the mDNS TXT `name`,
//! and the host in the pairing URL.

use ring::digest::{digest, SHA256};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{CaError, Result};

/// Number of fingerprint hex characters kept in an identity.
pub const IDENTITY_HEX_LEN: usize = 32;

/// Marker appended to every identity.
pub const IDENTITY_SUFFIX: &str = ".self-signed";

/// Prefix openssl prints before a SHA-256 fingerprint. OpenSSL 3 writes
/// the digest name in lower case, so it is matched case-insensitively.
const FINGERPRINT_PREFIX: &str = "SHA256 Fingerprint=";

/// SHA-256 digest of a certificate's DER encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// Fingerprint DER-encoded certificate bytes.
    #[must_use]
    pub fn of_der(der: &[u8]) -> Self {
        let d = digest(&SHA256, der);
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(d.as_ref());
        Self(bytes)
    }

    /// Raw digest bytes.
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex without separators.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

/// Upper-case colon-separated hex, as certificate tools print it.
impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, b) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(":")?;
            }
            write!(f, "{b:02X}")?;
        }
        Ok(())
    }
}

/// Domain-like label derived from the root fingerprint.
///
/// Deserializing goes through the same shape check as [`derive_identity`]
/// output: 32 lower-case hex digits followed by [`IDENTITY_SUFFIX`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Identity(String);

impl Identity {
    /// Identity for a typed fingerprint. Cannot fail.
    #[must_use]
    pub fn from_fingerprint(fp: &Fingerprint) -> Self {
        let hex = fp.to_hex();
        Self(format!("{}{IDENTITY_SUFFIX}", &hex[..IDENTITY_HEX_LEN]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `https://{identity}:{port}/`
    #[must_use]
    pub fn url(&self, port: u16) -> String {
        format!("https://{}:{port}/", self.0)
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Identity {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Identity {
    type Error = CaError;

    fn try_from(value: String) -> Result<Self> {
        let well_formed = value
            .strip_suffix(IDENTITY_SUFFIX)
            .is_some_and(|hex| {
                hex.len() == IDENTITY_HEX_LEN
                    && hex.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
            });
        if well_formed {
            Ok(Self(value))
        } else {
            Err(CaError::InvalidFingerprint(format!(
                "{value:?} is not a derived identity"
            )))
        }
    }
}

impl From<Identity> for String {
    fn from(identity: Identity) -> Self {
        identity.0
    }
}

fn strip_fingerprint_prefix(text: &str) -> &str {
    match text.get(..FINGERPRINT_PREFIX.len()) {
        Some(head) if head.eq_ignore_ascii_case(FINGERPRINT_PREFIX) => {
            &text[FINGERPRINT_PREFIX.len()..]
        }
        _ => text,
    }
}

/// Derive an identity from fingerprint text such as
/// `SHA256 Fingerprint=AA:BB:...` or `aa:bb:...`.
///
/// Strips the prefix, drops colons, lower-cases, keeps the first
/// [`IDENTITY_HEX_LEN`] hex digits and appends [`IDENTITY_SUFFIX`].
///
/// # Errors
///
/// Returns `CaError::InvalidFingerprint` for non-hex characters or fewer
/// than [`IDENTITY_HEX_LEN`] hex digits.
pub fn derive_identity(fingerprint: &str) -> Result<Identity> {
    let text = fingerprint.trim();
    let text = strip_fingerprint_prefix(text);

    let hex: String = text
        .chars()
        .filter(|c| *c != ':')
        .map(|c| c.to_ascii_lowercase())
        .collect();

    if let Some(bad) = hex.chars().find(|c| !c.is_ascii_hexdigit()) {
        return Err(CaError::InvalidFingerprint(format!(
            "unexpected character {bad:?}"
        )));
    }
    if hex.len() < IDENTITY_HEX_LEN {
        return Err(CaError::InvalidFingerprint(format!(
            "need at least {IDENTITY_HEX_LEN} hex digits, got {}",
            hex.len()
        )));
    }

    Ok(Identity(format!("{}{IDENTITY_SUFFIX}", &hex[..IDENTITY_HEX_LEN])))
}
