//! Chain checks over persisted PEM material.

use x509_parser::pem::parse_x509_pem;
use x509_parser::prelude::{FromDer, X509Certificate};

use crate::error::{CaError, Result};
use crate::identity::{derive_identity, Fingerprint, Identity};

/// Decode the first PEM block of `pem` into DER bytes.
fn pem_to_der(pem: &str, what: &str) -> Result<Vec<u8>> {
    let (_, block) = parse_x509_pem(pem.as_bytes()).map_err(|e| CaError::Pem {
        path: what.to_string(),
        reason: e.to_string(),
    })?;
    if block.label != "CERTIFICATE" {
        return Err(CaError::Pem {
            path: what.to_string(),
            reason: format!("expected CERTIFICATE block, found {}", block.label),
        });
    }
    Ok(block.contents)
}

fn parse_der<'a>(der: &'a [u8], what: &str) -> Result<X509Certificate<'a>> {
    let (_, cert) = X509Certificate::from_der(der).map_err(|e| CaError::Pem {
        path: what.to_string(),
        reason: e.to_string(),
    })?;
    Ok(cert)
}

/// Fingerprint of a PEM certificate.
pub fn certificate_fingerprint(cert_pem: &str) -> Result<Fingerprint> {
    let der = pem_to_der(cert_pem, "certificate")?;
    Ok(Fingerprint::of_der(&der))
}

/// Identity a PEM root certificate yields, via the textual derivation.
pub fn identity_of_root(root_pem: &str) -> Result<Identity> {
    let fp = certificate_fingerprint(root_pem)?;
    derive_identity(&fp.to_string())
}

/// Subject common name of a PEM certificate.
pub fn leaf_common_name(cert_pem: &str) -> Result<String> {
    let der = pem_to_der(cert_pem, "leaf")?;
    let cert = parse_der(&der, "leaf")?;
    let cn = cert
        .subject()
        .iter_common_name()
        .next()
        .and_then(|attr| attr.as_str().ok())
        .ok_or_else(|| CaError::Verification("leaf has no common name".into()))?;
    Ok(cn.to_string())
}

/// Check that `leaf_pem` is issued and signed by `root_pem` and is
/// currently within its validity window.
pub fn verify_chain(leaf_pem: &str, root_pem: &str) -> Result<()> {
    let leaf_der = pem_to_der(leaf_pem, "leaf")?;
    let root_der = pem_to_der(root_pem, "root")?;
    let leaf = parse_der(&leaf_der, "leaf")?;
    let root = parse_der(&root_der, "root")?;

    if !root.is_ca() {
        return Err(CaError::Verification("root is not a CA certificate".into()));
    }
    if leaf.issuer() != root.subject() {
        return Err(CaError::Verification(format!(
            "issuer {} does not match root subject {}",
            leaf.issuer(),
            root.subject()
        )));
    }
    leaf.verify_signature(Some(root.public_key()))
        .map_err(|e| CaError::Verification(format!("bad signature: {e}")))?;
    if !leaf.validity().is_valid() {
        return Err(CaError::Verification("leaf outside validity window".into()));
    }
    Ok(())
}
