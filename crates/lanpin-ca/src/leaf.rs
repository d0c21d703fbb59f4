//! Leaf certificate: requested under the derived identity, signed by the root.

use rcgen::{
    CertificateParams, CertificateSigningRequestParams, DistinguishedName, DnType,
    ExtendedKeyUsagePurpose, IsCa, KeyPair, KeyUsagePurpose,
};
use uuid::Uuid;

use crate::error::Result;
use crate::identity::Identity;
use crate::root::RootAuthority;
use crate::{offset_to_chrono, random_serial, CertificateInfo, CertificateType, ValidityPeriod};

const LEAF_ORGANIZATION: &str = "ACME Tech Inc";

/// Private key plus a signing request whose CN is the identity.
///
/// Consumed by [`LeafCertificateRequest::sign`].
pub struct LeafCertificateRequest {
    key_pem: String,
    csr_pem: String,
    identity: Identity,
}

impl LeafCertificateRequest {
    /// Build a request for `identity` over an existing key.
    ///
    /// The identity is both the subject CN and a DNS subject alternative
    /// name, so hostname-checking TLS clients accept the leaf.
    pub fn new(key_pair: &KeyPair, identity: &Identity) -> Result<Self> {
        let mut params = CertificateParams::new(vec![identity.as_str().to_string()])?;

        let mut dn = DistinguishedName::new();
        dn.push(DnType::CountryName, "US");
        dn.push(DnType::StateOrProvinceName, "Utah");
        dn.push(DnType::LocalityName, "Provo");
        dn.push(DnType::OrganizationName, LEAF_ORGANIZATION);
        dn.push(DnType::CommonName, identity.as_str());
        params.distinguished_name = dn;

        let csr = params.serialize_request(key_pair)?;

        Ok(Self {
            key_pem: key_pair.serialize_pem(),
            csr_pem: csr.pem()?,
            identity: identity.clone(),
        })
    }

    /// PEM of the signing request.
    pub fn csr_pem(&self) -> &str {
        &self.csr_pem
    }

    pub const fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Sign with the root.
    ///
    /// The request PEM is parsed back (its self-signature is checked), so
    /// what gets signed is exactly what was persisted. Validity never runs
    /// past the root's.
    pub fn sign(self, root: &RootAuthority, validity: ValidityPeriod) -> Result<LeafCertificate> {
        let mut csr = CertificateSigningRequestParams::from_pem(&self.csr_pem)?;

        csr.params.is_ca = IsCa::ExplicitNoCa;
        csr.params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
        ];
        csr.params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];

        let not_before = time::OffsetDateTime::now_utc();
        let requested = not_before + time::Duration::days(i64::from(validity.days()));
        let not_after = requested.min(root.not_after());
        csr.params.not_before = not_before;
        csr.params.not_after = not_after;

        let (serial, serial_hex) = random_serial();
        csr.params.serial_number = Some(serial);

        let certificate = csr.signed_by(root.certificate(), root.key_pair())?;

        let info = CertificateInfo {
            id: Uuid::new_v4(),
            serial: serial_hex,
            subject: self.identity.to_string(),
            issuer: root.info.subject.clone(),
            not_before: offset_to_chrono(not_before),
            not_after: offset_to_chrono(not_after),
            cert_type: CertificateType::Leaf,
        };

        Ok(LeafCertificate {
            cert_pem: certificate.pem(),
            key_pem: self.key_pem,
            identity: self.identity,
            info,
        })
    }
}

/// Root-signed leaf served by the proxy front.
#[derive(Debug, Clone)]
pub struct LeafCertificate {
    cert_pem: String,
    key_pem: String,
    identity: Identity,
    /// Metadata
    pub info: CertificateInfo,
}

impl LeafCertificate {
    pub fn certificate_pem(&self) -> &str {
        &self.cert_pem
    }

    pub fn private_key_pem(&self) -> &str {
        &self.key_pem
    }

    pub const fn identity(&self) -> &Identity {
        &self.identity
    }
}
