//! Root authority: self-signed, pinned rather than publicly trusted.

use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DistinguishedName, DnType, IsCa, KeyPair,
    KeyUsagePurpose,
};
use uuid::Uuid;

use crate::error::Result;
use crate::identity::{Fingerprint, Identity};
use crate::{offset_to_chrono, random_serial, CertificateInfo, CertificateType, ValidityPeriod};

/// Placeholder subject. Nothing checks it; clients pin the fingerprint.
const ROOT_COMMON_NAME: &str = "example.com";
const ROOT_ORGANIZATION: &str = "ACME Signing Authority Inc";

/// Self-signed root certificate authority.
pub struct RootAuthority {
    key_pair: KeyPair,
    certificate: Certificate,
    key_pem: String,
    fingerprint: Fingerprint,
    not_after: time::OffsetDateTime,
    /// Metadata
    pub info: CertificateInfo,
}

impl RootAuthority {
    /// Self-sign a root certificate over an existing key.
    pub fn self_sign(key_pair: KeyPair, validity: ValidityPeriod) -> Result<Self> {
        let mut params = CertificateParams::default();

        let mut dn = DistinguishedName::new();
        dn.push(DnType::CountryName, "US");
        dn.push(DnType::StateOrProvinceName, "Utah");
        dn.push(DnType::LocalityName, "Provo");
        dn.push(DnType::OrganizationName, ROOT_ORGANIZATION);
        dn.push(DnType::CommonName, ROOT_COMMON_NAME);
        params.distinguished_name = dn;

        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];

        let not_before = time::OffsetDateTime::now_utc();
        let not_after = not_before + time::Duration::days(i64::from(validity.days()));
        params.not_before = not_before;
        params.not_after = not_after;

        let (serial, serial_hex) = random_serial();
        params.serial_number = Some(serial);

        let certificate = params.self_signed(&key_pair)?;
        let fingerprint = Fingerprint::of_der(certificate.der());
        let key_pem = key_pair.serialize_pem();

        let info = CertificateInfo {
            id: Uuid::new_v4(),
            serial: serial_hex,
            subject: ROOT_COMMON_NAME.to_string(),
            issuer: ROOT_COMMON_NAME.to_string(),
            not_before: offset_to_chrono(not_before),
            not_after: offset_to_chrono(not_after),
            cert_type: CertificateType::Root,
        };

        Ok(Self {
            key_pair,
            certificate,
            key_pem,
            fingerprint,
            not_after,
            info,
        })
    }

    /// SHA-256 fingerprint of the certificate DER.
    pub const fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    /// Identity derived from this root's fingerprint.
    pub fn identity(&self) -> Identity {
        Identity::from_fingerprint(&self.fingerprint)
    }

    pub fn certificate_pem(&self) -> String {
        self.certificate.pem()
    }

    pub fn private_key_pem(&self) -> &str {
        &self.key_pem
    }

    /// Get the certificate.
    pub const fn certificate(&self) -> &Certificate {
        &self.certificate
    }

    /// Get the key pair.
    pub const fn key_pair(&self) -> &KeyPair {
        &self.key_pair
    }

    /// Upper bound for anything this root signs.
    pub(crate) const fn not_after(&self) -> time::OffsetDateTime {
        self.not_after
    }
}
