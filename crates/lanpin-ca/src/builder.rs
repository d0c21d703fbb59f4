//! Ordered chain build.
//!
//! Each step persists its artifact before the next one starts, and a failure
//! aborts the build tagged with the step it happened in. Nothing is retried
//! and nothing is cleaned up: re-running overwrites every artifact.

use serde::Serialize;
use std::fmt;
use tracing::{debug, info};

use crate::error::{CaError, Result};
use crate::identity::{Fingerprint, Identity};
use crate::leaf::LeafCertificateRequest;
use crate::root::RootAuthority;
use crate::store::CertStore;
use crate::verify::identity_of_root;
use crate::{CertificateInfo, KeyAlgorithm, ValidityPeriod};

/// Build steps, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum BuildStep {
    /// Create store directories and drop a stale leaf
    PrepareStore,
    /// Generate and persist the root key
    GenerateRootKey,
    /// Self-sign and persist the root certificate
    SelfSignRoot,
    /// Generate and persist the leaf key
    GenerateLeafKey,
    /// Fingerprint the root and derive the identity
    DeriveIdentity,
    /// Create and persist the leaf signing request
    CreateRequest,
    /// Sign the request with the root and persist the leaf
    SignLeaf,
}

impl fmt::Display for BuildStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::PrepareStore => "prepare-store",
            Self::GenerateRootKey => "generate-root-key",
            Self::SelfSignRoot => "self-sign-root",
            Self::GenerateLeafKey => "generate-leaf-key",
            Self::DeriveIdentity => "derive-identity",
            Self::CreateRequest => "create-request",
            Self::SignLeaf => "sign-leaf",
        };
        f.write_str(name)
    }
}

/// Result of a successful build. Immutable; hand it to every consumer.
#[derive(Debug, Clone)]
pub struct ChainMaterial {
    /// Identity shared by the leaf CN, discovery and pairing
    pub identity: Identity,
    /// Root certificate fingerprint
    pub fingerprint: Fingerprint,
    /// Where the artifacts live
    pub store: CertStore,
    /// Root metadata
    pub root: CertificateInfo,
    /// Leaf metadata
    pub leaf: CertificateInfo,
}

/// Runs the ordered key/cert sequence against a store.
#[derive(Debug, Clone)]
pub struct ChainBuilder {
    store: CertStore,
    algorithm: KeyAlgorithm,
    validity: ValidityPeriod,
}

fn step<T>(step: BuildStep, f: impl FnOnce() -> Result<T>) -> Result<T> {
    debug!(%step, "build step");
    f().map_err(|e| e.at(step))
}

impl ChainBuilder {
    pub fn new(store: CertStore) -> Self {
        Self {
            store,
            algorithm: KeyAlgorithm::default(),
            validity: ValidityPeriod::Pinned,
        }
    }

    /// Key algorithm for both root and leaf.
    #[must_use]
    pub const fn algorithm(mut self, algorithm: KeyAlgorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    /// Validity for both root and leaf.
    #[must_use]
    pub const fn validity(mut self, validity: ValidityPeriod) -> Self {
        self.validity = validity;
        self
    }

    pub const fn store(&self) -> &CertStore {
        &self.store
    }

    /// Run every step in order.
    pub fn build(&self) -> Result<ChainMaterial> {
        let store = &self.store;

        step(BuildStep::PrepareStore, || {
            store.ensure_dirs()?;
            // The old leaf chains to a root we are about to replace.
            store.remove_leaf_cert()?;
            Ok(())
        })?;

        let root_key = step(BuildStep::GenerateRootKey, || {
            let key = self.algorithm.generate()?;
            store.write_private(&store.ca_key(), &key.serialize_pem())?;
            Ok(key)
        })?;

        let root = step(BuildStep::SelfSignRoot, || {
            let root = RootAuthority::self_sign(root_key, self.validity)?;
            store.write_public(&store.ca_cert(), &root.certificate_pem())?;
            Ok(root)
        })?;

        let leaf_key = step(BuildStep::GenerateLeafKey, || {
            let key = self.algorithm.generate()?;
            store.write_private(&store.server_key(), &key.serialize_pem())?;
            Ok(key)
        })?;

        let identity = step(BuildStep::DeriveIdentity, || {
            // Derive from the persisted certificate, as a client would.
            let persisted = identity_of_root(&store.read(&store.ca_cert())?)?;
            if persisted != root.identity() {
                return Err(CaError::Verification(
                    "persisted root does not match generated root".into(),
                ));
            }
            Ok(persisted)
        })?;

        let request = step(BuildStep::CreateRequest, || {
            let request = LeafCertificateRequest::new(&leaf_key, &identity)?;
            store.write_public(&store.server_csr(), request.csr_pem())?;
            Ok(request)
        })?;

        let leaf = step(BuildStep::SignLeaf, || {
            let leaf = request.sign(&root, self.validity)?;
            store.write_public(&store.server_cert(), leaf.certificate_pem())?;
            Ok(leaf)
        })?;

        info!(
            identity = %identity,
            fingerprint = %root.fingerprint(),
            dir = %store.base().display(),
            "generated certificate chain"
        );

        Ok(ChainMaterial {
            identity,
            fingerprint: *root.fingerprint(),
            store: store.clone(),
            root: root.info.clone(),
            leaf: leaf.info,
        })
    }
}
