//! rustls configuration for the TLS front, built from the certificate store.

use lanpin_ca::CertStore;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::{RootCertStore, ServerConfig};
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use crate::config::ClientAuth;
use crate::{LanpinError, Result};

/// The ring provider, used explicitly so no process-wide default is needed.
pub fn crypto_provider() -> Arc<rustls::crypto::CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

pub fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let file = std::fs::File::open(path)
        .map_err(|e| LanpinError::Tls(format!("open {}: {e}", path.display())))?;
    let certs = rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| LanpinError::Tls(format!("parse {}: {e}", path.display())))?;
    if certs.is_empty() {
        return Err(LanpinError::Tls(format!(
            "no certificates in {}",
            path.display()
        )));
    }
    Ok(certs)
}

pub fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    let file = std::fs::File::open(path)
        .map_err(|e| LanpinError::Tls(format!("open {}: {e}", path.display())))?;
    rustls_pemfile::private_key(&mut BufReader::new(file))
        .map_err(|e| LanpinError::Tls(format!("parse {}: {e}", path.display())))?
        .ok_or_else(|| LanpinError::Tls(format!("no private key in {}", path.display())))
}

/// Server config serving the leaf (plus root) from `store`.
///
/// Client certificates, when requested, must chain to the same root.
pub fn server_config(store: &CertStore, client_auth: ClientAuth) -> Result<Arc<ServerConfig>> {
    let mut chain = load_certs(&store.server_cert())?;
    let ca_certs = load_certs(&store.ca_cert())?;
    let key = load_private_key(&store.server_key())?;
    chain.extend(ca_certs.iter().cloned());

    let provider = crypto_provider();
    let builder = ServerConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()?;

    let builder = match client_auth {
        ClientAuth::None => builder.with_no_client_auth(),
        ClientAuth::Optional | ClientAuth::Required => {
            let mut roots = RootCertStore::empty();
            for cert in ca_certs {
                roots.add(cert)?;
            }
            let verifier = WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider);
            let verifier = if client_auth == ClientAuth::Optional {
                verifier.allow_unauthenticated()
            } else {
                verifier
            };
            let verifier = verifier
                .build()
                .map_err(|e| LanpinError::Tls(e.to_string()))?;
            builder.with_client_cert_verifier(verifier)
        }
    };

    let mut config = builder.with_single_cert(chain, key)?;
    config.alpn_protocols = vec![b"http/1.1".to_vec()];
    Ok(Arc::new(config))
}
