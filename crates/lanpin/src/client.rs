//! Companion client: one mutually-authenticated HTTPS request to a front.
//!
//! The identity hostname ends in `.self-signed` and is not in DNS, so the
//! request is usually pinned to an address with `connect_to`.

use lanpin_ca::CertStore;
use reqwest::{Certificate, Method, StatusCode, Url};
use std::io::Write;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::{LanpinError, Result};

/// Client key, certificate and the CA used to verify the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientTlsFiles {
    pub key: PathBuf,
    pub cert: PathBuf,
    pub ca: PathBuf,
}

impl ClientTlsFiles {
    /// `client/user.key`, `client/user.crt` and `client/ca.crt` in the store.
    pub fn from_store(store: &CertStore) -> Self {
        Self {
            key: store.client_key(),
            cert: store.client_cert(),
            ca: store.client_ca(),
        }
    }
}

fn read_file(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).map_err(|e| LanpinError::Client(format!("read {}: {e}", path.display())))
}

/// A validated request. Construct with [`ClientRequest::new`].
pub struct ClientRequest {
    pub host: String,
    pub port: u16,
    pub path: String,
    pub method: Method,
    pub client_key: PathBuf,
    pub client_cert: PathBuf,
    pub ca_cert: PathBuf,
    pub body: Option<Vec<u8>>,
    pub connect_to: Option<SocketAddr>,
    pub insecure: bool,
    url: Url,
    identity: reqwest::Identity,
    ca: Certificate,
}

impl ClientRequest {
    /// Validate the target and load the TLS material.
    pub fn new(host: &str, port: u16, path: &str, method: &str, files: ClientTlsFiles) -> Result<Self> {
        let host = host.trim();
        if host.is_empty() || host.contains(['/', ' ', '@']) {
            return Err(LanpinError::Client(format!("invalid host {host:?}")));
        }
        if port == 0 {
            return Err(LanpinError::Client("port must be non-zero".into()));
        }
        if !path.starts_with('/') {
            return Err(LanpinError::Client(format!("path {path:?} must start with '/'")));
        }
        let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
            .map_err(|_| LanpinError::Client(format!("invalid method {method:?}")))?;
        let url = Url::parse(&format!("https://{host}:{port}{path}"))
            .map_err(|e| LanpinError::Client(format!("invalid url: {e}")))?;

        // reqwest wants key and certificate in one PEM bundle.
        let mut bundle = read_file(&files.key)?;
        bundle.push(b'\n');
        bundle.extend(read_file(&files.cert)?);
        let identity = reqwest::Identity::from_pem(&bundle)
            .map_err(|e| LanpinError::Client(format!("client key/cert: {e}")))?;
        let ca = Certificate::from_pem(&read_file(&files.ca)?)
            .map_err(|e| LanpinError::Client(format!("{}: {e}", files.ca.display())))?;

        Ok(Self {
            host: host.to_string(),
            port,
            path: path.to_string(),
            method,
            client_key: files.key,
            client_cert: files.cert,
            ca_cert: files.ca,
            body: None,
            connect_to: None,
            insecure: false,
            url,
            identity,
            ca,
        })
    }

    #[must_use]
    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Send to `addr` regardless of what `host` resolves to.
    #[must_use]
    pub const fn connect_to(mut self, addr: SocketAddr) -> Self {
        self.connect_to = Some(addr);
        self
    }

    /// Skip server certificate verification.
    #[must_use]
    pub const fn insecure(mut self, insecure: bool) -> Self {
        self.insecure = insecure;
        self
    }

    pub const fn url(&self) -> &Url {
        &self.url
    }

    fn http_client(&self) -> Result<reqwest::Client> {
        let mut builder = reqwest::Client::builder()
            .use_rustls_tls()
            .tls_built_in_root_certs(false)
            .add_root_certificate(self.ca.clone())
            .identity(self.identity.clone());

        if let Some(addr) = self.connect_to {
            builder = builder.resolve(&self.host, addr);
        }
        if self.insecure {
            warn!(host = %self.host, "server certificate verification disabled");
            builder = builder.danger_accept_invalid_certs(true);
        }
        Ok(builder.build()?)
    }

    /// Send the request, then write status, headers and body to `out`.
    pub async fn send<W: Write + Send>(&self, out: &mut W) -> Result<StatusCode> {
        let client = self.http_client()?;
        let mut request = client.request(self.method.clone(), self.url.clone());
        if let Some(body) = &self.body {
            request = request.body(body.clone());
        }

        info!(method = %self.method, url = %self.url, connect_to = ?self.connect_to, "sending request");
        let mut resp = request.send().await?;
        let status = resp.status();

        writeln!(out, "status: {}", status.as_u16())?;
        for (name, value) in resp.headers() {
            writeln!(out, "{name}: {}", String::from_utf8_lossy(value.as_bytes()))?;
        }
        writeln!(out)?;

        let mut received = 0usize;
        while let Some(chunk) = resp.chunk().await? {
            received += chunk.len();
            out.write_all(&chunk)?;
        }
        out.flush()?;
        debug!(status = status.as_u16(), bytes = received, "response received");

        Ok(status)
    }
}
