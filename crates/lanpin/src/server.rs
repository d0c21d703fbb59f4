//! TLS proxy front: terminates TLS with the leaf and forwards to the backend.
//!
//! Binding and serving are separate so the caller learns whether the
//! listener is up before it advertises the endpoint anywhere.

use bytes::Bytes;
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::http::uri::{Authority, Scheme};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode, Uri};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::{TokioExecutor, TokioIo, TokioTimer};
use lanpin_ca::CertStore;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info, warn};

use crate::config::{ClientAuth, Settings, Timeouts};
use crate::{tls, LanpinError, Result};

/// Pause after a failed accept (e.g. out of file descriptors).
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

type ProxyBody = UnsyncBoxBody<Bytes, hyper::Error>;

/// What the proxy front needs besides the certificate store.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// TLS listen address
    pub listen: SocketAddr,
    /// Backend base URL, e.g. `http://localhost:3000`
    pub backend: String,
    /// Client certificate policy
    pub client_auth: ClientAuth,
    /// Connection time bounds
    pub timeouts: Timeouts,
}

impl ProxyConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            listen: settings.front_addr(),
            backend: settings.backend_url(),
            client_auth: settings.client_auth,
            timeouts: settings.timeouts,
        }
    }
}

/// Relays requests to a single fixed backend.
struct Forwarder {
    client: Client<HttpConnector, Incoming>,
    scheme: Scheme,
    authority: Authority,
    timeout: Duration,
}

impl Forwarder {
    fn new(backend: &str, timeout: Duration) -> Result<Self> {
        let base: Uri = backend
            .parse()
            .map_err(|e| LanpinError::Config(format!("backend url {backend:?}: {e}")))?;
        let scheme = base
            .scheme()
            .cloned()
            .ok_or_else(|| LanpinError::Config(format!("backend url {backend:?} has no scheme")))?;
        if scheme != Scheme::HTTP {
            return Err(LanpinError::Config(format!(
                "backend url {backend:?} must be plain http"
            )));
        }
        let authority = base
            .authority()
            .cloned()
            .ok_or_else(|| LanpinError::Config(format!("backend url {backend:?} has no host")))?;

        let client = Client::builder(TokioExecutor::new()).build_http();
        Ok(Self {
            client,
            scheme,
            authority,
            timeout,
        })
    }

    /// Backend URI carrying the original path and query.
    fn target(&self, original: &Uri) -> std::result::Result<Uri, hyper::http::Error> {
        let path_and_query = original.path_and_query().map_or("/", |pq| pq.as_str());
        Uri::builder()
            .scheme(self.scheme.clone())
            .authority(self.authority.clone())
            .path_and_query(path_and_query)
            .build()
    }

    async fn forward(&self, req: Request<Incoming>) -> Response<ProxyBody> {
        let (mut parts, body) = req.into_parts();
        let method = parts.method.clone();
        parts.uri = match self.target(&parts.uri) {
            Ok(uri) => uri,
            Err(e) => {
                debug!(uri = %parts.uri, error = %e, "unroutable request");
                return error_response(StatusCode::BAD_REQUEST, "bad request target");
            }
        };
        let uri = parts.uri.clone();

        match tokio::time::timeout(self.timeout, self.client.request(Request::from_parts(parts, body))).await {
            Ok(Ok(resp)) => {
                debug!(%method, %uri, status = %resp.status(), "forwarded");
                resp.map(BodyExt::boxed_unsync)
            }
            Ok(Err(e)) => {
                warn!(%method, %uri, error = %e, "backend request failed");
                error_response(StatusCode::BAD_GATEWAY, "backend unavailable")
            }
            Err(_) => {
                warn!(%method, %uri, timeout_secs = self.timeout.as_secs(), "backend timed out");
                error_response(StatusCode::GATEWAY_TIMEOUT, "backend timed out")
            }
        }
    }
}

fn error_response(status: StatusCode, message: &'static str) -> Response<ProxyBody> {
    let body = Full::new(Bytes::from_static(message.as_bytes()))
        .map_err(|never| match never {})
        .boxed_unsync();
    let mut resp = Response::new(body);
    *resp.status_mut() = status;
    resp
}

/// Entry point for the TLS front.
pub struct ProxyFront;

impl ProxyFront {
    /// Load TLS material and bind the listener.
    ///
    /// Returns only once the socket is bound, so a successful return is the
    /// confirmation that discovery and pairing may start.
    pub async fn bind(store: &CertStore, config: &ProxyConfig) -> Result<BoundProxy> {
        let tls_config = tls::server_config(store, config.client_auth)?;
        let forwarder = Forwarder::new(&config.backend, config.timeouts.backend())?;

        let listener = TcpListener::bind(config.listen)
            .await
            .map_err(|source| LanpinError::Bind {
                addr: config.listen,
                source,
            })?;
        let local_addr = listener.local_addr()?;

        info!(
            addr = %local_addr,
            backend = %config.backend,
            client_auth = ?config.client_auth,
            "TLS front bound"
        );

        Ok(BoundProxy {
            listener,
            local_addr,
            acceptor: TlsAcceptor::from(tls_config),
            forwarder: Arc::new(forwarder),
            timeouts: config.timeouts,
        })
    }
}

/// A bound, not yet serving, TLS front.
pub struct BoundProxy {
    listener: TcpListener,
    local_addr: SocketAddr,
    acceptor: TlsAcceptor,
    forwarder: Arc<Forwarder>,
    timeouts: Timeouts,
}

impl BoundProxy {
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept connections until `shutdown` resolves, one task per connection.
    ///
    /// The listener is dropped on return; connections already accepted run
    /// to completion on their own tasks.
    pub async fn serve<F>(self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        info!(addr = %self.local_addr, "TLS front accepting connections");

        loop {
            tokio::select! {
                () = &mut shutdown => {
                    info!(addr = %self.local_addr, "TLS front shutting down");
                    break;
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        tokio::spawn(handle_connection(
                            stream,
                            peer,
                            self.acceptor.clone(),
                            Arc::clone(&self.forwarder),
                            self.timeouts,
                        ));
                    }
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                },
            }
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    acceptor: TlsAcceptor,
    forwarder: Arc<Forwarder>,
    timeouts: Timeouts,
) {
    let _ = stream.set_nodelay(true);

    let tls_stream = match tokio::time::timeout(timeouts.handshake(), acceptor.accept(stream)).await {
        Ok(Ok(s)) => s,
        Ok(Err(e)) => {
            debug!(%peer, error = %e, "tls handshake failed");
            return;
        }
        Err(_) => {
            debug!(%peer, "tls handshake timed out");
            return;
        }
    };

    let service = service_fn(move |req: Request<Incoming>| {
        let forwarder = Arc::clone(&forwarder);
        async move { Ok::<_, Infallible>(forwarder.forward(req).await) }
    });

    let mut builder = http1::Builder::new();
    builder
        .timer(TokioTimer::new())
        .header_read_timeout(timeouts.header_read());

    if let Err(e) = builder
        .serve_connection(TokioIo::new(tls_stream), service)
        .await
    {
        debug!(%peer, error = %e, "connection closed with error");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lanpin_ca::{ChainBuilder, ChainMaterial};
    use rustls::pki_types::ServerName;
    use tempfile::TempDir;
    use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
    use tokio::sync::oneshot;
    use tokio::task::JoinHandle;

    /// Backend that echoes the request back in headers and body.
    async fn spawn_echo_backend() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                tokio::spawn(async move {
                    let svc = service_fn(|req: Request<Incoming>| async move {
                        let method = req.method().to_string();
                        let path = req
                            .uri()
                            .path_and_query()
                            .map(ToString::to_string)
                            .unwrap_or_default();
                        let marker = req
                            .headers()
                            .get("x-test")
                            .and_then(|v| v.to_str().ok())
                            .unwrap_or_default()
                            .to_string();
                        let body = req.into_body().collect().await.unwrap().to_bytes();
                        let resp = Response::builder()
                            .status(StatusCode::CREATED)
                            .header("x-backend-method", method)
                            .header("x-backend-path", path)
                            .header("x-backend-test", marker)
                            .body(Full::new(body))
                            .unwrap();
                        Ok::<_, Infallible>(resp)
                    });
                    let _ = http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), svc)
                        .await;
                });
            }
        });
        addr
    }

    /// Backend that accepts connections and never answers.
    async fn spawn_silent_backend() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                held.push(stream);
            }
        });
        addr
    }

    async fn start_front(store: &CertStore, config: &ProxyConfig) -> (SocketAddr, JoinHandle<()>) {
        let proxy = ProxyFront::bind(store, config).await.unwrap();
        let addr = proxy.local_addr();
        (addr, tokio::spawn(proxy.serve(std::future::pending())))
    }

    /// True when the peer closes the stream within `within`.
    async fn closed_within<S: AsyncRead + Unpin>(stream: &mut S, within: Duration) -> bool {
        let drained = tokio::time::timeout(within, async {
            let mut buf = [0u8; 512];
            loop {
                match stream.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {}
                }
            }
        });
        drained.await.is_ok()
    }

    /// Client certificate for `user`, signed by the store's root.
    fn client_identity(store: &CertStore) -> reqwest::Identity {
        let ca_key = rcgen::KeyPair::from_pem(&std::fs::read_to_string(store.ca_key()).unwrap()).unwrap();
        let issuer = rcgen::CertificateParams::from_ca_cert_pem(
            &std::fs::read_to_string(store.ca_cert()).unwrap(),
        )
        .unwrap()
        .self_signed(&ca_key)
        .unwrap();

        let mut params = rcgen::CertificateParams::new(vec!["user".to_string()]).unwrap();
        params.distinguished_name.push(rcgen::DnType::CommonName, "user");
        params.is_ca = rcgen::IsCa::ExplicitNoCa;
        params.key_usages = vec![rcgen::KeyUsagePurpose::DigitalSignature];
        params.extended_key_usages = vec![rcgen::ExtendedKeyUsagePurpose::ClientAuth];
        let key = rcgen::KeyPair::generate().unwrap();
        let cert = params.signed_by(&key, &issuer, &ca_key).unwrap();

        let bundle = format!("{}\n{}", key.serialize_pem(), cert.pem());
        reqwest::Identity::from_pem(bundle.as_bytes()).unwrap()
    }

    fn build_chain() -> (TempDir, CertStore, ChainMaterial) {
        let dir = TempDir::new().unwrap();
        let store = CertStore::new(dir.path().join("certs"));
        let material = ChainBuilder::new(store.clone()).build().unwrap();
        (dir, store, material)
    }

    fn proxy_config(backend: String, client_auth: ClientAuth) -> ProxyConfig {
        ProxyConfig {
            listen: "127.0.0.1:0".parse().unwrap(),
            backend,
            client_auth,
            timeouts: Timeouts::default(),
        }
    }

    fn pinned_client(store: &CertStore, material: &ChainMaterial, addr: SocketAddr) -> reqwest::Client {
        let ca = reqwest::Certificate::from_pem(&std::fs::read(store.ca_cert()).unwrap()).unwrap();
        reqwest::Client::builder()
            .use_rustls_tls()
            .tls_built_in_root_certs(false)
            .add_root_certificate(ca)
            .resolve(material.identity.as_str(), addr)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_forwards_request_and_response_unmodified() {
        let backend = spawn_echo_backend().await;
        let (_dir, store, material) = build_chain();

        let proxy = ProxyFront::bind(&store, &proxy_config(format!("http://{backend}"), ClientAuth::None))
            .await
            .unwrap();
        let addr = proxy.local_addr();
        let (stop, stopped) = oneshot::channel::<()>();
        let server = tokio::spawn(proxy.serve(async {
            let _ = stopped.await;
        }));

        let client = pinned_client(&store, &material, addr);
        let resp = client
            .post(format!("https://{}:{}/ping?x=1", material.identity, addr.port()))
            .header("x-test", "hello")
            .body("payload")
            .send()
            .await
            .unwrap();

        assert_eq!(resp.status(), reqwest::StatusCode::CREATED);
        assert_eq!(resp.headers()["x-backend-method"], "POST");
        assert_eq!(resp.headers()["x-backend-path"], "/ping?x=1");
        assert_eq!(resp.headers()["x-backend-test"], "hello");
        assert_eq!(resp.text().await.unwrap(), "payload");

        stop.send(()).unwrap();
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_bad_gateway() {
        // Bind then drop to get a port nothing listens on.
        let closed = TcpListener::bind("127.0.0.1:0").await.unwrap().local_addr().unwrap();
        let (_dir, store, material) = build_chain();

        let proxy = ProxyFront::bind(&store, &proxy_config(format!("http://{closed}"), ClientAuth::None))
            .await
            .unwrap();
        let addr = proxy.local_addr();
        let server = tokio::spawn(proxy.serve(std::future::pending()));

        let client = pinned_client(&store, &material, addr);
        let resp = client
            .get(format!("https://{}:{}/", material.identity, addr.port()))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::BAD_GATEWAY);

        server.abort();
    }

    #[tokio::test]
    async fn test_unrelated_root_is_rejected_by_client() {
        let backend = spawn_echo_backend().await;
        let (_dir, store, material) = build_chain();
        let (_other_dir, other_store, _) = build_chain();

        let proxy = ProxyFront::bind(&store, &proxy_config(format!("http://{backend}"), ClientAuth::None))
            .await
            .unwrap();
        let addr = proxy.local_addr();
        let server = tokio::spawn(proxy.serve(std::future::pending()));

        // Client pins a different root.
        let client = pinned_client(&other_store, &material, addr);
        let result = client
            .get(format!("https://{}:{}/", material.identity, addr.port()))
            .send()
            .await;
        assert!(result.is_err());

        server.abort();
    }

    #[tokio::test]
    async fn test_required_client_auth_rejects_anonymous_client() {
        let backend = spawn_echo_backend().await;
        let (_dir, store, material) = build_chain();

        let proxy = ProxyFront::bind(&store, &proxy_config(format!("http://{backend}"), ClientAuth::Required))
            .await
            .unwrap();
        let addr = proxy.local_addr();
        let server = tokio::spawn(proxy.serve(std::future::pending()));

        let client = pinned_client(&store, &material, addr);
        let result = client
            .get(format!("https://{}:{}/", material.identity, addr.port()))
            .send()
            .await;
        assert!(result.is_err());

        server.abort();
    }

    #[tokio::test]
    async fn test_slow_backend_is_gateway_timeout() {
        let backend = spawn_silent_backend().await;
        let (_dir, store, material) = build_chain();
        let mut config = proxy_config(format!("http://{backend}"), ClientAuth::None);
        config.timeouts.backend_secs = 1;
        let (addr, server) = start_front(&store, &config).await;

        let resp = pinned_client(&store, &material, addr)
            .get(format!("https://{}:{}/slow", material.identity, addr.port()))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::GATEWAY_TIMEOUT);

        server.abort();
    }

    #[tokio::test]
    async fn test_silent_client_dropped_after_handshake_timeout() {
        let backend = spawn_echo_backend().await;
        let (_dir, store, _material) = build_chain();
        let mut config = proxy_config(format!("http://{backend}"), ClientAuth::None);
        config.timeouts.handshake_secs = 1;
        let (addr, server) = start_front(&store, &config).await;

        // TCP connect, then never send a ClientHello.
        let mut stream = TcpStream::connect(addr).await.unwrap();
        assert!(closed_within(&mut stream, Duration::from_secs(5)).await);

        server.abort();
    }

    #[tokio::test]
    async fn test_partial_headers_dropped_after_header_timeout() {
        let backend = spawn_echo_backend().await;
        let (_dir, store, material) = build_chain();
        let mut config = proxy_config(format!("http://{backend}"), ClientAuth::None);
        config.timeouts.header_read_secs = 1;
        let (addr, server) = start_front(&store, &config).await;

        let mut roots = rustls::RootCertStore::empty();
        for cert in tls::load_certs(&store.ca_cert()).unwrap() {
            roots.add(cert).unwrap();
        }
        let client_config = rustls::ClientConfig::builder_with_provider(tls::crypto_provider())
            .with_safe_default_protocol_versions()
            .unwrap()
            .with_root_certificates(roots)
            .with_no_client_auth();
        let connector = tokio_rustls::TlsConnector::from(Arc::new(client_config));
        let name = ServerName::try_from(material.identity.to_string()).unwrap();
        let tcp = TcpStream::connect(addr).await.unwrap();
        let mut stream = connector.connect(name, tcp).await.unwrap();

        // Request line without the terminating blank line.
        stream
            .write_all(b"GET / HTTP/1.1\r\nHost: front\r\n")
            .await
            .unwrap();
        assert!(closed_within(&mut stream, Duration::from_secs(5)).await);

        server.abort();
    }

    #[tokio::test]
    async fn test_optional_client_auth_allows_anonymous_client() {
        let backend = spawn_echo_backend().await;
        let (_dir, store, material) = build_chain();
        let config = proxy_config(format!("http://{backend}"), ClientAuth::Optional);
        let (addr, server) = start_front(&store, &config).await;

        let resp = pinned_client(&store, &material, addr)
            .get(format!("https://{}:{}/", material.identity, addr.port()))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::CREATED);

        server.abort();
    }

    #[tokio::test]
    async fn test_client_certificate_from_root_accepted() {
        let backend = spawn_echo_backend().await;
        let (_dir, store, material) = build_chain();

        for mode in [ClientAuth::Optional, ClientAuth::Required] {
            let config = proxy_config(format!("http://{backend}"), mode);
            let (addr, server) = start_front(&store, &config).await;

            let ca = reqwest::Certificate::from_pem(&std::fs::read(store.ca_cert()).unwrap()).unwrap();
            let client = reqwest::Client::builder()
                .use_rustls_tls()
                .tls_built_in_root_certs(false)
                .add_root_certificate(ca)
                .identity(client_identity(&store))
                .resolve(material.identity.as_str(), addr)
                .build()
                .unwrap();
            let resp = client
                .post(format!("https://{}:{}/ping", material.identity, addr.port()))
                .body("with cert")
                .send()
                .await
                .unwrap();
            assert_eq!(resp.status(), reqwest::StatusCode::CREATED, "{mode:?}");
            assert_eq!(resp.text().await.unwrap(), "with cert");

            server.abort();
        }
    }

    #[tokio::test]
    async fn test_port_in_use_is_bind_error() {
        let (_dir, store, _) = build_chain();
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut config = proxy_config("http://127.0.0.1:3000".into(), ClientAuth::None);
        config.listen = taken.local_addr().unwrap();

        let Err(err) = ProxyFront::bind(&store, &config).await else {
            panic!("bind on a taken port succeeded");
        };
        assert!(matches!(err, LanpinError::Bind { .. }));
    }

    #[tokio::test]
    async fn test_missing_certificates_fail_before_bind() {
        let dir = TempDir::new().unwrap();
        let store = CertStore::new(dir.path());
        let config = proxy_config("http://127.0.0.1:3000".into(), ClientAuth::None);
        let Err(err) = ProxyFront::bind(&store, &config).await else {
            panic!("bind without certificates succeeded");
        };
        assert!(matches!(err, LanpinError::Tls(_)));
    }

    #[test]
    fn test_backend_url_validation() {
        let timeout = Duration::from_secs(1);
        assert!(Forwarder::new("https://localhost:3000", timeout).is_err());
        assert!(Forwarder::new("localhost:3000", timeout).is_err());
        assert!(Forwarder::new("http://localhost:3000", timeout).is_ok());
    }

    #[test]
    fn test_target_keeps_path_and_query() {
        let fwd = Forwarder::new("http://localhost:3000", Duration::from_secs(1)).unwrap();
        let target = fwd.target(&"/ping?a=b".parse().unwrap()).unwrap();
        assert_eq!(target.to_string(), "http://localhost:3000/ping?a=b");
        let root = fwd.target(&"*".parse().unwrap()).unwrap();
        assert_eq!(root.path(), "/");
    }
}
