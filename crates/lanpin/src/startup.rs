//! Node startup: build the chain, bind, advertise, serve.
//!
//! Build and bind failures abort the run. Discovery and pairing failures
//! are logged and the node keeps serving.

use lanpin_ca::{CertStore, ChainBuilder, ChainMaterial};
use std::future::Future;
use std::net::SocketAddr;
use tracing::{info, warn};

use crate::config::Settings;
use crate::discovery::{Announcement, MdnsAnnouncer};
use crate::server::{BoundProxy, ProxyConfig, ProxyFront};
use crate::{pairing, LanpinError, Result};

/// Build a fresh chain into `settings.cert_dir` on a blocking thread.
pub async fn build_chain(settings: &Settings) -> Result<ChainMaterial> {
    let builder = ChainBuilder::new(CertStore::new(&settings.cert_dir))
        .algorithm(settings.key_algorithm);
    let material = tokio::task::spawn_blocking(move || builder.build())
        .await
        .map_err(|e| LanpinError::Io(std::io::Error::other(e)))??;
    Ok(material)
}

fn announce(settings: &Settings, material: &ChainMaterial, port: u16) -> Option<Announcement> {
    if !settings.announce {
        return None;
    }
    let result = MdnsAnnouncer::from_system()
        .and_then(|announcer| announcer.announce(&material.identity, port));
    match result {
        Ok(announcement) => Some(announcement),
        Err(e) => {
            warn!(error = %e, "local network announcement failed, continuing without it");
            None
        }
    }
}

fn emit_pairing_code(settings: &Settings, material: &ChainMaterial, port: u16) {
    if !settings.emit_qr {
        return;
    }
    if let Err(e) = pairing::emit_to_file(&material.identity, port, &settings.qr_path) {
        warn!(path = %settings.qr_path.display(), error = %e, "failed to write pairing code");
    }
    match pairing::render_terminal(&material.identity, port) {
        Ok(code) => println!("{code}"),
        Err(e) => warn!(error = %e, "failed to render pairing code"),
    }
    println!("Scan to open {}", material.identity.url(port));
}

/// A bound and advertised node that has not started serving.
pub struct Node {
    material: ChainMaterial,
    proxy: BoundProxy,
    announcement: Option<Announcement>,
}

impl Node {
    pub const fn material(&self) -> &ChainMaterial {
        &self.material
    }

    /// Address the TLS front actually bound, which is what gets advertised.
    pub const fn local_addr(&self) -> SocketAddr {
        self.proxy.local_addr()
    }

    /// Serve until `shutdown` resolves, then withdraw the announcement.
    pub async fn serve<F>(self, shutdown: F)
    where
        F: Future<Output = ()> + Send,
    {
        self.proxy.serve(shutdown).await;
        if let Some(announcement) = self.announcement {
            announcement.stop().await;
        }
        info!(identity = %self.material.identity, "node stopped");
    }
}

/// Build, bind, then announce and emit the pairing code for the bound port.
pub async fn start(settings: &Settings) -> Result<Node> {
    let material = build_chain(settings).await?;
    info!(
        identity = %material.identity,
        fingerprint = %material.fingerprint,
        store = %material.store.base().display(),
        "certificate chain ready"
    );

    let proxy = ProxyFront::bind(&material.store, &ProxyConfig::from_settings(settings)).await?;
    let port = proxy.local_addr().port();

    let announcement = announce(settings, &material, port);
    emit_pairing_code(settings, &material, port);

    Ok(Node {
        material,
        proxy,
        announcement,
    })
}

/// Run a node until `shutdown` resolves.
pub async fn run<F>(settings: &Settings, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send,
{
    start(settings).await?.serve(shutdown).await;
    Ok(())
}
