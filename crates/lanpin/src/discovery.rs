//! mDNS / DNS-SD advertisement of the TLS front.
//!
//! The record is `_https._tcp.local.` under the machine's hostname. The
//! identity rides in the `name` TXT attribute: the common phone zeroconf
//! clients only surface TXT data, not custom instance names, so the
//! instance name stays the hostname.

use lanpin_ca::Identity;
use mdns_sd::{ServiceDaemon, ServiceInfo};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::{LanpinError, Result};

/// DNS-SD service type for the TLS front.
pub const SERVICE_TYPE: &str = "_https._tcp.local.";

/// TXT key carrying the identity.
pub const IDENTITY_TXT_KEY: &str = "name";

/// How long to wait for the goodbye packet before shutting down.
const UNREGISTER_WAIT: Duration = Duration::from_secs(1);

/// Build the service record without touching the network.
pub fn service_record(identity: &Identity, port: u16, hostname: &str) -> Result<ServiceInfo> {
    let instance = hostname.trim_end_matches('.').trim_end_matches(".local");
    if instance.is_empty() {
        return Err(LanpinError::Discovery("empty hostname".into()));
    }
    let host_name = format!("{instance}.local.");
    let properties = [(IDENTITY_TXT_KEY, identity.as_str())];

    let info = ServiceInfo::new(SERVICE_TYPE, instance, &host_name, "", port, &properties[..])?
        .enable_addr_auto();
    Ok(info)
}

/// Publishes the front on the local network.
#[derive(Debug, Clone)]
pub struct MdnsAnnouncer {
    hostname: String,
}

impl MdnsAnnouncer {
    /// Announcer using this machine's hostname.
    pub fn from_system() -> Result<Self> {
        let hostname = hostname::get()
            .map_err(|e| LanpinError::Discovery(format!("hostname: {e}")))?
            .to_string_lossy()
            .into_owned();
        Ok(Self::with_hostname(hostname))
    }

    pub fn with_hostname(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
        }
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// Register the record. It stays published until the returned
    /// [`Announcement`] is stopped or dropped.
    pub fn announce(&self, identity: &Identity, port: u16) -> Result<Announcement> {
        let info = service_record(identity, port, &self.hostname)?;
        let fullname = info.get_fullname().to_string();

        let daemon = ServiceDaemon::new()?;
        if let Err(e) = daemon.register(info) {
            let _ = daemon.shutdown();
            return Err(e.into());
        }

        info!(
            service = %fullname,
            %identity,
            port,
            "announced on local network"
        );

        Ok(Announcement {
            daemon: Some(daemon),
            fullname,
        })
    }
}

/// A live advertisement.
pub struct Announcement {
    daemon: Option<ServiceDaemon>,
    fullname: String,
}

impl Announcement {
    pub fn fullname(&self) -> &str {
        &self.fullname
    }

    /// Unregister and shut the daemon down.
    ///
    /// Waiting for the goodbye packet blocks, so it runs on the blocking pool.
    pub async fn stop(mut self) {
        let Some(daemon) = self.daemon.take() else {
            return;
        };
        let fullname = std::mem::take(&mut self.fullname);
        if let Err(e) = tokio::task::spawn_blocking(move || withdraw(&daemon, &fullname)).await {
            warn!(error = %e, "announcement withdrawal task failed");
        }
    }
}

impl Drop for Announcement {
    fn drop(&mut self) {
        let Some(daemon) = self.daemon.take() else {
            return;
        };
        let fullname = std::mem::take(&mut self.fullname);
        // Inside a runtime, never block a worker thread.
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(move || withdraw(&daemon, &fullname));
            }
            Err(_) => withdraw(&daemon, &fullname),
        }
    }
}

fn withdraw(daemon: &ServiceDaemon, fullname: &str) {
    match daemon.unregister(fullname) {
        Ok(status) => {
            let _ = status.recv_timeout(UNREGISTER_WAIT);
        }
        Err(e) => warn!(service = %fullname, error = %e, "failed to unregister"),
    }
    if let Err(e) = daemon.shutdown() {
        debug!(error = %e, "mdns daemon shutdown");
    }
    info!(service = %fullname, "announcement withdrawn");
}

#[cfg(test)]
mod tests {
    use super::*;
    use lanpin_ca::derive_identity;
    use mdns_sd::ServiceEvent;
    use std::collections::HashSet;
    use std::time::Instant;

    fn identity() -> Identity {
        derive_identity(&"AB:".repeat(32)).unwrap()
    }

    #[test]
    fn test_record_carries_identity_and_port() {
        let id = identity();
        let info = service_record(&id, 4333, "workbench").unwrap();

        assert_eq!(info.get_type(), SERVICE_TYPE);
        assert_eq!(info.get_port(), 4333);
        assert_eq!(info.get_hostname(), "workbench.local.");
        assert_eq!(info.get_property_val_str(IDENTITY_TXT_KEY), Some(id.as_str()));
        assert_eq!(info.get_fullname(), "workbench._https._tcp.local.");
    }

    #[test]
    fn test_record_normalizes_local_hostname() {
        let info = service_record(&identity(), 4333, "workbench.local.").unwrap();
        assert_eq!(info.get_hostname(), "workbench.local.");
    }

    #[test]
    fn test_empty_hostname_rejected() {
        assert!(matches!(
            service_record(&identity(), 4333, ""),
            Err(LanpinError::Discovery(_))
        ));
    }

    #[test]
    fn test_announcer_keeps_hostname() {
        let announcer = MdnsAnnouncer::with_hostname("workbench");
        assert_eq!(announcer.hostname(), "workbench");
    }

    #[tokio::test]
    async fn test_stop_without_daemon_returns() {
        let announcement = Announcement {
            daemon: None,
            fullname: "workbench._https._tcp.local.".into(),
        };
        announcement.stop().await;
    }

    #[tokio::test(flavor = "current_thread")]
    #[ignore = "needs multicast on a local interface"]
    async fn test_browser_sees_exactly_one_record() {
        let id = identity();
        let announcer = MdnsAnnouncer::with_hostname(format!("lanpin-test-{}", std::process::id()));
        let announcement = announcer.announce(&id, 4333).unwrap();

        let browser = ServiceDaemon::new().unwrap();
        let events = browser.browse(SERVICE_TYPE).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut seen = HashSet::new();
        while let Some(remaining) = deadline.checked_duration_since(Instant::now()) {
            match events.recv_timeout(remaining) {
                Ok(ServiceEvent::ServiceResolved(info)) => {
                    if info.get_property_val_str(IDENTITY_TXT_KEY) == Some(id.as_str()) {
                        assert_eq!(info.get_port(), 4333);
                        seen.insert(info.get_fullname().to_string());
                    }
                }
                Ok(_) => {}
                Err(_) => break,
            }
        }
        let _ = browser.shutdown();

        assert_eq!(seen.len(), 1, "records seen: {seen:?}");
        assert!(seen.contains(announcement.fullname()));

        announcement.stop().await;
    }
}
