//! Runtime configuration for a lanpin node.

use lanpin_ca::KeyAlgorithm;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default config file name, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "lanpin.toml";

/// Configuration for a lanpin node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Base directory of the certificate store (default: certs).
    #[serde(default = "default_cert_dir")]
    pub cert_dir: PathBuf,

    /// Where the pairing SVG is written (default: qr.svg).
    #[serde(default = "default_qr_path")]
    pub qr_path: PathBuf,

    /// Address the TLS front binds on (default: 0.0.0.0).
    #[serde(default = "default_bind_address")]
    pub bind_address: IpAddr,

    /// Backend and front ports.
    #[serde(default)]
    pub ports: PortBinding,

    /// Key algorithm for root and leaf.
    #[serde(default)]
    pub key_algorithm: KeyAlgorithm,

    /// Client certificate verification on the TLS front.
    #[serde(default)]
    pub client_auth: ClientAuth,

    /// Per-connection bounds.
    #[serde(default)]
    pub timeouts: Timeouts,

    /// Advertise over mDNS.
    #[serde(default = "default_true")]
    pub announce: bool,

    /// Write the pairing SVG and print the terminal code.
    #[serde(default = "default_true")]
    pub emit_qr: bool,
}

/// Plain-HTTP backend port and TLS front port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortBinding {
    #[serde(default = "default_backend_port")]
    pub backend: u16,
    #[serde(default = "default_front_port")]
    pub front: u16,
}

/// How the TLS front treats client certificates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ClientAuth {
    /// Never ask for a client certificate
    #[default]
    None,
    /// Ask, verify against the root if offered, allow anonymous clients
    Optional,
    /// Require a client certificate signed by the root
    Required,
}

/// Connection time bounds, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timeouts {
    #[serde(default = "default_handshake_secs")]
    pub handshake_secs: u64,
    #[serde(default = "default_header_read_secs")]
    pub header_read_secs: u64,
    #[serde(default = "default_backend_secs")]
    pub backend_secs: u64,
}

impl Timeouts {
    pub const fn handshake(&self) -> Duration {
        Duration::from_secs(self.handshake_secs)
    }

    pub const fn header_read(&self) -> Duration {
        Duration::from_secs(self.header_read_secs)
    }

    pub const fn backend(&self) -> Duration {
        Duration::from_secs(self.backend_secs)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            cert_dir: default_cert_dir(),
            qr_path: default_qr_path(),
            bind_address: default_bind_address(),
            ports: PortBinding::default(),
            key_algorithm: KeyAlgorithm::default(),
            client_auth: ClientAuth::default(),
            timeouts: Timeouts::default(),
            announce: true,
            emit_qr: true,
        }
    }
}

impl Default for PortBinding {
    fn default() -> Self {
        Self {
            backend: default_backend_port(),
            front: default_front_port(),
        }
    }
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            handshake_secs: default_handshake_secs(),
            header_read_secs: default_header_read_secs(),
            backend_secs: default_backend_secs(),
        }
    }
}

impl Settings {
    /// Load config from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> crate::Result<Self> {
        let settings = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            toml::from_str(&content).map_err(|e| crate::LanpinError::Config(e.to_string()))?
        } else {
            Self::default()
        };
        settings.validate()?;
        Ok(settings)
    }

    /// Reject settings no run could succeed with.
    pub fn validate(&self) -> crate::Result<()> {
        if self.ports.backend == 0 {
            return Err(crate::LanpinError::Config("backend port must be non-zero".into()));
        }
        if self.ports.front == self.ports.backend {
            return Err(crate::LanpinError::Config(format!(
                "front and backend ports are both {}",
                self.ports.front
            )));
        }
        if self.timeouts.handshake_secs == 0
            || self.timeouts.header_read_secs == 0
            || self.timeouts.backend_secs == 0
        {
            return Err(crate::LanpinError::Config("timeouts must be non-zero".into()));
        }
        Ok(())
    }

    /// Address the TLS front listens on.
    pub const fn front_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.ports.front)
    }

    /// `http://localhost:{backend}`
    pub fn backend_url(&self) -> String {
        format!("http://localhost:{}", self.ports.backend)
    }
}

// Default value functions for serde.
fn default_cert_dir() -> PathBuf {
    PathBuf::from("certs")
}

fn default_qr_path() -> PathBuf {
    PathBuf::from("qr.svg")
}

const fn default_bind_address() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

const fn default_backend_port() -> u16 {
    3000
}

const fn default_front_port() -> u16 {
    4333
}

const fn default_handshake_secs() -> u64 {
    10
}

const fn default_header_read_secs() -> u64 {
    30
}

const fn default_backend_secs() -> u64 {
    60
}

const fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.ports.backend, 3000);
        assert_eq!(settings.ports.front, 4333);
        assert_eq!(settings.cert_dir, PathBuf::from("certs"));
        assert_eq!(settings.qr_path, PathBuf::from("qr.svg"));
        assert_eq!(settings.client_auth, ClientAuth::None);
        assert_eq!(settings.backend_url(), "http://localhost:3000");
        assert_eq!(settings.front_addr().port(), 4333);
        settings.validate().unwrap();
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let settings: Settings = toml::from_str(
            r#"
            client_auth = "required"
            key_algorithm = "ed25519"

            [ports]
            front = 8443
            "#,
        )
        .unwrap();
        assert_eq!(settings.ports.front, 8443);
        assert_eq!(settings.ports.backend, 3000);
        assert_eq!(settings.client_auth, ClientAuth::Required);
        assert_eq!(settings.key_algorithm, KeyAlgorithm::Ed25519);
        assert_eq!(settings.timeouts, Timeouts::default());
        assert!(settings.announce);
    }

    #[test]
    fn test_port_clash_rejected() {
        let mut settings = Settings::default();
        settings.ports.front = settings.ports.backend;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let mut settings = Settings::default();
        settings.timeouts.backend_secs = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_load_missing_file_gives_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let settings = Settings::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(settings.ports, PortBinding::default());
    }

    #[test]
    fn test_load_invalid_file_is_config_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("lanpin.toml");
        std::fs::write(&path, "ports = 12").unwrap();
        assert!(matches!(
            Settings::load(&path).unwrap_err(),
            crate::LanpinError::Config(_)
        ));
    }

    #[test]
    fn test_settings_serialization() {
        let settings = Settings::default();
        let text = toml::to_string(&settings).unwrap();
        let parsed: Settings = toml::from_str(&text).unwrap();
        assert_eq!(parsed.ports, settings.ports);
        assert_eq!(parsed.bind_address, settings.bind_address);
    }
}
