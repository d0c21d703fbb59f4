//! On-disk certificate layout.
//!
//! ```text
//! <base>/
//!   ca/my-root-ca.key.pem      root private key (0600)
//!   ca/my-root-ca.crt.pem      root certificate
//!   server/my-server.key.pem   leaf private key (0600)
//!   server/my-server.crt.pem   leaf certificate
//!   tmp/my-server.csr.pem      leaf signing request
//!   client/user.key            companion client key   (read, never written)
//!   client/user.crt            companion client cert  (read, never written)
//!   client/ca.crt              CA bundle for the companion client
//! ```
//!
//! The companion client reads `client/*` by these fixed relative paths, so
//! the names are part of the external interface.

use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{CaError, Result};

const CA_DIR: &str = "ca";
const SERVER_DIR: &str = "server";
const CLIENT_DIR: &str = "client";
const TMP_DIR: &str = "tmp";

/// Certificate store rooted at a base directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertStore {
    base: PathBuf,
}

impl CertStore {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn ca_key(&self) -> PathBuf {
        self.base.join(CA_DIR).join("my-root-ca.key.pem")
    }

    pub fn ca_cert(&self) -> PathBuf {
        self.base.join(CA_DIR).join("my-root-ca.crt.pem")
    }

    pub fn server_key(&self) -> PathBuf {
        self.base.join(SERVER_DIR).join("my-server.key.pem")
    }

    pub fn server_cert(&self) -> PathBuf {
        self.base.join(SERVER_DIR).join("my-server.crt.pem")
    }

    pub fn server_csr(&self) -> PathBuf {
        self.base.join(TMP_DIR).join("my-server.csr.pem")
    }

    pub fn client_key(&self) -> PathBuf {
        self.base.join(CLIENT_DIR).join("user.key")
    }

    pub fn client_cert(&self) -> PathBuf {
        self.base.join(CLIENT_DIR).join("user.crt")
    }

    pub fn client_ca(&self) -> PathBuf {
        self.base.join(CLIENT_DIR).join("ca.crt")
    }

    /// Create `ca/`, `server/`, `client/` and `tmp/`. Idempotent.
    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [CA_DIR, SERVER_DIR, CLIENT_DIR, TMP_DIR] {
            let path = self.base.join(dir);
            std::fs::create_dir_all(&path).map_err(|e| CaError::io(&path, e))?;
        }
        Ok(())
    }

    /// Remove a leaf certificate left by an earlier run.
    ///
    /// Returns whether a file was removed.
    pub fn remove_leaf_cert(&self) -> Result<bool> {
        let path = self.server_cert();
        match std::fs::remove_file(&path) {
            Ok(()) => {
                debug!(path = %path.display(), "removed stale leaf certificate");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(CaError::io(path, e)),
        }
    }

    /// Write a private key. Owner-only permissions on unix.
    pub fn write_private(&self, path: &Path, contents: &str) -> Result<()> {
        write_atomic(path, contents.as_bytes(), true)
    }

    /// Write a certificate or request.
    pub fn write_public(&self, path: &Path, contents: &str) -> Result<()> {
        write_atomic(path, contents.as_bytes(), false)
    }

    pub fn read(&self, path: &Path) -> Result<String> {
        std::fs::read_to_string(path).map_err(|e| CaError::io(path, e))
    }
}

/// Write via a temp file in the same directory, then rename over `path`.
///
/// A reader never observes a partially written file at `path`.
pub fn write_atomic(path: &Path, contents: &[u8], private: bool) -> Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| CaError::io(dir, e))?;
    tmp.write_all(contents).map_err(|e| CaError::io(tmp.path(), e))?;
    tmp.as_file().sync_all().map_err(|e| CaError::io(tmp.path(), e))?;

    // NamedTempFile is created 0600; widen for public material.
    #[cfg(unix)]
    if !private {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(tmp.path(), std::fs::Permissions::from_mode(0o644))
            .map_err(|e| CaError::io(tmp.path(), e))?;
    }
    #[cfg(not(unix))]
    let _ = private;

    tmp.persist(path).map_err(|e| CaError::io(path, e.error))?;
    debug!(path = %path.display(), bytes = contents.len(), "wrote artifact");
    Ok(())
}
