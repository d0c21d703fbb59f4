//! Error types for the lanpin certificate authority.

use std::path::PathBuf;
use thiserror::Error;

use crate::builder::BuildStep;

/// Result type for lanpin-ca operations.
pub type Result<T> = std::result::Result<T, CaError>;

/// Errors that can occur while building or inspecting the chain.
#[derive(Error, Debug)]
pub enum CaError {
    /// A build step failed; the whole build is aborted.
    #[error("certificate build failed at step {step}: {source}")]
    Step {
        /// Step that failed
        step: BuildStep,
        /// Underlying failure
        #[source]
        source: Box<CaError>,
    },

    /// Key generation, signing or CSR handling failed.
    #[error("certificate generation error: {0}")]
    Rcgen(#[from] rcgen::Error),

    /// Fingerprint text could not be turned into an identity.
    #[error("invalid fingerprint: {0}")]
    InvalidFingerprint(String),

    /// A persisted PEM file could not be decoded.
    #[error("pem decode error in {path}: {reason}")]
    Pem {
        /// File that failed to decode
        path: String,
        /// Decoder message
        reason: String,
    },

    /// Certificate chain verification failed.
    #[error("chain verification failed: {0}")]
    Verification(String),

    /// Filesystem error with the offending path.
    #[error("io error at {path}: {source}")]
    Io {
        /// Path being read or written
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },
}

impl CaError {
    /// Build an `Io` variant for `path`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn at(self, step: BuildStep) -> Self {
        Self::Step {
            step,
            source: Box::new(self),
        }
    }

    /// The build step this error aborted, if any.
    pub const fn step(&self) -> Option<BuildStep> {
        match self {
            Self::Step { step, .. } => Some(*step),
            _ => None,
        }
    }
}
