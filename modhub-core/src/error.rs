//! Error types for repository, keyring and install operations

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the repository subsystem
///
/// The first three variants are the ones callers are expected to branch on:
/// a dead or malformed repository, a failed signature check, and any other
/// reason an install could not go through.
#[derive(Error, Debug)]
pub enum ModhubError {
    /// The index or keyring of a repository could not be fetched or parsed
    #[error("Repository unavailable: {0}")]
    RepositoryUnavailable(String),

    /// A payload did not validate against the trusted keyring
    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    /// Any other precondition failure of a single module install
    #[error("Unable to install module: {0}")]
    ModuleInstall(String),

    /// A module source tree does not declare valid metadata
    #[error("Invalid module manifest at {path}: {reason}")]
    InvalidManifest { path: PathBuf, reason: String },

    /// A fetch through the transport failed
    #[error(transparent)]
    Transport(#[from] crate::repositories::TransportError),

    /// Configuration could not be loaded
    #[error("Configuration error: {0}")]
    Config(String),

    /// A cached key-value file could not be parsed
    #[error("Failed to parse {path}: {source}")]
    Ini {
        path: PathBuf,
        #[source]
        source: ini::ParseError,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ModhubError {
    pub fn repository_unavailable(message: impl Into<String>) -> Self {
        ModhubError::RepositoryUnavailable(message.into())
    }

    pub fn module_install(message: impl Into<String>) -> Self {
        ModhubError::ModuleInstall(message.into())
    }

    /// Whether this error is one of the trust failures that must be surfaced
    pub fn is_trust_failure(&self) -> bool {
        matches!(self, ModhubError::InvalidSignature(_))
    }

    /// Log trust failures on the security target
    pub fn log_if_trust_failure(&self) {
        if self.is_trust_failure() {
            tracing::error!(target: "security", "SIGNATURE CHECK FAILED: {}", self);
        }
    }
}

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, ModhubError>;
