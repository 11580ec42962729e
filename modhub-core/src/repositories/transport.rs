//! Fetching repository files
//!
//! Repositories are read through the [`Transport`] trait so the orchestration
//! can be driven by an in-memory fake in tests. [`HttpTransport`] is the
//! production implementation; it also serves `file://` URLs so that package
//! and icon URLs behave the same for every repository kind.

use std::time::Duration;
use thiserror::Error;

/// Default request timeout in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Default User-Agent header
pub const DEFAULT_USER_AGENT: &str = concat!("modhub/", env!("CARGO_PKG_VERSION"));

/// Errors produced by a transport
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The server answered with a non-success status
    #[error("HTTP {status} for {url}")]
    Status { url: String, status: u16 },

    /// The request could not be completed
    #[error("Failed to fetch {url}: {reason}")]
    Network { url: String, reason: String },

    /// The URL scheme is not handled by this transport
    #[error("Unsupported URL: {0}")]
    UnsupportedUrl(String),
}

impl TransportError {
    /// Whether the remote end reported the resource as missing
    pub fn is_not_found(&self) -> bool {
        matches!(self, TransportError::Status { status: 404, .. })
    }
}

/// A blocking byte fetcher
pub trait Transport: Send + Sync {
    /// Fetch the full body behind `url`
    fn fetch(&self, url: &str) -> Result<Vec<u8>, TransportError>;
}

/// `reqwest`-backed transport
pub struct HttpTransport {
    client: reqwest::blocking::Client,
}

impl HttpTransport {
    /// Create a transport with the default timeout and user agent
    pub fn new() -> Result<Self, TransportError> {
        Self::with_options(DEFAULT_TIMEOUT_SECS, DEFAULT_USER_AGENT)
    }

    /// Create a transport with a custom timeout and user agent
    pub fn with_options(timeout_secs: u64, user_agent: &str) -> Result<Self, TransportError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent(user_agent)
            .build()
            .map_err(|e| TransportError::Network {
                url: String::new(),
                reason: format!("Failed to create HTTP client: {e}"),
            })?;

        Ok(Self { client })
    }

    fn fetch_file(&self, url: &str, path: &str) -> Result<Vec<u8>, TransportError> {
        std::fs::read(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                TransportError::Status {
                    url: url.to_string(),
                    status: 404,
                }
            } else {
                TransportError::Network {
                    url: url.to_string(),
                    reason: e.to_string(),
                }
            }
        })
    }
}

impl Transport for HttpTransport {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, TransportError> {
        if let Some(path) = url.strip_prefix("file://") {
            return self.fetch_file(url, path);
        }
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(TransportError::UnsupportedUrl(url.to_string()));
        }

        tracing::debug!("GET {}", url);

        let response = self
            .client
            .get(url)
            .send()
            .map_err(|e| TransportError::Network {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let bytes = response.bytes().map_err(|e| TransportError::Network {
            url: url.to_string(),
            reason: format!("Failed to read response: {e}"),
        })?;

        Ok(bytes.to_vec())
    }
}
