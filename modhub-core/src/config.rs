//! User configuration (`config.yaml`)
//!
//! Every field is optional; missing ones take the defaults below.
//!
//! ```yaml
//! workdir: /home/user/.config/modhub      # holds sources.list
//! datadir: /home/user/.local/share/modhub # modules, caches, keyrings
//! compat_version: "0.4"
//! gpgv: /usr/bin/gpgv2
//! http_timeout_secs: 30
//! user_agent: modhub/0.4.0
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{ModhubError, Result};
use crate::repositories::{
    Collaborators, HttpTransport, Layout, RepositorySet, SignatureVerifier, VerifierLocator,
    DEFAULT_TIMEOUT_SECS, DEFAULT_USER_AGENT,
};

/// Configuration file name inside the config directory
pub const CONFIG_FILE: &str = "config.yaml";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModhubConfig {
    /// Directory holding `sources.list`
    pub workdir: PathBuf,
    /// Directory holding modules, cached indexes, keyrings and icons
    pub datadir: PathBuf,
    /// Modules are stored and fetched per compatibility version
    pub compat_version: String,
    /// Explicit signature verifier, instead of searching `PATH`
    pub gpgv: Option<PathBuf>,
    pub http_timeout_secs: u64,
    pub user_agent: String,
}

impl Default for ModhubConfig {
    fn default() -> Self {
        let (workdir, datadir) = default_dirs();
        Self {
            workdir,
            datadir,
            compat_version: compat_version(),
            gpgv: None,
            http_timeout_secs: DEFAULT_TIMEOUT_SECS,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl ModhubConfig {
    /// Load `path`, or the default config file when `path` is `None`
    ///
    /// A missing file yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => match default_config_path() {
                Some(path) => path,
                None => return Ok(Self::default()),
            },
        };

        if !path.exists() {
            tracing::debug!("No configuration at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path)?;
        Self::from_yaml(&content).map_err(|e| match e {
            ModhubError::Config(reason) => {
                ModhubError::Config(format!("{}: {reason}", path.display()))
            }
            other => other,
        })
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        // An empty document deserializes to unit, not to a mapping
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml_ng::from_str(content).map_err(|e| ModhubError::Config(e.to_string()))
    }

    pub fn layout(&self) -> Layout {
        Layout::new(&self.workdir, &self.datadir, &self.compat_version)
    }

    /// Verifier from `gpgv`, `MODHUB_GPGV` or the `PATH`, in that order
    pub fn verifier_locator(&self) -> VerifierLocator {
        let locator = VerifierLocator::from_env();
        match &self.gpgv {
            Some(path) => locator.with_override(Some(path.clone())),
            None => locator,
        }
    }

    /// Production collaborators: HTTP transport, gpgv verifier if found
    pub fn collaborators(&self) -> Result<Collaborators> {
        let transport = HttpTransport::with_options(self.http_timeout_secs, &self.user_agent)?;
        let verifier = self
            .verifier_locator()
            .verifier()
            .map(|v| Arc::new(v) as Arc<dyn SignatureVerifier>);

        if verifier.is_none() {
            tracing::debug!("No signature verifier found");
        }

        Ok(Collaborators::new(Arc::new(transport)).with_verifier(verifier))
    }

    /// Open the repository set this configuration describes
    pub fn open_repositories(&self) -> Result<RepositorySet> {
        RepositorySet::open(self.layout(), self.collaborators()?)
    }
}

/// `major.minor` of this crate
pub fn compat_version() -> String {
    let mut parts = env!("CARGO_PKG_VERSION").split('.');
    match (parts.next(), parts.next()) {
        (Some(major), Some(minor)) => format!("{major}.{minor}"),
        _ => env!("CARGO_PKG_VERSION").to_string(),
    }
}

/// `<config dir>/config.yaml`
pub fn default_config_path() -> Option<PathBuf> {
    project_dirs()
        .map(|dirs| dirs.config_dir().to_path_buf())
        .or_else(|| dirs::config_dir().map(|d| d.join("modhub")))
        .map(|dir| dir.join(CONFIG_FILE))
}

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("dev", "modhub", "modhub")
}

fn default_dirs() -> (PathBuf, PathBuf) {
    if let Some(dirs) = project_dirs() {
        return (
            dirs.config_dir().to_path_buf(),
            dirs.data_dir().to_path_buf(),
        );
    }
    let fallback = dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".modhub");
    (fallback.clone(), fallback)
}
