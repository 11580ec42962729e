//! Module metadata as declared by one repository index

use ini::Properties;
use serde::Serialize;
use std::path::PathBuf;

use crate::error::{ModhubError, Result};

/// Metadata for one module in one repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModuleInfo {
    /// Module name, unique within a merged catalog
    pub name: String,

    /// `YYYYMMDDHHMM`-shaped version, compared numerically
    pub version: u64,

    /// Capability tags, in declaration order without duplicates
    pub capabilities: Vec<String>,

    pub description: String,
    pub maintainer: String,
    pub license: String,

    /// Icon URL, empty when the repository does not declare one
    pub icon: String,

    /// Website(s) of the service the module talks to
    pub urls: String,

    /// Package archive URL; `None` for modules of local repositories
    pub package_url: Option<String>,

    /// Location of the repository that declared this module
    pub repository_url: String,

    /// Whether the owning repository signs its packages
    pub signed: bool,

    /// Extraction directory, set once the module is installed
    pub install_path: Option<PathBuf>,

    /// Source tree for modules of local repositories
    pub source_path: Option<PathBuf>,
}

impl ModuleInfo {
    /// Build a module from its index section
    ///
    /// Keys absent from `section` are looked up in `defaults`, like INI
    /// default-section inheritance.
    pub fn from_section(name: &str, section: &Properties, defaults: &Properties) -> Result<Self> {
        let get = |key: &str| -> String {
            section
                .get(key)
                .or_else(|| defaults.get(key))
                .unwrap_or_default()
                .trim()
                .to_string()
        };

        let raw_version = get("version");
        let version = raw_version.parse::<u64>().map_err(|_| {
            ModhubError::repository_unavailable(format!(
                "module '{name}' has an invalid version '{raw_version}'"
            ))
        })?;

        Ok(Self {
            name: name.to_string(),
            version,
            capabilities: split_capabilities(&get("capabilities")),
            description: get("description"),
            maintainer: get("maintainer"),
            license: get("license"),
            icon: get("icon"),
            urls: get("urls"),
            package_url: None,
            repository_url: String::new(),
            signed: false,
            install_path: None,
            source_path: None,
        })
    }

    /// Key/value pairs written to this module's index section
    pub fn to_properties(&self) -> Vec<(&'static str, String)> {
        vec![
            ("version", self.version.to_string()),
            ("capabilities", self.capabilities.join(" ")),
            ("description", self.description.clone()),
            ("maintainer", self.maintainer.clone()),
            ("license", self.license.clone()),
            ("icon", self.icon.clone()),
            ("urls", self.urls.clone()),
        ]
    }

    /// True if the module declares at least one of `capabilities`
    pub fn has_capabilities<S: AsRef<str>>(&self, capabilities: &[S]) -> bool {
        capabilities
            .iter()
            .any(|wanted| self.capabilities.iter().any(|c| c == wanted.as_ref()))
    }

    pub fn is_installed(&self) -> bool {
        self.install_path.is_some()
    }

    /// Local modules are used in place and cannot be installed
    pub fn is_local(&self) -> bool {
        self.package_url.is_none()
    }

    /// Where the module icon can be downloaded from
    ///
    /// Falls back to a `.png` sibling of the package archive.
    pub fn icon_url(&self) -> Option<String> {
        if !self.icon.is_empty() {
            return Some(self.icon.clone());
        }
        self.package_url
            .as_deref()
            .and_then(|url| url.strip_suffix(".tar.gz"))
            .map(|base| format!("{base}.png"))
    }
}

/// Split a space-separated capability list, dropping duplicates
pub fn split_capabilities(raw: &str) -> Vec<String> {
    let mut capabilities: Vec<String> = Vec::new();
    for tag in raw.split_whitespace() {
        if !capabilities.iter().any(|c| c == tag) {
            capabilities.push(tag.to_string());
        }
    }
    capabilities
}
