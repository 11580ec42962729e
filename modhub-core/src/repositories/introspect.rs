//! Reading the declared metadata of a module source tree
//!
//! Index builds ask a [`ModuleIntrospector`] what each directory declares.
//! The default [`ManifestIntrospector`] reads a static `manifest.yaml`, so
//! building an index never executes module code.

use serde::Deserialize;
use std::path::Path;

use super::module_info::split_capabilities;
use crate::error::{ModhubError, Result};

/// Manifest file expected at the root of every module tree
pub const MANIFEST_FILE: &str = "manifest.yaml";

/// What a module declares about itself
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ModuleDeclaration {
    pub name: String,
    pub capabilities: Vec<String>,
    pub description: String,
    pub maintainer: String,
    pub license: String,
    pub icon: String,
    pub urls: String,
}

/// Extracts a [`ModuleDeclaration`] from a module directory
pub trait ModuleIntrospector: Send + Sync {
    fn introspect(&self, module_dir: &Path) -> Result<ModuleDeclaration>;
}

/// On-disk shape of `manifest.yaml`
#[derive(Debug, Deserialize)]
struct Manifest {
    name: String,
    #[serde(default)]
    capabilities: Capabilities,
    #[serde(default)]
    description: String,
    #[serde(default)]
    maintainer: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    license: String,
    #[serde(default)]
    icon: String,
    #[serde(default)]
    urls: Urls,
}

/// Capabilities may be a YAML list or a space-separated string
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Capabilities {
    List(Vec<String>),
    Inline(String),
}

impl Default for Capabilities {
    fn default() -> Self {
        Capabilities::List(Vec::new())
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Urls {
    List(Vec<String>),
    Inline(String),
}

impl Default for Urls {
    fn default() -> Self {
        Urls::Inline(String::new())
    }
}

/// Reads `<module_dir>/manifest.yaml`
#[derive(Debug, Default, Clone, Copy)]
pub struct ManifestIntrospector;

impl ModuleIntrospector for ManifestIntrospector {
    fn introspect(&self, module_dir: &Path) -> Result<ModuleDeclaration> {
        let manifest_path = module_dir.join(MANIFEST_FILE);
        let invalid = |reason: String| ModhubError::InvalidManifest {
            path: manifest_path.clone(),
            reason,
        };

        let content = std::fs::read_to_string(&manifest_path)
            .map_err(|e| invalid(format!("cannot read manifest: {e}")))?;
        let manifest: Manifest =
            serde_yaml_ng::from_str(&content).map_err(|e| invalid(e.to_string()))?;

        validate_name(&manifest.name).map_err(&invalid)?;

        let dir_name = module_dir
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default();
        if manifest.name != dir_name {
            return Err(invalid(format!(
                "declares name '{}' but lives in directory '{}'",
                manifest.name, dir_name
            )));
        }

        let capabilities = match manifest.capabilities {
            Capabilities::List(list) => split_capabilities(&list.join(" ")),
            Capabilities::Inline(raw) => split_capabilities(&raw),
        };

        let maintainer = match manifest.email {
            Some(email) if !email.is_empty() => format!("{} <{}>", manifest.maintainer, email),
            _ => manifest.maintainer,
        };

        let urls = match manifest.urls {
            Urls::List(list) => list.join(" "),
            Urls::Inline(raw) => raw,
        };

        Ok(ModuleDeclaration {
            name: manifest.name,
            capabilities,
            description: manifest.description.split_whitespace().collect::<Vec<_>>().join(" "),
            maintainer,
            license: manifest.license,
            icon: manifest.icon,
            urls,
        })
    }
}

/// Module names are flat identifiers usable as directory and section names
pub fn validate_name(name: &str) -> std::result::Result<(), String> {
    if name.is_empty() {
        return Err("module name cannot be empty".to_string());
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(format!(
            "module name '{name}' may only contain letters, digits, '_' and '-'"
        ));
    }
    Ok(())
}
