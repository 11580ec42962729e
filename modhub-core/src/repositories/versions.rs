//! Installed module versions (`versions.list`)
//!
//! Tracks which version of each module is extracted in the module cache,
//! enabling upgrades. Stored as the defaults section of an INI file,
//! `name = version`.

use ini::Ini;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use super::store::{load_ini, save_ini};
use crate::error::{ModhubError, Result};

/// File name inside the module cache
pub const VERSIONS_FILE: &str = "versions.list";

/// Persisted map of module name to installed version
#[derive(Debug, Clone)]
pub struct VersionsRegistry {
    path: PathBuf,
    versions: BTreeMap<String, u64>,
}

impl VersionsRegistry {
    /// Load `versions.list` from `modules_dir`, or start empty if absent
    pub fn open(modules_dir: &Path) -> Result<Self> {
        let path = modules_dir.join(VERSIONS_FILE);
        let mut versions = BTreeMap::new();

        if path.exists() {
            let ini = load_ini(&path)?;
            for (name, value) in ini.general_section().iter() {
                match value.trim().parse::<u64>() {
                    Ok(version) => {
                        versions.insert(name.to_string(), version);
                    }
                    Err(_) => {
                        tracing::warn!("Ignoring invalid version '{}' for module {}", value, name);
                    }
                }
            }
        }

        Ok(Self { path, versions })
    }

    pub fn get(&self, name: &str) -> Option<u64> {
        self.versions.get(name).copied()
    }

    /// Record `version` for `name` in memory
    ///
    /// Call [`save`](Self::save) to persist.
    pub fn set(&mut self, name: &str, version: u64) -> Result<()> {
        if let Some(current) = self.get(name) {
            if version < current {
                return Err(ModhubError::module_install(format!(
                    "{name} is installed at {current}, refusing to record older {version}"
                )));
            }
        }
        self.versions.insert(name.to_string(), version);
        Ok(())
    }

    /// Atomically write the registry to disk
    pub fn save(&self) -> Result<()> {
        let mut ini = Ini::new();
        for (name, version) in &self.versions {
            ini.with_general_section().set(name.as_str(), version.to_string());
        }
        save_ini(&self.path, &ini)
    }

    /// Installed module names, sorted
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.versions.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
