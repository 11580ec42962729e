//! On-disk layout of the module store

use std::path::{Path, PathBuf};

use super::sources::{location_filename, SOURCES_LIST_FILE};
use crate::error::{ModhubError, Result};

pub const MODULES_DIR: &str = "modules";
pub const REPOSITORIES_DIR: &str = "repositories";
pub const KEYRINGS_DIR: &str = "keyrings";
pub const ICONS_DIR: &str = "icons";

/// Paths under the work and data directories
///
/// ```text
/// <workdir>/sources.list
/// <datadir>/modules/<compat>/<module>/...
/// <datadir>/modules/<compat>/versions.list
/// <datadir>/repositories/<NN>-<location>
/// <datadir>/keyrings/<location>.gpg + .version
/// <datadir>/icons/<module>.png
/// ```
#[derive(Debug, Clone)]
pub struct Layout {
    pub sources_list: PathBuf,
    pub modules_dir: PathBuf,
    pub repositories_dir: PathBuf,
    pub keyrings_dir: PathBuf,
    pub icons_dir: PathBuf,
    pub compat_version: String,
}

impl Layout {
    pub fn new(workdir: &Path, datadir: &Path, compat_version: &str) -> Self {
        Self {
            sources_list: workdir.join(SOURCES_LIST_FILE),
            modules_dir: datadir.join(MODULES_DIR).join(compat_version),
            repositories_dir: datadir.join(REPOSITORIES_DIR),
            keyrings_dir: datadir.join(KEYRINGS_DIR),
            icons_dir: datadir.join(ICONS_DIR),
            compat_version: compat_version.to_string(),
        }
    }

    /// Create every directory of the layout
    pub fn ensure(&self) -> Result<()> {
        let workdir = self.sources_list.parent().unwrap_or(Path::new("."));
        for dir in [
            workdir,
            self.modules_dir.as_path(),
            self.repositories_dir.as_path(),
            self.keyrings_dir.as_path(),
            self.icons_dir.as_path(),
        ] {
            if dir.exists() && !dir.is_dir() {
                return Err(ModhubError::Config(format!(
                    "{} exists but is not a directory",
                    dir.display()
                )));
            }
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    /// Extraction directory of an installed module
    pub fn module_dir(&self, name: &str) -> PathBuf {
        self.modules_dir.join(name)
    }

    /// Keyring base path of the repository at `location`
    pub fn keyring_base(&self, location: &str) -> PathBuf {
        self.keyrings_dir.join(location_filename(location))
    }

    pub fn icon_path(&self, name: &str) -> PathBuf {
        self.icons_dir.join(format!("{name}.png"))
    }
}
