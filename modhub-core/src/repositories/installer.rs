//! Module package extraction
//!
//! Packages are gzip tarballs with a single top-level `<name>/` directory.
//! They are unpacked into a staging directory inside the module cache and
//! moved into place only once the whole archive extracted cleanly, so a bad
//! package never leaves a half-written module behind.

use flate2::read::GzDecoder;
use std::io::Cursor;
use std::path::{Component, Path, PathBuf};
use tar::{Archive, EntryType};

use crate::error::{ModhubError, Result};

/// Extracts packages into the module cache
#[derive(Debug, Clone)]
pub struct Installer {
    modules_dir: PathBuf,
}

impl Installer {
    pub fn with_modules_dir(modules_dir: PathBuf) -> Self {
        Self { modules_dir }
    }

    /// Directory an installed module lives in
    pub fn install_path(&self, name: &str) -> PathBuf {
        self.modules_dir.join(name)
    }

    pub fn is_installed(&self, name: &str) -> bool {
        self.install_path(name).is_dir()
    }

    /// Replace the installed copy of `name` with the content of `package`
    pub fn extract(&self, name: &str, package: &[u8]) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.modules_dir)?;

        let staging = tempfile::Builder::new()
            .prefix(".staging-")
            .tempdir_in(&self.modules_dir)?;

        unpack_checked(name, package, staging.path()).map_err(|reason| {
            ModhubError::module_install(format!("the archive for {name} looks invalid: {reason}"))
        })?;

        let extracted = staging.path().join(name);
        if !extracted.is_dir() {
            return Err(ModhubError::module_install(format!(
                "the archive for {name} looks invalid: no '{name}/' directory"
            )));
        }

        let install_dir = self.install_path(name);
        if install_dir.exists() {
            std::fs::remove_dir_all(&install_dir)?;
        }
        std::fs::rename(&extracted, &install_dir)?;

        tracing::debug!("Extracted {} into {:?}", name, install_dir);
        Ok(install_dir)
    }
}

/// Unpack `package` into `dest`, rejecting entries outside `<name>/`
fn unpack_checked(name: &str, package: &[u8], dest: &Path) -> std::result::Result<(), String> {
    let mut archive = Archive::new(GzDecoder::new(Cursor::new(package)));
    let entries = archive.entries().map_err(|e| e.to_string())?;

    let mut count = 0usize;
    for entry in entries {
        let mut entry = entry.map_err(|e| e.to_string())?;
        let path = entry.path().map_err(|e| e.to_string())?.into_owned();

        if !is_under_module(name, &path) {
            return Err(format!("unexpected entry {}", path.display()));
        }
        match entry.header().entry_type() {
            EntryType::Regular | EntryType::Directory => {}
            other => {
                return Err(format!(
                    "unsupported entry type {:?} for {}",
                    other,
                    path.display()
                ))
            }
        }

        let unpacked = entry.unpack_in(dest).map_err(|e| e.to_string())?;
        if !unpacked {
            return Err(format!("entry {} escapes the archive", path.display()));
        }
        count += 1;
    }

    if count == 0 {
        return Err("empty archive".to_string());
    }
    Ok(())
}

/// `path` is `<name>` or below it, with no parent or absolute components
fn is_under_module(name: &str, path: &Path) -> bool {
    let mut components = path
        .components()
        .filter(|component| !matches!(component, Component::CurDir));

    match components.next() {
        Some(Component::Normal(first)) if first == name => {}
        _ => return false,
    }
    components.all(|component| matches!(component, Component::Normal(_)))
}
