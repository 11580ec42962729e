//! The sources list (`sources.list`)
//!
//! One repository location per line. Order matters: a repository listed
//! below overrides the modules of the same name listed above it.

use regex::Regex;
use sha2::{Digest, Sha256};
use std::path::Path;

use crate::error::{ModhubError, Result};

/// File name of the sources list inside the work directory
pub const SOURCES_LIST_FILE: &str = "sources.list";

/// Hex digits of the location digest kept in file names
const LOCATION_DIGEST_LEN: usize = 8;

/// Placeholder replaced by the compatibility version
pub const VERSION_PLACEHOLDER: &str = "%(version)s";

/// Written on first run when no sources list exists
pub const DEFAULT_SOURCES_LIST: &str = "\
# List of modhub repositories
#
# The entries below override the entries above (with
# modules of the same name).

https://updates.modhub.dev/%(version)s/main/

# DEVELOPMENT
# If you want to hack on modules, you may add a
# reference to your source tree, for example:
#file:///home/user/src/modules/
";

/// Extract the repository locations from sources-list text
pub fn parse_sources(text: &str, compat_version: &str) -> Result<Vec<String>> {
    let location = Regex::new(r"^(file|https?)://").map_err(|e| ModhubError::Config(e.to_string()))?;

    Ok(text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| line.replace(VERSION_PLACEHOLDER, compat_version))
        .filter(|line| location.is_match(line))
        .collect())
}

/// Read the locations listed in `path`
pub fn read_sources(path: &Path, compat_version: &str) -> Result<Vec<String>> {
    let text = std::fs::read_to_string(path)?;
    parse_sources(&text, compat_version)
}

/// Write the default sources list if `path` does not exist yet
///
/// Returns whether a file was written.
pub fn ensure_sources_list(path: &Path) -> Result<bool> {
    if path.exists() {
        return Ok(false);
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, DEFAULT_SOURCES_LIST)?;
    tracing::info!("Created default sources list at {}", path.display());
    Ok(true)
}

/// File-system safe name for a location
///
/// Every non-alphanumeric character becomes `_`, followed by a short digest
/// of the location so that distinct locations never share a name.
pub fn location_filename(location: &str) -> String {
    let readable: String = location
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect();
    let digest = hex::encode(Sha256::digest(location.as_bytes()));
    format!("{readable}-{}", &digest[..LOCATION_DIGEST_LEN])
}

/// Name of the cached index for the repository at `position`
pub fn cache_filename(position: usize, location: &str) -> String {
    format!("{:02}-{}", position, location_filename(location))
}
