//! Crash-safe persistence for the small INI files this subsystem keeps
//!
//! The repository index, the versions registry and the keyring companion
//! files are all replaced with [`write_atomic`]: the new content goes to a
//! temporary file in the destination directory, is flushed to disk, then
//! renamed over the target.

use ini::{Ini, ParseOption};
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

use crate::error::{ModhubError, Result};

/// Parse options shared by every reader: values are taken verbatim.
fn parse_options() -> ParseOption {
    ParseOption {
        enabled_quote: false,
        ..Default::default()
    }
}

/// Atomically replace `path` with `contents`
pub fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;

    let mut temp = NamedTempFile::new_in(dir)?;
    temp.write_all(contents)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| e.error)?;

    tracing::trace!("Wrote {} bytes to {}", contents.len(), path.display());
    Ok(())
}

/// Parse INI text with the shared options
pub fn parse_ini(text: &str) -> std::result::Result<Ini, ini::ParseError> {
    Ini::load_from_str_opt(text, parse_options())
}

/// Load an INI file from disk
pub fn load_ini(path: &Path) -> Result<Ini> {
    let text = std::fs::read_to_string(path)?;
    parse_ini(&text).map_err(|source| ModhubError::Ini {
        path: path.to_path_buf(),
        source,
    })
}

/// Serialize an INI document and atomically write it to `path`
pub fn save_ini(path: &Path, ini: &Ini) -> Result<()> {
    let mut buffer = Vec::new();
    ini.write_to(&mut buffer)?;
    write_atomic(path, &buffer)?;
    Ok(())
}
