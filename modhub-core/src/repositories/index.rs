//! One repository and its index (`modules.list`)
//!
//! The index is an INI file: a defaults section describing the repository
//! followed by one section per module.
//!
//! ```text
//! name = main
//! update = 201401011200
//! maintainer = Repo Team <team@example.org>
//! signed = 1
//! key_update = 201312010000
//!
//! [bank]
//! version = 201401010000
//! capabilities = CapBank CapProfile
//! ...
//! ```

use chrono::{DateTime, Datelike, Local, NaiveDate, TimeZone, Timelike};
use ini::{Ini, Properties};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use walkdir::WalkDir;

use super::introspect::ModuleIntrospector;
use super::keyring::Keyring;
use super::module_info::ModuleInfo;
use super::sources::location_filename;
use super::store::{parse_ini, save_ini};
use super::transport::Transport;
use super::verifier::SignatureVerifier;
use crate::error::{ModhubError, Result};

/// Index file name, both remotely and in local source trees
pub const INDEX_FILE: &str = "modules.list";

/// Keyring file published by signed repositories
pub const KEYRING_FILE: &str = "trusted.gpg";

/// Directory of a source tree holding the signing keys
pub const KEY_DIR: &str = ".keys";

/// Explicit defaults section name, equivalent to keys before any section
const DEFAULT_SECTION: &str = "DEFAULT";

/// Build outputs that never count towards a module version
pub const COMPILED_EXTENSIONS: &[&str] = &["pyc", "pyo", "o"];

/// What [`Repository::retrieve_keyring`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyringUpdate {
    /// Nothing to do: local or unsigned repository, or keyring current
    Unchanged,
    /// First keyring for this repository, accepted without verification
    Bootstrapped,
    /// A newer keyring validated by the previously trusted one
    Renewed,
}

/// A source of modules
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Repository {
    /// `file://` path or `http(s)://` URL
    pub location: String,
    pub name: String,
    /// When the index was generated
    pub update: u64,
    pub maintainer: String,
    pub signed: bool,
    /// Version of the keyring the repository currently publishes
    pub key_update: u64,
    pub local: bool,
    pub modules: BTreeMap<String, ModuleInfo>,
}

impl Repository {
    /// A not-yet-retrieved repository at `location`
    pub fn new(location: &str) -> Result<Self> {
        let local = if location.starts_with("file://") {
            true
        } else if location.starts_with("http://") || location.starts_with("https://") {
            false
        } else {
            return Err(ModhubError::repository_unavailable(format!(
                "unsupported repository location '{location}'"
            )));
        };

        Ok(Self {
            location: location.to_string(),
            name: String::new(),
            update: 0,
            maintainer: String::new(),
            signed: false,
            key_update: 0,
            local,
            modules: BTreeMap::new(),
        })
    }

    /// Rebuild a repository from a private cached index
    ///
    /// The cache must carry the origin `url`.
    pub fn from_cache(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            ModhubError::repository_unavailable(format!("cannot read {}: {e}", path.display()))
        })?;

        let mut repository = Self {
            location: String::new(),
            name: String::new(),
            update: 0,
            maintainer: String::new(),
            signed: false,
            key_update: 0,
            local: false,
            modules: BTreeMap::new(),
        };
        repository.parse(&text, true)?;
        Ok(repository)
    }

    /// Source tree path of a local repository
    pub fn local_path(&self) -> PathBuf {
        PathBuf::from(self.location.strip_prefix("file://").unwrap_or(&self.location))
    }

    /// URL of a file published next to the index
    pub fn file_url(&self, file: &str) -> String {
        join_url(&self.location, file)
    }

    /// Replace repository metadata and modules with the content of an index
    pub fn parse_index(&mut self, text: &str) -> Result<()> {
        self.parse(text, false)
    }

    fn parse(&mut self, text: &str, require_url: bool) -> Result<()> {
        let ini = parse_ini(text).map_err(|e| {
            ModhubError::repository_unavailable(format!("malformed repository index: {e}"))
        })?;
        let defaults = defaults_section(&ini);

        let required = |key: &str| -> Result<String> {
            defaults
                .get(key)
                .map(|v| v.trim().to_string())
                .ok_or_else(|| {
                    ModhubError::repository_unavailable(format!(
                        "missing global parameter '{key}' in repository index"
                    ))
                })
        };
        let number = |key: &str, raw: &str| -> Result<u64> {
            raw.parse::<u64>().map_err(|_| {
                ModhubError::repository_unavailable(format!(
                    "incorrect value '{raw}' for '{key}' in repository index"
                ))
            })
        };

        let name = required("name")?;
        let update = number("update", &required("update")?)?;
        let maintainer = required("maintainer")?;
        let signed = number("signed", defaults.get("signed").unwrap_or("0").trim())? != 0;
        let key_update = number("key_update", defaults.get("key_update").unwrap_or("0").trim())?;

        if name.is_empty() {
            return Err(ModhubError::repository_unavailable(
                "repository name is empty",
            ));
        }

        // Only cached copies may set the location. A fetched index is bound to
        // the location it was fetched from.
        let url = defaults.get("url").map(str::trim).filter(|url| !url.is_empty());
        let (location, local) = match url {
            Some(url) if require_url => (url.to_string(), url.starts_with("file://")),
            None if require_url => {
                return Err(ModhubError::repository_unavailable(
                    "missing \"url\" key in cached repository index",
                ));
            }
            Some(url) => {
                if url != self.location {
                    tracing::warn!(
                        "Ignoring url {} announced by repository {}",
                        url,
                        self.location
                    );
                }
                (self.location.clone(), self.local)
            }
            None => (self.location.clone(), self.local),
        };
        let local_path = PathBuf::from(location.strip_prefix("file://").unwrap_or(&location));

        let mut modules = BTreeMap::new();
        for (section, properties) in ini.iter() {
            let Some(module_name) = section else { continue };
            if module_name == DEFAULT_SECTION {
                continue;
            }

            let mut module = ModuleInfo::from_section(module_name, properties, &defaults)?;
            module.repository_url = location.clone();
            if local {
                module.source_path = Some(local_path.clone());
            } else {
                module.package_url = Some(join_url(&location, &format!("{module_name}.tar.gz")));
                module.signed = signed;
            }
            modules.insert(module_name.to_string(), module);
        }

        self.location = location;
        self.local = local;
        self.name = name;
        self.update = update;
        self.maintainer = maintainer;
        self.signed = signed;
        self.key_update = key_update;
        self.modules = modules;
        Ok(())
    }

    /// Rescan the module source trees under `source` and write `index_path`
    pub fn build_index(
        &mut self,
        source: &Path,
        index_path: &Path,
        introspector: &dyn ModuleIntrospector,
    ) -> Result<()> {
        tracing::debug!("Rebuilding index of {}", source.display());

        let key_dir = source.join(KEY_DIR);
        if key_dir.is_dir() {
            self.signed = true;
            self.key_update = tree_mtime(&key_dir, true)?;
        } else {
            self.signed = false;
            self.key_update = 0;
        }

        let mut entries: Vec<_> = std::fs::read_dir(source)?
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_dir())
            .filter_map(|e| e.file_name().into_string().ok().map(|name| (name, e.path())))
            .filter(|(name, _)| !name.contains('.') && name != KEY_DIR)
            .collect();
        entries.sort();

        let mut modules = BTreeMap::new();
        for (dir_name, module_path) in entries {
            let declaration = match introspector.introspect(&module_path) {
                Ok(declaration) => declaration,
                Err(e) => {
                    tracing::warn!("Unable to build module {}: {}", dir_name, e);
                    continue;
                }
            };

            let module = ModuleInfo {
                version: tree_mtime(&module_path, false)?,
                name: declaration.name.clone(),
                capabilities: declaration.capabilities,
                description: declaration.description,
                maintainer: declaration.maintainer,
                license: declaration.license,
                icon: declaration.icon,
                urls: declaration.urls,
                package_url: None,
                repository_url: self.location.clone(),
                signed: false,
                install_path: None,
                source_path: Some(source.to_path_buf()),
            };
            modules.insert(declaration.name, module);
        }

        self.modules = modules;
        self.update = mtime_version(SystemTime::now());
        self.save(index_path, false)
    }

    /// Fetch (remote) or rebuild (local) the index and cache it at `cache_path`
    pub fn retrieve_index(
        &mut self,
        transport: &dyn Transport,
        cache_path: &Path,
        introspector: &dyn ModuleIntrospector,
    ) -> Result<()> {
        if self.local {
            self.retrieve_local_index(introspector)?;
        } else {
            let url = self.file_url(INDEX_FILE);
            let bytes = transport
                .fetch(&url)
                .map_err(|e| ModhubError::repository_unavailable(e.to_string()))?;
            let text = String::from_utf8(bytes).map_err(|_| {
                ModhubError::repository_unavailable(format!("{url} is not valid UTF-8"))
            })?;
            self.parse_index(&text)?;
        }

        tracing::debug!(
            "Retrieved index of {} ({} modules)",
            self.location,
            self.modules.len()
        );
        self.save(cache_path, true)
    }

    fn retrieve_local_index(&mut self, introspector: &dyn ModuleIntrospector) -> Result<()> {
        let root = self.local_path();
        if !root.is_dir() {
            return Err(ModhubError::repository_unavailable(format!(
                "local repository {} is not a directory",
                root.display()
            )));
        }

        let index_path = root.join(INDEX_FILE);
        match std::fs::read_to_string(&index_path) {
            Ok(text) => self.parse_index(&text)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No index in {}, building one", root.display());
                self.name = location_filename(&self.location);
            }
            Err(e) => {
                return Err(ModhubError::repository_unavailable(format!(
                    "cannot read {}: {e}",
                    index_path.display()
                )))
            }
        }

        // Source trees change under our feet, never trust the stored index
        self.build_index(&root, &index_path, introspector)
            .map_err(|e| match e {
                ModhubError::RepositoryUnavailable(_) => e,
                other => ModhubError::repository_unavailable(format!(
                    "cannot build index of {}: {other}",
                    root.display()
                )),
            })
    }

    /// Bring the local keyring of this repository up to date
    ///
    /// The first keyring is trusted as fetched. Later keyrings must be
    /// signed by the one already stored.
    pub fn retrieve_keyring(
        &self,
        transport: &dyn Transport,
        keyring: &Keyring,
        verifier: &dyn SignatureVerifier,
    ) -> Result<KeyringUpdate> {
        if self.local {
            return Ok(KeyringUpdate::Unchanged);
        }

        if !self.signed {
            if keyring.exists() {
                return Err(ModhubError::repository_unavailable(format!(
                    "previously signed repository {} can not go unsigned",
                    self.location
                )));
            }
            return Ok(KeyringUpdate::Unchanged);
        }

        let fetch = |file: &str| {
            transport
                .fetch(&self.file_url(file))
                .map_err(|e| ModhubError::repository_unavailable(e.to_string()))
        };

        match keyring.version() {
            None => {
                let material = fetch(KEYRING_FILE)?;
                if material.trim_ascii().is_empty() {
                    return Err(ModhubError::repository_unavailable(format!(
                        "{} publishes an empty keyring",
                        self.location
                    )));
                }
                keyring.save(&material, self.key_update)?;
                tracing::info!(
                    "First time saving the keyring of {}, blindly accepted",
                    self.location
                );
                tracing::info!("{}", keyring);
                Ok(KeyringUpdate::Bootstrapped)
            }
            Some(current) if self.key_update > current || keyring.is_pending() => {
                let material = fetch(KEYRING_FILE)?;
                let signature = fetch(&format!("{KEYRING_FILE}.sig"))?;
                if !keyring.is_valid(verifier, &material, &signature) {
                    let err = ModhubError::InvalidSignature(format!(
                        "new keyring of {} is not signed by the trusted keyring",
                        self.location
                    ));
                    err.log_if_trust_failure();
                    return Err(err);
                }
                keyring.save(&material, self.key_update)?;
                tracing::info!(
                    "The keyring of {} was updated (and validated by the previous one)",
                    self.location
                );
                tracing::info!("{}", keyring);
                Ok(KeyringUpdate::Renewed)
            }
            Some(_) => Ok(KeyringUpdate::Unchanged),
        }
    }

    /// Write the index to `path`
    ///
    /// `private` adds the origin `url`, for the local cache only.
    pub fn save(&self, path: &Path, private: bool) -> Result<()> {
        let mut ini = Ini::new();
        ini.with_general_section()
            .set("name", self.name.as_str())
            .set("update", self.update.to_string())
            .set("maintainer", self.maintainer.as_str())
            .set("signed", if self.signed { "1" } else { "0" })
            .set("key_update", self.key_update.to_string());
        if private {
            ini.with_general_section().set("url", self.location.as_str());
        }

        for module in self.modules.values() {
            let mut section = ini.with_section(Some(module.name.as_str()));
            for (key, value) in module.to_properties() {
                section.set(key, value);
            }
        }

        save_ini(path, &ini)
    }
}

/// Defaults from keys before any header, overlaid by an explicit `[DEFAULT]`
fn defaults_section(ini: &Ini) -> Properties {
    let mut defaults = ini.general_section().clone();
    if let Some(explicit) = ini.section(Some(DEFAULT_SECTION)) {
        for (key, value) in explicit.iter() {
            defaults.insert(key, value);
        }
    }
    defaults
}

/// Join a file name to a repository location
pub fn join_url(base: &str, file: &str) -> String {
    if base.ends_with('/') {
        format!("{base}{file}")
    } else {
        format!("{base}/{file}")
    }
}

/// `YYYYMMDDHHMM` in local time
pub fn mtime_version(time: SystemTime) -> u64 {
    let local: DateTime<Local> = time.into();
    u64::from(local.year().max(0) as u32) * 100_000_000
        + u64::from(local.month()) * 1_000_000
        + u64::from(local.day()) * 10_000
        + u64::from(local.hour()) * 100
        + u64::from(local.minute())
}

/// Inverse of [`mtime_version`], `None` for values that are not a valid date
pub fn version_time(version: u64) -> Option<SystemTime> {
    let minute = (version % 100) as u32;
    let hour = (version / 100 % 100) as u32;
    let day = (version / 10_000 % 100) as u32;
    let month = (version / 1_000_000 % 100) as u32;
    let year = i32::try_from(version / 100_000_000).ok()?;

    let naive = NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(hour, minute, 0)?;
    let local = Local.from_local_datetime(&naive).earliest()?;
    Some(local.into())
}

/// Latest modification version of the files under `path`
///
/// With `include_root`, the directory itself counts as well.
pub fn tree_mtime(path: &Path, include_root: bool) -> Result<u64> {
    let mut version = 0;
    if include_root {
        version = mtime_version(std::fs::metadata(path)?.modified()?);
    }

    for entry in WalkDir::new(path) {
        let entry = entry.map_err(|e| {
            std::io::Error::other(format!("cannot walk {}: {e}", path.display()))
        })?;
        if !entry.file_type().is_file() || is_compiled_artifact(entry.path()) {
            continue;
        }
        let modified = entry.metadata().map_err(std::io::Error::other)?.modified()?;
        version = version.max(mtime_version(modified));
    }

    Ok(version)
}

/// Whether a file is a build output excluded from versions and archives
pub fn is_compiled_artifact(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| COMPILED_EXTENSIONS.contains(&ext))
}
