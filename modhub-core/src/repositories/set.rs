//! The configured repositories and the install/update workflow
//!
//! Repositories are kept in sources-list order. When several declare the
//! same module, the one listed last wins, whatever the versions say.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::index::Repository;
use super::installer::Installer;
use super::introspect::{ManifestIntrospector, ModuleIntrospector};
use super::keyring::Keyring;
use super::layout::Layout;
use super::module_info::ModuleInfo;
use super::progress::{Progress, ScaledProgress};
use super::sources::{cache_filename, ensure_sources_list, read_sources};
use super::store::write_atomic;
use super::transport::Transport;
use super::verifier::SignatureVerifier;
use super::versions::VersionsRegistry;
use crate::error::{ModhubError, Result};

/// Services a [`RepositorySet`] relies on
#[derive(Clone)]
pub struct Collaborators {
    pub transport: Arc<dyn Transport>,
    /// `None` when no signature verifier is installed
    pub verifier: Option<Arc<dyn SignatureVerifier>>,
    pub introspector: Arc<dyn ModuleIntrospector>,
}

impl Collaborators {
    /// Collaborators without a verifier, using the manifest introspector
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            verifier: None,
            introspector: Arc::new(ManifestIntrospector),
        }
    }

    pub fn with_verifier(mut self, verifier: Option<Arc<dyn SignatureVerifier>>) -> Self {
        self.verifier = verifier;
        self
    }

    pub fn with_introspector(mut self, introspector: Arc<dyn ModuleIntrospector>) -> Self {
        self.introspector = introspector;
        self
    }
}

/// Outcome of [`RepositorySet::update`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateSummary {
    /// Modules upgraded, with their new version
    pub installed: Vec<(String, u64)>,
    /// Modules already at the latest known version
    pub up_to_date: Vec<String>,
    /// Installed modules no repository declares anymore
    pub unavailable: Vec<String>,
    /// Modules whose upgrade failed, with the reason
    pub failed: Vec<(String, String)>,
}

/// All configured repositories plus the local module store
pub struct RepositorySet {
    layout: Layout,
    collaborators: Collaborators,
    installer: Installer,
    versions: VersionsRegistry,
    repositories: Vec<Repository>,
    first_run: bool,
}

impl RepositorySet {
    /// Open the store described by `layout` and load the cached indexes
    ///
    /// Writes the default sources list when none exists yet; see
    /// [`is_first_run`](Self::is_first_run).
    pub fn open(layout: Layout, collaborators: Collaborators) -> Result<Self> {
        layout.ensure()?;
        let first_run = ensure_sources_list(&layout.sources_list)?;
        let versions = VersionsRegistry::open(&layout.modules_dir)?;
        let installer = Installer::with_modules_dir(layout.modules_dir.clone());

        let mut set = Self {
            layout,
            collaborators,
            installer,
            versions,
            repositories: Vec::new(),
            first_run,
        };
        set.load()?;
        Ok(set)
    }

    /// Whether [`open`](Self::open) had to create the sources list
    pub fn is_first_run(&self) -> bool {
        self.first_run
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn repositories(&self) -> &[Repository] {
        &self.repositories
    }

    pub fn versions(&self) -> &VersionsRegistry {
        &self.versions
    }

    pub fn has_verifier(&self) -> bool {
        self.collaborators.verifier.is_some()
    }

    /// Locations from the sources list, in priority order
    pub fn sources(&self) -> Result<Vec<String>> {
        read_sources(&self.layout.sources_list, &self.layout.compat_version)
    }

    /// Reload repositories from cached indexes, without network access
    pub fn load(&mut self) -> Result<()> {
        self.repositories.clear();

        let mut names: Vec<String> = std::fs::read_dir(&self.layout.repositories_dir)?
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_file())
            .filter_map(|e| e.file_name().into_string().ok())
            .collect();
        names.sort();

        for name in names {
            let path = self.layout.repositories_dir.join(&name);
            match Repository::from_cache(&path) {
                Ok(repository) => self.repositories.push(repository),
                Err(e) => tracing::warn!(
                    "Unable to load repository {} ({}), try to update repositories",
                    name,
                    e
                ),
            }
        }

        tracing::debug!("Loaded {} cached repositories", self.repositories.len());
        Ok(())
    }

    /// Whether every sources-list entry has its cached index
    pub fn check_repositories(&self) -> Result<bool> {
        for (position, location) in self.sources()?.iter().enumerate() {
            let path = self
                .layout
                .repositories_dir
                .join(cache_filename(position, location));
            if !path.is_file() {
                tracing::debug!("Missing cached index {}", path.display());
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Fetch every repository of the sources list again
    ///
    /// A failing repository is reported through `progress` and skipped. It
    /// is an error only when every configured repository failed.
    pub fn update_repositories(&mut self, progress: &dyn Progress) -> Result<()> {
        let locations = self.sources()?;

        self.repositories.clear();
        for entry in std::fs::read_dir(&self.layout.repositories_dir)? {
            let path = entry?.path();
            if path.is_file() {
                std::fs::remove_file(&path)?;
            }
        }

        if self.collaborators.verifier.is_none() && !locations.is_empty() {
            progress.error(
                "Cannot find gpgv to check for repository authenticity.\n\
                 You should install GPG for better security.",
            );
        }

        let total = locations.len().max(1) as f64;
        let mut loaded = Vec::new();
        let mut failures = 0usize;

        for (position, location) in locations.iter().enumerate() {
            progress.progress(position as f64 / total, &format!("Getting {location}"));
            let cache_path = self
                .layout
                .repositories_dir
                .join(cache_filename(position, location));

            match self.retrieve_repository(location, &cache_path) {
                Ok(repository) => loaded.push(repository),
                Err(e) => {
                    e.log_if_trust_failure();
                    progress.error(&format!("Unable to load repository {location}: {e}"));
                    failures += 1;
                    if cache_path.exists() {
                        std::fs::remove_file(&cache_path)?;
                    }
                }
            }
        }

        self.repositories = loaded;

        if !locations.is_empty() && failures == locations.len() {
            return Err(ModhubError::repository_unavailable(format!(
                "none of the {} configured repositories could be loaded",
                locations.len()
            )));
        }

        progress.progress(1.0, "Repositories updated");
        Ok(())
    }

    fn retrieve_repository(&self, location: &str, cache_path: &Path) -> Result<Repository> {
        let mut repository = Repository::new(location)?;
        repository.retrieve_index(
            self.collaborators.transport.as_ref(),
            cache_path,
            self.collaborators.introspector.as_ref(),
        )?;

        if let Some(verifier) = &self.collaborators.verifier {
            let keyring = Keyring::open(&self.layout.keyring_base(location))?;
            repository.retrieve_keyring(
                self.collaborators.transport.as_ref(),
                &keyring,
                verifier.as_ref(),
            )?;
        }

        Ok(repository)
    }

    fn extend_module_info(&self, mut info: ModuleInfo) -> ModuleInfo {
        if !info.is_local() && self.versions.get(&info.name).is_some() {
            info.install_path = Some(self.layout.module_dir(&info.name));
        }
        info
    }

    /// The winning declaration of `name`, if any repository has it
    pub fn get_module_info(&self, name: &str) -> Option<ModuleInfo> {
        self.repositories
            .iter()
            .rev()
            .find_map(|repository| repository.modules.get(name))
            .map(|info| self.extend_module_info(info.clone()))
    }

    /// Every available module, optionally limited to some capabilities
    ///
    /// An empty filter returns everything. Precedence is resolved before
    /// filtering, so an overridden declaration never shows through.
    pub fn get_all_modules_info<S: AsRef<str>>(
        &self,
        capabilities: &[S],
    ) -> BTreeMap<String, ModuleInfo> {
        let mut modules = BTreeMap::new();
        for repository in self.repositories.iter().rev() {
            for (name, info) in &repository.modules {
                modules
                    .entry(name.clone())
                    .or_insert_with(|| self.extend_module_info(info.clone()));
            }
        }

        if !capabilities.is_empty() {
            modules.retain(|_, info| info.has_capabilities(capabilities));
        }
        modules
    }

    /// Every available module, unfiltered
    pub fn all_modules(&self) -> BTreeMap<String, ModuleInfo> {
        self.get_all_modules_info::<&str>(&[])
    }

    /// Install the winning declaration of `name`
    pub fn install(&mut self, name: &str, progress: &dyn Progress) -> Result<PathBuf> {
        progress.progress(0.0, &format!("Looking for module {name}"));
        let info = self
            .get_module_info(name)
            .ok_or_else(|| ModhubError::module_install(format!("Module \"{name}\" does not exist")))?;
        self.install_module(&info, progress)
    }

    /// Download, verify and extract `info`, then record its version
    pub fn install_module(&mut self, info: &ModuleInfo, progress: &dyn Progress) -> Result<PathBuf> {
        let name = info.name.as_str();
        let Some(package_url) = info.package_url.as_deref() else {
            return Err(ModhubError::module_install(format!(
                "{name} is available on local."
            )));
        };

        let present = self.installer.is_installed(name);
        match self.versions.get(name) {
            None => progress.progress(0.1, &format!("Module {name} is not installed yet")),
            Some(installed) if info.version > installed => {
                progress.progress(0.1, &format!("A new version of {name} is available"))
            }
            Some(installed) if info.version == installed && !present => progress.progress(
                0.1,
                &format!("Files of {name} are missing, reinstalling"),
            ),
            Some(_) => {
                return Err(ModhubError::module_install(format!(
                    "The latest version of {name} is already installed"
                )))
            }
        }

        progress.progress(0.2, "Downloading module...");
        let transport = self.collaborators.transport.as_ref();
        let package = transport
            .fetch(package_url)
            .map_err(|e| ModhubError::module_install(format!("Unable to fetch module: {e}")))?;

        if info.signed {
            match &self.collaborators.verifier {
                Some(verifier) => {
                    progress.progress(0.5, "Checking module authenticity...");
                    let signature = transport.fetch(&format!("{package_url}.sig")).map_err(|e| {
                        ModhubError::module_install(format!("Unable to fetch signature: {e}"))
                    })?;

                    let keyring = Keyring::open(&self.layout.keyring_base(&info.repository_url))?;
                    if !keyring.exists() {
                        return Err(ModhubError::module_install(
                            "No keyring found, please update repos.",
                        ));
                    }
                    if !keyring.is_valid(verifier.as_ref(), &package, &signature) {
                        tracing::error!(
                            target: "security",
                            "SIGNATURE CHECK FAILED: package of {} from {}",
                            name,
                            info.repository_url
                        );
                        return Err(ModhubError::module_install(format!(
                            "Invalid signature for {name}."
                        )));
                    }
                }
                None => progress.error(&format!(
                    "Cannot check the authenticity of {name}: no signature verifier available"
                )),
            }
        }

        progress.progress(0.7, "Setting up module...");
        let install_dir = self.installer.extract(name, &package)?;

        self.versions.set(name, info.version)?;
        self.versions.save()?;

        progress.progress(0.9, "Downloading icon...");
        if let Err(e) = self.retrieve_icon(info) {
            tracing::debug!("No icon for {}: {}", name, e);
        }

        progress.progress(1.0, &format!("Module {name} has been installed!"));
        tracing::info!("Installed {} {} into {:?}", name, info.version, install_dir);
        Ok(install_dir)
    }

    /// Where the icon of `name` is stored
    pub fn icon_path(&self, name: &str) -> PathBuf {
        self.layout.icon_path(name)
    }

    /// Store the icon of `info` under the icons directory
    ///
    /// Returns `None` when the module has no icon.
    pub fn retrieve_icon(&self, info: &ModuleInfo) -> Result<Option<PathBuf>> {
        let dest = self.icon_path(&info.name);

        if info.icon.is_empty() && info.is_local() {
            let Some(source) = &info.source_path else {
                return Ok(None);
            };
            let favicon = source.join(&info.name).join("favicon.png");
            if !favicon.is_file() {
                return Ok(None);
            }
            std::fs::copy(&favicon, &dest)?;
            return Ok(Some(dest));
        }

        let Some(url) = info.icon_url() else {
            return Ok(None);
        };
        match self.collaborators.transport.fetch(&url) {
            Ok(bytes) => {
                write_atomic(&dest, &bytes)?;
                Ok(Some(dest))
            }
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Refresh repositories then upgrade every installed remote module
    ///
    /// Module failures are reported through `progress` and collected in the
    /// summary; they never abort the batch.
    pub fn update(&mut self, progress: &dyn Progress) -> Result<UpdateSummary> {
        self.update_repositories(progress)?;

        let mut summary = UpdateSummary::default();
        let mut to_update = Vec::new();
        let installed: Vec<String> = self.versions.names().map(str::to_string).collect();
        for name in installed {
            match self.get_module_info(&name) {
                Some(info) if info.is_local() => {}
                Some(info) => {
                    let current = self.versions.get(&name).unwrap_or(0);
                    if info.version <= current && self.installer.is_installed(&name) {
                        summary.up_to_date.push(name);
                    } else {
                        to_update.push(info);
                    }
                }
                None => summary.unavailable.push(name),
            }
        }

        let count = to_update.len().max(1) as f64;
        for (n, info) in to_update.iter().enumerate() {
            let scaled = ScaledProgress::new(progress, n as f64 / count, 1.0 / count);
            match self.install_module(info, &scaled) {
                Ok(_) => summary.installed.push((info.name.clone(), info.version)),
                Err(e) => {
                    let message = e.to_string();
                    scaled.error(&message);
                    summary.failed.push((info.name.clone(), message));
                }
            }
        }

        tracing::info!(
            "Update finished: {} installed, {} up to date, {} failed",
            summary.installed.len(),
            summary.up_to_date.len(),
            summary.failed.len()
        );
        Ok(summary)
    }
}
