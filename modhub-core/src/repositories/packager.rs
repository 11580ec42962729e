//! Publishing a repository from module source trees
//!
//! `build_repository` turns a source directory (one subdirectory per module,
//! optionally a `.keys/` directory of public keys) into a directory that can
//! be served as a remote repository:
//!
//! ```text
//! <repo>/modules.list        ← index
//! <repo>/<module>.tar.gz     ← package, mtime = module version
//! <repo>/<module>.png        ← icon, copied from favicon.png
//! <repo>/trusted.gpg         ← keyring (signed repositories)
//! <repo>/*.sig               ← detached signatures (signed repositories)
//! ```
//!
//! Each step only redoes work whose output is missing or stale.

use anyhow::{bail, Context, Result};
use filetime::FileTime;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::SystemTime;
use tar::Builder;
use walkdir::WalkDir;

use super::index::{
    is_compiled_artifact, mtime_version, version_time, Repository, INDEX_FILE, KEYRING_FILE,
    KEY_DIR,
};
use super::introspect::ModuleIntrospector;

/// Produces the keyring and detached signatures of a repository
pub trait Signer {
    /// Assemble `keyring` from the public keys found in `key_dir`
    fn build_keyring(&self, key_dir: &Path, keyring: &Path) -> Result<()>;

    /// Write a detached signature of `file` to `signature`
    fn sign(&self, file: &Path, signature: &Path) -> Result<()>;
}

/// `gpg` command-line signer
#[derive(Debug, Clone)]
pub struct GpgSigner {
    binary: PathBuf,
    key: String,
}

impl GpgSigner {
    /// Sign with `key` (a key id or user id) using the `binary` gpg
    pub fn new(binary: PathBuf, key: impl Into<String>) -> Self {
        Self {
            binary,
            key: key.into(),
        }
    }

    fn run(&self, command: &mut Command, what: &str) -> Result<()> {
        let output = command
            .output()
            .with_context(|| format!("Failed to run {}", self.binary.display()))?;
        if !output.status.success() {
            bail!(
                "{} failed while {}:\n{}",
                self.binary.display(),
                what,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }
}

impl Signer for GpgSigner {
    fn build_keyring(&self, key_dir: &Path, keyring: &Path) -> Result<()> {
        if keyring.exists() {
            std::fs::remove_file(keyring)
                .with_context(|| format!("Failed to remove old keyring {keyring:?}"))?;
        }
        let keyring = std::path::absolute(keyring)?;

        let mut keys: Vec<PathBuf> = std::fs::read_dir(key_dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_file())
            .collect();
        keys.sort();

        if keys.is_empty() {
            bail!("No public keys found in {}", key_dir.display());
        }

        for key in keys {
            self.run(
                Command::new(&self.binary)
                    .arg("--batch")
                    .arg("--no-default-keyring")
                    .arg("--keyring")
                    .arg(&keyring)
                    .arg("--import")
                    .arg(&key),
                &format!("importing {}", key.display()),
            )?;
        }

        // gpg leaves a backup next to the keyring it just wrote
        let mut backup = keyring.as_os_str().to_os_string();
        backup.push("~");
        let _ = std::fs::remove_file(PathBuf::from(backup));
        Ok(())
    }

    fn sign(&self, file: &Path, signature: &Path) -> Result<()> {
        self.run(
            Command::new(&self.binary)
                .arg("--batch")
                .arg("--yes")
                .arg("--local-user")
                .arg(&self.key)
                .arg("--output")
                .arg(signature)
                .arg("--detach-sign")
                .arg(file),
            &format!("signing {}", file.display()),
        )
    }
}

/// What [`build_repository`] produced
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildReport {
    /// Modules in the rebuilt index, with their version
    pub modules: BTreeMap<String, u64>,
    /// Modules whose archive was (re)created
    pub archives: Vec<String>,
    /// Modules whose icon was copied
    pub icons: Vec<String>,
    pub keyring_rebuilt: bool,
    /// Signature files written
    pub signatures: Vec<PathBuf>,
    /// Set when the repository is signed but no signer was given
    pub unsigned: bool,
}

/// Write an empty index for a new repository at `path`
pub fn create_repository(path: &Path, name: &str, maintainer: &str) -> Result<PathBuf> {
    if name.trim().is_empty() {
        bail!("Repository name cannot be empty");
    }

    std::fs::create_dir_all(path)
        .with_context(|| format!("Failed to create repository directory {}", path.display()))?;
    let index_path = path.join(INDEX_FILE);
    if index_path.exists() {
        bail!("A repository already exists at {}", path.display());
    }

    let mut repository = Repository::new(&file_location(path))?;
    repository.name = name.trim().to_string();
    repository.maintainer = maintainer.trim().to_string();
    repository.update = mtime_version(SystemTime::now());
    repository.save(&index_path, false)?;

    tracing::info!("Created repository '{}' at {}", repository.name, path.display());
    Ok(index_path)
}

/// Rebuild the index, packages, icons and signatures of `repo_path`
pub fn build_repository(
    source: &Path,
    repo_path: &Path,
    introspector: &dyn ModuleIntrospector,
    signer: Option<&dyn Signer>,
) -> Result<BuildReport> {
    let index_path = repo_path.join(INDEX_FILE);
    if !index_path.exists() {
        bail!(
            "No repository at {}. Create it first with `modhub repo create`",
            repo_path.display()
        );
    }
    if !source.is_dir() {
        bail!("Source directory {} does not exist", source.display());
    }

    let mut repository = Repository::new(&file_location(repo_path))?;
    let text = std::fs::read_to_string(&index_path)
        .with_context(|| format!("Failed to read {}", index_path.display()))?;
    repository
        .parse_index(&text)
        .with_context(|| format!("Invalid index {}", index_path.display()))?;
    repository
        .build_index(source, &index_path, introspector)
        .context("Failed to rebuild the index")?;

    let mut report = BuildReport::default();
    for module in repository.modules.values() {
        report.modules.insert(module.name.clone(), module.version);

        let archive = repo_path.join(format!("{}.tar.gz", module.name));
        if is_stale(&archive, module.version)? {
            tracing::info!("Create archive for {}", module.name);
            build_archive(&source.join(&module.name), &module.name, module.version, &archive)?;
            report.archives.push(module.name.clone());
        }

        let favicon = source.join(&module.name).join("favicon.png");
        if favicon.is_file() {
            std::fs::copy(&favicon, repo_path.join(format!("{}.png", module.name)))
                .with_context(|| format!("Failed to copy icon of {}", module.name))?;
            report.icons.push(module.name.clone());
        }
    }

    if repository.signed {
        match signer {
            Some(signer) => sign_repository(source, repo_path, &repository, signer, &mut report)?,
            None => {
                tracing::warn!("Repository is signed but no signing key was given, skipping signatures");
                report.unsigned = true;
            }
        }
    }

    Ok(report)
}

fn sign_repository(
    source: &Path,
    repo_path: &Path,
    repository: &Repository,
    signer: &dyn Signer,
    report: &mut BuildReport,
) -> Result<()> {
    let keyring = repo_path.join(KEYRING_FILE);
    if is_stale(&keyring, repository.key_update)? {
        tracing::info!("Create keyring");
        signer.build_keyring(&source.join(KEY_DIR), &keyring)?;
        report.keyring_rebuilt = true;
    }

    let mut files = vec![keyring, repo_path.join(INDEX_FILE)];
    files.extend(
        repository
            .modules
            .keys()
            .map(|name| repo_path.join(format!("{name}.tar.gz"))),
    );

    for file in files {
        let mut signature = file.as_os_str().to_os_string();
        signature.push(".sig");
        let signature = PathBuf::from(signature);

        let signed_at = modified(&signature)?;
        let changed_at = modified(&file)?;
        let needs_signature = match (signed_at, changed_at) {
            (Some(signed_at), Some(changed_at)) => signed_at < changed_at,
            _ => true,
        };

        if needs_signature {
            tracing::info!("Signing {}", file.display());
            signer.sign(&file, &signature)?;
            report.signatures.push(signature);
        }
    }
    Ok(())
}

/// Pack `module_dir` as `<name>/...`, excluding build outputs and images
fn build_archive(module_dir: &Path, name: &str, version: u64, archive: &Path) -> Result<()> {
    let dir = archive.parent().unwrap_or(Path::new("."));
    let temp = tempfile::NamedTempFile::new_in(dir)?;
    {
        let encoder = GzEncoder::new(temp.as_file(), Compression::default());
        let mut builder = Builder::new(encoder);
        builder.follow_symlinks(false);

        for entry in WalkDir::new(module_dir).sort_by_file_name() {
            let entry = entry?;
            let path = entry.path();
            let relative = path.strip_prefix(module_dir)?;
            let archive_name = Path::new(name).join(relative);

            if entry.file_type().is_dir() {
                builder.append_dir(&archive_name, path)?;
            } else if entry.file_type().is_file() {
                if is_compiled_artifact(path) || has_extension(path, "png") {
                    continue;
                }
                builder.append_path_with_name(path, &archive_name)?;
            }
        }

        builder.into_inner()?.finish()?;
    }
    temp.as_file().sync_all()?;
    temp.persist(archive).map_err(|e| e.error)?;

    if let Some(time) = version_time(version) {
        filetime::set_file_mtime(archive, FileTime::from_system_time(time))?;
    }
    Ok(())
}

/// Whether `path` is missing or older than `version`
fn is_stale(path: &Path, version: u64) -> Result<bool> {
    Ok(match modified(path)? {
        Some(time) => mtime_version(time) < version,
        None => true,
    })
}

fn modified(path: &Path) -> Result<Option<SystemTime>> {
    match std::fs::metadata(path) {
        Ok(meta) => Ok(Some(meta.modified()?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn has_extension(path: &Path, wanted: &str) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some(wanted)
}

fn file_location(path: &Path) -> String {
    format!("file://{}", path.display())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::introspect::ManifestIntrospector;
    use crate::repositories::store::parse_ini;
    use flate2::read::GzDecoder;
    use std::cell::RefCell;
    use tempfile::TempDir;

    #[derive(Default)]
    struct RecordingSigner {
        keyrings: RefCell<usize>,
        signed: RefCell<Vec<PathBuf>>,
    }

    impl Signer for RecordingSigner {
        fn build_keyring(&self, _key_dir: &Path, keyring: &Path) -> Result<()> {
            *self.keyrings.borrow_mut() += 1;
            std::fs::write(keyring, "keyring")?;
            Ok(())
        }

        fn sign(&self, file: &Path, signature: &Path) -> Result<()> {
            self.signed.borrow_mut().push(file.to_path_buf());
            std::fs::write(signature, "sig")?;
            Ok(())
        }
    }

    fn write_module(source: &Path, name: &str) {
        let dir = source.join(name);
        std::fs::create_dir_all(dir.join("pages")).unwrap();
        std::fs::write(dir.join("manifest.yaml"), format!("name: {name}\n")).unwrap();
        std::fs::write(dir.join("module.py"), "code").unwrap();
        std::fs::write(dir.join("module.pyc"), "bytecode").unwrap();
        std::fs::write(dir.join("pages").join("login.py"), "code").unwrap();
        std::fs::write(dir.join("favicon.png"), "png").unwrap();
    }

    fn archive_entries(archive: &Path) -> Vec<String> {
        let file = std::fs::File::open(archive).unwrap();
        let mut tar = tar::Archive::new(GzDecoder::new(file));
        tar.entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().to_string_lossy().trim_end_matches('/').to_string())
            .collect()
    }

    #[test]
    fn test_create_repository() {
        let temp_dir = TempDir::new().unwrap();
        let repo = temp_dir.path().join("repo");

        let index = create_repository(&repo, "main", "Repo Team").unwrap();
        let ini = parse_ini(&std::fs::read_to_string(&index).unwrap()).unwrap();
        assert_eq!(ini.general_section().get("name"), Some("main"));
        assert_eq!(ini.general_section().get("maintainer"), Some("Repo Team"));
        assert_eq!(ini.general_section().get("signed"), Some("0"));

        assert!(create_repository(&repo, "main", "Repo Team").is_err());
        assert!(create_repository(&temp_dir.path().join("other"), " ", "x").is_err());
    }

    #[test]
    fn test_build_requires_existing_repository() {
        let temp_dir = TempDir::new().unwrap();
        let err = build_repository(
            temp_dir.path(),
            &temp_dir.path().join("repo"),
            &ManifestIntrospector,
            None,
        )
        .unwrap_err();
        assert!(err.to_string().contains("repo create"));
    }

    #[test]
    fn test_build_archives_and_icons() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("src");
        let repo = temp_dir.path().join("repo");
        write_module(&source, "bank");
        create_repository(&repo, "main", "Repo Team").unwrap();

        let report = build_repository(&source, &repo, &ManifestIntrospector, None).unwrap();
        assert_eq!(report.archives, vec!["bank"]);
        assert_eq!(report.icons, vec!["bank"]);
        assert!(!report.unsigned);

        let archive = repo.join("bank.tar.gz");
        assert_eq!(
            archive_entries(&archive),
            vec![
                "bank",
                "bank/manifest.yaml",
                "bank/module.py",
                "bank/pages",
                "bank/pages/login.py"
            ]
        );
        assert!(repo.join("bank.png").exists());

        // The archive carries the module version as its mtime
        let archive_time = std::fs::metadata(&archive).unwrap().modified().unwrap();
        assert_eq!(mtime_version(archive_time), report.modules["bank"]);

        // Nothing changed, nothing to repack
        let again = build_repository(&source, &repo, &ManifestIntrospector, None).unwrap();
        assert!(again.archives.is_empty());
    }

    #[test]
    fn test_signed_build_signs_everything_once() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("src");
        let repo = temp_dir.path().join("repo");
        write_module(&source, "bank");
        write_module(&source, "weather");
        std::fs::create_dir_all(source.join(KEY_DIR)).unwrap();
        std::fs::write(source.join(KEY_DIR).join("team.asc"), "public key").unwrap();
        create_repository(&repo, "main", "Repo Team").unwrap();

        let signer = RecordingSigner::default();
        let report = build_repository(&source, &repo, &ManifestIntrospector, Some(&signer)).unwrap();

        assert!(report.keyring_rebuilt);
        assert_eq!(report.signatures.len(), 4);
        assert!(repo.join("trusted.gpg.sig").exists());
        assert!(repo.join("modules.list.sig").exists());
        assert!(repo.join("bank.tar.gz.sig").exists());

        // Second build: only the rewritten index needs a new signature
        let again = build_repository(&source, &repo, &ManifestIntrospector, Some(&signer)).unwrap();
        assert!(!again.keyring_rebuilt);
        assert_eq!(again.signatures, vec![repo.join("modules.list.sig")]);
        assert_eq!(*signer.keyrings.borrow(), 1);
    }

    #[test]
    fn test_signed_build_without_signer() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("src");
        let repo = temp_dir.path().join("repo");
        write_module(&source, "bank");
        std::fs::create_dir_all(source.join(KEY_DIR)).unwrap();
        create_repository(&repo, "main", "Repo Team").unwrap();

        let report = build_repository(&source, &repo, &ManifestIntrospector, None).unwrap();
        assert!(report.unsigned);
        assert!(report.signatures.is_empty());
    }
}
