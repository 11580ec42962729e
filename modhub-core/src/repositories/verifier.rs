//! Detached signature verification through an external OpenPGP verifier
//!
//! The verifier binary is found by [`VerifierLocator`] from an explicit list
//! of directories. Only the application boundary reads the process
//! environment, through [`VerifierLocator::from_env`].

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// Environment variable holding an explicit verifier path
pub const VERIFIER_ENV: &str = "MODHUB_GPGV";

/// Binary names tried in order
const CANDIDATES: &[&str] = &["gpgv2", "gpgv"];

/// What a verifier run produced
#[derive(Debug, Clone, Default)]
pub struct VerifierOutput {
    /// Whether the process exited successfully
    pub success: bool,
    /// Machine-readable status lines
    pub status: String,
    /// Human-readable diagnostics, for logs only
    pub diagnostics: String,
}

impl VerifierOutput {
    /// True when the status reports a good and valid signature and nothing else
    pub fn is_valid_signature(&self) -> bool {
        if !self.success {
            return false;
        }

        let tokens: Vec<&str> = self
            .status
            .lines()
            .filter_map(|line| {
                let mut words = line.split_whitespace();
                match words.next() {
                    Some("[GNUPG:]") => words.next(),
                    _ => None,
                }
            })
            .collect();

        let has = |token: &str| tokens.contains(&token);
        has("GOODSIG") && has("VALIDSIG") && !has("BADSIG") && !has("ERRSIG")
    }
}

/// Checks a detached signature against a keyring file
pub trait SignatureVerifier: Send + Sync {
    fn verify(
        &self,
        payload: &[u8],
        signature: &[u8],
        keyring: &Path,
    ) -> std::io::Result<VerifierOutput>;
}

/// `gpgv`-compatible verifier process
#[derive(Debug, Clone)]
pub struct GpgvVerifier {
    binary: PathBuf,
}

impl GpgvVerifier {
    pub fn new(binary: PathBuf) -> Self {
        Self { binary }
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }
}

impl SignatureVerifier for GpgvVerifier {
    fn verify(
        &self,
        payload: &[u8],
        signature: &[u8],
        keyring: &Path,
    ) -> std::io::Result<VerifierOutput> {
        let mut sig_file = tempfile::Builder::new()
            .prefix("modhub-")
            .suffix(".sig")
            .tempfile()?;
        sig_file.write_all(signature)?;
        sig_file.flush()?;

        let keyring = std::fs::canonicalize(keyring)?;

        tracing::debug!(
            "Running {} against keyring {}",
            self.binary.display(),
            keyring.display()
        );

        let mut child = Command::new(&self.binary)
            .arg("--status-fd")
            .arg("1")
            .arg("--keyring")
            .arg(&keyring)
            .arg(sig_file.path())
            .arg("-")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| std::io::Error::other("verifier stdin unavailable"))?;

        let output = std::thread::scope(|scope| {
            scope.spawn(move || {
                // gpgv may exit before consuming the whole payload
                let _ = stdin.write_all(payload);
            });
            child.wait_with_output()
        })?;

        Ok(VerifierOutput {
            success: output.status.success(),
            status: String::from_utf8_lossy(&output.stdout).into_owned(),
            diagnostics: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Finds the verifier binary
#[derive(Debug, Clone, Default)]
pub struct VerifierLocator {
    search_path: Vec<PathBuf>,
    override_path: Option<PathBuf>,
}

impl VerifierLocator {
    pub fn new(search_path: Vec<PathBuf>) -> Self {
        Self {
            search_path,
            override_path: None,
        }
    }

    /// Use `path` instead of searching
    pub fn with_override(mut self, path: Option<PathBuf>) -> Self {
        self.override_path = path;
        self
    }

    /// Locator built from `PATH` and `MODHUB_GPGV`
    pub fn from_env() -> Self {
        let search_path = std::env::var_os("PATH")
            .map(|paths| std::env::split_paths(&paths).collect())
            .unwrap_or_default();
        let override_path = std::env::var_os(VERIFIER_ENV).map(PathBuf::from);

        Self::new(search_path).with_override(override_path)
    }

    /// Path of the first usable verifier, if any
    pub fn locate(&self) -> Option<PathBuf> {
        if let Some(path) = &self.override_path {
            if is_executable(path) {
                tracing::debug!("Using verifier override at: {:?}", path);
                return Some(path.clone());
            }
            tracing::warn!("Configured verifier {:?} is not executable", path);
            return None;
        }

        for name in CANDIDATES {
            for dir in &self.search_path {
                let candidate = if cfg!(windows) {
                    dir.join(format!("{name}.exe"))
                } else {
                    dir.join(name)
                };
                if is_executable(&candidate) {
                    tracing::debug!("Using verifier from search path: {:?}", candidate);
                    return Some(candidate);
                }
            }
        }

        None
    }

    /// A ready verifier, if a binary was found
    pub fn verifier(&self) -> Option<GpgvVerifier> {
        self.locate().map(GpgvVerifier::new)
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    std::fs::metadata(path)
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}
