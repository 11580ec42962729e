//! Per-repository trust anchors
//!
//! A keyring is stored as two companion files: `<base>.gpg` with the key
//! material and `<base>.version` with the `key_update` value it was fetched
//! at, followed by the checksum of that material. The version only moves
//! forward.

use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Path, PathBuf};

use super::store::write_atomic;
use super::verifier::SignatureVerifier;
use crate::error::{ModhubError, Result};

/// Locally trusted key material for one repository
#[derive(Debug, Clone)]
pub struct Keyring {
    material_path: PathBuf,
    version_path: PathBuf,
}

impl Keyring {
    /// Open the keyring stored at `<base>.gpg` / `<base>.version`
    ///
    /// Leftovers of an incomplete keyring are removed so that the next
    /// retrieval bootstraps cleanly.
    pub fn open(base: &Path) -> Result<Self> {
        let keyring = Self {
            material_path: with_suffix(base, ".gpg"),
            version_path: with_suffix(base, ".version"),
        };

        if !keyring.exists() {
            for path in [&keyring.material_path, &keyring.version_path] {
                match std::fs::remove_file(path) {
                    Ok(()) => tracing::debug!("Removed stale keyring file {}", path.display()),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
            }
        }

        Ok(keyring)
    }

    /// Both files present and the material not blank
    pub fn exists(&self) -> bool {
        if !self.version_path.is_file() {
            return false;
        }
        match std::fs::read(&self.material_path) {
            Ok(material) => !material.trim_ascii().is_empty(),
            Err(_) => false,
        }
    }

    /// Stored version, `None` when there is no usable keyring
    pub fn version(&self) -> Option<u64> {
        self.stamp().map(|(version, _)| version)
    }

    /// Whether a renewal stopped between its two writes
    ///
    /// The version file then names material that is not on disk yet, and
    /// the material in place is still the previously trusted one.
    pub fn is_pending(&self) -> bool {
        match (self.stamp(), self.checksum()) {
            (Some((_, Some(expected))), Some(actual)) => expected != actual,
            _ => false,
        }
    }

    /// Version and, when recorded, the checksum of the material it belongs to
    fn stamp(&self) -> Option<(u64, Option<String>)> {
        if !self.exists() {
            return None;
        }
        let raw = std::fs::read_to_string(&self.version_path).ok()?;
        let mut fields = raw.split_whitespace();
        match fields.next().map(str::parse::<u64>) {
            Some(Ok(version)) => Some((version, fields.next().map(str::to_string))),
            _ => {
                tracing::warn!(
                    "Ignoring unreadable keyring version in {}",
                    self.version_path.display()
                );
                None
            }
        }
    }

    /// Path of the key material, as handed to the verifier
    pub fn path(&self) -> &Path {
        &self.material_path
    }

    pub fn material(&self) -> Result<Vec<u8>> {
        Ok(std::fs::read(&self.material_path)?)
    }

    /// Persist new key material at `version`
    ///
    /// Refuses to go back to an older version.
    pub fn save(&self, material: &[u8], version: u64) -> Result<()> {
        if let Some(current) = self.version() {
            if version < current {
                return Err(ModhubError::repository_unavailable(format!(
                    "refusing to replace keyring version {current} with older version {version}"
                )));
            }
        }

        // The version file goes first and names the material it expects, so
        // a renewal cut short leaves the old material trusted and pending
        let checksum = hex::encode(Sha256::digest(material));
        write_atomic(
            &self.version_path,
            format!("{version} {checksum}\n").as_bytes(),
        )?;
        write_atomic(&self.material_path, material)?;
        tracing::debug!(
            "Saved keyring {} at version {}",
            self.material_path.display(),
            version
        );
        Ok(())
    }

    /// Whether `signature` is a valid signature of `payload` by this keyring
    ///
    /// Every verifier failure counts as invalid.
    pub fn is_valid(
        &self,
        verifier: &dyn SignatureVerifier,
        payload: &[u8],
        signature: &[u8],
    ) -> bool {
        if !self.exists() {
            return false;
        }
        match verifier.verify(payload, signature, &self.material_path) {
            Ok(output) => {
                let valid = output.is_valid_signature();
                if !valid {
                    tracing::warn!(
                        "Signature rejected by verifier: {}",
                        output.diagnostics.trim()
                    );
                }
                valid
            }
            Err(e) => {
                tracing::warn!("Signature verifier could not run: {}", e);
                false
            }
        }
    }

    /// SHA-256 of the key material
    pub fn checksum(&self) -> Option<String> {
        if !self.exists() {
            return None;
        }
        let material = std::fs::read(&self.material_path).ok()?;
        Some(hex::encode(Sha256::digest(&material)))
    }
}

impl fmt::Display for Keyring {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.version(), self.checksum()) {
            (Some(version), Some(checksum)) => {
                write!(f, "Keyring version {version}, checksum {checksum}")
            }
            _ => write!(f, "NO KEYRING"),
        }
    }
}

fn with_suffix(base: &Path, suffix: &str) -> PathBuf {
    let mut name = base.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::verifier::VerifierOutput;
    use tempfile::TempDir;

    struct FixedVerifier(std::io::Result<VerifierOutput>);

    impl SignatureVerifier for FixedVerifier {
        fn verify(&self, _: &[u8], _: &[u8], _: &Path) -> std::io::Result<VerifierOutput> {
            match &self.0 {
                Ok(output) => Ok(output.clone()),
                Err(e) => Err(std::io::Error::new(e.kind(), e.to_string())),
            }
        }
    }

    #[test]
    fn test_save_then_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let base = temp_dir.path().join("http___a_");

        let keyring = Keyring::open(&base).unwrap();
        assert!(!keyring.exists());
        assert_eq!(keyring.to_string(), "NO KEYRING");

        keyring.save(b"key material", 201401010000).unwrap();

        let reopened = Keyring::open(&base).unwrap();
        assert!(reopened.exists());
        assert_eq!(reopened.version(), Some(201401010000));
        assert_eq!(reopened.material().unwrap(), b"key material");
        assert!(reopened.to_string().starts_with("Keyring version 201401010000, checksum "));
        assert!(temp_dir.path().join("http___a_.gpg").exists());
        assert!(temp_dir.path().join("http___a_.version").exists());
    }

    #[test]
    fn test_blank_material_does_not_count() {
        let temp_dir = TempDir::new().unwrap();
        let base = temp_dir.path().join("repo");
        std::fs::write(temp_dir.path().join("repo.gpg"), "  \n").unwrap();
        std::fs::write(temp_dir.path().join("repo.version"), "5\n").unwrap();

        let keyring = Keyring::open(&base).unwrap();
        assert!(!keyring.exists());
        assert_eq!(keyring.version(), None);
        // Stale companions are cleaned up
        assert!(!temp_dir.path().join("repo.gpg").exists());
        assert!(!temp_dir.path().join("repo.version").exists());
    }

    #[test]
    fn test_version_file_names_its_material() {
        let temp_dir = TempDir::new().unwrap();
        let keyring = Keyring::open(&temp_dir.path().join("repo")).unwrap();
        keyring.save(b"material", 7).unwrap();

        let stamp = std::fs::read_to_string(temp_dir.path().join("repo.version")).unwrap();
        assert_eq!(
            stamp,
            format!("7 {}\n", hex::encode(Sha256::digest(b"material")))
        );
        assert!(!keyring.is_pending());

        // Version files without a checksum are still accepted
        std::fs::write(temp_dir.path().join("repo.version"), "7\n").unwrap();
        assert_eq!(keyring.version(), Some(7));
        assert!(!keyring.is_pending());
    }

    #[test]
    fn test_interrupted_renewal_keeps_previous_material() {
        let temp_dir = TempDir::new().unwrap();
        let base = temp_dir.path().join("repo");
        Keyring::open(&base).unwrap().save(b"old keys", 1).unwrap();

        // Renewal stopped after writing the version file
        std::fs::write(
            temp_dir.path().join("repo.version"),
            format!("2 {}\n", hex::encode(Sha256::digest(b"new keys"))),
        )
        .unwrap();

        let keyring = Keyring::open(&base).unwrap();
        assert!(keyring.exists());
        assert!(keyring.is_pending());
        assert_eq!(keyring.version(), Some(2));
        assert_eq!(keyring.material().unwrap(), b"old keys");

        keyring.save(b"new keys", 2).unwrap();
        assert!(!keyring.is_pending());
        assert_eq!(keyring.material().unwrap(), b"new keys");
    }

    #[test]
    fn test_version_never_decreases() {
        let temp_dir = TempDir::new().unwrap();
        let keyring = Keyring::open(&temp_dir.path().join("repo")).unwrap();

        keyring.save(b"v2", 2).unwrap();
        assert!(keyring.save(b"v1", 1).is_err());
        assert_eq!(keyring.material().unwrap(), b"v2");
        assert_eq!(keyring.version(), Some(2));
    }

    #[test]
    fn test_verifier_failures_are_invalid() {
        let temp_dir = TempDir::new().unwrap();
        let keyring = Keyring::open(&temp_dir.path().join("repo")).unwrap();
        keyring.save(b"material", 1).unwrap();

        let crashed = FixedVerifier(Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "no such binary",
        )));
        assert!(!keyring.is_valid(&crashed, b"payload", b"sig"));

        let ambiguous = FixedVerifier(Ok(VerifierOutput {
            success: true,
            status: "[GNUPG:] GOODSIG 1\n".to_string(),
            diagnostics: String::new(),
        }));
        assert!(!keyring.is_valid(&ambiguous, b"payload", b"sig"));

        let good = FixedVerifier(Ok(VerifierOutput {
            success: true,
            status: "[GNUPG:] GOODSIG 1\n[GNUPG:] VALIDSIG 2\n".to_string(),
            diagnostics: String::new(),
        }));
        assert!(keyring.is_valid(&good, b"payload", b"sig"));
    }
}
