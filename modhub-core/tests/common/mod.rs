//! Test helpers shared by the integration tests
//!
//! Repositories are served from memory by [`FakeTransport`] and signatures
//! are checked by [`FakeVerifier`], so no test touches the network or needs
//! gpg installed.

#![allow(dead_code)]

use flate2::write::GzEncoder;
use flate2::Compression;
use modhub_core::repositories::{
    Collaborators, Layout, Progress, RepositorySet, SignatureVerifier, Transport, TransportError,
    VerifierOutput,
};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, Once};
use tempfile::TempDir;

/// Initialize logging for tests (only once per test run)
static INIT: Once = Once::new();

pub fn init_test_logging() {
    INIT.call_once(|| {
        use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

        let _ = tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_test_writer()
                    .with_target(true)
                    .with_level(true),
            )
            .with(tracing_subscriber::filter::EnvFilter::from_default_env())
            .try_init();
    });
}

/// In-memory transport; unknown URLs answer 404
#[derive(Default)]
pub struct FakeTransport {
    files: Mutex<HashMap<String, Vec<u8>>>,
    fetched: Mutex<Vec<String>>,
}

impl FakeTransport {
    pub fn put(&self, url: &str, body: impl Into<Vec<u8>>) {
        self.files.lock().unwrap().insert(url.to_string(), body.into());
    }

    pub fn remove(&self, url: &str) {
        self.files.lock().unwrap().remove(url);
    }

    /// Serve every file of `dir` under `base_url`
    pub fn serve_dir(&self, base_url: &str, dir: &Path) {
        for entry in std::fs::read_dir(dir).unwrap() {
            let path = entry.unwrap().path();
            if path.is_file() {
                let name = path.file_name().unwrap().to_str().unwrap().to_string();
                self.put(&format!("{base_url}{name}"), std::fs::read(&path).unwrap());
            }
        }
    }

    pub fn fetch_count(&self, url: &str) -> usize {
        self.fetched.lock().unwrap().iter().filter(|u| *u == url).count()
    }
}

impl Transport for FakeTransport {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, TransportError> {
        self.fetched.lock().unwrap().push(url.to_string());
        self.files
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| TransportError::Status {
                url: url.to_string(),
                status: 404,
            })
    }
}

/// Signature accepted by [`FakeVerifier`] for `payload` under `keyring`
pub fn sign(keyring: &[u8], payload: &[u8]) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(keyring);
    hasher.update(b"|");
    hasher.update(payload);
    hex::encode(hasher.finalize()).into_bytes()
}

/// Accepts exactly the signatures produced by [`sign`]
#[derive(Default)]
pub struct FakeVerifier;

impl SignatureVerifier for FakeVerifier {
    fn verify(
        &self,
        payload: &[u8],
        signature: &[u8],
        keyring: &Path,
    ) -> std::io::Result<VerifierOutput> {
        let material = std::fs::read(keyring)?;
        if sign(&material, payload) == signature {
            Ok(VerifierOutput {
                success: true,
                status: "[GNUPG:] GOODSIG 0123 Repo Team\n[GNUPG:] VALIDSIG 0123\n".to_string(),
                diagnostics: String::new(),
            })
        } else {
            Ok(VerifierOutput {
                success: false,
                status: "[GNUPG:] BADSIG 0123 Repo Team\n".to_string(),
                diagnostics: "BAD signature".to_string(),
            })
        }
    }
}

/// Records every progress event
#[derive(Default)]
pub struct RecordingProgress {
    pub messages: Mutex<Vec<String>>,
    pub errors: Mutex<Vec<String>>,
}

impl RecordingProgress {
    pub fn errors(&self) -> Vec<String> {
        self.errors.lock().unwrap().clone()
    }
}

impl Progress for RecordingProgress {
    fn progress(&self, _value: f64, message: &str) {
        self.messages.lock().unwrap().push(message.to_string());
    }

    fn error(&self, message: &str) {
        self.errors.lock().unwrap().push(message.to_string());
    }
}

/// A module entry of a generated index
pub struct IndexModule<'a> {
    pub name: &'a str,
    pub version: u64,
    pub capabilities: &'a str,
}

/// Public `modules.list` content
pub fn remote_index(name: &str, signed: bool, key_update: u64, modules: &[IndexModule]) -> String {
    let mut index = format!(
        "name = {name}\nupdate = 201401011200\nmaintainer = Repo Team <team@example.org>\n\
         signed = {}\nkey_update = {key_update}\n",
        if signed { 1 } else { 0 }
    );
    for module in modules {
        index.push_str(&format!(
            "\n[{}]\nversion = {}\ncapabilities = {}\ndescription = {} module\n\
             maintainer = Dev <dev@example.org>\nlicense = MIT\nicon = \nurls = \n",
            module.name, module.version, module.capabilities, module.name
        ));
    }
    index
}

/// Package of `name` holding a manifest and `marker` in `module.txt`
pub fn module_package(name: &str, marker: &str) -> Vec<u8> {
    let mut bytes = Vec::new();
    {
        let encoder = GzEncoder::new(&mut bytes, Compression::default());
        let mut builder = tar::Builder::new(encoder);

        let mut append = |path: &str, data: &[u8]| {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, path, data).unwrap();
        };
        append(&format!("{name}/manifest.yaml"), format!("name: {name}\n").as_bytes());
        append(&format!("{name}/module.txt"), marker.as_bytes());

        builder.into_inner().unwrap().finish().unwrap();
    }
    bytes
}

/// Temporary work and data directories plus fake collaborators
pub struct Fixture {
    pub temp: TempDir,
    pub layout: Layout,
    pub transport: Arc<FakeTransport>,
}

impl Fixture {
    /// A store whose sources list holds `sources`, in order
    pub fn new(sources: &[&str]) -> Self {
        init_test_logging();
        let temp = TempDir::new().unwrap();
        let layout = Layout::new(&temp.path().join("work"), &temp.path().join("data"), "0.4");

        std::fs::create_dir_all(temp.path().join("work")).unwrap();
        let mut list = String::from("# test sources\n");
        for source in sources {
            list.push_str(source);
            list.push('\n');
        }
        std::fs::write(&layout.sources_list, list).unwrap();

        Self {
            temp,
            layout,
            transport: Arc::new(FakeTransport::default()),
        }
    }

    /// Open with the fake verifier
    pub fn open(&self) -> RepositorySet {
        let collaborators = Collaborators::new(self.transport.clone())
            .with_verifier(Some(Arc::new(FakeVerifier) as Arc<dyn SignatureVerifier>));
        RepositorySet::open(self.layout.clone(), collaborators).unwrap()
    }

    /// Open without any signature verifier
    pub fn open_unverified(&self) -> RepositorySet {
        RepositorySet::open(self.layout.clone(), Collaborators::new(self.transport.clone())).unwrap()
    }

    /// Publish a signed repository at `base` with `keyring` as its keyring
    pub fn publish_signed(
        &self,
        base: &str,
        keyring: &[u8],
        key_update: u64,
        modules: &[IndexModule],
    ) {
        self.transport
            .put(&format!("{base}modules.list"), remote_index(base, true, key_update, modules));
        self.transport.put(&format!("{base}trusted.gpg"), keyring.to_vec());
        for module in modules {
            let package = module_package(module.name, &format!("{base}{}", module.version));
            let url = format!("{base}{}.tar.gz", module.name);
            self.transport.put(&format!("{url}.sig"), sign(keyring, &package));
            self.transport.put(&url, package);
        }
    }

    /// Publish an unsigned repository at `base`
    pub fn publish_unsigned(&self, base: &str, modules: &[IndexModule]) {
        self.transport
            .put(&format!("{base}modules.list"), remote_index(base, false, 0, modules));
        for module in modules {
            let package = module_package(module.name, &format!("{base}{}", module.version));
            self.transport.put(&format!("{base}{}.tar.gz", module.name), package);
        }
    }

    pub fn keyring_material(&self, location: &str) -> Option<Vec<u8>> {
        let mut path = self.layout.keyring_base(location).into_os_string();
        path.push(".gpg");
        std::fs::read(path).ok()
    }
}
