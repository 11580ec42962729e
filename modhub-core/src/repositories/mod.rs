//! Modhub Repositories - Module discovery, trust and installation
//!
//! This module provides functionality for fetching module indexes from
//! the repositories listed in `sources.list`, keeping their keyrings
//! trusted, and installing signed module packages.
//!
//! # Overview
//!
//! The repository system allows users to:
//! - Merge modules from several repositories, later entries overriding earlier ones
//! - Trust a repository keyring on first use and accept only signed renewals
//! - Install and update modules, tracking versions in `versions.list`
//! - Develop against local `file://` source trees without packaging
//! - Publish a source tree as a remote repository
//!
//! # Architecture
//!
//! ```text
//! Repository (HTTP or file://)
//!     │
//!     ├── modules.list          ← Index of modules and versions
//!     ├── trusted.gpg(.sig)     ← Keyring, renewals signed by the previous one
//!     └── <module>.tar.gz(.sig) ← Signed packages
//!            │
//!            ▼
//!     RepositorySet
//!            │
//!            ▼
//!     <datadir>/repositories/   ← Cached indexes
//!     <datadir>/keyrings/       ← Trusted keyrings
//!     <datadir>/modules/<compat>/
//!         ├── <module>/         ← Installed modules
//!         └── versions.list     ← Version tracking
//! ```

mod index;
mod installer;
mod introspect;
mod keyring;
mod layout;
mod module_info;
mod packager;
mod progress;
mod set;
mod sources;
mod store;
mod transport;
mod verifier;
mod versions;

pub use index::{
    is_compiled_artifact, join_url, mtime_version, tree_mtime, version_time, KeyringUpdate,
    Repository, INDEX_FILE, KEYRING_FILE, KEY_DIR,
};
pub use installer::Installer;
pub use introspect::{
    validate_name, ManifestIntrospector, ModuleDeclaration, ModuleIntrospector, MANIFEST_FILE,
};
pub use keyring::Keyring;
pub use layout::Layout;
pub use module_info::{split_capabilities, ModuleInfo};
pub use packager::{
    build_repository, create_repository, BuildReport, GpgSigner, Signer,
};
pub use progress::{LogProgress, NoProgress, Progress, ScaledProgress};
pub use set::{Collaborators, RepositorySet, UpdateSummary};
pub use sources::{
    cache_filename, ensure_sources_list, location_filename, parse_sources, read_sources,
    DEFAULT_SOURCES_LIST, SOURCES_LIST_FILE, VERSION_PLACEHOLDER,
};
pub use store::write_atomic;
pub use transport::{
    HttpTransport, Transport, TransportError, DEFAULT_TIMEOUT_SECS, DEFAULT_USER_AGENT,
};
pub use verifier::{GpgvVerifier, SignatureVerifier, VerifierLocator, VerifierOutput, VERIFIER_ENV};
pub use versions::{VersionsRegistry, VERSIONS_FILE};
