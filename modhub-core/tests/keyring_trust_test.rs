//! Keyring trust on first use and signed renewals

mod common;

use common::{sign, Fixture, IndexModule, RecordingProgress};
use modhub_core::repositories::{Keyring, NoProgress};
use modhub_core::ModhubError;
use pretty_assertions::assert_eq;
use sha2::{Digest, Sha256};

const A: &str = "https://a.example.org/";
const OLD_KEYRING: &[u8] = b"team keyring v1";
const NEW_KEYRING: &[u8] = b"team keyring v2";

fn bank() -> IndexModule<'static> {
    IndexModule {
        name: "bank",
        version: 201401010000,
        capabilities: "CapBank",
    }
}

fn keyring_version(fixture: &Fixture) -> Option<u64> {
    Keyring::open(&fixture.layout.keyring_base(A)).unwrap().version()
}

#[test]
fn test_first_keyring_is_accepted() {
    let fixture = Fixture::new(&[A]);
    fixture.publish_signed(A, OLD_KEYRING, 201301010000, &[bank()]);

    let mut set = fixture.open();
    set.update_repositories(&NoProgress).unwrap();

    assert_eq!(fixture.keyring_material(A).as_deref(), Some(OLD_KEYRING));
    assert_eq!(keyring_version(&fixture), Some(201301010000));
    // No signature is asked for on bootstrap
    assert_eq!(fixture.transport.fetch_count(&format!("{A}trusted.gpg.sig")), 0);
}

#[test]
fn test_current_keyring_is_not_fetched_again() {
    let fixture = Fixture::new(&[A]);
    fixture.publish_signed(A, OLD_KEYRING, 201301010000, &[bank()]);

    let mut set = fixture.open();
    set.update_repositories(&NoProgress).unwrap();
    set.update_repositories(&NoProgress).unwrap();

    assert_eq!(fixture.transport.fetch_count(&format!("{A}trusted.gpg")), 1);
}

#[test]
fn test_renewal_signed_by_previous_keyring() {
    let fixture = Fixture::new(&[A]);
    fixture.publish_signed(A, OLD_KEYRING, 201301010000, &[bank()]);
    let mut set = fixture.open();
    set.update_repositories(&NoProgress).unwrap();

    fixture.publish_signed(A, NEW_KEYRING, 201401010000, &[bank()]);
    fixture
        .transport
        .put(&format!("{A}trusted.gpg.sig"), sign(OLD_KEYRING, NEW_KEYRING));
    set.update_repositories(&NoProgress).unwrap();

    assert_eq!(fixture.keyring_material(A).as_deref(), Some(NEW_KEYRING));
    assert_eq!(keyring_version(&fixture), Some(201401010000));

    // Packages are now checked against the new keyring
    set.install("bank", &NoProgress).unwrap();
}

#[test]
fn test_renewal_with_bad_signature_keeps_old_keyring() {
    let fixture = Fixture::new(&[A]);
    fixture.publish_signed(A, OLD_KEYRING, 201301010000, &[bank()]);
    let mut set = fixture.open();
    set.update_repositories(&NoProgress).unwrap();

    fixture.publish_signed(A, NEW_KEYRING, 201401010000, &[bank()]);
    // Signed by the new key itself, not by the trusted one
    fixture
        .transport
        .put(&format!("{A}trusted.gpg.sig"), sign(NEW_KEYRING, NEW_KEYRING));

    let progress = RecordingProgress::default();
    let err = set.update_repositories(&progress).unwrap_err();
    assert!(matches!(err, ModhubError::RepositoryUnavailable(_)));
    assert!(progress
        .errors()
        .iter()
        .any(|e| e.contains("not signed by the trusted keyring")));

    assert_eq!(fixture.keyring_material(A).as_deref(), Some(OLD_KEYRING));
    assert_eq!(keyring_version(&fixture), Some(201301010000));
    assert!(set.get_module_info("bank").is_none());
}

#[test]
fn test_signed_repository_cannot_go_unsigned() {
    let fixture = Fixture::new(&[A]);
    fixture.publish_signed(A, OLD_KEYRING, 201301010000, &[bank()]);
    let mut set = fixture.open();
    set.update_repositories(&NoProgress).unwrap();

    fixture.publish_unsigned(A, &[bank()]);
    let err = set.update_repositories(&NoProgress).unwrap_err();
    assert!(matches!(err, ModhubError::RepositoryUnavailable(_)));
    assert_eq!(fixture.keyring_material(A).as_deref(), Some(OLD_KEYRING));
}

#[test]
fn test_empty_keyring_is_refused() {
    let fixture = Fixture::new(&[A]);
    fixture.publish_signed(A, b"  \n", 201301010000, &[bank()]);

    let mut set = fixture.open();
    assert!(set.update_repositories(&NoProgress).is_err());
    assert_eq!(keyring_version(&fixture), None);
}

#[test]
fn test_install_needs_a_keyring() {
    let fixture = Fixture::new(&[A]);
    fixture.publish_signed(A, OLD_KEYRING, 201301010000, &[bank()]);
    let mut set = fixture.open();
    set.update_repositories(&NoProgress).unwrap();

    let mut base = fixture.layout.keyring_base(A).into_os_string();
    base.push(".gpg");
    std::fs::remove_file(base).unwrap();

    let err = set.install("bank", &NoProgress).unwrap_err();
    assert!(err.to_string().contains("No keyring found"));
}

#[test]
fn test_index_cannot_redirect_to_an_untrusted_location() {
    const EVIL: &str = "http://evil.example.org/";
    let fixture = Fixture::new(&[A]);
    fixture.publish_signed(A, OLD_KEYRING, 201301010000, &[bank()]);
    let mut set = fixture.open();
    set.update_repositories(&NoProgress).unwrap();

    // Unsigned index pointing somewhere no keyring was ever stored for
    fixture.publish_unsigned(EVIL, &[bank()]);
    fixture.transport.put(
        &format!("{A}modules.list"),
        format!("url = {EVIL}\n{}", common::remote_index(A, false, 0, &[bank()])),
    );

    let err = set.update_repositories(&NoProgress).unwrap_err();
    assert!(matches!(err, ModhubError::RepositoryUnavailable(_)));
    assert!(set.get_module_info("bank").is_none());
    assert_eq!(fixture.keyring_material(A).as_deref(), Some(OLD_KEYRING));
    assert_eq!(fixture.keyring_material(EVIL), None);
    assert_eq!(fixture.transport.fetch_count(&format!("{EVIL}modules.list")), 0);
}

#[test]
fn test_packages_come_from_the_configured_location() {
    const EVIL: &str = "http://evil.example.org/";
    let fixture = Fixture::new(&[A]);
    fixture.publish_signed(A, OLD_KEYRING, 201301010000, &[bank()]);
    fixture.publish_signed(EVIL, NEW_KEYRING, 201301010000, &[bank()]);
    fixture.transport.put(
        &format!("{A}modules.list"),
        format!("url = {EVIL}\n{}", common::remote_index(A, true, 201301010000, &[bank()])),
    );

    let mut set = fixture.open();
    set.update_repositories(&NoProgress).unwrap();

    let info = set.get_module_info("bank").unwrap();
    assert_eq!(info.repository_url, A);
    assert_eq!(info.package_url.as_deref(), Some("https://a.example.org/bank.tar.gz"));
    assert_eq!(fixture.keyring_material(A).as_deref(), Some(OLD_KEYRING));
    assert_eq!(fixture.keyring_material(EVIL), None);

    let path = set.install("bank", &NoProgress).unwrap();
    assert_eq!(
        std::fs::read_to_string(path.join("module.txt")).unwrap(),
        format!("{A}201401010000")
    );
    assert_eq!(fixture.transport.fetch_count(&format!("{EVIL}bank.tar.gz")), 0);
}

#[test]
fn test_interrupted_renewal_is_redone() {
    let fixture = Fixture::new(&[A]);
    fixture.publish_signed(A, OLD_KEYRING, 201301010000, &[bank()]);
    let mut set = fixture.open();
    set.update_repositories(&NoProgress).unwrap();

    fixture.publish_signed(A, NEW_KEYRING, 201401010000, &[bank()]);
    fixture
        .transport
        .put(&format!("{A}trusted.gpg.sig"), sign(OLD_KEYRING, NEW_KEYRING));

    // Version file already renewed, material still the old one
    let mut version_path = fixture.layout.keyring_base(A).into_os_string();
    version_path.push(".version");
    std::fs::write(
        version_path,
        format!("201401010000 {}\n", hex::encode(Sha256::digest(NEW_KEYRING))),
    )
    .unwrap();
    let keyring = Keyring::open(&fixture.layout.keyring_base(A)).unwrap();
    assert!(keyring.is_pending());

    set.update_repositories(&NoProgress).unwrap();

    assert!(!keyring.is_pending());
    assert_eq!(fixture.keyring_material(A).as_deref(), Some(NEW_KEYRING));
    assert_eq!(keyring_version(&fixture), Some(201401010000));
    set.install("bank", &NoProgress).unwrap();
}
