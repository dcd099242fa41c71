//! Directories built from key files on disk.

mod common;

use common::{configuration, ec_key, rsa_key};
use roam_token::{DirectoryExt, DirectoryRegistry, SessionError, write_keypair};
use std::fs;
use tempfile::TempDir;

#[test]
fn test_trust_follows_public_keys_on_disk() {
    let dir = TempDir::new().unwrap();
    let (_, public) = write_keypair(dir.path(), "authority9", &ec_key()).unwrap();
    let extra = format!("keystore:\n  public: {}\n", dir.path().display());

    let directory = DirectoryRegistry::default().build(configuration(&extra)).unwrap();
    assert!(directory.trusted_authority("authority9"));
    assert!(directory.local_authority_name().is_none());

    fs::remove_file(public).unwrap();
    let directory = DirectoryRegistry::default().build(configuration(&extra)).unwrap();
    assert!(!directory.trusted_authority("authority9"));
}

#[test]
fn test_legacy_authority_setting_finds_private_key() {
    let dir = TempDir::new().unwrap();
    write_keypair(dir.path(), "authority9", &rsa_key()).unwrap();
    write_keypair(dir.path(), "authority2", &ec_key()).unwrap();

    let extra = format!(
        "authority: authority9\ncookie:\n  version: 1\nkeystore:\n  public: {}\n",
        dir.path().display()
    );
    let directory = DirectoryRegistry::default().build(configuration(&extra)).unwrap();
    assert_eq!(directory.local_authority_name(), Some("authority9"));

    let mut session = directory.create_session().unwrap();
    session.set("user", "alice").unwrap();
    let cookie = session.to_cookie().unwrap();
    assert_eq!(directory.load_session(&cookie).unwrap()["user"], "alice");
}

#[test]
fn test_authority_must_match_private_key() {
    let dir = TempDir::new().unwrap();
    let (private, _) = write_keypair(dir.path(), "authority1", &ec_key()).unwrap();

    let extra = format!(
        "authority: authority2\nkeystore:\n  public: {}\n  private: {}\n",
        dir.path().display(),
        private.display()
    );
    let err = DirectoryRegistry::default().build(configuration(&extra)).unwrap_err();
    assert!(matches!(err, SessionError::Configuration(_)), "{err}");

    let extra = format!("authority: authority3\nkeystore:\n  public: {}\n", dir.path().display());
    let err = DirectoryRegistry::default().build(configuration(&extra)).unwrap_err();
    assert!(err.to_string().contains("authority3.key"), "{err}");
}

#[test]
fn test_missing_key_path_is_configuration_error() {
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("nowhere");
    let extra = format!("keystore:\n  public: {}\n", missing.display());
    let err = DirectoryRegistry::default().build(configuration(&extra)).unwrap_err();
    assert!(matches!(err, SessionError::Configuration(_)), "{err}");
}

#[test]
fn test_two_nodes_share_one_key_directory() {
    let dir = TempDir::new().unwrap();
    write_keypair(dir.path(), "authority1", &ec_key()).unwrap();
    let public = format!("keystore:\n  public: {}\n", dir.path().display());

    let writer = DirectoryRegistry::default()
        .build(configuration(&format!(
            "{public}  private: {}\n",
            dir.path().join("authority1.key").display()
        )))
        .unwrap();
    let reader = DirectoryRegistry::default().build(configuration(&public)).unwrap();

    let mut session = writer.create_session().unwrap();
    session.set("user", "alice").unwrap();
    let cookie = session.to_cookie().unwrap();

    let mut loaded = reader.load_session(&cookie).unwrap();
    assert_eq!(loaded["user"], "alice");
    assert!(matches!(loaded.renew(None), Err(SessionError::NoAuthority)));
}
