//! Loading configuration from disk.

use roam_core::{ConfigError, Configuration};
use std::io::Write;
use tempfile::NamedTempFile;

#[test]
fn loads_yaml_file_for_environment() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(
        file,
        "common:\n  attributes:\n    signed: [user]\n  timeout: 60\nproduction:\n  cookie:\n    domain: example.com\n    name: prod_session\n  ephemeral: true"
    )
    .unwrap();

    let config = Configuration::from_file(file.path(), "production").unwrap();
    let settings = config.settings();
    assert_eq!(settings.cookie.domain.as_deref(), Some("example.com"));
    assert_eq!(settings.cookie.name, "prod_session");
    assert!(settings.ephemeral);
    assert_eq!(settings.timeout, 60);
}

#[test]
fn unreadable_file_is_missing_configuration() {
    let dir = tempfile::tempdir().unwrap();
    let err = Configuration::from_file(dir.path().join("nope.yaml"), "test").unwrap_err();
    assert!(matches!(err, ConfigError::Missing(_)));
}

#[test]
fn invalid_yaml_is_reported() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "common: [unclosed").unwrap();
    let err = Configuration::from_file(file.path(), "test").unwrap_err();
    assert!(matches!(err, ConfigError::Yaml(_)));
}
