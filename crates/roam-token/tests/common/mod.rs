//! Shared fixtures for roam-token integration tests.

#![allow(dead_code)]

use chrono::{DateTime, Utc};
use roam_core::Configuration;
use roam_token::{
    Directory, KeyAlgorithm, Keystore, KeystoreDirectory, PrivateKey, PublicKey, Schema,
    create_keypair,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

pub const AUTHORITY: &str = "authority1";

pub const BASE_CONFIG: &str = "\
attributes:
  signed: [user]
  insecure: [favorite_color]
timeout: 60
";

/// RSA generation is slow; every test in a binary shares one 2048-bit key.
pub fn rsa_key() -> PrivateKey {
    static PEM: OnceLock<String> = OnceLock::new();
    let pem = PEM.get_or_init(|| {
        create_keypair(&KeyAlgorithm::Rsa { bits: 2048 })
            .unwrap()
            .to_pem()
            .unwrap()
    });
    PrivateKey::from_pem(pem).unwrap()
}

pub fn ec_key() -> PrivateKey {
    create_keypair(&KeyAlgorithm::Ec {
        curve: "prime256v1".into(),
    })
    .unwrap()
}

pub fn configuration(extra: &str) -> Arc<Configuration> {
    let yaml = format!("{BASE_CONFIG}{extra}");
    Arc::new(Configuration::from_yaml_str(&yaml, "test").unwrap())
}

/// An authority node named [`AUTHORITY`] writing `version` cookies.
pub fn authority(key: PrivateKey, version: u8) -> Arc<dyn Directory> {
    authority_with(key, &format!("cookie:\n  version: {version}\n"))
}

pub fn authority_with(key: PrivateKey, extra: &str) -> Arc<dyn Directory> {
    let mut keystore = Keystore::default();
    keystore.add_public_key(AUTHORITY, key.public_key()).unwrap();
    keystore.set_private_key(AUTHORITY, key).unwrap();
    KeystoreDirectory::with_keystore(configuration(extra), keystore).into_shared()
}

/// A relying node that only knows public keys.
pub fn relying(keys: &[(&str, PublicKey)], extra: &str) -> Arc<dyn Directory> {
    let mut keystore = Keystore::default();
    for (name, key) in keys {
        keystore.add_public_key(*name, key.clone()).unwrap();
    }
    KeystoreDirectory::with_keystore(configuration(extra), keystore).into_shared()
}

/// Counts how often the private key is fetched, i.e. how often a session is signed.
#[derive(Debug)]
pub struct CountingDirectory {
    inner: Arc<dyn Directory>,
    signs: AtomicUsize,
}

impl CountingDirectory {
    pub fn wrap(inner: Arc<dyn Directory>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            signs: AtomicUsize::new(0),
        })
    }

    pub fn signs(&self) -> usize {
        self.signs.load(Ordering::SeqCst)
    }
}

impl Directory for CountingDirectory {
    fn configuration(&self) -> &Configuration {
        self.inner.configuration()
    }

    fn keystore(&self) -> &Keystore {
        self.inner.keystore()
    }

    fn schema(&self) -> &Schema {
        self.inner.schema()
    }

    fn private_key(&self) -> Option<&PrivateKey> {
        self.signs.fetch_add(1, Ordering::SeqCst);
        self.inner.private_key()
    }

    fn valid_session(&self, id: &str, expired_at: DateTime<Utc>) -> bool {
        self.inner.valid_session(id, expired_at)
    }

    fn report_invalid_session(&self, id: &str, expired_at: DateTime<Utc>) {
        self.inner.report_invalid_session(id, expired_at)
    }
}
