//! Trust directory: which authorities are trusted and which sessions are still valid.

use crate::error::SessionError;
use crate::keys::{PrivateKey, PublicKey};
use crate::keystore::Keystore;
use crate::session::{Schema, Session, Version};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use roam_core::Configuration;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tracing::info;

/// Name under which [`KeystoreDirectory`] is registered.
pub const DEFAULT_DIRECTORY: &str = "default";

/// Capability interface consulted while creating and verifying sessions.
///
/// Implementations are built once at startup and shared between requests,
/// so everything here takes `&self`.
pub trait Directory: Send + Sync + fmt::Debug {
    fn configuration(&self) -> &Configuration;

    fn keystore(&self) -> &Keystore;

    /// Attribute schema derived from configuration.
    fn schema(&self) -> &Schema;

    /// This node's authority name, if it holds a private key.
    fn local_authority_name(&self) -> Option<&str> {
        self.keystore().private_key_name()
    }

    fn private_key(&self) -> Option<&PrivateKey> {
        self.keystore().private_key()
    }

    fn public_key(&self, authority: &str) -> Option<&PublicKey> {
        self.keystore().public_key(authority)
    }

    /// An explicit `trust` list wins; otherwise any authority with a loaded
    /// public key is trusted.
    fn trusted_authority(&self, authority: &str) -> bool {
        match &self.configuration().settings().trust {
            Some(trusted) => trusted.iter().any(|name| name == authority),
            None => self.keystore().public_key(authority).is_some(),
        }
    }

    /// False when the session is expired or has been revoked.
    fn valid_session(&self, id: &str, expired_at: DateTime<Utc>) -> bool;

    fn report_invalid_session(&self, id: &str, expired_at: DateTime<Utc>);
}

/// Session construction through a shared directory.
pub trait DirectoryExt {
    /// Create a session in the configured (or newest) wire version. Nodes
    /// without a private key get the invalid placeholder.
    fn create_session(&self) -> Result<Session, SessionError>;

    /// Decode and verify a serialized session.
    fn load_session(&self, cookie: &str) -> Result<Session, SessionError>;
}

impl DirectoryExt for Arc<dyn Directory> {
    fn create_session(&self) -> Result<Session, SessionError> {
        let version = match self.configuration().settings().cookie.version {
            Some(number) => Version::try_from(number)?,
            None => Version::LATEST,
        };
        Session::create(Arc::clone(self), version)
    }

    fn load_session(&self, cookie: &str) -> Result<Session, SessionError> {
        Session::load(Arc::clone(self), cookie)
    }
}

/// Where revoked session ids are recorded.
pub trait RevocationStore: Send + Sync + fmt::Debug {
    fn report(&self, id: &str, expired_at: DateTime<Utc>);

    fn is_revoked(&self, id: &str) -> bool;
}

/// Process-local revocation set.
#[derive(Debug, Default)]
pub struct InMemoryRevocationStore {
    revoked: Mutex<HashSet<String>>,
}

impl InMemoryRevocationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.revoked.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl RevocationStore for InMemoryRevocationStore {
    fn report(&self, id: &str, _expired_at: DateTime<Utc>) {
        self.revoked.lock().insert(id.to_string());
    }

    fn is_revoked(&self, id: &str) -> bool {
        self.revoked.lock().contains(id)
    }
}

/// Default directory backed by a [`Keystore`] and a [`RevocationStore`].
#[derive(Debug)]
pub struct KeystoreDirectory {
    configuration: Arc<Configuration>,
    keystore: Keystore,
    schema: Schema,
    revocations: Arc<dyn RevocationStore>,
}

impl KeystoreDirectory {
    /// Load keys named by the configuration.
    pub fn new(configuration: Arc<Configuration>) -> Result<Self, SessionError> {
        let keystore = Keystore::load(&configuration)?;
        Ok(Self::with_keystore(configuration, keystore))
    }

    /// Use an already-populated keystore.
    pub fn with_keystore(configuration: Arc<Configuration>, keystore: Keystore) -> Self {
        let schema = Schema::from_settings(configuration.settings());
        Self {
            configuration,
            keystore,
            schema,
            revocations: Arc::new(InMemoryRevocationStore::new()),
        }
    }

    /// Replace the revocation store, e.g. with one shared between nodes.
    pub fn with_revocation_store(mut self, store: Arc<dyn RevocationStore>) -> Self {
        self.revocations = store;
        self
    }

    pub fn into_shared(self) -> Arc<dyn Directory> {
        Arc::new(self)
    }
}

impl Directory for KeystoreDirectory {
    fn configuration(&self) -> &Configuration {
        &self.configuration
    }

    fn keystore(&self) -> &Keystore {
        &self.keystore
    }

    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn valid_session(&self, id: &str, expired_at: DateTime<Utc>) -> bool {
        expired_at > Utc::now() && !self.revocations.is_revoked(id)
    }

    fn report_invalid_session(&self, id: &str, expired_at: DateTime<Utc>) {
        info!(session_id = %id, %expired_at, "Session invalidated");
        self.revocations.report(id, expired_at);
    }
}

type Factory = Box<dyn Fn(Arc<Configuration>) -> Result<Arc<dyn Directory>, SessionError> + Send + Sync>;

/// Named directory factories, resolved from the `directory` setting.
pub struct DirectoryRegistry {
    factories: HashMap<String, Factory>,
}

impl DirectoryRegistry {
    /// A registry with no factories.
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(Arc<Configuration>) -> Result<Arc<dyn Directory>, SessionError> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Box::new(factory));
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Build the directory named by `directory` (default: [`DEFAULT_DIRECTORY`]).
    pub fn build(&self, configuration: Arc<Configuration>) -> Result<Arc<dyn Directory>, SessionError> {
        let name = configuration
            .settings()
            .directory
            .as_ref()
            .map(|d| d.name().to_string())
            .unwrap_or_else(|| DEFAULT_DIRECTORY.to_string());

        let factory = self.factories.get(&name).ok_or_else(|| {
            SessionError::config(format!(
                "unknown directory '{name}'; registered: {}",
                self.names().join(", ")
            ))
        })?;

        info!(directory = %name, environment = configuration.environment(), "Building trust directory");
        factory(configuration)
    }
}

impl Default for DirectoryRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        for name in [DEFAULT_DIRECTORY, "keystore"] {
            registry.register(name, |configuration| {
                Ok(KeystoreDirectory::new(configuration)?.into_shared())
            });
        }
        registry
    }
}

impl fmt::Debug for DirectoryRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirectoryRegistry")
            .field("names", &self.names())
            .finish()
    }
}
