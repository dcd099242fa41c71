//! Loading authority keys from the filesystem.

use crate::error::SessionError;
use crate::keys::{is_private_pem, PrivateKey, PublicKey};
use roam_core::Configuration;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Environment variable naming this node's private key file or directory.
pub const PRIVATE_KEY_ENV: &str = "ROAM_PRIVATE_KEY";

/// Public keys of every known authority plus, optionally, this node's private key.
#[derive(Default)]
pub struct Keystore {
    public_keys: HashMap<String, PublicKey>,
    private_key: Option<PrivateKey>,
    private_key_name: Option<String>,
}

impl Keystore {
    /// Load keys named by `keystore.public` and `keystore.private`.
    ///
    /// The private key location falls back to [`PRIVATE_KEY_ENV`], then to a
    /// `<authority>.key` file in the public key directories when the legacy
    /// `authority` setting is present.
    pub fn load(configuration: &Configuration) -> Result<Self, SessionError> {
        let settings = configuration.settings();
        let mut keystore = Keystore::default();

        for location in &settings.keystore.public {
            keystore.load_public_key(location)?;
        }

        let private = settings
            .keystore
            .private
            .clone()
            .or_else(|| std::env::var_os(PRIVATE_KEY_ENV).map(PathBuf::from));

        match (private, &settings.authority) {
            (Some(location), _) => keystore.load_private_key(&location)?,
            (None, Some(authority)) => {
                let path = find_authority_key(&settings.keystore.public, authority)?;
                keystore.load_private_key(&path)?;
            }
            (None, None) => {}
        }

        if let (Some(authority), Some(loaded)) = (&settings.authority, &keystore.private_key_name) {
            if authority != loaded {
                return Err(SessionError::config(format!(
                    "configured authority '{authority}' does not match private key '{loaded}'"
                )));
            }
        }

        info!(
            public_keys = keystore.public_keys.len(),
            authority = keystore.private_key_name.as_deref().unwrap_or("-"),
            "Keystore loaded"
        );
        Ok(keystore)
    }

    /// Add a public key under `name`.
    pub fn add_public_key(&mut self, name: impl Into<String>, key: PublicKey) -> Result<(), SessionError> {
        let name = name.into();
        if self.public_keys.contains_key(&name) {
            return Err(SessionError::config(format!(
                "duplicate public key for authority: {name}"
            )));
        }
        self.public_keys.insert(name, key);
        Ok(())
    }

    /// Install the local private key.
    pub fn set_private_key(&mut self, name: impl Into<String>, key: PrivateKey) -> Result<(), SessionError> {
        let name = name.into();
        if let Some(existing) = &self.private_key_name {
            return Err(SessionError::config(format!(
                "only one private key is allowed; already loaded {existing}, cannot also load {name}"
            )));
        }
        self.private_key = Some(key);
        self.private_key_name = Some(name);
        Ok(())
    }

    fn load_public_key(&mut self, path: &Path) -> Result<(), SessionError> {
        if path.is_dir() {
            for entry in sorted_entries(path)? {
                self.load_public_key(&entry)?;
            }
            Ok(())
        } else if path.is_file() {
            let pem = std::fs::read_to_string(path)?;
            if is_private_pem(&pem) {
                debug!(path = %path.display(), "Skipping private key in public keystore");
                return Ok(());
            }
            let name = authority_name(path)?;
            let key = PublicKey::from_pem(&pem)
                .map_err(|e| SessionError::config(format!("{}: {e}", path.display())))?;
            debug!(authority = %name, path = %path.display(), "Loaded public key");
            self.add_public_key(name, key)
        } else {
            Err(SessionError::config(format!(
                "path is neither a file nor a directory: {}",
                path.display()
            )))
        }
    }

    fn load_private_key(&mut self, path: &Path) -> Result<(), SessionError> {
        let file = if path.is_dir() {
            sorted_entries(path)?
                .into_iter()
                .find(|p| p.extension().is_some_and(|ext| ext == "key"))
                .ok_or_else(|| {
                    SessionError::config(format!("no *.key file found in {}", path.display()))
                })?
        } else if path.is_file() {
            path.to_path_buf()
        } else {
            return Err(SessionError::config(format!(
                "path is not a file: {}",
                path.display()
            )));
        };

        let name = authority_name(&file)?;
        let key = PrivateKey::load_from_file(&file)
            .map_err(|e| SessionError::config(format!("{}: {e}", file.display())))?;
        debug!(authority = %name, path = %file.display(), "Loaded private key");
        self.set_private_key(name, key)
    }

    pub fn public_keys(&self) -> &HashMap<String, PublicKey> {
        &self.public_keys
    }

    pub fn public_key(&self, authority: &str) -> Option<&PublicKey> {
        self.public_keys.get(authority)
    }

    pub fn private_key(&self) -> Option<&PrivateKey> {
        self.private_key.as_ref()
    }

    pub fn private_key_name(&self) -> Option<&str> {
        self.private_key_name.as_deref()
    }
}

impl fmt::Debug for Keystore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut authorities: Vec<&String> = self.public_keys.keys().collect();
        authorities.sort();
        f.debug_struct("Keystore")
            .field("public_keys", &authorities)
            .field("private_key_name", &self.private_key_name)
            .finish()
    }
}

fn sorted_entries(dir: &Path) -> Result<Vec<PathBuf>, SessionError> {
    let mut entries = std::fs::read_dir(dir)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<Result<Vec<_>, _>>()?;
    entries.sort();
    Ok(entries)
}

fn authority_name(path: &Path) -> Result<String, SessionError> {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .map(str::to_string)
        .ok_or_else(|| SessionError::config(format!("cannot name key file {}", path.display())))
}

fn find_authority_key(locations: &[PathBuf], authority: &str) -> Result<PathBuf, SessionError> {
    let file_name = format!("{authority}.key");
    locations
        .iter()
        .filter(|location| location.is_dir())
        .map(|dir| dir.join(&file_name))
        .find(|candidate| candidate.is_file())
        .ok_or_else(|| {
            SessionError::config(format!("key file {file_name} not found in public keystore"))
        })
}
