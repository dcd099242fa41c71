//! Layered configuration.
//!
//! A configuration document is a YAML mapping with one section per environment
//! plus a `common` section:
//!
//! ```yaml
//! common:
//!   attributes:
//!     signed: [user]
//!     insecure: [favorite_color]
//!   cookie:
//!     name: global_session
//!   timeout: 60
//!   keystore:
//!     public: config/authorities
//! production:
//!   cookie:
//!     domain: example.com
//!   keystore:
//!     public: config/authorities
//!     private: config/authorities/app1.key
//! ```
//!
//! Lookup is per top-level key: a key present in the environment section wins
//! outright, otherwise the `common` value is used. Sections are not deep-merged.
//! A document with neither a `common` nor an environment section is read as if
//! it were entirely `common`.

mod settings;

pub use settings::{AttributesConfig, CookieConfig, DirectoryConfig, KeystoreConfig, Settings};

use crate::error::ConfigError;
use serde_yaml::{Mapping, Value};
use std::path::Path;

/// Name of the section shared by every environment.
pub const COMMON_SECTION: &str = "common";

/// Elements every configuration must provide.
const REQUIRED: &[&str] = &["attributes/signed", "timeout"];

/// A validated configuration for one environment.
#[derive(Debug, Clone)]
pub struct Configuration {
    environment: String,
    merged: Mapping,
    settings: Settings,
}

impl Configuration {
    /// Build a configuration from an already-parsed document.
    pub fn new(document: Value, environment: impl Into<String>) -> Result<Self, ConfigError> {
        let environment = environment.into();
        let Value::Mapping(document) = document else {
            return Err(ConfigError::Invalid(
                "configuration must contain a mapping as its top-level element".to_string(),
            ));
        };

        let merged = layer(&document, &environment)?;
        for path in REQUIRED {
            if lookup(&merged, path).is_none() {
                return Err(ConfigError::Missing(format!(
                    "configuration does not specify required element '{path}'"
                )));
            }
        }

        let settings: Settings = serde_yaml::from_value(Value::Mapping(merged.clone()))?;

        Ok(Self {
            environment,
            merged,
            settings,
        })
    }

    /// Parse a YAML document.
    pub fn from_yaml_str(yaml: &str, environment: impl Into<String>) -> Result<Self, ConfigError> {
        let document: Value = serde_yaml::from_str(yaml)?;
        Self::new(document, environment)
    }

    /// Read and parse a YAML file.
    pub fn from_file(path: impl AsRef<Path>, environment: impl Into<String>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|e| {
            ConfigError::Missing(format!(
                "missing or unreadable configuration file {}: {e}",
                path.display()
            ))
        })?;
        Self::from_yaml_str(&yaml, environment)
    }

    /// The environment this configuration was resolved for.
    pub fn environment(&self) -> &str {
        &self.environment
    }

    /// Typed settings.
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Raw top-level lookup after layering.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.merged.get(key)
    }

    /// Raw nested lookup using `/` as separator, e.g. `cookie/name`.
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        lookup(&self.merged, path)
    }
}

fn layer(document: &Mapping, environment: &str) -> Result<Mapping, ConfigError> {
    let section = |name: &str| -> Result<Option<&Mapping>, ConfigError> {
        match document.get(name) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Mapping(m)) => Ok(Some(m)),
            Some(_) => Err(ConfigError::Invalid(format!(
                "configuration section '{name}' must be a mapping"
            ))),
        }
    };

    let common = section(COMMON_SECTION)?;
    let env = section(environment)?;

    if common.is_none() && env.is_none() {
        return Ok(document.clone());
    }

    let mut merged = common.cloned().unwrap_or_default();
    if let Some(env) = env {
        for (key, value) in env {
            merged.insert(key.clone(), value.clone());
        }
    }
    Ok(merged)
}

fn lookup<'a>(mapping: &'a Mapping, path: &str) -> Option<&'a Value> {
    let mut parts = path.split('/');
    let mut current = mapping.get(parts.next()?)?;
    for part in parts {
        current = current.as_mapping()?.get(part)?;
    }
    match current {
        Value::Null => None,
        value => Some(value),
    }
}
