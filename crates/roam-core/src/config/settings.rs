//! Typed view over the merged configuration mapping.

use serde::{Deserialize, Deserializer, Serialize};
use std::path::PathBuf;

/// All settings recognised by roam, after environment layering.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct Settings {
    /// Attribute schema.
    pub attributes: AttributesConfig,

    /// Cookie naming and wire version.
    pub cookie: CookieConfig,

    /// Session lifetime in minutes.
    #[serde(deserialize_with = "minutes")]
    pub timeout: u64,

    /// Renewal window in minutes before expiry. Absent disables auto-renewal.
    #[serde(deserialize_with = "optional_minutes")]
    pub renew: Option<u64>,

    /// Issue session cookies without an `Expires` attribute.
    pub ephemeral: bool,

    /// Explicit allow-list of authorities. Absent means any authority with a
    /// loaded public key is trusted.
    pub trust: Option<Vec<String>>,

    /// Legacy: this node's authority name.
    pub authority: Option<String>,

    /// Key locations.
    pub keystore: KeystoreConfig,

    /// Trust directory implementation to build.
    pub directory: Option<DirectoryConfig>,
}

/// Attribute names split by who may write them.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct AttributesConfig {
    /// Attributes only a local authority may write.
    pub signed: Vec<String>,

    /// Attributes any node may write.
    pub insecure: Vec<String>,
}

/// Cookie settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CookieConfig {
    pub name: String,
    pub domain: Option<String>,

    /// Forced wire-format version (1..=4).
    #[serde(deserialize_with = "optional_version")]
    pub version: Option<u8>,
}

impl Default for CookieConfig {
    fn default() -> Self {
        Self {
            name: default_cookie_name(),
            domain: None,
            version: None,
        }
    }
}

fn default_cookie_name() -> String {
    "global_session".to_string()
}

/// Where public and private keys are found.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct KeystoreConfig {
    /// Files or directories holding authority public keys.
    #[serde(deserialize_with = "one_or_many")]
    pub public: Vec<PathBuf>,

    /// File or directory holding this node's private key.
    pub private: Option<PathBuf>,
}

/// Directory selection: either a bare name or `{ class: name }`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum DirectoryConfig {
    Name(String),
    Class { class: String },
}

impl DirectoryConfig {
    /// The registered name of the directory implementation.
    pub fn name(&self) -> &str {
        match self {
            DirectoryConfig::Name(name) => name,
            DirectoryConfig::Class { class } => class,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Number {
    Int(u64),
    Text(String),
}

impl Number {
    fn into_u64<E: serde::de::Error>(self) -> Result<u64, E> {
        match self {
            Number::Int(n) => Ok(n),
            Number::Text(s) => s
                .trim()
                .parse()
                .map_err(|_| E::custom(format!("expected a number of minutes, got '{s}'"))),
        }
    }
}

fn minutes<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    Number::deserialize(deserializer)?.into_u64()
}

fn optional_minutes<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u64>, D::Error> {
    Option::<Number>::deserialize(deserializer)?
        .map(Number::into_u64)
        .transpose()
}

fn optional_version<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u8>, D::Error> {
    match optional_minutes(deserializer)? {
        None => Ok(None),
        Some(v) => u8::try_from(v)
            .map(Some)
            .map_err(|_| serde::de::Error::custom(format!("cookie version {v} out of range"))),
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(PathBuf),
    Many(Vec<PathBuf>),
}

fn one_or_many<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<PathBuf>, D::Error> {
    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(OneOrMany::One(path)) => vec![path],
        Some(OneOrMany::Many(paths)) => paths,
    })
}
