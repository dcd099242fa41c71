//! Error types for configuration handling.

use thiserror::Error;

/// Errors raised while reading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A configuration file or a required element is missing.
    #[error("missing configuration: {0}")]
    Missing(String),

    /// The configuration is present but malformed.
    #[error("invalid configuration: {0}")]
    Invalid(String),

    /// IO error while reading configuration or key material.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The document is not valid YAML.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl ConfigError {
    /// Whether this error reports a missing file or element.
    pub fn is_missing(&self) -> bool {
        matches!(self, ConfigError::Missing(_))
    }
}
