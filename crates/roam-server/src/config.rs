use roam_core::Configuration;
use std::{env, path::PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Bind address, e.g. "0.0.0.0:8080"
    pub bind: String,
    /// Session configuration file (YAML).
    pub config_path: PathBuf,
    /// Section of the configuration file overlaid on `common`.
    pub environment: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            config_path: PathBuf::from("roam.yaml"),
            environment: "development".to_string(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0:8080".to_string()
}

impl ServerConfig {
    /// `ROAM_BIND`, `ROAM_CONFIG` and `ROAM_ENV`, each with a default.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            bind: env::var("ROAM_BIND").unwrap_or(defaults.bind),
            config_path: env::var_os("ROAM_CONFIG")
                .map(PathBuf::from)
                .unwrap_or(defaults.config_path),
            environment: env::var("ROAM_ENV").unwrap_or(defaults.environment),
        }
    }
}

pub fn load_config(server: &ServerConfig) -> anyhow::Result<Configuration> {
    let configuration = Configuration::from_file(&server.config_path, &server.environment)?;
    Ok(configuration)
}
