use crate::config::{ServerConfig, load_config};
use crate::middleware::SessionState;
use crate::request::SessionMiddleware;
use roam_token::{Directory, DirectoryRegistry};
use std::sync::Arc;

/// Shared application state.
///
/// The directory is fully built (keys loaded) before the state exists, so
/// request handlers only ever see a complete keystore.
#[derive(Clone)]
pub struct AppState {
    pub directory: Arc<dyn Directory>,
    pub sessions: SessionState,
}

impl AppState {
    pub fn init(server: &ServerConfig) -> anyhow::Result<Self> {
        let configuration = Arc::new(load_config(server)?);
        let directory = DirectoryRegistry::default().build(configuration)?;
        Ok(Self::from_directory(directory))
    }

    pub fn from_directory(directory: Arc<dyn Directory>) -> Self {
        let sessions = SessionState::new(SessionMiddleware::new(directory.clone()));
        Self {
            directory,
            sessions,
        }
    }
}
