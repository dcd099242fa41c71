use roam_server::{AppState, config::ServerConfig, router};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let server = ServerConfig::from_env();
    let state = AppState::init(&server)?;
    tracing::info!(
        config = %server.config_path.display(),
        environment = %server.environment,
        authority = state.directory.local_authority_name().unwrap_or("-"),
        "Trust directory ready"
    );

    let app = router(&state);

    tracing::info!("roam-server listening on {}", server.bind);
    let listener = tokio::net::TcpListener::bind(&server.bind).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
