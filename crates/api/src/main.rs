use anyhow::Context;

use gatekeeper_api::app::{build_app, services::build_state};
use gatekeeper_api::config::{Config, load_env_file};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env_file = load_env_file()?;
    gatekeeper_observability::init();
    if let Some(path) = env_file {
        tracing::info!(path = %path.display(), "loaded env file");
    }

    let config = Config::from_env()?;
    let state = build_state(&config).await?;
    let app = build_app(state);

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;
    Ok(())
}
