//! facenet-api — HTTP service for face embeddings, detection scoring and comparison.

mod config;
mod error;
mod routes;
mod state;
mod stub;

use anyhow::Context;
use config::Config;
use state::{AppState, Backend};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = Config::load()?;
    tracing::info!(
        bind = %config.bind,
        model_dir = %config.model_dir.display(),
        force_stub = config.force_stub,
        "facenet-api starting"
    );

    let loader_config = config.clone();
    let backend = tokio::task::spawn_blocking(move || Backend::from_config(&loader_config))
        .await
        .context("model loading task panicked")?;
    if backend.is_stub() {
        tracing::warn!("running in stub mode: responses are placeholders");
    }

    let app = routes::router(AppState::new(backend, config.min_image_size), config.body_limit);

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("binding {}", config.bind))?;
    tracing::info!(addr = %config.bind, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("facenet-api stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
    }
    tracing::info!("shutdown requested");
}
