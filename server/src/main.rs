use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use docchat_retrieval::RetrievalEngine;
use docchat_server::{AppState, Cli, Config, router};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = Config::load(&cli)?;

    let engine = RetrievalEngine::new(config.retrieval.clone())
        .await
        .context("failed to initialize retrieval engine")?;
    let bind = config.server.bind.clone();
    let state = Arc::new(AppState {
        engine,
        server: config.server,
    });

    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("failed to bind to {bind}"))?;

    info!("docchat server listening on http://{bind}");
    info!(
        "sessions: {}, embedding provider: {:?}, generation model: {}",
        config.retrieval.sessions_dir.display(),
        config.retrieval.embedding.provider,
        config.retrieval.generation.model
    );

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("failed to install Ctrl+C handler: {e}");
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}
