mod config;
mod error;
mod files;
mod filetree;
mod handler;
mod handlers;
mod metrics;
mod registry;
mod routes;
mod sandbox;
mod state;
mod workspace;
mod ws;

use anyhow::Context;
use axum::Router;
use config::{LanguageConfigManager, ServerConfig};
use sandbox::docker::DockerRuntime;
use sandbox::SandboxController;
use state::AppState;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info, warn};
use workspace::WorkspaceStore;

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::from_env()?;
    init_tracing(config.json_logs);

    info!("Devspace server booting...");

    let languages = LanguageConfigManager::load_or_builtin(&config.languages_config).map_err(|e| {
        error!("Failed to load language configurations: {}", e);
        e
    })?;
    info!("Loaded language configurations for: {:?}", languages.list_languages());

    let store = WorkspaceStore::open(&config.workspaces_dir)
        .await
        .with_context(|| format!("Failed to prepare {}", config.workspaces_dir.display()))?;
    info!(root = %store.root().display(), "Workspace root ready");

    let docker = DockerRuntime::connect()?;
    match docker.ping().await {
        Ok(()) => info!("Connected to Docker"),
        // environments are provisioned lazily, so keep serving file edits
        Err(e) => warn!(error = %e, "Docker is not reachable, runs will fail until it is"),
    }

    let sandbox = SandboxController::new(Arc::new(docker), store.clone(), languages, config.run_timeout);
    info!(run_timeout_ms = config.run_timeout.as_millis() as u64, "Sandbox controller ready");

    let bind_addr = config.bind_addr.clone();
    let state = AppState::new(store, sandbox, config);

    let app = Router::new().merge(routes::routes()).with_state(state);

    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", bind_addr))?;
    info!("HTTP server listening on {}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = signal::ctrl_c().await {
        error!(error = %e, "Failed to install CTRL+C signal handler");
        std::future::pending::<()>().await;
    }
    warn!("Received shutdown signal, closing connections...");
}
