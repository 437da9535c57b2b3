mod api;
mod archive;
mod config;
mod error;
mod indexer;
mod models;
mod parser;
mod refresh;
mod schedule;
mod service;
#[cfg(test)]
mod test_support;

use std::sync::Arc;

use anyhow::{Context, Result};
use config::Config;
use refresh::RefreshSchedule;
use schedule::SystemClock;
use service::{RefreshSettings, RelationIndexService};
use tokio::sync::watch;
use tracing::{info, warn};

#[derive(Clone)]
pub struct AppState {
    pub relations: RelationIndexService,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "subject_relations_index=info,tower_http=info".into()),
        )
        .init();

    let config = Config::from_env()?;
    archive::ensure_cache_dir(&config.cache_dir)
        .await
        .with_context(|| format!("cannot prepare cache dir {}", config.cache_dir.display()))?;
    let client =
        archive::http_client(config.http_timeout).context("failed to build http client")?;

    let relations = RelationIndexService::new(client, RefreshSettings::from_config(&config));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = refresh::spawn_refresh_worker(
        relations.clone(),
        Arc::new(SystemClock),
        RefreshSchedule::from_config(&config),
        shutdown_rx,
    );

    let app = api::router(AppState { relations });
    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    info!("subject-relations-index listening on {}", config.bind_addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let _ = shutdown_tx.send(true);
    if let Err(err) = worker.await {
        warn!("refresh worker ended abnormally: {err}");
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for ctrl-c: {err}");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}
