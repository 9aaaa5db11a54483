use anyhow::{Context, Result};
use axum::Router;
use std::{io::ErrorKind, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

mod config;
mod errors;
mod handlers;
mod models;
mod routes;
mod services;
mod state;

use services::{
    reconfig_service::ReconfigService, scan_service::ScanService, selector::BackendSelector,
    store_connector::S3Connector,
};

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config ---
    let cfg = config::AppConfig::from_env_and_args()?;

    tracing::info!("Starting object-scan-bridge with config: {:?}", cfg);

    // --- Initial backend session ---
    let selector = BackendSelector::new();
    let reconfig = ReconfigService::new(
        selector.clone(),
        cfg.backend_options.clone(),
        cfg.probe_timeout,
    );
    let session = reconfig
        .apply(cfg.backend.clone(), false)
        .await
        .context("initial backend configuration is unusable")?;
    tracing::info!(
        "Active backend: {} at {} (generation {})",
        session.mode(),
        session.descriptor(),
        session.generation()
    );

    // --- Initialize core services ---
    let stores = Arc::new(S3Connector::new(cfg.s3_region.clone(), cfg.s3_endpoint.clone()));
    let state = state::AppState {
        scans: ScanService::new(selector.clone(), stores, cfg.custom_tags.clone()),
        reconfig,
        selector,
        custom_tags: cfg.custom_tags.clone().into(),
    };

    // --- Build router ---
    let app: Router = routes::routes::routes(cfg.max_upload_bytes).with_state(state);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}
