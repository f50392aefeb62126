use anyhow::Result;
use std::{io::ErrorKind, net::SocketAddr, sync::Arc};
use tokio::{net::TcpListener, signal};
use tracing_subscriber::EnvFilter;

mod config;
mod errors;
mod handlers;
mod middleware;
mod models;
mod routes;
mod services;
mod state;
#[cfg(test)]
mod testing;

use services::{
    auth::StaticKeys, gateway::Gateway, storage::BucketStorage, transport::build_transport,
};

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // --- Parse config ---
    let cfg = config::AppConfig::from_env_and_args()?;

    tracing::info!("Starting image-gateway with config: {:?}", cfg);

    // --- Object store client ---
    let storage = BucketStorage::from_settings(&cfg.store)?;
    tracing::info!(
        backend = ?cfg.store.backend,
        signing = storage.can_sign(),
        public_urls = storage.has_public_base(),
        "Object store ready"
    );
    let store: Arc<dyn services::storage::ObjectStorage> = Arc::new(storage);

    // --- Auth collaborator ---
    let keys = StaticKeys::from_csv(&cfg.api_keys);
    if keys.is_empty() {
        tracing::warn!("API_KEY is empty; uploads and deletes will be refused");
    } else {
        tracing::info!(keys = keys.len(), "API keys loaded");
    }

    // --- Transport strategy + facade ---
    let transport = build_transport(
        cfg.transport,
        store.clone(),
        reqwest::Client::new(),
        cfg.signed_url_expiry,
    );
    let gateway = Gateway::new(store, transport, Arc::new(keys));

    let limiter = Arc::new(middleware::limiter(cfg.rate_limit, cfg.rate_limit_window)?);
    spawn_limiter_sweep(limiter.clone(), cfg.rate_limit_window);

    let state = state::AppState {
        gateway,
        limiter,
        max_upload_bytes: cfg.max_upload_bytes,
    };

    // --- Build router ---
    let app = routes::routes::routes(state);

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

    tracing::info!(
        transport = ?cfg.transport,
        "Server listening on http://{}",
        listener.local_addr()?
    );
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

/// Drops per-client buckets that have refilled, once per window.
fn spawn_limiter_sweep(limiter: Arc<middleware::Limiter>, window: std::time::Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(window);
        loop {
            ticker.tick().await;
            limiter.retain_recent();
            limiter.shrink_to_fit();
        }
    });
}

/// Resolves on Ctrl-C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!("failed to listen for ctrl-c: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                tracing::error!("failed to listen for SIGTERM: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received");
}
