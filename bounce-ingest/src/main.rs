//! Bounce ingestion server.
//!
//! Receives bounce webhooks from email providers, normalizes them and records
//! them in the configured store.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::{net::TcpListener, signal};
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use bounce::providers::HttpSnsClient;
use bounce::{build_router, AppState, BasicEmailSanitizer, BounceDispatcher, BounceStore, Config, InMemoryBounceStore};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize structured JSON logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().flatten_event(true))
        .init();

    info!("bounce_server_starting");

    // Load configuration
    let config = Config::from_env();
    info!(
        port = config.port,
        max_body_bytes = config.max_body_bytes,
        campaign_header = %config.campaign_header,
        ses_enabled = config.ses_enabled,
        sendgrid_enabled = config.sendgrid_enabled,
        postmark_enabled = config.postmark_enabled,
        forwardemail_enabled = config.forwardemail_enabled,
        "config_loaded"
    );

    let store: Arc<dyn BounceStore> = Arc::new(InMemoryBounceStore::new());
    let sns = HttpSnsClient::new(Duration::from_millis(config.sns_http_timeout_ms))?;

    let dispatcher = BounceDispatcher::from_config(
        &config,
        store.clone(),
        Arc::new(BasicEmailSanitizer),
        Arc::new(sns),
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let app = build_router(AppState::new(config, dispatcher, store));

    let listener = TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    info!(address = %addr, "bounce_server_listening");

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("bounce_server_shutdown_complete");

    Ok(())
}

/// Create a future that completes when a shutdown signal is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "ctrl_c_handler_failed");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "sigterm_handler_failed");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }

    info!("bounce_server_shutting_down");
}
