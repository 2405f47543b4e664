//! Webhook endpoint handlers.
//!
//! Handlers take the body as raw bytes and pass it to the dispatcher
//! untouched, so provider signatures are checked against exactly what was
//! sent. Once the adapter accepts a delivery the response is a success,
//! whatever the store does with the records.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::HeaderMap,
    Json,
};
use serde::Serialize;
use tracing::{info, warn};

use crate::dispatch::{BounceDispatcher, DispatchOutcome, NATIVE_SERVICE};
use crate::error::BounceError;
use crate::store::BounceStore;
use crate::Config;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub dispatcher: Arc<BounceDispatcher>,
    pub store: Arc<dyn BounceStore>,
}

impl AppState {
    pub fn new(config: Config, dispatcher: BounceDispatcher, store: Arc<dyn BounceStore>) -> Self {
        Self {
            config: Arc::new(config),
            dispatcher: Arc::new(dispatcher),
            store,
        }
    }
}

/// Success envelope used by every non-error response.
#[derive(Debug, Serialize)]
pub struct DataResponse<T> {
    pub data: T,
}

impl<T> DataResponse<T> {
    pub fn new(data: T) -> Json<Self> {
        Json(Self { data })
    }
}

// =============================================================================
// Health Check
// =============================================================================

/// Health check response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub recorded: u64,
    pub record_failures: u64,
}

/// Health check endpoint.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let stats = state.dispatcher.stats();
    Json(HealthResponse {
        status: "ok",
        recorded: stats.recorded(),
        record_failures: stats.failed(),
    })
}

// =============================================================================
// Bounce Webhooks
// =============================================================================

/// Native bounce endpoint: `POST /webhooks/bounce`.
pub async fn native_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<DataResponse<bool>>, BounceError> {
    receive(&state, NATIVE_SERVICE, &headers, &body).await
}

/// Provider endpoint: `POST /webhooks/bounce/{service}`.
pub async fn provider_webhook(
    State(state): State<AppState>,
    Path(service): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<DataResponse<bool>>, BounceError> {
    receive(&state, &service, &headers, &body).await
}

async fn receive(
    state: &AppState,
    service: &str,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<Json<DataResponse<bool>>, BounceError> {
    info!(service = %service, body_length = body.len(), "bounce_webhook_received");

    match state.dispatcher.handle(service, headers, body).await {
        Ok(DispatchOutcome::Acknowledged(handshake)) => {
            info!(service = %service, kind = ?handshake.kind, topic = %handshake.topic, "bounce_webhook_handshake");
        }
        Ok(DispatchOutcome::Recorded(summary)) => {
            info!(
                service = %service,
                received = summary.received,
                recorded = summary.recorded,
                failed = summary.failed,
                "bounce_webhook_processed"
            );
        }
        Err(e) => {
            warn!(service = %service, code = e.code(), error = %e, "bounce_webhook_rejected");
            return Err(e);
        }
    }

    Ok(DataResponse::new(true))
}
