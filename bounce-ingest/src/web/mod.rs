//! HTTP surface: bounce webhooks, administrative endpoints and health.
//!
//! ## Routes
//!
//! ```text
//! POST   /webhooks/bounce                  native submissions
//! POST   /webhooks/bounce/{service}        provider webhooks
//! GET    /api/bounces                      paginated listing
//! GET    /api/bounces/{id}
//! DELETE /api/bounces                      ?id=..&id=.. or ?all=true
//! DELETE /api/bounces/{id}
//! GET    /api/subscribers/{uuid}/bounces
//! GET    /health
//! ```
//!
//! The `/api` routes require the `X-Admin-Auth` header and are not mounted
//! when no admin token is configured.

pub mod admin;
pub mod handlers;

use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::providers::signature::is_secret_configured;

pub use handlers::{health, native_webhook, provider_webhook, AppState, DataResponse, HealthResponse};

/// Build the application router.
pub fn build_router(state: AppState) -> Router {
    let webhooks = Router::new()
        .route("/webhooks/bounce", post(native_webhook))
        .route("/webhooks/bounce/:service", post(provider_webhook))
        .layer(DefaultBodyLimit::max(state.config.max_body_bytes));

    let mut router = Router::new()
        .route("/health", get(health))
        .merge(webhooks);

    if is_secret_configured(&state.config.admin_token) {
        let admin = Router::new()
            .route(
                "/api/bounces",
                get(admin::list_bounces).delete(admin::delete_bounces),
            )
            .route(
                "/api/bounces/:id",
                get(admin::get_bounce).delete(admin::delete_bounce),
            )
            .route(
                "/api/subscribers/:uuid/bounces",
                get(admin::subscriber_bounces),
            )
            .route_layer(middleware::from_fn_with_state(
                state.clone(),
                admin::require_admin_token,
            ));
        router = router.merge(admin);
    } else {
        warn!("admin_api_disabled_missing_token");
    }

    router.layer(TraceLayer::new_for_http()).with_state(state)
}
