//! HTTP surface (§6): the registration API plus liveness and JWKS routes,
//! all wired through a single `ApiEnvelope`/`AppError` response contract.

pub mod deregister;
pub mod envelope;
pub mod health;
pub mod jwks_route;
pub mod request_guard;
pub mod status;
pub mod sync;
pub mod url_normalize;

use std::sync::Arc;

use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::Router;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

async fn not_found() -> StatusCode {
    StatusCode::NOT_FOUND
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(health::root_handler))
        .route("/v1/health", get(health::health_handler))
        .route("/.well-known/jwks.json", get(jwks_route::jwks_handler))
        .route("/v1/instances/sync", post(sync::sync_handler))
        .route("/v1/instances/deregister", post(deregister::deregister_handler))
        .route("/v1/instances/status", post(status::status_handler))
        .fallback(not_found)
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
