//! `GET /.well-known/jwks.json` (§4.1, §6).

use std::sync::Arc;

use axum::extract::State;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::crypto::jwks::validate_jwks;
use crate::error::AppError;
use crate::state::AppState;

pub async fn jwks_handler(State(state): State<Arc<AppState>>) -> Result<Response, AppError> {
    let value = validate_jwks(&state.config.cloud_jwks_json)
        .map_err(|e| AppError::JwksParseError(e.to_string()))?;

    let mut response = Json(value).into_response();
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        header::HeaderValue::from_static("public, max-age=300"),
    );
    Ok(response)
}
