//! `POST /v1/instances/deregister` (§4.3).

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::envelope::ApiEnvelope;
use super::request_guard::guard_signed_request;
use crate::error::{AppError, AppResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
struct DeregisterRequest {
    #[serde(rename = "siteId")]
    site_id: String,
    reason: Option<String>,
    #[serde(rename = "requestedAt")]
    #[allow(dead_code)]
    requested_at: Option<String>,
}

#[derive(Debug, Serialize)]
struct DeregisterResponse {
    #[serde(rename = "instanceId")]
    instance_id: String,
    status: String,
    #[serde(rename = "pendingReason")]
    pending_reason: Option<String>,
}

pub async fn deregister_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Value>,
) -> AppResult<ApiEnvelope<DeregisterResponse>> {
    let request: DeregisterRequest = serde_json::from_value(body.clone())
        .map_err(|e| AppError::BadRequest(format!("malformed deregister request: {e}")))?;

    let existing = state
        .store
        .find_instance_by_site_id(&request.site_id)
        .await?
        .ok_or(AppError::InstanceNotFound)?;

    guard_signed_request(
        &state.config,
        "POST",
        "/v1/instances/deregister",
        &body,
        &existing.site_pub_key,
    )?;

    let updated = state
        .store
        .deregister_instance(&request.site_id, request.reason.as_deref())
        .await?
        .ok_or(AppError::InstanceNotFound)?;

    Ok(ApiEnvelope::ok(DeregisterResponse {
        instance_id: updated.instance_id,
        status: updated.status.as_str().to_string(),
        pending_reason: updated.pending_reason,
    }))
}
