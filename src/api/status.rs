//! `POST /v1/instances/status` (§4.3): read-only projection of instance
//! fields.

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
struct StatusRequest {
    #[serde(rename = "siteId")]
    site_id: String,
    #[serde(rename = "requestedAt")]
    #[allow(dead_code)]
    requested_at: Option<String>,
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    #[serde(rename = "instanceId")]
    instance_id: String,
    #[serde(rename = "siteId")]
    site_id: String,
    #[serde(rename = "siteUrl")]
    site_url: Option<String>,
    status: String,
    #[serde(rename = "pendingReason")]
    pending_reason: Option<String>,
    #[serde(rename = "minuteOfDay")]
    minute_of_day: u32,
    #[serde(rename = "nextRunAt")]
    next_run_at: Option<String>,
    #[serde(rename = "lastSeenAt")]
    last_seen_at: Option<String>,
    #[serde(rename = "lastSuccessAt")]
    last_success_at: Option<String>,
    #[serde(rename = "appVersion")]
    app_version: Option<String>,
    #[serde(rename = "buildId")]
    build_id: Option<String>,
    commit: Option<String>,
    #[serde(rename = "builtAt")]
    built_at: Option<String>,
}

pub async fn status_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Value>,
) -> AppResult<ApiEnvelope<StatusResponse>> {
    let request: StatusRequest = serde_json::from_value(body.clone())
        .map_err(|e| AppError::BadRequest(format!("malformed status request: {e}")))?;

    let instance = state
        .store
        .find_instance_by_site_id(&request.site_id)
        .await?
        .ok_or(AppError::InstanceNotFound)?;

    guard_signed_request(
        &state.config,
        "POST",
        "/v1/instances/status",
        &body,
        &instance.site_pub_key,
    )?;

    Ok(ApiEnvelope::ok(StatusResponse {
        instance_id: instance.instance_id,
        site_id: instance.site_id,
        site_url: instance.site_url,
        status: instance.status.as_str().to_string(),
        pending_reason: instance.pending_reason,
        minute_of_day: instance.minute_of_day,
        next_run_at: instance.next_run_at,
        last_seen_at: instance.last_seen_at,
        last_success_at: instance.last_success_at,
        app_version: instance.app_version,
        build_id: instance.build_id,
        commit: instance.commit,
        built_at: instance.built_at,
    }))
}
