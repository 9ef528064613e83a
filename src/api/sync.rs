//! `POST /v1/instances/sync` (§4.3).

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::envelope::ApiEnvelope;
use super::request_guard::guard_signed_request;
use super::url_normalize::normalize_site_url;
use crate::error::{AppError, AppResult};
use crate::state::AppState;
use crate::store::instances::SyncInput;

#[derive(Debug, Deserialize)]
struct SyncRequest {
    #[serde(rename = "siteId")]
    site_id: String,
    #[serde(rename = "sitePubKey")]
    site_pub_key: String,
    #[serde(rename = "siteKeyAlg")]
    site_key_alg: String,
    #[serde(rename = "siteUrl")]
    site_url: Option<String>,
    #[serde(rename = "appVersion")]
    app_version: Option<String>,
    #[serde(rename = "buildId")]
    build_id: Option<String>,
    commit: Option<String>,
    #[serde(rename = "builtAt")]
    built_at: Option<String>,
    #[serde(rename = "idempotencyKey")]
    idempotency_key: Option<String>,
    /// Parsed (so it participates in signature verification as part of the
    /// canonical payload) but intentionally never consulted by the upsert
    /// logic — see the Open Question resolution in DESIGN.md.
    #[serde(rename = "minuteOfDay")]
    #[allow(dead_code)]
    minute_of_day: Option<u32>,
}

#[derive(Debug, Serialize)]
struct SyncResponse {
    #[serde(rename = "instanceId")]
    instance_id: String,
    status: String,
    #[serde(rename = "pendingReason")]
    pending_reason: Option<String>,
    #[serde(rename = "minuteOfDay")]
    minute_of_day: u32,
    #[serde(rename = "nextRunAt")]
    next_run_at: Option<String>,
    #[serde(rename = "cloudActiveKid")]
    cloud_active_kid: Option<String>,
    #[serde(rename = "syncedAt")]
    synced_at: String,
}

pub async fn sync_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Value>,
) -> AppResult<ApiEnvelope<SyncResponse>> {
    let request: SyncRequest = serde_json::from_value(body.clone())
        .map_err(|e| AppError::BadRequest(format!("malformed sync request: {e}")))?;

    if request.site_id.trim().is_empty() {
        return Err(AppError::BadRequest("siteId is required".to_string()));
    }

    let existing = state.store.find_instance_by_site_id(&request.site_id).await?;
    let verifying_material = existing
        .as_ref()
        .map(|i| i.site_pub_key.clone())
        .unwrap_or_else(|| request.site_pub_key.clone());

    guard_signed_request(
        &state.config,
        "POST",
        "/v1/instances/sync",
        &body,
        &verifying_material,
    )?;

    let normalized = normalize_site_url(request.site_url.as_deref());

    let idempotency_key = request.idempotency_key.clone().unwrap_or_else(|| {
        format!(
            "{}:{}:{}",
            request.site_id,
            request.build_id.as_deref().unwrap_or("no-build-id"),
            request.built_at.as_deref().unwrap_or("")
        )
    });

    let instance = state
        .store
        .upsert_instance_sync(SyncInput {
            site_id: &request.site_id,
            submitted_pub_key: &request.site_pub_key,
            submitted_key_alg: &request.site_key_alg,
            normalized_url: normalized.url.as_deref(),
            pending_reason: normalized.pending_reason,
            app_version: request.app_version.as_deref(),
            build_id: request.build_id.as_deref(),
            commit: request.commit.as_deref(),
            built_at: request.built_at.as_deref(),
        })
        .await?;

    state
        .store
        .insert_build_event_if_absent(&instance.instance_id, &idempotency_key)
        .await?;

    let synced_at = chrono::Utc::now().to_rfc3339();

    Ok(ApiEnvelope::ok(SyncResponse {
        instance_id: instance.instance_id,
        status: instance.status.as_str().to_string(),
        pending_reason: instance.pending_reason,
        minute_of_day: instance.minute_of_day,
        next_run_at: instance.next_run_at,
        cloud_active_kid: state.config.cloud_active_kid.clone(),
        synced_at,
    }))
}
