//! `dispatch()` (§4.5.2): call one instance, classify the result, record the
//! attempt, and drive the delivery state machine. Grounded on
//! `svix-server/src/worker.rs`'s "load fresh state, attempt under a timeout,
//! always record an attempt row" shape.

use chrono::Utc;
use serde_json::json;

use super::message::DispatchMessage;
use crate::state::AppState;
use crate::store::models::InstanceStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Success,
    Retry,
    Drop,
}

fn join_url(site_url: &str, path: &str) -> String {
    format!("{}{}", site_url.trim_end_matches('/'), path)
}

pub async fn dispatch(state: &AppState, message: &DispatchMessage, attempt_no: u32) -> DispatchOutcome {
    let started_at = Utc::now().to_rfc3339();

    let instance = match state.store.find_instance_by_id(&message.instance_id).await {
        Ok(Some(instance)) => instance,
        Ok(None) => {
            record_terminal(state, message, attempt_no, &started_at, "INSTANCE_NOT_ACTIVE", "instance not found").await;
            return DispatchOutcome::Drop;
        }
        Err(err) => {
            record_terminal(state, message, attempt_no, &started_at, "INSTANCE_NOT_ACTIVE", &err.to_string()).await;
            return DispatchOutcome::Drop;
        }
    };

    if instance.status != InstanceStatus::Active || instance.site_url.is_none() {
        record_terminal(
            state,
            message,
            attempt_no,
            &started_at,
            "INSTANCE_NOT_ACTIVE",
            "instance is not active or has no site_url",
        )
        .await;
        return DispatchOutcome::Drop;
    }

    let kid = match &state.config.cloud_active_kid {
        Some(kid) => kid.clone(),
        None => {
            record_retryable(state, message, attempt_no, &started_at, None, "TOKEN_SIGN_FAILED", "no active signing kid configured").await;
            return DispatchOutcome::Retry;
        }
    };

    let token = match state
        .token_issuer
        .mint(&kid, &message.site_id, &message.delivery_id)
    {
        Ok(token) => token,
        Err(err) => {
            record_retryable(state, message, attempt_no, &started_at, None, "TOKEN_SIGN_FAILED", &err.to_string()).await;
            return DispatchOutcome::Retry;
        }
    };

    let url = join_url(&message.site_url, &state.config.instance_trigger_path);
    let body = json!({
        "deliveryId": message.delivery_id,
        "siteId": message.site_id,
        "triggerType": "CLOUD",
        "requestedAt": started_at,
    });

    let response = state
        .http_client
        .post(&url)
        .bearer_auth(&token)
        .header("content-type", "application/json")
        .header("x-np-delivery-id", &message.delivery_id)
        .header("x-np-site-id", &message.site_id)
        .json(&body)
        .send()
        .await;

    let ended_at = Utc::now().to_rfc3339();

    match response {
        Ok(response) => {
            let status = response.status();
            let raw_text = response.text().await.unwrap_or_default();
            let parsed_body: serde_json::Value =
                serde_json::from_str(&raw_text).unwrap_or(serde_json::Value::Null);

            let telemetry = crate::telemetry::parser::parse_telemetry(
                &parsed_body,
                &raw_text,
                &ended_at,
                state.config.telemetry_raw_max_bytes,
            );

            let _ = state
                .store
                .record_attempt(
                    &message.delivery_id,
                    attempt_no,
                    &started_at,
                    &ended_at,
                    Some(status.as_u16() as i32),
                    false,
                    None,
                    None,
                )
                .await;

            if status.is_success() && telemetry.accepted {
                let _ = state
                    .store
                    .mark_delivery_delivered(&message.delivery_id, status.as_u16() as i32, true, telemetry.dedup_hit)
                    .await;
                let _ = state
                    .store
                    .insert_telemetry_sample(&message.delivery_id, &message.instance_id, &telemetry)
                    .await;
                let _ = state.store.mark_last_success(&message.instance_id, &ended_at).await;
                DispatchOutcome::Success
            } else {
                let error_message = format!("HTTP {}, accepted={}", status.as_u16(), telemetry.accepted);
                let _ = state
                    .store
                    .mark_delivery_failed(
                        &message.delivery_id,
                        Some(status.as_u16() as i32),
                        "UNACCEPTED_RESPONSE",
                        &error_message,
                    )
                    .await;
                DispatchOutcome::Retry
            }
        }
        Err(err) => {
            let (error_code, timed_out) = if err.is_timeout() {
                ("REQUEST_TIMEOUT", true)
            } else {
                ("REQUEST_FAILED", false)
            };
            record_retryable_timed(state, message, attempt_no, &started_at, &ended_at, timed_out, error_code, &err.to_string()).await;
            DispatchOutcome::Retry
        }
    }
}

async fn record_terminal(
    state: &AppState,
    message: &DispatchMessage,
    attempt_no: u32,
    started_at: &str,
    error_code: &str,
    error_message: &str,
) {
    let ended_at = Utc::now().to_rfc3339();
    let _ = state
        .store
        .record_attempt(&message.delivery_id, attempt_no, started_at, &ended_at, None, false, Some(error_code), Some(error_message))
        .await;
    let _ = state.store.mark_delivery_dead(&message.delivery_id, error_code, error_message).await;
}

async fn record_retryable(
    state: &AppState,
    message: &DispatchMessage,
    attempt_no: u32,
    started_at: &str,
    http_status: Option<i32>,
    error_code: &str,
    error_message: &str,
) {
    let ended_at = Utc::now().to_rfc3339();
    record_retryable_timed(state, message, attempt_no, started_at, &ended_at, false, error_code, error_message).await;
    let _ = http_status;
}

async fn record_retryable_timed(
    state: &AppState,
    message: &DispatchMessage,
    attempt_no: u32,
    started_at: &str,
    ended_at: &str,
    timed_out: bool,
    error_code: &str,
    error_message: &str,
) {
    let _ = state
        .store
        .record_attempt(&message.delivery_id, attempt_no, started_at, ended_at, None, timed_out, Some(error_code), Some(error_message))
        .await;
    let _ = state
        .store
        .mark_delivery_failed(&message.delivery_id, None, error_code, error_message)
        .await;
}
