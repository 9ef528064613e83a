//! Queue consumer (§4.5.1, §4.5.3): drains the main dispatch queue and the
//! dead-letter queue, driving each delivery's state machine via explicit
//! re-enqueue rather than the broker's native retry.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use super::broker::DelayedQueue;
use super::message::DispatchMessage;
use super::{DISPATCH_DLQ_QUEUE, DISPATCH_QUEUE};
use crate::state::AppState;
use crate::store::slots::SlotSource;
use crate::time_util::to_iso8601;

/// `backoffMs = min(30 · 2^(attemptNo-1), 900) · 1000` (§4.5.1), expressed in
/// whole seconds.
fn backoff_seconds(attempt_no: u32) -> u64 {
    let scaled = 30u64.saturating_mul(1u64 << attempt_no.saturating_sub(1).min(62));
    scaled.min(900)
}

pub async fn run_main_consumer(state: Arc<AppState>) {
    loop {
        let Some(raw) = state.broker.dequeue(DISPATCH_QUEUE).await else {
            break;
        };
        handle_main_message(&state, raw).await;
    }
}

pub async fn run_dlq_consumer(state: Arc<AppState>) {
    loop {
        let Some(raw) = state.broker.dequeue(DISPATCH_DLQ_QUEUE).await else {
            break;
        };
        handle_dlq_message(&state, raw).await;
    }
}

async fn handle_main_message(state: &AppState, raw: String) {
    let message: DispatchMessage = match serde_json::from_str(&raw) {
        Ok(message) => message,
        Err(err) => {
            tracing::warn!(error = %err, "dropping malformed dispatch message");
            return;
        }
    };

    if message.dispatch_attempt == 0 {
        tracing::warn!(delivery_id = %message.delivery_id, "dropping dispatch message with dispatchAttempt 0");
        return;
    }

    let outcome = super::dispatch::dispatch(state, &message, message.dispatch_attempt).await;

    match outcome {
        super::dispatch::DispatchOutcome::Success | super::dispatch::DispatchOutcome::Drop => {}
        super::dispatch::DispatchOutcome::Retry => handle_retry(state, message).await,
    }
}

async fn handle_retry(state: &AppState, message: DispatchMessage) {
    if message.dispatch_attempt >= state.config.max_retry_attempts {
        let _ = state
            .store
            .mark_delivery_dead(&message.delivery_id, "MAX_ATTEMPTS_EXCEEDED", "max retry attempts exceeded")
            .await;
        return;
    }

    let backoff = Duration::from_secs(backoff_seconds(message.dispatch_attempt));
    let preferred_at = Utc::now() + chrono::Duration::from_std(backoff).unwrap_or_default();

    let reserved = state
        .store
        .reserve_slot(
            preferred_at,
            SlotSource::Retry,
            state.config.max_dispatch_per_minute,
            state.config.max_slot_lookahead_minutes,
        )
        .await;

    let slot = match reserved {
        Ok(Some(slot)) => slot,
        _ => {
            let _ = state
                .store
                .mark_delivery_dead(&message.delivery_id, "RETRY_SCHEDULE_FAILED", "no retry slot available")
                .await;
            return;
        }
    };

    let now = Utc::now();
    let delay_seconds = ((slot.minute_start - now).num_milliseconds().max(0) as u64 + 999) / 1000;

    let next_message = DispatchMessage {
        dispatch_attempt: message.dispatch_attempt + 1,
        enqueued_at: to_iso8601(now),
        ..message
    };

    let payload = match serde_json::to_string(&next_message) {
        Ok(payload) => payload,
        Err(err) => {
            tracing::error!(error = %err, "failed to serialize retry dispatch message");
            let _ = state
                .store
                .mark_delivery_dead(&next_message.delivery_id, "RETRY_SCHEDULE_FAILED", "failed to serialize retry message")
                .await;
            return;
        }
    };

    if let Err(err) = state
        .broker
        .enqueue(DISPATCH_QUEUE, payload, Duration::from_secs(delay_seconds))
        .await
    {
        tracing::error!(error = %err, "failed to re-enqueue retry dispatch message");
        let _ = state
            .store
            .mark_delivery_dead(&next_message.delivery_id, "RETRY_SCHEDULE_FAILED", &err.to_string())
            .await;
    }
}

async fn handle_dlq_message(state: &AppState, raw: String) {
    let message: DispatchMessage = match serde_json::from_str(&raw) {
        Ok(message) => message,
        Err(_) => return,
    };
    let _ = state
        .store
        .mark_delivery_dead(&message.delivery_id, "DLQ_REACHED", "dead-lettered")
        .await;
}
