//! Scheduler tick (§4.4): scan due instances, reserve dispatch slots,
//! enqueue delivery messages, and advance `next_run_at`.

use chrono::{Timelike, Utc};

use crate::queue::broker::DelayedQueue;
use crate::queue::message::DispatchMessage;
use crate::queue::DISPATCH_QUEUE;
use crate::state::AppState;
use crate::store::slots::SlotSource;
use crate::time_util::{compute_next_run_at, to_iso8601};

pub async fn run_tick(state: &AppState) {
    let tick_start = Utc::now();
    let mut total_enqueued: u32 = 0;

    loop {
        if total_enqueued >= state.config.max_schedule_scan_per_tick {
            break;
        }

        let due = match state
            .store
            .due_instances(&to_iso8601(tick_start), state.config.schedule_batch_limit)
            .await
        {
            Ok(rows) => rows,
            Err(err) => {
                tracing::error!(error = %err, "failed to scan due instances");
                break;
            }
        };

        if due.is_empty() {
            break;
        }

        for instance in due {
            if total_enqueued >= state.config.max_schedule_scan_per_tick {
                break;
            }

            let slot = match state
                .store
                .reserve_slot(
                    tick_start,
                    SlotSource::Scheduled,
                    state.config.max_dispatch_per_minute,
                    state.config.max_slot_lookahead_minutes,
                )
                .await
            {
                Ok(Some(slot)) => slot,
                Ok(None) => continue,
                Err(err) => {
                    tracing::error!(error = %err, instance_id = %instance.instance_id, "slot reservation failed");
                    continue;
                }
            };

            let Some(site_url) = instance.site_url.clone() else {
                continue;
            };

            let delivery_id = format!("dlv_{}", uuid::Uuid::new_v4());
            let now = Utc::now();
            let scheduled_for = to_iso8601(slot.minute_start);
            let enqueued_at = to_iso8601(now);

            if let Err(err) = state
                .store
                .create_delivery(&delivery_id, &instance.instance_id, &scheduled_for, &enqueued_at)
                .await
            {
                tracing::error!(error = %err, "failed to persist delivery");
                continue;
            }

            let message = DispatchMessage {
                delivery_id: delivery_id.clone(),
                instance_id: instance.instance_id.clone(),
                site_id: instance.site_id.clone(),
                site_url,
                scheduled_for: scheduled_for.clone(),
                enqueued_at: enqueued_at.clone(),
                dispatch_attempt: 1,
            };

            let delay_seconds = ((slot.minute_start - now).num_milliseconds().max(0) as u64 + 999) / 1000;

            let enqueue_result = match serde_json::to_string(&message) {
                Ok(payload) => {
                    state
                        .broker
                        .enqueue(DISPATCH_QUEUE, payload, std::time::Duration::from_secs(delay_seconds))
                        .await
                }
                Err(err) => Err(crate::queue::broker::QueueError::SendFailed(err.to_string())),
            };

            if let Err(err) = enqueue_result {
                tracing::error!(error = %err, delivery_id = %delivery_id, "failed to enqueue dispatch message");
                let _ = state
                    .store
                    .mark_delivery_failed(&delivery_id, None, "QUEUE_SEND_FAILED", &err.to_string())
                    .await;
                let _ = state
                    .store
                    .mark_delivery_dead(&delivery_id, "QUEUE_SEND_FAILED", &err.to_string())
                    .await;
            }

            let next_run_at = to_iso8601(compute_next_run_at(instance.minute_of_day, tick_start));
            if let Err(err) = state
                .store
                .advance_next_run_at(&instance.instance_id, &next_run_at)
                .await
            {
                tracing::error!(error = %err, instance_id = %instance.instance_id, "failed to advance next_run_at");
            }

            total_enqueued += 1;
        }
    }

    if tick_start.minute() == 13 {
        crate::maintenance::run_maintenance(state).await;
    }
}
