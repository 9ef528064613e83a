//! Maintenance (§4.8): run once per tick whose UTC minute is 13.

use chrono::{Duration as ChronoDuration, Utc};

use crate::state::AppState;
use crate::time_util::to_iso8601;

pub async fn run_maintenance(state: &AppState) {
    let now = Utc::now();

    let raw_cutoff = to_iso8601(now - ChronoDuration::from_std(state.config.telemetry_raw_retention).unwrap_or_default());
    match state.store.prune_raw_telemetry_older_than(&raw_cutoff).await {
        Ok(count) => tracing::info!(count, "pruned raw telemetry samples"),
        Err(err) => tracing::error!(error = %err, "failed to prune raw telemetry"),
    }

    let hourly_cutoff = to_iso8601(
        now - ChronoDuration::from_std(state.config.telemetry_hourly_retention).unwrap_or_default(),
    );
    match state
        .store
        .prune_hourly_aggregates_older_than(&hourly_cutoff)
        .await
    {
        Ok(count) => tracing::info!(count, "pruned hourly telemetry aggregates"),
        Err(err) => tracing::error!(error = %err, "failed to prune hourly aggregates"),
    }

    let build_event_cutoff =
        to_iso8601(now - ChronoDuration::from_std(state.config.build_event_retention).unwrap_or_default());
    match state.store.prune_build_events_older_than(&build_event_cutoff).await {
        Ok(count) => tracing::info!(count, "pruned build events"),
        Err(err) => tracing::error!(error = %err, "failed to prune build events"),
    }

    let rollup_since = to_iso8601(now - ChronoDuration::hours(2));
    match state.store.recompute_hourly_aggregates_since(&rollup_since).await {
        Ok(count) => tracing::info!(count, "recomputed hourly telemetry aggregates"),
        Err(err) => tracing::error!(error = %err, "failed to recompute hourly aggregates"),
    }

    let minute_load_cutoff =
        to_iso8601(now - ChronoDuration::from_std(state.config.minute_load_retention).unwrap_or_default());
    match state.store.prune_minute_loads_older_than(&minute_load_cutoff).await {
        Ok(count) => tracing::info!(count, "pruned dispatch minute load rows"),
        Err(err) => tracing::error!(error = %err, "failed to prune dispatch minute load"),
    }
}
