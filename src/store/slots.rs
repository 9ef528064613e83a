//! Slot reservation (§4.2): atomic per-minute dispatch quota with
//! look-ahead spill. Grounded on the `INSERT ... ON CONFLICT ... DO UPDATE
//! ... WHERE ... RETURNING` idiom in `other_examples/.../dead_letter.rs`,
//! generalized to the `WHERE existing.total_count < max_per_minute` guard.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use sqlx::Row;

use super::models::DispatchMinuteLoad;
use super::Store;
use crate::time_util::floor_to_minute;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotSource {
    Scheduled,
    Retry,
}

#[derive(Debug, Clone)]
pub struct ReservedSlot {
    pub minute_start: DateTime<Utc>,
    pub load: DispatchMinuteLoad,
    pub offset_minutes: u32,
}

fn row_to_load(row: &sqlx::sqlite::SqliteRow) -> DispatchMinuteLoad {
    DispatchMinuteLoad {
        minute_start: row.get("minute_start"),
        scheduled_count: row.get::<i64, _>("scheduled_count") as u32,
        retry_count: row.get::<i64, _>("retry_count") as u32,
        total_count: row.get::<i64, _>("total_count") as u32,
    }
}

impl Store {
    async fn try_reserve_minute(
        &self,
        minute_start: &str,
        scheduled_inc: u32,
        retry_inc: u32,
        max_per_minute: u32,
        now: &str,
    ) -> Result<Option<DispatchMinuteLoad>, sqlx::Error> {
        let total_inc = scheduled_inc + retry_inc;
        let row = sqlx::query(
            "INSERT INTO dispatch_minute_load \
             (minute_start, scheduled_count, retry_count, total_count, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?) \
             ON CONFLICT(minute_start) DO UPDATE SET \
               scheduled_count = dispatch_minute_load.scheduled_count + excluded.scheduled_count, \
               retry_count = dispatch_minute_load.retry_count + excluded.retry_count, \
               total_count = dispatch_minute_load.total_count + excluded.total_count, \
               updated_at = excluded.updated_at \
             WHERE dispatch_minute_load.total_count < ? \
             RETURNING *",
        )
        .bind(minute_start)
        .bind(scheduled_inc as i64)
        .bind(retry_inc as i64)
        .bind(total_inc as i64)
        .bind(now)
        .bind(now)
        .bind(max_per_minute as i64)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(row_to_load))
    }

    /// Walk forward from `floor_to_minute(preferred_at)` up to
    /// `lookahead_minutes`, returning the first minute whose reservation
    /// succeeds, or `None` if the whole window is full.
    pub async fn reserve_slot(
        &self,
        preferred_at: DateTime<Utc>,
        source: SlotSource,
        max_per_minute: u32,
        lookahead_minutes: u32,
    ) -> Result<Option<ReservedSlot>, sqlx::Error> {
        let (scheduled_inc, retry_inc) = match source {
            SlotSource::Scheduled => (1, 0),
            SlotSource::Retry => (0, 1),
        };
        let base = floor_to_minute(preferred_at);
        let now = Utc::now().to_rfc3339();

        for offset in 0..=lookahead_minutes {
            let candidate = base + ChronoDuration::minutes(offset as i64);
            let minute_start = candidate.to_rfc3339();
            if let Some(load) = self
                .try_reserve_minute(&minute_start, scheduled_inc, retry_inc, max_per_minute, &now)
                .await?
            {
                return Ok(Some(ReservedSlot {
                    minute_start: candidate,
                    load,
                    offset_minutes: offset,
                }));
            }
        }
        Ok(None)
    }

    pub async fn prune_minute_loads_older_than(&self, cutoff: &str) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM dispatch_minute_load WHERE minute_start < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    async fn temp_store() -> (Store, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");
        let url = format!("sqlite://{}", path.to_string_lossy());
        (Store::connect(&url).await.unwrap(), dir)
    }

    #[tokio::test]
    async fn nth_plus_one_reservation_spills_to_next_minute() {
        let (store, _dir) = temp_store().await;
        let at = Utc.with_ymd_and_hms(2026, 7, 27, 12, 0, 0).unwrap();
        let max_per_minute = 2;

        let first = store
            .reserve_slot(at, SlotSource::Scheduled, max_per_minute, 5)
            .await
            .unwrap()
            .unwrap();
        let second = store
            .reserve_slot(at, SlotSource::Scheduled, max_per_minute, 5)
            .await
            .unwrap()
            .unwrap();
        let third = store
            .reserve_slot(at, SlotSource::Scheduled, max_per_minute, 5)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(first.offset_minutes, 0);
        assert_eq!(second.offset_minutes, 0);
        assert_eq!(third.offset_minutes, 1);
        assert_eq!(third.load.total_count, 1);
    }

    #[tokio::test]
    async fn total_count_tracks_scheduled_plus_retry() {
        let (store, _dir) = temp_store().await;
        let at = Utc.with_ymd_and_hms(2026, 7, 27, 9, 30, 0).unwrap();

        store
            .reserve_slot(at, SlotSource::Scheduled, 10, 0)
            .await
            .unwrap()
            .unwrap();
        let slot = store
            .reserve_slot(at, SlotSource::Retry, 10, 0)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(slot.load.scheduled_count, 1);
        assert_eq!(slot.load.retry_count, 1);
        assert_eq!(slot.load.total_count, 2);
    }

    #[tokio::test]
    async fn fully_exhausted_window_returns_none() {
        let (store, _dir) = temp_store().await;
        let at = Utc.with_ymd_and_hms(2026, 7, 27, 10, 0, 0).unwrap();

        for _ in 0..2 {
            store
                .reserve_slot(at, SlotSource::Scheduled, 1, 1)
                .await
                .unwrap();
        }

        let result = store
            .reserve_slot(at, SlotSource::Scheduled, 1, 1)
            .await
            .unwrap();
        assert!(result.is_none());
    }
}
