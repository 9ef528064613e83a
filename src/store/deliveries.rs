//! Delivery + DeliveryAttempt persistence (§3, §4.4, §4.5).

use chrono::Utc;
use sqlx::Row;

use super::models::{Delivery, DeliveryStatus};
use super::Store;
use crate::time_util::to_iso8601;

const MAX_ERROR_MESSAGE_LEN: usize = 500;

fn truncate_error_message(message: &str) -> String {
    match message.char_indices().nth(MAX_ERROR_MESSAGE_LEN) {
        Some((byte_idx, _)) => message[..byte_idx].to_string(),
        None => message.to_string(),
    }
}

fn row_to_delivery(row: &sqlx::sqlite::SqliteRow) -> Delivery {
    let status: String = row.get("status");
    Delivery {
        id: row.get("id"),
        instance_id: row.get("instance_id"),
        scheduled_for: row.get("scheduled_for"),
        enqueued_at: row.get("enqueued_at"),
        status: DeliveryStatus::from_str(&status).unwrap_or(DeliveryStatus::Queued),
        attempt_count: row.get::<i64, _>("attempt_count") as u32,
        response_status: row.get("response_status"),
        accepted: row.get::<Option<i64>, _>("accepted").map(|v| v != 0),
        dedup_hit: row.get::<Option<i64>, _>("dedup_hit").map(|v| v != 0),
        last_error_code: row.get("last_error_code"),
        last_error_message: row.get("last_error_message"),
        completed_at: row.get("completed_at"),
    }
}

impl Store {
    pub async fn create_delivery(
        &self,
        id: &str,
        instance_id: &str,
        scheduled_for: &str,
        enqueued_at: &str,
    ) -> Result<Delivery, sqlx::Error> {
        sqlx::query(
            "INSERT INTO deliveries (id, instance_id, scheduled_for, enqueued_at, status, attempt_count) \
             VALUES (?, ?, ?, ?, 'queued', 0)",
        )
        .bind(id)
        .bind(instance_id)
        .bind(scheduled_for)
        .bind(enqueued_at)
        .execute(&self.pool)
        .await?;

        self.find_delivery(id)
            .await
            .map(|d| d.expect("delivery just inserted must exist"))
    }

    pub async fn find_delivery(&self, id: &str) -> Result<Option<Delivery>, sqlx::Error> {
        let row = sqlx::query("SELECT * FROM deliveries WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(row_to_delivery))
    }

    /// Append-only attempt row; never mutated once written.
    pub async fn record_attempt(
        &self,
        delivery_id: &str,
        attempt_no: u32,
        started_at: &str,
        ended_at: &str,
        http_status: Option<i32>,
        timed_out: bool,
        error_code: Option<&str>,
        error_message: Option<&str>,
    ) -> Result<(), sqlx::Error> {
        let truncated = error_message.map(truncate_error_message);
        sqlx::query(
            "INSERT INTO delivery_attempts \
             (delivery_id, attempt_no, started_at, ended_at, http_status, timed_out, error_code, error_message) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(delivery_id)
        .bind(attempt_no as i64)
        .bind(started_at)
        .bind(ended_at)
        .bind(http_status)
        .bind(timed_out as i64)
        .bind(error_code)
        .bind(&truncated)
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "UPDATE deliveries SET attempt_count = MAX(attempt_count, ?) WHERE id = ?",
        )
        .bind(attempt_no as i64)
        .bind(delivery_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn mark_delivery_delivered(
        &self,
        delivery_id: &str,
        response_status: i32,
        accepted: bool,
        dedup_hit: bool,
    ) -> Result<(), sqlx::Error> {
        let now = to_iso8601(Utc::now());
        sqlx::query(
            "UPDATE deliveries SET status = 'delivered', response_status = ?, accepted = ?, \
             dedup_hit = ?, completed_at = ?, last_error_code = NULL, last_error_message = NULL \
             WHERE id = ?",
        )
        .bind(response_status)
        .bind(accepted as i64)
        .bind(dedup_hit as i64)
        .bind(&now)
        .bind(delivery_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Retryable failure — no `completed_at`.
    pub async fn mark_delivery_failed(
        &self,
        delivery_id: &str,
        response_status: Option<i32>,
        error_code: &str,
        error_message: &str,
    ) -> Result<(), sqlx::Error> {
        let truncated = truncate_error_message(error_message);
        sqlx::query(
            "UPDATE deliveries SET status = 'failed', response_status = ?, \
             last_error_code = ?, last_error_message = ? WHERE id = ?",
        )
        .bind(response_status)
        .bind(error_code)
        .bind(&truncated)
        .bind(delivery_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Terminal failure.
    pub async fn mark_delivery_dead(
        &self,
        delivery_id: &str,
        error_code: &str,
        error_message: &str,
    ) -> Result<(), sqlx::Error> {
        let truncated = truncate_error_message(error_message);
        let now = to_iso8601(Utc::now());
        sqlx::query(
            "UPDATE deliveries SET status = 'dead', last_error_code = ?, last_error_message = ?, \
             completed_at = ? WHERE id = ?",
        )
        .bind(error_code)
        .bind(&truncated)
        .bind(&now)
        .bind(delivery_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
