//! Build-event idempotence (§3, §4.3): one row per `(instance_id,
//! idempotency_key)`, duplicates silently ignored.

use chrono::Utc;

use super::Store;

impl Store {
    /// Returns `true` if a new row was inserted, `false` if it already existed.
    pub async fn insert_build_event_if_absent(
        &self,
        instance_id: &str,
        idempotency_key: &str,
    ) -> Result<bool, sqlx::Error> {
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(
            "INSERT INTO build_events (instance_id, idempotency_key, created_at) \
             VALUES (?, ?, ?) ON CONFLICT (instance_id, idempotency_key) DO NOTHING",
        )
        .bind(instance_id)
        .bind(idempotency_key)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn prune_build_events_older_than(&self, cutoff: &str) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM build_events WHERE created_at < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
