//! Telemetry sample storage, hourly rollups, and maintenance pruning
//! (§3, §4.7, §4.8).

use super::Store;
use crate::telemetry::parser::ParsedTelemetry;

impl Store {
    /// `ON CONFLICT DO NOTHING` makes re-delivery of a repeated telemetry
    /// payload a no-op, keyed on `delivery_id`.
    pub async fn insert_telemetry_sample(
        &self,
        delivery_id: &str,
        instance_id: &str,
        sample: &ParsedTelemetry,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO telemetry_samples \
             (delivery_id, instance_id, schema_ver, accepted, dedup_hit, collected_at, verify_ms, raw_json) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(delivery_id) DO NOTHING",
        )
        .bind(delivery_id)
        .bind(instance_id)
        .bind(&sample.schema_ver)
        .bind(sample.accepted as i64)
        .bind(sample.dedup_hit as i64)
        .bind(&sample.collected_at)
        .bind(sample.verify_ms)
        .bind(&sample.raw_json)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn prune_raw_telemetry_older_than(&self, cutoff: &str) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM telemetry_samples WHERE collected_at < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn prune_hourly_aggregates_older_than(
        &self,
        cutoff_bucket_hour: &str,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM telemetry_hourly WHERE bucket_hour < ?")
            .bind(cutoff_bucket_hour)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Rebuild `telemetry_hourly` from raw samples collected since `since`,
    /// grouped by `(instance_id, strftime('%Y-%m-%dT%H:00:00Z', collected_at))`.
    pub async fn recompute_hourly_aggregates_since(&self, since: &str) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "INSERT INTO telemetry_hourly \
             (instance_id, bucket_hour, sample_count, accepted_count, dedup_count, avg_verify_ms, max_verify_ms) \
             SELECT \
               instance_id, \
               strftime('%Y-%m-%dT%H:00:00Z', collected_at) AS bucket_hour, \
               COUNT(*), \
               SUM(accepted), \
               SUM(dedup_hit), \
               AVG(verify_ms), \
               MAX(verify_ms) \
             FROM telemetry_samples \
             WHERE collected_at >= ? \
             GROUP BY instance_id, bucket_hour \
             ON CONFLICT(instance_id, bucket_hour) DO UPDATE SET \
               sample_count = excluded.sample_count, \
               accepted_count = excluded.accepted_count, \
               dedup_count = excluded.dedup_count, \
               avg_verify_ms = excluded.avg_verify_ms, \
               max_verify_ms = excluded.max_verify_ms",
        )
        .bind(since)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::parser::ParsedTelemetry;

    async fn temp_store() -> (Store, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");
        let url = format!("sqlite://{}", path.to_string_lossy());
        (Store::connect(&url).await.unwrap(), dir)
    }

    fn sample() -> ParsedTelemetry {
        ParsedTelemetry {
            accepted: true,
            dedup_hit: false,
            schema_ver: "1".to_string(),
            collected_at: "2026-07-27T00:00:00Z".to_string(),
            verify_ms: Some(12),
            raw_json: "{}".to_string(),
        }
    }

    #[tokio::test]
    async fn repeated_telemetry_insert_is_a_no_op() {
        let (store, _dir) = temp_store().await;
        store
            .insert_telemetry_sample("d1", "inst-1", &sample())
            .await
            .unwrap();
        store
            .insert_telemetry_sample("d1", "inst-1", &sample())
            .await
            .unwrap();

        let row: (i64,) = sqlx::query_as("SELECT count(*) FROM telemetry_samples")
            .fetch_one(&store.pool)
            .await
            .unwrap();
        assert_eq!(row.0, 1);
    }

    #[tokio::test]
    async fn hourly_rollup_aggregates_raw_samples() {
        let (store, _dir) = temp_store().await;
        store
            .insert_telemetry_sample("d1", "inst-1", &sample())
            .await
            .unwrap();
        store
            .insert_telemetry_sample("d2", "inst-1", &sample())
            .await
            .unwrap();

        store
            .recompute_hourly_aggregates_since("2000-01-01T00:00:00Z")
            .await
            .unwrap();

        let row: (i64, i64) =
            sqlx::query_as("SELECT sample_count, max_verify_ms FROM telemetry_hourly WHERE instance_id = 'inst-1'")
                .fetch_one(&store.pool)
                .await
                .unwrap();
        assert_eq!(row.0, 2);
        assert_eq!(row.1, 12);
    }
}
