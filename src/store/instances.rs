//! Instance upsert/lookup/scan queries (§3, §4.3, §4.4).

use chrono::Utc;
use sqlx::Row;
use uuid::Uuid;

use super::models::{Instance, InstanceStatus};
use super::Store;

fn row_to_instance(row: &sqlx::sqlite::SqliteRow) -> Instance {
    let status: String = row.get("status");
    Instance {
        instance_id: row.get("instance_id"),
        site_id: row.get("site_id"),
        site_url: row.get("site_url"),
        status: InstanceStatus::from_str(&status).unwrap_or(InstanceStatus::PendingUrl),
        pending_reason: row.get("pending_reason"),
        site_pub_key: row.get("site_pub_key"),
        site_key_alg: row.get("site_key_alg"),
        minute_of_day: row.get::<i64, _>("minute_of_day") as u32,
        next_run_at: row.get("next_run_at"),
        last_seen_at: row.get("last_seen_at"),
        last_success_at: row.get("last_success_at"),
        app_version: row.get("app_version"),
        build_id: row.get("build_id"),
        commit: row.get("commit_sha"),
        built_at: row.get("built_at"),
    }
}

pub struct SyncInput<'a> {
    pub site_id: &'a str,
    pub submitted_pub_key: &'a str,
    pub submitted_key_alg: &'a str,
    pub normalized_url: Option<&'a str>,
    pub pending_reason: Option<&'a str>,
    pub app_version: Option<&'a str>,
    pub build_id: Option<&'a str>,
    pub commit: Option<&'a str>,
    pub built_at: Option<&'a str>,
}

impl Store {
    pub async fn find_instance_by_site_id(
        &self,
        site_id: &str,
    ) -> Result<Option<Instance>, sqlx::Error> {
        let row = sqlx::query("SELECT * FROM instances WHERE site_id = ?")
            .bind(site_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(row_to_instance))
    }

    pub async fn find_instance_by_id(
        &self,
        instance_id: &str,
    ) -> Result<Option<Instance>, sqlx::Error> {
        let row = sqlx::query("SELECT * FROM instances WHERE instance_id = ?")
            .bind(instance_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(row_to_instance))
    }

    /// Trust-on-first-use upsert. `site_pub_key`/`site_key_alg` are pinned on
    /// first sync and never overwritten afterward; `minute_of_day` is assigned
    /// once via `rand::random` and never changes thereafter — the caller must
    /// have already verified the request against the *stored* key when one
    /// existed, before calling this.
    pub async fn upsert_instance_sync(&self, input: SyncInput<'_>) -> Result<Instance, sqlx::Error> {
        let now = Utc::now().to_rfc3339();
        let existing = self.find_instance_by_site_id(input.site_id).await?;

        let status = if input.pending_reason.is_some() {
            InstanceStatus::PendingUrl
        } else {
            InstanceStatus::Active
        };

        match existing {
            Some(existing) => {
                let next_run_at = if status == InstanceStatus::Active {
                    existing
                        .next_run_at
                        .clone()
                        .or_else(|| {
                            Some(crate::time_util::to_iso8601(
                                crate::time_util::compute_next_run_at(
                                    existing.minute_of_day,
                                    Utc::now(),
                                ),
                            ))
                        })
                } else {
                    None
                };

                sqlx::query(
                    "UPDATE instances SET site_url = ?, status = ?, pending_reason = ?, \
                     next_run_at = ?, last_seen_at = ?, app_version = ?, build_id = ?, \
                     commit_sha = ?, built_at = ? WHERE instance_id = ?",
                )
                .bind(input.normalized_url)
                .bind(status.as_str())
                .bind(input.pending_reason)
                .bind(next_run_at)
                .bind(&now)
                .bind(input.app_version)
                .bind(input.build_id)
                .bind(input.commit)
                .bind(input.built_at)
                .bind(&existing.instance_id)
                .execute(&self.pool)
                .await?;

                self.find_instance_by_id(&existing.instance_id)
                    .await
                    .map(|i| i.expect("instance just updated must exist"))
            }
            None => {
                let instance_id = format!("inst_{}", Uuid::new_v4());
                let minute_of_day: u32 = rand::random::<u32>() % 1440;
                let next_run_at = if status == InstanceStatus::Active {
                    Some(crate::time_util::to_iso8601(
                        crate::time_util::compute_next_run_at(minute_of_day, Utc::now()),
                    ))
                } else {
                    None
                };

                sqlx::query(
                    "INSERT INTO instances \
                     (instance_id, site_id, site_url, status, pending_reason, site_pub_key, \
                      site_key_alg, minute_of_day, next_run_at, last_seen_at, last_success_at, \
                      app_version, build_id, commit_sha, built_at) \
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, NULL, ?, ?, ?, ?)",
                )
                .bind(&instance_id)
                .bind(input.site_id)
                .bind(input.normalized_url)
                .bind(status.as_str())
                .bind(input.pending_reason)
                .bind(input.submitted_pub_key)
                .bind(input.submitted_key_alg)
                .bind(minute_of_day as i64)
                .bind(&next_run_at)
                .bind(&now)
                .bind(input.app_version)
                .bind(input.build_id)
                .bind(input.commit)
                .bind(input.built_at)
                .execute(&self.pool)
                .await?;

                self.find_instance_by_id(&instance_id)
                    .await
                    .map(|i| i.expect("instance just inserted must exist"))
            }
        }
    }

    pub async fn deregister_instance(
        &self,
        site_id: &str,
        reason: Option<&str>,
    ) -> Result<Option<Instance>, sqlx::Error> {
        let reason = reason.unwrap_or("deregistered");
        let result = sqlx::query(
            "UPDATE instances SET status = 'disabled', next_run_at = NULL, pending_reason = ? \
             WHERE site_id = ?",
        )
        .bind(reason)
        .bind(site_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.find_instance_by_site_id(site_id).await
    }

    /// Rows eligible for scheduling, per `Instance::is_schedulable`, whose
    /// `next_run_at` has come due. The SQL time bound is pushed down for
    /// indexed access; the eligibility check itself lives in one place so it
    /// can't drift from the predicate the rest of the crate relies on.
    pub async fn due_instances(
        &self,
        now: &str,
        limit: u32,
    ) -> Result<Vec<Instance>, sqlx::Error> {
        let rows = sqlx::query(
            "SELECT * FROM instances \
             WHERE next_run_at IS NOT NULL AND next_run_at <= ? \
             ORDER BY next_run_at ASC LIMIT ?",
        )
        .bind(now)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(row_to_instance)
            .filter(Instance::is_schedulable)
            .collect())
    }

    pub async fn advance_next_run_at(
        &self,
        instance_id: &str,
        next_run_at: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE instances SET next_run_at = ? WHERE instance_id = ?")
            .bind(next_run_at)
            .bind(instance_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn mark_last_success(
        &self,
        instance_id: &str,
        at: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE instances SET last_success_at = ? WHERE instance_id = ?")
            .bind(at)
            .bind(instance_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
