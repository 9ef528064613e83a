//! Cloud signing-key ring mirror (§3 `CloudSigningKey`): a persisted view of
//! the configured JWKS so key-rotation bookkeeping survives outside the
//! process, refreshed once at startup from `CLOUD_JWKS_JSON`/`CLOUD_ACTIVE_KID`.

use serde_json::Value;
use sqlx::Row;

use super::Store;

impl Store {
    /// Upserts one row per JWKS key (`active` for the configured active kid,
    /// `grace` otherwise) and flips any previously mirrored kid no longer
    /// present in the JWKS to `retired`. Call once at startup, after the JWKS
    /// document has been structurally validated.
    pub async fn mirror_signing_keys(
        &self,
        jwks: &Value,
        active_kid: Option<&str>,
    ) -> Result<(), sqlx::Error> {
        let now = crate::time_util::to_iso8601(chrono::Utc::now());
        let keys = jwks
            .get("keys")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut seen_kids = Vec::new();
        for key in &keys {
            let Some(kid) = key.get("kid").and_then(Value::as_str) else {
                continue;
            };
            let status = if Some(kid) == active_kid { "active" } else { "grace" };
            let material = key.to_string();
            seen_kids.push(kid.to_string());

            sqlx::query(
                "INSERT INTO cloud_signing_keys (kid, status, material, retire_at) \
                 VALUES (?, ?, ?, NULL) \
                 ON CONFLICT(kid) DO UPDATE SET status = excluded.status, material = excluded.material",
            )
            .bind(kid)
            .bind(status)
            .bind(&material)
            .execute(&self.pool)
            .await?;
        }

        let existing: Vec<String> = sqlx::query("SELECT kid FROM cloud_signing_keys")
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(|row| row.get::<String, _>("kid"))
            .collect();

        for kid in existing {
            if !seen_kids.contains(&kid) {
                sqlx::query(
                    "UPDATE cloud_signing_keys SET status = 'retired', retire_at = ? \
                     WHERE kid = ? AND status != 'retired'",
                )
                .bind(&now)
                .bind(&kid)
                .execute(&self.pool)
                .await?;
            }
        }

        Ok(())
    }
}
