//! Process-wide configuration, read once at startup from the environment.
//!
//! Shaped after `OpenSub keeper-rs`'s `KeeperConfig`: a plain struct,
//! `std::env::var` reads with sane defaults, and validation/clamping with a
//! `tracing::warn!` rather than a hard failure where the spec allows it.

use std::time::Duration;

use anyhow::{bail, Context, Result};

use crate::crypto::keyring::KeyRing;

#[derive(Clone)]
pub struct Config {
    pub bind_addr: std::net::SocketAddr,
    pub database_url: String,

    pub cloud_jwks_json: String,
    pub cloud_private_keys_json: String,
    pub cloud_active_kid: Option<String>,
    pub cloud_issuer: String,
    pub instance_trigger_audience: String,
    pub instance_trigger_path: String,

    pub request_timeout: Duration,
    pub max_retry_attempts: u32,
    pub max_dispatch_per_minute: u32,
    pub telemetry_raw_max_bytes: usize,
    pub signature_window: Duration,
    pub max_slot_lookahead_minutes: u32,
    pub max_schedule_scan_per_tick: u32,
    pub schedule_batch_limit: u32,

    pub minute_load_retention: Duration,
    pub telemetry_raw_retention: Duration,
    pub telemetry_hourly_retention: Duration,
    pub build_event_retention: Duration,

    /// Parsed once up front so JWT issuance never has to re-parse JSON per call.
    pub keyring: KeyRing,
}

fn env_string(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_u64(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let port: u16 = std::env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(8080);
        let bind_addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));

        let database_url = env_string("DATABASE_URL", "sqlite://np_cloud_scheduler.db");

        let cloud_jwks_json =
            std::env::var("CLOUD_JWKS_JSON").context("CLOUD_JWKS_JSON is required")?;
        let cloud_private_keys_json = std::env::var("CLOUD_PRIVATE_KEYS_JSON")
            .context("CLOUD_PRIVATE_KEYS_JSON is required")?;

        let keyring = KeyRing::parse(&cloud_private_keys_json)
            .context("failed to parse CLOUD_PRIVATE_KEYS_JSON")?;
        if keyring.is_empty() {
            bail!("CLOUD_PRIVATE_KEYS_JSON contained no usable signing keys");
        }

        let cloud_active_kid = std::env::var("CLOUD_ACTIVE_KID").ok().or_else(|| {
            let first = keyring.first_kid();
            if first.is_none() {
                tracing::warn!("no CLOUD_ACTIVE_KID set and keyring is empty");
            }
            first
        });

        let max_dispatch_per_minute = env_u64("MAX_DISPATCH_PER_MINUTE", 500) as u32;
        let max_slot_lookahead_minutes = env_u64("MAX_SLOT_LOOKAHEAD_MINUTES", 15) as u32;
        let max_schedule_scan_per_tick = env_u64("MAX_SCHEDULE_SCAN_PER_TICK", 5_000) as u32;
        let schedule_batch_limit = env_u64("SCHEDULE_BATCH_LIMIT", 500) as u32;
        let max_retry_attempts = env_u64("MAX_RETRY_ATTEMPTS", 6) as u32;

        if max_dispatch_per_minute == 0 {
            bail!("MAX_DISPATCH_PER_MINUTE must be > 0");
        }
        if max_schedule_scan_per_tick < schedule_batch_limit {
            tracing::warn!(
                max_schedule_scan_per_tick,
                schedule_batch_limit,
                "MAX_SCHEDULE_SCAN_PER_TICK is smaller than SCHEDULE_BATCH_LIMIT; \
                 at most one batch will be scanned per tick"
            );
        }

        Ok(Self {
            bind_addr,
            database_url,
            cloud_jwks_json,
            cloud_private_keys_json,
            cloud_active_kid,
            cloud_issuer: env_string("CLOUD_ISSUER", "np-cloud"),
            instance_trigger_audience: env_string("INSTANCE_TRIGGER_AUDIENCE", "np-instance"),
            instance_trigger_path: env_string(
                "INSTANCE_TRIGGER_PATH",
                "/api/internal/cron/cloud-trigger",
            ),
            request_timeout: Duration::from_millis(env_u64("REQUEST_TIMEOUT_MS", 15_000)),
            max_retry_attempts,
            max_dispatch_per_minute,
            telemetry_raw_max_bytes: env_u64("TELEMETRY_RAW_MAX_BYTES", 4096) as usize,
            signature_window: Duration::from_millis(env_u64("SIGNATURE_WINDOW_MS", 5 * 60_000)),
            max_slot_lookahead_minutes,
            max_schedule_scan_per_tick,
            schedule_batch_limit,
            minute_load_retention: Duration::from_secs(env_u64(
                "MINUTE_LOAD_RETENTION_SECONDS",
                24 * 3600,
            )),
            telemetry_raw_retention: Duration::from_secs(env_u64(
                "TELEMETRY_RAW_RETENTION_SECONDS",
                90 * 24 * 3600,
            )),
            telemetry_hourly_retention: Duration::from_secs(env_u64(
                "TELEMETRY_HOURLY_RETENTION_SECONDS",
                365 * 24 * 3600,
            )),
            build_event_retention: Duration::from_secs(env_u64(
                "BUILD_EVENT_RETENTION_SECONDS",
                365 * 24 * 3600,
            )),
            keyring,
        })
    }
}
