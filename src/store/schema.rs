//! DDL for the eight tables in §3, executed once on `Store::connect`.

pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS instances (
    instance_id      TEXT PRIMARY KEY,
    site_id          TEXT NOT NULL UNIQUE,
    site_url         TEXT,
    status           TEXT NOT NULL,
    pending_reason   TEXT,
    site_pub_key     TEXT NOT NULL,
    site_key_alg     TEXT NOT NULL,
    minute_of_day    INTEGER NOT NULL,
    next_run_at      TEXT,
    last_seen_at     TEXT,
    last_success_at  TEXT,
    app_version      TEXT,
    build_id         TEXT,
    commit_sha       TEXT,
    built_at         TEXT
);

CREATE INDEX IF NOT EXISTS idx_instances_schedulable
    ON instances (next_run_at)
    WHERE status = 'active' AND pending_reason IS NULL AND site_url IS NOT NULL;

CREATE TABLE IF NOT EXISTS build_events (
    instance_id      TEXT NOT NULL,
    idempotency_key  TEXT NOT NULL,
    created_at       TEXT NOT NULL,
    PRIMARY KEY (instance_id, idempotency_key)
);

CREATE TABLE IF NOT EXISTS deliveries (
    id                 TEXT PRIMARY KEY,
    instance_id        TEXT NOT NULL,
    scheduled_for      TEXT NOT NULL,
    enqueued_at        TEXT NOT NULL,
    status             TEXT NOT NULL,
    attempt_count      INTEGER NOT NULL DEFAULT 0,
    response_status    INTEGER,
    accepted           INTEGER,
    dedup_hit          INTEGER,
    last_error_code    TEXT,
    last_error_message TEXT,
    completed_at       TEXT
);

CREATE INDEX IF NOT EXISTS idx_deliveries_instance ON deliveries (instance_id);

CREATE TABLE IF NOT EXISTS delivery_attempts (
    delivery_id    TEXT NOT NULL,
    attempt_no     INTEGER NOT NULL,
    started_at     TEXT NOT NULL,
    ended_at       TEXT NOT NULL,
    http_status    INTEGER,
    timed_out      INTEGER NOT NULL DEFAULT 0,
    error_code     TEXT,
    error_message  TEXT,
    PRIMARY KEY (delivery_id, attempt_no)
);

CREATE TABLE IF NOT EXISTS dispatch_minute_load (
    minute_start     TEXT PRIMARY KEY,
    scheduled_count  INTEGER NOT NULL DEFAULT 0,
    retry_count      INTEGER NOT NULL DEFAULT 0,
    total_count      INTEGER NOT NULL DEFAULT 0,
    created_at       TEXT NOT NULL,
    updated_at       TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS telemetry_samples (
    delivery_id    TEXT PRIMARY KEY,
    instance_id    TEXT NOT NULL,
    schema_ver     TEXT NOT NULL,
    accepted       INTEGER NOT NULL,
    dedup_hit      INTEGER NOT NULL,
    collected_at   TEXT NOT NULL,
    verify_ms      INTEGER,
    raw_json       TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_telemetry_samples_instance_time
    ON telemetry_samples (instance_id, collected_at);

CREATE TABLE IF NOT EXISTS telemetry_hourly (
    instance_id    TEXT NOT NULL,
    bucket_hour    TEXT NOT NULL,
    sample_count   INTEGER NOT NULL DEFAULT 0,
    accepted_count INTEGER NOT NULL DEFAULT 0,
    dedup_count    INTEGER NOT NULL DEFAULT 0,
    avg_verify_ms  REAL,
    max_verify_ms  INTEGER,
    PRIMARY KEY (instance_id, bucket_hour)
);

CREATE TABLE IF NOT EXISTS cloud_signing_keys (
    kid         TEXT PRIMARY KEY,
    status      TEXT NOT NULL,
    material    TEXT NOT NULL,
    retire_at   TEXT
);
"#;
