//! End-to-end pipeline coverage: sync → activation → scheduling → dispatch →
//! retry → dead-letter, driven through the real router, store, and queue
//! wiring the same way `main` assembles them. The instance's trigger
//! endpoint is stood in by `wiremock`, the way `hack-ink-jwks-cache`'s own
//! integration suite stands in for an identity provider.

use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use ed25519_dalek::{Signer, SigningKey};
use rand::rngs::OsRng;
use serde_json::{json, Value};
use tower::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use np_cloud_scheduler::config::Config;
use np_cloud_scheduler::crypto::canonical::canonical_hash;
use np_cloud_scheduler::crypto::keyring::KeyRing;
use np_cloud_scheduler::crypto::verify::signing_message;
use np_cloud_scheduler::queue::broker::{DelayedQueue, InMemoryBroker};
use np_cloud_scheduler::state::AppState;
use np_cloud_scheduler::store::instances::SyncInput;
use np_cloud_scheduler::store::models::{DeliveryStatus, InstanceStatus};
use np_cloud_scheduler::store::slots::SlotSource;
use np_cloud_scheduler::store::Store;
use np_cloud_scheduler::{api, queue, scheduler};

const TRIGGER_PATH: &str = "/api/internal/cron/cloud-trigger";

fn site_keypair() -> (SigningKey, String) {
    let sk = SigningKey::generate(&mut OsRng);
    let material = STANDARD.encode(sk.verifying_key().to_bytes());
    (sk, material)
}

fn sign(sk: &SigningKey, method: &str, path: &str, mut payload: Value) -> Value {
    let ts = chrono::Utc::now().timestamp_millis();
    let nonce = "integration-test-nonce";
    let body_hash = canonical_hash(&payload);
    let message = signing_message(method, path, &body_hash, ts, nonce);
    let sig = sk.sign(message.as_bytes());
    payload["signature"] = json!({
        "alg": "EdDSA",
        "ts": ts,
        "nonce": nonce,
        "sig": STANDARD.encode(sig.to_bytes()),
    });
    payload
}

fn private_keyring_json(kid: &str) -> (String, SigningKey) {
    let sk = SigningKey::generate(&mut OsRng);
    let d = URL_SAFE_NO_PAD.encode(sk.to_bytes());
    (
        format!(r#"{{"keys": [{{"kty":"OKP","crv":"Ed25519","d":"{d}","kid":"{kid}"}}]}}"#),
        sk,
    )
}

async fn test_config(database_url: String) -> Config {
    let (cloud_keys_json, _cloud_signing_key) = private_keyring_json("cloud-k1");
    let keyring = KeyRing::parse(&cloud_keys_json).unwrap();

    Config {
        bind_addr: std::net::SocketAddr::from(([127, 0, 0, 1], 0)),
        database_url,
        cloud_jwks_json: "{\"keys\":[]}".to_string(),
        cloud_private_keys_json: cloud_keys_json,
        cloud_active_kid: Some("cloud-k1".to_string()),
        cloud_issuer: "np-cloud".to_string(),
        instance_trigger_audience: "np-instance".to_string(),
        instance_trigger_path: TRIGGER_PATH.to_string(),
        request_timeout: Duration::from_millis(250),
        max_retry_attempts: 3,
        max_dispatch_per_minute: 500,
        telemetry_raw_max_bytes: 4096,
        signature_window: Duration::from_secs(300),
        max_slot_lookahead_minutes: 15,
        max_schedule_scan_per_tick: 5_000,
        schedule_batch_limit: 500,
        minute_load_retention: Duration::from_secs(24 * 3600),
        telemetry_raw_retention: Duration::from_secs(90 * 24 * 3600),
        telemetry_hourly_retention: Duration::from_secs(365 * 24 * 3600),
        build_event_retention: Duration::from_secs(365 * 24 * 3600),
        keyring,
    }
}

async fn test_state(dir: &tempfile::TempDir) -> Arc<AppState> {
    let db_path = dir.path().join("pipeline.db");
    let database_url = format!("sqlite://{}", db_path.to_string_lossy());
    let store = Store::connect(&database_url).await.unwrap();
    let config = test_config(database_url).await;
    let broker = Arc::new(InMemoryBroker::new());
    AppState::new(store, config, broker)
}

/// Spawn the same background workers `main` does: the delay-wheel drain
/// loop, the main dispatch consumers, and the DLQ consumer. Returns handles
/// so the caller can abort them once a scenario has run its course.
fn spawn_workers(state: Arc<AppState>) -> Vec<tokio::task::JoinHandle<()>> {
    let mut handles = Vec::new();

    let broker = state.broker.clone();
    handles.push(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_millis(20));
        loop {
            ticker.tick().await;
            broker.drain_due().await;
        }
    }));

    for _ in 0..2 {
        handles.push(tokio::spawn(queue::consumer::run_main_consumer(state.clone())));
    }
    handles.push(tokio::spawn(queue::consumer::run_dlq_consumer(state.clone())));

    handles
}

fn abort_all(handles: Vec<tokio::task::JoinHandle<()>>) {
    for handle in handles {
        handle.abort();
    }
}

async fn wait_until<F, Fut>(mut check: F, timeout: Duration) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn fresh_sync_without_site_url_is_pending() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state(&dir).await;
    let router = api::build_router(state.clone());

    let (sk, pub_key) = site_keypair();
    let body = sign(
        &sk,
        "POST",
        "/v1/instances/sync",
        json!({
            "siteId": "site-fresh",
            "sitePubKey": pub_key,
            "siteKeyAlg": "ed25519",
        }),
    );

    let request = axum::http::Request::builder()
        .method("POST")
        .uri("/v1/instances/sync")
        .header("content-type", "application/json")
        .body(axum::body::Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap();

    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), axum::http::StatusCode::OK);

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let parsed: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(parsed["ok"], json!(true));
    assert_eq!(parsed["data"]["status"], json!("pending_url"));
    assert_eq!(parsed["data"]["pendingReason"], json!("pending_url_missing"));
    assert!(parsed["data"]["nextRunAt"].is_null());
}

#[tokio::test]
async fn sync_with_real_url_activates_and_resync_preserves_minute() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state(&dir).await;
    let router = api::build_router(state.clone());

    let (sk, pub_key) = site_keypair();
    let first_body = sign(
        &sk,
        "POST",
        "/v1/instances/sync",
        json!({
            "siteId": "site-active",
            "sitePubKey": pub_key,
            "siteKeyAlg": "ed25519",
            "siteUrl": "https://instance.example-active.test",
        }),
    );

    let request = axum::http::Request::builder()
        .method("POST")
        .uri("/v1/instances/sync")
        .header("content-type", "application/json")
        .body(axum::body::Body::from(serde_json::to_vec(&first_body).unwrap()))
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let first_parsed: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(first_parsed["data"]["status"], json!("active"));
    let first_minute = first_parsed["data"]["minuteOfDay"].as_u64().unwrap();
    assert!(first_parsed["data"]["nextRunAt"].is_string());

    let second_body = sign(
        &sk,
        "POST",
        "/v1/instances/sync",
        json!({
            "siteId": "site-active",
            "sitePubKey": pub_key,
            "siteKeyAlg": "ed25519",
            "siteUrl": "https://instance.example-active.test",
            "appVersion": "2.0.0",
        }),
    );
    let request = axum::http::Request::builder()
        .method("POST")
        .uri("/v1/instances/sync")
        .header("content-type", "application/json")
        .body(axum::body::Body::from(serde_json::to_vec(&second_body).unwrap()))
        .unwrap();
    let response = router.oneshot(request).await.unwrap();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let second_parsed: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(second_parsed["data"]["minuteOfDay"].as_u64().unwrap(), first_minute);
    assert_eq!(second_parsed["data"]["instanceId"], first_parsed["data"]["instanceId"]);
}

#[tokio::test]
async fn scheduler_tick_spills_into_next_minute_when_quota_is_full() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("pipeline.db");
    let database_url = format!("sqlite://{}", db_path.to_string_lossy());
    let store = Store::connect(&database_url).await.unwrap();
    let mut config = test_config(database_url).await;
    config.max_dispatch_per_minute = 1;
    let broker = Arc::new(InMemoryBroker::new());
    let state = AppState::new(store, config, broker);

    for site_id in ["spill-a", "spill-b"] {
        state
            .store
            .upsert_instance_sync(SyncInput {
                site_id,
                submitted_pub_key: "k",
                submitted_key_alg: "ed25519",
                normalized_url: Some("https://instance.spill.test"),
                pending_reason: None,
                app_version: None,
                build_id: None,
                commit: None,
                built_at: None,
            })
            .await
            .unwrap();
    }

    // Force both instances due right now regardless of their random minute.
    let now = chrono::Utc::now();
    for site_id in ["spill-a", "spill-b"] {
        let instance = state.store.find_instance_by_site_id(site_id).await.unwrap().unwrap();
        state
            .store
            .advance_next_run_at(&instance.instance_id, &np_cloud_scheduler::time_util::to_iso8601(now))
            .await
            .unwrap();
    }

    scheduler::run_tick(&state).await;

    let a = state.store.find_instance_by_site_id("spill-a").await.unwrap().unwrap();
    let b = state.store.find_instance_by_site_id("spill-b").await.unwrap().unwrap();
    assert!(a.next_run_at.is_some());
    assert!(b.next_run_at.is_some());

    let mut raw_messages = Vec::new();
    for _ in 0..2 {
        match tokio::time::timeout(Duration::from_millis(200), state.broker.dequeue(queue::DISPATCH_QUEUE)).await {
            Ok(Some(raw)) => raw_messages.push(raw),
            _ => break,
        }
    }
    assert_eq!(raw_messages.len(), 2, "both instances should have been enqueued");
}

#[tokio::test]
async fn successful_dispatch_marks_delivered_and_records_telemetry() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state(&dir).await;

    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(TRIGGER_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "ok": true,
            "data": {"protocolVerification": {"accepted": true, "verifyMs": 12}},
        })))
        .mount(&mock_server)
        .await;

    let instance = state
        .store
        .upsert_instance_sync(SyncInput {
            site_id: "site-success",
            submitted_pub_key: "k",
            submitted_key_alg: "ed25519",
            normalized_url: Some(&mock_server.uri()),
            pending_reason: None,
            app_version: None,
            build_id: None,
            commit: None,
            built_at: None,
        })
        .await
        .unwrap();

    let now = chrono::Utc::now();
    state
        .store
        .advance_next_run_at(&instance.instance_id, &np_cloud_scheduler::time_util::to_iso8601(now))
        .await
        .unwrap();

    let handles = spawn_workers(state.clone());
    scheduler::run_tick(&state).await;

    let delivered = wait_until(
        || {
            let state = state.clone();
            async move {
                state
                    .store
                    .find_instance_by_site_id("site-success")
                    .await
                    .unwrap()
                    .map(|i| i.last_success_at.is_some())
                    .unwrap_or(false)
            }
        },
        Duration::from_secs(3),
    )
    .await;

    abort_all(handles);
    assert!(delivered, "delivery should have succeeded and recorded last_success_at");

    let row: (i64,) = sqlx::query_as("SELECT count(*) FROM telemetry_samples WHERE instance_id = ?")
        .bind(&instance.instance_id)
        .fetch_one(&state.store.pool)
        .await
        .unwrap();
    assert_eq!(row.0, 1);

    let row: (String,) = sqlx::query_as("SELECT status FROM deliveries WHERE instance_id = ?")
        .bind(&instance.instance_id)
        .fetch_one(&state.store.pool)
        .await
        .unwrap();
    assert_eq!(row.0, DeliveryStatus::Delivered.as_str());
}

#[tokio::test]
async fn unreachable_instance_dead_letters_once_attempts_are_exhausted() {
    let dir = tempfile::tempdir().unwrap();
    // `max_retry_attempts = 1` means the first failed attempt already meets
    // the exhaustion check, so the dead-letter transition is observable
    // without waiting out the real 30s+ backoff ladder (covered at the unit
    // level by `queue::consumer`'s `backoff_seconds` ladder test).
    let db_path = dir.path().join("pipeline.db");
    let database_url = format!("sqlite://{}", db_path.to_string_lossy());
    let store = Store::connect(&database_url).await.unwrap();
    let mut config = test_config(database_url).await;
    config.max_retry_attempts = 1;
    let broker = Arc::new(InMemoryBroker::new());
    let state = AppState::new(store, config, broker);

    // Point at a closed local port so the attempt fails fast instead of
    // waiting out the full request timeout.
    let unreachable = "http://127.0.0.1:1";

    let instance = state
        .store
        .upsert_instance_sync(SyncInput {
            site_id: "site-unreachable",
            submitted_pub_key: "k",
            submitted_key_alg: "ed25519",
            normalized_url: Some(unreachable),
            pending_reason: None,
            app_version: None,
            build_id: None,
            commit: None,
            built_at: None,
        })
        .await
        .unwrap();
    assert_eq!(instance.status, InstanceStatus::Active);

    let delivery_id = "dlv-unreachable-1".to_string();
    let now = chrono::Utc::now();
    state
        .store
        .create_delivery(
            &delivery_id,
            &instance.instance_id,
            &np_cloud_scheduler::time_util::to_iso8601(now),
            &np_cloud_scheduler::time_util::to_iso8601(now),
        )
        .await
        .unwrap();

    let message = queue::message::DispatchMessage {
        delivery_id: delivery_id.clone(),
        instance_id: instance.instance_id.clone(),
        site_id: instance.site_id.clone(),
        site_url: unreachable.to_string(),
        scheduled_for: np_cloud_scheduler::time_util::to_iso8601(now),
        enqueued_at: np_cloud_scheduler::time_util::to_iso8601(now),
        dispatch_attempt: 1,
    };
    state
        .broker
        .enqueue(
            queue::DISPATCH_QUEUE,
            serde_json::to_string(&message).unwrap(),
            Duration::ZERO,
        )
        .await
        .unwrap();

    let handles = spawn_workers(state.clone());

    let dead = wait_until(
        || {
            let state = state.clone();
            let delivery_id = delivery_id.clone();
            async move {
                state
                    .store
                    .find_delivery(&delivery_id)
                    .await
                    .unwrap()
                    .map(|d| d.status == DeliveryStatus::Dead)
                    .unwrap_or(false)
            }
        },
        Duration::from_secs(5),
    )
    .await;

    abort_all(handles);
    assert!(dead, "delivery should be dead after exhausting retries");

    let delivery = state.store.find_delivery(&delivery_id).await.unwrap().unwrap();
    assert_eq!(delivery.last_error_code.as_deref(), Some("MAX_ATTEMPTS_EXCEEDED"));
    assert!(delivery.attempt_count >= state.config.max_retry_attempts);
}

#[tokio::test]
async fn dlq_drain_marks_delivery_dead_and_invalid_payload_is_dropped_silently() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state(&dir).await;

    let instance = state
        .store
        .upsert_instance_sync(SyncInput {
            site_id: "site-dlq",
            submitted_pub_key: "k",
            submitted_key_alg: "ed25519",
            normalized_url: Some("https://instance.dlq.test"),
            pending_reason: None,
            app_version: None,
            build_id: None,
            commit: None,
            built_at: None,
        })
        .await
        .unwrap();

    let now = chrono::Utc::now();
    let delivery_id = "dlv-dlq-1".to_string();
    state
        .store
        .create_delivery(
            &delivery_id,
            &instance.instance_id,
            &np_cloud_scheduler::time_util::to_iso8601(now),
            &np_cloud_scheduler::time_util::to_iso8601(now),
        )
        .await
        .unwrap();

    let message = queue::message::DispatchMessage {
        delivery_id: delivery_id.clone(),
        instance_id: instance.instance_id.clone(),
        site_id: instance.site_id.clone(),
        site_url: "https://instance.dlq.test".to_string(),
        scheduled_for: np_cloud_scheduler::time_util::to_iso8601(now),
        enqueued_at: np_cloud_scheduler::time_util::to_iso8601(now),
        dispatch_attempt: 1,
    };

    state
        .broker
        .enqueue(
            queue::DISPATCH_DLQ_QUEUE,
            serde_json::to_string(&message).unwrap(),
            Duration::ZERO,
        )
        .await
        .unwrap();
    state
        .broker
        .enqueue(
            queue::DISPATCH_DLQ_QUEUE,
            "not valid json".to_string(),
            Duration::ZERO,
        )
        .await
        .unwrap();

    let handles = spawn_workers(state.clone());

    let dead = wait_until(
        || {
            let state = state.clone();
            let delivery_id = delivery_id.clone();
            async move {
                state
                    .store
                    .find_delivery(&delivery_id)
                    .await
                    .unwrap()
                    .map(|d| d.status == DeliveryStatus::Dead)
                    .unwrap_or(false)
            }
        },
        Duration::from_secs(3),
    )
    .await;

    abort_all(handles);
    assert!(dead);

    let delivery = state.store.find_delivery(&delivery_id).await.unwrap().unwrap();
    assert_eq!(delivery.last_error_code.as_deref(), Some("DLQ_REACHED"));

    let row: (i64,) = sqlx::query_as("SELECT count(*) FROM deliveries")
        .fetch_one(&state.store.pool)
        .await
        .unwrap();
    assert_eq!(row.0, 1, "the malformed DLQ payload must not have touched the store");
}

#[tokio::test]
async fn minute_load_reservation_prevents_double_booking_across_retry_and_scheduled() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state(&dir).await;
    let at = chrono::Utc::now();

    let scheduled = state
        .store
        .reserve_slot(at, SlotSource::Scheduled, 2, 5)
        .await
        .unwrap()
        .unwrap();
    let retry = state
        .store
        .reserve_slot(at, SlotSource::Retry, 2, 5)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(scheduled.minute_start, retry.minute_start);

    let overflow = state.store.reserve_slot(at, SlotSource::Scheduled, 2, 0).await.unwrap();
    assert!(overflow.is_none(), "the minute is already at quota with no lookahead");
}
