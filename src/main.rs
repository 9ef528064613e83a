// =============================================================================
// np-cloud-scheduler — control plane for scheduled instance triggers
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use np_cloud_scheduler::config::Config;
use np_cloud_scheduler::queue::broker::InMemoryBroker;
use np_cloud_scheduler::state::AppState;
use np_cloud_scheduler::store::Store;
use np_cloud_scheduler::{api, queue, scheduler};

async fn drain_loop(broker: Arc<InMemoryBroker>) {
    let mut ticker = tokio::time::interval(Duration::from_millis(250));
    loop {
        ticker.tick().await;
        broker.drain_due().await;
    }
}

async fn scheduler_loop(state: Arc<AppState>) {
    let mut ticker = tokio::time::interval(Duration::from_secs(60));
    loop {
        ticker.tick().await;
        scheduler::run_tick(&state).await;
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "np_cloud_scheduler=info,tower_http=info".into()),
        )
        .json()
        .init();

    let config = Config::from_env().unwrap_or_else(|e| {
        eprintln!("configuration error: {e:#}");
        std::process::exit(1);
    });

    info!(bind_addr = %config.bind_addr, "np-cloud-scheduler starting");

    let store = Store::connect(&config.database_url).await.unwrap_or_else(|e| {
        eprintln!("failed to connect to store: {e}");
        std::process::exit(1);
    });

    let jwks = np_cloud_scheduler::crypto::jwks::validate_jwks(&config.cloud_jwks_json).unwrap_or_else(|e| {
        eprintln!("invalid CLOUD_JWKS_JSON: {e}");
        std::process::exit(1);
    });
    if let Err(e) = store
        .mirror_signing_keys(&jwks, config.cloud_active_kid.as_deref())
        .await
    {
        eprintln!("failed to mirror signing keys: {e}");
        std::process::exit(1);
    }

    let broker = Arc::new(InMemoryBroker::new());
    let bind_addr = config.bind_addr;
    let state = AppState::new(store, config, broker.clone());

    tokio::spawn(drain_loop(broker.clone()));
    tokio::spawn(scheduler_loop(state.clone()));
    for _ in 0..4 {
        tokio::spawn(queue::consumer::run_main_consumer(state.clone()));
    }
    tokio::spawn(queue::consumer::run_dlq_consumer(state.clone()));

    let app = api::build_router(state);

    let listener = tokio::net::TcpListener::bind(bind_addr).await.unwrap_or_else(|e| {
        eprintln!("failed to bind {bind_addr}: {e}");
        std::process::exit(1);
    });

    info!(%bind_addr, "listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            info!("shutdown signal received");
        })
        .await
        .unwrap_or_else(|e| {
            eprintln!("server error: {e}");
            std::process::exit(1);
        });
}
