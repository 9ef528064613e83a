//! Shared application state handed to every axum handler and background
//! worker, mirroring the teacher's single `AppState` struct behind
//! `State<Arc<AppState>>`.

use std::sync::Arc;

use crate::config::Config;
use crate::crypto::token::TokenIssuer;
use crate::queue::broker::InMemoryBroker;
use crate::store::Store;

pub struct AppState {
    pub store: Store,
    pub config: Config,
    pub token_issuer: TokenIssuer,
    pub broker: Arc<InMemoryBroker>,
    pub http_client: reqwest::Client,
}

impl AppState {
    pub fn new(store: Store, config: Config, broker: Arc<InMemoryBroker>) -> Arc<Self> {
        let token_issuer = TokenIssuer::new(
            config.keyring.clone(),
            config.cloud_issuer.clone(),
            config.instance_trigger_audience.clone(),
        );
        let http_client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .expect("building the outbound http client must not fail");

        Arc::new(Self {
            store,
            config,
            token_issuer,
            broker,
            http_client,
        })
    }
}
