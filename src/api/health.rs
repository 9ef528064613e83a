//! Plain liveness endpoints (ambient addition; §6 names the paths).

use serde::Serialize;

use super::envelope::ApiEnvelope;

#[derive(Serialize)]
pub struct RootInfo {
    service: &'static str,
    version: &'static str,
}

pub async fn root_handler() -> ApiEnvelope<RootInfo> {
    ApiEnvelope::ok(RootInfo {
        service: "np-cloud-scheduler",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Serialize)]
pub struct HealthStatus {
    status: &'static str,
}

pub async fn health_handler() -> ApiEnvelope<HealthStatus> {
    ApiEnvelope::ok(HealthStatus { status: "ok" })
}
