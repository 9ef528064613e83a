//! Dispatch queue wire format (§4.5.1).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchMessage {
    #[serde(rename = "deliveryId")]
    pub delivery_id: String,
    #[serde(rename = "instanceId")]
    pub instance_id: String,
    #[serde(rename = "siteId")]
    pub site_id: String,
    #[serde(rename = "siteUrl")]
    pub site_url: String,
    #[serde(rename = "scheduledFor")]
    pub scheduled_for: String,
    #[serde(rename = "enqueuedAt")]
    pub enqueued_at: String,
    #[serde(rename = "dispatchAttempt")]
    pub dispatch_attempt: u32,
}
