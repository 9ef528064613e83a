//! Row types for every entity in §3 of the specification.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    Active,
    PendingUrl,
    Disabled,
}

impl InstanceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            InstanceStatus::Active => "active",
            InstanceStatus::PendingUrl => "pending_url",
            InstanceStatus::Disabled => "disabled",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "active" => Some(InstanceStatus::Active),
            "pending_url" => Some(InstanceStatus::PendingUrl),
            "disabled" => Some(InstanceStatus::Disabled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instance {
    pub instance_id: String,
    pub site_id: String,
    pub site_url: Option<String>,
    pub status: InstanceStatus,
    pub pending_reason: Option<String>,
    pub site_pub_key: String,
    pub site_key_alg: String,
    pub minute_of_day: u32,
    pub next_run_at: Option<String>,
    pub last_seen_at: Option<String>,
    pub last_success_at: Option<String>,
    pub app_version: Option<String>,
    pub build_id: Option<String>,
    pub commit: Option<String>,
    pub built_at: Option<String>,
}

impl Instance {
    /// Sole eligibility predicate for scheduling, per spec §3/§8.
    pub fn is_schedulable(&self) -> bool {
        self.status == InstanceStatus::Active
            && self.pending_reason.is_none()
            && self.site_url.is_some()
            && self.next_run_at.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Queued,
    Delivered,
    Failed,
    Dead,
}

impl DeliveryStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            DeliveryStatus::Queued => "queued",
            DeliveryStatus::Delivered => "delivered",
            DeliveryStatus::Failed => "failed",
            DeliveryStatus::Dead => "dead",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(DeliveryStatus::Queued),
            "delivered" => Some(DeliveryStatus::Delivered),
            "failed" => Some(DeliveryStatus::Failed),
            "dead" => Some(DeliveryStatus::Dead),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Delivery {
    pub id: String,
    pub instance_id: String,
    pub scheduled_for: String,
    pub enqueued_at: String,
    pub status: DeliveryStatus,
    pub attempt_count: u32,
    pub response_status: Option<i32>,
    pub accepted: Option<bool>,
    pub dedup_hit: Option<bool>,
    pub last_error_code: Option<String>,
    pub last_error_message: Option<String>,
    pub completed_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryAttempt {
    pub delivery_id: String,
    pub attempt_no: u32,
    pub started_at: String,
    pub ended_at: String,
    pub http_status: Option<i32>,
    pub timed_out: bool,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchMinuteLoad {
    pub minute_start: String,
    pub scheduled_count: u32,
    pub retry_count: u32,
    pub total_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetrySample {
    pub delivery_id: String,
    pub instance_id: String,
    pub schema_ver: String,
    pub accepted: bool,
    pub dedup_hit: bool,
    pub collected_at: String,
    pub verify_ms: Option<i64>,
    pub raw_json: String,
}
