use serde::{Deserialize, Serialize};

use super::heartbeat::Heartbeat;
use super::proxy::Proxy;

/// Message handed from the producer to a worker through the work queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheckTask {
    pub monitor_id: String,
    #[serde(rename = "type")]
    pub monitor_type: String,
    pub name: String,
    pub interval: i64,
    pub timeout: i64,
    pub max_retries: i64,
    pub retry_interval: i64,
    pub resend_interval: i64,
    pub config: String,
    pub proxy: Option<Proxy>,
    /// Latest heartbeat, only forwarded for push monitors
    pub last_heartbeat: Option<Heartbeat>,
    /// Due time (ms) the producer claimed this probe for
    pub scheduled_at: i64,
    pub is_under_maintenance: bool,
    pub check_cert_expiry: bool,
}

impl HealthCheckTask {
    /// Unique key used to de-duplicate enqueues of the same monitor
    pub fn unique_key(monitor_id: &str) -> String {
        format!("healthcheck:{monitor_id}")
    }

    pub fn to_payload(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_payload(payload: &str) -> serde_json::Result<Self> {
        serde_json::from_str(payload)
    }
}
