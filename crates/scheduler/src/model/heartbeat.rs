use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::monitor::MonitorStatus;

/// Result of a single probe attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Heartbeat {
    /// Assigned by the heartbeat service on create
    pub id: Option<String>,
    pub monitor_id: String,
    pub status: MonitorStatus,
    pub ping_ms: i64,
    /// Consecutive `pending` results so far
    pub retries: i64,
    pub time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub message: String,
    /// Status transition worth notifying about
    pub important: bool,
}

impl Heartbeat {
    pub fn new(monitor_id: impl Into<String>, status: MonitorStatus, time: DateTime<Utc>) -> Self {
        Self {
            id: None,
            monitor_id: monitor_id.into(),
            status,
            ping_ms: 0,
            retries: 0,
            time,
            end_time: time,
            message: String::new(),
            important: false,
        }
    }
}
