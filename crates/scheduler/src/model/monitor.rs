use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Status of a monitor or of a single heartbeat
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MonitorStatus {
    Down,
    Up,
    #[default]
    Pending,
    Maintenance,
}

impl MonitorStatus {
    /// Numeric code used by the stores
    pub fn code(self) -> i64 {
        match self {
            MonitorStatus::Down => 0,
            MonitorStatus::Up => 1,
            MonitorStatus::Pending => 2,
            MonitorStatus::Maintenance => 3,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(MonitorStatus::Down),
            1 => Some(MonitorStatus::Up),
            2 => Some(MonitorStatus::Pending),
            3 => Some(MonitorStatus::Maintenance),
            _ => None,
        }
    }
}

impl fmt::Display for MonitorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MonitorStatus::Down => write!(f, "down"),
            MonitorStatus::Up => write!(f, "up"),
            MonitorStatus::Pending => write!(f, "pending"),
            MonitorStatus::Maintenance => write!(f, "maintenance"),
        }
    }
}

/// Probe type of a monitor
///
/// Unknown types are kept verbatim so that an executor plug-in can still
/// claim them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum MonitorType {
    Http,
    HttpKeyword,
    HttpJsonQuery,
    Tcp,
    Ping,
    Push,
    Dns,
    Other(String),
}

impl MonitorType {
    pub fn as_str(&self) -> &str {
        match self {
            MonitorType::Http => "http",
            MonitorType::HttpKeyword => "http-keyword",
            MonitorType::HttpJsonQuery => "http-json-query",
            MonitorType::Tcp => "tcp",
            MonitorType::Ping => "ping",
            MonitorType::Push => "push",
            MonitorType::Dns => "dns",
            MonitorType::Other(name) => name,
        }
    }

    pub fn is_http(&self) -> bool {
        matches!(self, MonitorType::Http | MonitorType::HttpKeyword | MonitorType::HttpJsonQuery)
    }

    /// Types whose config may ask for certificate expiry checks
    pub fn supports_cert_expiry(&self) -> bool {
        self.is_http() || *self == MonitorType::Tcp
    }
}

impl From<String> for MonitorType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "http" => MonitorType::Http,
            "http-keyword" => MonitorType::HttpKeyword,
            "http-json-query" => MonitorType::HttpJsonQuery,
            "tcp" | "port" => MonitorType::Tcp,
            "ping" => MonitorType::Ping,
            "push" => MonitorType::Push,
            "dns" => MonitorType::Dns,
            _ => MonitorType::Other(value),
        }
    }
}

impl From<MonitorType> for String {
    fn from(value: MonitorType) -> Self {
        value.as_str().to_string()
    }
}

impl FromStr for MonitorType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(MonitorType::from(s.to_string()))
    }
}

impl fmt::Display for MonitorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Monitor definition - a configured probe target
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Monitor {
    pub id: String,

    /// Owning organization
    pub org_id: String,

    #[serde(rename = "type")]
    pub monitor_type: MonitorType,

    pub name: String,

    /// Seconds between probes; non-positive values are never scheduled
    pub interval_seconds: i64,

    pub timeout_seconds: i64,

    /// Consecutive failures tolerated (as `pending`) before `down`
    pub max_retries: i64,

    /// Seconds between probes while retrying
    pub retry_interval: i64,

    /// Seconds between repeated notifications while down
    pub resend_interval: i64,

    pub active: bool,

    /// Last aggregated status, maintained by the status reconciler
    pub status: MonitorStatus,

    /// Opaque JSON interpreted by the executor for this type
    pub config: String,

    pub proxy_id: Option<String>,

    pub push_token: Option<String>,
}

impl Monitor {
    /// Create an active monitor with sensible defaults
    pub fn new(id: impl Into<String>, monitor_type: MonitorType, interval_seconds: i64) -> Self {
        Self {
            id: id.into(),
            org_id: String::new(),
            monitor_type,
            name: String::new(),
            interval_seconds,
            timeout_seconds: 16,
            max_retries: 0,
            retry_interval: interval_seconds,
            resend_interval: 0,
            active: true,
            status: MonitorStatus::Pending,
            config: "{}".to_string(),
            proxy_id: None,
            push_token: None,
        }
    }

    /// Whether the producer should keep this monitor in the schedule
    pub fn is_schedulable(&self) -> bool {
        self.active && self.interval_seconds > 0
    }

    /// `check_cert_expiry` from the config blob, false when absent or unparsable
    pub fn check_cert_expiry(&self) -> bool {
        if !self.monitor_type.supports_cert_expiry() {
            return false;
        }
        serde_json::from_str::<serde_json::Value>(&self.config)
            .ok()
            .and_then(|config| config.get("check_cert_expiry").and_then(|v| v.as_bool()))
            .unwrap_or(false)
    }
}

/// Partial update applied through `MonitorRepository::update_partial`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MonitorPatch {
    pub status: Option<MonitorStatus>,
    pub active: Option<bool>,
    pub interval_seconds: Option<i64>,
    pub name: Option<String>,
}

impl MonitorPatch {
    pub fn status(status: MonitorStatus) -> Self {
        Self { status: Some(status), ..Default::default() }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Apply the set fields onto a monitor
    pub fn apply(&self, monitor: &mut Monitor) {
        if let Some(status) = self.status {
            monitor.status = status;
        }
        if let Some(active) = self.active {
            monitor.active = active;
        }
        if let Some(interval) = self.interval_seconds {
            monitor.interval_seconds = interval;
        }
        if let Some(name) = &self.name {
            monitor.name = name.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monitor_type_round_trip_names() {
        assert_eq!(MonitorType::from("http-keyword".to_string()), MonitorType::HttpKeyword);
        assert_eq!(MonitorType::from("port".to_string()), MonitorType::Tcp);
        assert_eq!(
            MonitorType::from("grpc-keyword".to_string()),
            MonitorType::Other("grpc-keyword".into())
        );
        assert_eq!(MonitorType::Other("grpc".into()).as_str(), "grpc");
    }

    #[test]
    fn test_is_schedulable() {
        let mut monitor = Monitor::new("a", MonitorType::Http, 60);
        assert!(monitor.is_schedulable());

        monitor.interval_seconds = 0;
        assert!(!monitor.is_schedulable());

        monitor.interval_seconds = -5;
        assert!(!monitor.is_schedulable());

        monitor.interval_seconds = 60;
        monitor.active = false;
        assert!(!monitor.is_schedulable());
    }

    #[test]
    fn test_check_cert_expiry() {
        let mut monitor = Monitor::new("a", MonitorType::Http, 60);
        assert!(!monitor.check_cert_expiry());

        monitor.config = r#"{"url":"https://example.com","check_cert_expiry":true}"#.into();
        assert!(monitor.check_cert_expiry());

        monitor.config = "not json".into();
        assert!(!monitor.check_cert_expiry());

        let mut push = Monitor::new("b", MonitorType::Push, 60);
        push.config = r#"{"check_cert_expiry":true}"#.into();
        assert!(!push.check_cert_expiry());
    }

    #[test]
    fn test_status_codes() {
        for status in [
            MonitorStatus::Down,
            MonitorStatus::Up,
            MonitorStatus::Pending,
            MonitorStatus::Maintenance,
        ] {
            assert_eq!(MonitorStatus::from_code(status.code()), Some(status));
        }
        assert_eq!(MonitorStatus::from_code(9), None);
    }

    #[test]
    fn test_patch_apply() {
        let mut monitor = Monitor::new("a", MonitorType::Tcp, 30);
        let patch = MonitorPatch::status(MonitorStatus::Down);
        assert!(!patch.is_empty());
        patch.apply(&mut monitor);
        assert_eq!(monitor.status, MonitorStatus::Down);
        assert_eq!(monitor.interval_seconds, 30);
        assert!(MonitorPatch::default().is_empty());
    }
}
