//! Monitor definition checks.
//!
//! Run before a monitor is written so the producer never has to skip a
//! record it cannot probe.

use anyhow::{Result, anyhow, bail};
use tracing::warn;
use url::Url;
use uppe_scheduler::{Monitor, MonitorType};

use super::checker::{HttpConfig, TcpConfig};

/// Validate a monitor definition against its type
pub fn validate_monitor(monitor: &Monitor) -> Result<()> {
    if monitor.interval_seconds <= 0 {
        bail!("interval_seconds must be positive, got {}", monitor.interval_seconds);
    }
    if monitor.timeout_seconds <= 0 {
        bail!("timeout_seconds must be positive, got {}", monitor.timeout_seconds);
    }
    if monitor.timeout_seconds > monitor.interval_seconds {
        warn!(
            monitor_id = %monitor.id,
            "timeout {}s exceeds interval {}s",
            monitor.timeout_seconds,
            monitor.interval_seconds
        );
    }

    match &monitor.monitor_type {
        MonitorType::Http | MonitorType::HttpKeyword | MonitorType::HttpJsonQuery => {
            validate_http(&monitor.monitor_type, &monitor.config)
        }
        MonitorType::Tcp => validate_tcp(&monitor.config),
        MonitorType::Push => Ok(()),
        other => Err(anyhow!("Unsupported monitor type: {}", other)),
    }
}

fn validate_http(monitor_type: &MonitorType, config: &str) -> Result<()> {
    let config: HttpConfig =
        serde_json::from_str(config).map_err(|e| anyhow!("Invalid HTTP config: {}", e))?;

    let url = Url::parse(&config.url).map_err(|e| anyhow!("Invalid URL: {}", e))?;
    match url.scheme() {
        "http" | "https" => {}
        other => bail!("Invalid scheme for HTTP monitor: {}", other),
    }

    match monitor_type {
        MonitorType::HttpKeyword if config.keyword.as_deref().unwrap_or_default().is_empty() => {
            bail!("http-keyword monitors need a keyword")
        }
        MonitorType::HttpJsonQuery
            if config.json_query.as_deref().unwrap_or_default().is_empty() =>
        {
            bail!("http-json-query monitors need a json_query")
        }
        _ => Ok(()),
    }
}

fn validate_tcp(config: &str) -> Result<()> {
    let config: TcpConfig =
        serde_json::from_str(config).map_err(|e| anyhow!("Invalid TCP config: {}", e))?;

    if config.hostname.trim().is_empty() {
        bail!("TCP monitors need a hostname");
    }
    if config.port == 0 {
        bail!("Port must be greater than 0");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor(monitor_type: MonitorType, config: serde_json::Value) -> Monitor {
        let mut monitor = Monitor::new("m1", monitor_type, 60);
        monitor.config = config.to_string();
        monitor
    }

    #[test]
    fn test_valid_http_monitor() {
        let m = monitor(MonitorType::Http, serde_json::json!({"url": "https://example.com"}));
        assert!(validate_monitor(&m).is_ok());
    }

    #[test]
    fn test_http_without_url() {
        let m = monitor(MonitorType::Http, serde_json::json!({}));
        assert!(validate_monitor(&m).is_err());

        let m = monitor(MonitorType::Http, serde_json::json!({"url": "not a url"}));
        assert!(validate_monitor(&m).is_err());

        let m = monitor(MonitorType::Http, serde_json::json!({"url": "ftp://example.com"}));
        assert!(validate_monitor(&m).is_err());
    }

    #[test]
    fn test_keyword_required() {
        let m = monitor(MonitorType::HttpKeyword, serde_json::json!({"url": "https://example.com"}));
        assert!(validate_monitor(&m).is_err());

        let m = monitor(
            MonitorType::HttpKeyword,
            serde_json::json!({"url": "https://example.com", "keyword": "ok"}),
        );
        assert!(validate_monitor(&m).is_ok());
    }

    #[test]
    fn test_tcp_monitor() {
        let m = monitor(MonitorType::Tcp, serde_json::json!({"hostname": "db.internal", "port": 5432}));
        assert!(validate_monitor(&m).is_ok());

        let m = monitor(MonitorType::Tcp, serde_json::json!({"hostname": "db.internal"}));
        assert!(validate_monitor(&m).is_err());

        let m = monitor(MonitorType::Tcp, serde_json::json!({"hostname": "", "port": 5432}));
        assert!(validate_monitor(&m).is_err());
    }

    #[test]
    fn test_intervals() {
        let mut m = monitor(MonitorType::Push, serde_json::json!({}));
        m.interval_seconds = 0;
        assert!(validate_monitor(&m).is_err());

        let mut m = monitor(MonitorType::Push, serde_json::json!({}));
        m.timeout_seconds = 0;
        assert!(validate_monitor(&m).is_err());

        let mut m = monitor(MonitorType::Push, serde_json::json!({}));
        m.timeout_seconds = 120;
        assert!(validate_monitor(&m).is_ok());
    }

    #[test]
    fn test_unknown_type() {
        let m = monitor(MonitorType::Dns, serde_json::json!({}));
        assert!(validate_monitor(&m).is_err());
    }
}
