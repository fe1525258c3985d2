use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use uppe_scheduler::model::MonitorStatus;
use uppe_scheduler::{HealthCheckTask, ProbeExecutor, ProbeReport, Proxy};

fn default_method() -> String {
    "GET".to_string()
}

fn default_accepted() -> Vec<String> {
    vec!["200-299".to_string()]
}

fn default_redirects() -> usize {
    10
}

/// Config blob of `http`, `http-keyword` and `http-json-query` monitors
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    pub url: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default = "default_accepted")]
    pub accepted_statuscodes: Vec<String>,
    #[serde(default = "default_redirects")]
    pub max_redirects: usize,
    #[serde(default)]
    pub ignore_tls: bool,
    #[serde(default)]
    pub keyword: Option<String>,
    #[serde(default)]
    pub invert_keyword: bool,
    /// Dotted path into the JSON response, e.g. `data.status`
    #[serde(default)]
    pub json_query: Option<String>,
    #[serde(default)]
    pub expected_value: Option<String>,
}

/// Config blob of `tcp` monitors
#[derive(Debug, Clone, Deserialize)]
pub struct TcpConfig {
    pub hostname: String,
    pub port: u16,
}

/// Whether `code` matches any of the accepted entries (`"200"` or `"200-299"`)
pub fn status_accepted(code: u16, accepted: &[String]) -> bool {
    accepted.iter().any(|entry| match entry.split_once('-') {
        Some((low, high)) => match (low.trim().parse::<u16>(), high.trim().parse::<u16>()) {
            (Ok(low), Ok(high)) => (low..=high).contains(&code),
            _ => false,
        },
        None => entry.trim().parse::<u16>() == Ok(code),
    })
}

/// Walk a dotted path (`items.0.state`) through a JSON document
pub fn json_lookup<'a>(value: &'a serde_json::Value, path: &str) -> Option<&'a serde_json::Value> {
    path.split('.')
        .filter(|segment| !segment.is_empty())
        .try_fold(value, |current, segment| match current {
            serde_json::Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => current.get(segment),
        })
}

fn json_to_plain(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// HTTP checker covering the keyword and JSON-query variants
pub struct HttpChecker;

impl HttpChecker {
    fn client(config: &HttpConfig, proxy: Option<&Proxy>, timeout_seconds: u64) -> Result<reqwest::Client> {
        let mut builder = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .danger_accept_invalid_certs(config.ignore_tls);

        if let Some(proxy) = proxy {
            let mut upstream = reqwest::Proxy::all(proxy.url())
                .with_context(|| format!("invalid proxy {}", proxy.url()))?;
            if proxy.auth {
                upstream = upstream.basic_auth(
                    proxy.username.as_deref().unwrap_or_default(),
                    proxy.password.as_deref().unwrap_or_default(),
                );
            }
            builder = builder.proxy(upstream);
        }
        Ok(builder.build()?)
    }

    async fn check(&self, task: &HealthCheckTask) -> Result<ProbeReport> {
        let config: HttpConfig =
            serde_json::from_str(&task.config).context("invalid http monitor config")?;
        let client = Self::client(&config, task.proxy.as_ref(), task.timeout.max(1) as u64)?;

        let method = reqwest::Method::from_bytes(config.method.to_uppercase().as_bytes())
            .map_err(|_| anyhow!("unsupported HTTP method {}", config.method))?;
        let mut request = client.request(method, &config.url);
        for (name, value) in &config.headers {
            request = request.header(name, value);
        }
        if let Some(body) = &config.body {
            request = request.body(body.clone());
        }

        let start = Instant::now();
        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => return Ok(ProbeReport::down(format!("HTTP request failed: {}", e))),
        };
        let code = response.status().as_u16();
        if !status_accepted(code, &config.accepted_statuscodes) {
            return Ok(ProbeReport::down(format!("status code {} not accepted", code)));
        }

        let needs_body = task.monitor_type == "http-keyword" || task.monitor_type == "http-json-query";
        if !needs_body {
            let latency = start.elapsed().as_millis() as i64;
            return Ok(ProbeReport::up(latency, format!("{}", code)));
        }

        let text = response.text().await.context("failed to read response body")?;
        let latency = start.elapsed().as_millis() as i64;

        if task.monitor_type == "http-keyword" {
            let keyword = config.keyword.as_deref().unwrap_or_default();
            let found = text.contains(keyword);
            return Ok(if found != config.invert_keyword {
                ProbeReport::up(latency, format!("{}, keyword check passed", code))
            } else if config.invert_keyword {
                ProbeReport::down(format!("keyword '{}' found", keyword))
            } else {
                ProbeReport::down(format!("keyword '{}' not found", keyword))
            });
        }

        let query = config.json_query.as_deref().unwrap_or_default();
        let document: serde_json::Value =
            serde_json::from_str(&text).context("response is not valid JSON")?;
        let actual = json_lookup(&document, query).map(json_to_plain);
        match (&actual, &config.expected_value) {
            (Some(actual), Some(expected)) if actual == expected => {
                Ok(ProbeReport::up(latency, format!("{} == {}", query, expected)))
            }
            (Some(actual), Some(expected)) => Ok(ProbeReport::down(format!(
                "{} is '{}', expected '{}'",
                query, actual, expected
            ))),
            (Some(_), None) => Ok(ProbeReport::up(latency, format!("{} present", query))),
            (None, _) => Ok(ProbeReport::down(format!("{} not found in response", query))),
        }
    }
}

#[async_trait]
impl ProbeExecutor for HttpChecker {
    async fn execute(&self, task: &HealthCheckTask) -> Result<Option<ProbeReport>> {
        self.check(task).await.map(Some)
    }
}

/// TCP port checker
pub struct TcpChecker;

#[async_trait]
impl ProbeExecutor for TcpChecker {
    async fn execute(&self, task: &HealthCheckTask) -> Result<Option<ProbeReport>> {
        let config: TcpConfig =
            serde_json::from_str(&task.config).context("invalid tcp monitor config")?;
        let target = format!("{}:{}", config.hostname, config.port);
        let start = Instant::now();

        let report = match timeout(
            Duration::from_secs(task.timeout.max(1) as u64),
            tokio::net::TcpStream::connect(&target),
        )
        .await
        {
            Ok(Ok(_stream)) => {
                ProbeReport::up(start.elapsed().as_millis() as i64, format!("{} reachable", target))
            }
            Ok(Err(e)) => ProbeReport::down(format!("TCP connection failed: {}", e)),
            Err(_) => ProbeReport::down("TCP connection timeout"),
        };
        Ok(Some(report))
    }
}

/// Push monitors are fed by the monitored service; the probe only flags
/// silence longer than one interval.
pub struct PushChecker;

#[async_trait]
impl ProbeExecutor for PushChecker {
    async fn execute(&self, task: &HealthCheckTask) -> Result<Option<ProbeReport>> {
        let fresh = task.last_heartbeat.as_ref().is_some_and(|hb| {
            hb.status != MonitorStatus::Down
                && (Utc::now() - hb.time).num_seconds() <= task.interval
        });
        if fresh {
            return Ok(None);
        }
        Ok(Some(ProbeReport::down(format!(
            "No push received in the last {}s",
            task.interval
        ))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use uppe_scheduler::Heartbeat;

    fn task(monitor_type: &str, config: serde_json::Value) -> HealthCheckTask {
        HealthCheckTask {
            monitor_id: "m1".into(),
            monitor_type: monitor_type.into(),
            name: "test".into(),
            interval: 60,
            timeout: 2,
            max_retries: 0,
            retry_interval: 60,
            resend_interval: 0,
            config: config.to_string(),
            proxy: None,
            last_heartbeat: None,
            scheduled_at: 0,
            is_under_maintenance: false,
            check_cert_expiry: false,
        }
    }

    #[test]
    fn test_status_ranges() {
        let accepted = vec!["200-299".to_string(), "301".to_string()];
        assert!(status_accepted(204, &accepted));
        assert!(status_accepted(301, &accepted));
        assert!(!status_accepted(302, &accepted));
        assert!(!status_accepted(500, &accepted));
    }

    #[test]
    fn test_json_lookup() {
        let doc = serde_json::json!({"data": {"items": [{"state": "ok"}], "count": 3}});
        assert_eq!(json_lookup(&doc, "data.items.0.state").map(json_to_plain), Some("ok".into()));
        assert_eq!(json_lookup(&doc, "data.count").map(json_to_plain), Some("3".into()));
        assert!(json_lookup(&doc, "data.missing").is_none());
    }

    #[tokio::test]
    async fn test_tcp_checker_open_and_closed_port() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let open = task("tcp", serde_json::json!({"hostname": "127.0.0.1", "port": port}));
        let report = TcpChecker.execute(&open).await.unwrap().unwrap();
        assert_eq!(report.status, MonitorStatus::Up);

        drop(listener);
        let closed = task("tcp", serde_json::json!({"hostname": "127.0.0.1", "port": port}));
        let report = TcpChecker.execute(&closed).await.unwrap().unwrap();
        assert_eq!(report.status, MonitorStatus::Down);
    }

    #[tokio::test]
    async fn test_push_checker() {
        let mut push = task("push", serde_json::json!({}));
        let report = PushChecker.execute(&push).await.unwrap().unwrap();
        assert_eq!(report.status, MonitorStatus::Down);

        push.last_heartbeat = Some(Heartbeat::new("m1", MonitorStatus::Up, Utc::now()));
        assert!(PushChecker.execute(&push).await.unwrap().is_none());

        push.last_heartbeat = Some(Heartbeat::new(
            "m1",
            MonitorStatus::Up,
            Utc::now() - chrono::Duration::seconds(120),
        ));
        assert!(PushChecker.execute(&push).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_http_checker_rejects_bad_config() {
        let bad = task("http", serde_json::json!({"nope": true}));
        assert!(HttpChecker.execute(&bad).await.is_err());
    }
}
