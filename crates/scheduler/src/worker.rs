//! Stateless health-check consumers.
//!
//! Workers pull tasks off the queue, run the executor registered for the
//! monitor type, store a heartbeat and announce status transitions. They
//! never touch the due or lease sets.

use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, interval_at, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::WorkerConfig;
use crate::error::{Error, Result};
use crate::events::{Event, EventBus};
use crate::model::{HealthCheckTask, Heartbeat, MonitorStatus};
use crate::queue::{QueuedTask, WorkQueue};
use crate::repository::Ports;

/// Outcome of one probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeReport {
    pub status: MonitorStatus,
    pub ping_ms: i64,
    pub message: String,
}

impl ProbeReport {
    pub fn up(ping_ms: i64, message: impl Into<String>) -> Self {
        Self {
            status: MonitorStatus::Up,
            ping_ms,
            message: message.into(),
        }
    }

    pub fn down(message: impl Into<String>) -> Self {
        Self {
            status: MonitorStatus::Down,
            ping_ms: 0,
            message: message.into(),
        }
    }
}

/// Probe implementation for one or more monitor types
#[async_trait]
pub trait ProbeExecutor: Send + Sync {
    /// `Ok(None)` means nothing to record this round
    async fn execute(&self, task: &HealthCheckTask) -> anyhow::Result<Option<ProbeReport>>;
}

/// Executors keyed by monitor type
#[derive(Clone, Default)]
pub struct ExecutorRegistry {
    executors: HashMap<String, Arc<dyn ProbeExecutor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, monitor_type: &str, executor: Arc<dyn ProbeExecutor>) -> &mut Self {
        self.executors.insert(monitor_type.to_string(), executor);
        self
    }

    /// Exact match first, then the `http` executor for `http-*` variants
    pub fn get(&self, monitor_type: &str) -> Option<Arc<dyn ProbeExecutor>> {
        self.executors.get(monitor_type).cloned().or_else(|| {
            monitor_type
                .starts_with("http-")
                .then(|| self.executors.get("http").cloned())
                .flatten()
        })
    }

    pub fn types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.executors.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }
}

/// Status, retry counter and importance of a new heartbeat given the
/// previous one
fn classify(
    observed: MonitorStatus,
    previous: Option<&Heartbeat>,
    max_retries: i64,
) -> (MonitorStatus, i64, bool) {
    let previous_retries = previous.map_or(0, |hb| hb.retries);
    let previous_down = previous.is_some_and(|hb| hb.status == MonitorStatus::Down);

    let (status, retries) = match observed {
        MonitorStatus::Down if !previous_down && previous_retries < max_retries => {
            (MonitorStatus::Pending, previous_retries + 1)
        }
        MonitorStatus::Down => (MonitorStatus::Down, previous_retries),
        other => (other, 0),
    };

    let important = match previous {
        None => true,
        Some(hb) => hb.status != status && status != MonitorStatus::Pending,
    };
    (status, retries, important)
}

pub struct WorkerPool {
    config: WorkerConfig,
    queue_name: String,
    queue: Arc<dyn WorkQueue>,
    ports: Ports,
    executors: ExecutorRegistry,
    bus: EventBus,
}

impl WorkerPool {
    pub fn new(
        config: WorkerConfig,
        queue_name: impl Into<String>,
        queue: Arc<dyn WorkQueue>,
        ports: Ports,
        executors: ExecutorRegistry,
        bus: EventBus,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            queue_name: queue_name.into(),
            queue,
            ports,
            executors,
            bus,
        })
    }

    /// Run the workers and the visibility-timeout sweeper until `shutdown`
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let concurrency = self.config.concurrency();
        info!(
            "Starting {} workers on queue {} ({})",
            concurrency,
            self.queue_name,
            self.executors.types().join(", ")
        );

        let mut handles = Vec::with_capacity(concurrency + 1);
        for worker in 0..concurrency {
            handles.push(tokio::spawn(self.clone().worker_loop(worker, shutdown.clone())));
        }
        handles.push(tokio::spawn(self.clone().requeue_loop(shutdown.clone())));

        for result in join_all(handles).await {
            if let Err(e) = result {
                warn!("Worker task panicked: {}", e);
            }
        }
        info!("Workers on queue {} stopped", self.queue_name);
    }

    async fn worker_loop(self: Arc<Self>, worker: usize, shutdown: CancellationToken) {
        while !shutdown.is_cancelled() {
            let wait = match self.run_once().await {
                Ok(true) => continue,
                Ok(false) => self.config.poll_interval(),
                Err(e) => {
                    warn!("Worker {} failed to dequeue: {}", worker, e);
                    self.config.poll_interval() * 10
                }
            };
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = sleep(wait) => {}
            }
        }
        debug!("Worker {} stopped", worker);
    }

    async fn requeue_loop(self: Arc<Self>, shutdown: CancellationToken) {
        let every = self.config.requeue_every();
        let mut ticker = interval_at(Instant::now() + every, every);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }
            match self.queue.requeue_expired(&self.queue_name).await {
                Ok(0) => {}
                Ok(n) => info!("Requeued {} tasks past their visibility timeout", n),
                Err(e) => warn!("Requeue of expired tasks failed: {}", e),
            }
        }
    }

    /// Take and handle one task; returns false when the queue was empty
    pub async fn run_once(&self) -> Result<bool> {
        match self.queue.dequeue(&self.queue_name).await? {
            Some(task) => {
                self.handle_task(&task).await;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn handle_task(&self, task: &QueuedTask) {
        let outcome = match HealthCheckTask::from_payload(&task.payload) {
            Ok(check) => self.process_check(&check).await.map(|_| ()),
            Err(e) => Err(Error::from(e)),
        };

        let settled = match &outcome {
            Ok(()) => self.queue.complete(task).await,
            Err(e) => {
                warn!("Task {} failed: {}", task.id, e);
                self.queue.fail(task, &e.to_string()).await.map(|_| ())
            }
        };
        if let Err(e) = settled {
            warn!("Failed to settle task {}: {}", task.id, e);
        }
    }

    /// Probe one monitor and record the result. Returns the stored heartbeat,
    /// or `None` when the executor had nothing to report.
    pub async fn process_check(&self, check: &HealthCheckTask) -> Result<Option<Heartbeat>> {
        let started = Utc::now();
        let report = if check.is_under_maintenance {
            Some(ProbeReport {
                status: MonitorStatus::Maintenance,
                ping_ms: 0,
                message: "Under maintenance".to_string(),
            })
        } else {
            self.probe(check).await?
        };
        let Some(report) = report else {
            debug!("No heartbeat for {} this round", check.monitor_id);
            return Ok(None);
        };

        let previous = match self.ports.heartbeats.latest(&check.monitor_id).await {
            Ok(previous) => previous,
            Err(e) => {
                warn!("Failed to load last heartbeat for {}: {:#}", check.monitor_id, e);
                None
            }
        };
        let (status, retries, important) =
            classify(report.status, previous.as_ref(), check.max_retries);

        let mut heartbeat = Heartbeat::new(&check.monitor_id, status, started);
        heartbeat.ping_ms = report.ping_ms;
        heartbeat.retries = retries;
        heartbeat.message = report.message;
        heartbeat.important = important;
        heartbeat.end_time = Utc::now();

        let stored = self.ports.heartbeats.create(&heartbeat).await?;
        debug!(
            "Heartbeat for {}: {} ({}ms, retries {})",
            check.monitor_id, stored.status, stored.ping_ms, stored.retries
        );

        self.announce(&check.monitor_id, stored.status).await;
        Ok(Some(stored))
    }

    async fn probe(&self, check: &HealthCheckTask) -> Result<Option<ProbeReport>> {
        let Some(executor) = self.executors.get(&check.monitor_type) else {
            return Ok(Some(ProbeReport::down(format!(
                "no executor for monitor type '{}'",
                check.monitor_type
            ))));
        };

        let limit = Duration::from_secs(check.timeout.max(1) as u64)
            + Duration::from_secs(1);
        match tokio::time::timeout(limit, executor.execute(check)).await {
            Ok(Ok(report)) => Ok(report),
            Ok(Err(e)) => Ok(Some(ProbeReport::down(format!("{:#}", e)))),
            Err(_) => Err(Error::Queue(format!(
                "probe for {} exceeded {:?}",
                check.monitor_id, limit
            ))),
        }
    }

    /// Publish a status change when the stored monitor disagrees
    async fn announce(&self, monitor_id: &str, status: MonitorStatus) {
        match self.ports.monitors.find_by_id(monitor_id).await {
            Ok(Some(monitor)) if monitor.status != status => {
                self.bus.publish(Event::MonitorStatusChanged {
                    monitor_id: monitor_id.to_string(),
                    status,
                    previous: monitor.status,
                });
            }
            Ok(_) => {}
            Err(e) => warn!("Failed to load monitor {}: {:#}", monitor_id, e),
        }
    }
}
