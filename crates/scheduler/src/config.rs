//! Tunables for the producer, worker pool and status reconciler.
//!
//! Durations are kept in milliseconds so configuration files stay plain
//! integers; accessors hand out [`Duration`]s.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default queue name for health-check tasks
pub const DEFAULT_QUEUE_NAME: &str = "healthcheck";

fn cpu_count() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
}

/// Producer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Max monitors claimed per tick
    pub batch_claim: usize,
    /// Idle sleep when no monitors are due
    pub claim_tick_ms: u64,
    /// How long a claim is protected from reclaim
    pub lease_ttl_ms: u64,
    pub reclaim_every_ms: u64,
    pub reclaim_batch: usize,
    pub refresh_interval_ms: u64,
    pub leader_lock_ttl_ms: u64,
    pub leader_renew_every_ms: u64,
    /// Concurrent claim-loop workers on the leader, defaults to CPU count
    pub producer_workers: Option<usize>,
    pub monitor_task_queue_name: String,
    /// Deadline for processing one claimed batch, detached from shutdown
    pub batch_deadline_ms: u64,
    pub page_size: usize,
    pub error_backoff_ms: u64,
    /// Concurrent `process_monitor` calls within one batch
    pub process_concurrency: usize,
    /// Added to the probe timeout to form the queue visibility timeout
    pub task_timeout_grace_ms: u64,
    pub task_max_retry: u32,
    pub task_retention_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            batch_claim: 1000,
            claim_tick_ms: 100,
            lease_ttl_ms: 60_000,
            reclaim_every_ms: 10_000,
            reclaim_batch: 5000,
            refresh_interval_ms: 60_000,
            leader_lock_ttl_ms: 15_000,
            leader_renew_every_ms: 5_000,
            producer_workers: None,
            monitor_task_queue_name: DEFAULT_QUEUE_NAME.to_string(),
            batch_deadline_ms: 120_000,
            page_size: 100,
            error_backoff_ms: 100,
            process_concurrency: 16,
            task_timeout_grace_ms: 5_000,
            task_max_retry: 0,
            task_retention_ms: 0,
        }
    }
}

impl SchedulerConfig {
    pub fn claim_tick(&self) -> Duration {
        Duration::from_millis(self.claim_tick_ms)
    }

    pub fn reclaim_every(&self) -> Duration {
        Duration::from_millis(self.reclaim_every_ms)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }

    pub fn leader_lock_ttl(&self) -> Duration {
        Duration::from_millis(self.leader_lock_ttl_ms)
    }

    pub fn leader_renew_every(&self) -> Duration {
        Duration::from_millis(self.leader_renew_every_ms)
    }

    pub fn batch_deadline(&self) -> Duration {
        Duration::from_millis(self.batch_deadline_ms)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms)
    }

    pub fn producer_workers(&self) -> usize {
        self.producer_workers.filter(|n| *n > 0).unwrap_or_else(cpu_count)
    }

    /// Check the values that would make the loops spin or never fire
    pub fn validate(&self) -> anyhow::Result<()> {
        for (name, value) in [
            ("claim_tick_ms", self.claim_tick_ms),
            ("lease_ttl_ms", self.lease_ttl_ms),
            ("reclaim_every_ms", self.reclaim_every_ms),
            ("refresh_interval_ms", self.refresh_interval_ms),
            ("error_backoff_ms", self.error_backoff_ms),
        ] {
            if value == 0 {
                anyhow::bail!("{name} must be greater than zero");
            }
        }
        if self.batch_claim == 0 || self.reclaim_batch == 0 {
            anyhow::bail!("batch_claim and reclaim_batch must be greater than zero");
        }
        if self.leader_renew_every_ms == 0 || self.leader_renew_every_ms >= self.leader_lock_ttl_ms
        {
            anyhow::bail!(
                "leader_renew_every_ms ({}) must be positive and shorter than leader_lock_ttl_ms ({})",
                self.leader_renew_every_ms,
                self.leader_lock_ttl_ms
            );
        }
        if self.page_size == 0 {
            anyhow::bail!("page_size must be greater than zero");
        }
        if self.monitor_task_queue_name.trim().is_empty() {
            anyhow::bail!("monitor_task_queue_name must not be empty");
        }
        Ok(())
    }
}

/// Worker pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Concurrent consumers, defaults to CPU count
    pub concurrency: Option<usize>,
    pub poll_interval_ms: u64,
    /// How often expired in-flight tasks are made visible again
    pub requeue_every_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self { concurrency: None, poll_interval_ms: 100, requeue_every_ms: 5_000 }
    }
}

impl WorkerConfig {
    pub fn concurrency(&self) -> usize {
        self.concurrency.filter(|n| *n > 0).unwrap_or_else(cpu_count)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn requeue_every(&self) -> Duration {
        Duration::from_millis(self.requeue_every_ms)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.poll_interval_ms == 0 {
            anyhow::bail!("worker poll_interval_ms must be greater than zero");
        }
        if self.requeue_every_ms == 0 {
            anyhow::bail!("worker requeue_every_ms must be greater than zero");
        }
        Ok(())
    }
}

/// Status reconciler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusConfig {
    /// Window over which status changes for one monitor are coalesced
    pub debounce_ms: u64,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self { debounce_ms: 200 }
    }
}

impl StatusConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}
