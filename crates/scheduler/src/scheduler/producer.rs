use chrono::{TimeZone, Utc};
use futures::StreamExt;
use futures::future::join_all;
use futures::stream;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, interval_at, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::align::next_aligned;
use super::leader::LeaderElector;
use super::manager::ScheduleManager;
use crate::HEALTHCHECK_TASK_TYPE;
use crate::config::SchedulerConfig;
use crate::error::{Error, Result};
use crate::model::{HealthCheckTask, Monitor, MonitorType};
use crate::queue::{EnqueueOptions, WorkQueue};
use crate::repository::Ports;
use crate::store::StateStore;

/// Leader-side driver of the schedule: claim, reclaim and refresh loops
pub struct Producer {
    config: SchedulerConfig,
    store: Arc<dyn StateStore>,
    queue: Arc<dyn WorkQueue>,
    ports: Ports,
    manager: Arc<ScheduleManager>,
    elector: Arc<LeaderElector>,
}

async fn wait_leadership(rx: &mut watch::Receiver<bool>, leader: bool) -> bool {
    rx.wait_for(|value| *value == leader).await.is_ok()
}

/// Sleep unless cancelled first; returns false on cancellation
async fn pause(token: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        _ = token.cancelled() => false,
        _ = sleep(duration) => true,
    }
}

/// Backoff after a failed pass: `error_backoff` for transient errors, a full
/// refresh interval otherwise
fn retry_delay(config: &SchedulerConfig, err: &Error) -> Duration {
    if err.is_transient() {
        config.error_backoff()
    } else {
        config.refresh_interval()
    }
}

impl Producer {
    pub fn new(
        config: SchedulerConfig,
        store: Arc<dyn StateStore>,
        queue: Arc<dyn WorkQueue>,
        ports: Ports,
        manager: Arc<ScheduleManager>,
        elector: Arc<LeaderElector>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            store,
            queue,
            ports,
            manager,
            elector,
        })
    }

    pub fn manager(&self) -> &Arc<ScheduleManager> {
        &self.manager
    }

    /// Follow leadership until `shutdown`: start the leader loops whenever
    /// this replica leads, cancel and drain them when it stops.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let mut leader_rx = self.elector.subscribe();
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                ok = wait_leadership(&mut leader_rx, true) => if !ok { break },
            }

            let session = shutdown.child_token();
            info!("Starting producer loops on {}", self.elector.replica_id());
            let leading = tokio::spawn(self.clone().lead(session.clone()));

            tokio::select! {
                _ = shutdown.cancelled() => {}
                _ = wait_leadership(&mut leader_rx, false) => {
                    warn!("{}, stopping producer loops", Error::LeaderLost);
                }
            }
            session.cancel();
            if let Err(e) = leading.await {
                warn!("Producer loops ended abnormally: {}", e);
            }
            info!("Producer loops stopped on {}", self.elector.replica_id());
        }
    }

    /// One leadership session: initialize, then run every loop until `token`
    async fn lead(self: Arc<Self>, token: CancellationToken) {
        loop {
            match self.manager.initialize().await {
                Ok(_) => break,
                Err(e) => {
                    if e.is_transient() {
                        warn!("Schedule initialization failed: {}", e);
                    } else {
                        error!("Schedule initialization failed: {}", e);
                    }
                    if !pause(&token, retry_delay(&self.config, &e)).await {
                        return;
                    }
                }
            }
        }

        let mut handles: Vec<JoinHandle<()>> = Vec::new();
        for worker in 0..self.config.producer_workers() {
            handles.push(tokio::spawn(self.clone().claim_loop(worker, token.clone())));
        }
        handles.push(tokio::spawn(self.clone().reclaim_loop(token.clone())));
        handles.push(tokio::spawn(self.clone().refresh_loop(token.clone())));

        for result in join_all(handles).await {
            if let Err(e) = result {
                warn!("Producer loop panicked: {}", e);
            }
        }
    }

    async fn claim_loop(self: Arc<Self>, worker: usize, token: CancellationToken) {
        debug!("Claim worker {} started", worker);
        while !token.is_cancelled() {
            let wait = match self.claim_batch().await {
                Ok(0) => self.config.claim_tick(),
                Ok(_) => continue,
                Err(e) if e.is_transient() => {
                    warn!("Claim worker {} error: {}", worker, e);
                    retry_delay(&self.config, &e)
                }
                Err(e) => {
                    error!("Claim worker {} error: {}", worker, e);
                    retry_delay(&self.config, &e)
                }
            };
            if !pause(&token, wait).await {
                break;
            }
        }
        debug!("Claim worker {} stopped", worker);
    }

    async fn reclaim_loop(self: Arc<Self>, token: CancellationToken) {
        let every = self.config.reclaim_every();
        let mut ticker = interval_at(Instant::now() + every, every);
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {}
            }
            if let Err(e) = self.reclaim_expired().await {
                warn!("Reclaim failed: {}", e);
            }
        }
    }

    async fn refresh_loop(self: Arc<Self>, token: CancellationToken) {
        let every = self.config.refresh_interval();
        let mut ticker = interval_at(Instant::now() + every, every);
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {}
            }
            if let Err(e) = self.manager.refresh_all().await {
                warn!("Schedule refresh failed: {}", e);
            }
        }
    }

    /// Move expired leases back to due; returns how many were reclaimed
    pub async fn reclaim_expired(&self) -> Result<usize> {
        let now = self.store.time_ms().await?;
        let ids = self.store.reclaim(now, self.config.reclaim_batch).await?;
        if !ids.is_empty() {
            info!("Reclaimed {} expired leases", ids.len());
        }
        Ok(ids.len())
    }

    /// Claim one batch, hand each monitor to the queue and reschedule the
    /// ones that went through. Returns the number claimed.
    ///
    /// Processing runs to completion or to the batch deadline regardless of
    /// leadership; whatever is not rescheduled stays leased and is reclaimed.
    pub async fn claim_batch(&self) -> Result<usize> {
        let now = self.store.time_ms().await?;
        let ids = self
            .store
            .claim(now, self.config.batch_claim, self.config.lease_ttl_ms as i64)
            .await?;
        if ids.is_empty() {
            return Ok(0);
        }
        let claimed = ids.len();

        let entries = match tokio::time::timeout(
            self.config.batch_deadline(),
            self.process_batch(ids, now),
        )
        .await
        {
            Ok(entries) => entries,
            Err(_) => {
                warn!(
                    "Batch of {} monitors missed its {:?} deadline, leases will be reclaimed",
                    claimed,
                    self.config.batch_deadline()
                );
                return Ok(claimed);
            }
        };

        let moved = self.store.reschedule(&entries).await?;
        if moved < entries.len() {
            debug!(
                "{} of {} reschedules skipped, leases already gone",
                entries.len() - moved,
                entries.len()
            );
        }
        Ok(claimed)
    }

    async fn process_batch(&self, ids: Vec<String>, now_ms: i64) -> Vec<(String, i64)> {
        stream::iter(ids)
            .map(|id| async move {
                let interval = self.process_monitor(&id, now_ms).await;
                (id, interval)
            })
            .buffer_unordered(self.config.process_concurrency.max(1))
            .filter_map(|(id, interval)| async move {
                (interval > 0).then(|| (id, next_aligned(now_ms, interval)))
            })
            .collect()
            .await
    }

    /// Enqueue a health check for one claimed monitor.
    ///
    /// Returns the interval to reschedule with, or 0 to leave the lease to
    /// expire.
    pub async fn process_monitor(&self, id: &str, now_ms: i64) -> i64 {
        let monitor = match self.ports.monitors.find_by_id(id).await {
            Ok(Some(monitor)) => monitor,
            Ok(None) => {
                debug!("{}, skipping", Error::MissingMonitor(id.to_string()));
                return 0;
            }
            Err(e) => {
                warn!("Failed to load monitor {}: {:#}", id, e);
                return 0;
            }
        };
        if !monitor.active {
            debug!("Monitor {} is inactive, skipping", id);
            return 0;
        }
        if monitor.interval_seconds <= 0 {
            warn!(
                "{}, skipping",
                Error::InvalidInterval {
                    monitor_id: id.to_string(),
                    interval: monitor.interval_seconds
                }
            );
            return 0;
        }

        let task = self.build_task(&monitor, now_ms).await;
        match self.enqueue(&monitor, &task).await {
            Ok(()) => monitor.interval_seconds,
            Err(e) if e.is_duplicate() => {
                debug!("Health check for {} already queued", id);
                monitor.interval_seconds
            }
            Err(e) => {
                warn!("Failed to enqueue health check for {}: {}", id, e);
                0
            }
        }
    }

    async fn build_task(&self, monitor: &Monitor, now_ms: i64) -> HealthCheckTask {
        let now = Utc
            .timestamp_millis_opt(now_ms)
            .single()
            .unwrap_or_else(Utc::now);

        let is_under_maintenance = match self
            .ports
            .maintenances
            .is_under_maintenance(&monitor.id, now)
            .await
        {
            Ok(under) => under,
            Err(e) => {
                warn!("Maintenance lookup failed for {}: {:#}", monitor.id, e);
                false
            }
        };

        let proxy = match &monitor.proxy_id {
            Some(proxy_id) => match self.ports.proxies.find_by_id(proxy_id).await {
                Ok(Some(proxy)) => Some(proxy),
                Ok(None) => {
                    warn!(
                        "{}, probing {} without it",
                        Error::ProxyLookupFailed(format!("proxy {} not found", proxy_id)),
                        monitor.id
                    );
                    None
                }
                Err(e) => {
                    warn!(
                        "{}, probing {} without it",
                        Error::ProxyLookupFailed(format!("{:#}", e)),
                        monitor.id
                    );
                    None
                }
            },
            None => None,
        };

        let last_heartbeat = if monitor.monitor_type == MonitorType::Push {
            match self.ports.heartbeats.latest(&monitor.id).await {
                Ok(heartbeat) => heartbeat,
                Err(e) => {
                    warn!("Failed to load last heartbeat for {}: {:#}", monitor.id, e);
                    None
                }
            }
        } else {
            None
        };

        HealthCheckTask {
            monitor_id: monitor.id.clone(),
            monitor_type: monitor.monitor_type.as_str().to_string(),
            name: monitor.name.clone(),
            interval: monitor.interval_seconds,
            timeout: monitor.timeout_seconds,
            max_retries: monitor.max_retries,
            retry_interval: monitor.retry_interval,
            resend_interval: monitor.resend_interval,
            config: monitor.config.clone(),
            proxy,
            last_heartbeat,
            scheduled_at: now_ms,
            is_under_maintenance,
            check_cert_expiry: monitor.check_cert_expiry(),
        }
    }

    async fn enqueue(&self, monitor: &Monitor, task: &HealthCheckTask) -> Result<()> {
        let payload = task.to_payload()?;
        let timeout = Duration::from_secs(monitor.timeout_seconds.max(1) as u64)
            + Duration::from_millis(self.config.task_timeout_grace_ms);
        let options = EnqueueOptions {
            queue: self.config.monitor_task_queue_name.clone(),
            timeout,
            max_retry: self.config.task_max_retry,
            retention: Duration::from_millis(self.config.task_retention_ms),
        };
        let unique_ttl = Duration::from_secs(2 * monitor.interval_seconds as u64);

        self.queue
            .enqueue_unique(
                HEALTHCHECK_TASK_TYPE,
                &payload,
                &HealthCheckTask::unique_key(&monitor.id),
                unique_ttl,
                &options,
            )
            .await?;
        Ok(())
    }
}
