#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use uppe_scheduler::scheduler::LeaderElector;
use uppe_scheduler::{
    HealthCheckTask, Heartbeat, HeartbeatService, Maintenance, MaintenanceService,
    MemoryStateStore, MemoryWorkQueue, Monitor, MonitorPatch, MonitorRepository, Ports, Producer,
    Proxy, ProxyService, ScheduleManager, SchedulerConfig, StateStore,
};

#[derive(Default)]
pub struct Monitors(Mutex<BTreeMap<String, Monitor>>);

impl Monitors {
    pub fn put(&self, monitor: Monitor) {
        self.0.lock().unwrap().insert(monitor.id.clone(), monitor);
    }

    pub fn delete(&self, id: &str) {
        self.0.lock().unwrap().remove(id);
    }

    pub fn get(&self, id: &str) -> Option<Monitor> {
        self.0.lock().unwrap().get(id).cloned()
    }
}

#[async_trait]
impl MonitorRepository for Monitors {
    async fn find_by_id(&self, id: &str) -> Result<Option<Monitor>> {
        Ok(self.get(id))
    }

    async fn find_active_paginated(&self, page: usize, limit: usize) -> Result<Vec<Monitor>> {
        let monitors = self.0.lock().unwrap();
        Ok(monitors
            .values()
            .filter(|m| m.active)
            .skip(page * limit)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn update_partial(&self, id: &str, patch: &MonitorPatch) -> Result<Option<Monitor>> {
        let mut monitors = self.0.lock().unwrap();
        Ok(monitors.get_mut(id).map(|m| {
            patch.apply(m);
            m.clone()
        }))
    }

    async fn find_one_by_push_token(&self, token: &str) -> Result<Option<Monitor>> {
        let monitors = self.0.lock().unwrap();
        Ok(monitors
            .values()
            .find(|m| m.push_token.as_deref() == Some(token))
            .cloned())
    }

    async fn find_by_proxy_id(&self, proxy_id: &str) -> Result<Vec<Monitor>> {
        let monitors = self.0.lock().unwrap();
        Ok(monitors
            .values()
            .filter(|m| m.proxy_id.as_deref() == Some(proxy_id))
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct Maintenances(pub Mutex<Vec<Maintenance>>);

#[async_trait]
impl MaintenanceService for Maintenances {
    async fn get_maintenances_by_monitor_id(&self, monitor_id: &str) -> Result<Vec<Maintenance>> {
        Ok(self
            .0
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.monitor_ids.iter().any(|id| id == monitor_id))
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct Proxies(pub Mutex<BTreeMap<String, Proxy>>);

#[async_trait]
impl ProxyService for Proxies {
    async fn find_by_id(&self, id: &str) -> Result<Option<Proxy>> {
        Ok(self.0.lock().unwrap().get(id).cloned())
    }
}

#[derive(Default)]
pub struct Heartbeats(pub Mutex<Vec<Heartbeat>>);

impl Heartbeats {
    pub fn for_monitor(&self, monitor_id: &str) -> Vec<Heartbeat> {
        self.0
            .lock()
            .unwrap()
            .iter()
            .filter(|h| h.monitor_id == monitor_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl HeartbeatService for Heartbeats {
    async fn create(&self, heartbeat: &Heartbeat) -> Result<Heartbeat> {
        let mut list = self.0.lock().unwrap();
        let mut stored = heartbeat.clone();
        stored.id = Some(list.len().to_string());
        list.push(stored.clone());
        Ok(stored)
    }

    async fn find_by_monitor_id_paginated(
        &self,
        monitor_id: &str,
        limit: usize,
        page: usize,
    ) -> Result<Vec<Heartbeat>> {
        let mut list = self.for_monitor(monitor_id);
        list.reverse();
        Ok(list.into_iter().skip(page * limit).take(limit).collect())
    }

    async fn delete_by_monitor_id(&self, monitor_id: &str) -> Result<u64> {
        let mut list = self.0.lock().unwrap();
        let before = list.len();
        list.retain(|h| h.monitor_id != monitor_id);
        Ok((before - list.len()) as u64)
    }
}

/// A single replica wired entirely in memory
pub struct Harness {
    pub config: SchedulerConfig,
    pub store: Arc<MemoryStateStore>,
    pub queue: Arc<MemoryWorkQueue>,
    pub monitors: Arc<Monitors>,
    pub maintenances: Arc<Maintenances>,
    pub proxies: Arc<Proxies>,
    pub heartbeats: Arc<Heartbeats>,
    pub manager: Arc<ScheduleManager>,
    pub elector: Arc<LeaderElector>,
    pub producer: Arc<Producer>,
}

pub fn test_config() -> SchedulerConfig {
    SchedulerConfig {
        claim_tick_ms: 10,
        reclaim_every_ms: 50,
        refresh_interval_ms: 200,
        leader_lock_ttl_ms: 600,
        leader_renew_every_ms: 200,
        producer_workers: Some(2),
        ..SchedulerConfig::default()
    }
}

impl Harness {
    pub fn new(monitors: Vec<Monitor>) -> Self {
        Self::with_config(test_config(), monitors)
    }

    pub fn with_config(config: SchedulerConfig, monitors: Vec<Monitor>) -> Self {
        let _ = tracing_subscriber::fmt::try_init();

        let store = Arc::new(MemoryStateStore::new());
        let queue = Arc::new(MemoryWorkQueue::new());
        let repo = Arc::new(Monitors::default());
        for monitor in monitors {
            repo.put(monitor);
        }
        let maintenances = Arc::new(Maintenances::default());
        let proxies = Arc::new(Proxies::default());
        let heartbeats = Arc::new(Heartbeats::default());

        let manager = Arc::new(ScheduleManager::new(store.clone(), repo.clone(), config.page_size));
        let elector = LeaderElector::new(store.clone(), "replica-1".to_string(), &config);
        let producer = Producer::new(
            config.clone(),
            store.clone(),
            queue.clone(),
            Ports {
                monitors: repo.clone(),
                maintenances: maintenances.clone(),
                proxies: proxies.clone(),
                heartbeats: heartbeats.clone(),
            },
            manager.clone(),
            elector.clone(),
        );

        Self {
            config,
            store,
            queue,
            monitors: repo,
            maintenances,
            proxies,
            heartbeats,
            manager,
            elector,
            producer,
        }
    }

    pub fn ports(&self) -> Ports {
        Ports {
            monitors: self.monitors.clone(),
            maintenances: self.maintenances.clone(),
            proxies: self.proxies.clone(),
            heartbeats: self.heartbeats.clone(),
        }
    }

    /// Run the elector in the background until it leads
    pub async fn lead(&self, shutdown: &CancellationToken) {
        let mut rx = self.elector.subscribe();
        tokio::spawn(self.elector.clone().run(shutdown.clone()));
        tokio::time::timeout(Duration::from_secs(2), rx.wait_for(|leader| *leader))
            .await
            .expect("replica never became leader")
            .unwrap();
    }

    /// Health-check tasks sitting on the queue for one monitor
    pub fn queued_for(&self, monitor_id: &str) -> Vec<HealthCheckTask> {
        self.queue
            .tasks()
            .into_iter()
            .filter_map(|t| HealthCheckTask::from_payload(&t.payload).ok())
            .filter(|t| t.monitor_id == monitor_id)
            .collect()
    }

    pub async fn due(&self, id: &str) -> Option<i64> {
        self.store.due_score(id).await.unwrap()
    }

    pub async fn leased(&self, id: &str) -> Option<i64> {
        self.store.lease_score(id).await.unwrap()
    }
}

/// Poll `check` until it holds or two seconds pass
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
