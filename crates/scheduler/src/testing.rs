//! In-memory port fakes shared by unit tests.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::model::{Heartbeat, Maintenance, Monitor, MonitorPatch, Proxy};
use crate::repository::{HeartbeatService, MaintenanceService, MonitorRepository, Ports, ProxyService};

#[derive(Default)]
pub struct FakeMonitors {
    monitors: Mutex<BTreeMap<String, Monitor>>,
    /// Number of `update_partial` calls
    pub updates: AtomicUsize,
}

impl FakeMonitors {
    pub fn with(monitors: Vec<Monitor>) -> Self {
        let fake = Self::default();
        for monitor in monitors {
            fake.upsert(monitor);
        }
        fake
    }

    pub fn upsert(&self, monitor: Monitor) {
        self.monitors.lock().unwrap().insert(monitor.id.clone(), monitor);
    }

    pub fn delete(&self, id: &str) {
        self.monitors.lock().unwrap().remove(id);
    }

    pub fn get(&self, id: &str) -> Option<Monitor> {
        self.monitors.lock().unwrap().get(id).cloned()
    }
}

#[async_trait]
impl MonitorRepository for FakeMonitors {
    async fn find_by_id(&self, id: &str) -> Result<Option<Monitor>> {
        Ok(self.get(id))
    }

    async fn find_active_paginated(&self, page: usize, limit: usize) -> Result<Vec<Monitor>> {
        Ok(self
            .monitors
            .lock()
            .unwrap()
            .values()
            .filter(|m| m.active)
            .skip(page * limit)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn update_partial(&self, id: &str, patch: &MonitorPatch) -> Result<Option<Monitor>> {
        self.updates.fetch_add(1, Ordering::SeqCst);
        let mut monitors = self.monitors.lock().unwrap();
        Ok(monitors.get_mut(id).map(|m| {
            patch.apply(m);
            m.clone()
        }))
    }

    async fn find_one_by_push_token(&self, token: &str) -> Result<Option<Monitor>> {
        Ok(self
            .monitors
            .lock()
            .unwrap()
            .values()
            .find(|m| m.push_token.as_deref() == Some(token))
            .cloned())
    }

    async fn find_by_proxy_id(&self, proxy_id: &str) -> Result<Vec<Monitor>> {
        Ok(self
            .monitors
            .lock()
            .unwrap()
            .values()
            .filter(|m| m.proxy_id.as_deref() == Some(proxy_id))
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct FakeMaintenances {
    pub maintenances: Mutex<Vec<Maintenance>>,
}

#[async_trait]
impl MaintenanceService for FakeMaintenances {
    async fn get_maintenances_by_monitor_id(&self, monitor_id: &str) -> Result<Vec<Maintenance>> {
        Ok(self
            .maintenances
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.monitor_ids.iter().any(|id| id == monitor_id))
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct FakeProxies {
    pub proxies: Mutex<BTreeMap<String, Proxy>>,
}

#[async_trait]
impl ProxyService for FakeProxies {
    async fn find_by_id(&self, id: &str) -> Result<Option<Proxy>> {
        Ok(self.proxies.lock().unwrap().get(id).cloned())
    }
}

#[derive(Default)]
pub struct FakeHeartbeats {
    pub heartbeats: Mutex<Vec<Heartbeat>>,
}

impl FakeHeartbeats {
    pub fn for_monitor(&self, monitor_id: &str) -> Vec<Heartbeat> {
        self.heartbeats
            .lock()
            .unwrap()
            .iter()
            .filter(|h| h.monitor_id == monitor_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl HeartbeatService for FakeHeartbeats {
    async fn create(&self, heartbeat: &Heartbeat) -> Result<Heartbeat> {
        let mut stored = heartbeat.clone();
        let mut heartbeats = self.heartbeats.lock().unwrap();
        stored.id = Some(format!("hb-{}", heartbeats.len() + 1));
        heartbeats.push(stored.clone());
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
        let mut heartbeats = self.heartbeats.lock().unwrap();
        let before = heartbeats.len();
        heartbeats.retain(|h| h.monitor_id != monitor_id);
        Ok((before - heartbeats.len()) as u64)
    }
}

pub struct FakePorts {
    pub monitors: Arc<FakeMonitors>,
    pub maintenances: Arc<FakeMaintenances>,
    pub proxies: Arc<FakeProxies>,
    pub heartbeats: Arc<FakeHeartbeats>,
}

impl FakePorts {
    pub fn new(monitors: Vec<Monitor>) -> Self {
        Self {
            monitors: Arc::new(FakeMonitors::with(monitors)),
            maintenances: Arc::default(),
            proxies: Arc::default(),
            heartbeats: Arc::default(),
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
}
