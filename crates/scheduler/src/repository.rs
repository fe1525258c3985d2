//! Ports the scheduling core consumes.
//!
//! Persistence lives outside this crate; adapters implement these traits
//! and tests swap in in-memory versions.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::maintenance;
use crate::model::{Heartbeat, Maintenance, Monitor, MonitorPatch, Proxy};

/// Read/write access to monitor definitions
#[async_trait]
pub trait MonitorRepository: Send + Sync {
    async fn find_by_id(&self, id: &str) -> Result<Option<Monitor>>;

    /// Active monitors ordered by id, `page` is zero-based
    async fn find_active_paginated(&self, page: usize, limit: usize) -> Result<Vec<Monitor>>;

    async fn update_partial(&self, id: &str, patch: &MonitorPatch) -> Result<Option<Monitor>>;

    async fn find_one_by_push_token(&self, token: &str) -> Result<Option<Monitor>>;

    async fn find_by_proxy_id(&self, proxy_id: &str) -> Result<Vec<Monitor>>;
}

/// Maintenance lookups for a monitor
#[async_trait]
pub trait MaintenanceService: Send + Sync {
    async fn get_maintenances_by_monitor_id(&self, monitor_id: &str) -> Result<Vec<Maintenance>>;

    /// True when any linked maintenance is in effect at `now`
    async fn is_under_maintenance(&self, monitor_id: &str, now: DateTime<Utc>) -> Result<bool> {
        let maintenances = self.get_maintenances_by_monitor_id(monitor_id).await?;
        Ok(maintenances.iter().any(|m| maintenance::is_under_maintenance(m, now)))
    }
}

#[async_trait]
pub trait ProxyService: Send + Sync {
    async fn find_by_id(&self, id: &str) -> Result<Option<Proxy>>;
}

#[async_trait]
pub trait HeartbeatService: Send + Sync {
    async fn create(&self, heartbeat: &Heartbeat) -> Result<Heartbeat>;

    /// Newest first; `page` is zero-based
    async fn find_by_monitor_id_paginated(
        &self,
        monitor_id: &str,
        limit: usize,
        page: usize,
    ) -> Result<Vec<Heartbeat>>;

    async fn delete_by_monitor_id(&self, monitor_id: &str) -> Result<u64>;

    /// Most recent heartbeat for a monitor
    async fn latest(&self, monitor_id: &str) -> Result<Option<Heartbeat>> {
        Ok(self.find_by_monitor_id_paginated(monitor_id, 1, 0).await?.into_iter().next())
    }
}

/// Bundle of ports handed to the producer and the workers
#[derive(Clone)]
pub struct Ports {
    pub monitors: Arc<dyn MonitorRepository>,
    pub maintenances: Arc<dyn MaintenanceService>,
    pub proxies: Arc<dyn ProxyService>,
    pub heartbeats: Arc<dyn HeartbeatService>,
}
