//! Folds `MonitorStatusChanged` events back into the monitor rows.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::config::StatusConfig;
use crate::events::{Event, EventHandler};
use crate::model::{MonitorPatch, MonitorStatus};
use crate::repository::MonitorRepository;

struct Inner {
    monitors: Arc<dyn MonitorRepository>,
    debounce: Duration,
    /// Latest status per monitor waiting for its debounce window to close
    pending: Mutex<HashMap<String, MonitorStatus>>,
}

impl Inner {
    /// Write the status unless the stored one already matches
    async fn apply(&self, monitor_id: &str, status: MonitorStatus) -> anyhow::Result<bool> {
        let Some(monitor) = self.monitors.find_by_id(monitor_id).await? else {
            debug!("Status for unknown monitor {} dropped", monitor_id);
            return Ok(false);
        };
        if monitor.status == status {
            return Ok(false);
        }
        self.monitors
            .update_partial(monitor_id, &MonitorPatch::status(status))
            .await?;
        debug!("Monitor {} status {} -> {}", monitor_id, monitor.status, status);
        Ok(true)
    }
}

/// Coalesces bursts of status events per monitor over a short window and
/// writes only the last one.
#[derive(Clone)]
pub struct StatusReconciler {
    inner: Arc<Inner>,
}

impl StatusReconciler {
    pub fn new(monitors: Arc<dyn MonitorRepository>, config: &StatusConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                monitors,
                debounce: config.debounce(),
                pending: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Apply everything still waiting, returns how many rows changed
    pub async fn flush(&self) -> usize {
        let drained: Vec<(String, MonitorStatus)> =
            self.inner.pending.lock().await.drain().collect();
        let mut changed = 0;
        for (monitor_id, status) in drained {
            match self.inner.apply(&monitor_id, status).await {
                Ok(true) => changed += 1,
                Ok(false) => {}
                Err(e) => warn!("Failed to update status of {}: {:#}", monitor_id, e),
            }
        }
        changed
    }
}

#[async_trait]
impl EventHandler for StatusReconciler {
    fn name(&self) -> &str {
        "status-reconciler"
    }

    async fn handle(&self, event: &Event) -> anyhow::Result<()> {
        let Event::MonitorStatusChanged { monitor_id, status, .. } = event else {
            return Ok(());
        };

        if self.inner.debounce.is_zero() {
            self.inner.apply(monitor_id, *status).await?;
            return Ok(());
        }

        let first = self
            .inner
            .pending
            .lock()
            .await
            .insert(monitor_id.clone(), *status)
            .is_none();
        if first {
            let inner = self.inner.clone();
            let monitor_id = monitor_id.clone();
            tokio::spawn(async move {
                tokio::time::sleep(inner.debounce).await;
                let latest = inner.pending.lock().await.remove(&monitor_id);
                if let Some(status) = latest {
                    if let Err(e) = inner.apply(&monitor_id, status).await {
                        warn!("Failed to update status of {}: {:#}", monitor_id, e);
                    }
                }
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Monitor, MonitorType};
    use crate::testing::FakeMonitors;
    use std::sync::atomic::Ordering;

    fn changed(id: &str, status: MonitorStatus) -> Event {
        Event::MonitorStatusChanged {
            monitor_id: id.into(),
            status,
            previous: MonitorStatus::Pending,
        }
    }

    #[tokio::test]
    async fn applies_immediately_without_debounce() {
        let repo = Arc::new(FakeMonitors::with(vec![Monitor::new("m", MonitorType::Http, 60)]));
        let reconciler = StatusReconciler::new(repo.clone(), &StatusConfig { debounce_ms: 0 });

        reconciler.handle(&changed("m", MonitorStatus::Up)).await.unwrap();
        assert_eq!(repo.get("m").unwrap().status, MonitorStatus::Up);

        // same status again is a no-op
        reconciler.handle(&changed("m", MonitorStatus::Up)).await.unwrap();
        assert_eq!(repo.updates.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn burst_is_coalesced_into_last_status() {
        let repo = Arc::new(FakeMonitors::with(vec![Monitor::new("m", MonitorType::Http, 60)]));
        let reconciler = StatusReconciler::new(repo.clone(), &StatusConfig { debounce_ms: 30 });

        reconciler.handle(&changed("m", MonitorStatus::Down)).await.unwrap();
        reconciler.handle(&changed("m", MonitorStatus::Up)).await.unwrap();
        reconciler.handle(&changed("m", MonitorStatus::Down)).await.unwrap();

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(repo.get("m").unwrap().status, MonitorStatus::Down);
        assert_eq!(repo.updates.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn flush_applies_pending_statuses() {
        let repo = Arc::new(FakeMonitors::with(vec![Monitor::new("m", MonitorType::Http, 60)]));
        let reconciler = StatusReconciler::new(repo.clone(), &StatusConfig { debounce_ms: 60_000 });

        reconciler.handle(&changed("m", MonitorStatus::Up)).await.unwrap();
        reconciler.handle(&Event::MonitorDeleted { monitor_id: "m".into() }).await.unwrap();
        assert_eq!(reconciler.flush().await, 1);
        assert_eq!(repo.get("m").unwrap().status, MonitorStatus::Up);
    }
}
