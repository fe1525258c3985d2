use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use super::leader::LeaderElector;
use super::manager::ScheduleManager;
use crate::events::{Event, EventHandler};

/// Applies monitor lifecycle events to the schedule right away instead of
/// waiting for the next refresh.
///
/// Creates and updates only touch the schedule on the leader; deletes are
/// applied on every replica since removal is idempotent.
pub struct ScheduleReconciler {
    manager: Arc<ScheduleManager>,
    elector: Arc<LeaderElector>,
}

impl ScheduleReconciler {
    pub fn new(manager: Arc<ScheduleManager>, elector: Arc<LeaderElector>) -> Self {
        Self { manager, elector }
    }
}

#[async_trait]
impl EventHandler for ScheduleReconciler {
    fn name(&self) -> &str {
        "schedule-reconciler"
    }

    async fn handle(&self, event: &Event) -> anyhow::Result<()> {
        match event {
            Event::MonitorCreated { monitor_id } => {
                if self.elector.is_leader() {
                    self.manager.add_monitor(monitor_id).await?;
                } else {
                    debug!("Not leader, leaving new monitor {} to the leader", monitor_id);
                }
            }
            Event::MonitorUpdated { monitor_id } => {
                if self.elector.is_leader() {
                    self.manager.update_monitor(monitor_id).await?;
                }
            }
            Event::MonitorDeleted { monitor_id } => {
                self.manager.remove_monitor(monitor_id).await?;
            }
            Event::MonitorStatusChanged { .. } => {}
        }
        Ok(())
    }
}
