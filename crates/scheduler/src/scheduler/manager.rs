use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info};

use super::align::next_aligned;
use super::state::SchedulerState;
use crate::error::{Error, Result};
use crate::model::Monitor;
use crate::repository::MonitorRepository;
use crate::store::StateStore;

/// What one refresh pass changed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RefreshReport {
    pub added: usize,
    pub rescheduled: usize,
    pub removed: usize,
}

impl RefreshReport {
    pub fn is_noop(&self) -> bool {
        self.added == 0 && self.rescheduled == 0 && self.removed == 0
    }
}

/// Keeps the due/lease sets in line with the monitor repository
pub struct ScheduleManager {
    store: Arc<dyn StateStore>,
    monitors: Arc<dyn MonitorRepository>,
    state: SchedulerState,
    page_size: usize,
}

impl ScheduleManager {
    pub fn new(
        store: Arc<dyn StateStore>,
        monitors: Arc<dyn MonitorRepository>,
        page_size: usize,
    ) -> Self {
        Self {
            store,
            monitors,
            state: SchedulerState::new(),
            page_size: page_size.max(1),
        }
    }

    pub fn state(&self) -> &SchedulerState {
        &self.state
    }

    /// Every active monitor with a positive interval, page by page
    async fn schedulable_monitors(&self) -> Result<Vec<Monitor>> {
        let mut monitors = Vec::new();
        let mut page = 0;
        loop {
            let batch = self
                .monitors
                .find_active_paginated(page, self.page_size)
                .await?;
            let done = batch.len() < self.page_size;
            monitors.extend(batch.into_iter().filter(Monitor::is_schedulable));
            if done {
                break;
            }
            page += 1;
        }
        Ok(monitors)
    }

    /// Build the interval cache and seed the due set on leadership.
    ///
    /// Monitors absent from both sets become due immediately, existing
    /// entries are left alone and entries without an active monitor are
    /// dropped.
    pub async fn initialize(&self) -> Result<RefreshReport> {
        let now = self.store.time_ms().await?;
        let existing = self.store.scheduled_ids().await?;
        let monitors = self.schedulable_monitors().await?;

        let intervals: HashMap<String, i64> = monitors
            .iter()
            .map(|m| (m.id.clone(), m.interval_seconds))
            .collect();
        let fresh: Vec<String> = intervals
            .keys()
            .filter(|id| !existing.contains(*id))
            .cloned()
            .collect();
        let stale: Vec<String> = existing
            .iter()
            .filter(|id| !intervals.contains_key(*id))
            .cloned()
            .collect();

        let added = self.store.schedule_if_absent(&fresh, now).await?;
        let removed = self.store.remove(&stale).await?;
        self.state.replace(intervals).await;

        info!(
            "Schedule initialized: {} monitors, {} newly due, {} stale removed",
            self.state.len().await,
            added,
            removed
        );
        Ok(RefreshReport {
            added,
            rescheduled: 0,
            removed,
        })
    }

    /// Reconcile the schedule with the repository.
    ///
    /// Unchanged monitors cause no state store writes, so back-to-back
    /// refreshes with the same inputs are free.
    pub async fn refresh_all(&self) -> Result<RefreshReport> {
        let now = self.store.time_ms().await?;
        let monitors = self.schedulable_monitors().await?;

        let mut current = HashSet::with_capacity(monitors.len());
        let mut resets = Vec::new();
        let mut report = RefreshReport::default();

        for monitor in &monitors {
            current.insert(monitor.id.clone());
            match self.state.interval(&monitor.id).await {
                None => {
                    resets.push((monitor.id.clone(), now));
                    report.added += 1;
                }
                Some(previous) if previous != monitor.interval_seconds => {
                    resets.push((
                        monitor.id.clone(),
                        next_aligned(now, monitor.interval_seconds),
                    ));
                    report.rescheduled += 1;
                }
                Some(_) => {}
            }
        }

        let gone: Vec<String> = self
            .state
            .ids()
            .await
            .into_iter()
            .filter(|id| !current.contains(id))
            .collect();

        // Cache follows the store, never the other way round
        self.store.reset(&resets).await?;
        report.removed = self.store.remove(&gone).await?;

        for monitor in &monitors {
            self.state.set(&monitor.id, monitor.interval_seconds).await;
        }
        for id in &gone {
            self.state.remove(id).await;
        }

        if report.is_noop() {
            debug!("Schedule refresh: no changes across {} monitors", current.len());
        } else {
            info!(
                "Schedule refresh: {} added, {} rescheduled, {} removed",
                report.added, report.rescheduled, report.removed
            );
        }
        Ok(report)
    }

    /// Schedule a newly created monitor
    pub async fn add_monitor(&self, id: &str) -> Result<()> {
        self.update_monitor(id).await
    }

    /// Bring one monitor's schedule in line with the repository
    pub async fn update_monitor(&self, id: &str) -> Result<()> {
        let monitor = match self.monitors.find_by_id(id).await? {
            Some(monitor) if monitor.is_schedulable() => monitor,
            _ => return self.remove_monitor(id).await,
        };

        let now = self.store.time_ms().await?;
        let interval = monitor.interval_seconds;
        match self.state.interval(id).await {
            None => {
                debug!("Scheduling new monitor {} every {}s", id, interval);
                self.store.reset(&[(id.to_string(), now)]).await?;
            }
            Some(previous) if previous != interval => {
                debug!("Monitor {} interval {}s -> {}s", id, previous, interval);
                self.store
                    .reset(&[(id.to_string(), next_aligned(now, interval))])
                    .await?;
            }
            Some(_) => {
                self.store.schedule_if_absent(&[id.to_string()], now).await?;
            }
        }
        self.state.set(id, interval).await;
        Ok(())
    }

    /// Drop a monitor from both sets and the cache
    pub async fn remove_monitor(&self, id: &str) -> Result<()> {
        self.unschedule_monitor(id).await
    }

    /// Place a monitor in the due set unless it is already scheduled
    pub async fn schedule_monitor(&self, id: &str, interval: i64) -> Result<()> {
        if interval <= 0 {
            return Err(Error::InvalidInterval {
                monitor_id: id.to_string(),
                interval,
            });
        }
        let now = self.store.time_ms().await?;
        self.store.schedule_if_absent(&[id.to_string()], now).await?;
        self.state.set(id, interval).await;
        Ok(())
    }

    pub async fn unschedule_monitor(&self, id: &str) -> Result<()> {
        let removed = self.store.remove(&[id.to_string()]).await?;
        self.state.remove(id).await;
        if removed > 0 {
            debug!("Unscheduled monitor {}", id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStateStore, ScheduleCounts};
    use crate::testing::FakeMonitors;
    use crate::model::MonitorType;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Memory store whose next reset/remove fails once when armed
    struct FlakyStore {
        inner: MemoryStateStore,
        fail_next: AtomicBool,
    }

    impl FlakyStore {
        fn trip(&self) -> Result<()> {
            if self.fail_next.swap(false, Ordering::SeqCst) {
                return Err(Error::Store("connection reset".into()));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl StateStore for FlakyStore {
        async fn time_ms(&self) -> Result<i64> {
            self.inner.time_ms().await
        }
        async fn claim(&self, now_ms: i64, max: usize, lease_ttl_ms: i64) -> Result<Vec<String>> {
            self.inner.claim(now_ms, max, lease_ttl_ms).await
        }
        async fn reschedule(&self, entries: &[(String, i64)]) -> Result<usize> {
            self.inner.reschedule(entries).await
        }
        async fn reclaim(&self, now_ms: i64, max: usize) -> Result<Vec<String>> {
            self.inner.reclaim(now_ms, max).await
        }
        async fn schedule_if_absent(&self, ids: &[String], due_ms: i64) -> Result<usize> {
            self.inner.schedule_if_absent(ids, due_ms).await
        }
        async fn reset(&self, entries: &[(String, i64)]) -> Result<()> {
            self.trip()?;
            self.inner.reset(entries).await
        }
        async fn remove(&self, ids: &[String]) -> Result<usize> {
            self.trip()?;
            self.inner.remove(ids).await
        }
        async fn scheduled_ids(&self) -> Result<HashSet<String>> {
            self.inner.scheduled_ids().await
        }
        async fn due_score(&self, id: &str) -> Result<Option<i64>> {
            self.inner.due_score(id).await
        }
        async fn lease_score(&self, id: &str) -> Result<Option<i64>> {
            self.inner.lease_score(id).await
        }
        async fn counts(&self) -> Result<ScheduleCounts> {
            self.inner.counts().await
        }
        async fn try_acquire_leader(&self, replica_id: &str, ttl_ms: u64) -> Result<bool> {
            self.inner.try_acquire_leader(replica_id, ttl_ms).await
        }
        async fn renew_leader(&self, replica_id: &str, ttl_ms: u64) -> Result<bool> {
            self.inner.renew_leader(replica_id, ttl_ms).await
        }
        async fn release_leader(&self, replica_id: &str) -> Result<bool> {
            self.inner.release_leader(replica_id).await
        }
        async fn current_leader(&self) -> Result<Option<String>> {
            self.inner.current_leader().await
        }
    }

    fn setup(monitors: Vec<Monitor>) -> (Arc<MemoryStateStore>, Arc<FakeMonitors>, ScheduleManager) {
        let store = Arc::new(MemoryStateStore::new());
        let repo = Arc::new(FakeMonitors::with(monitors));
        let manager = ScheduleManager::new(store.clone(), repo.clone(), 2);
        (store, repo, manager)
    }

    #[tokio::test]
    async fn initialize_seeds_new_and_drops_stale() {
        let (store, _repo, manager) = setup(vec![
            Monitor::new("a", MonitorType::Http, 60),
            Monitor::new("b", MonitorType::Http, 30),
            Monitor::new("c", MonitorType::Tcp, 10),
        ]);
        store.reset(&[("a".to_string(), 5), ("ghost".to_string(), 5)]).await.unwrap();

        let report = manager.initialize().await.unwrap();
        assert_eq!(report.added, 2);
        assert_eq!(report.removed, 1);
        assert_eq!(store.due_score("a").await.unwrap(), Some(5));
        assert!(store.due_score("b").await.unwrap().is_some());
        assert!(!store.scheduled_ids().await.unwrap().contains("ghost"));
        assert_eq!(manager.state().len().await, 3);
    }

    #[tokio::test]
    async fn initialize_skips_inactive_and_non_positive_intervals() {
        let mut paused = Monitor::new("paused", MonitorType::Http, 60);
        paused.active = false;
        let (store, _repo, manager) = setup(vec![
            paused,
            Monitor::new("zero", MonitorType::Http, 0),
            Monitor::new("neg", MonitorType::Http, -5),
        ]);

        manager.initialize().await.unwrap();
        assert!(store.scheduled_ids().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn refresh_twice_is_idempotent() {
        let (store, repo, manager) = setup(vec![Monitor::new("a", MonitorType::Http, 60)]);
        manager.initialize().await.unwrap();
        let before = store.due_score("a").await.unwrap();

        assert!(manager.refresh_all().await.unwrap().is_noop());
        assert!(manager.refresh_all().await.unwrap().is_noop());
        assert_eq!(store.due_score("a").await.unwrap(), before);

        repo.upsert(Monitor::new("b", MonitorType::Http, 60));
        let report = manager.refresh_all().await.unwrap();
        assert_eq!(report.added, 1);
    }

    #[tokio::test]
    async fn refresh_realigns_changed_interval_and_drops_deleted() {
        let (store, repo, manager) = setup(vec![
            Monitor::new("a", MonitorType::Http, 60),
            Monitor::new("b", MonitorType::Http, 60),
        ]);
        manager.initialize().await.unwrap();

        repo.upsert(Monitor::new("a", MonitorType::Http, 30));
        repo.delete("b");
        let report = manager.refresh_all().await.unwrap();
        assert_eq!(report.rescheduled, 1);
        assert_eq!(report.removed, 1);

        let due = store.due_score("a").await.unwrap().unwrap();
        assert_eq!(due % 30_000, 0);
        assert_eq!(store.due_score("b").await.unwrap(), None);
    }

    #[tokio::test]
    async fn schedule_monitor_rejects_non_positive_interval() {
        let (store, _repo, manager) = setup(vec![]);
        let err = manager.schedule_monitor("a", 0).await.unwrap_err();
        assert!(matches!(err, Error::InvalidInterval { interval: 0, .. }));
        assert!(store.scheduled_ids().await.unwrap().is_empty());

        manager.schedule_monitor("a", 60).await.unwrap();
        assert!(store.due_score("a").await.unwrap().is_some());
        manager.unschedule_monitor("a").await.unwrap();
        assert!(store.scheduled_ids().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn update_monitor_removes_paused_monitor() {
        let (store, repo, manager) = setup(vec![Monitor::new("a", MonitorType::Http, 60)]);
        manager.initialize().await.unwrap();

        let mut paused = Monitor::new("a", MonitorType::Http, 60);
        paused.active = false;
        repo.upsert(paused);
        manager.update_monitor("a").await.unwrap();
        assert!(store.scheduled_ids().await.unwrap().is_empty());
        assert_eq!(manager.state().interval("a").await, None);
    }

    #[tokio::test]
    async fn failed_store_write_is_retried_by_next_refresh() {
        let store = Arc::new(FlakyStore {
            inner: MemoryStateStore::new(),
            fail_next: AtomicBool::new(false),
        });
        let repo = Arc::new(FakeMonitors::with(vec![
            Monitor::new("a", MonitorType::Http, 60),
            Monitor::new("b", MonitorType::Http, 60),
        ]));
        let manager = ScheduleManager::new(store.clone(), repo.clone(), 2);
        manager.initialize().await.unwrap();

        repo.upsert(Monitor::new("a", MonitorType::Http, 30));
        repo.delete("b");
        store.fail_next.store(true, Ordering::SeqCst);
        assert!(manager.refresh_all().await.is_err());
        assert_eq!(manager.state().interval("a").await, Some(60));
        assert_eq!(manager.state().interval("b").await, Some(60));

        let report = manager.refresh_all().await.unwrap();
        assert_eq!(report.rescheduled, 1);
        assert_eq!(report.removed, 1);
        assert_eq!(store.due_score("a").await.unwrap().unwrap() % 30_000, 0);
        assert_eq!(store.due_score("b").await.unwrap(), None);
        assert_eq!(manager.state().interval("a").await, Some(30));
        assert_eq!(manager.state().interval("b").await, None);
    }

    #[tokio::test]
    async fn failed_update_leaves_cache_untouched() {
        let store = Arc::new(FlakyStore {
            inner: MemoryStateStore::new(),
            fail_next: AtomicBool::new(false),
        });
        let repo = Arc::new(FakeMonitors::with(vec![Monitor::new("a", MonitorType::Http, 60)]));
        let manager = ScheduleManager::new(store.clone(), repo.clone(), 2);
        manager.initialize().await.unwrap();

        repo.upsert(Monitor::new("a", MonitorType::Http, 30));
        store.fail_next.store(true, Ordering::SeqCst);
        assert!(manager.update_monitor("a").await.is_err());
        assert_eq!(manager.state().interval("a").await, Some(60));

        manager.update_monitor("a").await.unwrap();
        assert_eq!(manager.state().interval("a").await, Some(30));
        assert_eq!(store.due_score("a").await.unwrap().unwrap() % 30_000, 0);
    }
}
