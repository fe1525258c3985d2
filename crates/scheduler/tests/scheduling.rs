mod common;

use chrono::{NaiveDate, TimeZone, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use common::{Harness, eventually};
use uppe_scheduler::scheduler::next_aligned;
use uppe_scheduler::{
    Event, EventBus, Maintenance, MaintenanceStrategy, Monitor, MonitorStatus, MonitorType,
    ScheduleReconciler, StateStore, WorkQueue,
};

fn monitor(id: &str, interval: i64) -> Monitor {
    Monitor::new(id, MonitorType::Http, interval)
}

#[tokio::test]
async fn first_schedule_claims_enqueues_and_reschedules() {
    let h = Harness::new(vec![monitor("A", 60)]);
    let start = h.store.time_ms().await.unwrap();

    h.manager.initialize().await.unwrap();
    let seeded = h.due("A").await.unwrap();
    assert!(seeded >= start && seeded <= h.store.time_ms().await.unwrap());

    assert_eq!(h.producer.claim_batch().await.unwrap(), 1);

    let next = h.due("A").await.expect("A rescheduled");
    assert!(next > start);
    assert!(next - start <= 61_000);
    assert_eq!(next % 60_000, 0);
    assert_eq!(h.leased("A").await, None);
    assert_eq!(h.queued_for("A").len(), 1);
}

#[tokio::test]
async fn completed_checks_run_once_per_interval() {
    let h = Harness::new(vec![monitor("A", 60)]);
    let queue = h.config.monitor_task_queue_name.clone();
    h.manager.initialize().await.unwrap();

    let mut executed = 0;
    for _ in 0..6 {
        assert_eq!(h.producer.claim_batch().await.unwrap(), 1);
        assert_eq!(h.queued_for("A").len(), 1);

        while let Some(task) = h.queue.dequeue(&queue).await.unwrap() {
            h.queue.complete(&task).await.unwrap();
            executed += 1;
        }
        assert!(h.queued_for("A").is_empty());

        h.store.advance(60_000);
        h.queue.advance(60_000);
    }
    assert_eq!(executed, 6);
}

#[tokio::test]
async fn expired_lease_is_reclaimed_and_claimed_again() {
    let h = Harness::new(vec![monitor("A", 60)]);
    h.manager.initialize().await.unwrap();

    // claim without rescheduling, as a producer that crashed would
    let now = h.store.time_ms().await.unwrap();
    let claimed = h
        .store
        .claim(now, 10, h.config.lease_ttl_ms as i64)
        .await
        .unwrap();
    assert_eq!(claimed, vec!["A".to_string()]);
    assert_eq!(h.producer.reclaim_expired().await.unwrap(), 0);

    h.store.advance(h.config.lease_ttl_ms as i64 + 1);
    assert_eq!(h.producer.reclaim_expired().await.unwrap(), 1);

    let due = h.due("A").await.unwrap();
    assert!(due <= h.store.time_ms().await.unwrap());
    assert_eq!(h.leased("A").await, None);

    let now = h.store.time_ms().await.unwrap();
    assert_eq!(h.store.claim(now, 10, 1_000).await.unwrap(), vec!["A".to_string()]);
}

#[tokio::test]
async fn interval_change_event_realigns_schedule() {
    let h = Harness::new(vec![monitor("A", 60)]);
    let shutdown = CancellationToken::new();
    h.lead(&shutdown).await;
    h.manager.initialize().await.unwrap();
    h.producer.claim_batch().await.unwrap();

    let bus = EventBus::default();
    let reconciler = Arc::new(ScheduleReconciler::new(h.manager.clone(), h.elector.clone()));
    bus.subscribe(reconciler, shutdown.clone());

    h.monitors.put(monitor("A", 30));
    let now = h.store.time_ms().await.unwrap();
    bus.publish(Event::MonitorUpdated { monitor_id: "A".into() });

    let hr = &h;
    assert!(
        eventually(|| async move { hr.manager.state().interval("A").await == Some(30) }).await,
        "interval update never applied"
    );
    let due = h.due("A").await.unwrap();
    assert!(due <= now + 30_000 + 1_000);
    assert_eq!(due % 30_000, 0);

    shutdown.cancel();
}

#[tokio::test]
async fn deleted_monitor_leaves_both_sets() {
    let h = Harness::new(vec![monitor("A", 60), monitor("B", 60)]);
    let shutdown = CancellationToken::new();
    h.manager.initialize().await.unwrap();

    let bus = EventBus::default();
    let reconciler = Arc::new(ScheduleReconciler::new(h.manager.clone(), h.elector.clone()));
    bus.subscribe(reconciler, shutdown.clone());

    h.monitors.delete("A");
    bus.publish(Event::MonitorDeleted { monitor_id: "A".into() });

    let hr = &h;
    assert!(
        eventually(|| async move { !hr.store.scheduled_ids().await.unwrap().contains("A") }).await
    );

    let now = h.store.time_ms().await.unwrap();
    let claimed = h.store.claim(now + 120_000, 100, 1_000).await.unwrap();
    assert_eq!(claimed, vec!["B".to_string()]);
    assert!(h.queued_for("A").is_empty());
    shutdown.cancel();
}

#[tokio::test]
async fn maintenance_window_marks_task_and_skips_probe() {
    let h = Harness::new(vec![monitor("A", 60)]);
    let mut window = Maintenance::new("mw", MaintenanceStrategy::Single);
    let day = NaiveDate::from_ymd_opt(2025, 3, 10).unwrap();
    window.start_datetime = Some(day.and_hms_opt(10, 0, 0).unwrap());
    window.end_datetime = Some(day.and_hms_opt(11, 0, 0).unwrap());
    window.timezone = Some("UTC".into());
    window.monitor_ids = vec!["A".into()];
    h.maintenances.0.lock().unwrap().push(window);

    let at = Utc.with_ymd_and_hms(2025, 3, 10, 10, 30, 0).unwrap().timestamp_millis();
    assert_eq!(h.producer.process_monitor("A", at).await, 60);

    let tasks = h.queued_for("A");
    assert_eq!(tasks.len(), 1);
    assert!(tasks[0].is_under_maintenance);

    let workers = uppe_scheduler::WorkerPool::new(
        Default::default(),
        h.config.monitor_task_queue_name.clone(),
        h.queue.clone(),
        h.ports(),
        uppe_scheduler::ExecutorRegistry::new(),
        EventBus::default(),
    );
    assert!(workers.run_once().await.unwrap());

    let beats = h.heartbeats.for_monitor("A");
    assert_eq!(beats.len(), 1);
    assert_eq!(beats[0].status, MonitorStatus::Maintenance);
    assert_eq!(beats[0].ping_ms, 0);

    let after = Utc.with_ymd_and_hms(2025, 3, 10, 11, 30, 0).unwrap().timestamp_millis();
    h.queue.advance(121_000);
    h.producer.process_monitor("A", after).await;
    let latest = h.queued_for("A");
    assert_eq!(latest.len(), 1);
    assert!(!latest[0].is_under_maintenance);
}

#[tokio::test]
async fn concurrent_claims_enqueue_once_and_reschedule_once() {
    let h = Harness::new(vec![monitor("A", 60)]);
    h.manager.initialize().await.unwrap();

    let now = h.store.time_ms().await.unwrap();
    let claimed = h.store.claim(now, 10, 60_000).await.unwrap();
    assert_eq!(claimed.len(), 1);

    let (first, second) = tokio::join!(
        h.producer.process_monitor("A", now),
        h.producer.process_monitor("A", now)
    );
    assert_eq!((first, second), (60, 60));
    assert_eq!(h.queue.stats("healthcheck").await.unwrap().pending, 1);

    let next = next_aligned(now, 60);
    let moved = h
        .store
        .reschedule(&[("A".to_string(), next), ("A".to_string(), next)])
        .await
        .unwrap();
    assert_eq!(moved, 1);
    assert_eq!(h.due("A").await, Some(next));
    assert_eq!(h.store.counts().await.unwrap().due, 1);
}

#[tokio::test]
async fn non_positive_interval_never_scheduled() {
    let h = Harness::new(vec![monitor("zero", 0), monitor("neg", -30)]);
    h.manager.initialize().await.unwrap();
    h.manager.refresh_all().await.unwrap();
    assert!(h.store.scheduled_ids().await.unwrap().is_empty());
    assert!(h.manager.schedule_monitor("zero", 0).await.is_err());
}

#[tokio::test]
async fn missing_or_inactive_monitor_is_not_rescheduled() {
    let mut paused = monitor("P", 60);
    paused.active = false;
    let h = Harness::new(vec![paused]);
    let now = h.store.time_ms().await.unwrap();

    assert_eq!(h.producer.process_monitor("P", now).await, 0);
    assert_eq!(h.producer.process_monitor("ghost", now).await, 0);
    assert!(h.queue.tasks().is_empty());
}

#[tokio::test]
async fn refresh_is_idempotent() {
    let h = Harness::new(vec![monitor("A", 60), monitor("B", 120)]);
    h.manager.initialize().await.unwrap();
    let before = (h.due("A").await, h.due("B").await);

    assert!(h.manager.refresh_all().await.unwrap().is_noop());
    assert!(h.manager.refresh_all().await.unwrap().is_noop());
    assert_eq!((h.due("A").await, h.due("B").await), before);
}

#[tokio::test]
async fn missing_proxy_does_not_block_probe() {
    let mut m = monitor("A", 60);
    m.proxy_id = Some("gone".into());
    let h = Harness::new(vec![m]);
    let now = h.store.time_ms().await.unwrap();

    assert_eq!(h.producer.process_monitor("A", now).await, 60);
    let tasks = h.queued_for("A");
    assert_eq!(tasks.len(), 1);
    assert!(tasks[0].proxy.is_none());
}

#[tokio::test]
async fn leader_runs_loops_end_to_end() {
    let h = Harness::new(vec![monitor("A", 1)]);
    let shutdown = CancellationToken::new();
    let elector = tokio::spawn(h.elector.clone().run(shutdown.clone()));
    let producer = tokio::spawn(h.producer.clone().run(shutdown.clone()));

    let hr = &h;
    assert!(eventually(|| async move { !hr.queued_for("A").is_empty() }).await);
    assert!(h.due("A").await.is_some() || h.leased("A").await.is_some());

    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(2), async {
        producer.await.unwrap();
        elector.await.unwrap();
    })
    .await
    .expect("producer did not stop");
    assert_eq!(h.store.current_leader().await.unwrap(), None);
}
