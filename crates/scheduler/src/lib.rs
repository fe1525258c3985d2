//! Uppe scheduler - distributed probe scheduling for uptime monitors
//!
//! This library decides which monitor is due, hands exactly one probe
//! attempt per due time to one worker across a fleet of replicas, and
//! recovers from crashed producers through leased claims.
//!
//! ## Components
//!
//! - [`store`]: shared due/lease sets, leader lock, atomic scripts
//! - [`queue`]: unique-key work queue with visibility timeouts
//! - [`maintenance`]: maintenance window evaluation
//! - [`scheduler`]: producer, leader election and schedule reconciliation
//! - [`worker`]: stateless health-check consumers
//! - [`events`]: in-process domain event bus
//! - [`status`]: monitor status aggregation

pub mod config;
pub mod error;
pub mod events;
pub mod maintenance;
pub mod model;
pub mod queue;
pub mod repository;
pub mod scheduler;
pub mod status;
pub mod store;
pub mod worker;

#[cfg(test)]
mod testing;

pub use config::{SchedulerConfig, StatusConfig, WorkerConfig};
pub use error::{Error, Result};
pub use events::{Event, EventBus, EventHandler};
pub use model::{
    HealthCheckTask, Heartbeat, Maintenance, MaintenanceStrategy, Monitor, MonitorPatch,
    MonitorStatus, MonitorType, Proxy,
};
pub use queue::{EnqueueOptions, MemoryWorkQueue, QueuedTask, RedisWorkQueue, WorkQueue};
pub use repository::{
    HeartbeatService, MaintenanceService, MonitorRepository, Ports, ProxyService,
};
pub use scheduler::{LeaderElector, Producer, ScheduleManager, ScheduleReconciler};
pub use status::StatusReconciler;
pub use store::{MemoryStateStore, RedisStateStore, StateStore};
pub use worker::{ExecutorRegistry, ProbeExecutor, ProbeReport, WorkerPool};

/// Task type name used for health-check tasks on the work queue
pub const HEALTHCHECK_TASK_TYPE: &str = "monitor:healthcheck";
