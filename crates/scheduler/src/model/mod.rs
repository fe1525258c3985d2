//! Domain model shared by the producer, the workers and the adapters.

pub mod heartbeat;
pub mod maintenance;
pub mod monitor;
pub mod proxy;
pub mod task;

pub use heartbeat::Heartbeat;
pub use maintenance::{Maintenance, MaintenanceStrategy};
pub use monitor::{Monitor, MonitorPatch, MonitorStatus, MonitorType};
pub use proxy::Proxy;
pub use task::HealthCheckTask;
