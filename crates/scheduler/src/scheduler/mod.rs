//! Producer side of the scheduler: leader election, schedule bookkeeping,
//! the claim/reclaim/refresh loops and event-driven reconciliation.

pub mod align;
pub mod leader;
pub mod manager;
pub mod producer;
pub mod reconcile;
pub mod state;

pub use align::next_aligned;
pub use leader::LeaderElector;
pub use manager::{RefreshReport, ScheduleManager};
pub use producer::Producer;
pub use reconcile::ScheduleReconciler;
pub use state::SchedulerState;
