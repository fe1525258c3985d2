//! Shared state store holding the due set, the lease set and the leader lock.
//!
//! Every mutation that moves an entry between the due and lease sets runs as
//! one atomic operation (a server-side script on Redis), so concurrent
//! producers can neither claim the same entry twice nor double-reschedule.
//! A monitor id is in at most one of the two sets at any instant.

pub mod memory;
pub mod redis;

pub use memory::MemoryStateStore;
pub use self::redis::RedisStateStore;

use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashSet;

use crate::error::Result;

/// Sorted set of monitor ids scored by due time (ms)
pub const DUE_KEY: &str = "sched:due";
/// Sorted set of monitor ids scored by lease expiry (ms)
pub const LEASE_KEY: &str = "sched:lease";
/// Leader lock, value = replica id
pub const LEADER_KEY: &str = "sched:leader";

/// Sizes of the two schedule sets
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScheduleCounts {
    pub due: u64,
    pub lease: u64,
}

#[async_trait]
pub trait StateStore: Send + Sync {
    /// Store clock in ms, preferred over the local clock to resist skew
    async fn time_ms(&self) -> Result<i64>;

    /// `CLAIM`: move up to `max` due entries with score <= `now_ms` into the
    /// lease set with score `now_ms + lease_ttl_ms`
    async fn claim(&self, now_ms: i64, max: usize, lease_ttl_ms: i64) -> Result<Vec<String>>;

    /// `RESCHED`: for each leased id, move it back to due at the given score.
    /// Ids no longer leased are skipped. Returns how many moved.
    async fn reschedule(&self, entries: &[(String, i64)]) -> Result<usize>;

    /// `RECLAIM`: move up to `max` expired leases back to due, keeping the
    /// lease score as due time
    async fn reclaim(&self, now_ms: i64, max: usize) -> Result<Vec<String>>;

    /// Add ids to due at `due_ms` when they are in neither set
    async fn schedule_if_absent(&self, ids: &[String], due_ms: i64) -> Result<usize>;

    /// Drop any lease and (re)place each id in due at its score
    async fn reset(&self, entries: &[(String, i64)]) -> Result<()>;

    /// Remove ids from both sets
    async fn remove(&self, ids: &[String]) -> Result<usize>;

    /// Every id in either set
    async fn scheduled_ids(&self) -> Result<HashSet<String>>;

    async fn due_score(&self, id: &str) -> Result<Option<i64>>;

    async fn lease_score(&self, id: &str) -> Result<Option<i64>>;

    async fn counts(&self) -> Result<ScheduleCounts>;

    /// Take the leader lock if nobody holds it
    async fn try_acquire_leader(&self, replica_id: &str, ttl_ms: u64) -> Result<bool>;

    /// Extend the lock if `replica_id` still holds it
    async fn renew_leader(&self, replica_id: &str, ttl_ms: u64) -> Result<bool>;

    /// Drop the lock if `replica_id` holds it
    async fn release_leader(&self, replica_id: &str) -> Result<bool>;

    async fn current_leader(&self) -> Result<Option<String>>;
}
