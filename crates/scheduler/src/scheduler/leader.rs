use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::SchedulerConfig;
use crate::store::StateStore;

/// Consecutive renew errors tolerated before stepping down
const MAX_RENEW_FAILURES: u32 = 3;

/// Holds or competes for the `sched:leader` lock and broadcasts the outcome
pub struct LeaderElector {
    store: Arc<dyn StateStore>,
    replica_id: String,
    lock_ttl: Duration,
    renew_every: Duration,
    signal: watch::Sender<bool>,
    // keeps the channel open so send() always stores the value
    _keep_alive: watch::Receiver<bool>,
}

impl LeaderElector {
    pub fn new(store: Arc<dyn StateStore>, replica_id: String, config: &SchedulerConfig) -> Arc<Self> {
        let (tx, rx) = watch::channel(false);
        Arc::new(Self {
            store,
            replica_id,
            lock_ttl: config.leader_lock_ttl(),
            renew_every: config.leader_renew_every(),
            signal: tx,
            _keep_alive: rx,
        })
    }

    pub fn replica_id(&self) -> &str {
        &self.replica_id
    }

    pub fn is_leader(&self) -> bool {
        *self.signal.borrow()
    }

    /// Watch leadership transitions
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.signal.subscribe()
    }

    fn set_leader(&self, leader: bool) {
        if *self.signal.borrow() != leader {
            if leader {
                info!("Replica {} became leader", self.replica_id);
            } else {
                info!("Replica {} is now a follower", self.replica_id);
            }
            let _ = self.signal.send(leader);
        }
    }

    fn ttl_ms(&self) -> u64 {
        self.lock_ttl.as_millis() as u64
    }

    fn jitter(max_ms: u64) -> Duration {
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..max_ms))
    }

    /// Wait between acquisition attempts: a tenth of the TTL, capped at 1s
    fn retry_wait(&self) -> Duration {
        Duration::from_millis((self.ttl_ms() / 10).clamp(10, 1000)) + Self::jitter(50)
    }

    /// Compete for leadership until `shutdown`, releasing the lock on exit
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        debug!("Leader election started for replica {}", self.replica_id);
        loop {
            if shutdown.is_cancelled() {
                break;
            }

            match self.store.try_acquire_leader(&self.replica_id, self.ttl_ms()).await {
                Ok(true) => {
                    self.set_leader(true);
                    if !self.hold(&shutdown).await {
                        break;
                    }
                }
                Ok(false) => {
                    self.set_leader(false);
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = sleep(self.retry_wait()) => {}
                    }
                }
                Err(e) => {
                    warn!("Leader lock acquisition failed: {}", e);
                    self.set_leader(false);
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = sleep(Duration::from_secs(1) + Self::jitter(250)) => {}
                    }
                }
            }
        }

        if self.is_leader() {
            match self.store.release_leader(&self.replica_id).await {
                Ok(_) => debug!("Replica {} released leader lock", self.replica_id),
                Err(e) => warn!("Failed to release leader lock: {}", e),
            }
        }
        self.set_leader(false);
        debug!("Leader election stopped for replica {}", self.replica_id);
    }

    /// Renew the lock while we hold it. Returns false when shutting down.
    async fn hold(&self, shutdown: &CancellationToken) -> bool {
        let mut failures = 0u32;
        loop {
            let wait = if failures > 0 {
                self.retry_wait()
            } else {
                self.renew_every + Self::jitter(100)
            };
            tokio::select! {
                _ = shutdown.cancelled() => return false,
                _ = sleep(wait) => {}
            }

            match self.store.renew_leader(&self.replica_id, self.ttl_ms()).await {
                Ok(true) => failures = 0,
                Ok(false) => {
                    warn!("Replica {} lost the leader lock", self.replica_id);
                    self.set_leader(false);
                    return true;
                }
                Err(e) => {
                    failures += 1;
                    warn!("Leader renew failed ({}/{}): {}", failures, MAX_RENEW_FAILURES, e);
                    if failures >= MAX_RENEW_FAILURES {
                        warn!("Replica {} stepping down after repeated renew errors", self.replica_id);
                        self.set_leader(false);
                        return true;
                    }
                }
            }
        }
    }
}
