use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicI64, Ordering};

use super::{ScheduleCounts, StateStore};
use crate::error::{Error, Result};

/// A score-ordered set: `(score, id)` ordering plus an id index
#[derive(Debug, Default)]
struct ScoredSet {
    ordered: BTreeSet<(i64, String)>,
    scores: HashMap<String, i64>,
}

impl ScoredSet {
    fn insert(&mut self, id: &str, score: i64) {
        if let Some(old) = self.scores.insert(id.to_string(), score) {
            self.ordered.remove(&(old, id.to_string()));
        }
        self.ordered.insert((score, id.to_string()));
    }

    fn remove(&mut self, id: &str) -> Option<i64> {
        let score = self.scores.remove(id)?;
        self.ordered.remove(&(score, id.to_string()));
        Some(score)
    }

    fn score(&self, id: &str) -> Option<i64> {
        self.scores.get(id).copied()
    }

    fn contains(&self, id: &str) -> bool {
        self.scores.contains_key(id)
    }

    /// Lowest-scored entries with score <= `max_score`
    fn range_until(&self, max_score: i64, limit: usize) -> Vec<(i64, String)> {
        self.ordered
            .iter()
            .take_while(|(score, _)| *score <= max_score)
            .take(limit)
            .cloned()
            .collect()
    }

    fn len(&self) -> u64 {
        self.scores.len() as u64
    }
}

#[derive(Debug, Default)]
struct Inner {
    due: ScoredSet,
    lease: ScoredSet,
    leader: Option<(String, i64)>,
}

/// Process-local state store for single-replica deployments and tests.
///
/// Every operation holds one lock for its whole duration, which gives the
/// same atomicity the Redis scripts provide. The clock is the wall clock plus
/// an offset that tests move with [`MemoryStateStore::advance`].
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    inner: Mutex<Inner>,
    offset_ms: AtomicI64,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move the store clock forward
    pub fn advance(&self, ms: i64) {
        self.offset_ms.fetch_add(ms, Ordering::SeqCst);
    }

    fn now_ms(&self) -> i64 {
        Utc::now().timestamp_millis() + self.offset_ms.load(Ordering::SeqCst)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| Error::Store("memory state store lock poisoned".to_string()))
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn time_ms(&self) -> Result<i64> {
        Ok(self.now_ms())
    }

    async fn claim(&self, now_ms: i64, max: usize, lease_ttl_ms: i64) -> Result<Vec<String>> {
        let mut inner = self.lock()?;
        let entries = inner.due.range_until(now_ms, max);
        let mut ids = Vec::with_capacity(entries.len());
        for (_, id) in entries {
            inner.due.remove(&id);
            inner.lease.insert(&id, now_ms + lease_ttl_ms);
            ids.push(id);
        }
        Ok(ids)
    }

    async fn reschedule(&self, entries: &[(String, i64)]) -> Result<usize> {
        let mut inner = self.lock()?;
        let mut moved = 0;
        for (id, next_ms) in entries {
            if inner.lease.remove(id).is_some() {
                inner.due.insert(id, *next_ms);
                moved += 1;
            }
        }
        Ok(moved)
    }

    async fn reclaim(&self, now_ms: i64, max: usize) -> Result<Vec<String>> {
        let mut inner = self.lock()?;
        let entries = inner.lease.range_until(now_ms, max);
        let mut ids = Vec::with_capacity(entries.len());
        for (score, id) in entries {
            inner.lease.remove(&id);
            inner.due.insert(&id, score);
            ids.push(id);
        }
        Ok(ids)
    }

    async fn schedule_if_absent(&self, ids: &[String], due_ms: i64) -> Result<usize> {
        let mut inner = self.lock()?;
        let mut added = 0;
        for id in ids {
            if !inner.due.contains(id) && !inner.lease.contains(id) {
                inner.due.insert(id, due_ms);
                added += 1;
            }
        }
        Ok(added)
    }

    async fn reset(&self, entries: &[(String, i64)]) -> Result<()> {
        let mut inner = self.lock()?;
        for (id, due_ms) in entries {
            inner.lease.remove(id);
            inner.due.insert(id, *due_ms);
        }
        Ok(())
    }

    async fn remove(&self, ids: &[String]) -> Result<usize> {
        let mut inner = self.lock()?;
        let mut removed = 0;
        for id in ids {
            let a = inner.due.remove(id).is_some();
            let b = inner.lease.remove(id).is_some();
            if a || b {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn scheduled_ids(&self) -> Result<HashSet<String>> {
        let inner = self.lock()?;
        Ok(inner
            .due
            .scores
            .keys()
            .chain(inner.lease.scores.keys())
            .cloned()
            .collect())
    }

    async fn due_score(&self, id: &str) -> Result<Option<i64>> {
        Ok(self.lock()?.due.score(id))
    }

    async fn lease_score(&self, id: &str) -> Result<Option<i64>> {
        Ok(self.lock()?.lease.score(id))
    }

    async fn counts(&self) -> Result<ScheduleCounts> {
        let inner = self.lock()?;
        Ok(ScheduleCounts {
            due: inner.due.len(),
            lease: inner.lease.len(),
        })
    }

    async fn try_acquire_leader(&self, replica_id: &str, ttl_ms: u64) -> Result<bool> {
        let now = self.now_ms();
        let mut inner = self.lock()?;
        let held = matches!(&inner.leader, Some((_, expires)) if *expires > now);
        if held {
            return Ok(false);
        }
        inner.leader = Some((replica_id.to_string(), now + ttl_ms as i64));
        Ok(true)
    }

    async fn renew_leader(&self, replica_id: &str, ttl_ms: u64) -> Result<bool> {
        let now = self.now_ms();
        let mut inner = self.lock()?;
        match &mut inner.leader {
            Some((holder, expires)) if holder == replica_id && *expires > now => {
                *expires = now + ttl_ms as i64;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release_leader(&self, replica_id: &str) -> Result<bool> {
        let mut inner = self.lock()?;
        let holds = matches!(&inner.leader, Some((holder, _)) if holder == replica_id);
        if holds {
            inner.leader = None;
        }
        Ok(holds)
    }

    async fn current_leader(&self) -> Result<Option<String>> {
        let now = self.now_ms();
        let inner = self.lock()?;
        Ok(inner
            .leader
            .as_ref()
            .filter(|(_, expires)| *expires > now)
            .map(|(holder, _)| holder.clone()))
    }
}
