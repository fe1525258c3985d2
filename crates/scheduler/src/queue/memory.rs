use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;
use uuid::Uuid;

use super::{EnqueueOptions, QueueStats, QueuedTask, WorkQueue};
use crate::error::{Error, Result};

#[derive(Debug, Default)]
struct QueueState {
    pending: VecDeque<String>,
    /// task id -> visibility deadline (ms)
    active: HashMap<String, i64>,
}

#[derive(Debug, Default)]
struct Inner {
    queues: HashMap<String, QueueState>,
    paused: HashSet<String>,
    tasks: HashMap<String, QueuedTask>,
    /// unique key -> (owning task id, expiry ms)
    unique: HashMap<String, (String, i64)>,
}

impl Inner {
    /// Drop the unique key when `task` still owns it
    fn release_unique(&mut self, task: &QueuedTask) {
        if let Some(key) = &task.unique_key {
            if self.unique.get(key).is_some_and(|(owner, _)| *owner == task.id) {
                self.unique.remove(key);
            }
        }
    }
}

/// Process-local work queue with the same semantics as [`super::RedisWorkQueue`]
#[derive(Debug, Default)]
pub struct MemoryWorkQueue {
    inner: Mutex<Inner>,
    offset_ms: AtomicI64,
}

impl MemoryWorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move the queue clock forward, expiring unique keys and visibility timeouts
    pub fn advance(&self, ms: i64) {
        self.offset_ms.fetch_add(ms, Ordering::SeqCst);
    }

    /// Every task currently stored, pending or active
    pub fn tasks(&self) -> Vec<QueuedTask> {
        self.inner
            .lock()
            .map(|inner| inner.tasks.values().cloned().collect())
            .unwrap_or_default()
    }

    fn now_ms(&self) -> i64 {
        Utc::now().timestamp_millis() + self.offset_ms.load(Ordering::SeqCst)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| Error::Queue("memory work queue lock poisoned".to_string()))
    }
}

#[async_trait]
impl WorkQueue for MemoryWorkQueue {
    async fn enqueue_unique(
        &self,
        task_type: &str,
        payload: &str,
        unique_key: &str,
        unique_ttl: Duration,
        options: &EnqueueOptions,
    ) -> Result<String> {
        let now = self.now_ms();
        let mut inner = self.lock()?;
        if inner.unique.get(unique_key).is_some_and(|(_, expires)| *expires > now) {
            return Err(Error::DuplicateEnqueue(unique_key.to_string()));
        }

        let id = Uuid::new_v4().to_string();
        inner.unique.insert(
            unique_key.to_string(),
            (id.clone(), now + unique_ttl.as_millis().max(1) as i64),
        );
        inner.tasks.insert(
            id.clone(),
            QueuedTask {
                id: id.clone(),
                task_type: task_type.to_string(),
                payload: payload.to_string(),
                queue: options.queue.clone(),
                retried: 0,
                max_retry: options.max_retry,
                timeout: options.timeout,
                retention: options.retention,
                unique_key: Some(unique_key.to_string()),
            },
        );
        inner
            .queues
            .entry(options.queue.clone())
            .or_default()
            .pending
            .push_back(id.clone());
        Ok(id)
    }

    async fn dequeue(&self, queue: &str) -> Result<Option<QueuedTask>> {
        let now = self.now_ms();
        let mut inner = self.lock()?;
        if inner.paused.contains(queue) {
            return Ok(None);
        }
        let Some(id) = inner.queues.get_mut(queue).and_then(|q| q.pending.pop_front()) else {
            return Ok(None);
        };
        let Some(task) = inner.tasks.get(&id).cloned() else {
            return Ok(None);
        };
        let deadline = now + task.timeout.as_millis() as i64;
        inner
            .queues
            .entry(queue.to_string())
            .or_default()
            .active
            .insert(id, deadline);
        Ok(Some(task))
    }

    async fn complete(&self, task: &QueuedTask) -> Result<()> {
        let mut inner = self.lock()?;
        if let Some(q) = inner.queues.get_mut(&task.queue) {
            q.active.remove(&task.id);
        }
        if let Some(stored) = inner.tasks.remove(&task.id) {
            inner.release_unique(&stored);
        }
        Ok(())
    }

    async fn fail(&self, task: &QueuedTask, _reason: &str) -> Result<bool> {
        let mut inner = self.lock()?;
        if let Some(q) = inner.queues.get_mut(&task.queue) {
            q.active.remove(&task.id);
        }
        let retry = match inner.tasks.get_mut(&task.id) {
            Some(stored) if stored.retried < stored.max_retry => {
                stored.retried += 1;
                true
            }
            _ => false,
        };
        if retry {
            inner
                .queues
                .entry(task.queue.clone())
                .or_default()
                .pending
                .push_back(task.id.clone());
        } else if let Some(stored) = inner.tasks.remove(&task.id) {
            inner.release_unique(&stored);
        }
        Ok(retry)
    }

    async fn requeue_expired(&self, queue: &str) -> Result<usize> {
        let now = self.now_ms();
        let mut inner = self.lock()?;
        let Some(q) = inner.queues.get_mut(queue) else {
            return Ok(0);
        };
        let expired: Vec<String> = q
            .active
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &expired {
            q.active.remove(id);
            q.pending.push_front(id.clone());
        }
        Ok(expired.len())
    }

    async fn list_pending(&self, queue: &str, limit: usize) -> Result<Vec<QueuedTask>> {
        let inner = self.lock()?;
        Ok(inner
            .queues
            .get(queue)
            .map(|q| {
                q.pending
                    .iter()
                    .take(limit)
                    .filter_map(|id| inner.tasks.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn cancel(&self, task_id: &str) -> Result<bool> {
        let mut inner = self.lock()?;
        let Some(task) = inner.tasks.remove(task_id) else {
            return Ok(false);
        };
        if let Some(q) = inner.queues.get_mut(&task.queue) {
            q.pending.retain(|id| id != task_id);
            q.active.remove(task_id);
        }
        inner.release_unique(&task);
        Ok(true)
    }

    async fn pause(&self, queue: &str) -> Result<()> {
        self.lock()?.paused.insert(queue.to_string());
        Ok(())
    }

    async fn resume(&self, queue: &str) -> Result<()> {
        self.lock()?.paused.remove(queue);
        Ok(())
    }

    async fn stats(&self, queue: &str) -> Result<QueueStats> {
        let inner = self.lock()?;
        let (pending, active) = inner
            .queues
            .get(queue)
            .map(|q| (q.pending.len() as u64, q.active.len() as u64))
            .unwrap_or_default();
        Ok(QueueStats {
            queue: queue.to_string(),
            pending,
            active,
            paused: inner.paused.contains(queue),
        })
    }
}
