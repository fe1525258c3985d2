//! Work queue handing health-check tasks from the producer to workers.
//!
//! Tasks carry a unique key; enqueueing a second task under a live key fails
//! with [`Error::DuplicateEnqueue`](crate::Error::DuplicateEnqueue). The key
//! is released when its task settles, and only while it still names that
//! task; its TTL bounds tasks that never settle. Dequeued tasks stay
//! invisible until their timeout passes, after which
//! [`WorkQueue::requeue_expired`] hands them out again.

pub mod memory;
pub mod redis;

pub use memory::MemoryWorkQueue;
pub use self::redis::RedisWorkQueue;

use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;

use crate::config::DEFAULT_QUEUE_NAME;
use crate::error::{Error, Result};

/// Per-task delivery options
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnqueueOptions {
    pub queue: String,
    /// Visibility timeout once dequeued
    pub timeout: Duration,
    pub max_retry: u32,
    /// How long a completed task is kept for inspection
    pub retention: Duration,
}

impl Default for EnqueueOptions {
    fn default() -> Self {
        Self {
            queue: DEFAULT_QUEUE_NAME.to_string(),
            timeout: Duration::from_secs(30),
            max_retry: 0,
            retention: Duration::ZERO,
        }
    }
}

/// A task as stored in the queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueuedTask {
    pub id: String,
    pub task_type: String,
    pub payload: String,
    pub queue: String,
    pub retried: u32,
    pub max_retry: u32,
    #[serde(skip)]
    pub timeout: Duration,
    #[serde(skip)]
    pub retention: Duration,
    pub unique_key: Option<String>,
}

impl QueuedTask {
    /// Rebuild a task from its stored field map
    pub(crate) fn from_fields(id: &str, fields: &HashMap<String, String>) -> Result<Self> {
        let get = |name: &str| {
            fields
                .get(name)
                .cloned()
                .ok_or_else(|| Error::Queue(format!("task {} is missing field '{}'", id, name)))
        };
        let number = |name: &str| -> Result<u64> {
            get(name)?
                .parse::<u64>()
                .map_err(|e| Error::Queue(format!("task {} has invalid '{}': {}", id, name, e)))
        };

        Ok(Self {
            id: id.to_string(),
            task_type: get("type")?,
            payload: get("payload")?,
            queue: get("queue")?,
            retried: number("retried")? as u32,
            max_retry: number("max_retry")? as u32,
            timeout: Duration::from_millis(number("timeout_ms")?),
            retention: Duration::from_millis(number("retention_ms")?),
            unique_key: fields.get("unique_key").filter(|k| !k.is_empty()).cloned(),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub queue: String,
    pub pending: u64,
    pub active: u64,
    pub paused: bool,
}

#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Enqueue unless `unique_key` is held; the key lives until the task
    /// settles or `unique_ttl` passes. Returns the new task id.
    async fn enqueue_unique(
        &self,
        task_type: &str,
        payload: &str,
        unique_key: &str,
        unique_ttl: Duration,
        options: &EnqueueOptions,
    ) -> Result<String>;

    /// Next pending task, or `None` when the queue is empty or paused
    async fn dequeue(&self, queue: &str) -> Result<Option<QueuedTask>>;

    /// Settle a task and release its unique key
    async fn complete(&self, task: &QueuedTask) -> Result<()>;

    /// Returns true when the task was queued for another attempt; a dropped
    /// task releases its unique key
    async fn fail(&self, task: &QueuedTask, reason: &str) -> Result<bool>;

    /// Return active tasks whose timeout has passed to the pending list
    async fn requeue_expired(&self, queue: &str) -> Result<usize>;

    async fn list_pending(&self, queue: &str, limit: usize) -> Result<Vec<QueuedTask>>;

    /// Drop a pending or active task and release its unique key
    async fn cancel(&self, task_id: &str) -> Result<bool>;

    async fn pause(&self, queue: &str) -> Result<()>;

    async fn resume(&self, queue: &str) -> Result<()>;

    async fn stats(&self, queue: &str) -> Result<QueueStats>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_is_rebuilt_from_fields() {
        let fields: HashMap<String, String> = [
            ("type", "monitor:healthcheck"),
            ("payload", "{}"),
            ("queue", "healthcheck"),
            ("retried", "1"),
            ("max_retry", "3"),
            ("timeout_ms", "35000"),
            ("retention_ms", "0"),
            ("unique_key", "healthcheck:m1"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let task = QueuedTask::from_fields("t1", &fields).unwrap();
        assert_eq!(task.retried, 1);
        assert_eq!(task.timeout, Duration::from_secs(35));
        assert_eq!(task.unique_key.as_deref(), Some("healthcheck:m1"));
    }

    #[test]
    fn missing_fields_are_reported() {
        let err = QueuedTask::from_fields("t1", &HashMap::new()).unwrap_err();
        assert!(err.to_string().contains("t1"));
    }
}
