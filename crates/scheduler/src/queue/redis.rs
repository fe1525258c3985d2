use async_trait::async_trait;
use chrono::Utc;
use deadpool_redis::Pool;
use deadpool_redis::redis::{AsyncCommands, Script};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{EnqueueOptions, QueueStats, QueuedTask, WorkQueue};
use crate::error::{Error, Result};

const TASK_PREFIX: &str = "queue:task:";
const UNIQUE_PREFIX: &str = "queue:unique:";

const ENQUEUE_SCRIPT: &str = r#"
if not redis.call('SET', KEYS[1], ARGV[1], 'NX', 'PX', ARGV[2]) then
  return 0
end
redis.call('HSET', KEYS[2],
  'type', ARGV[3], 'payload', ARGV[4], 'queue', ARGV[5], 'retried', 0,
  'max_retry', ARGV[6], 'timeout_ms', ARGV[7], 'retention_ms', ARGV[8],
  'unique_key', ARGV[9])
redis.call('LPUSH', KEYS[3], ARGV[1])
return 1
"#;

const DEQUEUE_SCRIPT: &str = r#"
if redis.call('EXISTS', KEYS[3]) == 1 then
  return false
end
local id = redis.call('RPOP', KEYS[1])
if not id then
  return false
end
local timeout = tonumber(redis.call('HGET', ARGV[2] .. id, 'timeout_ms') or '0')
redis.call('ZADD', KEYS[2], string.format('%d', tonumber(ARGV[1]) + timeout), id)
return id
"#;

const FAIL_SCRIPT: &str = r#"
redis.call('ZREM', KEYS[1], ARGV[1])
local retried = tonumber(redis.call('HGET', KEYS[3], 'retried') or '0')
local max_retry = tonumber(redis.call('HGET', KEYS[3], 'max_retry') or '0')
if retried < max_retry then
  redis.call('HINCRBY', KEYS[3], 'retried', 1)
  redis.call('HSET', KEYS[3], 'last_error', ARGV[2])
  redis.call('LPUSH', KEYS[2], ARGV[1])
  return 1
end
local unique = redis.call('HGET', KEYS[3], 'unique_key')
if unique and unique ~= '' and redis.call('GET', ARGV[3] .. unique) == ARGV[1] then
  redis.call('DEL', ARGV[3] .. unique)
end
redis.call('DEL', KEYS[3])
return 0
"#;

const COMPLETE_SCRIPT: &str = r#"
redis.call('ZREM', KEYS[1], ARGV[1])
local unique = redis.call('HGET', KEYS[2], 'unique_key')
if unique and unique ~= '' and redis.call('GET', ARGV[3] .. unique) == ARGV[1] then
  redis.call('DEL', ARGV[3] .. unique)
end
if tonumber(ARGV[2]) > 0 then
  redis.call('PEXPIRE', KEYS[2], ARGV[2])
else
  redis.call('DEL', KEYS[2])
end
return 1
"#;

const REQUEUE_SCRIPT: &str = r#"
local ids = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1], 'LIMIT', 0, tonumber(ARGV[2]))
for _, id in ipairs(ids) do
  redis.call('ZREM', KEYS[1], id)
  redis.call('RPUSH', KEYS[2], id)
end
return #ids
"#;

const CANCEL_SCRIPT: &str = r#"
local queue = redis.call('HGET', KEYS[1], 'queue')
if not queue then
  return 0
end
redis.call('LREM', 'queue:' .. queue .. ':pending', 0, ARGV[1])
redis.call('ZREM', 'queue:' .. queue .. ':active', ARGV[1])
local unique = redis.call('HGET', KEYS[1], 'unique_key')
if unique and unique ~= '' and redis.call('GET', ARGV[2] .. unique) == ARGV[1] then
  redis.call('DEL', ARGV[2] .. unique)
end
redis.call('DEL', KEYS[1])
return 1
"#;

const REQUEUE_BATCH: usize = 1000;

fn pending_key(queue: &str) -> String {
    format!("queue:{}:pending", queue)
}

fn active_key(queue: &str) -> String {
    format!("queue:{}:active", queue)
}

fn paused_key(queue: &str) -> String {
    format!("queue:{}:paused", queue)
}

fn task_key(id: &str) -> String {
    format!("{}{}", TASK_PREFIX, id)
}

/// Redis-backed work queue
#[derive(Clone)]
pub struct RedisWorkQueue {
    pool: Pool,
    enqueue: Script,
    dequeue: Script,
    complete: Script,
    fail: Script,
    requeue: Script,
    cancel: Script,
}

impl RedisWorkQueue {
    pub fn new(pool: Pool) -> Self {
        Self {
            pool,
            enqueue: Script::new(ENQUEUE_SCRIPT),
            dequeue: Script::new(DEQUEUE_SCRIPT),
            complete: Script::new(COMPLETE_SCRIPT),
            fail: Script::new(FAIL_SCRIPT),
            requeue: Script::new(REQUEUE_SCRIPT),
            cancel: Script::new(CANCEL_SCRIPT),
        }
    }

    async fn load(&self, id: &str) -> Result<Option<QueuedTask>> {
        let mut conn = self.pool.get().await?;
        let fields: HashMap<String, String> = conn.hgetall(task_key(id)).await?;
        if fields.is_empty() {
            return Ok(None);
        }
        QueuedTask::from_fields(id, &fields).map(Some)
    }
}

#[async_trait]
impl WorkQueue for RedisWorkQueue {
    async fn enqueue_unique(
        &self,
        task_type: &str,
        payload: &str,
        unique_key: &str,
        unique_ttl: Duration,
        options: &EnqueueOptions,
    ) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        let mut conn = self.pool.get().await?;
        let created: i64 = self
            .enqueue
            .key(format!("{}{}", UNIQUE_PREFIX, unique_key))
            .key(task_key(&id))
            .key(pending_key(&options.queue))
            .arg(&id)
            .arg(unique_ttl.as_millis().max(1) as u64)
            .arg(task_type)
            .arg(payload)
            .arg(&options.queue)
            .arg(options.max_retry)
            .arg(options.timeout.as_millis() as u64)
            .arg(options.retention.as_millis() as u64)
            .arg(unique_key)
            .invoke_async(&mut conn)
            .await?;

        if created == 0 {
            return Err(Error::DuplicateEnqueue(unique_key.to_string()));
        }
        debug!("Enqueued task {} on {} ({})", id, options.queue, unique_key);
        Ok(id)
    }

    async fn dequeue(&self, queue: &str) -> Result<Option<QueuedTask>> {
        let id: Option<String> = {
            let mut conn = self.pool.get().await?;
            self.dequeue
                .key(pending_key(queue))
                .key(active_key(queue))
                .key(paused_key(queue))
                .arg(Utc::now().timestamp_millis())
                .arg(TASK_PREFIX)
                .invoke_async(&mut conn)
                .await?
        };
        let Some(id) = id else {
            return Ok(None);
        };

        match self.load(&id).await? {
            Some(task) => Ok(Some(task)),
            None => {
                warn!("Dequeued task {} has no stored data, dropping it", id);
                let mut conn = self.pool.get().await?;
                let _: i64 = conn.zrem(active_key(queue), &id).await?;
                Ok(None)
            }
        }
    }

    async fn complete(&self, task: &QueuedTask) -> Result<()> {
        let mut conn = self.pool.get().await?;
        let _: i64 = self
            .complete
            .key(active_key(&task.queue))
            .key(task_key(&task.id))
            .arg(&task.id)
            .arg(task.retention.as_millis() as i64)
            .arg(UNIQUE_PREFIX)
            .invoke_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn fail(&self, task: &QueuedTask, reason: &str) -> Result<bool> {
        let mut conn = self.pool.get().await?;
        let requeued: i64 = self
            .fail
            .key(active_key(&task.queue))
            .key(pending_key(&task.queue))
            .key(task_key(&task.id))
            .arg(&task.id)
            .arg(reason)
            .arg(UNIQUE_PREFIX)
            .invoke_async(&mut conn)
            .await?;
        Ok(requeued == 1)
    }

    async fn requeue_expired(&self, queue: &str) -> Result<usize> {
        let mut conn = self.pool.get().await?;
        let moved: usize = self
            .requeue
            .key(active_key(queue))
            .key(pending_key(queue))
            .arg(Utc::now().timestamp_millis())
            .arg(REQUEUE_BATCH)
            .invoke_async(&mut conn)
            .await?;
        Ok(moved)
    }

    async fn list_pending(&self, queue: &str, limit: usize) -> Result<Vec<QueuedTask>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let ids: Vec<String> = {
            let mut conn = self.pool.get().await?;
            // oldest tasks sit at the tail
            conn.lrange(pending_key(queue), -(limit as isize), -1).await?
        };
        let mut tasks = Vec::with_capacity(ids.len());
        for id in ids.iter().rev() {
            if let Some(task) = self.load(id).await? {
                tasks.push(task);
            }
        }
        Ok(tasks)
    }

    async fn cancel(&self, task_id: &str) -> Result<bool> {
        let mut conn = self.pool.get().await?;
        let cancelled: i64 = self
            .cancel
            .key(task_key(task_id))
            .arg(task_id)
            .arg(UNIQUE_PREFIX)
            .invoke_async(&mut conn)
            .await?;
        Ok(cancelled == 1)
    }

    async fn pause(&self, queue: &str) -> Result<()> {
        let mut conn = self.pool.get().await?;
        let _: () = conn.set(paused_key(queue), 1).await?;
        Ok(())
    }

    async fn resume(&self, queue: &str) -> Result<()> {
        let mut conn = self.pool.get().await?;
        let _: i64 = conn.del(paused_key(queue)).await?;
        Ok(())
    }

    async fn stats(&self, queue: &str) -> Result<QueueStats> {
        let mut conn = self.pool.get().await?;
        let pending: u64 = conn.llen(pending_key(queue)).await?;
        let active: u64 = conn.zcard(active_key(queue)).await?;
        let paused: bool = conn.exists(paused_key(queue)).await?;
        Ok(QueueStats {
            queue: queue.to_string(),
            pending,
            active,
            paused,
        })
    }
}
