use async_trait::async_trait;
use deadpool_redis::redis::{self, AsyncCommands, Script};
use deadpool_redis::{Config, Pool, Runtime};
use std::collections::HashSet;
use tracing::debug;

use super::{DUE_KEY, LEADER_KEY, LEASE_KEY, ScheduleCounts, StateStore};
use crate::error::Result;

// Scores are formatted with %d so 13-digit millisecond values never
// round-trip through Lua's scientific notation.

const CLAIM_SCRIPT: &str = r#"
local ids = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1], 'LIMIT', 0, tonumber(ARGV[2]))
if #ids == 0 then
  return ids
end
local lease = string.format('%d', tonumber(ARGV[1]) + tonumber(ARGV[3]))
for _, id in ipairs(ids) do
  redis.call('ZREM', KEYS[1], id)
  redis.call('ZADD', KEYS[2], lease, id)
end
return ids
"#;

const RESCHED_SCRIPT: &str = r#"
local moved = 0
for i = 1, #ARGV, 2 do
  if redis.call('ZREM', KEYS[2], ARGV[i]) == 1 then
    redis.call('ZADD', KEYS[1], ARGV[i + 1], ARGV[i])
    moved = moved + 1
  end
end
return moved
"#;

const RECLAIM_SCRIPT: &str = r#"
local entries = redis.call('ZRANGEBYSCORE', KEYS[2], '-inf', ARGV[1], 'WITHSCORES', 'LIMIT', 0, tonumber(ARGV[2]))
local ids = {}
for i = 1, #entries, 2 do
  local id = entries[i]
  redis.call('ZREM', KEYS[2], id)
  redis.call('ZADD', KEYS[1], string.format('%d', tonumber(entries[i + 1])), id)
  ids[#ids + 1] = id
end
return ids
"#;

const SCHEDULE_IF_ABSENT_SCRIPT: &str = r#"
local added = 0
for i = 2, #ARGV do
  local id = ARGV[i]
  if not redis.call('ZSCORE', KEYS[1], id) and not redis.call('ZSCORE', KEYS[2], id) then
    redis.call('ZADD', KEYS[1], ARGV[1], id)
    added = added + 1
  end
end
return added
"#;

const RESET_SCRIPT: &str = r#"
for i = 1, #ARGV, 2 do
  redis.call('ZREM', KEYS[2], ARGV[i])
  redis.call('ZADD', KEYS[1], ARGV[i + 1], ARGV[i])
end
return #ARGV / 2
"#;

const REMOVE_SCRIPT: &str = r#"
local removed = 0
for i = 1, #ARGV do
  local a = redis.call('ZREM', KEYS[1], ARGV[i])
  local b = redis.call('ZREM', KEYS[2], ARGV[i])
  if a + b > 0 then
    removed = removed + 1
  end
end
return removed
"#;

const RENEW_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
  return redis.call('PEXPIRE', KEYS[1], ARGV[2])
else
  return 0
end
"#;

const RELEASE_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
  return redis.call('DEL', KEYS[1])
else
  return 0
end
"#;

/// Redis-backed state store
#[derive(Clone)]
pub struct RedisStateStore {
    pool: Pool,
    claim: Script,
    resched: Script,
    reclaim: Script,
    schedule_if_absent: Script,
    reset: Script,
    remove: Script,
    renew: Script,
    release: Script,
}

impl RedisStateStore {
    pub fn new(pool: Pool) -> Self {
        Self {
            pool,
            claim: Script::new(CLAIM_SCRIPT),
            resched: Script::new(RESCHED_SCRIPT),
            reclaim: Script::new(RECLAIM_SCRIPT),
            schedule_if_absent: Script::new(SCHEDULE_IF_ABSENT_SCRIPT),
            reset: Script::new(RESET_SCRIPT),
            remove: Script::new(REMOVE_SCRIPT),
            renew: Script::new(RENEW_SCRIPT),
            release: Script::new(RELEASE_SCRIPT),
        }
    }

    /// Build a pool from a `redis://` url
    pub fn connect(url: &str) -> Result<Self> {
        let pool = Config::from_url(url).create_pool(Some(Runtime::Tokio1))?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }
}

#[async_trait]
impl StateStore for RedisStateStore {
    async fn time_ms(&self) -> Result<i64> {
        let mut conn = self.pool.get().await?;
        let (secs, micros): (i64, i64) = redis::cmd("TIME").query_async(&mut conn).await?;
        Ok(secs * 1000 + micros / 1000)
    }

    async fn claim(&self, now_ms: i64, max: usize, lease_ttl_ms: i64) -> Result<Vec<String>> {
        let mut conn = self.pool.get().await?;
        let ids: Vec<String> = self
            .claim
            .key(DUE_KEY)
            .key(LEASE_KEY)
            .arg(now_ms)
            .arg(max)
            .arg(lease_ttl_ms)
            .invoke_async(&mut conn)
            .await?;
        if !ids.is_empty() {
            debug!("Claimed {} monitors at {}", ids.len(), now_ms);
        }
        Ok(ids)
    }

    async fn reschedule(&self, entries: &[(String, i64)]) -> Result<usize> {
        if entries.is_empty() {
            return Ok(0);
        }
        let mut conn = self.pool.get().await?;
        let mut invocation = self.resched.key(DUE_KEY);
        invocation.key(LEASE_KEY);
        for (id, next_ms) in entries {
            invocation.arg(id).arg(*next_ms);
        }
        let moved: usize = invocation.invoke_async(&mut conn).await?;
        Ok(moved)
    }

    async fn reclaim(&self, now_ms: i64, max: usize) -> Result<Vec<String>> {
        let mut conn = self.pool.get().await?;
        let ids: Vec<String> = self
            .reclaim
            .key(DUE_KEY)
            .key(LEASE_KEY)
            .arg(now_ms)
            .arg(max)
            .invoke_async(&mut conn)
            .await?;
        Ok(ids)
    }

    async fn schedule_if_absent(&self, ids: &[String], due_ms: i64) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let mut conn = self.pool.get().await?;
        let mut invocation = self.schedule_if_absent.key(DUE_KEY);
        invocation.key(LEASE_KEY).arg(due_ms);
        for id in ids {
            invocation.arg(id);
        }
        let added: usize = invocation.invoke_async(&mut conn).await?;
        Ok(added)
    }

    async fn reset(&self, entries: &[(String, i64)]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut conn = self.pool.get().await?;
        let mut invocation = self.reset.key(DUE_KEY);
        invocation.key(LEASE_KEY);
        for (id, due_ms) in entries {
            invocation.arg(id).arg(*due_ms);
        }
        let _: i64 = invocation.invoke_async(&mut conn).await?;
        Ok(())
    }

    async fn remove(&self, ids: &[String]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let mut conn = self.pool.get().await?;
        let mut invocation = self.remove.key(DUE_KEY);
        invocation.key(LEASE_KEY);
        for id in ids {
            invocation.arg(id);
        }
        let removed: usize = invocation.invoke_async(&mut conn).await?;
        Ok(removed)
    }

    async fn scheduled_ids(&self) -> Result<HashSet<String>> {
        let mut conn = self.pool.get().await?;
        let due: Vec<String> = conn.zrange(DUE_KEY, 0, -1).await?;
        let lease: Vec<String> = conn.zrange(LEASE_KEY, 0, -1).await?;
        Ok(due.into_iter().chain(lease).collect())
    }

    async fn due_score(&self, id: &str) -> Result<Option<i64>> {
        let mut conn = self.pool.get().await?;
        let score: Option<f64> = conn.zscore(DUE_KEY, id).await?;
        Ok(score.map(|s| s as i64))
    }

    async fn lease_score(&self, id: &str) -> Result<Option<i64>> {
        let mut conn = self.pool.get().await?;
        let score: Option<f64> = conn.zscore(LEASE_KEY, id).await?;
        Ok(score.map(|s| s as i64))
    }

    async fn counts(&self) -> Result<ScheduleCounts> {
        let mut conn = self.pool.get().await?;
        let due: u64 = conn.zcard(DUE_KEY).await?;
        let lease: u64 = conn.zcard(LEASE_KEY).await?;
        Ok(ScheduleCounts { due, lease })
    }

    async fn try_acquire_leader(&self, replica_id: &str, ttl_ms: u64) -> Result<bool> {
        let mut conn = self.pool.get().await?;
        let result: Option<String> = redis::cmd("SET")
            .arg(LEADER_KEY)
            .arg(replica_id)
            .arg("NX")
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut conn)
            .await?;
        Ok(result.is_some())
    }

    async fn renew_leader(&self, replica_id: &str, ttl_ms: u64) -> Result<bool> {
        let mut conn = self.pool.get().await?;
        let renewed: i64 = self
            .renew
            .key(LEADER_KEY)
            .arg(replica_id)
            .arg(ttl_ms)
            .invoke_async(&mut conn)
            .await?;
        Ok(renewed == 1)
    }

    async fn release_leader(&self, replica_id: &str) -> Result<bool> {
        let mut conn = self.pool.get().await?;
        let released: i64 = self
            .release
            .key(LEADER_KEY)
            .arg(replica_id)
            .invoke_async(&mut conn)
            .await?;
        Ok(released == 1)
    }

    async fn current_leader(&self) -> Result<Option<String>> {
        let mut conn = self.pool.get().await?;
        let leader: Option<String> = conn.get(LEADER_KEY).await?;
        Ok(leader)
    }
}
