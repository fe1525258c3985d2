use thiserror::Error;

/// Scheduler result type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the scheduling core
#[derive(Debug, Error)]
pub enum Error {
    /// State store unavailable or returned something unexpected
    #[error("state store error: {0}")]
    Store(String),

    #[error("redis error: {0}")]
    Redis(#[from] deadpool_redis::redis::RedisError),

    #[error("redis pool error: {0}")]
    Pool(#[from] deadpool_redis::PoolError),

    #[error("redis pool could not be created: {0}")]
    PoolSetup(#[from] deadpool_redis::CreatePoolError),

    /// A task with the same unique key is still live on the queue
    #[error("task with unique key {0} is already enqueued")]
    DuplicateEnqueue(String),

    #[error("work queue error: {0}")]
    Queue(String),

    #[error("monitor {0} not found")]
    MissingMonitor(String),

    #[error("misconfigured maintenance: {0}")]
    MisconfiguredMaintenance(String),

    #[error("invalid interval {interval}s for monitor {monitor_id}")]
    InvalidInterval { monitor_id: String, interval: i64 },

    #[error("leadership lost")]
    LeaderLost,

    #[error("proxy lookup failed: {0}")]
    ProxyLookupFailed(String),

    #[error("repository error: {0:#}")]
    Repository(#[from] anyhow::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Duplicate enqueues are expected and treated as success by the producer
    pub fn is_duplicate(&self) -> bool {
        matches!(self, Error::DuplicateEnqueue(_))
    }

    /// Errors worth a short backoff and retry rather than giving up
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Store(_)
                | Error::Redis(_)
                | Error::Pool(_)
                | Error::Queue(_)
                | Error::Repository(_)
        )
    }
}
