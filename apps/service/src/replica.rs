//! Wires one replica: backends, ports, producer, workers and reconcilers.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uppe_scheduler::{
    EventBus, LeaderElector, MemoryStateStore, MemoryWorkQueue, Ports, Producer, RedisStateStore,
    RedisWorkQueue, ScheduleManager, ScheduleReconciler, StateStore, StatusReconciler, WorkQueue,
    WorkerPool,
};

use crate::config::Config;
use crate::database::{self, LibsqlStore};
use crate::monitoring::build_registry;
use crate::pool;

/// Shared state store and work queue of the fleet
pub struct Backends {
    pub store: Arc<dyn StateStore>,
    pub queue: Arc<dyn WorkQueue>,
    /// In-memory backends, only meaningful for a single replica
    pub local: bool,
}

impl Backends {
    pub fn connect(config: &Config) -> Result<Self> {
        match config.redis.url.as_deref() {
            Some(url) => {
                let store = RedisStateStore::connect(url)
                    .with_context(|| format!("failed to create redis pool for {url}"))?;
                let queue = RedisWorkQueue::new(store.pool().clone());
                Ok(Self { store: Arc::new(store), queue: Arc::new(queue), local: false })
            }
            None => Ok(Self {
                store: Arc::new(MemoryStateStore::new()),
                queue: Arc::new(MemoryWorkQueue::new()),
                local: true,
            }),
        }
    }
}

/// Open the database, run migrations and hand back the store
pub async fn open_database(config: &Config) -> Result<Arc<LibsqlStore>> {
    let pool = pool::create_pool(&config.database.path, 16)
        .await
        .with_context(|| format!("failed to open database {}", config.database.path.display()))?;
    let conn = pool.get().await?;
    database::initialize_database(&conn).await?;
    drop(conn);
    Ok(Arc::new(LibsqlStore::new_from_pool(pool)))
}

pub fn ports(db: &Arc<LibsqlStore>) -> Ports {
    Ports {
        monitors: db.clone(),
        maintenances: db.clone(),
        proxies: db.clone(),
        heartbeats: db.clone(),
    }
}

pub struct Replica {
    id: String,
    backends: Backends,
    bus: EventBus,
    elector: Arc<LeaderElector>,
    manager: Arc<ScheduleManager>,
    producer: Arc<Producer>,
    workers: Arc<WorkerPool>,
    status: StatusReconciler,
}

impl Replica {
    pub fn new(config: &Config, id: String, backends: Backends, ports: Ports) -> Self {
        let bus = EventBus::default();
        let elector = LeaderElector::new(backends.store.clone(), id.clone(), &config.scheduler);
        let manager = Arc::new(ScheduleManager::new(
            backends.store.clone(),
            ports.monitors.clone(),
            config.scheduler.page_size,
        ));
        let producer = Producer::new(
            config.scheduler.clone(),
            backends.store.clone(),
            backends.queue.clone(),
            ports.clone(),
            manager.clone(),
            elector.clone(),
        );
        let workers = WorkerPool::new(
            config.worker.clone(),
            config.scheduler.monitor_task_queue_name.clone(),
            backends.queue.clone(),
            ports.clone(),
            build_registry(),
            bus.clone(),
        );
        let status = StatusReconciler::new(ports.monitors.clone(), &config.status);

        Self { id, backends, bus, elector, manager, producer, workers, status }
    }

    /// Run every component until `shutdown` fires, then drain
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        info!(
            replica_id = %self.id,
            local = self.backends.local,
            "Starting replica"
        );

        let handles: Vec<JoinHandle<()>> = vec![
            self.bus.subscribe(
                Arc::new(ScheduleReconciler::new(self.manager.clone(), self.elector.clone())),
                shutdown.clone(),
            ),
            self.bus.subscribe(Arc::new(self.status.clone()), shutdown.clone()),
            tokio::spawn(self.elector.clone().run(shutdown.clone())),
            tokio::spawn(self.producer.clone().run(shutdown.clone())),
            tokio::spawn(self.workers.clone().run(shutdown.clone())),
        ];

        shutdown.cancelled().await;
        info!(replica_id = %self.id, "Shutting down replica");

        for handle in handles {
            if let Err(e) = handle.await {
                warn!("Replica task ended abnormally: {}", e);
            }
        }

        let flushed = self.status.flush().await;
        if flushed > 0 {
            info!("Flushed {} pending status updates", flushed);
        }
        Ok(())
    }
}
