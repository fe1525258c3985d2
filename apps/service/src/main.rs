use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use uppe_scheduler::{Maintenance, Monitor};

mod config;
mod database;
mod monitoring;
mod pool;
mod replica;

use config::Config;
use replica::{Backends, Replica};

#[derive(Debug, Parser)]
#[command(version, about = "Uppe replica: schedules and runs uptime probes")]
struct Cli {
    /// Config file, defaults to $XDG_CONFIG_HOME/uppe/config.toml
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Overrides [replica].id
    #[arg(long, global = true)]
    replica_id: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the producer, workers and reconcilers (default)
    Run,
    /// Print the effective configuration
    Config,
    /// Inspect and administer the work queue
    Queue {
        #[command(subcommand)]
        action: QueueAction,
    },
    /// Manage monitor definitions
    Monitor {
        #[command(subcommand)]
        action: MonitorAction,
    },
    /// Manage maintenance windows
    Maintenance {
        #[command(subcommand)]
        action: MaintenanceAction,
    },
}

#[derive(Debug, Subcommand)]
enum QueueAction {
    Stats,
    List {
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },
    Pause,
    Resume,
    Cancel { task_id: String },
}

#[derive(Debug, Subcommand)]
enum MonitorAction {
    /// Add a monitor from a JSON file
    Add { file: PathBuf },
    List,
    Remove { id: String },
}

#[derive(Debug, Subcommand)]
enum MaintenanceAction {
    /// Add a maintenance window from a JSON file
    Add { file: PathBuf },
    /// Replace a maintenance window and its monitor links from a JSON file
    Update { file: PathBuf },
    Remove { id: String },
}

fn read_json<T: serde::de::DeserializeOwned>(file: &std::path::Path) -> Result<T> {
    let raw = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read {}", file.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("invalid JSON in {}", file.display()))
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match Config::from_config(cli.config.as_ref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };
    logger::init_with(&config.logging.level, Some(&config.logging.format));

    if let Err(e) = run(cli, config).await {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli, config: Config) -> Result<()> {
    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run_replica(config, cli.replica_id).await,
        Command::Config => {
            println!("{config}");
            Ok(())
        }
        Command::Queue { action } => queue_command(&config, action).await,
        Command::Monitor { action } => monitor_command(&config, action).await,
        Command::Maintenance { action } => maintenance_command(&config, action).await,
    }
}

async fn run_replica(config: Config, replica_id: Option<String>) -> Result<()> {
    config.scheduler.validate()?;
    config.worker.validate()?;

    let id = replica_id
        .or_else(|| config.replica.id.clone())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let db = replica::open_database(&config).await?;
    let backends = Backends::connect(&config)?;
    if backends.local {
        info!("No [redis].url configured, running a single local replica");
    }

    let replica = Replica::new(&config, id, backends, replica::ports(&db));
    let shutdown = CancellationToken::new();

    let signal = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
        }
        signal.cancel();
    });

    replica.run(shutdown).await
}

async fn queue_command(config: &Config, action: QueueAction) -> Result<()> {
    let backends = Backends::connect(config)?;
    if backends.local {
        bail!("queue commands need a shared queue, set [redis].url or UPPE_REDIS_URL");
    }
    let queue = backends.queue;
    let name = config.scheduler.monitor_task_queue_name.as_str();

    match action {
        QueueAction::Stats => {
            let stats = queue.stats(name).await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        QueueAction::List { limit } => {
            for task in queue.list_pending(name, limit).await? {
                println!(
                    "{}\t{}\tretried={}/{}\t{}",
                    task.id,
                    task.task_type,
                    task.retried,
                    task.max_retry,
                    task.unique_key.unwrap_or_default()
                );
            }
        }
        QueueAction::Pause => {
            queue.pause(name).await?;
            println!("Paused queue {name}");
        }
        QueueAction::Resume => {
            queue.resume(name).await?;
            println!("Resumed queue {name}");
        }
        QueueAction::Cancel { task_id } => {
            if queue.cancel(&task_id).await? {
                println!("Cancelled task {task_id}");
            } else {
                bail!("task {task_id} not found");
            }
        }
    }
    Ok(())
}

async fn monitor_command(config: &Config, action: MonitorAction) -> Result<()> {
    let db = replica::open_database(config).await?;
    match action {
        MonitorAction::Add { file } => {
            let monitor: Monitor = read_json(&file)?;
            monitoring::validate_monitor(&monitor)?;
            db.insert_monitor(&monitor).await?;
            println!("Added monitor {}", monitor.id);
        }
        MonitorAction::List => {
            for monitor in db.list_monitors().await? {
                println!(
                    "{}\t{}\t{}s\t{}\t{}",
                    monitor.id,
                    monitor.monitor_type,
                    monitor.interval_seconds,
                    if monitor.active { "active" } else { "paused" },
                    monitor.status
                );
            }
        }
        MonitorAction::Remove { id } => {
            if !db.delete_monitor(&id).await? {
                bail!("monitor {id} not found");
            }
            println!("Removed monitor {id}");
        }
    }
    Ok(())
}

async fn maintenance_command(config: &Config, action: MaintenanceAction) -> Result<()> {
    let db = replica::open_database(config).await?;
    match action {
        MaintenanceAction::Add { file } => {
            let maintenance: Maintenance = read_json(&file)?;
            let created = db.create_maintenance(maintenance).await?;
            println!(
                "Added maintenance {} ({}, cron {})",
                created.id,
                created.strategy,
                created.cron.as_deref().unwrap_or("-")
            );
        }
        MaintenanceAction::Update { file } => {
            let maintenance: Maintenance = read_json(&file)?;
            let id = maintenance.id.clone();
            if db.update_maintenance(maintenance).await?.is_none() {
                bail!("maintenance {id} not found");
            }
            println!("Updated maintenance {id}");
        }
        MaintenanceAction::Remove { id } => {
            if !db.delete_maintenance(&id).await? {
                bail!("maintenance {id} not found");
            }
            println!("Removed maintenance {id}");
        }
    }
    Ok(())
}
