use std::{env, fmt, fs, path};

use serde::{Deserialize, Serialize};
use uppe_scheduler::{SchedulerConfig, StatusConfig, WorkerConfig};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to read config file {0}")]
    ReadFailed(path::PathBuf, #[source] std::io::Error),
    #[error("failed to write config file {0}")]
    WriteFailed(path::PathBuf, #[source] std::io::Error),
    #[error("failed to parse config file")]
    ParseFailed(#[from] toml::de::Error),
    #[error("failed to serialize config")]
    SerializeFailed(#[from] toml::ser::Error),
    #[error("no config path available, set XDG_CONFIG_HOME or HOME")]
    ConfigPathUnavailable,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub redis: Redis,
    pub database: DatabaseConfig,
    pub scheduler: SchedulerConfig,
    pub worker: WorkerConfig,
    pub status: StatusConfig,
    pub logging: Logging,
    pub replica: Replica,
}

/// Shared state store and queue backend; absent url means local mode
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Redis {
    pub url: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: path::PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { path: path::PathBuf::from("uppe.db") }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Logging {
    pub level: String,
    /// `compact` or `json`
    pub format: String,
}

impl Default for Logging {
    fn default() -> Self {
        Self { level: "info".into(), format: "compact".into() }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Replica {
    /// Generated per process when unset
    pub id: Option<String>,
}

/// Used to ensure we are actually reading a toml file
fn normalize_toml_path(path: &path::Path) -> path::PathBuf {
    let mut path = path.to_path_buf();
    if path.extension().map(|ext| ext != "toml").unwrap_or(true) {
        path.set_extension("toml");
    }
    path
}

/// Get default config path ($XDG_CONFIG_HOME/uppe/config.toml or
/// $HOME/.config/...)
fn default_config_path() -> Result<path::PathBuf, Error> {
    let path = if let Ok(config_home) = env::var("XDG_CONFIG_HOME") {
        path::PathBuf::from(config_home)
    } else if let Some(home_dir) = env::home_dir() {
        home_dir.join(".config")
    } else {
        return Err(Error::ConfigPathUnavailable);
    };

    Ok(path.join("uppe/config.toml"))
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let write_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str, value: &dyn fmt::Display| {
                writeln!(f, "  {:indent$}{}: {}", "", label, value, indent = level * 2)
            }
        };
        let write_title_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str| {
                writeln!(f, "{:indent$}{}", "", label, indent = level * 2)
            }
        };

        let write_title_1 = write_title_indented(1);
        let write_1 = write_indented(1);
        let unset = "(unset)".to_string();

        writeln!(f, "Current Internal Configuration State:")?;
        write_title_1(f, "Redis")?;
        write_1(f, "URL", self.redis.url.as_ref().unwrap_or(&unset))?;

        write_title_1(f, "Database")?;
        write_1(f, "Path", &self.database.path.display())?;

        let scheduler = &self.scheduler;
        write_title_1(f, "Scheduler")?;
        write_1(f, "Queue", &scheduler.monitor_task_queue_name)?;
        write_1(f, "Batch Claim", &scheduler.batch_claim)?;
        write_1(f, "Claim Tick (ms)", &scheduler.claim_tick_ms)?;
        write_1(f, "Lease TTL (ms)", &scheduler.lease_ttl_ms)?;
        write_1(f, "Reclaim Every (ms)", &scheduler.reclaim_every_ms)?;
        write_1(f, "Refresh Interval (ms)", &scheduler.refresh_interval_ms)?;
        write_1(f, "Leader Lock TTL (ms)", &scheduler.leader_lock_ttl_ms)?;
        write_1(f, "Leader Renew Every (ms)", &scheduler.leader_renew_every_ms)?;
        write_1(f, "Producer Workers", &scheduler.producer_workers())?;

        write_title_1(f, "Worker")?;
        write_1(f, "Concurrency", &self.worker.concurrency())?;
        write_1(f, "Poll Interval (ms)", &self.worker.poll_interval_ms)?;
        write_1(f, "Requeue Every (ms)", &self.worker.requeue_every_ms)?;

        write_title_1(f, "Status")?;
        write_1(f, "Debounce (ms)", &self.status.debounce_ms)?;

        write_title_1(f, "Logging")?;
        write_1(f, "Level", &self.logging.level)?;
        write_1(f, "Format", &self.logging.format)?;

        write_title_1(f, "Replica")?;
        write_1(f, "ID", self.replica.id.as_ref().unwrap_or(&unset))?;

        Ok(())
    }
}

impl Config {
    /// Generate Config structure from file
    ///
    /// Creates a default config in ~/.config/uppe/config.toml
    ///  or the specified path, with the name config.toml if one does not exist.
    /// `UPPE_REDIS_URL` and `UPPE_DATABASE_PATH` override the file.
    ///
    /// ```rust,ignore
    /// let cfg = config::Config::from_config(None::<&path::Path>)?;
    /// println!("{}", cfg);
    /// ```
    pub fn from_config(optional_path: Option<impl AsRef<path::Path>>) -> Result<Self, Error> {
        let config_path: path::PathBuf = if let Some(path) = optional_path {
            normalize_toml_path(path.as_ref())
        } else {
            default_config_path()?
        };

        let mut config = if config_path.exists() {
            let raw_string = fs::read_to_string(&config_path)
                .map_err(|err| Error::ReadFailed(config_path.clone(), err))?;
            toml::from_str(raw_string.as_str())?
        } else {
            let config = Self::default();
            config.write_config(&config_path)?;
            config
        };

        config.apply_env(|name| env::var(name).ok());
        Ok(config)
    }

    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("UPPE_REDIS_URL").filter(|v| !v.is_empty()) {
            self.redis.url = Some(url);
        }
        if let Some(path) = lookup("UPPE_DATABASE_PATH").filter(|v| !v.is_empty()) {
            self.database.path = path::PathBuf::from(path);
        }
    }

    /// Serialize and write a config to a file
    pub fn write_config(&self, path: &path::Path) -> Result<(), Error> {
        let config_str: String = toml::to_string_pretty(self)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| Error::WriteFailed(path.to_path_buf(), err))?;
        }

        fs::write(path, config_str).map_err(|err| Error::WriteFailed(path.to_path_buf(), err))
    }
}
