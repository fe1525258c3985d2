use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, NaiveTime, Utc};
use libsql::{Connection, Row, params};
use uuid::Uuid;

use uppe_scheduler::maintenance;
use uppe_scheduler::{
    HeartbeatService, Heartbeat, Maintenance, MaintenanceService, MaintenanceStrategy, Monitor,
    MonitorPatch, MonitorRepository, MonitorStatus, Proxy, ProxyService,
};

use crate::pool::{LibsqlManager, LibsqlPool};

const DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";
const TIME_FORMAT: &str = "%H:%M";

const MONITOR_COLUMNS: &str = "id, org_id, type, name, interval_seconds, timeout_seconds, max_retries, retry_interval, resend_interval, active, status, config, proxy_id, push_token";
const MAINTENANCE_COLUMNS: &str = "m.id, m.org_id, m.title, m.strategy, m.active, m.start_datetime, m.end_datetime, m.start_time, m.end_time, m.weekdays, m.days_of_month, m.interval_day, m.cron, m.duration_minutes, m.timezone";
const HEARTBEAT_COLUMNS: &str =
    "id, monitor_id, status, ping_ms, retries, time, end_time, message, important";

/// libsql-backed implementation of every port the scheduler consumes
pub struct LibsqlStore {
    pool: LibsqlPool,
}

fn status_from_code(code: i64) -> Result<MonitorStatus> {
    MonitorStatus::from_code(code).ok_or_else(|| anyhow!("unknown status code {}", code))
}

fn millis_to_datetime(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms).ok_or_else(|| anyhow!("timestamp {} out of range", ms))
}

fn parse_datetime(value: Option<String>) -> Result<Option<NaiveDateTime>> {
    value
        .map(|v| NaiveDateTime::parse_from_str(&v, DATETIME_FORMAT))
        .transpose()
        .context("invalid stored datetime")
}

fn parse_time(value: Option<String>) -> Result<Option<NaiveTime>> {
    value
        .map(|v| NaiveTime::parse_from_str(&v, TIME_FORMAT))
        .transpose()
        .context("invalid stored time")
}

fn row_to_monitor(row: &Row) -> Result<Monitor> {
    Ok(Monitor {
        id: row.get(0)?,
        org_id: row.get(1)?,
        monitor_type: row.get::<String>(2)?.into(),
        name: row.get(3)?,
        interval_seconds: row.get(4)?,
        timeout_seconds: row.get(5)?,
        max_retries: row.get(6)?,
        retry_interval: row.get(7)?,
        resend_interval: row.get(8)?,
        active: row.get::<i64>(9)? != 0,
        status: status_from_code(row.get(10)?)?,
        config: row.get(11)?,
        proxy_id: row.get::<Option<String>>(12)?,
        push_token: row.get::<Option<String>>(13)?,
    })
}

fn row_to_maintenance(row: &Row) -> Result<Maintenance> {
    let strategy: String = row.get(3)?;
    Ok(Maintenance {
        id: row.get(0)?,
        org_id: row.get(1)?,
        title: row.get(2)?,
        strategy: strategy.parse().unwrap_or(MaintenanceStrategy::Unknown),
        active: row.get::<i64>(4)? != 0,
        start_datetime: parse_datetime(row.get(5)?)?,
        end_datetime: parse_datetime(row.get(6)?)?,
        start_time: parse_time(row.get(7)?)?,
        end_time: parse_time(row.get(8)?)?,
        weekdays: serde_json::from_str(&row.get::<String>(9)?)?,
        days_of_month: serde_json::from_str(&row.get::<String>(10)?)?,
        interval_day: row.get::<Option<i64>>(11)?.map(|v| v as u32),
        cron: row.get(12)?,
        duration_minutes: row.get::<Option<i64>>(13)?.map(|v| v as u32),
        timezone: row.get(14)?,
        monitor_ids: Vec::new(),
    })
}

fn row_to_heartbeat(row: &Row) -> Result<Heartbeat> {
    Ok(Heartbeat {
        id: Some(row.get(0)?),
        monitor_id: row.get(1)?,
        status: status_from_code(row.get(2)?)?,
        ping_ms: row.get(3)?,
        retries: row.get(4)?,
        time: millis_to_datetime(row.get(5)?)?,
        end_time: millis_to_datetime(row.get(6)?)?,
        message: row.get(7)?,
        important: row.get::<i64>(8)? != 0,
    })
}

impl LibsqlStore {
    pub fn new_from_pool(pool: LibsqlPool) -> Self {
        Self { pool }
    }

    /// Get a connection from the pool
    async fn get_conn(&self) -> Result<deadpool::managed::Object<LibsqlManager>> {
        Ok(self.pool.get().await?)
    }

    async fn query_monitors(&self, sql: &str, params: impl libsql::params::IntoParams) -> Result<Vec<Monitor>> {
        let conn = self.get_conn().await?;
        let mut rows = conn.query(sql, params).await?;
        let mut monitors = Vec::new();
        while let Some(row) = rows.next().await? {
            monitors.push(row_to_monitor(&row)?);
        }
        Ok(monitors)
    }

    /// All monitors, active or not, ordered by id
    pub async fn list_monitors(&self) -> Result<Vec<Monitor>> {
        self.query_monitors(&format!("SELECT {MONITOR_COLUMNS} FROM monitors ORDER BY id"), ())
            .await
    }

    pub async fn insert_monitor(&self, monitor: &Monitor) -> Result<()> {
        let conn = self.get_conn().await?;
        let now = Utc::now().timestamp();
        conn.execute(
            &format!(
                "INSERT INTO monitors ({MONITOR_COLUMNS}, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
            ),
            params![
                monitor.id.clone(),
                monitor.org_id.clone(),
                monitor.monitor_type.as_str(),
                monitor.name.clone(),
                monitor.interval_seconds,
                monitor.timeout_seconds,
                monitor.max_retries,
                monitor.retry_interval,
                monitor.resend_interval,
                monitor.active as i64,
                monitor.status.code(),
                monitor.config.clone(),
                monitor.proxy_id.clone(),
                monitor.push_token.clone(),
                now,
                now
            ],
        )
        .await?;
        Ok(())
    }

    /// Overwrite a monitor's definition, returns false when it does not exist
    pub async fn update_monitor(&self, monitor: &Monitor) -> Result<bool> {
        let conn = self.get_conn().await?;
        let changed = conn
            .execute(
                "UPDATE monitors SET org_id = ?, type = ?, name = ?, interval_seconds = ?, timeout_seconds = ?, max_retries = ?, retry_interval = ?, resend_interval = ?, active = ?, status = ?, config = ?, proxy_id = ?, push_token = ?, updated_at = ? WHERE id = ?",
                params![
                    monitor.org_id.clone(),
                    monitor.monitor_type.as_str(),
                    monitor.name.clone(),
                    monitor.interval_seconds,
                    monitor.timeout_seconds,
                    monitor.max_retries,
                    monitor.retry_interval,
                    monitor.resend_interval,
                    monitor.active as i64,
                    monitor.status.code(),
                    monitor.config.clone(),
                    monitor.proxy_id.clone(),
                    monitor.push_token.clone(),
                    Utc::now().timestamp(),
                    monitor.id.clone()
                ],
            )
            .await?;
        Ok(changed > 0)
    }

    /// Delete a monitor with its heartbeats and maintenance links
    pub async fn delete_monitor(&self, id: &str) -> Result<bool> {
        let conn = self.get_conn().await?;
        let deleted = conn.execute("DELETE FROM monitors WHERE id = ?", params![id]).await?;
        Ok(deleted > 0)
    }

    pub async fn insert_proxy(&self, proxy: &Proxy) -> Result<()> {
        let conn = self.get_conn().await?;
        conn.execute(
            "INSERT INTO proxies (id, protocol, host, port, auth, username, password, created_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                proxy.id.clone(),
                proxy.protocol.clone(),
                proxy.host.clone(),
                proxy.port as i64,
                proxy.auth as i64,
                proxy.username.clone(),
                proxy.password.clone(),
                Utc::now().timestamp()
            ],
        )
        .await?;
        Ok(())
    }

    /// Normalize, store and link a new maintenance record
    pub async fn create_maintenance(&self, maintenance: Maintenance) -> Result<Maintenance> {
        let maintenance = maintenance::normalize(maintenance)?;
        let conn = self.get_conn().await?;
        let tx = conn.transaction().await?;
        let now = Utc::now().timestamp();

        tx.execute(
            "INSERT INTO maintenances (id, org_id, title, strategy, active, start_datetime, end_datetime, start_time, end_time, weekdays, days_of_month, interval_day, cron, duration_minutes, timezone, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                maintenance.id.clone(),
                maintenance.org_id.clone(),
                maintenance.title.clone(),
                maintenance.strategy.as_str(),
                maintenance.active as i64,
                maintenance.start_datetime.map(|d| d.format(DATETIME_FORMAT).to_string()),
                maintenance.end_datetime.map(|d| d.format(DATETIME_FORMAT).to_string()),
                maintenance.start_time.map(|t| t.format(TIME_FORMAT).to_string()),
                maintenance.end_time.map(|t| t.format(TIME_FORMAT).to_string()),
                serde_json::to_string(&maintenance.weekdays)?,
                serde_json::to_string(&maintenance.days_of_month)?,
                maintenance.interval_day.map(|v| v as i64),
                maintenance.cron.clone(),
                maintenance.duration_minutes.map(|v| v as i64),
                maintenance.timezone.clone(),
                now,
                now
            ],
        )
        .await?;
        link_monitors(&tx, &maintenance).await?;
        tx.commit().await?;

        Ok(maintenance)
    }

    /// Normalize and overwrite a maintenance record, replacing its links
    pub async fn update_maintenance(&self, maintenance: Maintenance) -> Result<Option<Maintenance>> {
        let maintenance = maintenance::normalize(maintenance)?;
        let conn = self.get_conn().await?;
        let tx = conn.transaction().await?;

        let changed = tx
            .execute(
                "UPDATE maintenances SET org_id = ?, title = ?, strategy = ?, active = ?, start_datetime = ?, end_datetime = ?, start_time = ?, end_time = ?, weekdays = ?, days_of_month = ?, interval_day = ?, cron = ?, duration_minutes = ?, timezone = ?, updated_at = ? WHERE id = ?",
                params![
                    maintenance.org_id.clone(),
                    maintenance.title.clone(),
                    maintenance.strategy.as_str(),
                    maintenance.active as i64,
                    maintenance.start_datetime.map(|d| d.format(DATETIME_FORMAT).to_string()),
                    maintenance.end_datetime.map(|d| d.format(DATETIME_FORMAT).to_string()),
                    maintenance.start_time.map(|t| t.format(TIME_FORMAT).to_string()),
                    maintenance.end_time.map(|t| t.format(TIME_FORMAT).to_string()),
                    serde_json::to_string(&maintenance.weekdays)?,
                    serde_json::to_string(&maintenance.days_of_month)?,
                    maintenance.interval_day.map(|v| v as i64),
                    maintenance.cron.clone(),
                    maintenance.duration_minutes.map(|v| v as i64),
                    maintenance.timezone.clone(),
                    Utc::now().timestamp(),
                    maintenance.id.clone()
                ],
            )
            .await?;
        if changed == 0 {
            tx.rollback().await?;
            return Ok(None);
        }

        tx.execute(
            "DELETE FROM monitor_maintenances WHERE maintenance_id = ?",
            params![maintenance.id.clone()],
        )
        .await?;
        link_monitors(&tx, &maintenance).await?;
        tx.commit().await?;

        Ok(Some(maintenance))
    }

    pub async fn delete_maintenance(&self, id: &str) -> Result<bool> {
        let conn = self.get_conn().await?;
        let deleted = conn.execute("DELETE FROM maintenances WHERE id = ?", params![id]).await?;
        Ok(deleted > 0)
    }
}

async fn maintenance_monitor_ids(
    conn: &Connection,
    maintenance_id: &str,
) -> Result<Vec<String>> {
    let mut rows = conn
        .query(
            "SELECT monitor_id FROM monitor_maintenances WHERE maintenance_id = ? ORDER BY monitor_id",
            params![maintenance_id],
        )
        .await?;
    let mut ids = Vec::new();
    while let Some(row) = rows.next().await? {
        ids.push(row.get(0)?);
    }
    Ok(ids)
}

async fn link_monitors(conn: &Connection, maintenance: &Maintenance) -> Result<()> {
    for monitor_id in &maintenance.monitor_ids {
        conn.execute(
            "INSERT OR IGNORE INTO monitor_maintenances (monitor_id, maintenance_id) VALUES (?, ?)",
            params![monitor_id.clone(), maintenance.id.clone()],
        )
        .await
        .with_context(|| format!("failed to link monitor {} to maintenance {}", monitor_id, maintenance.id))?;
    }
    Ok(())
}

#[async_trait]
impl MonitorRepository for LibsqlStore {
    async fn find_by_id(&self, id: &str) -> Result<Option<Monitor>> {
        let monitors = self
            .query_monitors(&format!("SELECT {MONITOR_COLUMNS} FROM monitors WHERE id = ?"), params![id])
            .await?;
        Ok(monitors.into_iter().next())
    }

    async fn find_active_paginated(&self, page: usize, limit: usize) -> Result<Vec<Monitor>> {
        self.query_monitors(
            &format!("SELECT {MONITOR_COLUMNS} FROM monitors WHERE active = 1 ORDER BY id LIMIT ? OFFSET ?"),
            params![limit as i64, (page * limit) as i64],
        )
        .await
    }

    async fn update_partial(&self, id: &str, patch: &MonitorPatch) -> Result<Option<Monitor>> {
        let Some(mut monitor) = MonitorRepository::find_by_id(self, id).await? else {
            return Ok(None);
        };
        if patch.is_empty() {
            return Ok(Some(monitor));
        }
        patch.apply(&mut monitor);

        let conn = self.get_conn().await?;
        conn.execute(
            "UPDATE monitors SET status = ?, active = ?, interval_seconds = ?, name = ?, updated_at = ? WHERE id = ?",
            params![
                monitor.status.code(),
                monitor.active as i64,
                monitor.interval_seconds,
                monitor.name.clone(),
                Utc::now().timestamp(),
                id
            ],
        )
        .await?;
        Ok(Some(monitor))
    }

    async fn find_one_by_push_token(&self, token: &str) -> Result<Option<Monitor>> {
        let monitors = self
            .query_monitors(
                &format!("SELECT {MONITOR_COLUMNS} FROM monitors WHERE push_token = ?"),
                params![token],
            )
            .await?;
        Ok(monitors.into_iter().next())
    }

    async fn find_by_proxy_id(&self, proxy_id: &str) -> Result<Vec<Monitor>> {
        self.query_monitors(
            &format!("SELECT {MONITOR_COLUMNS} FROM monitors WHERE proxy_id = ? ORDER BY id"),
            params![proxy_id],
        )
        .await
    }
}

#[async_trait]
impl MaintenanceService for LibsqlStore {
    async fn get_maintenances_by_monitor_id(&self, monitor_id: &str) -> Result<Vec<Maintenance>> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {MAINTENANCE_COLUMNS} FROM maintenances m JOIN monitor_maintenances mm ON mm.maintenance_id = m.id WHERE mm.monitor_id = ? ORDER BY m.id"
                ),
                params![monitor_id],
            )
            .await?;

        let mut maintenances = Vec::new();
        while let Some(row) = rows.next().await? {
            maintenances.push(row_to_maintenance(&row)?);
        }
        for maintenance in &mut maintenances {
            maintenance.monitor_ids = maintenance_monitor_ids(&conn, &maintenance.id).await?;
        }
        Ok(maintenances)
    }
}

#[async_trait]
impl ProxyService for LibsqlStore {
    async fn find_by_id(&self, id: &str) -> Result<Option<Proxy>> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(
                "SELECT id, protocol, host, port, auth, username, password FROM proxies WHERE id = ?",
                params![id],
            )
            .await?;

        let Some(row) = rows.next().await? else {
            return Ok(None);
        };
        Ok(Some(Proxy {
            id: row.get(0)?,
            protocol: row.get(1)?,
            host: row.get(2)?,
            port: u16::try_from(row.get::<i64>(3)?).context("stored proxy port out of range")?,
            auth: row.get::<i64>(4)? != 0,
            username: row.get(5)?,
            password: row.get(6)?,
        }))
    }
}

#[async_trait]
impl HeartbeatService for LibsqlStore {
    async fn create(&self, heartbeat: &Heartbeat) -> Result<Heartbeat> {
        let mut stored = heartbeat.clone();
        let id = stored.id.clone().unwrap_or_else(|| Uuid::new_v4().to_string());
        stored.id = Some(id.clone());

        let conn = self.get_conn().await?;
        conn.execute(
            &format!("INSERT INTO heartbeats ({HEARTBEAT_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"),
            params![
                id,
                stored.monitor_id.clone(),
                stored.status.code(),
                stored.ping_ms,
                stored.retries,
                stored.time.timestamp_millis(),
                stored.end_time.timestamp_millis(),
                stored.message.clone(),
                stored.important as i64
            ],
        )
        .await?;
        Ok(stored)
    }

    async fn find_by_monitor_id_paginated(
        &self,
        monitor_id: &str,
        limit: usize,
        page: usize,
    ) -> Result<Vec<Heartbeat>> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {HEARTBEAT_COLUMNS} FROM heartbeats WHERE monitor_id = ? ORDER BY time DESC, rowid DESC LIMIT ? OFFSET ?"
                ),
                params![monitor_id, limit as i64, (page * limit) as i64],
            )
            .await?;

        let mut heartbeats = Vec::new();
        while let Some(row) = rows.next().await? {
            heartbeats.push(row_to_heartbeat(&row)?);
        }
        Ok(heartbeats)
    }

    async fn delete_by_monitor_id(&self, monitor_id: &str) -> Result<u64> {
        let conn = self.get_conn().await?;
        Ok(conn.execute("DELETE FROM heartbeats WHERE monitor_id = ?", params![monitor_id]).await?)
    }
}
