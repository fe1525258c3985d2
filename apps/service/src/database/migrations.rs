use anyhow::Result;
use libsql::Connection;

/// Schema version - increment when making schema changes
const SCHEMA_VERSION: i32 = 2;

/// Run database migrations
///
/// This is the single source of truth for the replica's schema.
pub async fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL,
            description TEXT
        )",
        (),
    )
    .await?;

    let current_version = get_current_version(conn).await?;

    if current_version >= SCHEMA_VERSION {
        tracing::info!("Database schema is up to date (version {})", current_version);
        return Ok(());
    }

    tracing::info!("Running migrations from version {} to {}", current_version, SCHEMA_VERSION);

    if current_version < 1 {
        run_migration_v1(conn).await?;
        record_migration(conn, 1, "Monitors, proxies and heartbeats").await?;
    }

    if current_version < 2 {
        run_migration_v2(conn).await?;
        record_migration(conn, 2, "Maintenance windows").await?;
    }

    tracing::info!("Database migrations completed successfully (now at version {})", SCHEMA_VERSION);
    Ok(())
}

/// Get current schema version from database
pub(crate) async fn get_current_version(conn: &Connection) -> Result<i32> {
    let mut rows = conn.query("SELECT MAX(version) FROM schema_migrations", ()).await?;

    if let Some(row) = rows.next().await? {
        let version: Option<i32> = row.get(0)?;
        Ok(version.unwrap_or(0))
    } else {
        Ok(0)
    }
}

/// Record that a migration was applied
async fn record_migration(conn: &Connection, version: i32, description: &str) -> Result<()> {
    let now = chrono::Utc::now().timestamp();

    conn.execute(
        "INSERT INTO schema_migrations (version, applied_at, description) VALUES (?, ?, ?)",
        libsql::params![version, now, description],
    )
    .await?;

    tracing::info!("Applied migration v{}: {}", version, description);
    Ok(())
}

/// Migration v1: monitors, proxies, heartbeats
async fn run_migration_v1(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS proxies (
            id TEXT PRIMARY KEY,
            protocol TEXT NOT NULL,
            host TEXT NOT NULL,
            port INTEGER NOT NULL,
            auth INTEGER NOT NULL DEFAULT 0,
            username TEXT,
            password TEXT,
            created_at INTEGER NOT NULL
        )",
        (),
    )
    .await?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS monitors (
            id TEXT PRIMARY KEY,
            org_id TEXT NOT NULL DEFAULT '',
            type TEXT NOT NULL,
            name TEXT NOT NULL DEFAULT '',
            interval_seconds INTEGER NOT NULL DEFAULT 60,
            timeout_seconds INTEGER NOT NULL DEFAULT 16,
            max_retries INTEGER NOT NULL DEFAULT 0,
            retry_interval INTEGER NOT NULL DEFAULT 60,
            resend_interval INTEGER NOT NULL DEFAULT 0,
            active INTEGER NOT NULL DEFAULT 1,
            status INTEGER NOT NULL DEFAULT 2,
            config TEXT NOT NULL DEFAULT '{}',
            proxy_id TEXT,
            push_token TEXT UNIQUE,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            FOREIGN KEY (proxy_id) REFERENCES proxies(id) ON DELETE SET NULL
        )",
        (),
    )
    .await?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS heartbeats (
            id TEXT PRIMARY KEY,
            monitor_id TEXT NOT NULL,
            status INTEGER NOT NULL,
            ping_ms INTEGER NOT NULL DEFAULT 0,
            retries INTEGER NOT NULL DEFAULT 0,
            time INTEGER NOT NULL,
            end_time INTEGER NOT NULL,
            message TEXT NOT NULL DEFAULT '',
            important INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY (monitor_id) REFERENCES monitors(id) ON DELETE CASCADE
        )",
        (),
    )
    .await?;

    conn.execute("CREATE INDEX IF NOT EXISTS idx_monitors_active ON monitors(active)", ()).await?;
    conn.execute("CREATE INDEX IF NOT EXISTS idx_monitors_proxy ON monitors(proxy_id)", ()).await?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_heartbeats_monitor_time ON heartbeats(monitor_id, time DESC)",
        (),
    )
    .await?;

    Ok(())
}

/// Migration v2: maintenance windows and their monitor links
async fn run_migration_v2(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS maintenances (
            id TEXT PRIMARY KEY,
            org_id TEXT NOT NULL DEFAULT '',
            title TEXT NOT NULL DEFAULT '',
            strategy TEXT NOT NULL,
            active INTEGER NOT NULL DEFAULT 1,
            start_datetime TEXT,
            end_datetime TEXT,
            start_time TEXT,
            end_time TEXT,
            weekdays TEXT NOT NULL DEFAULT '[]',
            days_of_month TEXT NOT NULL DEFAULT '[]',
            interval_day INTEGER,
            cron TEXT,
            duration_minutes INTEGER,
            timezone TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )",
        (),
    )
    .await?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS monitor_maintenances (
            monitor_id TEXT NOT NULL,
            maintenance_id TEXT NOT NULL,
            PRIMARY KEY (monitor_id, maintenance_id),
            FOREIGN KEY (monitor_id) REFERENCES monitors(id) ON DELETE CASCADE,
            FOREIGN KEY (maintenance_id) REFERENCES maintenances(id) ON DELETE CASCADE
        )",
        (),
    )
    .await?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_monitor_maintenances_maintenance ON monitor_maintenances(maintenance_id)",
        (),
    )
    .await?;

    Ok(())
}
