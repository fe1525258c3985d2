/// Persistence for the replica
///
/// libsql (SQLite) tables behind the ports the scheduler consumes.
pub mod migrations;
pub mod repository;

pub use repository::LibsqlStore;

use anyhow::Result;

/// Initialize database with schema
pub async fn initialize_database(conn: &libsql::Connection) -> Result<()> {
    migrations::run_migrations(conn).await
}
