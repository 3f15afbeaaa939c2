// Database layer: the metrics store (posts in, metrics and clusters out).
//
// SQLite via rusqlite with the "bundled" feature is the default; PostgreSQL
// via sqlx is behind the `postgres` feature. The SQLite file lives wherever
// MURMUR_DB_PATH points (defaults to ./murmur.db).

pub mod models;
pub mod traits;

#[cfg(feature = "sqlite")]
pub mod queries;
#[cfg(feature = "sqlite")]
pub mod schema;
#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "postgres")]
pub mod postgres;

pub use models::{ClusterMember, CoordinationCluster, CoordinationMetric, StoreStats};
pub use traits::Database;

#[cfg(feature = "sqlite")]
use anyhow::Context;
use anyhow::Result;
use std::sync::Arc;

/// Open (or create) the SQLite database and run migrations.
///
/// Called by `murmur init` and by `murmur import`, which may be the first
/// command run against a fresh path.
#[cfg(feature = "sqlite")]
pub fn initialize_sqlite(db_path: &str) -> Result<Arc<dyn Database>> {
    use std::path::Path;

    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory for database: {db_path}"))?;
        }
    }

    let conn = open_connection(db_path)?;
    schema::create_tables(&conn)?;
    Ok(Arc::new(sqlite::SqliteDatabase::new(conn)))
}

/// Open an existing SQLite database (fails if it doesn't exist yet).
///
/// Migrations still run so an older file picks up new columns.
#[cfg(feature = "sqlite")]
pub fn open_sqlite(db_path: &str) -> Result<Arc<dyn Database>> {
    if !std::path::Path::new(db_path).exists() {
        anyhow::bail!("Database not found at {db_path}. Run `murmur init` first.");
    }
    let conn = open_connection(db_path)?;
    schema::create_tables(&conn)?;
    Ok(Arc::new(sqlite::SqliteDatabase::new(conn)))
}

#[cfg(feature = "sqlite")]
fn open_connection(db_path: &str) -> Result<rusqlite::Connection> {
    let conn = rusqlite::Connection::open(db_path)
        .with_context(|| format!("Failed to open database at {db_path}"))?;

    // WAL lets readers run alongside the single writer
    conn.pragma_update(None, "journal_mode", "WAL")?;
    // Wait briefly on a locked database before reporting a conflict
    conn.busy_timeout(std::time::Duration::from_secs(5))?;

    Ok(conn)
}

/// Connect to PostgreSQL and run migrations.
#[cfg(feature = "postgres")]
pub async fn connect_postgres(database_url: &str) -> Result<Arc<dyn Database>> {
    let db = postgres::PgDatabase::connect(database_url).await?;
    Ok(Arc::new(db))
}
