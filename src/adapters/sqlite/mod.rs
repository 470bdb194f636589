//! SQLite database adapters for the experiment store.

pub mod connection;
pub mod experiment_repository;
pub mod migrations;

pub use connection::{create_pool, create_test_pool, database_url, ConnectionError, PoolConfig};
pub use experiment_repository::SqliteExperimentRepository;
pub use migrations::{
    all_embedded_migrations, reconcile_metric_columns, Migration, MigrationError, Migrator,
};

use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::SqlitePool;

use crate::domain::errors::{DomainError, DomainResult};

/// Parse a stored timestamp. RFC 3339 is written; naive ISO-8601 strings from
/// older stores are read as UTC.
pub fn parse_datetime(s: &str) -> DomainResult<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f"))
        .map(|naive| naive.and_utc())
        .map_err(|e| DomainError::SerializationError(format!("Invalid timestamp {s:?}: {e}")))
}

#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),
    #[error("Migration error: {0}")]
    Migration(#[from] MigrationError),
}

async fn migrate(pool: &SqlitePool) -> Result<(), DatabaseError> {
    Migrator::new(pool.clone())
        .run_embedded_migrations(all_embedded_migrations())
        .await?;
    reconcile_metric_columns(pool).await?;
    Ok(())
}

/// Open (creating if needed) and migrate the store at `path`.
pub async fn initialize_database(path: &str, max_connections: u32) -> Result<SqlitePool, DatabaseError> {
    let config = PoolConfig { max_connections, ..PoolConfig::default() };
    let pool = create_pool(&database_url(path), Some(config)).await?;
    migrate(&pool).await?;
    Ok(pool)
}

/// Create an in-memory test pool with all migrations applied.
pub async fn create_migrated_test_pool() -> Result<SqlitePool, DatabaseError> {
    let pool = create_test_pool().await?;
    migrate(&pool).await?;
    Ok(pool)
}
