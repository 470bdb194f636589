//! SQLite schema migration management.
//!
//! Versioned migrations create the schema; afterwards
//! [`reconcile_metric_columns`] adds any metric column an older experiments
//! table lacks, so stores written by earlier releases keep loading.

use sqlx::{Row, SqlitePool};
use thiserror::Error;
use tracing::info;

use crate::domain::models::Metric;

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("Failed to execute migration {version}: {source}")]
    ExecutionError { version: i64, #[source] source: sqlx::Error },
    #[error("Failed to get schema version: {0}")]
    VersionCheckError(#[source] sqlx::Error),
    #[error("Failed to add column {column}: {source}")]
    ColumnError { column: String, #[source] source: sqlx::Error },
}

#[derive(Debug, Clone)]
pub struct Migration {
    pub version: i64,
    pub description: String,
    pub sql: String,
}

pub struct Migrator {
    pool: SqlitePool,
}

impl Migrator {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn run_embedded_migrations(&self, migrations: Vec<Migration>) -> Result<usize, MigrationError> {
        self.ensure_migrations_table().await?;
        let current_version = self.get_current_version().await?;
        let pending: Vec<_> = migrations.into_iter().filter(|m| m.version > current_version).collect();

        for migration in &pending {
            self.apply_migration(migration).await?;
        }

        Ok(pending.len())
    }

    async fn ensure_migrations_table(&self) -> Result<(), MigrationError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL DEFAULT (datetime('now')),
                description TEXT
            )"
        )
        .execute(&self.pool)
        .await
        .map_err(|e| MigrationError::ExecutionError { version: 0, source: e })?;
        Ok(())
    }

    pub async fn get_current_version(&self) -> Result<i64, MigrationError> {
        let result: Option<(i64,)> = sqlx::query_as("SELECT COALESCE(MAX(version), 0) FROM schema_migrations")
            .fetch_optional(&self.pool)
            .await
            .map_err(MigrationError::VersionCheckError)?;
        Ok(result.map_or(0, |(v,)| v))
    }

    async fn apply_migration(&self, migration: &Migration) -> Result<(), MigrationError> {
        let err = |e| MigrationError::ExecutionError { version: migration.version, source: e };

        sqlx::raw_sql(&migration.sql).execute(&self.pool).await.map_err(err)?;
        sqlx::query("INSERT INTO schema_migrations (version, description) VALUES (?, ?)")
            .bind(migration.version)
            .bind(&migration.description)
            .execute(&self.pool)
            .await
            .map_err(err)?;

        info!(version = migration.version, description = %migration.description, "applied migration");
        Ok(())
    }
}

pub fn initial_schema_migration() -> Migration {
    Migration {
        version: 1,
        description: "Experiments table".to_string(),
        sql: include_str!("../../../migrations/001_experiments.sql").to_string(),
    }
}

pub fn all_embedded_migrations() -> Vec<Migration> {
    vec![initial_schema_migration()]
}

/// Numeric columns every experiments row is expected to carry.
pub fn expected_metric_columns() -> Vec<&'static str> {
    Metric::ALL
        .iter()
        .map(|m| m.key())
        .chain(["cpu_usage", "memory_mb"])
        .collect()
}

/// Add every missing metric column as `REAL DEFAULT 0`. Returns the added names.
pub async fn reconcile_metric_columns(pool: &SqlitePool) -> Result<Vec<String>, MigrationError> {
    let rows = sqlx::query("PRAGMA table_info(experiments)")
        .fetch_all(pool)
        .await
        .map_err(MigrationError::VersionCheckError)?;
    let existing: Vec<String> = rows
        .iter()
        .filter_map(|r| r.try_get::<String, _>("name").ok())
        .collect();

    let mut added = Vec::new();
    for column in expected_metric_columns() {
        if existing.iter().any(|c| c == column) {
            continue;
        }
        // Column names come from the fixed metric set, never from input.
        sqlx::query(&format!("ALTER TABLE experiments ADD COLUMN {column} REAL DEFAULT 0"))
            .execute(pool)
            .await
            .map_err(|e| MigrationError::ColumnError { column: column.to_string(), source: e })?;
        added.push(column.to_string());
    }

    if !added.is_empty() {
        info!(columns = ?added, "added missing experiment columns");
    }
    Ok(added)
}
