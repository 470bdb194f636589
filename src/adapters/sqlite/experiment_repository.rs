use std::sync::LazyLock;

use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::adapters::sqlite::parse_datetime;
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{ConfigMap, ExperimentResult, Metric, MetricSummary};
use crate::domain::ports::ExperimentRepository;

static METRIC_COLUMNS: LazyLock<String> = LazyLock::new(|| {
    Metric::ALL.iter().map(|m| m.key()).collect::<Vec<_>>().join(", ")
});

static SELECT_COLUMNS: LazyLock<String> = LazyLock::new(|| {
    format!(
        "id, timestamp, config, {}, cpu_usage, memory_mb, score, ai_reasoning",
        *METRIC_COLUMNS
    )
});

static INSERT_SQL: LazyLock<String> = LazyLock::new(|| {
    // timestamp, config, metrics, cpu_usage, memory_mb, score, ai_reasoning
    let placeholders = vec!["?"; Metric::ALL.len() + 6].join(", ");
    format!(
        "INSERT INTO experiments (timestamp, config, {}, cpu_usage, memory_mb, score, ai_reasoning) VALUES ({placeholders})",
        *METRIC_COLUMNS
    )
});

#[derive(Clone)]
pub struct SqliteExperimentRepository {
    pool: SqlitePool,
}

impl SqliteExperimentRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn fetch(&self, tail: &str) -> DomainResult<Vec<ExperimentResult>> {
        let sql = format!("SELECT {} FROM experiments {tail}", *SELECT_COLUMNS);
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(row_to_experiment).collect()
    }
}

/// Missing or NULL numeric columns read as zero.
fn real(row: &SqliteRow, column: &str) -> DomainResult<f64> {
    Ok(row.try_get::<Option<f64>, _>(column)?.unwrap_or(0.0))
}

fn row_to_experiment(row: &SqliteRow) -> DomainResult<ExperimentResult> {
    let config_json: String = row.try_get("config")?;
    let config: ConfigMap = serde_json::from_str(&config_json)
        .map_err(|e| DomainError::SerializationError(format!("Invalid stored config: {e}")))?;

    let mut metrics = MetricSummary::default();
    for metric in Metric::ALL {
        metrics.set(metric, real(row, metric.key())?);
    }

    Ok(ExperimentResult {
        id: Some(row.try_get("id")?),
        timestamp: parse_datetime(&row.try_get::<String, _>("timestamp")?)?,
        config,
        metrics,
        cpu_usage: real(row, "cpu_usage")?,
        memory_mb: real(row, "memory_mb")?,
        score: real(row, "score")?,
        ai_reasoning: row.try_get::<Option<String>, _>("ai_reasoning")?.unwrap_or_default(),
    })
}

#[async_trait]
impl ExperimentRepository for SqliteExperimentRepository {
    async fn save(&self, result: &ExperimentResult) -> DomainResult<i64> {
        let config_json = serde_json::to_string(&result.config)?;

        let mut query = sqlx::query(INSERT_SQL.as_str())
            .bind(result.timestamp.to_rfc3339())
            .bind(config_json);
        for metric in Metric::ALL {
            query = query.bind(result.metrics.get(metric));
        }
        let done = query
            .bind(result.cpu_usage)
            .bind(result.memory_mb)
            .bind(result.score)
            .bind(&result.ai_reasoning)
            .execute(&self.pool)
            .await?;

        Ok(done.last_insert_rowid())
    }

    async fn get(&self, id: i64) -> DomainResult<Option<ExperimentResult>> {
        let sql = format!("SELECT {} FROM experiments WHERE id = ?", *SELECT_COLUMNS);
        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await?;
        row.as_ref().map(row_to_experiment).transpose()
    }

    async fn get_best(&self, limit: usize) -> DomainResult<Vec<ExperimentResult>> {
        self.fetch(&format!("ORDER BY score DESC, id ASC LIMIT {limit}")).await
    }

    async fn get_all(&self) -> DomainResult<Vec<ExperimentResult>> {
        self.fetch("ORDER BY id ASC").await
    }

    async fn get_baseline(&self) -> DomainResult<Option<ExperimentResult>> {
        Ok(self.fetch("ORDER BY id ASC LIMIT 1").await?.into_iter().next())
    }

    async fn count(&self) -> DomainResult<u64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM experiments")
            .fetch_one(&self.pool)
            .await?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    async fn clear(&self) -> DomainResult<()> {
        sqlx::query("DELETE FROM experiments").execute(&self.pool).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::{create_migrated_test_pool, create_test_pool, reconcile_metric_columns};
    use crate::domain::models::baseline_config;

    async fn setup() -> SqliteExperimentRepository {
        SqliteExperimentRepository::new(create_migrated_test_pool().await.unwrap())
    }

    fn trial(param: &str, value: &str, score: f64) -> ExperimentResult {
        let mut config = ConfigMap::new();
        config.insert(param.to_string(), serde_json::Value::String(value.to_string()));
        let metrics = MetricSummary::default()
            .with(Metric::LatencyMs, 42.5)
            .with(Metric::DownloadMbps, 310.0)
            .with(Metric::XrayDrops, 3.0);
        ExperimentResult::new(config, metrics, score).with_reasoning("try bbr")
    }

    #[tokio::test]
    async fn test_save_and_get_round_trips_every_metric() {
        let repo = setup().await;
        let stored = trial("tcp_congestion", "bbr", 71.25).with_resources(1.5, 64.0);

        let id = repo.save(&stored).await.unwrap();
        let loaded = repo.get(id).await.unwrap().unwrap();

        assert_eq!(loaded.id, Some(id));
        assert_eq!(loaded.config, stored.config);
        assert_eq!(loaded.metrics, stored.metrics);
        assert_eq!(loaded.score, 71.25);
        assert_eq!(loaded.cpu_usage, 1.5);
        assert_eq!(loaded.ai_reasoning, "try bbr");
        assert!(repo.get(id + 100).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_best_orders_by_score_with_stable_ties() {
        let repo = setup().await;
        let low = repo.save(&trial("a", "1", 40.0)).await.unwrap();
        let first_tie = repo.save(&trial("b", "2", 80.0)).await.unwrap();
        let second_tie = repo.save(&trial("c", "3", 80.0)).await.unwrap();

        let best = repo.get_best(10).await.unwrap();
        let ids: Vec<_> = best.iter().filter_map(|e| e.id).collect();
        assert_eq!(ids, vec![first_tie, second_tie, low]);
        assert_eq!(repo.get_best(1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_baseline_is_first_stored_and_clear_empties() {
        let repo = setup().await;
        assert!(repo.get_baseline().await.unwrap().is_none());

        let base = ExperimentResult::new(baseline_config(), MetricSummary::default(), 50.0);
        repo.save(&base).await.unwrap();
        repo.save(&trial("a", "1", 90.0)).await.unwrap();

        assert!(repo.get_baseline().await.unwrap().unwrap().is_baseline());
        assert_eq!(repo.count().await.unwrap(), 2);
        assert_eq!(repo.get_all().await.unwrap().len(), 2);

        repo.clear().await.unwrap();
        assert_eq!(repo.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_legacy_table_gains_missing_columns() {
        let pool = create_test_pool().await.unwrap();
        sqlx::raw_sql(
            "CREATE TABLE experiments (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                config TEXT NOT NULL,
                latency_ms REAL,
                download_mbps REAL,
                jitter_ms REAL,
                packet_loss_pct REAL,
                dns_ms REAL,
                score REAL,
                ai_reasoning TEXT
            );
            INSERT INTO experiments (timestamp, config, latency_ms, download_mbps, score)
            VALUES ('2025-11-02T08:15:00.123456', '{\"baseline\": true}', 55.0, 120.0, 48.0);",
        )
        .execute(&pool)
        .await
        .unwrap();

        let added = reconcile_metric_columns(&pool).await.unwrap();
        assert!(added.contains(&"xray_drops".to_string()));
        assert!(added.contains(&"memory_mb".to_string()));
        assert!(!added.contains(&"latency_ms".to_string()));

        let repo = SqliteExperimentRepository::new(pool);
        let legacy = repo.get_baseline().await.unwrap().unwrap();
        assert_eq!(legacy.metrics.latency_ms, 55.0);
        assert_eq!(legacy.metrics.upload_mbps, 0.0);
        assert_eq!(legacy.metrics.jitter_ms, 0.0);
        assert_eq!(legacy.ai_reasoning, "");
    }
}
