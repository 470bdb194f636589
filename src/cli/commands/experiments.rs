use anyhow::{Context, Result};
use serde::Serialize;

use crate::adapters::sqlite::{initialize_database, SqliteExperimentRepository};
use crate::cli::output::{output, CommandOutput, TableFormatter};
use crate::cli::types::ExperimentCommands;
use crate::domain::models::{Config, ExperimentResult};
use crate::domain::ports::ExperimentRepository;

#[derive(Debug, Serialize)]
pub struct ExperimentListOutput {
    pub experiments: Vec<ExperimentResult>,
    pub total: usize,
}

impl CommandOutput for ExperimentListOutput {
    fn to_human(&self) -> String {
        if self.experiments.is_empty() {
            return "No experiments found.".to_string();
        }
        format!(
            "{}\n\nShowing {} experiment{}",
            TableFormatter::new().format_experiments(&self.experiments),
            self.total,
            if self.total == 1 { "" } else { "s" }
        )
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

#[derive(Debug, Serialize)]
pub struct CountOutput {
    pub count: u64,
}

impl CommandOutput for CountOutput {
    fn to_human(&self) -> String {
        format!("{} experiment(s) stored", self.count)
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

#[derive(Debug, Serialize)]
pub struct ClearOutput {
    pub removed: u64,
}

impl CommandOutput for ClearOutput {
    fn to_human(&self) -> String {
        format!("Removed {} experiment(s)", self.removed)
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

pub async fn execute(command: ExperimentCommands, config: &Config, json_mode: bool) -> Result<()> {
    let pool = initialize_database(&config.database.path, config.database.max_connections)
        .await
        .context("Failed to open experiment database")?;
    let repository = SqliteExperimentRepository::new(pool);
    run(command, &repository, json_mode).await
}

pub async fn run(command: ExperimentCommands, repository: &dyn ExperimentRepository, json_mode: bool) -> Result<()> {
    match command {
        ExperimentCommands::List => {
            let experiments = repository.get_all().await.context("Failed to list experiments")?;
            output(&list(experiments), json_mode);
        }
        ExperimentCommands::Best { limit } => {
            let experiments = repository
                .get_best(limit)
                .await
                .context("Failed to load best experiments")?;
            output(&list(experiments), json_mode);
        }
        ExperimentCommands::Baseline => {
            let baseline = repository.get_baseline().await.context("Failed to load baseline")?;
            output(&list(baseline.into_iter().collect()), json_mode);
        }
        ExperimentCommands::Count => {
            let count = repository.count().await.context("Failed to count experiments")?;
            output(&CountOutput { count }, json_mode);
        }
        ExperimentCommands::Clear => {
            let removed = repository.count().await.context("Failed to count experiments")?;
            repository.clear().await.context("Failed to clear experiments")?;
            output(&ClearOutput { removed }, json_mode);
        }
    }
    Ok(())
}

fn list(experiments: Vec<ExperimentResult>) -> ExperimentListOutput {
    ExperimentListOutput { total: experiments.len(), experiments }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::create_migrated_test_pool;
    use crate::domain::models::{baseline_config, MetricSummary};

    async fn seeded() -> SqliteExperimentRepository {
        let repo = SqliteExperimentRepository::new(create_migrated_test_pool().await.unwrap());
        repo.save(&ExperimentResult::new(baseline_config(), MetricSummary::default(), 50.0))
            .await
            .unwrap();
        repo.save(&ExperimentResult::new(Default::default(), MetricSummary::default(), 65.0))
            .await
            .unwrap();
        repo
    }

    #[tokio::test]
    async fn test_every_subcommand_runs() {
        let repo = seeded().await;
        for command in [
            ExperimentCommands::List,
            ExperimentCommands::Best { limit: 1 },
            ExperimentCommands::Baseline,
            ExperimentCommands::Count,
        ] {
            run(command, &repo, true).await.unwrap();
        }
        assert_eq!(repo.count().await.unwrap(), 2);

        run(ExperimentCommands::Clear, &repo, true).await.unwrap();
        assert_eq!(repo.count().await.unwrap(), 0);
    }

    #[test]
    fn test_empty_list_message() {
        assert_eq!(list(Vec::new()).to_human(), "No experiments found.");
        assert_eq!(CountOutput { count: 3 }.to_json()["count"], 3);
    }
}
