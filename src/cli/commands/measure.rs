use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;

use crate::adapters::remote::OpenSshExecutor;
use crate::cli::output::progress::create_spinner;
use crate::cli::output::{output, CommandOutput, TableFormatter};
use crate::domain::models::{Config, MetricSummary, ProbeCache, ProbeReport};
use crate::domain::ports::{NetworkMeasurer, RemoteExecutor};
use crate::infrastructure::config::ConfigLoader;
use crate::services::{calculate_score, MeasurementHarness};

#[derive(Debug, Serialize)]
pub struct MeasureOutput {
    pub host: String,
    pub report: ProbeReport,
    pub metrics: MetricSummary,
    pub score: f64,
}

impl MeasureOutput {
    pub fn new(host: impl Into<String>, report: ProbeReport) -> Self {
        let metrics = report.summary();
        Self {
            host: host.into(),
            score: calculate_score(&metrics),
            metrics,
            report,
        }
    }
}

impl CommandOutput for MeasureOutput {
    fn to_human(&self) -> String {
        let succeeded = self.report.iter().filter(|r| r.succeeded).count();
        let total = self.report.iter().count();
        format!(
            "Measurement of {}\n{}\nProbes succeeded: {succeeded}/{total}\nScore: {:.2}",
            self.host,
            TableFormatter::new().format_probes(&self.report),
            self.score
        )
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

/// One full measurement pass against the current host configuration.
pub async fn execute(config: &Config, json_mode: bool) -> Result<()> {
    ConfigLoader::validate_remote(&config.remote)?;

    let executor: Arc<dyn RemoteExecutor> = Arc::new(OpenSshExecutor::new(config.remote.clone()));
    let harness = MeasurementHarness::new(executor.clone(), &config.remote, &config.measurement);

    let spinner = (!json_mode).then(|| create_spinner(format!("Measuring {}", config.remote.host)));
    let report = harness.run_full_test(&ProbeCache::new()).await;
    if let Some(spinner) = spinner {
        spinner.finish_and_clear();
    }
    executor.close().await;

    output(&MeasureOutput::new(&config.remote.host, report), json_mode);
    Ok(())
}
