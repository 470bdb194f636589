//! Experiment results and the final recommendation.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::probe::MetricSummary;

/// Parameter name to value, as proposed by the oracle.
pub type ConfigMap = BTreeMap<String, serde_json::Value>;

/// Key that marks the untouched starting configuration.
pub const BASELINE_MARKER: &str = "baseline";

/// Keys carried inside a config map that are never applied to the host.
pub const RESERVED_CONFIG_KEYS: [&str; 2] = [BASELINE_MARKER, "reasoning"];

/// The baseline marker config: `{"baseline": true}`.
pub fn baseline_config() -> ConfigMap {
    let mut config = ConfigMap::new();
    config.insert(BASELINE_MARKER.to_string(), serde_json::Value::Bool(true));
    config
}

pub fn is_baseline_config(config: &ConfigMap) -> bool {
    config
        .get(BASELINE_MARKER)
        .and_then(serde_json::Value::as_bool)
        .unwrap_or(false)
}

/// One measured trial of a configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentResult {
    /// Store-assigned id; `None` until persisted.
    pub id: Option<i64>,
    pub timestamp: DateTime<Utc>,
    pub config: ConfigMap,
    #[serde(flatten)]
    pub metrics: MetricSummary,
    /// Sandbox CPU time in seconds.
    pub cpu_usage: f64,
    pub memory_mb: f64,
    pub score: f64,
    pub ai_reasoning: String,
}

impl ExperimentResult {
    pub fn new(config: ConfigMap, metrics: MetricSummary, score: f64) -> Self {
        Self {
            id: None,
            timestamp: Utc::now(),
            config,
            metrics,
            cpu_usage: 0.0,
            memory_mb: 0.0,
            score,
            ai_reasoning: String::new(),
        }
    }

    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.ai_reasoning = reasoning.into();
        self
    }

    pub fn with_resources(mut self, cpu_usage: f64, memory_mb: f64) -> Self {
        self.cpu_usage = cpu_usage;
        self.memory_mb = memory_mb;
        self
    }

    pub fn is_baseline(&self) -> bool {
        is_baseline_config(&self.config)
    }
}

/// Exported outcome of a finished session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub config: ConfigMap,
    pub score: f64,
    pub baseline_score: Option<f64>,
    pub improvement_pct: f64,
    pub metrics: MetricSummary,
    pub reasoning: String,
    pub experiments_run: u32,
}

impl Recommendation {
    pub fn from_results(
        best: &ExperimentResult,
        baseline: Option<&ExperimentResult>,
        experiments_run: u32,
    ) -> Self {
        let baseline_score = baseline.map(|b| b.score);
        Self {
            config: best.config.clone(),
            score: best.score,
            baseline_score,
            improvement_pct: improvement_pct(best.score, baseline_score),
            metrics: best.metrics,
            reasoning: best.ai_reasoning.clone(),
            experiments_run,
        }
    }
}

/// Relative improvement over the baseline in percent, 2 decimals.
/// Zero when the baseline is missing or not positive.
pub fn improvement_pct(score: f64, baseline_score: Option<f64>) -> f64 {
    match baseline_score {
        Some(base) if base > 0.0 => ((score - base) / base * 100.0 * 100.0).round() / 100.0,
        _ => 0.0,
    }
}
