//! Table output formatting for CLI commands
//!
//! Renders experiments, probe reports and recommendations with comfy-table.

use crate::domain::models::{ConfigMap, ExperimentResult, Metric, ProbeReport, Recommendation};
use comfy_table::{presets, Attribute, Cell, Color, ContentArrangement, Table};
use std::env;

use super::truncate;

const CONFIG_COLUMN_CHARS: usize = 60;

/// Table formatter for CLI output
pub struct TableFormatter {
    /// Whether to use colors in output
    use_colors: bool,
    /// Maximum width for tables (None = auto)
    max_width: Option<usize>,
}

impl TableFormatter {
    pub fn new() -> Self {
        Self {
            use_colors: supports_color(),
            max_width: None,
        }
    }

    pub fn with_config(use_colors: bool, max_width: Option<usize>) -> Self {
        Self {
            use_colors,
            max_width,
        }
    }

    /// One row per stored experiment.
    pub fn format_experiments(&self, experiments: &[ExperimentResult]) -> String {
        let mut table = self.create_base_table();
        table.set_header(header(&["ID", "Time", "Score", "Latency", "Download", "Upload", "Config"]));

        for experiment in experiments {
            let id = experiment.id.map(|id| id.to_string()).unwrap_or_else(|| "-".to_string());
            let config = if experiment.is_baseline() {
                "baseline".to_string()
            } else {
                truncate(&format_config(&experiment.config), CONFIG_COLUMN_CHARS)
            };
            table.add_row(vec![
                Cell::new(id),
                Cell::new(experiment.timestamp.format("%Y-%m-%d %H:%M:%S").to_string()),
                Cell::new(format!("{:.2}", experiment.score)),
                Cell::new(format!("{:.2} ms", experiment.metrics.latency_ms)),
                Cell::new(format!("{:.2} Mbps", experiment.metrics.download_mbps)),
                Cell::new(format!("{:.2} Mbps", experiment.metrics.upload_mbps)),
                Cell::new(config),
            ]);
        }

        table.to_string()
    }

    /// One row per probe with its status.
    pub fn format_probes(&self, report: &ProbeReport) -> String {
        let mut table = self.create_base_table();
        table.set_header(header(&["Probe", "Status", "Value", "Duration", "Error"]));

        for result in report.iter() {
            let status = if self.use_colors {
                let (text, color) = if result.succeeded { ("ok", Color::Green) } else { ("failed", Color::Red) };
                Cell::new(text).fg(color)
            } else {
                Cell::new(if result.succeeded { "✓ ok" } else { "✗ failed" })
            };
            table.add_row(vec![
                Cell::new(result.metric.probe_name()),
                status,
                Cell::new(format!("{:.2} {}", result.value, result.unit)),
                Cell::new(format!("{:.0} ms", result.duration_ms)),
                Cell::new(result.error.as_deref().map(|e| truncate(e, 50)).unwrap_or_default()),
            ]);
        }

        table.to_string()
    }

    /// Key figures of a recommendation followed by the per-metric breakdown.
    pub fn format_recommendation(&self, recommendation: &Recommendation) -> String {
        let mut summary = self.create_base_table();
        summary.set_header(header(&["Field", "Value"]));
        let baseline = recommendation
            .baseline_score
            .map_or_else(|| "-".to_string(), |s| format!("{s:.2}"));
        let improvement = if self.use_colors {
            let color = if recommendation.improvement_pct > 0.0 { Color::Green } else { Color::Yellow };
            Cell::new(format!("{:+.2}%", recommendation.improvement_pct)).fg(color)
        } else {
            Cell::new(format!("{:+.2}%", recommendation.improvement_pct))
        };
        summary.add_row(vec![Cell::new("Score"), Cell::new(format!("{:.2}", recommendation.score))]);
        summary.add_row(vec![Cell::new("Baseline score"), Cell::new(baseline)]);
        summary.add_row(vec![Cell::new("Improvement"), improvement]);
        summary.add_row(vec![
            Cell::new("Experiments run"),
            Cell::new(recommendation.experiments_run.to_string()),
        ]);
        summary.add_row(vec![Cell::new("Config"), Cell::new(format_config(&recommendation.config))]);
        if !recommendation.reasoning.is_empty() {
            summary.add_row(vec![Cell::new("Reasoning"), Cell::new(&recommendation.reasoning)]);
        }

        let mut metrics = self.create_base_table();
        metrics.set_header(header(&["Metric", "Value"]));
        for metric in Metric::ALL {
            metrics.add_row(vec![
                Cell::new(metric.to_string()),
                Cell::new(format!("{:.2} {}", recommendation.metrics.get(metric), metric.unit())),
            ]);
        }

        format!("{summary}\n{metrics}")
    }

    fn create_base_table(&self) -> Table {
        let mut table = Table::new();

        table.load_preset(presets::UTF8_FULL)
            .set_content_arrangement(ContentArrangement::Dynamic);

        if let Some(width) = self.max_width {
            table.set_width(width as u16);
        }

        table
    }
}

impl Default for TableFormatter {
    fn default() -> Self {
        Self::new()
    }
}

fn header(names: &[&str]) -> Vec<Cell> {
    names.iter().map(|n| Cell::new(n).add_attribute(Attribute::Bold)).collect()
}

/// `key=value` pairs, reserved keys skipped, in key order.
pub fn format_config(config: &ConfigMap) -> String {
    config
        .iter()
        .filter(|(key, _)| key.as_str() != "reasoning")
        .map(|(key, value)| match value {
            serde_json::Value::String(s) => format!("{key}={s}"),
            other => format!("{key}={other}"),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Check if color output is supported
fn supports_color() -> bool {
    // Respect NO_COLOR environment variable
    if env::var("NO_COLOR").is_ok() {
        return false;
    }

    if let Ok(term) = env::var("TERM") {
        if term == "dumb" {
            return false;
        }
    }

    console::colors_enabled()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{baseline_config, MetricSummary, ProbeResult};
    use serde_json::json;

    fn plain() -> TableFormatter {
        TableFormatter::with_config(false, Some(160))
    }

    #[test]
    fn test_format_config() {
        let mut config = ConfigMap::new();
        config.insert("tcp_congestion".into(), json!("bbr"));
        config.insert("mtu".into(), json!(1420));
        config.insert("reasoning".into(), json!("ignored"));
        assert_eq!(format_config(&config), "mtu=1420, tcp_congestion=bbr");
    }

    #[test]
    fn test_format_experiments() {
        let mut baseline = ExperimentResult::new(baseline_config(), MetricSummary::default(), 41.5);
        baseline.id = Some(1);
        let mut config = ConfigMap::new();
        config.insert("tcp_congestion".into(), json!("bbr"));
        let trial = ExperimentResult::new(config, MetricSummary::default().with(Metric::LatencyMs, 35.0), 57.25);

        let rendered = plain().format_experiments(&[baseline, trial]);
        assert!(rendered.contains("baseline"));
        assert!(rendered.contains("tcp_congestion=bbr"));
        assert!(rendered.contains("57.25"));
        assert!(rendered.contains("35.00 ms"));
    }

    #[test]
    fn test_format_probes_marks_failures() {
        let report = ProbeReport::from_results([
            ProbeResult::success(Metric::LatencyMs, 42.0, 120.0),
            ProbeResult::failed(Metric::DownloadMbps, "host unreachable"),
        ]);

        let rendered = plain().format_probes(&report);
        assert!(rendered.contains("✓ ok"));
        assert!(rendered.contains("✗ failed"));
        assert!(rendered.contains("host unreachable"));
    }

    #[test]
    fn test_format_recommendation() {
        let best = ExperimentResult::new(ConfigMap::new(), MetricSummary::default(), 75.0)
            .with_reasoning("bbr reduced latency");
        let base = ExperimentResult::new(baseline_config(), MetricSummary::default(), 60.0);
        let recommendation = Recommendation::from_results(&best, Some(&base), 3);

        let rendered = plain().format_recommendation(&recommendation);
        assert!(rendered.contains("+25.00%"));
        assert!(rendered.contains("60.00"));
        assert!(rendered.contains("bbr reduced latency"));
    }
}
