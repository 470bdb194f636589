//! Common test utilities for integration tests
//!
//! Provides shared fixtures for the optimizer and store integration tests.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tempfile::TempDir;

use vpn_tuner::adapters::remote::ScriptedExecutor;
use vpn_tuner::domain::models::{Config, Metric, MetricSummary, ProbeCache, ProbeReport, ProbeResult};
use vpn_tuner::domain::ports::NetworkMeasurer;

/// Create a temporary test database
///
/// Returns the path to a SQLite database file in a temporary directory.
pub fn temp_db_path() -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let db_path = dir.path().join("experiments.db");
    (dir, db_path)
}

/// Setup test logging
pub fn setup_test_logging() {
    use tracing_subscriber::fmt;

    let _ = fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Config with a host set and every delay removed.
pub fn fast_config(max_experiments: u32, min_experiments: u32) -> Config {
    let mut config = Config::default();
    config.remote.host = "203.0.113.10".to_string();
    config.remote.scripts_dir = "/nonexistent/scripts".to_string();
    config.optimizer.max_experiments = max_experiments;
    config.optimizer.min_experiments = min_experiments;
    config.optimizer.settle_delay_ms = 0;
    config.measurement.inter_round_delay_ms = 0;
    config
}

/// Last value applied to `param` through the config modification script.
pub fn last_applied(executor: &ScriptedExecutor, param: &str) -> Option<String> {
    executor
        .commands()
        .iter()
        .rev()
        .filter(|cmd| cmd.contains("modify_config.sh"))
        .find_map(|cmd| {
            let parts: Vec<&str> = cmd.split('\'').collect();
            if parts.get(1) == Some(&param) {
                parts.get(3).map(ToString::to_string)
            } else {
                None
            }
        })
}

/// Simulated host whose network quality follows the parameters applied so far.
///
/// BBR congestion control lowers latency and raises throughput; an MTU of
/// 1280 adds latency. Every round of a trial reports the same values.
pub struct SimulatedHostMeasurer {
    executor: Arc<ScriptedExecutor>,
}

impl SimulatedHostMeasurer {
    pub fn new(executor: Arc<ScriptedExecutor>) -> Self {
        Self { executor }
    }

    pub fn metrics_for(congestion: Option<&str>, mtu: Option<&str>) -> MetricSummary {
        let bbr = congestion == Some("bbr");
        let mut latency = if bbr { 50.0 } else { 80.0 };
        if mtu == Some("1280") {
            latency += 5.0;
        }
        MetricSummary::default()
            .with(Metric::LatencyMs, latency)
            .with(Metric::DownloadMbps, if bbr { 150.0 } else { 100.0 })
            .with(Metric::UploadMbps, 40.0)
            .with(Metric::JitterMs, 3.0)
            .with(Metric::DnsMs, 20.0)
    }
}

#[async_trait]
impl NetworkMeasurer for SimulatedHostMeasurer {
    async fn run_full_test(&self, _cache: &ProbeCache) -> ProbeReport {
        let congestion = last_applied(&self.executor, "tcp_congestion");
        let mtu = last_applied(&self.executor, "mtu");
        let summary = Self::metrics_for(congestion.as_deref(), mtu.as_deref());
        ProbeReport::from_results(Metric::ALL.map(|m| ProbeResult::success(m, summary.get(m), 1.0)))
    }
}
