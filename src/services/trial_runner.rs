//! Per-trial measurement protocol.
//!
//! A trial applies a candidate configuration, measures it over several
//! rounds, aggregates the rounds, scores the result and persists it.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::probes::shell_quote;
use super::scoring::{calculate_score, nothing_scored};
use super::statistics::{aggregate_rounds, coefficient_of_variation, mean};
use crate::domain::errors::DomainResult;
use crate::domain::models::{
    is_baseline_config, ConfigMap, ExperimentResult, MeasurementConfig, MetricSummary,
    OptimizationSession, OptimizerConfig, RemoteConfig, RESERVED_CONFIG_KEYS,
};
use crate::domain::ports::{ExperimentRepository, NetworkMeasurer, RemoteExecutor};

const RESOURCE_TIMEOUT: Duration = Duration::from_secs(5);
const BYTES_PER_MIB: f64 = 1024.0 * 1024.0;

/// Why measurement stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundExit {
    Completed,
    /// Running mean fell below the skip ratio of the baseline.
    SmartSkip,
    /// Round scores were already stable.
    AdaptiveExit,
}

/// Which measurement policy a trial follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrialKind {
    /// First trial of a session: nothing applied, fills the probe cache.
    Baseline,
    /// Oracle-proposed configuration, eligible for Smart Skip.
    Candidate,
}

#[derive(Debug, Clone)]
pub struct TrialOutcome {
    pub result: ExperimentResult,
    pub rounds: u32,
    pub exit: RoundExit,
    /// Set when applying the configuration failed; the trial was still measured.
    pub apply_error: Option<String>,
    /// No scored probe succeeded in any round, so the score is not a measurement.
    pub unmeasured: bool,
}

pub struct TrialRunner {
    executor: Arc<dyn RemoteExecutor>,
    measurer: Arc<dyn NetworkMeasurer>,
    repository: Arc<dyn ExperimentRepository>,
    measurement: MeasurementConfig,
    modify_script: String,
    cgroup_path: String,
    apply_timeout: Duration,
    settle_delay: Duration,
}

impl TrialRunner {
    pub fn new(
        executor: Arc<dyn RemoteExecutor>,
        measurer: Arc<dyn NetworkMeasurer>,
        repository: Arc<dyn ExperimentRepository>,
        remote: &RemoteConfig,
        optimizer: &OptimizerConfig,
        measurement: &MeasurementConfig,
    ) -> Self {
        Self {
            executor,
            measurer,
            repository,
            measurement: measurement.clone(),
            modify_script: format!("{}/modify_config.sh", remote.scratch_dir),
            cgroup_path: remote.cgroup_path.clone(),
            apply_timeout: Duration::from_secs(optimizer.apply_timeout_secs),
            settle_delay: Duration::from_millis(optimizer.settle_delay_ms),
        }
    }

    /// Apply each parameter in turn, stopping at the first failure.
    pub async fn apply_config(&self, config: &ConfigMap) -> Result<(), String> {
        for (param, value) in config {
            if RESERVED_CONFIG_KEYS.contains(&param.as_str()) {
                continue;
            }
            let rendered = match value {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            let cmd = format!(
                "bash {} {} {}",
                self.modify_script,
                shell_quote(param),
                shell_quote(&rendered)
            );
            let out = self.executor.execute(&cmd, self.apply_timeout).await;
            if !out.success {
                warn!(param = %param, value = %rendered, error = %out.output, "failed to apply parameter");
                return Err(format!("{param}={rendered}: {}", out.output));
            }
            debug!(param = %param, value = %rendered, "parameter applied");
        }
        tokio::time::sleep(self.settle_delay).await;
        Ok(())
    }

    /// Run one trial. A candidate carrying the baseline marker is measured
    /// without applying anything, but keeps the candidate policy.
    pub async fn run_trial(
        &self,
        session: &mut OptimizationSession,
        kind: TrialKind,
        config: &ConfigMap,
        reasoning: &str,
    ) -> DomainResult<TrialOutcome> {
        let is_baseline = kind == TrialKind::Baseline;
        let apply_error = if is_baseline || is_baseline_config(config) {
            None
        } else {
            self.apply_config(config).await.err()
        };

        let (summaries, scores, exit, unmeasured) = self.measure_rounds(session, is_baseline).await;
        let metrics = aggregate_rounds(&summaries, self.measurement.round_trim_pct);
        let score = calculate_score(&metrics);
        let (cpu, memory) = self.resource_usage().await;

        let mut result = ExperimentResult::new(config.clone(), metrics, score)
            .with_reasoning(reasoning)
            .with_resources(cpu, memory);
        result.id = Some(self.repository.save(&result).await?);
        session.record(&result);

        info!(
            score,
            rounds = scores.len(),
            exit = ?exit,
            baseline = is_baseline,
            "trial finished"
        );
        if unmeasured {
            warn!(score, "every scored probe failed");
        }

        Ok(TrialOutcome {
            result,
            rounds: u32::try_from(scores.len()).unwrap_or(u32::MAX),
            exit,
            apply_error,
            unmeasured,
        })
    }

    async fn measure_rounds(
        &self,
        session: &mut OptimizationSession,
        is_baseline: bool,
    ) -> (Vec<MetricSummary>, Vec<f64>, RoundExit, bool) {
        let cfg = &self.measurement;
        let baseline_score = session.baseline_score().unwrap_or(0.0);
        let mut summaries = Vec::new();
        let mut scores = Vec::new();
        let mut unmeasured = true;

        for round in 1..=cfg.max_rounds.max(1) {
            if round > 1 {
                tokio::time::sleep(Duration::from_millis(cfg.inter_round_delay_ms)).await;
            }

            let report = self.measurer.run_full_test(&session.cache).await;
            if is_baseline && round == 1 {
                session.cache_from(&report);
            }

            unmeasured &= nothing_scored(&report);
            let summary = report.summary();
            let score = calculate_score(&summary);
            debug!(round, score, "measurement round");
            summaries.push(summary);
            scores.push(score);

            if round == cfg.smart_skip_round
                && !is_baseline
                && baseline_score > 0.0
                && mean(&scores) < baseline_score * cfg.smart_skip_ratio
            {
                info!(round, running_mean = mean(&scores), baseline_score, "smart skip");
                return (summaries, scores, RoundExit::SmartSkip, unmeasured);
            }

            if round == cfg.adaptive_exit_round && mean(&scores) > 0.0 {
                let cv = coefficient_of_variation(&scores);
                if cv < cfg.adaptive_exit_cv_pct {
                    info!(round, cv, "adaptive exit");
                    return (summaries, scores, RoundExit::AdaptiveExit, unmeasured);
                }
            }
        }

        (summaries, scores, RoundExit::Completed, unmeasured)
    }

    /// Sandbox CPU seconds and memory in MiB; unreadable values are zero.
    async fn resource_usage(&self) -> (f64, f64) {
        let cpu_out = self
            .executor
            .execute(&format!("cat {}/cpu.stat 2>/dev/null", self.cgroup_path), RESOURCE_TIMEOUT)
            .await;
        let cpu = if cpu_out.success { parse_cpu_seconds(&cpu_out.output) } else { 0.0 };

        let mem_out = self
            .executor
            .execute(&format!("cat {}/memory.current 2>/dev/null", self.cgroup_path), RESOURCE_TIMEOUT)
            .await;
        let memory = if mem_out.success {
            mem_out.output.trim().parse::<u64>().map_or(0.0, |b| b as f64 / BYTES_PER_MIB)
        } else {
            0.0
        };

        (cpu, memory)
    }
}

fn parse_cpu_seconds(cpu_stat: &str) -> f64 {
    cpu_stat
        .lines()
        .find_map(|line| line.strip_prefix("usage_usec"))
        .and_then(|rest| rest.trim().parse::<f64>().ok())
        .map_or(0.0, |usec| usec / 1_000_000.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::adapters::remote::ScriptedExecutor;
    use crate::adapters::sqlite::{create_migrated_test_pool, SqliteExperimentRepository};
    use crate::domain::models::{baseline_config, Metric, ProbeCache, ProbeReport, ProbeResult};
    use crate::domain::ports::CommandOutput;

    /// Replays reports in order, repeating the last one.
    struct SequencedMeasurer {
        reports: Mutex<VecDeque<ProbeReport>>,
        cache_sizes: Mutex<Vec<usize>>,
    }

    impl SequencedMeasurer {
        fn new(reports: Vec<ProbeReport>) -> Self {
            Self { reports: Mutex::new(reports.into()), cache_sizes: Mutex::new(Vec::new()) }
        }

        fn calls(&self) -> usize {
            self.cache_sizes.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl NetworkMeasurer for SequencedMeasurer {
        async fn run_full_test(&self, cache: &ProbeCache) -> ProbeReport {
            self.cache_sizes.lock().unwrap().push(cache.len());
            let mut reports = self.reports.lock().unwrap();
            if reports.len() > 1 {
                reports.pop_front().unwrap()
            } else {
                reports.front().cloned().unwrap()
            }
        }
    }

    fn report(summary: MetricSummary) -> ProbeReport {
        ProbeReport::from_results(Metric::ALL.map(|m| ProbeResult::success(m, summary.get(m), 1.0)))
    }

    fn good() -> ProbeReport {
        report(MetricSummary { download_mbps: 2000.0, upload_mbps: 2000.0, ..MetricSummary::default() })
    }

    fn bad() -> ProbeReport {
        report(MetricSummary {
            latency_ms: 900.0,
            jitter_ms: 300.0,
            packet_loss_pct: 40.0,
            dns_ms: 900.0,
            tcp_handshake_ms: 900.0,
            tls_handshake_ms: 900.0,
            bufferbloat_ms: 900.0,
            stability_cv: 300.0,
            download_mbps: 1.0,
            upload_mbps: 1.0,
            ..MetricSummary::default()
        })
    }

    fn fast_configs() -> (RemoteConfig, OptimizerConfig, MeasurementConfig) {
        let optimizer = OptimizerConfig { settle_delay_ms: 0, ..OptimizerConfig::default() };
        let measurement = MeasurementConfig { inter_round_delay_ms: 0, ..MeasurementConfig::default() };
        (RemoteConfig::default(), optimizer, measurement)
    }

    async fn runner(
        executor: Arc<ScriptedExecutor>,
        measurer: Arc<SequencedMeasurer>,
    ) -> (TrialRunner, Arc<SqliteExperimentRepository>) {
        let repo = Arc::new(SqliteExperimentRepository::new(create_migrated_test_pool().await.unwrap()));
        let (remote, optimizer, measurement) = fast_configs();
        let runner = TrialRunner::new(executor, measurer, repo.clone(), &remote, &optimizer, &measurement);
        (runner, repo)
    }

    fn trial_config() -> ConfigMap {
        let mut config = ConfigMap::new();
        config.insert("congestion".into(), "bbr".into());
        config.insert("mtu".into(), 1420.into());
        config.insert("reasoning".into(), "ignored".into());
        config
    }

    #[tokio::test]
    async fn test_stable_baseline_exits_after_three_rounds_and_fills_cache() {
        let executor = Arc::new(ScriptedExecutor::new());
        let measurer = Arc::new(SequencedMeasurer::new(vec![good()]));
        let (runner, _repo) = runner(executor.clone(), measurer.clone()).await;
        let mut session = OptimizationSession::new();

        let outcome = runner.run_trial(&mut session, TrialKind::Baseline, &baseline_config(), "baseline").await.unwrap();

        assert_eq!(outcome.exit, RoundExit::AdaptiveExit);
        assert_eq!(outcome.rounds, 3);
        assert_eq!(*measurer.cache_sizes.lock().unwrap(), vec![0, 4, 4]);
        assert_eq!(session.baseline_score(), Some(outcome.result.score));
        assert_eq!(executor.count_matching("modify_config.sh"), 0);
    }

    #[tokio::test]
    async fn test_weak_trial_is_skipped_after_two_rounds() {
        let executor = Arc::new(ScriptedExecutor::new().with_fallback(CommandOutput::ok("")));
        let measurer = Arc::new(SequencedMeasurer::new(vec![bad()]));
        let (runner, repo) = runner(executor, measurer.clone()).await;
        let mut session = OptimizationSession::new();
        session.record(&ExperimentResult::new(baseline_config(), MetricSummary::default(), 60.0));

        let outcome = runner.run_trial(&mut session, TrialKind::Candidate, &trial_config(), "try bbr").await.unwrap();

        assert_eq!(outcome.exit, RoundExit::SmartSkip);
        assert_eq!(measurer.calls(), 2);
        assert!(outcome.result.score < 48.0);
        assert_eq!(repo.count().await.unwrap(), 1);
        assert_eq!(session.best.as_ref().map(|b| b.score), Some(60.0));
    }

    #[tokio::test]
    async fn test_noisy_trial_runs_every_round() {
        let executor = Arc::new(ScriptedExecutor::new().with_fallback(CommandOutput::ok("")));
        let measurer = Arc::new(SequencedMeasurer::new(vec![good(), bad(), good(), bad(), good()]));
        let (runner, _repo) = runner(executor, measurer.clone()).await;
        let mut session = OptimizationSession::new();

        let outcome = runner.run_trial(&mut session, TrialKind::Candidate, &trial_config(), "").await.unwrap();

        assert_eq!(outcome.exit, RoundExit::Completed);
        assert_eq!(outcome.rounds, 5);
        // No session baseline yet, so nothing is cached and nothing skipped.
        assert!(session.cache.is_empty());
    }

    #[tokio::test]
    async fn test_apply_skips_reserved_keys_and_stops_on_failure() {
        let executor = Arc::new(
            ScriptedExecutor::new()
                .on("modify_config.sh 'congestion'", CommandOutput::failure("sysctl: permission denied"))
                .with_fallback(CommandOutput::ok("")),
        );
        let measurer = Arc::new(SequencedMeasurer::new(vec![good()]));
        let (runner, _repo) = runner(executor.clone(), measurer).await;
        let mut session = OptimizationSession::new();

        let outcome = runner.run_trial(&mut session, TrialKind::Candidate, &trial_config(), "").await.unwrap();

        let error = outcome.apply_error.unwrap();
        assert!(error.contains("congestion=bbr"));
        // BTreeMap order: congestion fails first, mtu is never attempted.
        assert_eq!(executor.count_matching("modify_config.sh"), 1);
        assert_eq!(executor.count_matching("'reasoning'"), 0);
    }

    #[tokio::test]
    async fn test_marked_candidate_keeps_candidate_policy() {
        let executor = Arc::new(ScriptedExecutor::new().with_fallback(CommandOutput::ok("")));
        let measurer = Arc::new(SequencedMeasurer::new(vec![bad()]));
        let (runner, _repo) = runner(executor.clone(), measurer.clone()).await;
        let mut session = OptimizationSession::new();
        session.record(&ExperimentResult::new(baseline_config(), MetricSummary::default(), 60.0));

        let mut config = baseline_config();
        config.insert("mtu".into(), 1400.into());
        let outcome = runner
            .run_trial(&mut session, TrialKind::Candidate, &config, "")
            .await
            .unwrap();

        assert_eq!(executor.count_matching("modify_config.sh"), 0);
        assert_eq!(outcome.exit, RoundExit::SmartSkip);
        assert_eq!(measurer.calls(), 2);
        assert!(session.cache.is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_host_marks_trial_unmeasured() {
        let executor = Arc::new(ScriptedExecutor::new().with_fallback(CommandOutput::ok("")));
        let down = ProbeReport::from_results(Metric::ALL.map(|m| ProbeResult::failed(m, "host unreachable")));
        let (down_runner, _repo) = runner(executor.clone(), Arc::new(SequencedMeasurer::new(vec![down]))).await;
        let mut session = OptimizationSession::new();

        let outcome = down_runner
            .run_trial(&mut session, TrialKind::Candidate, &trial_config(), "")
            .await
            .unwrap();
        assert!(outcome.unmeasured);
        assert!(outcome.result.score > 0.0);

        let (up_runner, _repo) = runner(executor, Arc::new(SequencedMeasurer::new(vec![good()]))).await;
        let outcome = up_runner
            .run_trial(&mut session, TrialKind::Candidate, &trial_config(), "")
            .await
            .unwrap();
        assert!(!outcome.unmeasured);
    }

    #[tokio::test]
    async fn test_resource_usage_from_cgroup_files() {
        let executor = Arc::new(
            ScriptedExecutor::new()
                .on("cpu.stat", CommandOutput::ok("usage_usec 2500000\nuser_usec 2000000"))
                .on("memory.current", CommandOutput::ok("67108864")),
        );
        let measurer = Arc::new(SequencedMeasurer::new(vec![good()]));
        let (runner, _repo) = runner(executor, measurer).await;
        let mut session = OptimizationSession::new();

        let outcome = runner.run_trial(&mut session, TrialKind::Baseline, &baseline_config(), "").await.unwrap();
        assert!((outcome.result.cpu_usage - 2.5).abs() < 1e-9);
        assert!((outcome.result.memory_mb - 64.0).abs() < 1e-9);
    }

    #[test]
    fn test_parse_cpu_seconds_tolerates_garbage() {
        assert_eq!(parse_cpu_seconds("nr_periods 0"), 0.0);
        assert_eq!(parse_cpu_seconds("usage_usec abc"), 0.0);
    }
}
