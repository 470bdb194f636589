//! Closed-loop optimization of a remote host's network configuration.
//!
//! The orchestrator deploys the sandbox helpers, measures a baseline and then
//! alternates between asking the decision oracle for the next step and
//! executing it. Rejected decisions are answered with a [`Correction`] rather
//! than aborting. Cleanup of the remote sandbox always runs once per run.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::context_collector::ServerContextCollector;
use super::probes::truncate_chars;
use super::prompts::{self, Budgets};
use super::trial_runner::{TrialKind, TrialRunner};
use crate::domain::errors::DomainError;
use crate::domain::models::{
    baseline_config, ChatMessage, ConfigMap, Config, Correction, Decision, DecisionAction,
    OptimizationSession, OptimizerConfig, OptimizerPhase, Recommendation, RemoteConfig,
    RESERVED_CONFIG_KEYS,
};
use crate::domain::ports::{DecisionOracle, ExperimentRepository, NetworkMeasurer, RemoteExecutor};

/// Helper scripts pushed to the host before a run.
pub const SANDBOX_SCRIPTS: [&str; 5] = [
    "setup_cgroups.sh",
    "modify_config.sh",
    "run_in_sandbox.sh",
    "create_xui_sandbox.sh",
    "cleanup_sandbox.sh",
];

const CLEANUP_TIMEOUT: Duration = Duration::from_secs(30);
const STATUS_COMMAND_CHARS: usize = 50;

#[derive(Debug, Error)]
pub enum OptimizerError {
    #[error("Failed to deploy sandbox scripts: {0}")]
    DeployFailed(String),

    #[error("Sandbox setup failed: {0}")]
    SetupFailed(String),

    #[error("Optimization cancelled")]
    Cancelled,

    #[error("No experiment completed")]
    NoResult,

    #[error(transparent)]
    Domain(#[from] DomainError),
}

/// Progress reported by a running optimization.
#[derive(Debug, Clone)]
pub enum OptimizerEvent {
    Phase(OptimizerPhase),
    Status(String),
    Progress { current: u32, total: u32 },
    Correction(Correction),
    /// A trial finished. Index 0 is the baseline.
    ExperimentCompleted {
        index: u32,
        config: ConfigMap,
        score: f64,
        best_score: f64,
    },
    Finished(Box<Recommendation>),
    Failed(String),
}

type Events = mpsc::Sender<OptimizerEvent>;

async fn emit(events: &Events, event: OptimizerEvent) {
    let _ = events.send(event).await;
}

pub struct OptimizationOrchestrator {
    executor: Arc<dyn RemoteExecutor>,
    oracle: Arc<dyn DecisionOracle>,
    trials: TrialRunner,
    collector: ServerContextCollector,
    remote: RemoteConfig,
    optimizer: OptimizerConfig,
    cancel: CancellationToken,
}

impl OptimizationOrchestrator {
    pub fn new(
        executor: Arc<dyn RemoteExecutor>,
        measurer: Arc<dyn NetworkMeasurer>,
        repository: Arc<dyn ExperimentRepository>,
        oracle: Arc<dyn DecisionOracle>,
        config: &Config,
    ) -> Self {
        let trials = TrialRunner::new(
            executor.clone(),
            measurer,
            repository,
            &config.remote,
            &config.optimizer,
            &config.measurement,
        );
        let collector = ServerContextCollector::new(executor.clone(), config.remote.host.clone());

        Self {
            executor,
            oracle,
            trials,
            collector,
            remote: config.remote.clone(),
            optimizer: config.optimizer.clone(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Run one optimization session to completion.
    pub async fn run(&self, events: Events) -> Result<Recommendation, OptimizerError> {
        let run_id = Uuid::new_v4();
        let span = info_span!("optimization", run_id = %run_id, host = %self.remote.host);

        async {
            let mut session = OptimizationSession::new();
            let outcome = self.drive(&mut session, &events).await;
            self.cleanup(&events).await;

            match outcome {
                Ok(recommendation) => {
                    let _ = session.transition(OptimizerPhase::Finished);
                    emit(&events, OptimizerEvent::Phase(OptimizerPhase::Finished)).await;
                    info!(
                        score = recommendation.score,
                        improvement_pct = recommendation.improvement_pct,
                        experiments = recommendation.experiments_run,
                        "optimization finished"
                    );
                    emit(&events, OptimizerEvent::Finished(Box::new(recommendation.clone()))).await;
                    Ok(recommendation)
                }
                Err(e) => {
                    let _ = session.transition(OptimizerPhase::Failed);
                    error!(error = %e, phase = %session.phase, "optimization failed");
                    emit(&events, OptimizerEvent::Failed(e.to_string())).await;
                    Err(e)
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn enter(
        &self,
        session: &mut OptimizationSession,
        phase: OptimizerPhase,
        events: &Events,
    ) -> Result<(), OptimizerError> {
        let changed = session.phase != phase;
        session.transition(phase)?;
        if changed {
            emit(events, OptimizerEvent::Phase(phase)).await;
        }
        Ok(())
    }

    async fn status(&self, events: &Events, text: impl Into<String>) {
        let text = text.into();
        info!(status = %text, "optimizer status");
        emit(events, OptimizerEvent::Status(text)).await;
    }

    async fn drive(
        &self,
        session: &mut OptimizationSession,
        events: &Events,
    ) -> Result<Recommendation, OptimizerError> {
        self.enter(session, OptimizerPhase::CollectingContext, events).await?;
        self.status(events, "Collecting server context").await;
        let context = self.collector.collect().await;

        self.enter(session, OptimizerPhase::Deploying, events).await?;
        self.deploy(events).await?;

        self.enter(session, OptimizerPhase::SettingUp, events).await?;
        self.setup(events).await?;

        if self.cancel.is_cancelled() {
            return Err(OptimizerError::Cancelled);
        }

        self.enter(session, OptimizerPhase::Baselining, events).await?;
        self.status(events, "Measuring baseline").await;
        emit(events, OptimizerEvent::Progress { current: 0, total: self.optimizer.max_experiments }).await;
        let baseline = self
            .trials
            .run_trial(session, TrialKind::Baseline, &baseline_config(), "Baseline: current configuration")
            .await?
            .result;
        emit(
            events,
            OptimizerEvent::ExperimentCompleted {
                index: 0,
                config: baseline.config.clone(),
                score: baseline.score,
                best_score: baseline.score,
            },
        )
        .await;

        self.enter(session, OptimizerPhase::Deciding, events).await?;
        let mut messages = vec![
            ChatMessage::system(prompts::system_prompt(
                self.optimizer.min_experiments,
                self.optimizer.max_diagnostic_calls,
            )),
            ChatMessage::user(prompts::baseline_message(&context, &baseline)),
        ];
        self.decision_loop(session, &mut messages, events).await?;

        let best = session.best.as_ref().ok_or(OptimizerError::NoResult)?;
        Ok(Recommendation::from_results(best, session.baseline.as_ref(), session.experiments_run))
    }

    async fn deploy(&self, events: &Events) -> Result<(), OptimizerError> {
        self.status(events, "Uploading sandbox scripts").await;
        let scratch = &self.remote.scratch_dir;
        let timeout = Duration::from_secs(self.optimizer.setup_timeout_secs);

        let out = self.executor.execute(&format!("mkdir -p {scratch}"), timeout).await;
        if !out.success {
            return Err(OptimizerError::DeployFailed(out.output));
        }

        for script in SANDBOX_SCRIPTS {
            let local = Path::new(&self.remote.scripts_dir).join(script);
            if !local.exists() {
                warn!(path = %local.display(), "sandbox script not found locally, skipping");
                continue;
            }
            self.executor
                .transfer(&local, &format!("{scratch}/{script}"))
                .await
                .map_err(|e| OptimizerError::DeployFailed(e.to_string()))?;
        }

        let out = self.executor.execute(&format!("chmod +x {scratch}/*.sh"), timeout).await;
        if !out.success {
            return Err(OptimizerError::DeployFailed(out.output));
        }
        Ok(())
    }

    async fn setup(&self, events: &Events) -> Result<(), OptimizerError> {
        self.status(events, "Configuring sandbox").await;
        let cmd = format!("bash {}/setup_cgroups.sh", self.remote.scratch_dir);
        let out = self
            .executor
            .execute(&cmd, Duration::from_secs(self.optimizer.setup_timeout_secs))
            .await;
        if !out.success {
            return Err(OptimizerError::SetupFailed(out.output));
        }
        Ok(())
    }

    fn budgets(&self, session: &OptimizationSession) -> Budgets {
        Budgets {
            experiments_run: session.experiments_run,
            max_experiments: self.optimizer.max_experiments,
            diagnostics_used: session.diagnostic_calls_used,
            max_diagnostics: self.optimizer.max_diagnostic_calls,
        }
    }

    async fn ask(&self, messages: &[ChatMessage]) -> Decision {
        match self.oracle.complete(messages).await {
            Ok(reply) => Decision::from_reply(&reply),
            Err(e) => {
                warn!(oracle = self.oracle.name(), error = %e, "oracle call failed");
                Decision::finish(e.to_string())
            }
        }
    }

    async fn decision_loop(
        &self,
        session: &mut OptimizationSession,
        messages: &mut Vec<ChatMessage>,
        events: &Events,
    ) -> Result<(), OptimizerError> {
        let max = self.optimizer.max_experiments;

        for turn in 0..max.saturating_mul(2) {
            if self.cancel.is_cancelled() {
                info!(turn, "optimization cancelled, stopping decision loop");
                break;
            }
            if session.experiments_run >= max {
                break;
            }

            let decision = self.ask(messages).await;
            messages.push(ChatMessage::assistant(serde_json::to_string(&decision).map_err(DomainError::from)?));

            if decision.action == DecisionAction::SshCommand {
                self.diagnose(session, &decision, messages, events).await?;
                continue;
            }

            if decision.wants_finish() {
                if session.experiments_run < self.optimizer.min_experiments {
                    let correction = Correction::PrematureFinish {
                        experiments_run: session.experiments_run,
                        required: self.optimizer.min_experiments,
                    };
                    self.correct(session, correction, messages, events).await?;
                    continue;
                }
                let summary = if decision.summary.is_empty() { "Optimization complete" } else { decision.summary.as_str() };
                self.status(events, summary).await;
                break;
            }

            let applicable = decision
                .config
                .keys()
                .any(|k| !RESERVED_CONFIG_KEYS.contains(&k.as_str()));
            if !applicable {
                self.correct(session, Correction::EmptyConfig, messages, events).await?;
                continue;
            }

            self.experiment(session, &decision, messages, events).await?;
        }
        Ok(())
    }

    async fn correct(
        &self,
        session: &mut OptimizationSession,
        correction: Correction,
        messages: &mut Vec<ChatMessage>,
        events: &Events,
    ) -> Result<(), OptimizerError> {
        warn!(correction = ?correction, "decision rejected");
        self.enter(session, OptimizerPhase::Deciding, events).await?;
        messages.push(ChatMessage::user(correction.message()));
        emit(events, OptimizerEvent::Correction(correction)).await;
        Ok(())
    }

    async fn diagnose(
        &self,
        session: &mut OptimizationSession,
        decision: &Decision,
        messages: &mut Vec<ChatMessage>,
        events: &Events,
    ) -> Result<(), OptimizerError> {
        let cap = self.optimizer.max_diagnostic_calls;
        if session.diagnostic_calls_used >= cap {
            return self
                .correct(session, Correction::DiagnosticBudgetExhausted { cap }, messages, events)
                .await;
        }
        let command = decision.ssh_command.trim();
        if command.is_empty() {
            return self.correct(session, Correction::MissingCommand, messages, events).await;
        }

        self.enter(session, OptimizerPhase::Diagnosing, events).await?;
        session.diagnostic_calls_used += 1;
        self.status(
            events,
            format!(
                "Diagnostic [{}/{cap}]: {}",
                session.diagnostic_calls_used,
                truncate_chars(command, STATUS_COMMAND_CHARS)
            ),
        )
        .await;

        let out = self
            .executor
            .execute(command, Duration::from_secs(self.optimizer.diagnostic_timeout_secs))
            .await;
        let output = truncate_chars(&out.output, self.optimizer.diagnostic_output_chars);
        messages.push(ChatMessage::user(prompts::diagnostic_feedback(
            command,
            out.success,
            output,
            self.budgets(session),
        )));

        self.enter(session, OptimizerPhase::Deciding, events).await
    }

    async fn experiment(
        &self,
        session: &mut OptimizationSession,
        decision: &Decision,
        messages: &mut Vec<ChatMessage>,
        events: &Events,
    ) -> Result<(), OptimizerError> {
        self.enter(session, OptimizerPhase::Testing, events).await?;
        session.experiments_run += 1;
        let index = session.experiments_run;
        let config_json = serde_json::to_string(&decision.config).map_err(DomainError::from)?;

        emit(events, OptimizerEvent::Progress { current: index, total: self.optimizer.max_experiments }).await;
        self.status(events, format!("Experiment {index}: {config_json}")).await;

        let outcome = self
            .trials
            .run_trial(session, TrialKind::Candidate, &decision.config, &decision.reasoning)
            .await?;
        if let Some(apply_error) = &outcome.apply_error {
            self.status(events, format!("Config apply failed, measuring anyway: {apply_error}")).await;
        }
        if outcome.unmeasured {
            self.status(events, format!("Experiment {index}: every scored probe failed")).await;
        }

        let result = &outcome.result;
        let best_score = session.best.as_ref().map_or(result.score, |b| b.score);
        info!(experiment = index, score = result.score, best_score, config = %config_json, "experiment complete");
        emit(
            events,
            OptimizerEvent::ExperimentCompleted {
                index,
                config: result.config.clone(),
                score: result.score,
                best_score,
            },
        )
        .await;

        let feedback = prompts::experiment_feedback(
            index,
            result,
            session.baseline.as_ref(),
            session.best.as_ref(),
            self.budgets(session),
        );
        messages.push(ChatMessage::user(if outcome.unmeasured {
            format!("{}{feedback}", prompts::UNMEASURED_WARNING)
        } else {
            feedback
        }));

        self.enter(session, OptimizerPhase::Deciding, events).await
    }

    /// Tear down the remote sandbox. Failures are logged only.
    async fn cleanup(&self, events: &Events) {
        self.status(events, "Cleaning up sandbox").await;
        let scratch = &self.remote.scratch_dir;
        for cmd in [
            format!("bash {scratch}/cleanup_sandbox.sh 2>/dev/null"),
            format!("rm -rf {scratch}"),
        ] {
            let out = self.executor.execute(&cmd, CLEANUP_TIMEOUT).await;
            if !out.success {
                warn!(command = %cmd, error = %out.output, "cleanup step failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;

    use crate::adapters::oracle::ScriptedOracle;
    use crate::adapters::remote::ScriptedExecutor;
    use crate::adapters::sqlite::{create_migrated_test_pool, SqliteExperimentRepository};
    use crate::domain::models::{Metric, MetricSummary, ProbeCache, ProbeReport, ProbeResult};
    use crate::domain::ports::CommandOutput;

    struct SteadyMeasurer;

    #[async_trait]
    impl NetworkMeasurer for SteadyMeasurer {
        async fn run_full_test(&self, _cache: &ProbeCache) -> ProbeReport {
            let summary = MetricSummary::default()
                .with(Metric::LatencyMs, 40.0)
                .with(Metric::DownloadMbps, 200.0)
                .with(Metric::UploadMbps, 80.0);
            ProbeReport::from_results(Metric::ALL.map(|m| ProbeResult::success(m, summary.get(m), 1.0)))
        }
    }

    /// Healthy until a configuration has been applied, then unreachable.
    struct BrokenAfterApply {
        executor: Arc<ScriptedExecutor>,
    }

    #[async_trait]
    impl NetworkMeasurer for BrokenAfterApply {
        async fn run_full_test(&self, cache: &ProbeCache) -> ProbeReport {
            if self.executor.count_matching("modify_config.sh") > 0 {
                ProbeReport::from_results(Metric::ALL.map(|m| ProbeResult::failed(m, "host unreachable")))
            } else {
                SteadyMeasurer.run_full_test(cache).await
            }
        }
    }

    fn test_config(max_experiments: u32) -> Config {
        let mut config = Config::default();
        config.remote.host = "203.0.113.10".to_string();
        config.remote.scripts_dir = "/nonexistent/scripts".to_string();
        config.optimizer.max_experiments = max_experiments;
        config.optimizer.min_experiments = max_experiments.min(5);
        config.optimizer.settle_delay_ms = 0;
        config.measurement.inter_round_delay_ms = 0;
        config
    }

    fn apply(param: &str, value: serde_json::Value) -> serde_json::Value {
        json!({"action": "apply_config", "reasoning": format!("try {param}"), "config": {param: value}})
    }

    async fn orchestrator(
        executor: Arc<ScriptedExecutor>,
        oracle: Arc<ScriptedOracle>,
        config: &Config,
    ) -> OptimizationOrchestrator {
        let repo = Arc::new(SqliteExperimentRepository::new(create_migrated_test_pool().await.unwrap()));
        OptimizationOrchestrator::new(executor, Arc::new(SteadyMeasurer), repo, oracle, config)
    }

    async fn run_collecting(
        orchestrator: &OptimizationOrchestrator,
    ) -> (Result<Recommendation, OptimizerError>, Vec<OptimizerEvent>) {
        let (tx, mut rx) = mpsc::channel(16);
        let collector = tokio::spawn(async move {
            let mut seen = Vec::new();
            while let Some(event) = rx.recv().await {
                seen.push(event);
            }
            seen
        });
        let result = orchestrator.run(tx).await;
        (result, collector.await.unwrap())
    }

    fn healthy_executor() -> Arc<ScriptedExecutor> {
        Arc::new(ScriptedExecutor::new().with_fallback(CommandOutput::ok("")))
    }

    #[tokio::test]
    async fn test_premature_finish_is_corrected() {
        let executor = healthy_executor();
        let mut oracle = ScriptedOracle::new().then_json(json!({"action": "finish", "reasoning": "looks fine"}));
        for mtu in [1500, 1420, 1360, 1280, 1400] {
            oracle = oracle.then_json(apply("mtu", json!(mtu)));
        }
        let oracle = Arc::new(oracle.then_json(json!({"action": "finish", "summary": "bbr wins"})));
        let config = test_config(10);

        let (result, events) = run_collecting(&orchestrator(executor.clone(), oracle.clone(), &config).await).await;
        let recommendation = result.unwrap();

        assert_eq!(recommendation.experiments_run, 5);
        assert_eq!(oracle.remaining(), 0);
        assert!(events.iter().any(|e| matches!(
            e,
            OptimizerEvent::Correction(Correction::PrematureFinish { experiments_run: 0, required: 5 })
        )));
        assert!(matches!(events.last(), Some(OptimizerEvent::Finished(_))));
        assert_eq!(executor.count_matching("cleanup_sandbox.sh"), 1);
        assert_eq!(executor.count_matching("rm -rf"), 1);
    }

    #[tokio::test]
    async fn test_diagnostic_budget_and_empty_config() {
        let executor = healthy_executor();
        let oracle = Arc::new(
            ScriptedOracle::new()
                .then_json(json!({"action": "ssh_command", "ssh_command": "sysctl net.core.default_qdisc"}))
                .then_json(json!({"action": "diagnose", "ssh_command": "sysctl net.core.default_qdisc"}))
                .then_json(json!({"action": "apply_config", "config": {}}))
                .then_json(json!({"action": "tune", "config": {"congestion": "bbr"}}))
                .then_json(apply("mtu", json!(1420))),
        );
        let mut config = test_config(3);
        config.optimizer.min_experiments = 2;
        config.optimizer.max_diagnostic_calls = 1;

        let (result, events) = run_collecting(&orchestrator(executor.clone(), oracle.clone(), &config).await).await;

        assert_eq!(result.unwrap().experiments_run, 2);
        assert_eq!(executor.count_matching("sysctl net.core.default_qdisc"), 1);
        let corrections: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                OptimizerEvent::Correction(c) => Some(c.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(
            corrections,
            vec![Correction::DiagnosticBudgetExhausted { cap: 1 }, Correction::EmptyConfig]
        );
        // Unknown action was applied as a config.
        assert_eq!(executor.count_matching("modify_config.sh 'congestion' 'bbr'"), 1);
    }

    #[tokio::test]
    async fn test_oracle_failure_cannot_finish_early() {
        let executor = healthy_executor();
        let oracle = Arc::new(ScriptedOracle::new().then_error("connection refused"));
        let config = test_config(3);

        let (result, _events) = run_collecting(&orchestrator(executor, oracle.clone(), &config).await).await;
        let recommendation = result.unwrap();

        // Exhausted script keeps answering finish; the guard holds for 2 x max turns.
        assert_eq!(recommendation.experiments_run, 0);
        assert_eq!(recommendation.improvement_pct, 0.0);
        assert_eq!(oracle.conversations().len(), 6);
    }

    #[tokio::test]
    async fn test_setup_failure_still_cleans_up() {
        let executor = Arc::new(
            ScriptedExecutor::new()
                .on("setup_cgroups.sh", CommandOutput::failure("cgroup v2 not mounted"))
                .with_fallback(CommandOutput::ok("")),
        );
        let oracle = Arc::new(ScriptedOracle::new());

        let (result, events) = run_collecting(&orchestrator(executor.clone(), oracle, &test_config(3)).await).await;

        assert!(matches!(result, Err(OptimizerError::SetupFailed(msg)) if msg.contains("cgroup")));
        assert!(matches!(events.last(), Some(OptimizerEvent::Failed(_))));
        assert_eq!(executor.count_matching("cleanup_sandbox.sh"), 1);
    }

    #[tokio::test]
    async fn test_transfer_failure_is_fatal() {
        let scripts = tempfile::tempdir().unwrap();
        std::fs::write(scripts.path().join("setup_cgroups.sh"), "#!/bin/sh\n").unwrap();
        let executor = Arc::new(
            ScriptedExecutor::new()
                .with_fallback(CommandOutput::ok(""))
                .with_failing_transfers(),
        );
        let mut config = test_config(3);
        config.remote.scripts_dir = scripts.path().display().to_string();

        let (result, _) = run_collecting(&orchestrator(executor.clone(), Arc::new(ScriptedOracle::new()), &config).await).await;

        assert!(matches!(result, Err(OptimizerError::DeployFailed(_))));
        assert_eq!(executor.transfers().len(), 1);
        assert_eq!(executor.count_matching("setup_cgroups.sh"), 0);
        assert_eq!(executor.count_matching("rm -rf"), 1);
    }

    #[tokio::test]
    async fn test_unmeasured_experiment_is_flagged_to_oracle() {
        let executor = healthy_executor();
        let oracle = Arc::new(
            ScriptedOracle::new()
                .then_json(apply("mtu", json!(9000)))
                .then_json(json!({"action": "finish", "summary": "done"})),
        );
        let mut config = test_config(2);
        config.optimizer.min_experiments = 1;
        let repo = Arc::new(SqliteExperimentRepository::new(create_migrated_test_pool().await.unwrap()));
        let orchestrator = OptimizationOrchestrator::new(
            executor.clone(),
            Arc::new(BrokenAfterApply { executor: executor.clone() }),
            repo,
            oracle.clone(),
            &config,
        );

        let (result, events) = run_collecting(&orchestrator).await;
        assert_eq!(result.unwrap().experiments_run, 1);

        let conversations = oracle.conversations();
        let feedback = &conversations[1].last().unwrap().content;
        assert!(feedback.starts_with(prompts::UNMEASURED_WARNING));
        assert!(events.iter().any(|e| matches!(
            e,
            OptimizerEvent::Status(text) if text.contains("every scored probe failed")
        )));
        assert!(!conversations[0].last().unwrap().content.contains("WARNING"));
    }

    #[tokio::test]
    async fn test_cancel_before_baseline() {
        let executor = healthy_executor();
        let token = CancellationToken::new();
        token.cancel();
        let orchestrator = orchestrator(executor.clone(), Arc::new(ScriptedOracle::new()), &test_config(3))
            .await
            .with_cancellation(token);

        let (result, _) = run_collecting(&orchestrator).await;

        assert!(matches!(result, Err(OptimizerError::Cancelled)));
        assert_eq!(executor.count_matching("cpu.stat"), 0);
        assert_eq!(executor.count_matching("cleanup_sandbox.sh"), 1);
    }
}
