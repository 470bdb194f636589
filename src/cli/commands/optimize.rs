use std::sync::Arc;

use anyhow::{Context, Result};
use console::style;
use serde::Serialize;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::adapters::oracle::{create_oracle, ScriptedOracle};
use crate::adapters::remote::{OpenSshExecutor, ScriptedExecutor};
use crate::adapters::sqlite::{create_migrated_test_pool, initialize_database, SqliteExperimentRepository};
use crate::cli::output::progress::{create_progress_bar, ProgressBarExt};
use crate::cli::output::table::format_config;
use crate::cli::output::{output, CommandOutput, TableFormatter};
use crate::cli::types::OptimizeArgs;
use crate::domain::models::{Config, OptimizerPhase, Recommendation};
use crate::domain::ports::{CommandOutput as RemoteOutput, DecisionOracle, RemoteExecutor};
use crate::infrastructure::config::ConfigLoader;
use crate::services::probes::{LOADED_MARKER, QDISC_MARKER, SOCKETS_MARKER};
use crate::services::{MeasurementHarness, OptimizationOrchestrator, OptimizerEvent};

/// Parameters the dry-run oracle walks through, one per experiment.
const DRY_RUN_CANDIDATES: [(&str, &str); 6] = [
    ("tcp_congestion", "bbr"),
    ("qdisc", "fq"),
    ("mtu", "1420"),
    ("tcp_fastopen", "3"),
    ("rmem_max", "16777216"),
    ("wmem_max", "16777216"),
];

#[derive(Debug, Serialize)]
pub struct RecommendationOutput {
    #[serde(flatten)]
    pub recommendation: Recommendation,
    pub dry_run: bool,
}

impl CommandOutput for RecommendationOutput {
    fn to_human(&self) -> String {
        let mut lines = Vec::new();
        if self.dry_run {
            lines.push(style("Dry run: simulated host and oracle, nothing persisted").yellow().to_string());
        }
        lines.push(style("Recommended configuration").bold().to_string());
        lines.push(TableFormatter::new().format_recommendation(&self.recommendation));
        lines.join("\n")
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

pub async fn execute(args: OptimizeArgs, config: &Config, json_mode: bool) -> Result<()> {
    let mut config = config.clone();
    if let Some(max) = args.max_experiments {
        config.optimizer.max_experiments = max;
        config.optimizer.min_experiments = config.optimizer.min_experiments.min(max);
    }
    ConfigLoader::validate(&config).context("Invalid optimizer settings")?;

    let executor: Arc<dyn RemoteExecutor>;
    let oracle: Arc<dyn DecisionOracle>;
    let pool = if args.dry_run {
        if config.remote.host.is_empty() {
            config.remote.host = "dry-run.invalid".to_string();
        }
        config.optimizer.settle_delay_ms = 0;
        config.measurement.inter_round_delay_ms = 0;
        executor = Arc::new(simulated_host());
        oracle = Arc::new(dry_run_oracle(config.optimizer.max_experiments));
        create_migrated_test_pool()
            .await
            .context("Failed to create in-memory experiment store")?
    } else {
        ConfigLoader::validate_remote(&config.remote)?;
        oracle = create_oracle(&config.oracle).context("Failed to create decision oracle")?;
        executor = Arc::new(OpenSshExecutor::new(config.remote.clone()));
        initialize_database(&config.database.path, config.database.max_connections)
            .await
            .context("Failed to open experiment database")?
    };

    let repository = Arc::new(SqliteExperimentRepository::new(pool));
    let measurer = Arc::new(MeasurementHarness::new(
        executor.clone(),
        &config.remote,
        &config.measurement,
    ));

    let cancel = CancellationToken::new();
    let orchestrator = OptimizationOrchestrator::new(executor.clone(), measurer, repository, oracle, &config)
        .with_cancellation(cancel.clone());

    let signal_token = cancel.clone();
    let signal_task = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, finishing the current step");
            signal_token.cancel();
        }
    });

    let (event_tx, event_rx) = mpsc::channel(100);
    let printer = tokio::spawn(print_events(event_rx, config.optimizer.max_experiments, json_mode));

    info!(host = %config.remote.host, dry_run = args.dry_run, "starting optimization");
    let result = orchestrator.run(event_tx).await;

    let _ = printer.await;
    signal_task.abort();
    executor.close().await;

    let recommendation = result.context("Optimization failed")?;
    output(&RecommendationOutput { recommendation, dry_run: args.dry_run }, json_mode);
    Ok(())
}

async fn print_events(mut events: mpsc::Receiver<OptimizerEvent>, total: u32, json_mode: bool) {
    if json_mode {
        // Drain so the orchestrator never blocks on a full channel.
        while events.recv().await.is_some() {}
        return;
    }

    let pb = create_progress_bar(u64::from(total));
    while let Some(event) = events.recv().await {
        match event {
            OptimizerEvent::Phase(phase) => pb.set_message(phase.as_str()),
            OptimizerEvent::Status(text) => pb.set_message(text),
            OptimizerEvent::Progress { current, total } => {
                pb.set_length(u64::from(total));
                pb.set_step(u64::from(current), format!("experiment {current}/{total}"));
            }
            OptimizerEvent::Correction(correction) => {
                pb.println(format!("{} {}", style("correction").yellow(), correction.message()));
            }
            OptimizerEvent::ExperimentCompleted { index, config, score, best_score } => {
                let label = if index == 0 { "baseline".to_string() } else { format_config(&config) };
                pb.println(format!(
                    "{} score {score:.2} (best {best_score:.2}) {label}",
                    style(format!("#{index}")).cyan()
                ));
            }
            OptimizerEvent::Finished(recommendation) => {
                pb.finish_success(format!(
                    "{} after {} experiments",
                    OptimizerPhase::Finished.as_str(),
                    recommendation.experiments_run
                ));
            }
            OptimizerEvent::Failed(reason) => pb.finish_error(reason),
        }
    }
}

/// Executor answering like a healthy host, so a dry run exercises every probe.
pub fn simulated_host() -> ScriptedExecutor {
    const PING: &str = "64 bytes from 8.8.8.8: icmp_seq=1 ttl=117 time=18.2 ms\n\
         64 bytes from 8.8.8.8: icmp_seq=2 ttl=117 time=19.4 ms\n\
         64 bytes from 8.8.8.8: icmp_seq=3 ttl=117 time=18.9 ms\n\
         3 packets transmitted, 3 received, 0% packet loss, time 200ms";

    ScriptedExecutor::new()
        .on("ping -c 1 ", RemoteOutput::ok(PING))
        .on("ping -c 10 -i 0.1", RemoteOutput::ok(PING))
        .on("ping -c 30", RemoteOutput::ok("30 packets transmitted, 30 received, 0% packet loss"))
        .on("curl -o /dev/null", RemoteOutput::ok("0.012|0.034|0.061"))
        .on("dig +noall", RemoteOutput::ok(";; Query time: 14 msec"))
        .on("traceroute", RemoteOutput::ok(" 1  10.0.0.1  0.4 ms\n 2  10.1.0.1  3.1 ms"))
        .on("aria2c", RemoteOutput::ok("DL:11MiB\nDL:12MiB\nDL:12MiB"))
        .on("speed_upload", RemoteOutput::ok("3100000.0"))
        .on(
            "ss -ti",
            RemoteOutput::ok(format!(
                "time=19.0\ntime=18.5{LOADED_MARKER}time=31.0\ntime=29.5{SOCKETS_MARKER}retrans:0/1{QDISC_MARKER}backlog 0b 0p"
            )),
        )
        .on("statsquery", RemoteOutput::ok(r#"{"stat":[]}"#))
        .on("uname", RemoteOutput::ok("Linux 6.1.0-dry-run x86_64"))
        .on("sysctl", RemoteOutput::ok("net.ipv4.tcp_congestion_control = cubic"))
        .with_fallback(RemoteOutput::ok(""))
}

/// Oracle that proposes one candidate parameter per experiment, then finishes.
pub fn dry_run_oracle(max_experiments: u32) -> ScriptedOracle {
    let mut oracle = ScriptedOracle::new().then_json(json!({
        "action": "ssh_command",
        "reasoning": "Check the active congestion control first",
        "ssh_command": "sysctl net.ipv4.tcp_congestion_control",
    }));
    for (param, value) in DRY_RUN_CANDIDATES.iter().cycle().take(max_experiments as usize) {
        oracle = oracle.then_json(json!({
            "action": "apply_config",
            "reasoning": format!("Try {param}={value}"),
            "config": { *param: value },
        }));
    }
    oracle.then_json(json!({
        "action": "finish",
        "reasoning": "Candidate list exhausted",
        "summary": "Dry run complete",
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{ConfigMap, ProbeCache};
    use crate::domain::ports::NetworkMeasurer;

    #[tokio::test]
    async fn test_simulated_host_passes_every_probe() {
        let config = Config::default();
        let harness = MeasurementHarness::new(Arc::new(simulated_host()), &config.remote, &config.measurement);
        let report = harness.run_full_test(&ProbeCache::new()).await;

        for result in report.iter() {
            assert!(result.succeeded, "{} failed: {:?}", result.metric, result.error);
        }
    }

    #[tokio::test]
    async fn test_dry_run_completes_without_host() {
        let mut config = Config::default();
        config.optimizer.max_experiments = 2;
        config.optimizer.min_experiments = 2;
        let args = OptimizeArgs { max_experiments: None, dry_run: true };

        execute(args, &config, true).await.unwrap();
    }

    #[test]
    fn test_missing_api_key_fails_before_connecting() {
        let mut config = Config::default();
        config.remote.host = "203.0.113.10".to_string();
        config.database.path = "/nonexistent/dir/experiments.db".to_string();
        let args = OptimizeArgs { max_experiments: None, dry_run: false };

        temp_env::with_vars_unset(["OPENAI_API_KEY", "ANTHROPIC_API_KEY"], || {
            let runtime = tokio::runtime::Runtime::new().unwrap();
            let err = runtime.block_on(execute(args, &config, true)).unwrap_err();
            assert!(format!("{err:#}").contains("API key not configured"));
        });
    }

    #[tokio::test]
    async fn test_dry_run_oracle_script_length() {
        let oracle = dry_run_oracle(8);
        // diagnostic + 8 experiments + finish
        assert_eq!(oracle.remaining(), 10);
    }

    #[test]
    fn test_recommendation_output_json() {
        let recommendation = Recommendation {
            config: ConfigMap::new(),
            score: 70.0,
            baseline_score: Some(56.0),
            improvement_pct: 25.0,
            metrics: Default::default(),
            reasoning: String::new(),
            experiments_run: 4,
        };
        let value = RecommendationOutput { recommendation, dry_run: false }.to_json();
        assert_eq!(value["score"], 70.0);
        assert_eq!(value["improvement_pct"], 25.0);
        assert_eq!(value["dry_run"], false);
    }
}
