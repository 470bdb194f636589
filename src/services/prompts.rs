//! Messages exchanged with the decision oracle.

use std::fmt::Write as _;

use super::context_collector::ServerContext;
use crate::domain::models::{ExperimentResult, Metric, MetricSummary};

/// Remaining allowances reported back to the oracle after every turn.
#[derive(Debug, Clone, Copy)]
pub struct Budgets {
    pub experiments_run: u32,
    pub max_experiments: u32,
    pub diagnostics_used: u32,
    pub max_diagnostics: u32,
}

impl Budgets {
    fn footer(&self) -> String {
        format!(
            "Experiments left: {}/{}. Diagnostic commands left: {}/{}.",
            self.max_experiments.saturating_sub(self.experiments_run),
            self.max_experiments,
            self.max_diagnostics.saturating_sub(self.diagnostics_used),
            self.max_diagnostics,
        )
    }
}

pub fn system_prompt(min_experiments: u32, max_diagnostics: u32) -> String {
    format!(
        r#"You are a network engineer optimizing a VPN server through an isolated sandbox on the live host.
You change network parameters, measure the effect and converge on the best configuration.

# PARAMETERS (action "apply_config")
- mtu: packet size (1500, 1420, 1360, 1280). Affects fragmentation and throughput.
- congestion: TCP congestion control (bbr, cubic). BBR suits high-latency links.
- buffer_size: socket buffer in KB (64, 128, 256, 512, 1024). Larger buffers raise throughput and bufferbloat.
- dest: REALITY destination used for camouflage (e.g. www.microsoft.com:443).
- short_id: REALITY short id.

# TOOLS
1. apply_config: send the parameters to change, e.g. {{"mtu": 1420, "congestion": "bbr"}}. A full measurement runs afterwards.
2. ssh_command: run one read-only diagnostic command on the host (sysctl, ip link, ss, journalctl, cat of proxy configs).
   At most {max_diagnostics} commands per session.

# RESPONSE FORMAT (JSON only)
{{
  "reasoning": "why this step",
  "action": "apply_config" | "ssh_command" | "finish",
  "config": {{"mtu": 1420}},
  "ssh_command": "sysctl net.ipv4.tcp_congestion_control",
  "should_continue": true,
  "summary": "short status"
}}

# STRATEGY
- Study the server context and the baseline first.
- Change one or two parameters per experiment.
- Watch the trend of bufferbloat, TLS handshake and retransmissions, not only throughput.
- Run at least {min_experiments} experiments before choosing "finish".
- In the final summary name the best configuration and how it compares to the baseline.

# METRICS
- latency_ms, dns_ms, tcp_handshake_ms, tls_handshake_ms, jitter_ms, bufferbloat_ms: lower is better.
- download_mbps, upload_mbps: higher is better.
- packet_loss_pct, stability_cv (download CV in %): lower is better.
- tcp_retrans, tc_backlog: retransmitted segments and queue backlog under load; 0 is ideal.
- xray_drops: proxy core errors; above 0 usually means a broken config such as a bad REALITY dest.
- isp_anomaly: 1 when the first upstream hops spiked; an external problem, not your config.
High throughput with large retransmissions or backlog means the configuration is unhealthy."#
    )
}

fn metric_label(metric: Metric) -> &'static str {
    match metric {
        Metric::LatencyMs => "Latency",
        Metric::DownloadMbps => "Download",
        Metric::UploadMbps => "Upload",
        Metric::JitterMs => "Jitter",
        Metric::PacketLossPct => "Packet loss",
        Metric::DnsMs => "DNS",
        Metric::TcpHandshakeMs => "TCP handshake",
        Metric::TlsHandshakeMs => "TLS handshake",
        Metric::BufferbloatMs => "Bufferbloat",
        Metric::StabilityCv => "Stability CV",
        Metric::TcpRetrans => "TCP retransmissions",
        Metric::TcBacklog => "Qdisc backlog",
        Metric::IspAnomaly => "ISP anomaly",
        Metric::XrayDrops => "Proxy drops",
    }
}

/// One line per metric; the baseline value is appended when given.
pub fn metric_table(current: &MetricSummary, baseline: Option<&MetricSummary>) -> String {
    let mut out = String::new();
    for (metric, value) in current.iter() {
        let _ = write!(out, "- {}: {value:.2} {}", metric_label(metric), metric.unit());
        if let Some(base) = baseline {
            let _ = write!(out, " (baseline: {:.2})", base.get(metric));
        }
        out.push('\n');
    }
    out
}

pub fn baseline_message(context: &ServerContext, baseline: &ExperimentResult) -> String {
    let context_json = serde_json::to_string_pretty(context).unwrap_or_else(|_| "{}".to_string());
    format!(
        "Starting optimization.\n\n## SERVER CONTEXT\n{context_json}\n\n## BASELINE (score: {:.2})\n{}\n\
         Analyze the context and propose the first action: a diagnostic \"ssh_command\" or an \
         \"apply_config\". Answer in JSON.",
        baseline.score,
        metric_table(&baseline.metrics, None),
    )
}

pub fn experiment_feedback(
    index: u32,
    result: &ExperimentResult,
    baseline: Option<&ExperimentResult>,
    best: Option<&ExperimentResult>,
    budgets: Budgets,
) -> String {
    let config = serde_json::to_string(&result.config).unwrap_or_default();
    let score_of = |r: Option<&ExperimentResult>| r.map_or_else(|| "n/a".to_string(), |r| format!("{:.2}", r.score));
    format!(
        "Results of experiment {index}:\n- Config: {config}\n- Score: {:.2} (baseline: {}, best: {})\n{}\n{}\nPropose the next action.",
        result.score,
        score_of(baseline),
        score_of(best),
        metric_table(&result.metrics, baseline.map(|b| &b.metrics)),
        budgets.footer(),
    )
}

/// Prepended to experiment feedback when no scored probe succeeded.
pub const UNMEASURED_WARNING: &str = "WARNING: every scored probe failed for this experiment, \
     so its score does not reflect real measurements. The configuration may have broken \
     connectivity; consider reverting it.\n\n";

pub fn diagnostic_feedback(command: &str, succeeded: bool, output: &str, budgets: Budgets) -> String {
    let body = if succeeded { output.to_string() } else { format!("Error: {output}") };
    format!(
        "Output of `{command}`:\n```\n{body}\n```\n{}\nContinue the analysis.",
        budgets.footer()
    )
}
