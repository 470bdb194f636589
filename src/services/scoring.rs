//! Fitness score for a metric summary.
//!
//! Every component maps a raw metric to 0..=100 (exponential decay for
//! "lower is better" metrics, capped logarithmic growth for throughput) and
//! the weighted sum is the trial score. Retransmissions, qdisc backlog,
//! proxy drops and the routing anomaly flag are recorded for the oracle but
//! do not contribute.

use crate::domain::models::{Metric, MetricSummary, ProbeReport};

/// Decay constants (τ) for the "lower is better" components.
const LATENCY_TAU: f64 = 15.0;
const JITTER_TAU: f64 = 3.0;
const DNS_TAU: f64 = 15.0;
const TCP_TAU: f64 = 20.0;
const TLS_TAU: f64 = 30.0;
const BLOAT_TAU: f64 = 10.0;
const STABILITY_TAU: f64 = 15.0;
const LOSS_RATE: f64 = 2.0;

const DOWNLOAD_GAIN: f64 = 10.0;
const UPLOAD_GAIN: f64 = 12.0;

const W_LATENCY: f64 = 0.10;
const W_DOWNLOAD: f64 = 0.10;
const W_UPLOAD: f64 = 0.10;
const W_JITTER: f64 = 0.10;
const W_LOSS: f64 = 0.10;
const W_DNS: f64 = 0.05;
const W_TCP: f64 = 0.10;
const W_TLS: f64 = 0.15;
const W_BLOAT: f64 = 0.15;
const W_STABILITY: f64 = 0.05;

fn decay(x: f64, tau: f64) -> f64 {
    100.0 * (-x.max(0.0) / tau).exp()
}

fn throughput(mbps: f64, gain: f64) -> f64 {
    if mbps > 0.0 {
        (gain * (1.0 + mbps).log2()).min(100.0)
    } else {
        0.0
    }
}

/// Per-component scores, each in 0..=100.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreBreakdown {
    pub latency: f64,
    pub download: f64,
    pub upload: f64,
    pub jitter: f64,
    pub packet_loss: f64,
    pub dns: f64,
    pub tcp_handshake: f64,
    pub tls_handshake: f64,
    pub bufferbloat: f64,
    pub stability: f64,
}

impl ScoreBreakdown {
    pub fn from_summary(m: &MetricSummary) -> Self {
        Self {
            latency: decay(m.latency_ms, LATENCY_TAU),
            download: throughput(m.download_mbps, DOWNLOAD_GAIN),
            upload: throughput(m.upload_mbps, UPLOAD_GAIN),
            jitter: decay(m.jitter_ms, JITTER_TAU),
            packet_loss: 100.0 * (-LOSS_RATE * m.packet_loss_pct.max(0.0)).exp(),
            dns: decay(m.dns_ms, DNS_TAU),
            tcp_handshake: decay(m.tcp_handshake_ms, TCP_TAU),
            tls_handshake: decay(m.tls_handshake_ms, TLS_TAU),
            bufferbloat: decay(m.bufferbloat_ms, BLOAT_TAU),
            stability: decay(m.stability_cv, STABILITY_TAU),
        }
    }

    pub fn weighted_total(&self) -> f64 {
        self.latency * W_LATENCY
            + self.download * W_DOWNLOAD
            + self.upload * W_UPLOAD
            + self.jitter * W_JITTER
            + self.packet_loss * W_LOSS
            + self.dns * W_DNS
            + self.tcp_handshake * W_TCP
            + self.tls_handshake * W_TLS
            + self.bufferbloat * W_BLOAT
            + self.stability * W_STABILITY
    }
}

/// Metrics that contribute to the score.
pub const SCORED_METRICS: [Metric; 10] = [
    Metric::LatencyMs,
    Metric::DownloadMbps,
    Metric::UploadMbps,
    Metric::JitterMs,
    Metric::PacketLossPct,
    Metric::DnsMs,
    Metric::TcpHandshakeMs,
    Metric::TlsHandshakeMs,
    Metric::BufferbloatMs,
    Metric::StabilityCv,
];

/// True when no scored probe succeeded. Such a report still scores well,
/// because failed "lower is better" probes read as zero.
pub fn nothing_scored(report: &ProbeReport) -> bool {
    SCORED_METRICS.iter().all(|&m| !report.get(m).succeeded)
}

/// Score in 0..=100, rounded to two decimals.
pub fn calculate_score(metrics: &MetricSummary) -> f64 {
    let total = ScoreBreakdown::from_summary(metrics)
        .weighted_total()
        .clamp(0.0, 100.0);
    (total * 100.0).round() / 100.0
}
