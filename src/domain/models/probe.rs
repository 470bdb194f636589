//! Probe results and the fixed metric key set.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// The fixed set of metrics the harness measures.
///
/// The serialized form of each variant is the metric key used in summaries,
/// the experiment store and oracle feedback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    LatencyMs,
    DownloadMbps,
    UploadMbps,
    JitterMs,
    PacketLossPct,
    DnsMs,
    TcpHandshakeMs,
    TlsHandshakeMs,
    BufferbloatMs,
    StabilityCv,
    TcpRetrans,
    TcBacklog,
    IspAnomaly,
    XrayDrops,
}

impl Metric {
    pub const ALL: [Metric; 14] = [
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
        Metric::TcpRetrans,
        Metric::TcBacklog,
        Metric::IspAnomaly,
        Metric::XrayDrops,
    ];

    /// Metrics that change slowly enough to be measured once per session.
    pub const CACHEABLE: [Metric; 4] = [
        Metric::LatencyMs,
        Metric::TcpHandshakeMs,
        Metric::TlsHandshakeMs,
        Metric::DnsMs,
    ];

    pub const fn key(self) -> &'static str {
        match self {
            Self::LatencyMs => "latency_ms",
            Self::DownloadMbps => "download_mbps",
            Self::UploadMbps => "upload_mbps",
            Self::JitterMs => "jitter_ms",
            Self::PacketLossPct => "packet_loss_pct",
            Self::DnsMs => "dns_ms",
            Self::TcpHandshakeMs => "tcp_handshake_ms",
            Self::TlsHandshakeMs => "tls_handshake_ms",
            Self::BufferbloatMs => "bufferbloat_ms",
            Self::StabilityCv => "stability_cv",
            Self::TcpRetrans => "tcp_retrans",
            Self::TcBacklog => "tc_backlog",
            Self::IspAnomaly => "isp_anomaly",
            Self::XrayDrops => "xray_drops",
        }
    }

    /// Short probe name shown in tables and logs.
    pub const fn probe_name(self) -> &'static str {
        match self {
            Self::LatencyMs => "latency",
            Self::DownloadMbps => "download",
            Self::UploadMbps => "upload",
            Self::JitterMs => "jitter",
            Self::PacketLossPct => "packet_loss",
            Self::DnsMs => "dns",
            Self::TcpHandshakeMs => "tcp_handshake",
            Self::TlsHandshakeMs => "tls_handshake",
            Self::BufferbloatMs => "bufferbloat",
            Self::StabilityCv => "stability",
            Self::TcpRetrans => "tcp_retrans",
            Self::TcBacklog => "tc_backlog",
            Self::IspAnomaly => "isp_anomaly",
            Self::XrayDrops => "xray_drops",
        }
    }

    pub const fn unit(self) -> &'static str {
        match self {
            Self::LatencyMs
            | Self::JitterMs
            | Self::DnsMs
            | Self::TcpHandshakeMs
            | Self::TlsHandshakeMs
            | Self::BufferbloatMs => "ms",
            Self::DownloadMbps | Self::UploadMbps => "Mbps",
            Self::PacketLossPct | Self::StabilityCv => "%",
            Self::TcpRetrans | Self::XrayDrops => "count",
            Self::TcBacklog => "packets",
            Self::IspAnomaly => "flag",
        }
    }

    pub fn is_cacheable(self) -> bool {
        Self::CACHEABLE.contains(&self)
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.key() == key)
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Outcome of a single probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeResult {
    pub metric: Metric,
    pub succeeded: bool,
    pub value: f64,
    pub unit: String,
    pub duration_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProbeResult {
    pub fn success(metric: Metric, value: f64, duration_ms: f64) -> Self {
        Self {
            metric,
            succeeded: true,
            value,
            unit: metric.unit().to_string(),
            duration_ms,
            error: None,
        }
    }

    /// Zero-value placeholder for a probe that failed or never ran.
    pub fn failed(metric: Metric, reason: impl Into<String>) -> Self {
        Self {
            metric,
            succeeded: false,
            value: 0.0,
            unit: metric.unit().to_string(),
            duration_ms: 0.0,
            error: Some(reason.into()),
        }
    }

    pub fn with_duration(mut self, duration_ms: f64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    /// Value as seen by scoring: failed probes contribute zero.
    pub fn effective_value(&self) -> f64 {
        if self.succeeded {
            self.value
        } else {
            0.0
        }
    }
}

/// Session-scoped cache of slowly changing probe results.
pub type ProbeCache = BTreeMap<Metric, ProbeResult>;

/// Results of one harness invocation. Always holds an entry for every metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeReport {
    results: BTreeMap<Metric, ProbeResult>,
}

impl ProbeReport {
    /// Build a total report, filling any metric absent from `results`.
    pub fn from_results(results: impl IntoIterator<Item = ProbeResult>) -> Self {
        let mut map: BTreeMap<Metric, ProbeResult> =
            results.into_iter().map(|r| (r.metric, r)).collect();
        for metric in Metric::ALL {
            map.entry(metric)
                .or_insert_with(|| ProbeResult::failed(metric, "not measured"));
        }
        Self { results: map }
    }

    pub fn get(&self, metric: Metric) -> &ProbeResult {
        // Construction guarantees totality.
        &self.results[&metric]
    }

    pub fn iter(&self) -> impl Iterator<Item = &ProbeResult> {
        self.results.values()
    }

    pub fn summary(&self) -> MetricSummary {
        let mut summary = MetricSummary::default();
        for result in self.results.values() {
            summary.set(result.metric, result.effective_value());
        }
        summary
    }

    /// Successful results of cacheable metrics.
    pub fn cacheable(&self) -> impl Iterator<Item = &ProbeResult> {
        self.results
            .values()
            .filter(|r| r.succeeded && r.metric.is_cacheable())
    }
}

/// Metric-key to value projection of a report. Every key always has a value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricSummary {
    pub latency_ms: f64,
    pub download_mbps: f64,
    pub upload_mbps: f64,
    pub jitter_ms: f64,
    pub packet_loss_pct: f64,
    pub dns_ms: f64,
    pub tcp_handshake_ms: f64,
    pub tls_handshake_ms: f64,
    pub bufferbloat_ms: f64,
    pub stability_cv: f64,
    pub tcp_retrans: f64,
    pub tc_backlog: f64,
    pub isp_anomaly: f64,
    pub xray_drops: f64,
}

impl MetricSummary {
    pub const fn get(&self, metric: Metric) -> f64 {
        match metric {
            Metric::LatencyMs => self.latency_ms,
            Metric::DownloadMbps => self.download_mbps,
            Metric::UploadMbps => self.upload_mbps,
            Metric::JitterMs => self.jitter_ms,
            Metric::PacketLossPct => self.packet_loss_pct,
            Metric::DnsMs => self.dns_ms,
            Metric::TcpHandshakeMs => self.tcp_handshake_ms,
            Metric::TlsHandshakeMs => self.tls_handshake_ms,
            Metric::BufferbloatMs => self.bufferbloat_ms,
            Metric::StabilityCv => self.stability_cv,
            Metric::TcpRetrans => self.tcp_retrans,
            Metric::TcBacklog => self.tc_backlog,
            Metric::IspAnomaly => self.isp_anomaly,
            Metric::XrayDrops => self.xray_drops,
        }
    }

    pub fn set(&mut self, metric: Metric, value: f64) {
        let slot = match metric {
            Metric::LatencyMs => &mut self.latency_ms,
            Metric::DownloadMbps => &mut self.download_mbps,
            Metric::UploadMbps => &mut self.upload_mbps,
            Metric::JitterMs => &mut self.jitter_ms,
            Metric::PacketLossPct => &mut self.packet_loss_pct,
            Metric::DnsMs => &mut self.dns_ms,
            Metric::TcpHandshakeMs => &mut self.tcp_handshake_ms,
            Metric::TlsHandshakeMs => &mut self.tls_handshake_ms,
            Metric::BufferbloatMs => &mut self.bufferbloat_ms,
            Metric::StabilityCv => &mut self.stability_cv,
            Metric::TcpRetrans => &mut self.tcp_retrans,
            Metric::TcBacklog => &mut self.tc_backlog,
            Metric::IspAnomaly => &mut self.isp_anomaly,
            Metric::XrayDrops => &mut self.xray_drops,
        };
        *slot = value;
    }

    pub fn with(mut self, metric: Metric, value: f64) -> Self {
        self.set(metric, value);
        self
    }

    /// Key/value pairs in fixed key order.
    pub fn iter(&self) -> impl Iterator<Item = (Metric, f64)> + '_ {
        Metric::ALL.into_iter().map(move |m| (m, self.get(m)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_is_total() {
        let report = ProbeReport::from_results(vec![ProbeResult::success(
            Metric::LatencyMs,
            42.0,
            10.0,
        )]);

        assert_eq!(report.iter().count(), Metric::ALL.len());
        assert!(report.get(Metric::LatencyMs).succeeded);
        assert!(!report.get(Metric::XrayDrops).succeeded);
    }

    #[test]
    fn test_summary_zeroes_failed_probes() {
        let mut failed = ProbeResult::failed(Metric::DnsMs, "timeout");
        failed.value = 99.0;
        let report = ProbeReport::from_results(vec![
            failed,
            ProbeResult::success(Metric::DownloadMbps, 120.5, 900.0),
        ]);

        let summary = report.summary();
        assert_eq!(summary.dns_ms, 0.0);
        assert_eq!(summary.download_mbps, 120.5);
    }

    #[test]
    fn test_metric_key_round_trip_through_serde() {
        let json = serde_json::to_string(&Metric::TlsHandshakeMs).unwrap();
        assert_eq!(json, "\"tls_handshake_ms\"");
        assert_eq!(Metric::from_key("tc_backlog"), Some(Metric::TcBacklog));
        assert_eq!(Metric::from_key("nope"), None);
    }

    #[test]
    fn test_summary_serializes_every_key() {
        let value = serde_json::to_value(MetricSummary::default()).unwrap();
        let obj = value.as_object().unwrap();
        for metric in Metric::ALL {
            assert!(obj.contains_key(metric.key()), "missing {metric}");
        }
    }
}
