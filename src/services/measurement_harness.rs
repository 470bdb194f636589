//! Multi-probe traffic harness run against the remote host.
//!
//! One invocation runs a cheap reachability gate and then three probe groups
//! concurrently: direct connection/DNS timing (A), light sandboxed ping
//! probes (B) and heavy sandboxed throughput probes run one after another
//! (C). Probes never fail the run; every problem becomes a failed
//! [`ProbeResult`] and the returned report is always total.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::probes::{
    self, bufferbloat_ms, jitter_from_rtts, parse_aria2_samples, parse_connection_timing,
    parse_dig_query_time, parse_hop_rtts, parse_packet_loss, parse_ping_rtts,
    parse_proxy_drops, parse_qdisc_backlog, parse_retransmissions, parse_upload_speed,
    parse_wget_speed, shell_quote, split_load_sections,
};
use super::statistics::{coefficient_of_variation, mean, trimmed_mean};
use crate::domain::models::{
    MeasurementConfig, Metric, ProbeCache, ProbeReport, ProbeResult, ProbeTargets, RemoteConfig,
};
use crate::domain::ports::{CommandOutput, NetworkMeasurer, RemoteExecutor};

const GATE_TIMEOUT: Duration = Duration::from_secs(3);
const CONNECTION_TIMEOUT: Duration = Duration::from_secs(20);
const DNS_TIMEOUT: Duration = Duration::from_secs(10);
const JITTER_TIMEOUT: Duration = Duration::from_secs(5);
const LOSS_TIMEOUT: Duration = Duration::from_secs(10);
const ROUTE_TIMEOUT: Duration = Duration::from_secs(10);
const THROUGHPUT_TIMEOUT: Duration = Duration::from_secs(30);
const LOAD_TIMEOUT: Duration = Duration::from_secs(25);
const PROXY_STATS_TIMEOUT: Duration = Duration::from_secs(10);

const DNS_TRIM_PCT: f64 = 0.2;
const DOWNLOAD_TRIM_PCT: f64 = 0.1;
const ROUTE_HOPS: usize = 3;
const UPLOAD_PAYLOAD_MB: f64 = 2.0;
/// Shortest upload call that still yields a meaningful duration estimate.
const UPLOAD_MIN_ESTIMATE_MS: f64 = 100.0;

const GATE_REASON: &str = "host unreachable (reachability gate)";

pub struct MeasurementHarness {
    executor: Arc<dyn RemoteExecutor>,
    targets: ProbeTargets,
    sandbox_runner: String,
    fast_fail: bool,
}

impl MeasurementHarness {
    pub fn new(
        executor: Arc<dyn RemoteExecutor>,
        remote: &RemoteConfig,
        measurement: &MeasurementConfig,
    ) -> Self {
        Self {
            executor,
            targets: measurement.targets.clone(),
            sandbox_runner: format!("{}/run_in_sandbox.sh", remote.scratch_dir),
            fast_fail: measurement.fast_fail,
        }
    }

    /// Wrap a command so it runs inside the resource-limited sandbox.
    fn sandboxed(&self, command: &str) -> String {
        format!("bash {} {}", self.sandbox_runner, shell_quote(command))
    }

    async fn timed(&self, command: &str, timeout: Duration) -> (CommandOutput, f64) {
        let started = Instant::now();
        let out = self.executor.execute(command, timeout).await;
        (out, started.elapsed().as_secs_f64() * 1000.0)
    }

    /// Single ping through the sandbox. `Err` carries the reason the host is
    /// considered unreachable.
    pub async fn reachability_gate(&self) -> Result<(), String> {
        let cmd = self.sandboxed(&format!("ping -c 1 -W 2 {}", self.targets.ping_target));
        let out = self.executor.execute(&cmd, GATE_TIMEOUT).await;
        if !out.success {
            return Err(format!("{GATE_REASON}: {}", out.output));
        }
        match parse_packet_loss(&out.output) {
            Some(loss) if loss >= 100.0 => Err(format!("{GATE_REASON}: 100% packet loss")),
            None if parse_ping_rtts(&out.output).is_empty() => {
                Err(format!("{GATE_REASON}: no reply"))
            }
            _ => Ok(()),
        }
    }

    // Group A: direct, not sandboxed.

    async fn group_a(&self, cache: &ProbeCache) -> Vec<ProbeResult> {
        let mut results = Vec::new();
        if !cache.contains_key(&Metric::LatencyMs) {
            results.extend(self.probe_connection_timing().await);
        }
        if !cache.contains_key(&Metric::DnsMs) {
            results.push(self.probe_dns().await);
        }
        results
    }

    async fn probe_connection_timing(&self) -> Vec<ProbeResult> {
        let started = Instant::now();
        let mut tcp = Vec::new();
        let mut tls = Vec::new();
        let mut total = Vec::new();

        for url in &self.targets.connection_urls {
            let cmd = format!(
                "curl -o /dev/null -s --no-keepalive -w '%{{time_connect}}|%{{time_appconnect}}|%{{time_total}}' --connect-timeout 5 {url}"
            );
            let out = self.executor.execute(&cmd, CONNECTION_TIMEOUT).await;
            if !out.success {
                debug!(url = %url, "connection timing failed");
                continue;
            }
            if let Some(timing) = parse_connection_timing(&out.output) {
                total.push(timing.total_ms);
                if timing.tcp_ms > 0.0 {
                    tcp.push(timing.tcp_ms);
                }
                if timing.tls_ms > 0.0 {
                    tls.push(timing.tls_ms);
                }
            }
        }

        let elapsed = started.elapsed().as_secs_f64() * 1000.0;
        let aggregate = |metric: Metric, samples: &[f64]| {
            if samples.is_empty() {
                ProbeResult::failed(metric, "no connection timing samples").with_duration(elapsed)
            } else {
                ProbeResult::success(metric, mean(samples), elapsed)
            }
        };

        vec![
            aggregate(Metric::LatencyMs, &total),
            aggregate(Metric::TcpHandshakeMs, &tcp),
            aggregate(Metric::TlsHandshakeMs, &tls),
        ]
    }

    async fn probe_dns(&self) -> ProbeResult {
        let started = Instant::now();
        let mut samples = Vec::new();
        for domain in &self.targets.dns_domains {
            let cmd = format!("dig +noall +stats @{} {domain}", self.targets.dns_server);
            let out = self.executor.execute(&cmd, DNS_TIMEOUT).await;
            if let Some(ms) = out.success.then(|| parse_dig_query_time(&out.output)).flatten() {
                samples.push(ms);
            }
        }

        let elapsed = started.elapsed().as_secs_f64() * 1000.0;
        if samples.is_empty() {
            ProbeResult::failed(Metric::DnsMs, "no DNS query times").with_duration(elapsed)
        } else {
            ProbeResult::success(Metric::DnsMs, trimmed_mean(&samples, DNS_TRIM_PCT), elapsed)
        }
    }

    // Group B: sandboxed, light.

    async fn group_b(&self) -> Vec<ProbeResult> {
        vec![
            self.probe_jitter().await,
            self.probe_packet_loss().await,
            self.probe_route_anomaly().await,
        ]
    }

    async fn probe_jitter(&self) -> ProbeResult {
        let cmd = self.sandboxed(&format!("ping -c 10 -i 0.1 {}", self.targets.ping_target));
        let (out, elapsed) = self.timed(&cmd, JITTER_TIMEOUT).await;
        if !out.success {
            return ProbeResult::failed(Metric::JitterMs, out.output).with_duration(elapsed);
        }
        match jitter_from_rtts(&parse_ping_rtts(&out.output)) {
            Some(jitter) => ProbeResult::success(Metric::JitterMs, jitter, elapsed),
            None => ProbeResult::failed(Metric::JitterMs, "fewer than 2 ping replies")
                .with_duration(elapsed),
        }
    }

    async fn probe_packet_loss(&self) -> ProbeResult {
        let cmd = self.sandboxed(&format!("ping -c 30 -i 0.1 -q {}", self.targets.ping_target));
        let (out, elapsed) = self.timed(&cmd, LOSS_TIMEOUT).await;
        match out.success.then(|| parse_packet_loss(&out.output)).flatten() {
            Some(loss) => ProbeResult::success(Metric::PacketLossPct, loss, elapsed),
            None => ProbeResult::failed(Metric::PacketLossPct, "no packet loss summary")
                .with_duration(elapsed),
        }
    }

    async fn probe_route_anomaly(&self) -> ProbeResult {
        let cmd = self.sandboxed(&format!(
            "traceroute -n -m {ROUTE_HOPS} -q 1 -w 2 {}",
            self.targets.ping_target
        ));
        let (out, elapsed) = self.timed(&cmd, ROUTE_TIMEOUT).await;
        let hops = if out.success { parse_hop_rtts(&out.output, ROUTE_HOPS) } else { Vec::new() };
        if hops.is_empty() {
            return ProbeResult::failed(Metric::IspAnomaly, "no hop timings").with_duration(elapsed);
        }
        let anomalous = hops.iter().any(|rtt| *rtt > self.targets.anomaly_threshold_ms);
        ProbeResult::success(Metric::IspAnomaly, if anomalous { 1.0 } else { 0.0 }, elapsed)
    }

    // Group C: sandboxed, heavy, strictly sequential.

    async fn group_c(&self) -> Vec<ProbeResult> {
        let mut results = self.probe_download().await;
        results.push(self.probe_upload().await);
        results.extend(self.probe_load_telemetry().await);
        results.push(self.probe_proxy_drops().await);
        results
    }

    /// Download speed and its stability (CV of per-interval samples).
    async fn probe_download(&self) -> Vec<ProbeResult> {
        let url = &self.targets.download_url;
        let cmd = self.sandboxed(&format!(
            "aria2c -x 16 -s 16 -d /tmp -o vpn_tuner_dl.bin --allow-overwrite=true --summary-interval=1 {url} 2>&1; rm -f /tmp/vpn_tuner_dl.bin"
        ));
        let (out, elapsed) = self.timed(&cmd, THROUGHPUT_TIMEOUT).await;
        let samples = if out.success { parse_aria2_samples(&out.output) } else { Vec::new() };

        if !samples.is_empty() {
            let speed = trimmed_mean(&samples, DOWNLOAD_TRIM_PCT);
            let stability = if samples.len() >= 2 { coefficient_of_variation(&samples) } else { 0.0 };
            return vec![
                ProbeResult::success(Metric::DownloadMbps, speed, elapsed),
                ProbeResult::success(Metric::StabilityCv, stability, elapsed),
            ];
        }

        warn!("multi-stream download produced no samples, falling back to single stream");
        let stability = ProbeResult::failed(Metric::StabilityCv, "fallback used");
        let cmd = self.sandboxed(&format!("wget -O /dev/null {url} 2>&1 | tail -1"));
        let (out, elapsed) = self.timed(&cmd, THROUGHPUT_TIMEOUT).await;
        if !out.success {
            return vec![
                ProbeResult::failed(Metric::DownloadMbps, out.output).with_duration(elapsed),
                stability,
            ];
        }

        let speed = parse_wget_speed(&out.output).or_else(|| {
            let secs = elapsed / 1000.0;
            (secs > 0.0).then(|| self.targets.download_size_mb * 8.0 / secs)
        });
        let download = match speed {
            Some(mbps) => ProbeResult::success(Metric::DownloadMbps, mbps, elapsed),
            None => ProbeResult::failed(Metric::DownloadMbps, "no download speed"),
        };
        vec![download, stability.with_duration(elapsed)]
    }

    async fn probe_upload(&self) -> ProbeResult {
        let cmd = self.sandboxed(&format!(
            "dd if=/dev/urandom bs=1M count={} 2>/dev/null | curl -s -w '%{{speed_upload}}' -X POST --data-binary @- {} -o /dev/null",
            UPLOAD_PAYLOAD_MB as u32, self.targets.upload_url
        ));
        let (out, elapsed) = self.timed(&cmd, THROUGHPUT_TIMEOUT).await;
        if !out.success {
            return ProbeResult::failed(Metric::UploadMbps, out.output).with_duration(elapsed);
        }
        if let Some(mbps) = parse_upload_speed(&out.output) {
            return ProbeResult::success(Metric::UploadMbps, mbps, elapsed);
        }
        if elapsed > UPLOAD_MIN_ESTIMATE_MS {
            let mbps = UPLOAD_PAYLOAD_MB * 8.0 / (elapsed / 1000.0);
            return ProbeResult::success(Metric::UploadMbps, mbps, elapsed);
        }
        ProbeResult::failed(Metric::UploadMbps, "no upload speed").with_duration(elapsed)
    }

    /// Idle ping, loaded ping, socket and qdisc state from one command.
    async fn probe_load_telemetry(&self) -> Vec<ProbeResult> {
        let target = &self.targets.ping_target;
        let cmd = self.sandboxed(&format!(
            "ping -c 5 -i 0.1 {target}; echo {loaded}; \
             wget -O /dev/null {url} >/dev/null 2>&1 & sleep 0.1; \
             ping -c 10 -i 0.2 {target}; echo {sockets}; ss -ti; \
             echo {qdisc}; tc -s qdisc show; kill $! 2>/dev/null",
            loaded = probes::LOADED_MARKER,
            sockets = probes::SOCKETS_MARKER,
            qdisc = probes::QDISC_MARKER,
            url = self.targets.download_url,
        ));
        let (out, elapsed) = self.timed(&cmd, LOAD_TIMEOUT).await;
        if !out.success {
            return [Metric::BufferbloatMs, Metric::TcpRetrans, Metric::TcBacklog]
                .into_iter()
                .map(|m| ProbeResult::failed(m, out.output.clone()).with_duration(elapsed))
                .collect();
        }

        let sections = split_load_sections(&out.output);
        let bloat = match bufferbloat_ms(
            &parse_ping_rtts(sections.idle),
            &parse_ping_rtts(sections.loaded),
        ) {
            Some(ms) => ProbeResult::success(Metric::BufferbloatMs, ms, elapsed),
            None => ProbeResult::failed(Metric::BufferbloatMs, "missing idle or loaded RTT")
                .with_duration(elapsed),
        };
        let retrans = if sections.sockets.trim().is_empty() {
            ProbeResult::failed(Metric::TcpRetrans, "no socket state").with_duration(elapsed)
        } else {
            ProbeResult::success(Metric::TcpRetrans, parse_retransmissions(sections.sockets), elapsed)
        };
        let backlog = match parse_qdisc_backlog(sections.qdisc) {
            Some(packets) => ProbeResult::success(Metric::TcBacklog, packets, elapsed),
            None => ProbeResult::failed(Metric::TcBacklog, "no qdisc statistics")
                .with_duration(elapsed),
        };
        vec![bloat, retrans, backlog]
    }

    async fn probe_proxy_drops(&self) -> ProbeResult {
        let (out, elapsed) = self
            .timed(&self.targets.proxy_stats_command, PROXY_STATS_TIMEOUT)
            .await;
        match out.success.then(|| parse_proxy_drops(&out.output)).flatten() {
            Some(drops) => ProbeResult::success(Metric::XrayDrops, drops, elapsed),
            None => ProbeResult::failed(Metric::XrayDrops, "proxy statistics unavailable")
                .with_duration(elapsed),
        }
    }
}

#[async_trait]
impl NetworkMeasurer for MeasurementHarness {
    async fn run_full_test(&self, cache: &ProbeCache) -> ProbeReport {
        if self.fast_fail {
            if let Err(reason) = self.reachability_gate().await {
                warn!(reason = %reason, "skipping heavy probes");
                return ProbeReport::from_results(
                    [Metric::LatencyMs, Metric::DownloadMbps, Metric::UploadMbps]
                        .into_iter()
                        .map(|m| ProbeResult::failed(m, reason.clone())),
                );
            }
        }

        let started = Instant::now();
        let (a, b, c) = tokio::join!(self.group_a(cache), self.group_b(), self.group_c());

        let report = ProbeReport::from_results(
            cache.values().cloned().chain(a).chain(b).chain(c),
        );
        info!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            succeeded = report.iter().filter(|r| r.succeeded).count(),
            cached = cache.len(),
            "measurement pass complete"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::remote::ScriptedExecutor;

    const PING_OK: &str = "64 bytes from 8.8.8.8: icmp_seq=1 ttl=117 time=10.0 ms\n\
         64 bytes from 8.8.8.8: icmp_seq=2 ttl=117 time=12.0 ms\n\
         2 packets transmitted, 2 received, 0% packet loss, time 100ms";

    fn harness(executor: Arc<ScriptedExecutor>) -> MeasurementHarness {
        MeasurementHarness::new(executor, &RemoteConfig::default(), &MeasurementConfig::default())
    }

    fn healthy_executor() -> ScriptedExecutor {
        ScriptedExecutor::new()
            .on("ping -c 1 ", CommandOutput::ok(PING_OK))
            .on("curl -o /dev/null", CommandOutput::ok("0.010|0.030|0.050"))
            .on("dig +noall", CommandOutput::ok(";; Query time: 20 msec"))
            .on("ping -c 10 -i 0.1", CommandOutput::ok(PING_OK))
            .on("ping -c 30", CommandOutput::ok("30 packets transmitted, 30 received, 0% packet loss"))
            .on("traceroute", CommandOutput::ok(" 1  10.0.0.1  0.5 ms\n 2  10.1.0.1  4.0 ms"))
            .on("aria2c", CommandOutput::ok("DL:10MiB\nDL:12MiB\nDL:11MiB"))
            .on("speed_upload", CommandOutput::ok("2500000.0"))
            .on(
                "ss -ti",
                CommandOutput::ok(format!(
                    "time=10.0\ntime=10.0{}time=30.0\ntime=30.0{}retrans:0/2{}backlog 0b 3p",
                    probes::LOADED_MARKER,
                    probes::SOCKETS_MARKER,
                    probes::QDISC_MARKER
                )),
            )
            .on("statsquery", CommandOutput::ok(r#"{"stat":[{"name":"x>>>drop","value":4}]}"#))
    }

    #[tokio::test]
    async fn test_full_pass_populates_every_metric() {
        let executor = Arc::new(healthy_executor());
        let report = harness(executor).run_full_test(&ProbeCache::new()).await;

        for result in report.iter() {
            assert!(result.succeeded, "{} failed: {:?}", result.metric, result.error);
        }
        let summary = report.summary();
        assert!((summary.latency_ms - 50.0).abs() < 1e-9);
        assert!((summary.tcp_handshake_ms - 10.0).abs() < 1e-9);
        assert!((summary.tls_handshake_ms - 30.0).abs() < 1e-9);
        assert_eq!(summary.dns_ms, 20.0);
        assert_eq!(summary.download_mbps, 88.0);
        assert!((summary.upload_mbps - 20.0).abs() < 1e-9);
        assert_eq!(summary.bufferbloat_ms, 20.0);
        assert_eq!(summary.tcp_retrans, 2.0);
        assert_eq!(summary.tc_backlog, 3.0);
        assert_eq!(summary.xray_drops, 4.0);
        assert_eq!(summary.isp_anomaly, 0.0);
    }

    #[tokio::test]
    async fn test_unreachable_host_skips_heavy_probes() {
        let executor = Arc::new(ScriptedExecutor::new().on(
            "ping -c 1 ",
            CommandOutput::ok("1 packets transmitted, 0 received, 100% packet loss"),
        ));
        let report = harness(executor.clone()).run_full_test(&ProbeCache::new()).await;

        for metric in [Metric::LatencyMs, Metric::DownloadMbps, Metric::UploadMbps] {
            let result = report.get(metric);
            assert!(!result.succeeded);
            assert!(result.error.as_deref().unwrap_or_default().contains("unreachable"));
        }
        assert_eq!(executor.commands().len(), 1);
        assert_eq!(executor.count_matching("aria2c"), 0);
        assert_eq!(executor.count_matching("speed_upload"), 0);
    }

    #[tokio::test]
    async fn test_cached_metrics_are_not_remeasured() {
        let executor = Arc::new(healthy_executor());
        let mut cache = ProbeCache::new();
        for metric in Metric::CACHEABLE {
            cache.insert(metric, ProbeResult::success(metric, 7.0, 1.0));
        }

        let report = harness(executor.clone()).run_full_test(&cache).await;
        assert_eq!(executor.count_matching("curl -o /dev/null"), 0);
        assert_eq!(executor.count_matching("dig +noall"), 0);
        assert_eq!(report.get(Metric::DnsMs).value, 7.0);
        assert_eq!(report.get(Metric::LatencyMs).value, 7.0);
    }

    #[tokio::test]
    async fn test_download_falls_back_to_single_stream() {
        let executor = Arc::new(
            healthy_executor()
                .on_first("aria2c", CommandOutput::ok("bash: aria2c: command not found"))
                .on("wget -O /dev/null http", CommandOutput::ok("(5.0 MB/s) - '/dev/null' saved")),
        );
        let report = harness(executor).run_full_test(&ProbeCache::new()).await;

        assert_eq!(report.get(Metric::DownloadMbps).value, 40.0);
        let stability = report.get(Metric::StabilityCv);
        assert!(!stability.succeeded);
        assert_eq!(stability.error.as_deref(), Some("fallback used"));
    }

    #[tokio::test]
    async fn test_route_anomaly_flags_slow_early_hop() {
        let executor = Arc::new(
            healthy_executor()
                .on_first("traceroute", CommandOutput::ok(" 1  10.0.0.1  0.5 ms\n 2  *\n 3  1.2.3.4  180.0 ms")),
        );
        let report = harness(executor).run_full_test(&ProbeCache::new()).await;
        assert_eq!(report.get(Metric::IspAnomaly).value, 1.0);
    }

    #[tokio::test]
    async fn test_transport_failures_become_failed_probes() {
        let executor = Arc::new(
            ScriptedExecutor::new()
                .on("ping -c 1 ", CommandOutput::ok(PING_OK))
                .with_fallback(CommandOutput::failure("connection reset")),
        );
        let report = harness(executor).run_full_test(&ProbeCache::new()).await;

        assert_eq!(report.iter().count(), Metric::ALL.len());
        assert!(report.iter().all(|r| !r.succeeded));
        assert_eq!(report.summary(), Default::default());
    }
}
