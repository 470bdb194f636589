//! Parsers for the output of the remote probe commands.
//!
//! Each parser returns `None` when the output carries no usable sample, which
//! the harness turns into a failed probe.

use std::sync::LazyLock;

use regex::Regex;

use super::statistics::mean;

static DIG_QUERY_TIME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Query time: (\d+) msec").expect("valid regex"));
static PING_TIME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"time=(\d+\.?\d*)").expect("valid regex"));
static PACKET_LOSS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+(?:\.\d+)?)% packet loss").expect("valid regex"));
static HOP_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(\d+)\s+(.*)$").expect("valid regex"));
static HOP_RTT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+\.?\d*)\s*ms").expect("valid regex"));
static ARIA2_SPEED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"DL:(\d+\.?\d*)(GiB|MiB|KiB|B)").expect("valid regex"));
static WGET_SPEED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\((\d+\.?\d*)\s*(MB/s|KB/s)\)").expect("valid regex"));
static RETRANS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"retrans:(\d+)/(\d+)").expect("valid regex"));
static BACKLOG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"backlog (\d+)b (\d+)p").expect("valid regex"));

/// Section markers used by the combined load-telemetry command.
pub const LOADED_MARKER: &str = "===LOADED===";
pub const SOCKETS_MARKER: &str = "===SOCKETS===";
pub const QDISC_MARKER: &str = "===QDISC===";

/// Connection timing from curl's `%{time_connect}|%{time_appconnect}|%{time_total}`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConnectionTiming {
    pub tcp_ms: f64,
    pub tls_ms: f64,
    pub total_ms: f64,
}

pub fn parse_connection_timing(output: &str) -> Option<ConnectionTiming> {
    let line = output.lines().rev().find(|l| l.contains('|'))?;
    let mut parts = line.trim().split('|').map(|p| p.trim().parse::<f64>());
    let tcp = parts.next()?.ok()?;
    let tls = parts.next()?.ok()?;
    let total = parts.next()?.ok()?;
    if total <= 0.0 {
        return None;
    }
    Some(ConnectionTiming {
        tcp_ms: tcp * 1000.0,
        tls_ms: tls * 1000.0,
        total_ms: total * 1000.0,
    })
}

pub fn parse_dig_query_time(output: &str) -> Option<f64> {
    DIG_QUERY_TIME
        .captures(output)
        .and_then(|c| c[1].parse::<f64>().ok())
}

pub fn parse_ping_rtts(output: &str) -> Vec<f64> {
    PING_TIME
        .captures_iter(output)
        .filter_map(|c| c[1].parse::<f64>().ok())
        .collect()
}

/// Mean absolute deviation from the mean RTT. Needs at least two replies.
pub fn jitter_from_rtts(rtts: &[f64]) -> Option<f64> {
    if rtts.len() < 2 {
        return None;
    }
    let avg = mean(rtts);
    Some(rtts.iter().map(|r| (r - avg).abs()).sum::<f64>() / rtts.len() as f64)
}

pub fn parse_packet_loss(output: &str) -> Option<f64> {
    PACKET_LOSS
        .captures(output)
        .and_then(|c| c[1].parse::<f64>().ok())
}

/// First RTT of each of the first `max_hops` traceroute hops. Silent hops are skipped.
pub fn parse_hop_rtts(output: &str, max_hops: usize) -> Vec<f64> {
    output
        .lines()
        .filter_map(|line| HOP_LINE.captures(line))
        .filter_map(|c| {
            let hop: usize = c[1].parse().ok()?;
            if hop == 0 || hop > max_hops {
                return None;
            }
            HOP_RTT
                .captures(&c[2])
                .and_then(|rtt| rtt[1].parse::<f64>().ok())
        })
        .collect()
}

fn binary_unit_to_mbps(value: f64, unit: &str) -> f64 {
    match unit {
        "GiB" => value * 8.0 * 1024.0,
        "MiB" => value * 8.0,
        "KiB" => value * 8.0 / 1024.0,
        _ => value * 8.0 / 1024.0 / 1024.0,
    }
}

/// Per-interval download speed samples (Mbps) from aria2c's summary lines.
pub fn parse_aria2_samples(output: &str) -> Vec<f64> {
    ARIA2_SPEED
        .captures_iter(output)
        .filter_map(|c| {
            let value = c[1].parse::<f64>().ok()?;
            Some(binary_unit_to_mbps(value, &c[2]))
        })
        .filter(|mbps| *mbps > 0.0)
        .collect()
}

/// Average speed from wget's final `(x MB/s)` report, in Mbps.
pub fn parse_wget_speed(output: &str) -> Option<f64> {
    let caps = WGET_SPEED.captures_iter(output).last()?;
    let value = caps[1].parse::<f64>().ok()?;
    let mbps = match &caps[2] {
        "MB/s" => value * 8.0,
        _ => value * 8.0 / 1024.0,
    };
    (mbps > 0.0).then_some(mbps)
}

/// curl's `%{speed_upload}` (bytes per second) in Mbps.
pub fn parse_upload_speed(output: &str) -> Option<f64> {
    let bytes_per_sec = output
        .split_whitespace()
        .last()
        .and_then(|t| t.parse::<f64>().ok())?;
    let mbps = bytes_per_sec * 8.0 / 1_000_000.0;
    (mbps > 0.0).then_some(mbps)
}

/// Total retransmissions over all sockets in `ss -ti` output.
pub fn parse_retransmissions(output: &str) -> f64 {
    RETRANS
        .captures_iter(output)
        .filter_map(|c| c[2].parse::<f64>().ok())
        .sum()
}

/// Queued packets summed over all qdiscs in `tc -s qdisc` output.
pub fn parse_qdisc_backlog(output: &str) -> Option<f64> {
    let mut matched = false;
    let total: f64 = BACKLOG
        .captures_iter(output)
        .filter_map(|c| c[2].parse::<f64>().ok())
        .inspect(|_| matched = true)
        .sum();
    matched.then_some(total)
}

/// Sum of proxy counters whose name ends in `drop` or `error`.
///
/// Expects `{"stat": [{"name": ..., "value": ...}]}`; values may be numbers
/// or numeric strings. Counters without a value count as zero.
pub fn parse_proxy_drops(output: &str) -> Option<f64> {
    let start = output.find('{')?;
    let value: serde_json::Value = serde_json::from_str(&output[start..]).ok()?;
    let stats = value.get("stat")?.as_array()?;

    let total: f64 = stats
        .iter()
        .filter(|s| {
            s.get("name")
                .and_then(serde_json::Value::as_str)
                .is_some_and(|n| n.ends_with("drop") || n.ends_with("error"))
        })
        .filter_map(|s| match s.get("value") {
            Some(serde_json::Value::Number(n)) => n.as_f64(),
            Some(serde_json::Value::String(s)) => s.parse::<f64>().ok(),
            None => Some(0.0),
            _ => None,
        })
        .sum();
    Some(total)
}

/// Sections of the combined load-telemetry output.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct LoadSections<'a> {
    pub idle: &'a str,
    pub loaded: &'a str,
    pub sockets: &'a str,
    pub qdisc: &'a str,
}

pub fn split_load_sections(output: &str) -> LoadSections<'_> {
    let (idle, rest) = output.split_once(LOADED_MARKER).unwrap_or((output, ""));
    let (loaded, rest) = rest.split_once(SOCKETS_MARKER).unwrap_or((rest, ""));
    let (sockets, qdisc) = rest.split_once(QDISC_MARKER).unwrap_or((rest, ""));
    LoadSections { idle, loaded, sockets, qdisc }
}

/// Bufferbloat: loaded mean RTT above idle mean RTT, floored at zero.
pub fn bufferbloat_ms(idle_rtts: &[f64], loaded_rtts: &[f64]) -> Option<f64> {
    let idle = mean(idle_rtts);
    let loaded = mean(loaded_rtts);
    (idle > 0.0 && loaded > 0.0).then(|| (loaded - idle).max(0.0))
}

/// Truncate to at most `max_chars` characters.
pub fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Quote a string as a single POSIX shell word.
pub fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const PING_OUTPUT: &str = "\
PING 8.8.8.8 (8.8.8.8) 56(84) bytes of data.
64 bytes from 8.8.8.8: icmp_seq=1 ttl=117 time=10.0 ms
64 bytes from 8.8.8.8: icmp_seq=2 ttl=117 time=14.0 ms
64 bytes from 8.8.8.8: icmp_seq=3 ttl=117 time=12 ms

--- 8.8.8.8 ping statistics ---
3 packets transmitted, 3 received, 0% packet loss, time 203ms";

    #[test]
    fn test_connection_timing_converts_to_ms() {
        let t = parse_connection_timing("0.012000|0.045500|0.120000").unwrap();
        assert!((t.tcp_ms - 12.0).abs() < 1e-9);
        assert!((t.tls_ms - 45.5).abs() < 1e-9);
        assert!((t.total_ms - 120.0).abs() < 1e-9);
        assert!(parse_connection_timing("000|000|0.000").is_none());
        assert!(parse_connection_timing("curl: (6) Could not resolve host").is_none());
    }

    #[test]
    fn test_dig_query_time() {
        let out = ";; Query time: 23 msec\n;; SERVER: 8.8.8.8#53(8.8.8.8)";
        assert_eq!(parse_dig_query_time(out), Some(23.0));
        assert_eq!(parse_dig_query_time(";; connection timed out"), None);
    }

    #[test]
    fn test_ping_jitter_and_loss() {
        let rtts = parse_ping_rtts(PING_OUTPUT);
        assert_eq!(rtts, vec![10.0, 14.0, 12.0]);
        // mean 12, deviations 2, 2, 0
        assert!((jitter_from_rtts(&rtts).unwrap() - 4.0 / 3.0).abs() < 1e-9);
        assert_eq!(parse_packet_loss(PING_OUTPUT), Some(0.0));
        assert!(jitter_from_rtts(&[10.0]).is_none());
    }

    #[test]
    fn test_packet_loss_fractional() {
        let out = "30 packets transmitted, 29 received, 3.33333% packet loss, time 2900ms";
        assert!((parse_packet_loss(out).unwrap() - 3.33333).abs() < 1e-9);
    }

    #[test]
    fn test_traceroute_hops() {
        let out = "\
traceroute to 8.8.8.8 (8.8.8.8), 3 hops max, 60 byte packets
 1  10.0.0.1  0.512 ms
 2  *
 3  72.14.1.1  160.20 ms";
        assert_eq!(parse_hop_rtts(out, 3), vec![0.512, 160.2]);
        assert_eq!(parse_hop_rtts(out, 1), vec![0.512]);
    }

    #[test]
    fn test_aria2_samples() {
        let out = "\
[#2089b0 2.3MiB/10MiB(23%) CN:16 DL:4.0MiB ETA:2s]
[#2089b0 6.1MiB/10MiB(61%) CN:16 DL:512KiB ETA:1s]
[#2089b0 10MiB/10MiB(100%) CN:16 DL:0B]";
        let samples = parse_aria2_samples(out);
        assert_eq!(samples, vec![32.0, 4.0]);
    }

    #[test]
    fn test_wget_speed() {
        let out = "2026-01-01 12:00:00 (11.2 MB/s) - '/dev/null' saved [10485760/10485760]";
        assert!((parse_wget_speed(out).unwrap() - 89.6).abs() < 1e-9);
        let out = "(512 KB/s) - '/dev/null' saved";
        assert!((parse_wget_speed(out).unwrap() - 4.0).abs() < 1e-9);
        assert!(parse_wget_speed("failed: Connection refused.").is_none());
    }

    #[test]
    fn test_upload_speed() {
        assert!((parse_upload_speed("1250000.000").unwrap() - 10.0).abs() < 1e-9);
        assert!(parse_upload_speed("0.000").is_none());
        assert!(parse_upload_speed("").is_none());
    }

    #[test]
    fn test_socket_and_qdisc_telemetry() {
        let ss = "cubic wscale:7,7 rto:204 retrans:0/3 rtt:10/5\nbbr rto:208 retrans:1/4";
        assert_eq!(parse_retransmissions(ss), 7.0);
        assert_eq!(parse_retransmissions("cubic rto:204"), 0.0);

        let tc = "qdisc fq_codel 0: root\n backlog 1514b 1p requeues 0\nqdisc noqueue 0: dev lo\n backlog 0b 0p requeues 0";
        assert_eq!(parse_qdisc_backlog(tc), Some(1.0));
        assert_eq!(parse_qdisc_backlog("tc: command not found"), None);
    }

    #[test]
    fn test_proxy_drops() {
        let out = r#"{"stat": [
            {"name": "inbound>>>vless>>>traffic>>>drop", "value": 5},
            {"name": "outbound>>>direct>>>error", "value": "3"},
            {"name": "inbound>>>vless>>>traffic>>>uplink", "value": 90000},
            {"name": "outbound>>>block>>>drop"}
        ]}"#;
        assert_eq!(parse_proxy_drops(out), Some(8.0));
        assert_eq!(parse_proxy_drops("failed to dial"), None);
    }

    #[test]
    fn test_load_sections_and_bufferbloat() {
        let out = format!("idle{LOADED_MARKER}loaded{SOCKETS_MARKER}ss{QDISC_MARKER}tc");
        let s = split_load_sections(&out);
        assert_eq!(s, LoadSections { idle: "idle", loaded: "loaded", sockets: "ss", qdisc: "tc" });

        assert_eq!(bufferbloat_ms(&[10.0, 12.0], &[30.0, 32.0]), Some(20.0));
        assert_eq!(bufferbloat_ms(&[20.0], &[15.0]), Some(0.0));
        assert_eq!(bufferbloat_ms(&[], &[15.0]), None);
    }

    #[test]
    fn test_truncate_and_quote() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }
}
