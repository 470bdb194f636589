//! Best-effort collection of facts about the remote host.
//!
//! Every probe has a short timeout; a failed or empty probe simply leaves its
//! key out of the context handed to the oracle.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tracing::{debug, info};

use super::probes::truncate_chars;
use crate::domain::ports::RemoteExecutor;

pub type ServerContext = BTreeMap<String, Value>;

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);
const RAW_CONFIG_CHARS: usize = 500;

const HOST_FACTS: [(&str, &str); 13] = [
    ("os", "cat /etc/os-release | grep PRETTY_NAME | cut -d '\"' -f 2"),
    ("kernel", "uname -r"),
    ("cpu_model", "lscpu | grep 'Model name' | cut -d ':' -f 2"),
    ("cpu_cores", "nproc"),
    ("ram_total", "free -h | grep Mem | awk '{print $2}'"),
    ("ram_used", "free -h | grep Mem | awk '{print $3}'"),
    ("disk_usage", "df -h / | tail -1 | awk '{print $5}'"),
    ("uptime", "uptime -p"),
    ("tcp_congestion", "sysctl -n net.ipv4.tcp_congestion_control"),
    ("tcp_rmem", "sysctl -n net.ipv4.tcp_rmem"),
    ("tcp_wmem", "sysctl -n net.ipv4.tcp_wmem"),
    ("mtu", "ip link show | grep -oP 'mtu \\K[0-9]+' | head -1"),
    ("ip_forward", "sysctl -n net.ipv4.ip_forward"),
];

const PROXY_CONFIG_PATHS: [&str; 3] = [
    "/usr/local/x-ui/bin/config.json",
    "/usr/local/etc/xray/config.json",
    "/etc/xray/config.json",
];

pub struct ServerContextCollector {
    executor: Arc<dyn RemoteExecutor>,
    server_ip: String,
}

impl ServerContextCollector {
    pub fn new(executor: Arc<dyn RemoteExecutor>, server_ip: impl Into<String>) -> Self {
        Self {
            executor,
            server_ip: server_ip.into(),
        }
    }

    async fn probe(&self, command: &str) -> Option<String> {
        let out = self.executor.execute(command, PROBE_TIMEOUT).await;
        let text = out.output.trim();
        (out.success && !text.is_empty()).then(|| text.to_string())
    }

    pub async fn collect(&self) -> ServerContext {
        let mut context = ServerContext::new();
        context.insert("server_ip".to_string(), json!(self.server_ip));

        for (key, command) in HOST_FACTS {
            match self.probe(command).await {
                Some(value) => {
                    context.insert(key.to_string(), json!(value));
                }
                None => debug!(key, "context probe returned nothing"),
            }
        }

        if let Some(ps) = self.probe("ps aux").await {
            context.insert("vpn_panels".to_string(), json!(detect_panels(&ps)));
        }

        for path in PROXY_CONFIG_PATHS {
            let Some(raw) = self.probe(&format!("cat {path} 2>/dev/null | head -100")).await else {
                continue;
            };
            if raw.starts_with('{') {
                context.extend(parse_proxy_config(&raw));
                break;
            }
        }

        if let Some(load) = self.probe("cat /proc/loadavg").await {
            context.insert("load_avg".to_string(), json!(load));
        }
        if let Some(conns) = self.probe("ss -s | head -5").await {
            context.insert("connections_summary".to_string(), json!(conns));
        }

        info!(fields = context.len(), "server context collected");
        context
    }
}

/// VPN panels and cores recognizable in a process listing.
pub fn detect_panels(ps_output: &str) -> Vec<&'static str> {
    let lower = ps_output.to_lowercase();
    let mut panels = Vec::new();
    if lower.contains("marzban") {
        panels.push("Marzban");
    }
    if lower.contains("x-ui") {
        panels.push("3X-UI");
    }
    if lower.contains("xray") {
        panels.push("Xray");
    }
    if lower.contains("sing-box") {
        panels.push("Sing-box");
    }
    panels
}

/// Extract the first inbound from a proxy config. Unparseable input is kept
/// as a raw prefix.
pub fn parse_proxy_config(raw: &str) -> ServerContext {
    let mut context = ServerContext::new();
    let parsed: Value = match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(_) => {
            context.insert(
                "xray_config_raw".to_string(),
                json!(truncate_chars(raw, RAW_CONFIG_CHARS)),
            );
            return context;
        }
    };

    let Some(inbound) = parsed.get("inbounds").and_then(|i| i.get(0)) else {
        return context;
    };
    let unknown = || json!("unknown");
    let stream = inbound.get("streamSettings").cloned().unwrap_or_else(|| json!({}));

    context.insert("vpn_protocol".into(), inbound.get("protocol").cloned().unwrap_or_else(unknown));
    context.insert("vpn_port".into(), inbound.get("port").cloned().unwrap_or_else(unknown));
    context.insert("vpn_network".into(), stream.get("network").cloned().unwrap_or_else(unknown));
    context.insert("vpn_security".into(), stream.get("security").cloned().unwrap_or_else(unknown));

    if let Some(reality) = stream.get("realitySettings").filter(|r| r.as_object().is_some_and(|o| !o.is_empty())) {
        context.insert("reality_dest".into(), reality.get("dest").cloned().unwrap_or_else(unknown));
        context.insert(
            "reality_server_names".into(),
            reality.get("serverNames").cloned().unwrap_or_else(|| json!([])),
        );
    }
    context
}
