use serde::{Deserialize, Serialize};

/// Main configuration structure for vpn-tuner
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Remote host and sandbox layout
    #[serde(default)]
    pub remote: RemoteConfig,

    /// Decision oracle (LLM provider) settings
    #[serde(default)]
    pub oracle: OracleConfig,

    /// Decision loop policy
    #[serde(default)]
    pub optimizer: OptimizerConfig,

    /// Measurement harness and per-trial protocol
    #[serde(default)]
    pub measurement: MeasurementConfig,

    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Remote host connection and sandbox layout
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RemoteConfig {
    #[serde(default)]
    pub host: String,

    #[serde(default = "default_ssh_port")]
    pub port: u16,

    #[serde(default = "default_ssh_user")]
    pub user: String,

    /// Private key file; the ssh agent/default identities are used when unset
    #[serde(default)]
    pub key_path: Option<String>,

    /// Remote scratch directory holding the helper scripts
    #[serde(default = "default_scratch_dir")]
    pub scratch_dir: String,

    /// Local directory the helper scripts are pushed from
    #[serde(default = "default_scripts_dir")]
    pub scripts_dir: String,

    /// Remote cgroup directory the sandbox runs in
    #[serde(default = "default_cgroup_path")]
    pub cgroup_path: String,

    #[serde(default = "default_keepalive_secs")]
    pub keepalive_secs: u64,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Minimum spacing between issued commands
    #[serde(default = "default_command_interval_ms")]
    pub command_interval_ms: u64,
}

fn default_ssh_port() -> u16 {
    22
}

fn default_ssh_user() -> String {
    "root".to_string()
}

fn default_scratch_dir() -> String {
    "/tmp/vpn-tuner-sandbox".to_string()
}

fn default_scripts_dir() -> String {
    "scripts/sandbox".to_string()
}

fn default_cgroup_path() -> String {
    "/sys/fs/cgroup/vpn-tuner-sandbox".to_string()
}

const fn default_keepalive_secs() -> u64 {
    30
}

const fn default_connect_timeout_secs() -> u64 {
    15
}

const fn default_command_interval_ms() -> u64 {
    100
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: default_ssh_port(),
            user: default_ssh_user(),
            key_path: None,
            scratch_dir: default_scratch_dir(),
            scripts_dir: default_scripts_dir(),
            cgroup_path: default_cgroup_path(),
            keepalive_secs: default_keepalive_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            command_interval_ms: default_command_interval_ms(),
        }
    }
}

/// Oracle provider settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct OracleConfig {
    /// Provider: openai_compatible or anthropic
    #[serde(default = "default_provider")]
    pub provider: String,

    #[serde(default = "default_model")]
    pub model: String,

    /// API base URL; provider default when unset
    #[serde(default)]
    pub base_url: Option<String>,

    /// API key; read from the provider's environment variable when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_oracle_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_provider() -> String {
    "openai_compatible".to_string()
}

fn default_model() -> String {
    "gpt-4o".to_string()
}

const fn default_temperature() -> f32 {
    0.7
}

const fn default_max_tokens() -> u32 {
    2048
}

const fn default_oracle_timeout_secs() -> u64 {
    120
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: None,
            api_key: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_oracle_timeout_secs(),
        }
    }
}

impl OracleConfig {
    /// Get API key from config or the provider's environment variable.
    pub fn get_api_key(&self) -> Option<String> {
        let var = match self.provider.as_str() {
            "anthropic" => "ANTHROPIC_API_KEY",
            _ => "OPENAI_API_KEY",
        };
        self.api_key.clone().or_else(|| std::env::var(var).ok())
    }
}

/// Decision loop policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct OptimizerConfig {
    #[serde(default = "default_max_experiments")]
    pub max_experiments: u32,

    /// Finish requests are refused until this many experiments have run
    #[serde(default = "default_min_experiments")]
    pub min_experiments: u32,

    #[serde(default = "default_max_diagnostic_calls")]
    pub max_diagnostic_calls: u32,

    #[serde(default = "default_diagnostic_timeout_secs")]
    pub diagnostic_timeout_secs: u64,

    /// Characters of diagnostic output fed back to the oracle
    #[serde(default = "default_diagnostic_output_chars")]
    pub diagnostic_output_chars: usize,

    #[serde(default = "default_setup_timeout_secs")]
    pub setup_timeout_secs: u64,

    #[serde(default = "default_apply_timeout_secs")]
    pub apply_timeout_secs: u64,

    /// Pause after applying a configuration before measuring
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
}

const fn default_max_experiments() -> u32 {
    10
}

const fn default_min_experiments() -> u32 {
    5
}

const fn default_max_diagnostic_calls() -> u32 {
    5
}

const fn default_diagnostic_timeout_secs() -> u64 {
    15
}

const fn default_diagnostic_output_chars() -> usize {
    2000
}

const fn default_setup_timeout_secs() -> u64 {
    30
}

const fn default_apply_timeout_secs() -> u64 {
    10
}

const fn default_settle_delay_ms() -> u64 {
    1000
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            max_experiments: default_max_experiments(),
            min_experiments: default_min_experiments(),
            max_diagnostic_calls: default_max_diagnostic_calls(),
            diagnostic_timeout_secs: default_diagnostic_timeout_secs(),
            diagnostic_output_chars: default_diagnostic_output_chars(),
            setup_timeout_secs: default_setup_timeout_secs(),
            apply_timeout_secs: default_apply_timeout_secs(),
            settle_delay_ms: default_settle_delay_ms(),
        }
    }
}

/// Measurement harness and per-trial protocol
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct MeasurementConfig {
    #[serde(default = "default_max_rounds")]
    pub max_rounds: u32,

    /// Round (1-based) after which Smart Skip is evaluated
    #[serde(default = "default_smart_skip_round")]
    pub smart_skip_round: u32,

    /// Trials scoring below this fraction of the baseline are abandoned
    #[serde(default = "default_smart_skip_ratio")]
    pub smart_skip_ratio: f64,

    /// Round (1-based) after which Adaptive Exit is evaluated
    #[serde(default = "default_adaptive_exit_round")]
    pub adaptive_exit_round: u32,

    /// Round-score CV (percent) below which measurement stops early
    #[serde(default = "default_adaptive_exit_cv_pct")]
    pub adaptive_exit_cv_pct: f64,

    /// Trim fraction used when aggregating rounds
    #[serde(default = "default_round_trim_pct")]
    pub round_trim_pct: f64,

    #[serde(default = "default_inter_round_delay_ms")]
    pub inter_round_delay_ms: u64,

    #[serde(default = "default_true")]
    pub fast_fail: bool,

    #[serde(default)]
    pub targets: ProbeTargets,
}

const fn default_max_rounds() -> u32 {
    5
}

const fn default_smart_skip_round() -> u32 {
    2
}

const fn default_smart_skip_ratio() -> f64 {
    0.8
}

const fn default_adaptive_exit_round() -> u32 {
    3
}

const fn default_adaptive_exit_cv_pct() -> f64 {
    5.0
}

const fn default_round_trim_pct() -> f64 {
    0.2
}

const fn default_inter_round_delay_ms() -> u64 {
    1000
}

const fn default_true() -> bool {
    true
}

impl Default for MeasurementConfig {
    fn default() -> Self {
        Self {
            max_rounds: default_max_rounds(),
            smart_skip_round: default_smart_skip_round(),
            smart_skip_ratio: default_smart_skip_ratio(),
            adaptive_exit_round: default_adaptive_exit_round(),
            adaptive_exit_cv_pct: default_adaptive_exit_cv_pct(),
            round_trim_pct: default_round_trim_pct(),
            inter_round_delay_ms: default_inter_round_delay_ms(),
            fast_fail: true,
            targets: ProbeTargets::default(),
        }
    }
}

/// Endpoints the probes measure against
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ProbeTargets {
    #[serde(default = "default_ping_target")]
    pub ping_target: String,

    #[serde(default = "default_connection_urls")]
    pub connection_urls: Vec<String>,

    #[serde(default = "default_dns_server")]
    pub dns_server: String,

    #[serde(default = "default_dns_domains")]
    pub dns_domains: Vec<String>,

    #[serde(default = "default_download_url")]
    pub download_url: String,

    #[serde(default = "default_download_size_mb")]
    pub download_size_mb: f64,

    #[serde(default = "default_upload_url")]
    pub upload_url: String,

    /// Command printing proxy statistics as `{"stat": [{"name", "value"}]}`
    #[serde(default = "default_proxy_stats_command")]
    pub proxy_stats_command: String,

    #[serde(default = "default_anomaly_threshold_ms")]
    pub anomaly_threshold_ms: f64,
}

fn default_ping_target() -> String {
    "8.8.8.8".to_string()
}

fn default_connection_urls() -> Vec<String> {
    vec![
        "https://www.google.com".to_string(),
        "https://www.cloudflare.com".to_string(),
        "https://www.microsoft.com".to_string(),
    ]
}

fn default_dns_server() -> String {
    "8.8.8.8".to_string()
}

fn default_dns_domains() -> Vec<String> {
    ["google.com", "cloudflare.com", "github.com", "microsoft.com", "apple.com"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_download_url() -> String {
    "http://speedtest.tele2.net/10MB.zip".to_string()
}

const fn default_download_size_mb() -> f64 {
    10.0
}

fn default_upload_url() -> String {
    "http://httpbin.org/post".to_string()
}

fn default_proxy_stats_command() -> String {
    "xray api statsquery --server=127.0.0.1:62789 2>/dev/null".to_string()
}

const fn default_anomaly_threshold_ms() -> f64 {
    150.0
}

impl Default for ProbeTargets {
    fn default() -> Self {
        Self {
            ping_target: default_ping_target(),
            connection_urls: default_connection_urls(),
            dns_server: default_dns_server(),
            dns_domains: default_dns_domains(),
            download_url: default_download_url(),
            download_size_mb: default_download_size_mb(),
            upload_url: default_upload_url(),
            proxy_stats_command: default_proxy_stats_command(),
            anomaly_threshold_ms: default_anomaly_threshold_ms(),
        }
    }
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DatabaseConfig {
    /// Path to `SQLite` database file
    #[serde(default = "default_database_path")]
    pub path: String,

    /// Maximum number of database connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_database_path() -> String {
    ".vpn-tuner/experiments.db".to_string()
}

const fn default_max_connections() -> u32 {
    5
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            max_connections: default_max_connections(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Directory for rolling JSON log files; stdout only when unset
    #[serde(default)]
    pub log_dir: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            log_dir: None,
        }
    }
}
