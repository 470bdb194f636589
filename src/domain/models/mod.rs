//! Domain models for the optimizer.

pub mod config;
pub mod decision;
pub mod experiment;
pub mod probe;
pub mod session;

pub use config::{
    Config, DatabaseConfig, LoggingConfig, MeasurementConfig, OptimizerConfig, OracleConfig,
    ProbeTargets, RemoteConfig,
};
pub use decision::{ChatMessage, Decision, DecisionAction, OracleReply, Role, ToolCall};
pub use experiment::{
    baseline_config, is_baseline_config, ConfigMap, ExperimentResult, Recommendation,
    BASELINE_MARKER, RESERVED_CONFIG_KEYS,
};
pub use probe::{Metric, MetricSummary, ProbeCache, ProbeReport, ProbeResult};
pub use session::{Correction, OptimizationSession, OptimizerPhase};
