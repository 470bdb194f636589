//! vpn-tuner - closed-loop network tuning for VPN servers
//!
//! vpn-tuner measures a remote VPN host from inside a resource-limited
//! sandbox, asks a decision oracle (an LLM) for the next configuration change,
//! applies it, re-measures and keeps the best-scoring configuration.
//!
//! # Architecture
//!
//! This crate follows Clean Architecture / Hexagonal Architecture principles:
//!
//! - **Domain Layer** (`domain`): models and the ports adapters implement
//! - **Service Layer** (`services`): measurement, scoring and the optimizer loop
//! - **Adapters** (`adapters`): SSH transport, oracle providers, SQLite store
//! - **Infrastructure Layer** (`infrastructure`): configuration and logging
//! - **CLI Layer** (`cli`): Command-line interface

pub mod adapters;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

// Re-export commonly used types for convenience
pub use domain::models::{
    Config, ConfigMap, ExperimentResult, Metric, MetricSummary, OptimizerPhase, ProbeReport,
    ProbeResult, Recommendation,
};
pub use domain::ports::{
    CommandOutput, DecisionOracle, ExperimentRepository, NetworkMeasurer, RemoteExecutor,
};
pub use domain::{DomainError, DomainResult};
pub use infrastructure::config::{ConfigError, ConfigLoader};
pub use services::{
    calculate_score, MeasurementHarness, OptimizationOrchestrator, OptimizerError, OptimizerEvent,
};
