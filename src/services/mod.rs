//! Application services: measurement, scoring and the optimization loop.

pub mod context_collector;
pub mod measurement_harness;
pub mod optimizer;
pub mod probes;
pub mod prompts;
pub mod scoring;
pub mod statistics;
pub mod trial_runner;

pub use context_collector::{ServerContext, ServerContextCollector};
pub use measurement_harness::MeasurementHarness;
pub use optimizer::{OptimizationOrchestrator, OptimizerError, OptimizerEvent};
pub use scoring::{calculate_score, ScoreBreakdown};
pub use statistics::{aggregate_rounds, coefficient_of_variation, trimmed_mean};
pub use trial_runner::{RoundExit, TrialKind, TrialOutcome, TrialRunner};
