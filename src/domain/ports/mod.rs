//! Ports (interfaces) implemented by adapters.

pub mod experiment_repository;
pub mod measurer;
pub mod oracle;
pub mod remote_executor;

pub use experiment_repository::ExperimentRepository;
pub use measurer::NetworkMeasurer;
pub use oracle::DecisionOracle;
pub use remote_executor::{CommandOutput, RemoteError, RemoteExecutor};
