//! Experiment repository port.

use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::ExperimentResult;

/// Repository interface for experiment persistence.
///
/// Ids are assigned by the store and increase monotonically, so the lowest id
/// is always the first trial ever recorded.
#[async_trait]
pub trait ExperimentRepository: Send + Sync {
    /// Persist a result and return its assigned id.
    async fn save(&self, result: &ExperimentResult) -> DomainResult<i64>;

    /// Load an experiment by id.
    async fn get(&self, id: i64) -> DomainResult<Option<ExperimentResult>>;

    /// Top results by score, descending. Ties keep insertion order.
    async fn get_best(&self, limit: usize) -> DomainResult<Vec<ExperimentResult>>;

    /// Every result in insertion order.
    async fn get_all(&self) -> DomainResult<Vec<ExperimentResult>>;

    /// The first result ever stored.
    async fn get_baseline(&self) -> DomainResult<Option<ExperimentResult>>;

    async fn count(&self) -> DomainResult<u64>;

    /// Delete every stored result.
    async fn clear(&self) -> DomainResult<()>;
}
