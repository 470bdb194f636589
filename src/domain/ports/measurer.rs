//! Network measurement port.

use async_trait::async_trait;

use crate::domain::models::{ProbeCache, ProbeReport};

/// Runs one full measurement pass against the remote host.
///
/// Implementations never fail: unreachable or unparsable probes are reported
/// as failed entries of a total report.
#[async_trait]
pub trait NetworkMeasurer: Send + Sync {
    async fn run_full_test(&self, cache: &ProbeCache) -> ProbeReport;
}
