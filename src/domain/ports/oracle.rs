//! Decision oracle port.

use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::{ChatMessage, OracleReply};

/// External reasoning service that proposes the next optimizer action.
#[async_trait]
pub trait DecisionOracle: Send + Sync {
    /// Complete the conversation. The first message is the system instruction.
    async fn complete(&self, messages: &[ChatMessage]) -> DomainResult<OracleReply>;

    /// Provider name for logs.
    fn name(&self) -> &str;
}
