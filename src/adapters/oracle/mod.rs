//! Decision oracle adapters.

pub mod anthropic;
pub mod openai_compat;
pub mod scripted;

use std::sync::Arc;

pub use anthropic::AnthropicOracle;
pub use openai_compat::OpenAiCompatibleOracle;
pub use scripted::{ScriptedOracle, ScriptedReply};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::OracleConfig;
use crate::domain::ports::DecisionOracle;

/// Providers accepted in `oracle.provider`.
pub const PROVIDERS: [&str; 2] = ["openai_compatible", "anthropic"];

/// Build the oracle named by the configuration.
///
/// Fails when no API key is configured, so a run never starts without one.
pub fn create_oracle(config: &OracleConfig) -> DomainResult<Arc<dyn DecisionOracle>> {
    let key_var = match config.provider.as_str() {
        "openai_compatible" => "OPENAI_API_KEY",
        "anthropic" => "ANTHROPIC_API_KEY",
        other => {
            return Err(DomainError::ValidationFailed(format!(
                "Unknown oracle provider: {other}"
            )))
        }
    };
    if config.get_api_key().map_or(true, |key| key.trim().is_empty()) {
        return Err(DomainError::ValidationFailed(format!(
            "API key not configured: set oracle.api_key or {key_var}"
        )));
    }

    match config.provider.as_str() {
        "anthropic" => Ok(Arc::new(AnthropicOracle::new(config.clone())?)),
        _ => Ok(Arc::new(OpenAiCompatibleOracle::new(config.clone())?)),
    }
}
