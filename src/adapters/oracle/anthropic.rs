//! Anthropic Messages API oracle.

use async_trait::async_trait;
use reqwest::{header, Client};
use serde::{Deserialize, Serialize};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{ChatMessage, OracleConfig, OracleReply, Role, ToolCall};
use crate::domain::ports::DecisionOracle;

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<RequestMessage<'a>>,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct RequestMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    #[serde(other)]
    Other,
}

pub struct AnthropicOracle {
    config: OracleConfig,
    client: Client,
}

impl AnthropicOracle {
    pub fn new(config: OracleConfig) -> DomainResult<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| DomainError::ValidationFailed(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self { config, client })
    }

    /// System messages are lifted into the top-level `system` field.
    fn build_request<'a>(&'a self, messages: &'a [ChatMessage]) -> MessagesRequest<'a> {
        let system: Vec<&str> = messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .collect();

        MessagesRequest {
            model: &self.config.model,
            max_tokens: self.config.max_tokens,
            system: (!system.is_empty()).then(|| system.join("\n\n")),
            messages: messages
                .iter()
                .filter_map(|m| match m.role {
                    Role::System => None,
                    Role::User => Some(RequestMessage { role: "user", content: &m.content }),
                    Role::Assistant => Some(RequestMessage { role: "assistant", content: &m.content }),
                })
                .collect(),
            temperature: self.config.temperature,
        }
    }
}

#[async_trait]
impl DecisionOracle for AnthropicOracle {
    async fn complete(&self, messages: &[ChatMessage]) -> DomainResult<OracleReply> {
        let api_key = self
            .config
            .get_api_key()
            .ok_or_else(|| DomainError::OracleFailed("ANTHROPIC_API_KEY not set".to_string()))?;
        let base = self.config.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL);

        let response = self
            .client
            .post(format!("{}/v1/messages", base.trim_end_matches('/')))
            .header("x-api-key", api_key)
            .header("anthropic-version", API_VERSION)
            .header(header::CONTENT_TYPE, "application/json")
            .json(&self.build_request(messages))
            .send()
            .await
            .map_err(|e| DomainError::OracleFailed(format!("Request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DomainError::OracleFailed(format!("API error {status}: {body}")));
        }

        let parsed: MessagesResponse = response
            .json()
            .await
            .map_err(|e| DomainError::OracleFailed(format!("Invalid response body: {e}")))?;

        let mut reply = OracleReply::default();
        for block in parsed.content {
            match block {
                ContentBlock::Text { text } => reply.content.push_str(&text),
                ContentBlock::ToolUse { id, name, input } => reply.tool_calls.push(ToolCall {
                    id,
                    name,
                    arguments_json: input.to_string(),
                }),
                ContentBlock::Other => {}
            }
        }
        Ok(reply)
    }

    fn name(&self) -> &str {
        "anthropic"
    }
}
