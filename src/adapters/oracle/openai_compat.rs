//! OpenAI-compatible chat completions oracle.
//!
//! Works against any endpoint that implements `/chat/completions` with JSON
//! response mode (OpenAI, OpenRouter, local inference servers).

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{ChatMessage, OracleConfig, OracleReply, ToolCall};
use crate::domain::ports::DecisionOracle;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ResponseToolCall>,
}

#[derive(Debug, Deserialize)]
struct ResponseToolCall {
    #[serde(default)]
    id: String,
    function: ResponseFunction,
}

#[derive(Debug, Deserialize)]
struct ResponseFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

pub struct OpenAiCompatibleOracle {
    config: OracleConfig,
    client: Client,
}

impl OpenAiCompatibleOracle {
    pub fn new(config: OracleConfig) -> DomainResult<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| DomainError::ValidationFailed(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self { config, client })
    }

    fn endpoint(&self) -> String {
        let base = self.config.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL);
        format!("{}/chat/completions", base.trim_end_matches('/'))
    }

    fn build_body(&self, messages: &[ChatMessage]) -> serde_json::Value {
        serde_json::json!({
            "model": self.config.model,
            "messages": messages,
            "temperature": self.config.temperature,
            "max_tokens": self.config.max_tokens,
            "response_format": { "type": "json_object" },
        })
    }
}

#[async_trait]
impl DecisionOracle for OpenAiCompatibleOracle {
    async fn complete(&self, messages: &[ChatMessage]) -> DomainResult<OracleReply> {
        let api_key = self
            .config
            .get_api_key()
            .ok_or_else(|| DomainError::OracleFailed("OPENAI_API_KEY not set".to_string()))?;

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(api_key)
            .json(&self.build_body(messages))
            .send()
            .await
            .map_err(|e| DomainError::OracleFailed(format!("Request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DomainError::OracleFailed(format!("API error {status}: {body}")));
        }

        let parsed: CompletionResponse = response
            .json()
            .await
            .map_err(|e| DomainError::OracleFailed(format!("Invalid response body: {e}")))?;

        let message = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| DomainError::OracleFailed("Response contained no choices".to_string()))?
            .message;

        Ok(OracleReply {
            content: message.content.unwrap_or_default(),
            tool_calls: message
                .tool_calls
                .into_iter()
                .map(|c| ToolCall {
                    id: c.id,
                    name: c.function.name,
                    arguments_json: c.function.arguments,
                })
                .collect(),
        })
    }

    fn name(&self) -> &str {
        "openai_compatible"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{Decision, DecisionAction};

    fn oracle(server: &mockito::ServerGuard) -> OpenAiCompatibleOracle {
        OpenAiCompatibleOracle::new(OracleConfig {
            base_url: Some(server.url()),
            api_key: Some("test-key".to_string()),
            ..OracleConfig::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_content_reply() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .match_header("authorization", "Bearer test-key")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({
                "response_format": {"type": "json_object"}
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"choices":[{"message":{"role":"assistant","content":"{\"action\":\"finish\",\"reasoning\":\"done\"}"}}]}"#,
            )
            .create_async()
            .await;

        let reply = oracle(&server)
            .complete(&[ChatMessage::system("sys"), ChatMessage::user("hi")])
            .await
            .unwrap();
        mock.assert_async().await;

        let decision = Decision::from_reply(&reply);
        assert_eq!(decision.action, DecisionAction::Finish);
        assert_eq!(decision.reasoning, "done");
    }

    #[tokio::test]
    async fn test_tool_call_reply() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_body(
                r#"{"choices":[{"message":{"content":null,"tool_calls":[{"id":"c1","type":"function","function":{"name":"ssh_command","arguments":"{\"command\":\"ss -s\"}"}}]}}]}"#,
            )
            .create_async()
            .await;

        let reply = oracle(&server).complete(&[ChatMessage::user("hi")]).await.unwrap();
        assert_eq!(reply.tool_calls.len(), 1);
        assert_eq!(reply.tool_calls[0].name, "ssh_command");
        assert_eq!(Decision::from_reply(&reply).ssh_command, "ss -s");
    }

    #[tokio::test]
    async fn test_http_error_surfaces_as_oracle_failure() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/chat/completions")
            .with_status(429)
            .with_body("rate limited")
            .create_async()
            .await;

        let err = oracle(&server).complete(&[ChatMessage::user("hi")]).await.unwrap_err();
        assert!(matches!(err, DomainError::OracleFailed(msg) if msg.contains("429")));
    }
}
