//! Oracle conversation types and the decisions parsed from replies.

use serde::{Deserialize, Deserializer, Serialize};

use super::experiment::ConfigMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One message of the running conversation with the oracle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

/// A structured tool invocation requested by the oracle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments_json: String,
}

/// Provider-neutral oracle reply. Every oracle adapter produces this shape.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OracleReply {
    pub content: String,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
}

impl OracleReply {
    pub fn text(content: impl Into<String>) -> Self {
        Self { content: content.into(), tool_calls: Vec::new() }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionAction {
    #[default]
    ApplyConfig,
    #[serde(alias = "diagnose")]
    SshCommand,
    Finish,
    #[serde(other)]
    Unknown,
}

/// A parsed oracle decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    #[serde(default, deserialize_with = "null_as_default")]
    pub reasoning: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub action: DecisionAction,
    #[serde(default, deserialize_with = "null_as_default")]
    pub config: ConfigMap,
    #[serde(default, deserialize_with = "null_as_default")]
    pub ssh_command: String,
    #[serde(default = "default_true", deserialize_with = "null_as_true")]
    pub should_continue: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub summary: String,
}

fn default_true() -> bool {
    true
}

/// Oracles tend to send every key, with `null` for the ones they do not use.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn null_as_true<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<bool>::deserialize(deserializer)?.unwrap_or(true))
}

impl Decision {
    /// Synthetic finish used when a reply cannot be understood.
    pub fn finish(reasoning: impl Into<String>) -> Self {
        Self {
            reasoning: reasoning.into(),
            action: DecisionAction::Finish,
            config: ConfigMap::new(),
            ssh_command: String::new(),
            should_continue: false,
            summary: String::new(),
        }
    }

    /// Parse a decision from an oracle reply.
    ///
    /// A tool call takes precedence over content: its name is the action and
    /// its arguments are the remaining decision fields. Replies that cannot
    /// be parsed degrade to a synthetic finish.
    pub fn from_reply(reply: &OracleReply) -> Self {
        if let Some(call) = reply.tool_calls.first() {
            return Self::from_tool_call(call, &reply.content);
        }

        let json = extract_json(&reply.content);
        match serde_json::from_str::<Decision>(json) {
            Ok(decision) => decision,
            Err(e) => Self::finish(format!("Failed to parse oracle reply: {e}")),
        }
    }

    fn from_tool_call(call: &ToolCall, content: &str) -> Self {
        let arguments = if call.arguments_json.trim().is_empty() {
            "{}"
        } else {
            call.arguments_json.as_str()
        };

        let mut value: serde_json::Value = match serde_json::from_str(arguments) {
            Ok(v) => v,
            Err(e) => return Self::finish(format!("Invalid tool call arguments: {e}")),
        };
        let Some(obj) = value.as_object_mut() else {
            return Self::finish("Tool call arguments are not an object");
        };

        obj.insert("action".to_string(), serde_json::Value::String(call.name.clone()));
        if !obj.contains_key("reasoning") && !content.trim().is_empty() {
            obj.insert("reasoning".to_string(), serde_json::Value::String(content.trim().to_string()));
        }
        // `ssh_command(command = ...)` is the natural tool signature.
        if let Some(cmd) = obj.remove("command") {
            obj.entry("ssh_command").or_insert(cmd);
        }

        match serde_json::from_value::<Decision>(value) {
            Ok(decision) => decision,
            Err(e) => Self::finish(format!("Invalid tool call arguments: {e}")),
        }
    }

    /// Whether this decision ends the loop (subject to the minimum-experiments guard).
    pub fn wants_finish(&self) -> bool {
        self.action == DecisionAction::Finish || !self.should_continue
    }
}

/// Extract a JSON object from a reply that may be wrapped in a markdown code block.
pub fn extract_json(response: &str) -> &str {
    let trimmed = response.trim();

    if let Some(start) = trimmed.find("```") {
        let after_fence = &trimmed[start + 3..];
        let body_start = after_fence.find('\n').map_or(0, |i| i + 1);
        let body = &after_fence[body_start..];
        if let Some(end) = body.find("```") {
            return body[..end].trim();
        }
    }

    match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if end > start => &trimmed[start..=end],
        _ => trimmed,
    }
}
