//! Scripted oracle for testing and dry runs.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{ChatMessage, OracleReply};
use crate::domain::ports::DecisionOracle;

/// Scripted response entry.
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    Reply(OracleReply),
    Error(String),
}

/// Oracle that replays a queue of replies.
///
/// Once the queue is drained every call returns a `finish` decision.
/// Each call records the conversation it was given.
pub struct ScriptedOracle {
    replies: Mutex<VecDeque<ScriptedReply>>,
    seen: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedOracle {
    pub fn new() -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Queue a raw JSON decision as reply content.
    pub fn then_json(self, value: serde_json::Value) -> Self {
        self.push(ScriptedReply::Reply(OracleReply::text(value.to_string())))
    }

    pub fn then_reply(self, reply: OracleReply) -> Self {
        self.push(ScriptedReply::Reply(reply))
    }

    pub fn then_error(self, message: impl Into<String>) -> Self {
        self.push(ScriptedReply::Error(message.into()))
    }

    fn push(self, reply: ScriptedReply) -> Self {
        self.replies
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push_back(reply);
        self
    }

    /// Conversations passed to each call, in order.
    pub fn conversations(&self) -> Vec<Vec<ChatMessage>> {
        self.seen
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    pub fn remaining(&self) -> usize {
        self.replies
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }
}

impl Default for ScriptedOracle {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DecisionOracle for ScriptedOracle {
    async fn complete(&self, messages: &[ChatMessage]) -> DomainResult<OracleReply> {
        self.seen
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(messages.to_vec());

        let next = self
            .replies
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .pop_front();

        match next {
            Some(ScriptedReply::Reply(reply)) => Ok(reply),
            Some(ScriptedReply::Error(message)) => Err(DomainError::OracleFailed(message)),
            None => Ok(OracleReply::text(
                r#"{"action": "finish", "reasoning": "script exhausted", "should_continue": false}"#,
            )),
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}
