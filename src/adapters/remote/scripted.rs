//! Scripted executor for testing and dry runs.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::domain::ports::{CommandOutput, RemoteError, RemoteExecutor};

#[derive(Debug, Clone)]
struct Rule {
    pattern: String,
    output: CommandOutput,
}

#[derive(Debug, Default)]
struct State {
    once: VecDeque<Rule>,
    commands: Vec<String>,
    transfers: Vec<(String, String)>,
}

/// Executor that answers commands from canned responses.
///
/// A command is matched by substring: one-shot rules first, in insertion
/// order, then persistent rules in insertion order. Unmatched commands get
/// the fallback response. Every command and transfer is recorded.
pub struct ScriptedExecutor {
    rules: Vec<Rule>,
    fallback: CommandOutput,
    fail_transfers: bool,
    state: Mutex<State>,
}

impl Default for ScriptedExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self {
            rules: Vec::new(),
            fallback: CommandOutput::failure("no scripted response"),
            fail_transfers: false,
            state: Mutex::new(State::default()),
        }
    }

    /// Answer every command containing `pattern`.
    pub fn on(mut self, pattern: impl Into<String>, output: CommandOutput) -> Self {
        self.rules.push(Rule { pattern: pattern.into(), output });
        self
    }

    /// Answer the next command containing `pattern`, once.
    pub fn on_first(self, pattern: impl Into<String>, output: CommandOutput) -> Self {
        self.lock().once.push_back(Rule { pattern: pattern.into(), output });
        self
    }

    pub fn with_fallback(mut self, output: CommandOutput) -> Self {
        self.fallback = output;
        self
    }

    pub fn with_failing_transfers(mut self) -> Self {
        self.fail_transfers = true;
        self
    }

    pub fn commands(&self) -> Vec<String> {
        self.lock().commands.clone()
    }

    pub fn count_matching(&self, pattern: &str) -> usize {
        self.lock().commands.iter().filter(|c| c.contains(pattern)).count()
    }

    pub fn transfers(&self) -> Vec<(String, String)> {
        self.lock().transfers.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        // A poisoned lock only means a test panicked mid-call; the data is still usable.
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn respond(&self, command: &str) -> CommandOutput {
        let mut state = self.lock();
        state.commands.push(command.to_string());

        if let Some(pos) = state.once.iter().position(|r| command.contains(&r.pattern)) {
            if let Some(rule) = state.once.remove(pos) {
                return rule.output;
            }
        }

        self.rules
            .iter()
            .find(|r| command.contains(&r.pattern))
            .map_or_else(|| self.fallback.clone(), |r| r.output.clone())
    }
}

#[async_trait]
impl RemoteExecutor for ScriptedExecutor {
    async fn execute(&self, command: &str, _timeout: Duration) -> CommandOutput {
        self.respond(command)
    }

    async fn transfer(&self, local: &Path, remote: &str) -> Result<(), RemoteError> {
        self.lock()
            .transfers
            .push((local.display().to_string(), remote.to_string()));
        if self.fail_transfers {
            return Err(RemoteError::TransferFailed {
                path: local.display().to_string(),
                reason: "scripted failure".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_one_shot_rules_take_precedence() {
        let executor = ScriptedExecutor::new()
            .on("uname", CommandOutput::ok("Linux"))
            .on_first("uname", CommandOutput::ok("first"));

        let t = Duration::from_secs(1);
        assert_eq!(executor.execute("uname -r", t).await.output, "first");
        assert_eq!(executor.execute("uname -r", t).await.output, "Linux");
        assert!(!executor.execute("whoami", t).await.success);
        assert_eq!(executor.count_matching("uname"), 2);
    }

    #[tokio::test]
    async fn test_transfers_are_recorded() {
        let executor = ScriptedExecutor::new().with_failing_transfers();
        let result = executor.transfer(Path::new("a.sh"), "/tmp/a.sh").await;
        assert!(result.is_err());
        assert_eq!(executor.transfers(), vec![("a.sh".to_string(), "/tmp/a.sh".to_string())]);
    }
}
