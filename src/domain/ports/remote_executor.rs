//! Remote command execution port.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Outcome of a remote command.
///
/// `success` reports that the command was delivered and completed within its
/// timeout. Probes decide for themselves whether the output is usable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub output: String,
}

impl CommandOutput {
    pub fn ok(output: impl Into<String>) -> Self {
        Self { success: true, output: output.into() }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self { success: false, output: message.into() }
    }
}

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("Not connected: {0}")]
    NotConnected(String),
    #[error("Transfer of {path} failed: {reason}")]
    TransferFailed { path: String, reason: String },
    #[error("Command timed out after {0:?}")]
    Timeout(Duration),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Executes commands on, and copies files to, the host being optimized.
///
/// Implementations must be safe to call from concurrent probe groups and
/// must never block past the given timeout.
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    async fn execute(&self, command: &str, timeout: Duration) -> CommandOutput;

    async fn transfer(&self, local: &Path, remote: &str) -> Result<(), RemoteError>;

    /// Release the underlying connection. Further calls may reconnect.
    async fn close(&self) {}
}
