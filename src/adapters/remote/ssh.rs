//! OpenSSH-backed remote executor.
//!
//! Shells out to the system `ssh`/`scp` binaries and multiplexes every command
//! over one ControlMaster connection. The master is checked with `ssh -O check`
//! before each command and re-established when it has gone away.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::models::RemoteConfig;
use crate::domain::ports::{CommandOutput, RemoteError, RemoteExecutor};

const CHECK_TIMEOUT: Duration = Duration::from_secs(5);
const TRANSFER_TIMEOUT: Duration = Duration::from_secs(60);
/// ssh's own exit code for connection-level errors.
const SSH_CONNECTION_ERROR: i32 = 255;

pub struct OpenSshExecutor {
    config: RemoteConfig,
    control_path: PathBuf,
    limiter: Option<DefaultDirectRateLimiter>,
    /// Serializes connect-or-reuse; holds whether a master was started.
    master: Mutex<bool>,
}

impl OpenSshExecutor {
    pub fn new(config: RemoteConfig) -> Self {
        let control_path = std::env::temp_dir()
            .join(format!("vpn-tuner-{}", &Uuid::new_v4().simple().to_string()[..8]))
            .join("cm");
        let limiter = Quota::with_period(Duration::from_millis(config.command_interval_ms))
            .map(RateLimiter::direct);

        Self {
            config,
            control_path,
            limiter,
            master: Mutex::new(false),
        }
    }

    fn destination(&self) -> String {
        format!("{}@{}", self.config.user, self.config.host)
    }

    fn common_options(&self) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            format!("ControlPath={}", self.control_path.display()),
            "-o".to_string(),
            format!("ServerAliveInterval={}", self.config.keepalive_secs),
            "-o".to_string(),
            "ServerAliveCountMax=3".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.config.connect_timeout_secs),
            "-o".to_string(),
            "StrictHostKeyChecking=accept-new".to_string(),
            "-o".to_string(),
            "BatchMode=yes".to_string(),
        ];
        if let Some(key) = &self.config.key_path {
            args.push("-i".to_string());
            args.push(key.clone());
        }
        args
    }

    async fn master_alive(&self) -> bool {
        let status = Command::new("ssh")
            .args(self.common_options())
            .args(["-O", "check"])
            .arg(self.destination())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status();

        matches!(tokio::time::timeout(CHECK_TIMEOUT, status).await, Ok(Ok(s)) if s.success())
    }

    /// Reuse the live master connection or establish a new one.
    async fn ensure_connected(&self) -> Result<(), RemoteError> {
        let mut started = self.master.lock().await;
        if *started && self.master_alive().await {
            return Ok(());
        }
        if *started {
            warn!(host = %self.config.host, "ssh master connection lost, reconnecting");
        }

        if self.config.host.is_empty() {
            return Err(RemoteError::NotConnected("no host configured".to_string()));
        }
        if let Some(key) = &self.config.key_path {
            if !Path::new(key).exists() {
                return Err(RemoteError::NotConnected(format!("key file not found: {key}")));
            }
        }
        if let Some(dir) = self.control_path.parent() {
            std::fs::create_dir_all(dir)?;
        }

        // With -f the client backgrounds itself once authenticated, so only
        // the exit status of the foreground process is awaited.
        let status = Command::new("ssh")
            .args(self.common_options())
            .args(["-M", "-N", "-f", "-o", "ControlPersist=yes"])
            .args(["-p", &self.config.port.to_string()])
            .arg(self.destination())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status();

        let limit = Duration::from_secs(self.config.connect_timeout_secs + 5);
        match tokio::time::timeout(limit, status).await {
            Ok(Ok(s)) if s.success() => {
                *started = true;
                info!(host = %self.config.host, port = self.config.port, "ssh master connection established");
                Ok(())
            }
            Ok(Ok(s)) => Err(RemoteError::NotConnected(format!(
                "ssh exited with {}",
                s.code().map_or_else(|| "signal".to_string(), |c| c.to_string())
            ))),
            Ok(Err(e)) => Err(RemoteError::Io(e)),
            Err(_) => Err(RemoteError::Timeout(limit)),
        }
    }
}

fn decode(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).trim().to_string()
}

#[async_trait]
impl RemoteExecutor for OpenSshExecutor {
    async fn execute(&self, command: &str, timeout: Duration) -> CommandOutput {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }
        if let Err(e) = self.ensure_connected().await {
            return CommandOutput::failure(e.to_string());
        }

        debug!(command = %command, timeout_ms = timeout.as_millis() as u64, "executing remote command");
        let child = Command::new("ssh")
            .args(self.common_options())
            .args(["-o", "ControlMaster=no", "-p", &self.config.port.to_string()])
            .arg(self.destination())
            .arg("--")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let child = match child {
            Ok(child) => child,
            Err(e) => return CommandOutput::failure(format!("Failed to spawn ssh: {e}")),
        };

        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Err(_) => CommandOutput::failure(format!("command timed out after {timeout:?}")),
            Ok(Err(e)) => CommandOutput::failure(e.to_string()),
            Ok(Ok(out)) => {
                let stdout = decode(&out.stdout);
                let stderr = decode(&out.stderr);
                if out.status.code() == Some(SSH_CONNECTION_ERROR) {
                    return CommandOutput::failure(stderr);
                }
                CommandOutput::ok(if stdout.is_empty() { stderr } else { stdout })
            }
        }
    }

    async fn transfer(&self, local: &Path, remote: &str) -> Result<(), RemoteError> {
        self.ensure_connected().await?;

        let output = Command::new("scp")
            .args(self.common_options())
            .args(["-P", &self.config.port.to_string()])
            .arg(local)
            .arg(format!("{}:{remote}", self.destination()))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        match tokio::time::timeout(TRANSFER_TIMEOUT, output).await {
            Err(_) => Err(RemoteError::Timeout(TRANSFER_TIMEOUT)),
            Ok(Err(e)) => Err(RemoteError::Io(e)),
            Ok(Ok(out)) if out.status.success() => Ok(()),
            Ok(Ok(out)) => Err(RemoteError::TransferFailed {
                path: local.display().to_string(),
                reason: decode(&out.stderr),
            }),
        }
    }

    async fn close(&self) {
        let mut started = self.master.lock().await;
        if !*started {
            return;
        }
        let status = Command::new("ssh")
            .args(self.common_options())
            .args(["-O", "exit"])
            .arg(self.destination())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status();
        let _ = tokio::time::timeout(CHECK_TIMEOUT, status).await;
        *started = false;
        if let Some(dir) = self.control_path.parent() {
            let _ = std::fs::remove_dir_all(dir);
        }
        info!(host = %self.config.host, "ssh master connection closed");
    }
}
