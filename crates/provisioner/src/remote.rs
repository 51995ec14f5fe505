//! Remote execution channel to the VPS
//!
//! Scripts are sent as a single batch over one ssh session. The script body
//! travels on stdin so credentials embedded in it never appear in the local
//! process table.

use crate::command::{self, CommandOutput};
use crate::config::Config;
use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};
use vps_common::Result;

const REDACTED: &str = "********";

/// A batch of shell commands executed atomically from the caller's view
#[derive(Debug, Clone)]
pub struct RemoteScript {
    /// Human readable summary used in logs and errors
    pub description: String,
    lines: Vec<String>,
    secrets: Vec<String>,
}

impl RemoteScript {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            lines: Vec::new(),
            secrets: Vec::new(),
        }
    }

    pub fn line(mut self, line: impl Into<String>) -> Self {
        self.lines.push(line.into());
        self
    }

    pub fn lines<I, S>(mut self, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.lines.extend(lines.into_iter().map(Into::into));
        self
    }

    /// Register a value that must be masked whenever the script is displayed
    pub fn secret(mut self, value: impl Into<String>) -> Self {
        self.secrets.push(value.into());
        self
    }

    pub fn commands(&self) -> &[String] {
        &self.lines
    }

    /// Full script body; the first failing command aborts the batch
    pub fn render(&self) -> String {
        let mut body = String::from("set -euo pipefail\n");
        for line in &self.lines {
            body.push_str(line);
            body.push('\n');
        }
        body
    }

    /// Script body with every registered secret masked
    pub fn redacted(&self) -> String {
        self.secrets
            .iter()
            .filter(|s| !s.is_empty())
            .fold(self.render(), |body, secret| body.replace(secret.as_str(), REDACTED))
    }
}

/// Capability to run scripts on the target host
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Execute a script; success is judged solely by the exit status
    async fn execute(&self, script: &RemoteScript) -> Result<CommandOutput>;

    /// Probe non-interactive (key based) authentication
    async fn check_connection(&self) -> Result<bool>;

    /// Destination shown to operators, e.g. `root@203.0.113.10`
    fn destination(&self) -> String;
}

/// `RemoteExecutor` backed by the system `ssh` client
pub struct SshExecutor {
    destination: String,
    connect_timeout_secs: u64,
}

impl SshExecutor {
    pub fn new(destination: impl Into<String>, connect_timeout_secs: u64) -> Self {
        Self {
            destination: destination.into(),
            connect_timeout_secs,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.ssh_destination(), config.ssh_connect_timeout_secs)
    }

    fn base_command(&self) -> Command {
        let mut cmd = Command::new("ssh");
        cmd.arg("-q")
            .arg("-o")
            .arg("LogLevel=ERROR")
            .arg("-o")
            .arg(format!("ConnectTimeout={}", self.connect_timeout_secs));
        cmd
    }
}

#[async_trait]
impl RemoteExecutor for SshExecutor {
    async fn execute(&self, script: &RemoteScript) -> Result<CommandOutput> {
        info!("{} on {}", script.description, self.destination);
        debug!("Remote script:\n{}", script.redacted());

        let mut cmd = self.base_command();
        cmd.arg(&self.destination).arg("bash").arg("-s");

        let label = format!("ssh {} bash -s", self.destination);
        command::run(cmd, &label, Some(script.render().as_bytes())).await
    }

    async fn check_connection(&self) -> Result<bool> {
        let mut cmd = self.base_command();
        cmd.arg("-o")
            .arg("BatchMode=yes")
            .arg(&self.destination)
            .arg("true");

        let label = format!("ssh -o BatchMode=yes {} true", self.destination);
        let output = command::run(cmd, &label, None).await?;
        Ok(output.success())
    }

    fn destination(&self) -> String {
        self.destination.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_aborts_on_first_failure() {
        let script = RemoteScript::new("demo").line("echo one").line("echo two");
        assert_eq!(script.render(), "set -euo pipefail\necho one\necho two\n");
    }

    #[test]
    fn test_redacted_masks_secrets() {
        let script = RemoteScript::new("set password")
            .line("printf '%s\\n' 'svc-billing:s3cr3t-value' | chpasswd")
            .secret("s3cr3t-value");

        let shown = script.redacted();
        assert!(!shown.contains("s3cr3t-value"));
        assert!(shown.contains("svc-billing:********"));
        assert!(script.render().contains("s3cr3t-value"));
    }

    #[test]
    fn test_ssh_executor_destination() {
        let executor = SshExecutor::new("root@203.0.113.10", 5);
        assert_eq!(executor.destination(), "root@203.0.113.10");
    }
}
