//! Thin wrapper around external CLI invocations

use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;
use vps_common::{Error, Result};

/// Captured result of one external command
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    /// Exit code, `None` when terminated by a signal
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Best single-line explanation of a failure
    pub fn failure_message(&self) -> String {
        let stderr = self.stderr.trim();
        let detail = if stderr.is_empty() {
            self.stdout.trim()
        } else {
            stderr
        };

        match (self.code, detail.is_empty()) {
            (Some(code), true) => format!("exit status {}", code),
            (Some(code), false) => format!("exit status {}: {}", code, detail),
            (None, _) => "terminated by signal".to_string(),
        }
    }
}

/// Render a program and its arguments for logs
pub fn describe(program: &str, args: &[&str]) -> String {
    std::iter::once(program)
        .chain(args.iter().copied())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Run a command to completion, optionally feeding `stdin`.
///
/// Spawn failures (program missing, permission denied) are errors; a non-zero
/// exit status is not, and is left for the caller to interpret.
pub async fn run(mut command: Command, label: &str, stdin: Option<&[u8]>) -> Result<CommandOutput> {
    debug!("Running: {}", label);

    command
        .stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = command.spawn().map_err(|e| Error::Command {
        command: label.to_string(),
        message: e.to_string(),
    })?;

    if let Some(input) = stdin {
        if let Some(mut pipe) = child.stdin.take() {
            pipe.write_all(input).await?;
            pipe.shutdown().await?;
        }
    }

    let output = child.wait_with_output().await?;

    let result = CommandOutput {
        code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    };

    debug!("Finished: {} ({:?})", label, result.code);
    Ok(result)
}

/// Run a command and require a zero exit status
pub async fn run_checked(command: Command, label: &str, stdin: Option<&[u8]>) -> Result<CommandOutput> {
    let output = run(command, label, stdin).await?;

    if !output.success() {
        return Err(Error::Command {
            command: label.to_string(),
            message: output.failure_message(),
        });
    }

    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_message_prefers_stderr() {
        let output = CommandOutput {
            code: Some(128),
            stdout: "ignored".into(),
            stderr: "fatal: not a git repository\n".into(),
        };

        assert!(!output.success());
        assert_eq!(
            output.failure_message(),
            "exit status 128: fatal: not a git repository"
        );
    }

    #[test]
    fn test_failure_message_without_output() {
        let output = CommandOutput {
            code: Some(1),
            ..Default::default()
        };
        assert_eq!(output.failure_message(), "exit status 1");

        let killed = CommandOutput::default();
        assert_eq!(killed.failure_message(), "terminated by signal");
    }

    #[test]
    fn test_describe() {
        assert_eq!(describe("git", &["status", "--porcelain"]), "git status --porcelain");
    }
}
