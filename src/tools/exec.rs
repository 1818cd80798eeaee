//! Shell command executor shared by the built-in and custom tools.

use std::path::PathBuf;
use std::process::Stdio;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, warn};

use super::ToolError;

/// Per-invocation context threaded outside the LLM arguments so the model
/// cannot inject a working directory or kubeconfig path.
#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    pub work_dir: Option<PathBuf>,
    pub kubeconfig: Option<String>,
}

/// Structured outcome of a shell command.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub stdout: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub stderr: String,
    #[serde(default)]
    pub exit_code: i32,
}

impl ExecResult {
    pub fn from_error(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Default::default()
        }
    }
}

/// True when the command line contains `-f` or `--follow` as a word,
/// e.g. `kubectl logs -f pod/a` or `tail --follow file`.
pub fn is_streaming_command(command: &str) -> bool {
    command
        .split_whitespace()
        .any(|word| word == "-f" || word == "--follow")
}

fn build_command(ctx: &ExecutionContext, command: &str) -> Command {
    let mut cmd = if cfg!(windows) {
        let shell = std::env::var("COMSPEC").unwrap_or_else(|_| "cmd".to_string());
        let mut cmd = Command::new(shell);
        cmd.arg("/c").arg(command);
        cmd
    } else {
        let mut cmd = Command::new("/bin/bash");
        cmd.arg("-c").arg(command);
        cmd
    };
    if let Some(dir) = &ctx.work_dir {
        cmd.current_dir(dir);
    }
    if let Some(kubeconfig) = &ctx.kubeconfig {
        let expanded = shellexpand::tilde(kubeconfig).into_owned();
        cmd.env("KUBECONFIG", expanded);
    }
    cmd
}

/// Run a shell command and capture the result.
///
/// Follow-style commands stream their output live and treat Ctrl-C as
/// "stop streaming, return to the agent" rather than aborting the whole
/// process.
pub async fn execute_shell(ctx: &ExecutionContext, command: &str) -> Result<ExecResult, ToolError> {
    if is_streaming_command(command) {
        execute_streaming(ctx, command).await
    } else {
        execute_captured(ctx, command).await
    }
}

async fn execute_captured(ctx: &ExecutionContext, command: &str) -> Result<ExecResult, ToolError> {
    debug!(command, "executing shell command");
    let output = build_command(ctx, command)
        .output()
        .await
        .map_err(|source| ToolError::Spawn { source })?;

    Ok(ExecResult {
        error: None,
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        exit_code: output.status.code().unwrap_or(-1),
    })
}

async fn execute_streaming(ctx: &ExecutionContext, command: &str) -> Result<ExecResult, ToolError> {
    println!("\nStreaming output... Press CTRL-C to stop streaming and return to the prompt.");
    debug!(command, "executing streaming shell command");

    let mut cmd = build_command(ctx, command);
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
    let mut child = cmd.spawn().map_err(|source| ToolError::Spawn { source })?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let stdout_task = tokio::spawn(async move {
        if let Some(stdout) = stdout {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                println!("{line}");
            }
        }
    });
    let stderr_task = tokio::spawn(async move {
        if let Some(stderr) = stderr {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                eprintln!("{line}");
            }
        }
    });

    let mut result = ExecResult::default();
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            if let Err(err) = child.kill().await {
                warn!(%err, "failed to stop streaming command");
            }
            result.error = Some("streaming interrupted by user".to_string());
        }
        status = child.wait() => {
            match status {
                Ok(status) => result.exit_code = status.code().unwrap_or(-1),
                Err(err) => result.error = Some(err.to_string()),
            }
        }
    }
    let _ = stdout_task.await;
    let _ = stderr_task.await;
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn follow_flags_are_detected_as_words() {
        assert!(is_streaming_command("kubectl logs -f pod/a"));
        assert!(is_streaming_command("tail --follow /var/log/syslog"));
        assert!(!is_streaming_command("kubectl get pods"));
        // Substrings are not words.
        assert!(!is_streaming_command("grep --file=x"));
        assert!(!is_streaming_command("echo -file"));
    }

    #[tokio::test]
    async fn captures_stdout_and_exit_code() {
        let ctx = ExecutionContext::default();
        let result = execute_shell(&ctx, "echo hello && exit 3").await.expect("runs");
        assert_eq!(result.stdout.trim(), "hello");
        assert_eq!(result.exit_code, 3);
        assert!(result.error.is_none());
    }

    #[tokio::test]
    async fn captures_stderr() {
        let ctx = ExecutionContext::default();
        let result = execute_shell(&ctx, "echo oops >&2").await.expect("runs");
        assert_eq!(result.stderr.trim(), "oops");
        assert_eq!(result.exit_code, 0);
    }

    #[tokio::test]
    async fn kubeconfig_is_exported_with_tilde_expanded() {
        let ctx = ExecutionContext {
            work_dir: None,
            kubeconfig: Some("~/custom/kubeconfig".to_string()),
        };
        let result = execute_shell(&ctx, "printf '%s' \"$KUBECONFIG\"").await.expect("runs");
        assert!(!result.stdout.contains('~'), "tilde left unexpanded: {}", result.stdout);
        assert!(result.stdout.ends_with("custom/kubeconfig"));
    }
}
