//! One-shot command execution shared by the tools.

use operative_core::error::ToolError;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

/// Longest output handed back to the model.
pub const MAX_RESPONSE_LEN: usize = 16_000;

const TRUNCATED_MESSAGE: &str = "<response clipped><NOTE>To save on context only part of this file has been shown to you. You should retry this tool after you have searched inside the file with `grep -n` in order to find the line numbers of what you are looking for.</NOTE>";

/// Captured result of a finished command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == 0
    }
}

/// Clip `text` to [`MAX_RESPONSE_LEN`] characters, appending a notice.
pub fn truncate(text: &str) -> String {
    match text.char_indices().nth(MAX_RESPONSE_LEN) {
        Some((cut, _)) => format!("{}{TRUNCATED_MESSAGE}", &text[..cut]),
        None => text.to_string(),
    }
}

/// Run `command` through `sh -c` and wait at most `timeout`.
pub async fn run(
    tool_name: &str,
    command: &str,
    timeout: Duration,
) -> Result<CommandOutput, ToolError> {
    debug!(tool = tool_name, command = %command, "Executing command");

    let child = Command::new("sh")
        .args(["-c", command])
        .kill_on_drop(true)
        .output();

    let output = match tokio::time::timeout(timeout, child).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            return Err(ToolError::ExecutionFailed {
                tool_name: tool_name.into(),
                reason: e.to_string(),
            });
        }
        Err(_) => {
            warn!(tool = tool_name, command = %command, "Command timed out");
            return Err(ToolError::Timeout {
                tool_name: tool_name.into(),
                timeout_secs: timeout.as_secs(),
            });
        }
    };

    let code = output.status.code().unwrap_or(-1);
    if code != 0 {
        debug!(tool = tool_name, exit_code = code, "Command exited non-zero");
    }

    Ok(CommandOutput {
        code,
        stdout: truncate(&String::from_utf8_lossy(&output.stdout)),
        stderr: truncate(&String::from_utf8_lossy(&output.stderr)),
    })
}

/// Quote `s` for a POSIX shell.
pub fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn captures_both_streams() {
        let out = run("test", "echo hello; echo oops >&2; exit 3", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(out.code, 3);
        assert!(!out.success());
        assert_eq!(out.stdout.trim(), "hello");
        assert_eq!(out.stderr.trim(), "oops");
    }

    #[tokio::test]
    async fn times_out() {
        let err = run("test", "sleep 5", Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Timeout { .. }));
    }

    #[test]
    fn truncates_long_output() {
        let long = "x".repeat(MAX_RESPONSE_LEN + 10);
        let clipped = truncate(&long);
        assert!(clipped.starts_with(&"x".repeat(MAX_RESPONSE_LEN)));
        assert!(clipped.ends_with("</NOTE>"));
        assert_eq!(truncate("short"), "short");
    }

    #[tokio::test]
    async fn quoting_survives_the_shell() {
        let text = "it's a \"test\" $HOME";
        let out = run(
            "test",
            &format!("printf %s {}", shell_quote(text)),
            Duration::from_secs(5),
        )
        .await
        .unwrap();
        assert_eq!(out.stdout, text);
    }
}
