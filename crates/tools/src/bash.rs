//! Bash tool: a persistent shell session the model types commands into.
//!
//! State (working directory, exported variables, background jobs) survives
//! between calls. A timed-out session is unusable until `restart: true`.

use async_trait::async_trait;
use operative_core::error::ToolError;
use operative_core::tool::{Tool, ToolResult};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::process::truncate;

const SENTINEL: &str = "<<operative-exit>>";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

struct BashSession {
    child: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
    stderr: Lines<BufReader<ChildStderr>>,
    timed_out: bool,
}

impl BashSession {
    fn start() -> Result<Self, ToolError> {
        let failed = |reason: String| ToolError::ExecutionFailed {
            tool_name: "bash".into(),
            reason,
        };

        let mut child = Command::new("/bin/bash")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| failed(format!("failed to start bash: {e}")))?;

        let stdin = child.stdin.take().ok_or_else(|| failed("no stdin".into()))?;
        let stdout = child.stdout.take().ok_or_else(|| failed("no stdout".into()))?;
        let stderr = child.stderr.take().ok_or_else(|| failed("no stderr".into()))?;

        debug!(pid = child.id(), "Started bash session");
        Ok(Self {
            child,
            stdin,
            stdout: BufReader::new(stdout).lines(),
            stderr: BufReader::new(stderr).lines(),
            timed_out: false,
        })
    }

    /// Send one command and collect its output up to the sentinel.
    async fn run(&mut self, command: &str, timeout: Duration) -> Result<ToolResult, ToolError> {
        if self.timed_out {
            return Ok(ToolResult::error(format!(
                "timed out: bash has not returned in {} seconds and must be restarted",
                timeout.as_secs()
            )));
        }
        if let Ok(Some(status)) = self.child.try_wait() {
            return Ok(ToolResult::error(format!(
                "bash has exited with {status} and must be restarted"
            ))
            .with_system("tool must be restarted"));
        }

        let script = format!("{command}\necho '{SENTINEL}'\necho '{SENTINEL}' >&2\n");
        let write = async {
            self.stdin.write_all(script.as_bytes()).await?;
            self.stdin.flush().await
        };
        write.await.map_err(|e| ToolError::ExecutionFailed {
            tool_name: "bash".into(),
            reason: e.to_string(),
        })?;

        let collect = async {
            tokio::join!(
                read_until_sentinel(&mut self.stdout),
                read_until_sentinel(&mut self.stderr)
            )
        };

        match tokio::time::timeout(timeout, collect).await {
            Ok((stdout, stderr)) => {
                let stdout = stdout.map_err(io_failure)?;
                let stderr = stderr.map_err(io_failure)?;
                let stdout = truncate(stdout.trim_end_matches('\n'));
                let stderr = truncate(stderr.trim_end_matches('\n'));
                Ok(ToolResult {
                    output: (!stdout.is_empty()).then_some(stdout),
                    error: (!stderr.is_empty()).then_some(stderr),
                    ..ToolResult::default()
                })
            }
            Err(_) => {
                warn!(command = %command, "bash command timed out");
                self.timed_out = true;
                Ok(ToolResult::error(format!(
                    "timed out: bash has not returned in {} seconds and must be restarted",
                    timeout.as_secs()
                )))
            }
        }
    }
}

fn io_failure(e: std::io::Error) -> ToolError {
    ToolError::ExecutionFailed {
        tool_name: "bash".into(),
        reason: e.to_string(),
    }
}

async fn read_until_sentinel<R>(lines: &mut Lines<R>) -> std::io::Result<String>
where
    R: tokio::io::AsyncBufRead + Unpin,
{
    let mut out = String::new();
    while let Some(line) = lines.next_line().await? {
        // Output without a final newline runs into the sentinel.
        if let Some(rest) = line.strip_suffix(SENTINEL) {
            out.push_str(rest);
            return Ok(out);
        }
        out.push_str(&line);
        out.push('\n');
    }
    Err(std::io::Error::new(
        std::io::ErrorKind::UnexpectedEof,
        "bash session closed",
    ))
}

/// Runs commands in a shared bash session.
#[derive(Clone)]
pub struct BashTool {
    api_type: &'static str,
    session: Arc<Mutex<Option<BashSession>>>,
    timeout: Duration,
}

/// A session slot shared by every `BashTool` built from it.
#[derive(Clone, Default)]
pub struct SharedSession(Arc<Mutex<Option<BashSession>>>);

impl SharedSession {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BashTool {
    pub fn new(api_type: &'static str, session: SharedSession) -> Self {
        Self {
            api_type,
            session: session.0,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl Tool for BashTool {
    fn name(&self) -> &str {
        "bash"
    }

    fn api_type(&self) -> &str {
        self.api_type
    }

    async fn run(&self, input: serde_json::Value) -> Result<ToolResult, ToolError> {
        let mut slot = self.session.lock().await;

        if input["restart"].as_bool() == Some(true) {
            if let Some(mut old) = slot.take() {
                let _ = old.child.kill().await;
            }
            *slot = Some(BashSession::start()?);
            info!("bash session restarted");
            return Ok(ToolResult::default().with_system("tool has been restarted."));
        }

        let Some(command) = input["command"].as_str() else {
            return Ok(ToolResult::error("no command provided."));
        };

        let session = match slot.as_mut() {
            Some(session) => session,
            None => slot.insert(BashSession::start()?),
        };
        session.run(command, self.timeout).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tool() -> BashTool {
        BashTool::new("bash_20250124", SharedSession::new())
    }

    #[tokio::test]
    async fn runs_commands_and_separates_streams() {
        let bash = tool();
        let result = bash
            .run(json!({"command": "echo out; echo err >&2"}))
            .await
            .unwrap();
        assert_eq!(result.output.as_deref(), Some("out"));
        assert_eq!(result.error.as_deref(), Some("err"));
    }

    #[tokio::test]
    async fn state_persists_between_calls() {
        let bash = tool();
        bash.run(json!({"command": "export GREETING=persisted"}))
            .await
            .unwrap();
        let result = bash
            .run(json!({"command": "echo $GREETING"}))
            .await
            .unwrap();
        assert_eq!(result.output.as_deref(), Some("persisted"));
    }

    #[tokio::test]
    async fn sessions_are_shared_between_clones() {
        let session = SharedSession::new();
        let first = BashTool::new("bash_20241022", session.clone());
        let second = BashTool::new("bash_20250124", session);
        first.run(json!({"command": "cd /tmp"})).await.unwrap();
        let result = second.run(json!({"command": "pwd"})).await.unwrap();
        assert_eq!(result.output.as_deref(), Some("/tmp"));
    }

    #[tokio::test]
    async fn timeout_requires_restart() {
        let bash = tool().with_timeout(Duration::from_millis(100));
        let result = bash.run(json!({"command": "sleep 5"})).await.unwrap();
        assert!(result.error.unwrap().starts_with("timed out"));

        let again = bash.run(json!({"command": "echo hi"})).await.unwrap();
        assert!(again.is_error());

        let restarted = bash.run(json!({"restart": true})).await.unwrap();
        assert_eq!(restarted.system.as_deref(), Some("tool has been restarted."));
        let result = bash.run(json!({"command": "echo hi"})).await.unwrap();
        assert_eq!(result.output.as_deref(), Some("hi"));
    }

    #[tokio::test]
    async fn missing_command_is_an_error_result() {
        let result = tool().run(json!({})).await.unwrap();
        assert_eq!(result.error.as_deref(), Some("no command provided."));
    }

    #[tokio::test]
    async fn output_without_trailing_newline_returns() {
        let bash = tool().with_timeout(Duration::from_secs(5));
        let result = bash.run(json!({"command": "printf hello"})).await.unwrap();
        assert_eq!(result.output.as_deref(), Some("hello"));
        assert!(result.error.is_none());

        let result = bash
            .run(json!({"command": "printf oops >&2; echo after"}))
            .await
            .unwrap();
        assert_eq!(result.output.as_deref(), Some("after"));
        assert_eq!(result.error.as_deref(), Some("oops"));
    }
}
