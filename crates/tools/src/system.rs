//! System command execution tool.

use async_trait::async_trait;
use ferrocode_core::error::ToolError;
use ferrocode_core::message::{ToolCall, ToolCallResult};
use ferrocode_core::tool::{Tool, ToolExecutor};
use serde::Deserialize;
use std::time::Duration;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const DEFAULT_TIMEOUT_MS: u64 = 120_000;
const MAX_TIMEOUT_MS: u64 = 600_000;
const OUTPUT_CAP_BYTES: usize = 30_000;

pub struct BashTool;

#[derive(Deserialize)]
struct BashParams {
    command: String,
    #[serde(default)]
    description: Option<String>,
    /// Timeout in milliseconds
    #[serde(default)]
    timeout: Option<u64>,
}

fn truncate_output(output: &str) -> String {
    if output.len() <= OUTPUT_CAP_BYTES {
        return output.to_string();
    }
    let mut cut = OUTPUT_CAP_BYTES;
    while !output.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}\n... (output truncated)", &output[..cut])
}

#[async_trait]
impl ToolExecutor for BashTool {
    fn name(&self) -> &str {
        "bash"
    }

    async fn execute(
        &self,
        cancel: CancellationToken,
        call: ToolCall,
    ) -> Result<ToolCallResult, ToolError> {
        let params: BashParams = parse_args(&call)?;

        if params.command.is_empty() {
            return Ok(ToolCallResult::failure("command is required"));
        }

        let timeout_ms = params
            .timeout
            .unwrap_or(DEFAULT_TIMEOUT_MS)
            .min(MAX_TIMEOUT_MS);

        debug!(command = %params.command, timeout_ms, "Executing shell command");

        let mut cmd = if cfg!(target_os = "windows") {
            let mut c = Command::new("cmd");
            c.args(["/C", &params.command]);
            c
        } else {
            let mut c = Command::new("sh");
            c.args(["-c", &params.command]);
            c
        };
        // Dropping the output future on timeout/cancel must not leave the
        // child running.
        cmd.kill_on_drop(true);

        let start = std::time::Instant::now();
        let outcome = tokio::select! {
            output = cmd.output() => CommandOutcome::Finished(output),
            () = tokio::time::sleep(Duration::from_millis(timeout_ms)) => CommandOutcome::TimedOut,
            () = cancel.cancelled() => CommandOutcome::Cancelled,
        };
        let duration = start.elapsed();

        let mut report = String::new();
        if let Some(description) = &params.description {
            report.push_str(&format!("Description: {description}\n"));
        }
        report.push_str(&format!("Command: {}\n", params.command));
        report.push_str(&format!("Duration: {}ms\n", duration.as_millis()));

        match outcome {
            CommandOutcome::TimedOut => {
                warn!(command = %params.command, timeout_ms, "Command timed out");
                report.push_str("Status: TIMEOUT\n");
                report.push_str(&format!("Error: Command timed out after {timeout_ms} ms\n"));
                Ok(ToolCallResult::failure(report))
            }
            CommandOutcome::Cancelled => Err(ToolError::Cancelled),
            CommandOutcome::Finished(Err(e)) => Err(ToolError::ExecutionFailed {
                tool_name: "bash".into(),
                reason: e.to_string(),
            }),
            CommandOutcome::Finished(Ok(output)) => {
                let success = output.status.success();
                let exit_code = output.status.code().unwrap_or(-1);

                if success {
                    report.push_str("Status: SUCCESS\n");
                } else {
                    warn!(command = %params.command, exit_code, "Command failed");
                    report.push_str("Status: FAILED\n");
                }
                report.push_str(&format!("Exit Code: {exit_code}\n"));

                let stdout = String::from_utf8_lossy(&output.stdout);
                let stderr = String::from_utf8_lossy(&output.stderr);
                if !stdout.is_empty() {
                    report.push_str(&format!("\nStdout:\n{}\n", truncate_output(&stdout)));
                }
                if !stderr.is_empty() {
                    report.push_str(&format!("\nStderr:\n{}\n", truncate_output(&stderr)));
                }

                Ok(ToolCallResult {
                    content: report,
                    success,
                    error: String::new(),
                    timestamp: chrono::Utc::now(),
                })
            }
        }
    }

    fn definition(&self) -> Tool {
        Tool::function(
            "bash",
            "Execute a shell command with timeout and output capture. Stdout and stderr are \
             each truncated to 30000 bytes.",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "command": {
                        "type": "string",
                        "description": "The shell command to execute"
                    },
                    "description": {
                        "type": "string",
                        "description": "Optional description of what the command does (5-10 words)"
                    },
                    "timeout": {
                        "type": "integer",
                        "description": "Timeout in milliseconds (default: 120000, max: 600000)"
                    }
                },
                "required": ["command"]
            }),
        )
    }

    fn concurrency_safe(&self) -> bool {
        false // commands may have side effects
    }
}

enum CommandOutcome {
    Finished(std::io::Result<std::process::Output>),
    TimedOut,
    Cancelled,
}

fn parse_args<T: for<'de> serde::Deserialize<'de>>(call: &ToolCall) -> Result<T, ToolError> {
    serde_json::from_str(&call.function.arguments)
        .map_err(|e| ToolError::InvalidArguments(format!("failed to parse arguments: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call_with(args: serde_json::Value) -> ToolCall {
        ToolCall::function("c1", "bash", args.to_string())
    }

    #[tokio::test]
    async fn echo_succeeds() {
        let result = BashTool
            .execute(
                CancellationToken::new(),
                call_with(serde_json::json!({"command": "echo hello"})),
            )
            .await
            .unwrap();
        assert!(result.success);
        assert!(result.content.contains("Status: SUCCESS"));
        assert!(result.content.contains("Exit Code: 0"));
        assert!(result.content.contains("hello"));
    }

    #[tokio::test]
    async fn failing_command_reports_exit_code() {
        let result = BashTool
            .execute(
                CancellationToken::new(),
                call_with(serde_json::json!({"command": "exit 3"})),
            )
            .await
            .unwrap();
        assert!(!result.success);
        assert!(result.content.contains("Status: FAILED"));
        assert!(result.content.contains("Exit Code: 3"));
    }

    #[tokio::test]
    async fn stderr_is_captured() {
        let result = BashTool
            .execute(
                CancellationToken::new(),
                call_with(serde_json::json!({"command": "echo oops >&2"})),
            )
            .await
            .unwrap();
        assert!(result.content.contains("Stderr:"));
        assert!(result.content.contains("oops"));
    }

    #[tokio::test]
    async fn timeout_kills_command() {
        let start = std::time::Instant::now();
        let result = BashTool
            .execute(
                CancellationToken::new(),
                call_with(serde_json::json!({"command": "sleep 30", "timeout": 100})),
            )
            .await
            .unwrap();
        assert!(start.elapsed() < Duration::from_secs(5));
        assert!(!result.success);
        assert!(result.content.contains("Status: TIMEOUT"));
    }

    #[tokio::test]
    async fn cancellation_stops_command() {
        let cancel = CancellationToken::new();
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let start = std::time::Instant::now();
        let result = BashTool
            .execute(cancel, call_with(serde_json::json!({"command": "sleep 30"})))
            .await;
        assert!(start.elapsed() < Duration::from_secs(5));
        assert!(matches!(result, Err(ToolError::Cancelled)));
    }

    #[tokio::test]
    async fn empty_command_rejected() {
        let result = BashTool
            .execute(
                CancellationToken::new(),
                call_with(serde_json::json!({"command": ""})),
            )
            .await
            .unwrap();
        assert!(!result.success);
    }

    #[tokio::test]
    async fn description_included_in_report() {
        let result = BashTool
            .execute(
                CancellationToken::new(),
                call_with(serde_json::json!({
                    "command": "true",
                    "description": "no-op check"
                })),
            )
            .await
            .unwrap();
        assert!(result.content.contains("Description: no-op check"));
    }

    #[test]
    fn truncation_caps_long_output() {
        let long = "x".repeat(OUTPUT_CAP_BYTES + 500);
        let truncated = truncate_output(&long);
        assert!(truncated.len() < long.len());
        assert!(truncated.ends_with("(output truncated)"));

        let short = "short";
        assert_eq!(truncate_output(short), "short");
    }
}
