//! Shell command tool.
//!
//! Runs a command under `sh -c` with a timeout, capturing stdout and
//! stderr. Output is capped and truncated from the middle so the head
//! (first output) and tail (final status) both survive. Cancellation is
//! cooperative: a command that already started is allowed to finish.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use quill_core::text::truncate_middle;
use quill_core::tools::{ToolOutput, ToolParameterSchema, ToolSpec};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::process::Command;
use tracing::debug;

use crate::errors::ToolError;
use crate::traits::{AgentTool, ToolContext, decode_args};

/// Default command timeout.
const DEFAULT_TIMEOUT_MS: u64 = 120_000;

/// Captured-output cap in characters.
const MAX_OUTPUT_CHARS: usize = 30_000;

/// Marker inserted where capped output was removed.
const TRUNCATION_MARKER: &str = "[... output truncated ...]";

/// Execute a shell command in the workspace.
pub struct TerminalTool;

#[derive(Deserialize)]
struct TerminalParams {
    command: String,
    #[serde(default)]
    timeout_ms: Option<u64>,
}

#[async_trait]
impl AgentTool for TerminalTool {
    fn name(&self) -> &str {
        "terminal-execute"
    }

    fn spec(&self) -> ToolSpec {
        let mut props = serde_json::Map::new();
        let _ = props.insert(
            "command".into(),
            json!({"type": "string", "description": "Shell command to run"}),
        );
        let _ = props.insert(
            "timeout_ms".into(),
            json!({"type": "integer", "description": "Timeout in milliseconds (default 120000)"}),
        );
        ToolSpec {
            name: self.name().into(),
            description: "Run a shell command in the workspace and capture its output".into(),
            parameters: ToolParameterSchema::object(props, vec!["command".into()]),
        }
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        let params: TerminalParams = decode_args(self.name(), args)?;
        if ctx.cancellation.is_cancelled() {
            return Err(ToolError::Cancelled);
        }

        let timeout = Duration::from_millis(params.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS));
        debug!(command = %params.command, ?timeout, "running shell command");

        let child = Command::new("sh")
            .arg("-c")
            .arg(&params.command)
            .current_dir(&ctx.working_directory)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(result) => result?,
            Err(_) => {
                return Ok(ToolOutput {
                    content: format!(
                        "command timed out after {}ms: {}",
                        timeout.as_millis(),
                        params.command
                    ),
                    details: None,
                    is_error: Some(true),
                });
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let exit_code = output.status.code().unwrap_or(-1);

        let mut combined = String::new();
        if !stdout.is_empty() {
            combined.push_str(&stdout);
        }
        if !stderr.is_empty() {
            if !combined.is_empty() {
                combined.push('\n');
            }
            combined.push_str("stderr:\n");
            combined.push_str(&stderr);
        }
        if combined.is_empty() {
            combined.push_str("(no output)");
        }
        let capped = truncate_middle(&combined, MAX_OUTPUT_CHARS, TRUNCATION_MARKER);

        Ok(ToolOutput {
            content: capped,
            details: Some(json!({"exitCode": exit_code})),
            is_error: if output.status.success() {
                None
            } else {
                Some(true)
            },
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
