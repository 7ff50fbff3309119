//! The tool trait and per-call context.

use async_trait::async_trait;
use quill_core::tools::{ToolOutput, ToolSpec};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::errors::ToolError;

/// Execution context passed to every tool invocation.
#[derive(Clone, Debug)]
pub struct ToolContext {
    /// Unique ID of this tool call.
    pub tool_call_id: String,
    /// ID of the run invoking this tool.
    pub run_id: String,
    /// Working directory for path resolution.
    pub working_directory: String,
    /// Cooperative cancellation token. Checked before starting work;
    /// in-flight writes are allowed to finish.
    pub cancellation: CancellationToken,
}

impl ToolContext {
    /// A context rooted at the given working directory.
    #[must_use]
    pub fn new(
        tool_call_id: impl Into<String>,
        run_id: impl Into<String>,
        working_directory: impl Into<String>,
    ) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            run_id: run_id.into(),
            working_directory: working_directory.into(),
            cancellation: CancellationToken::new(),
        }
    }
}

/// The trait every tool implements.
///
/// Tools receive their arguments as a raw [`Value`] and decode them against
/// their own schema — decode failures surface as
/// [`ToolError::InvalidArguments`], never as engine crashes. Each tool must
/// be idempotent-safe to call once per approved invocation; the runtime
/// never auto-retries a tool.
#[async_trait]
pub trait AgentTool: Send + Sync {
    /// Tool name — the exact string sent to and received from the model.
    fn name(&self) -> &str;

    /// Whether this tool needs a human on the other end.
    fn is_interactive(&self) -> bool {
        false
    }

    /// Schema sent to the model.
    fn spec(&self) -> ToolSpec;

    /// Execute with decoded-on-demand JSON arguments.
    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutput, ToolError>;
}

/// Decode a tool's argument value into its parameter struct.
pub fn decode_args<T: serde::de::DeserializeOwned>(tool: &str, args: Value) -> Result<T, ToolError> {
    serde_json::from_value(args).map_err(|e| ToolError::invalid_arguments(tool, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Deserialize, Debug)]
    struct Params {
        path: String,
    }

    #[test]
    fn decode_args_ok() {
        let params: Params =
            decode_args("filesystem-read", serde_json::json!({"path": "a.rs"})).unwrap();
        assert_eq!(params.path, "a.rs");
    }

    #[test]
    fn decode_args_missing_field() {
        let err = decode_args::<Params>("filesystem-read", serde_json::json!({})).unwrap_err();
        assert!(err.to_string().contains("filesystem-read"));
    }

    #[test]
    fn context_new_defaults() {
        let ctx = ToolContext::new("tc-1", "run-1", "/tmp");
        assert_eq!(ctx.tool_call_id, "tc-1");
        assert!(!ctx.cancellation.is_cancelled());
    }
}
