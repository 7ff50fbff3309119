//! Ask-user tool.
//!
//! This tool exists so the model can pose a question; answering it needs
//! an interaction surface the dispatcher does not have. The runtime
//! diverts `askuser-` prefixed calls to its interaction callback before
//! they reach the approval gate or dispatch. Executing the tool directly
//! (no surface configured) yields an error result the model can see.

use async_trait::async_trait;
use quill_core::tools::{ToolOutput, ToolParameterSchema, ToolSpec, error_output};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::errors::ToolError;
use crate::traits::{AgentTool, ToolContext, decode_args};

/// Name prefix that marks calls for interaction diversion.
pub const ASK_USER_PREFIX: &str = "askuser-";

/// Arguments the model supplies when asking a question.
#[derive(Clone, Debug, Deserialize)]
pub struct AskUserArgs {
    /// The question to put to the user.
    pub question: String,
    /// Optional fixed answer choices.
    #[serde(default)]
    pub options: Vec<String>,
}

/// Pose a question to the user.
pub struct AskUserTool;

#[async_trait]
impl AgentTool for AskUserTool {
    fn name(&self) -> &str {
        "askuser-question"
    }

    fn is_interactive(&self) -> bool {
        true
    }

    fn spec(&self) -> ToolSpec {
        let mut props = serde_json::Map::new();
        let _ = props.insert(
            "question".into(),
            json!({"type": "string", "description": "Question to ask the user"}),
        );
        let _ = props.insert(
            "options".into(),
            json!({
                "type": "array",
                "items": {"type": "string"},
                "description": "Optional fixed answer choices"
            }),
        );
        ToolSpec {
            name: self.name().into(),
            description: "Ask the user a question and wait for their answer".into(),
            parameters: ToolParameterSchema::object(props, vec!["question".into()]),
        }
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        // Validate so malformed questions still fail loudly.
        let _parsed: AskUserArgs = decode_args(self.name(), args)?;
        Ok(error_output(
            "no interactive surface is attached to this run; the question was not shown",
        ))
    }
}
