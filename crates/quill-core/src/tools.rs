//! Tool definition and result types.
//!
//! `ToolSpec` is the schema sent to the model; `ToolOutput` is what a tool
//! execution returns before it is serialized into a `tool` role message.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ─────────────────────────────────────────────────────────────────────────────
// Tool schema
// ─────────────────────────────────────────────────────────────────────────────

/// JSON Schema-compatible parameter definition for a tool.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolParameterSchema {
    /// Top-level JSON Schema type (always `"object"` in practice).
    #[serde(rename = "type")]
    pub schema_type: String,
    /// Property definitions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub properties: Option<serde_json::Map<String, Value>>,
    /// Required property names.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub required: Option<Vec<String>>,
}

impl ToolParameterSchema {
    /// An `object` schema with the given properties and required names.
    #[must_use]
    pub fn object(
        properties: serde_json::Map<String, Value>,
        required: Vec<String>,
    ) -> Self {
        Self {
            schema_type: "object".into(),
            properties: Some(properties),
            required: if required.is_empty() {
                None
            } else {
                Some(required)
            },
        }
    }

    /// An empty `object` schema (no parameters).
    #[must_use]
    pub fn empty() -> Self {
        Self {
            schema_type: "object".into(),
            properties: None,
            required: None,
        }
    }
}

/// A tool definition sent to the model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    /// Tool name (unique identifier).
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// JSON Schema for the tool's parameters.
    pub parameters: ToolParameterSchema,
}

// ─────────────────────────────────────────────────────────────────────────────
// Tool output
// ─────────────────────────────────────────────────────────────────────────────

/// Result of a tool execution.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolOutput {
    /// The tool's textual output (or error text).
    pub content: String,
    /// Optional structured details — tool-specific metadata, image blocks.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    /// Whether the execution resulted in an error.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
}

impl ToolOutput {
    /// Whether this output represents an error.
    #[must_use]
    pub fn errored(&self) -> bool {
        self.is_error.unwrap_or(false)
    }

    /// Serialize content plus details into the text appended as the tool
    /// message body.
    #[must_use]
    pub fn to_message_content(&self) -> String {
        match &self.details {
            Some(details) => format!("{}\n{details}", self.content),
            None => self.content.clone(),
        }
    }
}

/// Create a successful text output.
#[must_use]
pub fn text_output(text: impl Into<String>) -> ToolOutput {
    ToolOutput {
        content: text.into(),
        details: None,
        is_error: None,
    }
}

/// Create an error output.
#[must_use]
pub fn error_output(message: impl Into<String>) -> ToolOutput {
    ToolOutput {
        content: message.into(),
        details: None,
        is_error: Some(true),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tool_spec_serde_roundtrip() {
        let mut props = serde_json::Map::new();
        let _ = props.insert(
            "path".into(),
            json!({"type": "string", "description": "File path"}),
        );
        let spec = ToolSpec {
            name: "filesystem-read".into(),
            description: "Read a file".into(),
            parameters: ToolParameterSchema::object(props, vec!["path".into()]),
        };
        let json = serde_json::to_value(&spec).unwrap();
        assert_eq!(json["parameters"]["type"], "object");
        assert_eq!(json["parameters"]["required"][0], "path");
        let back: ToolSpec = serde_json::from_value(json).unwrap();
        assert_eq!(spec, back);
    }

    #[test]
    fn empty_schema_has_no_properties() {
        let schema = ToolParameterSchema::empty();
        let json = serde_json::to_value(&schema).unwrap();
        assert!(json.get("properties").is_none());
        assert!(json.get("required").is_none());
    }

    #[test]
    fn object_schema_omits_empty_required() {
        let schema = ToolParameterSchema::object(serde_json::Map::new(), vec![]);
        assert!(schema.required.is_none());
    }

    #[test]
    fn text_output_success() {
        let out = text_output("done");
        assert!(!out.errored());
        assert_eq!(out.to_message_content(), "done");
    }

    #[test]
    fn error_output_sets_flag() {
        let out = error_output("failed");
        assert!(out.errored());
    }

    #[test]
    fn message_content_includes_details() {
        let out = ToolOutput {
            content: "3 matches".into(),
            details: Some(json!({"files": ["a.rs"]})),
            is_error: None,
        };
        let text = out.to_message_content();
        assert!(text.starts_with("3 matches\n"));
        assert!(text.contains("a.rs"));
    }

    #[test]
    fn tool_output_serde_skips_none() {
        let out = text_output("ok");
        let json = serde_json::to_value(&out).unwrap();
        assert!(json.get("isError").is_none());
        assert!(json.get("details").is_none());
    }
}
