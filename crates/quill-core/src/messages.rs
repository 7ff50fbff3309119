//! Message types for the Quill conversation model.
//!
//! Messages form the conversation history passed to LLM providers. Four
//! roles: system, user, assistant, and tool result. History is append-only;
//! a message is never mutated after it is appended (the engine owns content
//! accumulation during streaming, before the append).

use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────────────────────────
// Tool call
// ─────────────────────────────────────────────────────────────────────────────

/// A tool call emitted by the assistant.
///
/// `arguments` stays opaque JSON text until the dispatch boundary — it is
/// decoded against the tool's declared schema there, never earlier.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique tool call ID (provider-assigned, or synthesized when absent).
    pub id: String,
    /// Tool name.
    pub name: String,
    /// Raw JSON argument text.
    pub arguments: String,
}

impl ToolCall {
    /// Create a tool call.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Token usage
// ─────────────────────────────────────────────────────────────────────────────

/// Token usage reported by a provider.
///
/// Accumulated additively across every round of a run — never reset mid-run.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    /// Input tokens consumed.
    pub input_tokens: u64,
    /// Output tokens generated.
    pub output_tokens: u64,
    /// Tokens written to the provider prompt cache.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_creation_tokens: Option<u64>,
    /// Tokens read from the provider prompt cache.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_read_tokens: Option<u64>,
}

impl TokenUsage {
    /// Accumulate another usage report into this one.
    pub fn add(&mut self, other: &TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        if let Some(cc) = other.cache_creation_tokens {
            self.cache_creation_tokens = Some(self.cache_creation_tokens.unwrap_or(0) + cc);
        }
        if let Some(cr) = other.cache_read_tokens {
            self.cache_read_tokens = Some(self.cache_read_tokens.unwrap_or(0) + cr);
        }
    }

    /// Total tokens across input and output.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Message
// ─────────────────────────────────────────────────────────────────────────────

/// A conversation message (discriminated by `role`).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role")]
pub enum Message {
    /// System prompt.
    #[serde(rename = "system")]
    System {
        /// Prompt text.
        content: String,
    },
    /// User message.
    #[serde(rename = "user")]
    User {
        /// Message text.
        content: String,
    },
    /// Assistant message. `tool_calls` is non-empty only when the model
    /// requested tool invocations this turn.
    #[serde(rename = "assistant")]
    Assistant {
        /// Message text (may be empty alongside tool calls).
        content: String,
        /// Tool calls requested by the model.
        #[serde(rename = "toolCalls", default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ToolCall>,
        /// Token usage for the turn that produced this message.
        #[serde(skip_serializing_if = "Option::is_none")]
        usage: Option<TokenUsage>,
    },
    /// Tool result message. `tool_call_id` must reference a `ToolCall::id`
    /// from an earlier assistant message whose calls are still open.
    #[serde(rename = "tool")]
    Tool {
        /// ID of the tool call this result resolves.
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        /// Serialized result (or error text).
        content: String,
        /// Whether the execution errored.
        #[serde(rename = "isError", skip_serializing_if = "Option::is_none")]
        is_error: Option<bool>,
    },
}

impl Message {
    /// Create a system message.
    #[must_use]
    pub fn system(text: impl Into<String>) -> Self {
        Self::System {
            content: text.into(),
        }
    }

    /// Create a user message.
    #[must_use]
    pub fn user(text: impl Into<String>) -> Self {
        Self::User {
            content: text.into(),
        }
    }

    /// Create a plain assistant message (no tool calls).
    #[must_use]
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::Assistant {
            content: text.into(),
            tool_calls: Vec::new(),
            usage: None,
        }
    }

    /// Create a tool result message.
    #[must_use]
    pub fn tool_result(
        tool_call_id: impl Into<String>,
        content: impl Into<String>,
        is_error: bool,
    ) -> Self {
        Self::Tool {
            tool_call_id: tool_call_id.into(),
            content: content.into(),
            is_error: if is_error { Some(true) } else { None },
        }
    }

    /// Returns `true` if this is a user message.
    #[must_use]
    pub fn is_user(&self) -> bool {
        matches!(self, Self::User { .. })
    }

    /// Returns `true` if this is an assistant message.
    #[must_use]
    pub fn is_assistant(&self) -> bool {
        matches!(self, Self::Assistant { .. })
    }

    /// Returns `true` if this is a tool result message.
    #[must_use]
    pub fn is_tool_result(&self) -> bool {
        matches!(self, Self::Tool { .. })
    }

    /// Tool calls carried by this message (empty for non-assistant roles).
    #[must_use]
    pub fn tool_calls(&self) -> &[ToolCall] {
        match self {
            Self::Assistant { tool_calls, .. } => tool_calls,
            _ => &[],
        }
    }

    /// Text content of this message.
    #[must_use]
    pub fn content(&self) -> &str {
        match self {
            Self::System { content }
            | Self::User { content }
            | Self::Assistant { content, .. }
            | Self::Tool { content, .. } => content,
        }
    }
}

/// Returns `true` when `messages[index]` is an assistant message carrying
/// tool calls that are not all resolved by `tool` messages before `end`.
///
/// Used by the compressor's split-point search: cutting between such an
/// assistant message and its results would desynchronize provider-side
/// tool-call bookkeeping.
#[must_use]
pub fn has_unresolved_tool_calls(messages: &[Message], index: usize, end: usize) -> bool {
    let Some(Message::Assistant { tool_calls, .. }) = messages.get(index) else {
        return false;
    };
    if tool_calls.is_empty() {
        return false;
    }
    let resolved: Vec<&str> = messages[index + 1..end.min(messages.len())]
        .iter()
        .filter_map(|m| match m {
            Message::Tool { tool_call_id, .. } => Some(tool_call_id.as_str()),
            _ => None,
        })
        .collect();
    tool_calls.iter().any(|tc| !resolved.contains(&tc.id.as_str()))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
