//! Normalized streaming events.
//!
//! Every provider's wire protocol is mapped into this single event model
//! by its adapter. Events are transient: produced by one stream, consumed
//! exactly once by the conversation engine, never persisted. Re-issuing a
//! logical request opens a fresh HTTP stream — streams are not restartable.

use serde::{Deserialize, Serialize};

use crate::messages::{TokenUsage, ToolCall};

/// An event in a normalized provider stream.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StreamEvent {
    /// Incremental assistant text.
    #[serde(rename = "content_delta")]
    ContentDelta {
        /// Text fragment.
        delta: String,
    },

    /// Fully assembled tool calls for this turn.
    ///
    /// Emitted once, after the provider's argument fragments have been
    /// merged, and before `Done`.
    #[serde(rename = "tool_calls")]
    ToolCalls {
        /// Tool calls in the order the provider emitted them.
        #[serde(rename = "toolCalls")]
        tool_calls: Vec<ToolCall>,
    },

    /// Token usage for the request.
    #[serde(rename = "usage")]
    Usage {
        /// Normalized usage counters.
        usage: TokenUsage,
    },

    /// Stream-level failure (non-2xx response or mid-stream transport
    /// error). The stream ends after this event.
    #[serde(rename = "error")]
    Error {
        /// Human-readable error description.
        error: String,
    },

    /// Stream completed.
    #[serde(rename = "done")]
    Done,
}

impl StreamEvent {
    /// Returns `true` for the terminal `Done` event.
    #[must_use]
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done)
    }

    /// Returns `true` for an `Error` event.
    #[must_use]
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
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
    fn content_delta_serde() {
        let e = StreamEvent::ContentDelta {
            delta: "hello".into(),
        };
        let json = serde_json::to_value(&e).unwrap();
        assert_eq!(json, json!({"type": "content_delta", "delta": "hello"}));
    }

    #[test]
    fn tool_calls_serde() {
        let e = StreamEvent::ToolCalls {
            tool_calls: vec![ToolCall::new("tc-1", "search-grep", "{}")],
        };
        let json = serde_json::to_value(&e).unwrap();
        assert_eq!(json["type"], "tool_calls");
        assert_eq!(json["toolCalls"][0]["name"], "search-grep");
    }

    #[test]
    fn usage_serde() {
        let e = StreamEvent::Usage {
            usage: TokenUsage {
                input_tokens: 10,
                output_tokens: 4,
                ..Default::default()
            },
        };
        let json = serde_json::to_value(&e).unwrap();
        assert_eq!(json["usage"]["inputTokens"], 10);
    }

    #[test]
    fn done_and_error_predicates() {
        assert!(StreamEvent::Done.is_done());
        assert!(!StreamEvent::Done.is_error());
        let err = StreamEvent::Error {
            error: "boom".into(),
        };
        assert!(err.is_error());
        assert!(!err.is_done());
    }

    #[test]
    fn all_variants_tagged() {
        let events = vec![
            StreamEvent::ContentDelta { delta: "d".into() },
            StreamEvent::ToolCalls { tool_calls: vec![] },
            StreamEvent::Usage {
                usage: TokenUsage::default(),
            },
            StreamEvent::Error { error: "e".into() },
            StreamEvent::Done,
        ];
        for event in &events {
            let json = serde_json::to_value(event).unwrap();
            assert!(json.get("type").is_some());
            let back: StreamEvent = serde_json::from_value(json).unwrap();
            assert_eq!(event, &back);
        }
        assert_eq!(events.len(), 5);
    }
}
