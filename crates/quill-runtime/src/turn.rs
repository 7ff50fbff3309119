//! Turn collection — fold one normalized event stream into a turn result.
//!
//! The stream is consumed exactly once. Content deltas accumulate into the
//! assistant text; the tool-calls event (at most one per stream) lands as
//! the pending batch; usage is captured for accumulation by the engine.

use futures::StreamExt;
use quill_core::events::StreamEvent;
use quill_core::messages::{TokenUsage, ToolCall};
use quill_llm::provider::EventStream;

use crate::errors::EngineError;

/// What one request/stream cycle produced.
#[derive(Clone, Debug, Default)]
pub struct TurnOutput {
    /// Accumulated assistant text (may be empty alongside tool calls).
    pub content: String,
    /// Pending tool calls, in emitted order.
    pub tool_calls: Vec<ToolCall>,
    /// Usage reported for this request.
    pub usage: Option<TokenUsage>,
}

/// Consume a stream to completion.
///
/// An `Error` event or an `Err` item fails the turn; a stream that ends
/// without `Done` is treated the same way.
pub async fn collect_turn(mut stream: EventStream) -> Result<TurnOutput, EngineError> {
    let mut output = TurnOutput::default();
    let mut done = false;

    while let Some(item) = stream.next().await {
        match item? {
            StreamEvent::ContentDelta { delta } => output.content.push_str(&delta),
            StreamEvent::ToolCalls { tool_calls } => output.tool_calls = tool_calls,
            StreamEvent::Usage { usage } => output.usage = Some(usage),
            StreamEvent::Error { error } => return Err(EngineError::Stream(error)),
            StreamEvent::Done => {
                done = true;
                break;
            }
        }
    }

    if !done {
        return Err(EngineError::Stream(
            "stream ended without a done event".into(),
        ));
    }
    Ok(output)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
