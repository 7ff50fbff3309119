//! Split-point search.
//!
//! A naive midpoint cut can orphan a `tool` result whose originating
//! assistant `tool_calls` lands in the compressed half, which
//! desynchronizes provider-side tool-call bookkeeping. The search only
//! accepts an index whose message is a `user` turn and whose predecessor
//! is not an assistant message with calls still unresolved before the cut.

use quill_core::messages::{Message, has_unresolved_tool_calls};

/// Find a structurally safe index to split `messages` at.
///
/// Search order: forward from the midpoint, then backward from the
/// midpoint, starting at index 1 (index 0 would leave nothing to
/// compress). Returns `None` when the conversation is one unbroken
/// tool-call chain with no safe cut — the caller compresses nothing.
#[must_use]
pub fn find_split_point(messages: &[Message]) -> Option<usize> {
    if messages.len() < 2 {
        return None;
    }
    let mid = messages.len() / 2;

    for i in mid..messages.len() {
        if is_safe_split(messages, i) {
            return Some(i);
        }
    }
    for i in (1..mid).rev() {
        if is_safe_split(messages, i) {
            return Some(i);
        }
    }
    None
}

/// A split index is safe when the message there is a `user` turn and the
/// preceding message is not an assistant whose tool calls would be cut
/// away from their results.
fn is_safe_split(messages: &[Message], index: usize) -> bool {
    if index == 0 || !messages[index].is_user() {
        return false;
    }
    !has_unresolved_tool_calls(messages, index - 1, index)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
