//! Tool-call fragment accumulation.
//!
//! Providers stream tool calls as indexed fragments: an opening fragment
//! with id and name, then argument-JSON deltas. The accumulator merges
//! them back into complete [`ToolCall`]s, preserving emission order and
//! synthesizing an id when the provider omitted one.

use std::collections::BTreeMap;

use quill_core::messages::ToolCall;

/// Partial tool call keyed by stream index.
#[derive(Debug, Default)]
struct Partial {
    id: Option<String>,
    name: String,
    arguments: String,
}

/// Accumulates indexed tool-call fragments into complete calls.
#[derive(Debug, Default)]
pub struct ToolCallAccumulator {
    partials: BTreeMap<u64, Partial>,
}

impl ToolCallAccumulator {
    /// Create an empty accumulator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge one fragment.
    ///
    /// Later non-empty `id`/`name` values win; argument text concatenates.
    pub fn push(&mut self, index: u64, id: Option<&str>, name: Option<&str>, args_delta: &str) {
        let entry = self.partials.entry(index).or_default();
        if let Some(id) = id {
            if !id.trim().is_empty() {
                entry.id = Some(id.to_owned());
            }
        }
        if let Some(name) = name {
            if !name.trim().is_empty() {
                entry.name = name.to_owned();
            }
        }
        entry.arguments.push_str(args_delta);
    }

    /// Whether any fragment has been seen.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.partials.is_empty()
    }

    /// Finish accumulation, dropping nameless partials.
    ///
    /// Empty argument text becomes `{}` so dispatch always sees valid JSON
    /// object text for no-argument calls.
    #[must_use]
    pub fn finish(self) -> Vec<ToolCall> {
        self.partials
            .into_iter()
            .filter_map(|(index, partial)| {
                if partial.name.trim().is_empty() {
                    return None;
                }
                let arguments = if partial.arguments.trim().is_empty() {
                    "{}".to_owned()
                } else {
                    partial.arguments
                };
                Some(ToolCall {
                    id: partial
                        .id
                        .unwrap_or_else(|| format!("call_{}", index + 1)),
                    name: partial.name,
                    arguments,
                })
            })
            .collect()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
