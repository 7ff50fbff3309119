//! Output token guard.
//!
//! Runs before any tool result is appended to the conversation: serialize
//! the result, replace embedded base64 image payloads with a placeholder so
//! they don't inflate the count, tokenize, and compare against a ceiling.
//! Oversized results raise a typed failure carrying the measured count and
//! the limit — the caller turns that into the tool's error result instead
//! of silently truncating, so the model can react (narrow the query, read
//! a smaller range).
//!
//! When no BPE encoder is loaded the guard falls back to a
//! 4-characters-per-token estimate rather than skipping the check.

use quill_core::tools::ToolOutput;
use serde_json::Value;
use tokenizers::Tokenizer;
use tracing::debug;

/// Default result ceiling in tokens.
pub const DEFAULT_TOKEN_LIMIT: u64 = 100_000;

/// Placeholder substituted for stripped base64 image payloads.
pub const IMAGE_PLACEHOLDER: &str = "[image data omitted]";

/// Raised when a tool result exceeds the token ceiling.
#[derive(Debug, thiserror::Error)]
#[error("tool result too large: {measured} tokens exceeds the {limit} token limit")]
pub struct ContentTooLarge {
    /// Measured token count.
    pub measured: u64,
    /// Configured ceiling.
    pub limit: u64,
}

/// Token-size guard applied to every tool result.
pub struct OutputTokenGuard {
    limit: u64,
    tokenizer: Option<Tokenizer>,
}

impl OutputTokenGuard {
    /// Guard with the default limit and the estimate fallback.
    #[must_use]
    pub fn new() -> Self {
        Self {
            limit: DEFAULT_TOKEN_LIMIT,
            tokenizer: None,
        }
    }

    /// Guard with a custom limit.
    #[must_use]
    pub fn with_limit(limit: u64) -> Self {
        Self {
            limit,
            tokenizer: None,
        }
    }

    /// Attach a BPE-compatible encoder.
    #[must_use]
    pub fn with_tokenizer(mut self, tokenizer: Tokenizer) -> Self {
        self.tokenizer = Some(tokenizer);
        self
    }

    /// The configured ceiling.
    #[must_use]
    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// Check a tool result, returning the measured token count.
    pub fn check(&self, output: &ToolOutput) -> Result<u64, ContentTooLarge> {
        let mut value = serde_json::to_value(output).unwrap_or(Value::Null);
        strip_image_payloads(&mut value);
        let serialized = value.to_string();
        let measured = self.count_tokens(&serialized);
        debug!(measured, limit = self.limit, "tool output measured");
        if measured > self.limit {
            return Err(ContentTooLarge {
                measured,
                limit: self.limit,
            });
        }
        Ok(measured)
    }

    #[allow(clippy::cast_possible_truncation)]
    fn count_tokens(&self, text: &str) -> u64 {
        if let Some(tokenizer) = &self.tokenizer {
            if let Ok(encoding) = tokenizer.encode(text, false) {
                return encoding.len() as u64;
            }
        }
        // 4-chars-per-token estimate
        (text.chars().count() as u64).div_ceil(4)
    }
}

impl Default for OutputTokenGuard {
    fn default() -> Self {
        Self::new()
    }
}

/// Replace base64 image payloads anywhere in a JSON value.
///
/// An image payload is an object with `"type": "image"` and a string
/// `"data"` field; the data is replaced with [`IMAGE_PLACEHOLDER`].
pub fn strip_image_payloads(value: &mut Value) {
    match value {
        Value::Object(map) => {
            let is_image = map.get("type").and_then(Value::as_str) == Some("image");
            if is_image {
                if let Some(data) = map.get_mut("data") {
                    if data.is_string() {
                        *data = Value::String(IMAGE_PLACEHOLDER.to_owned());
                    }
                }
            }
            for (_, v) in map.iter_mut() {
                strip_image_payloads(v);
            }
        }
        Value::Array(items) => {
            for item in items {
                strip_image_payloads(item);
            }
        }
        _ => {}
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
