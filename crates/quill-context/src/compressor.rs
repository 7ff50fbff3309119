//! The context compressor.
//!
//! `compress` splits the history at a structurally safe index, sends the
//! head partition to the compact model with a structured summarization
//! prompt, and returns the tail verbatim for the caller to splice after
//! the summary. A failed or empty summary is fatal to the compression
//! attempt — the caller must fail its turn rather than silently proceed
//! over budget.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use quill_core::events::StreamEvent;
use quill_core::messages::{Message, TokenUsage};
use quill_llm::provider::{ChatRequest, Provider};
use tracing::{debug, info};

use crate::split::find_split_point;

/// Prefix of the summary message spliced into the rebuilt history.
pub const SUMMARY_PREFIX: &str = "[Context from earlier in this conversation]";

/// Assistant acknowledgment following the summary message.
pub const SUMMARY_ACK: &str = "I understand the previous context. Let me continue helping you.";

/// The structured summarization instruction sent to the compact model.
const SUMMARY_INSTRUCTIONS: &str = "Summarize the conversation transcript below for an AI coding \
assistant that will continue the session. Organize the summary under these sections:\n\
## Current task\n## Technical context\n## Key decisions\n## Completed work\n\
## Pending work\n## Critical information\n\
Be specific about file paths, command invocations, and decisions. Include nothing else.";

/// Errors fatal to a compression attempt.
#[derive(Debug, thiserror::Error)]
pub enum CompressionError {
    /// The compact model call failed.
    #[error("summarization failed: {0}")]
    Summarizer(String),

    /// The compact model produced an empty summary.
    #[error("summarization produced an empty summary")]
    EmptySummary,
}

/// Result of summarizing a head partition.
#[derive(Clone, Debug)]
pub struct SummaryResult {
    /// The generated summary text.
    pub narrative: String,
    /// Tokens spent generating it.
    pub usage: TokenUsage,
}

/// Summarizes a message slice. Implemented over the provider abstraction;
/// mockable in tests.
#[async_trait]
pub trait Summarizer: Send + Sync {
    /// Produce a structured summary of the messages.
    async fn summarize(&self, messages: &[Message]) -> Result<SummaryResult, CompressionError>;
}

/// What a compression attempt produced.
#[derive(Clone, Debug)]
pub enum Compression {
    /// No safe split point — the history is returned unchanged.
    Unchanged,
    /// The head was summarized; the tail is preserved verbatim.
    Compressed {
        /// Generated summary of the head partition.
        summary: String,
        /// Tokens spent summarizing.
        usage: TokenUsage,
        /// The tail partition, byte-identical to the input's tail.
        preserved_tail: Vec<Message>,
    },
}

/// The compressor.
pub struct ContextCompressor {
    summarizer: Arc<dyn Summarizer>,
}

impl ContextCompressor {
    /// Build over a summarizer.
    #[must_use]
    pub fn new(summarizer: Arc<dyn Summarizer>) -> Self {
        Self { summarizer }
    }

    /// Compress the history.
    ///
    /// Finds a safe split; with none, returns [`Compression::Unchanged`].
    /// Otherwise the head `[0, split)` is summarized and the tail
    /// `[split, end)` returned for splicing via [`rebuild`].
    pub async fn compress(&self, messages: &[Message]) -> Result<Compression, CompressionError> {
        let Some(split) = find_split_point(messages) else {
            debug!(
                total = messages.len(),
                "no safe split point; compressing nothing"
            );
            return Ok(Compression::Unchanged);
        };

        let head = &messages[..split];
        let tail = &messages[split..];
        debug!(
            total = messages.len(),
            split,
            head = head.len(),
            tail = tail.len(),
            "compressing head partition"
        );

        let result = self.summarizer.summarize(head).await?;
        if result.narrative.trim().is_empty() {
            return Err(CompressionError::EmptySummary);
        }

        info!(
            summarized = head.len(),
            preserved = tail.len(),
            summary_chars = result.narrative.len(),
            "context compressed"
        );
        Ok(Compression::Compressed {
            summary: result.narrative,
            usage: result.usage,
            preserved_tail: tail.to_vec(),
        })
    }
}

/// Splice a summary and the preserved tail back into a message list.
///
/// The rebuilt list opens with a summary `user` message and an assistant
/// acknowledgment, followed by the tail verbatim.
#[must_use]
pub fn rebuild(summary: &str, preserved_tail: Vec<Message>) -> Vec<Message> {
    let mut messages = Vec::with_capacity(2 + preserved_tail.len());
    messages.push(Message::user(format!("{SUMMARY_PREFIX}\n\n{summary}")));
    messages.push(Message::assistant(SUMMARY_ACK));
    messages.extend(preserved_tail);
    messages
}

// ─────────────────────────────────────────────────────────────────────────────
// Provider-backed summarizer
// ─────────────────────────────────────────────────────────────────────────────

/// Summarizer that calls the compact model through the same [`Provider`]
/// abstraction as ordinary turns.
pub struct ProviderSummarizer {
    provider: Arc<dyn Provider>,
    max_tokens: u32,
}

impl ProviderSummarizer {
    /// Build over a compact-model provider.
    #[must_use]
    pub fn new(provider: Arc<dyn Provider>) -> Self {
        Self {
            provider,
            max_tokens: 2048,
        }
    }

    fn transcript(messages: &[Message]) -> String {
        let mut text = String::new();
        for message in messages {
            let role = match message {
                Message::System { .. } => "system",
                Message::User { .. } => "user",
                Message::Assistant { .. } => "assistant",
                Message::Tool { .. } => "tool",
            };
            text.push_str(role);
            text.push_str(": ");
            text.push_str(message.content());
            for tc in message.tool_calls() {
                text.push_str(&format!("\n  [called {} {}]", tc.name, tc.arguments));
            }
            text.push('\n');
        }
        text
    }
}

#[async_trait]
impl Summarizer for ProviderSummarizer {
    async fn summarize(&self, messages: &[Message]) -> Result<SummaryResult, CompressionError> {
        let request = ChatRequest {
            model: self.provider.model().to_owned(),
            messages: vec![
                Message::system(SUMMARY_INSTRUCTIONS),
                Message::user(Self::transcript(messages)),
            ],
            tools: vec![],
            temperature: Some(0.0),
            max_tokens: Some(self.max_tokens),
        };

        let mut stream = self
            .provider
            .stream(&request)
            .await
            .map_err(|e| CompressionError::Summarizer(e.to_string()))?;

        let mut narrative = String::new();
        let mut usage = TokenUsage::default();
        while let Some(item) = stream.next().await {
            match item.map_err(|e| CompressionError::Summarizer(e.to_string()))? {
                StreamEvent::ContentDelta { delta } => narrative.push_str(&delta),
                StreamEvent::Usage { usage: u } => usage.add(&u),
                StreamEvent::Error { error } => {
                    return Err(CompressionError::Summarizer(error));
                }
                StreamEvent::ToolCalls { .. } | StreamEvent::Done => {}
            }
        }

        Ok(SummaryResult { narrative, usage })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
