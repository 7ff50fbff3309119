//! OpenAI Chat Completions adapter.
//!
//! Wire shape: `POST {base}/chat/completions` with `stream: true` and
//! `stream_options.include_usage`. Chunks carry `choices[0].delta.content`
//! for text, indexed `choices[0].delta.tool_calls[]` fragments for tool
//! calls, and one final chunk with a top-level `usage` object. The stream
//! terminates with the `data: [DONE]` sentinel.

use async_trait::async_trait;
use quill_core::events::StreamEvent;
use quill_core::messages::{Message, TokenUsage};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use crate::accumulate::ToolCallAccumulator;
use crate::pipeline::events_from_sse;
use crate::provider::{
    ChatRequest, EventStream, Provider, ProviderResult, response_to_api_error,
};

/// Default API base URL.
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Configuration for the Chat Completions adapter.
#[derive(Clone, Debug)]
pub struct OpenAiChatConfig {
    /// API key sent as a bearer token.
    pub api_key: String,
    /// Base URL (override for proxies and compatible backends).
    pub base_url: String,
    /// Model ID.
    pub model: String,
}

impl OpenAiChatConfig {
    /// Config with the default base URL.
    #[must_use]
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.into(),
            model: model.into(),
        }
    }
}

/// OpenAI Chat Completions provider.
pub struct OpenAiChatProvider {
    config: OpenAiChatConfig,
    client: reqwest::Client,
}

impl OpenAiChatProvider {
    /// Create a provider.
    #[must_use]
    pub fn new(config: OpenAiChatConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    /// Create a provider with a shared HTTP client.
    #[must_use]
    pub fn with_client(config: OpenAiChatConfig, client: reqwest::Client) -> Self {
        Self { config, client }
    }
}

#[async_trait]
impl Provider for OpenAiChatProvider {
    fn name(&self) -> &str {
        "openai-chat"
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    async fn stream(&self, request: &ChatRequest) -> ProviderResult<EventStream> {
        let body = build_request_body(&self.config.model, request);
        debug!(model = %self.config.model, "opening chat completions stream");

        let response = self
            .client
            .post(format!("{}/chat/completions", self.config.base_url))
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(response_to_api_error(response).await);
        }

        Ok(events_from_sse(
            response,
            false,
            "openai-chat",
            StreamState::default(),
            process_chunk,
            finalize,
        ))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Request conversion
// ─────────────────────────────────────────────────────────────────────────────

/// Build the Chat Completions request body from a neutral request.
fn build_request_body(model: &str, request: &ChatRequest) -> Value {
    let messages: Vec<Value> = request.messages.iter().map(convert_message).collect();

    let mut body = json!({
        "model": model,
        "messages": messages,
        "stream": true,
        "stream_options": {"include_usage": true},
    });
    if let Some(t) = request.temperature {
        body["temperature"] = json!(t);
    }
    if let Some(m) = request.max_tokens {
        body["max_tokens"] = json!(m);
    }
    if !request.tools.is_empty() {
        let tools: Vec<Value> = request
            .tools
            .iter()
            .map(|spec| {
                json!({
                    "type": "function",
                    "function": {
                        "name": spec.name,
                        "description": spec.description,
                        "parameters": spec.parameters,
                    }
                })
            })
            .collect();
        body["tools"] = json!(tools);
    }
    body
}

fn convert_message(message: &Message) -> Value {
    match message {
        Message::System { content } => json!({"role": "system", "content": content}),
        Message::User { content } => json!({"role": "user", "content": content}),
        Message::Assistant {
            content,
            tool_calls,
            ..
        } => {
            let mut msg = json!({"role": "assistant", "content": content});
            if !tool_calls.is_empty() {
                let calls: Vec<Value> = tool_calls
                    .iter()
                    .map(|tc| {
                        json!({
                            "id": tc.id,
                            "type": "function",
                            "function": {"name": tc.name, "arguments": tc.arguments},
                        })
                    })
                    .collect();
                msg["tool_calls"] = json!(calls);
            }
            msg
        }
        Message::Tool {
            tool_call_id,
            content,
            ..
        } => json!({
            "role": "tool",
            "tool_call_id": tool_call_id,
            "content": content,
        }),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Stream handling
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
    #[serde(default)]
    error: Option<WireError>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Option<ChunkDelta>,
}

#[derive(Debug, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<WireToolCallDelta>>,
}

#[derive(Debug, Deserialize)]
struct WireToolCallDelta {
    #[serde(default)]
    index: Option<u64>,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<WireFunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct WireFunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
    #[serde(default)]
    prompt_tokens_details: Option<WirePromptDetails>,
}

#[derive(Debug, Deserialize)]
struct WirePromptDetails {
    #[serde(default)]
    cached_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct WireError {
    #[serde(default)]
    message: String,
}

/// State accumulated across chunks within one stream.
#[derive(Default)]
struct StreamState {
    tool_calls: ToolCallAccumulator,
    usage: Option<TokenUsage>,
}

fn process_chunk(chunk: ChatChunk, state: &mut StreamState) -> Vec<StreamEvent> {
    if let Some(err) = chunk.error {
        return vec![StreamEvent::Error {
            error: format!("OpenAI API error: {}", err.message),
        }];
    }

    let mut events = Vec::new();

    if let Some(usage) = chunk.usage {
        let cached = usage
            .prompt_tokens_details
            .as_ref()
            .map(|d| d.cached_tokens)
            .filter(|&c| c > 0);
        state.usage = Some(TokenUsage {
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
            cache_creation_tokens: None,
            cache_read_tokens: cached,
        });
    }

    if let Some(delta) = chunk.choices.first().and_then(|c| c.delta.as_ref()) {
        if let Some(content) = &delta.content {
            if !content.is_empty() {
                events.push(StreamEvent::ContentDelta {
                    delta: content.clone(),
                });
            }
        }
        if let Some(fragments) = &delta.tool_calls {
            for (position, fragment) in fragments.iter().enumerate() {
                let index = fragment.index.unwrap_or(position as u64);
                let (name, args) = fragment
                    .function
                    .as_ref()
                    .map_or((None, ""), |f| {
                        (f.name.as_deref(), f.arguments.as_deref().unwrap_or(""))
                    });
                state
                    .tool_calls
                    .push(index, fragment.id.as_deref(), name, args);
            }
        }
    }

    events
}

fn finalize(state: StreamState) -> Vec<StreamEvent> {
    let mut events = Vec::new();
    if !state.tool_calls.is_empty() {
        events.push(StreamEvent::ToolCalls {
            tool_calls: state.tool_calls.finish(),
        });
    }
    if let Some(usage) = state.usage {
        events.push(StreamEvent::Usage { usage });
    }
    events.push(StreamEvent::Done);
    events
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
